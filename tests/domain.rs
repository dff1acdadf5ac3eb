use assert_matches::assert_matches;

use vna_retriever::domain::{
    DateRange, Modality, SearchKind, StudyDate, keyword_pattern, split_terms,
};
use vna_retriever::error::RetrieverError;

#[test]
fn search_kind_query_keys() {
    assert_eq!(SearchKind::Accnum.query_key(), "AccessionNumber");
    assert_eq!(SearchKind::Mrn.query_key(), "PatientID");
    assert_eq!(SearchKind::Keyword.query_key(), "StudyDescription");
    assert_eq!(SearchKind::Mrn.query_value(" MR123 "), "MR123");
    assert_eq!(
        SearchKind::Keyword.query_value("contrast mri abdom"),
        "*contrast*mri*abdom*"
    );
}

#[test]
fn keyword_pattern_ignores_extra_separators() {
    assert_eq!(keyword_pattern("  liver,  ct "), "*liver*ct*");
    assert_eq!(split_terms("E1,E2  E3\nE4"), vec!["E1", "E2", "E3", "E4"]);
}

#[test]
fn modality_is_normalized() {
    let modality: Modality = " mr ".parse().unwrap();
    assert_eq!(modality.as_str(), "MR");
    assert_matches!("M R".parse::<Modality>(), Err(RetrieverError::InvalidModality(_)));
    assert_matches!("".parse::<Modality>(), Err(RetrieverError::InvalidModality(_)));
}

#[test]
fn study_dates_and_ranges() {
    let start: StudyDate = "20020101".parse().unwrap();
    let end: StudyDate = "2009-12-31".parse().unwrap();
    assert_eq!(end.to_string(), "20091231");
    assert_matches!("2009-13-01".parse::<StudyDate>(), Err(RetrieverError::InvalidDate(_)));

    let range = DateRange::new(Some(start), Some(end)).unwrap();
    assert_eq!(range.query_value().as_deref(), Some("20020101-20091231"));
    assert_eq!(
        DateRange::new(None, Some(end)).unwrap().query_value().as_deref(),
        Some("-20091231")
    );
    assert_eq!(DateRange::default().query_value(), None);
    assert_matches!(
        DateRange::new(Some(end), Some(start)),
        Err(RetrieverError::InvalidDateRange { .. })
    );
}
