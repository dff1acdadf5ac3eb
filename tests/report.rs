use std::sync::Mutex;

use assert_matches::assert_matches;

use vna_retriever::error::RetrieverError;
use vna_retriever::report::{
    ReportClient, ReportQuery, ReportRecord, export_reports, parse_report_response, write_csv,
};

const FIXTURE: &str = include_str!("fixtures/report_search.json");

#[test]
fn parses_report_search_response() {
    let records = parse_report_response(FIXTURE).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].patient_mrn.as_deref(), Some("MR0001"));
    assert!(parse_report_response("").unwrap().is_empty());
}

#[test]
fn csv_has_fixed_header_and_one_row_per_record() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("results.csv");
    let records = parse_report_response(FIXTURE).unwrap();
    write_csv(&path, &records).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(
        header,
        vec!["mrn", "accession_number", "exam_description", "exam_id", "date_exam_completed", "text"]
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][1], "E123456789");
    assert_eq!(&rows[0][3], "4411");
    assert_eq!(&rows[0][4], "2016-03-02");
    assert_eq!(
        &rows[0][5],
        "EXAM: MRI abdomen\nIMPRESSION:\nTransarterial chemoembolization, no residual enhancement."
    );
    assert_eq!(&rows[1][3], "CT12");
    assert_eq!(&rows[1][4], "Not found");
    assert_eq!(&rows[1][5], "");
}

struct MockReports {
    fail_on: Option<String>,
    seen: Mutex<Vec<String>>,
}

impl ReportClient for MockReports {
    fn search(&self, query: &ReportQuery, _limit: usize) -> Result<Vec<ReportRecord>, RetrieverError> {
        self.seen.lock().unwrap().push(query.to_string());
        match (&self.fail_on, query) {
            (Some(code), ReportQuery::Accession(acc)) if acc == code => {
                Err(RetrieverError::ReportStatus {
                    status: 500,
                    message: "server exception".to_string(),
                })
            }
            (Some(code), ReportQuery::Patient(mrn)) if mrn == code => {
                Err(RetrieverError::AuthenticationFailed {
                    service: "report service".to_string(),
                })
            }
            _ => Ok(vec![ReportRecord {
                accession_number: Some("E1".to_string()),
                ..ReportRecord::default()
            }]),
        }
    }
}

#[test]
fn export_skips_failed_queries() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("out.csv");
    let client = MockReports {
        fail_on: Some("E2".to_string()),
        seen: Mutex::new(Vec::new()),
    };
    let queries = vec![
        ReportQuery::Accession("E1".to_string()),
        ReportQuery::Accession("E2".to_string()),
        ReportQuery::Accession("E3".to_string()),
    ];
    let result = export_reports(&client, &queries, 100, &path).unwrap();
    assert_eq!(result.queries, 3);
    assert_eq!(result.records, 2);
    assert_eq!(result.skipped.len(), 1);
    assert!(path.exists());
}

#[test]
fn export_aborts_on_authentication_failure() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockReports {
        fail_on: Some("MR1".to_string()),
        seen: Mutex::new(Vec::new()),
    };
    let queries = vec![ReportQuery::Patient("MR1".to_string())];
    let err = export_reports(&client, &queries, 100, &temp.path().join("out.csv")).unwrap_err();
    assert_matches!(err, RetrieverError::AuthenticationFailed { .. });
}

#[test]
fn export_requires_csv_suffix_before_querying() {
    let client = MockReports {
        fail_on: None,
        seen: Mutex::new(Vec::new()),
    };
    let queries = vec![ReportQuery::Text("chemo".to_string())];
    let err = export_reports(&client, &queries, 100, std::path::Path::new("out.xlsx")).unwrap_err();
    assert_matches!(err, RetrieverError::InvalidCsvPath(_));
    assert!(client.seen.lock().unwrap().is_empty());
}
