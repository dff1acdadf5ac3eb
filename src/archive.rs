use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Request, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{Credentials, RunOptions};
use crate::domain::{
    DateRange, InstanceUid, Modality, SearchKind, Series, SeriesUid, Study, StudyUid,
};
use crate::error::RetrieverError;

const STUDY_INSTANCE_UID: &str = "0020000D";
const SERIES_INSTANCE_UID: &str = "0020000E";
const SOP_INSTANCE_UID: &str = "00080018";
const ACCESSION_NUMBER: &str = "00080050";
const PATIENT_ID: &str = "00100020";
const STUDY_DESCRIPTION: &str = "00081030";
const STUDY_DATE: &str = "00080020";
const MODALITIES_IN_STUDY: &str = "00080061";
const MODALITY: &str = "00080060";
const SERIES_DESCRIPTION: &str = "0008103E";
const SERIES_NUMBER: &str = "00200011";

pub trait ArchiveClient: Send + Sync {
    fn search_studies(&self, query: &StudyQuery) -> Result<Vec<Study>, RetrieverError>;
    fn search_series(
        &self,
        study: &StudyUid,
        modality: Option<&Modality>,
    ) -> Result<Vec<Series>, RetrieverError>;
    fn search_instances(
        &self,
        study: &StudyUid,
        series: &SeriesUid,
    ) -> Result<Vec<InstanceUid>, RetrieverError>;
    fn retrieve_series_metadata(
        &self,
        study: &StudyUid,
        series: &SeriesUid,
    ) -> Result<String, RetrieverError>;
    fn retrieve_instance(
        &self,
        study: &StudyUid,
        series: &SeriesUid,
        instance: &InstanceUid,
        destination: &Path,
    ) -> Result<(), RetrieverError>;
}

/// One study-level search for one operator term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyQuery {
    pub kind: SearchKind,
    pub term: String,
    pub modality: Option<Modality>,
    pub dates: DateRange,
    pub limit: Option<usize>,
}

impl StudyQuery {
    pub fn from_options(term: &str, options: &RunOptions) -> Self {
        Self {
            kind: options.search_kind,
            term: term.to_string(),
            modality: options.modality.clone(),
            dates: options.dates,
            limit: options.limit,
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![(self.kind.query_key(), self.kind.query_value(&self.term))];
        if let Some(modality) = &self.modality {
            params.push(("ModalitiesInStudy", format!("*{modality}*")));
        }
        if let Some(range) = self.dates.query_value() {
            params.push(("StudyDate", range));
        }
        match (self.kind, self.limit) {
            (SearchKind::Accnum, _) | (_, None) => {}
            (_, Some(limit)) => params.push(("limit", limit.to_string())),
        }
        params
    }
}

/// One DICOM JSON dataset: tag (`GGGGEEEE`) to attribute.
pub type DicomJsonObject = BTreeMap<String, DicomJsonAttribute>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DicomJsonAttribute {
    #[serde(default)]
    pub vr: Option<String>,
    #[serde(rename = "Value", default)]
    pub value: Vec<Value>,
}

#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl ArchiveHttpClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, RetrieverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("vna-retriever/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn search_url(&self, study: Option<&StudyUid>, series: Option<&SeriesUid>) -> String {
        let mut url = format!("{}/AcuoREST/dicomrs/search/studies", self.base_url);
        if let Some(study) = study {
            url.push_str(&format!("/{}/series", study.as_str()));
            if let Some(series) = series {
                url.push_str(&format!("/{}/instances", series.as_str()));
            }
        }
        url
    }

    pub fn metadata_url(&self, study: &StudyUid, series: &SeriesUid) -> String {
        format!(
            "{}/AcuoREST/dicomrs/retrieve/studies/{}/series/{}/metadata",
            self.base_url,
            study.as_str(),
            series.as_str()
        )
    }

    pub fn wado_url(&self) -> String {
        format!("{}/AcuoREST/wadoget", self.base_url)
    }

    /// The request `search_studies` would send; exposed for inspection.
    pub fn study_search_request(&self, query: &StudyQuery) -> Result<Request, RetrieverError> {
        self.request(&self.search_url(None, None), &query.params())
            .build()
            .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))
    }

    fn request(&self, url: &str, params: &[(&str, String)]) -> RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .basic_auth(&self.credentials.user, Some(self.credentials.password()));
        if !params.is_empty() {
            request = request.query(params);
        }
        request
    }

    fn send(&self, url: &str, params: &[(&str, String)]) -> Result<Option<Response>, RetrieverError> {
        let response = self
            .request(url, params)
            .send()
            .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))?;
        check_status(response)
    }

    fn search(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<DicomJsonObject>, RetrieverError> {
        let Some(response) = self.send(url, params)? else {
            return Ok(Vec::new());
        };
        let body = response
            .text()
            .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))?;
        parse_dicom_json(&body)
    }
}

impl ArchiveClient for ArchiveHttpClient {
    fn search_studies(&self, query: &StudyQuery) -> Result<Vec<Study>, RetrieverError> {
        let objects = self.search(&self.search_url(None, None), &query.params())?;
        objects.iter().map(study_from_json).collect()
    }

    fn search_series(
        &self,
        study: &StudyUid,
        modality: Option<&Modality>,
    ) -> Result<Vec<Series>, RetrieverError> {
        let params = modality
            .map(|modality| vec![("Modality", modality.to_string())])
            .unwrap_or_default();
        let objects = self.search(&self.search_url(Some(study), None), &params)?;
        objects.iter().map(series_from_json).collect()
    }

    fn search_instances(
        &self,
        study: &StudyUid,
        series: &SeriesUid,
    ) -> Result<Vec<InstanceUid>, RetrieverError> {
        let objects = self.search(&self.search_url(Some(study), Some(series)), &[])?;
        objects
            .iter()
            .map(|object| {
                first_text(object, SOP_INSTANCE_UID)
                    .map(InstanceUid::new)
                    .ok_or_else(|| missing_tag("instance", SOP_INSTANCE_UID))
            })
            .collect()
    }

    fn retrieve_series_metadata(
        &self,
        study: &StudyUid,
        series: &SeriesUid,
    ) -> Result<String, RetrieverError> {
        let url = self.metadata_url(study, series);
        let params = [("contentType", "application/xml".to_string())];
        let response = self.send(&url, &params)?.ok_or(RetrieverError::ArchiveStatus {
            status: StatusCode::NO_CONTENT.as_u16(),
            url: url.clone(),
        })?;
        response
            .text()
            .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))
    }

    fn retrieve_instance(
        &self,
        study: &StudyUid,
        series: &SeriesUid,
        instance: &InstanceUid,
        destination: &Path,
    ) -> Result<(), RetrieverError> {
        let url = self.wado_url();
        let params = [
            ("requestType", "WADO".to_string()),
            ("contentType", "application/dicom".to_string()),
            ("studyUID", study.to_string()),
            ("seriesUID", series.to_string()),
            ("objectUID", instance.to_string()),
        ];
        let mut response = self.send(&url, &params)?.ok_or(RetrieverError::ArchiveStatus {
            status: StatusCode::NO_CONTENT.as_u16(),
            url: url.clone(),
        })?;
        let mut file = File::create(destination)
            .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| RetrieverError::ArchiveHttp(err.to_string()))?;
        Ok(())
    }
}

fn check_status(response: Response) -> Result<Option<Response>, RetrieverError> {
    if classify_status(response.status(), response.url().as_str())? {
        Ok(Some(response))
    } else {
        Ok(None)
    }
}

/// `204` means no matches (`false`), `401`/`403` are fatal, anything else
/// non-2xx is an `ArchiveStatus` error.
pub fn classify_status(status: StatusCode, url: &str) -> Result<bool, RetrieverError> {
    if status == StatusCode::NO_CONTENT {
        return Ok(false);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(RetrieverError::AuthenticationFailed {
            service: "archive".to_string(),
        });
    }
    if !status.is_success() {
        return Err(RetrieverError::ArchiveStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(true)
}

pub fn parse_dicom_json(body: &str) -> Result<Vec<DicomJsonObject>, RetrieverError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(body).map_err(|err| RetrieverError::ArchiveParse(err.to_string()))
}

pub fn study_from_json(object: &DicomJsonObject) -> Result<Study, RetrieverError> {
    let uid = first_text(object, STUDY_INSTANCE_UID)
        .ok_or_else(|| missing_tag("study", STUDY_INSTANCE_UID))?;
    Ok(Study {
        uid: StudyUid::new(uid),
        accession_number: first_text(object, ACCESSION_NUMBER),
        patient_id: first_text(object, PATIENT_ID),
        description: first_text(object, STUDY_DESCRIPTION),
        study_date: first_text(object, STUDY_DATE),
        modalities: all_texts(object, MODALITIES_IN_STUDY),
    })
}

pub fn series_from_json(object: &DicomJsonObject) -> Result<Series, RetrieverError> {
    let uid = first_text(object, SERIES_INSTANCE_UID)
        .ok_or_else(|| missing_tag("series", SERIES_INSTANCE_UID))?;
    Ok(Series {
        uid: SeriesUid::new(uid),
        modality: first_text(object, MODALITY),
        description: first_text(object, SERIES_DESCRIPTION),
        number: first_text(object, SERIES_NUMBER),
        instances: Vec::new(),
    })
}

fn missing_tag(level: &str, tag: &str) -> RetrieverError {
    RetrieverError::ArchiveParse(format!("{level} entry without {tag}"))
}

pub fn first_text(object: &DicomJsonObject, tag: &str) -> Option<String> {
    all_texts(object, tag).into_iter().next()
}

fn all_texts(object: &DicomJsonObject, tag: &str) -> Vec<String> {
    let Some(attribute) = object.get(tag) else {
        return Vec::new();
    };
    attribute
        .value
        .iter()
        .filter_map(|value| match value {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            Value::Object(name) => name
                .get("Alphabetic")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ArchiveHttpClient {
        ArchiveHttpClient::new(
            "http://vna.example:8083/",
            Credentials::new("user", "secret"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn status_classification() {
        let url = "http://vna.example:8083/AcuoREST/dicomrs/search/studies";
        assert!(classify_status(StatusCode::OK, url).unwrap());
        assert!(!classify_status(StatusCode::NO_CONTENT, url).unwrap());
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify_status(status, url).unwrap_err();
            assert!(matches!(err, RetrieverError::AuthenticationFailed { .. }));
            assert!(err.is_fatal());
        }
        for status in [StatusCode::NOT_FOUND, StatusCode::INTERNAL_SERVER_ERROR] {
            let err = classify_status(status, url).unwrap_err();
            assert!(matches!(
                &err,
                RetrieverError::ArchiveStatus { status: code, url: u } if *code == status.as_u16() && u == url
            ));
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn search_urls_follow_hierarchy() {
        let client = client();
        let study = StudyUid::new("1.2.3");
        let series = SeriesUid::new("1.2.3.4");
        assert_eq!(
            client.search_url(Some(&study), Some(&series)),
            "http://vna.example:8083/AcuoREST/dicomrs/search/studies/1.2.3/series/1.2.3.4/instances"
        );
        assert_eq!(
            client.metadata_url(&study, &series),
            "http://vna.example:8083/AcuoREST/dicomrs/retrieve/studies/1.2.3/series/1.2.3.4/metadata"
        );
    }

    #[test]
    fn study_request_carries_filters() {
        let query = StudyQuery {
            kind: SearchKind::Keyword,
            term: "contrast mri".to_string(),
            modality: Some("mr".parse().unwrap()),
            dates: DateRange::new(Some("20020101".parse().unwrap()), None).unwrap(),
            limit: Some(10),
        };
        let request = client().study_search_request(&query).unwrap();
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("StudyDescription".into(), "*contrast*mri*".into())));
        assert!(pairs.contains(&("ModalitiesInStudy".into(), "*MR*".into())));
        assert!(pairs.contains(&("StudyDate".into(), "20020101-".into())));
        assert!(pairs.contains(&("limit".into(), "10".into())));
        assert!(request.headers().contains_key(reqwest::header::AUTHORIZATION));
    }

    #[test]
    fn accession_search_has_no_limit() {
        let query = StudyQuery {
            kind: SearchKind::Accnum,
            term: " E123 ".to_string(),
            modality: None,
            dates: DateRange::default(),
            limit: Some(3),
        };
        assert_eq!(
            query.params(),
            vec![("AccessionNumber", "E123".to_string())]
        );
    }

    #[test]
    fn parses_study_json() {
        let body = r#"[{
            "0020000D": {"vr": "UI", "Value": ["1.2.840.1"]},
            "00080050": {"vr": "SH", "Value": ["E123456789"]},
            "00100020": {"vr": "LO", "Value": ["MR0001"]},
            "00080061": {"vr": "CS", "Value": ["MR", "SR"]},
            "00200011": {"vr": "IS", "Value": [3]}
        }]"#;
        let objects = parse_dicom_json(body).unwrap();
        let study = study_from_json(&objects[0]).unwrap();
        assert_eq!(study.uid.as_str(), "1.2.840.1");
        assert_eq!(study.accession_number.as_deref(), Some("E123456789"));
        assert_eq!(study.modalities, vec!["MR", "SR"]);
        assert_eq!(first_text(&objects[0], "00200011").as_deref(), Some("3"));
        assert!(parse_dicom_json("  ").unwrap().is_empty());
    }
}
