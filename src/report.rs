use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Credentials;
use crate::error::RetrieverError;

pub const DEFAULT_REPORT_LIMIT: usize = 1000;
pub const CSV_HEADER: [&str; 6] = [
    "mrn",
    "accession_number",
    "exam_description",
    "exam_id",
    "date_exam_completed",
    "text",
];
const EXAM_COMPLETED_EVENT: i64 = 5;
const DATE_NOT_FOUND: &str = "Not found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ReportQuery {
    Text(String),
    Accession(String),
    Patient(String),
}

impl ReportQuery {
    pub fn path(&self) -> &'static str {
        match self {
            ReportQuery::Text(_) => "/api/v1/index/rad/search/",
            ReportQuery::Accession(_) | ReportQuery::Patient(_) => "/api/v1/report/",
        }
    }

    pub fn params(&self, limit: usize) -> Vec<(&'static str, String)> {
        let first = match self {
            ReportQuery::Text(words) => ("q", format!("*{}*", words.trim())),
            ReportQuery::Accession(acc) => ("accession_number", acc.trim().to_string()),
            ReportQuery::Patient(mrn) => ("patient_mrn", mrn.trim().to_string()),
        };
        vec![
            first,
            ("format", "json".to_string()),
            ("limit", limit.to_string()),
        ]
    }
}

impl std::fmt::Display for ReportQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportQuery::Text(words) => write!(f, "text \"{words}\""),
            ReportQuery::Accession(acc) => write!(f, "accession {acc}"),
            ReportQuery::Patient(mrn) => write!(f, "mrn {mrn}"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportResponse {
    #[serde(default)]
    pub objects: Vec<ReportRecord>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportRecord {
    #[serde(default)]
    pub patient_mrn: Option<String>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub exam_type: Option<ExamType>,
    #[serde(default)]
    pub events: Vec<ReportEvent>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExamType {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportEvent {
    #[serde(default)]
    pub event_type: Option<Value>,
    #[serde(default)]
    pub date: Option<String>,
}

impl ReportEvent {
    fn is_exam_completed(&self) -> bool {
        match &self.event_type {
            Some(Value::Number(number)) => number.as_i64() == Some(EXAM_COMPLETED_EVENT),
            Some(Value::String(text)) => text.trim().parse::<i64>().ok() == Some(EXAM_COMPLETED_EVENT),
            _ => false,
        }
    }

    fn day(&self) -> Option<&str> {
        let date = self.date.as_deref()?.trim();
        if date.is_empty() {
            return None;
        }
        Some(date.split('T').next().unwrap_or(date))
    }
}

/// Date part of the exam-completed event, else of the first dated event.
pub fn exam_completed_date(events: &[ReportEvent]) -> String {
    events
        .iter()
        .filter(|event| event.is_exam_completed())
        .find_map(ReportEvent::day)
        .or_else(|| events.iter().find_map(ReportEvent::day))
        .unwrap_or(DATE_NOT_FOUND)
        .to_string()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Reduces report HTML to its visible text lines.
pub struct HtmlText {
    breaks: Regex,
    tags: Regex,
}

impl HtmlText {
    pub fn new() -> Result<Self, RetrieverError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| RetrieverError::ReportHttp(err.to_string()))
        };
        Ok(Self {
            breaks: compile(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6])\s*>")?,
            tags: compile(r"<[^>]*>")?,
        })
    }

    pub fn strip(&self, html: &str) -> String {
        let with_breaks = self.breaks.replace_all(html, "\n");
        let without_tags = self.tags.replace_all(&with_breaks, "");
        decode_entities(&without_tags)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub trait ReportClient: Send + Sync {
    fn search(&self, query: &ReportQuery, limit: usize) -> Result<Vec<ReportRecord>, RetrieverError>;
}

#[derive(Clone)]
pub struct ReportHttpClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl ReportHttpClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, RetrieverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("vna-retriever/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RetrieverError::ReportHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| RetrieverError::ReportHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn request(&self, query: &ReportQuery, limit: usize) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, query.path()))
            .basic_auth(&self.credentials.user, Some(self.credentials.password()))
            .query(&query.params(limit))
    }
}

impl ReportClient for ReportHttpClient {
    fn search(&self, query: &ReportQuery, limit: usize) -> Result<Vec<ReportRecord>, RetrieverError> {
        tracing::debug!(query = %query, "report search");
        let response = self
            .request(query, limit)
            .send()
            .map_err(|err| RetrieverError::ReportHttp(err.to_string()))?;

        if !classify_report_status(response.status())? {
            return Ok(Vec::new());
        }

        let body = response
            .text()
            .map_err(|err| RetrieverError::ReportHttp(err.to_string()))?;
        parse_report_response(&body)
    }
}

/// `204` means no matches (`false`), `401`/`403` are fatal, a 5xx usually
/// means the query text was rejected.
pub fn classify_report_status(status: StatusCode) -> Result<bool, RetrieverError> {
    if status == StatusCode::NO_CONTENT {
        return Ok(false);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(RetrieverError::AuthenticationFailed {
            service: "report service".to_string(),
        });
    }
    if !status.is_success() {
        let message = if status.is_server_error() {
            "server exception; check the query format".to_string()
        } else {
            status.canonical_reason().unwrap_or("request rejected").to_string()
        };
        return Err(RetrieverError::ReportStatus {
            status: status.as_u16(),
            message,
        });
    }
    Ok(true)
}

pub fn parse_report_response(body: &str) -> Result<Vec<ReportRecord>, RetrieverError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: ReportResponse = serde_json::from_str(body).map_err(|err| {
        RetrieverError::ReportStatus {
            status: StatusCode::OK.as_u16(),
            message: format!("malformed response: {err}"),
        }
    })?;
    Ok(response.objects)
}

pub fn ensure_csv_path(path: &Path) -> Result<(), RetrieverError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "csv");
    if is_csv {
        Ok(())
    } else {
        Err(RetrieverError::InvalidCsvPath(path.display().to_string()))
    }
}

/// Writes the fixed header plus one row per record.
pub fn write_csv(path: &Path, records: &[ReportRecord]) -> Result<(), RetrieverError> {
    ensure_csv_path(path)?;
    let html = HtmlText::new()?;
    let file = File::create(path)
        .map_err(|err| RetrieverError::Filesystem(format!("create {}: {err}", path.display())))?;
    let mut writer = csv::Writer::from_writer(file);
    let csv_err = |err: csv::Error| RetrieverError::Filesystem(format!("write csv: {err}"));

    writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for record in records {
        let exam = record.exam_type.clone().unwrap_or_default();
        writer
            .write_record([
                record.patient_mrn.clone().unwrap_or_default(),
                record.accession_number.clone().unwrap_or_default(),
                exam.description.unwrap_or_default(),
                exam.id.as_ref().map(value_text).unwrap_or_default(),
                exam_completed_date(&record.events),
                html.strip(record.text.as_deref().unwrap_or_default()),
            ])
            .map_err(csv_err)?;
    }
    writer
        .flush()
        .map_err(|err| RetrieverError::Filesystem(format!("write csv: {err}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedQuery {
    pub query: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    pub path: String,
    pub queries: usize,
    pub records: usize,
    pub skipped: Vec<SkippedQuery>,
    pub elapsed_ms: u128,
}

/// Runs every query, then writes all returned records to one CSV file.
pub fn export_reports<C: ReportClient>(
    client: &C,
    queries: &[ReportQuery],
    limit: usize,
    path: &Path,
) -> Result<ReportResult, RetrieverError> {
    ensure_csv_path(path)?;
    let started = Instant::now();
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for query in queries {
        match client.search(query, limit) {
            Ok(found) => {
                tracing::info!(query = %query, records = found.len(), "reports found");
                records.extend(found);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(query = %query, error = %err, "report query skipped");
                skipped.push(SkippedQuery {
                    query: query.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    write_csv(path, &records)?;
    Ok(ReportResult {
        path: path.display().to_string(),
        queries: queries.len(),
        records: records.len(),
        skipped,
        elapsed_ms: started.elapsed().as_millis(),
    })
}
