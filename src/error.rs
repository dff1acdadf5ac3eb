use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RetrieverError {
    #[error("invalid query term: {0}")]
    InvalidTerm(String),

    #[error("invalid modality: {0}")]
    InvalidModality(String),

    #[error("invalid study date (expected YYYYMMDD): {0}")]
    InvalidDate(String),

    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("no query terms given")]
    #[diagnostic(help("pass terms with -q, a terms file with -p, or run interactively"))]
    NoQueryTerms,

    #[error("missing credentials: {0}")]
    #[diagnostic(help("use -u/VNA_USER and VNA_PASSWORD when running non-interactively"))]
    MissingCredentials(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown archive region: {0}")]
    UnknownRegion(String),

    #[error("access denied by {service}; probably incorrect login information")]
    AuthenticationFailed { service: String },

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive returned status {status} for {url}")]
    ArchiveStatus { status: u16, url: String },

    #[error("unexpected archive response: {0}")]
    ArchiveParse(String),

    #[error("report service request failed: {0}")]
    ReportHttp(String),

    #[error("report service returned status {status}: {message}")]
    ReportStatus { status: u16, message: String },

    #[error("save path must end with .csv: {0}")]
    InvalidCsvPath(String),

    #[error("metadata document could not be parsed: {0}")]
    MetadataParse(String),

    #[error("anonymization failed: {0}")]
    Anonymize(String),

    #[error("study folder {0} was not removed before the timeout")]
    StudyDirBusy(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("cancelled by operator")]
    Cancelled,
}

impl RetrieverError {
    /// Errors that abort the whole run instead of skipping one term, study or instance.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RetrieverError::AuthenticationFailed { .. } | RetrieverError::Cancelled
        )
    }
}
