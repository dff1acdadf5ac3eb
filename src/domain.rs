use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::RetrieverError;

/// What the operator-supplied terms identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Accnum,
    Mrn,
    Keyword,
}

impl SearchKind {
    pub fn query_key(self) -> &'static str {
        match self {
            SearchKind::Accnum => "AccessionNumber",
            SearchKind::Mrn => "PatientID",
            SearchKind::Keyword => "StudyDescription",
        }
    }

    /// Query value sent to the archive for one term.
    pub fn query_value(self, term: &str) -> String {
        match self {
            SearchKind::Accnum | SearchKind::Mrn => term.trim().to_string(),
            SearchKind::Keyword => keyword_pattern(term),
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            SearchKind::Accnum => {
                "Enter accession numbers separated by commas (e.g. E123456789, E234567890)"
            }
            SearchKind::Mrn => "Enter patient MRNs separated by commas",
            SearchKind::Keyword => "Enter study description keywords (all must match)",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchKind::Accnum => write!(f, "accnum"),
            SearchKind::Mrn => write!(f, "mrn"),
            SearchKind::Keyword => write!(f, "keyword"),
        }
    }
}

/// `contrast mri` becomes `*contrast*mri*`: every word must appear, in order.
pub fn keyword_pattern(term: &str) -> String {
    let mut pattern = String::from("*");
    for word in term.split(|ch: char| ch.is_whitespace() || ch == ',') {
        if word.is_empty() {
            continue;
        }
        pattern.push_str(word);
        pattern.push('*');
    }
    pattern
}

/// Splits free-form input on commas, spaces and line breaks.
pub fn split_terms(input: &str) -> Vec<String> {
    input
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudyUid(String);

impl StudyUid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesUid(String);

impl SeriesUid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceUid(String);

impl InstanceUid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modality(String);

impl Modality {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Modality {
    type Err = RetrieverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= 16
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(RetrieverError::InvalidModality(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StudyDate(NaiveDate);

impl StudyDate {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for StudyDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for StudyDate {
    type Err = RetrieverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        NaiveDate::parse_from_str(trimmed, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
            .map(Self)
            .map_err(|_| RetrieverError::InvalidDate(value.to_string()))
    }
}

/// Inclusive study date range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    start: Option<StudyDate>,
    end: Option<StudyDate>,
}

impl DateRange {
    pub fn new(start: Option<StudyDate>, end: Option<StudyDate>) -> Result<Self, RetrieverError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(RetrieverError::InvalidDateRange {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Option<StudyDate> {
        self.start
    }

    pub fn end(&self) -> Option<StudyDate> {
        self.end
    }

    /// DICOM range matching value, e.g. `20020101-20091231` or `20160101-`.
    pub fn query_value(&self) -> Option<String> {
        match (self.start, self.end) {
            (None, None) => None,
            (start, end) => Some(format!(
                "{}-{}",
                start.map(|d| d.to_string()).unwrap_or_default(),
                end.map(|d| d.to_string()).unwrap_or_default()
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Study {
    pub uid: StudyUid,
    pub accession_number: Option<String>,
    pub patient_id: Option<String>,
    pub description: Option<String>,
    pub study_date: Option<String>,
    pub modalities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub uid: SeriesUid,
    pub modality: Option<String>,
    pub description: Option<String>,
    pub number: Option<String>,
    pub instances: Vec<InstanceUid>,
}
