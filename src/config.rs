use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{DateRange, Modality, SearchKind, split_terms};
use crate::error::RetrieverError;

pub const CONFIG_FILE_NAME: &str = "vna-retriever.json";
pub const DEFAULT_REGION: &str = "prod";
pub const DEFAULT_REPORT_URL: &str = "http://montage.ynhh.org";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub regions: BTreeMap<String, RegionEntry>,
    #[serde(default)]
    pub default_region: Option<String>,
    #[serde(default)]
    pub report_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub delete_timeout_secs: Option<u64>,
    #[serde(default)]
    pub anonymize: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RegionEntry {
    Shorthand(String),
    Detailed(RegionEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegionEntryObject {
    pub archive_url: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub regions: BTreeMap<String, String>,
    pub default_region: String,
    pub report_url: String,
    pub timeout: Duration,
    pub delete_timeout: Duration,
    pub anonymize: bool,
}

impl ResolvedConfig {
    pub fn archive_url(&self, region: Option<&str>) -> Result<&str, RetrieverError> {
        let region = region.unwrap_or(self.default_region.as_str());
        self.regions
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| RetrieverError::UnknownRegion(region.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./vna-retriever.json`, then the user config dir, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, RetrieverError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        tracing::debug!(path = %config_path.display(), "loading config");
        let content = fs::read_to_string(&config_path)
            .map_err(|_| RetrieverError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RetrieverError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "vna-retriever", "vna-retriever")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RetrieverError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let mut regions = default_regions();
        for (name, entry) in config.regions {
            let url = match entry {
                RegionEntry::Shorthand(url) => url,
                RegionEntry::Detailed(obj) => obj.archive_url,
            };
            regions.insert(name, url.trim_end_matches('/').to_string());
        }

        let default_region = config
            .default_region
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        if !regions.contains_key(&default_region) {
            return Err(RetrieverError::UnknownRegion(default_region));
        }

        Ok(ResolvedConfig {
            schema_version,
            regions,
            default_region,
            report_url: config
                .report_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_REPORT_URL.to_string()),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            delete_timeout: Duration::from_secs(
                config
                    .delete_timeout_secs
                    .unwrap_or(DEFAULT_DELETE_TIMEOUT_SECS),
            ),
            anonymize: config.anonymize.unwrap_or(true),
        })
    }
}

pub fn default_regions() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("prod".to_string(), "http://10.47.11.221:8083".to_string()),
        ("test".to_string(), "http://vnatest1vt:8083".to_string()),
    ])
}

/// Basic-auth credentials shared by the archive and report clients.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything one retrieval run needs; built once and passed by reference.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub search_kind: SearchKind,
    pub terms: Vec<String>,
    pub save_dir: Utf8PathBuf,
    pub exclude_terms: Vec<String>,
    pub modality: Option<Modality>,
    pub dates: DateRange,
    pub limit: Option<usize>,
    pub overwrite: bool,
    pub review: bool,
    pub anonymize: bool,
    pub metadata_only: bool,
    pub delete_timeout: Duration,
}

impl RunOptions {
    pub fn new(search_kind: SearchKind, terms: Vec<String>, save_dir: Utf8PathBuf) -> Self {
        Self {
            search_kind,
            terms,
            save_dir,
            exclude_terms: Vec::new(),
            modality: None,
            dates: DateRange::default(),
            limit: None,
            overwrite: false,
            review: false,
            anonymize: true,
            metadata_only: false,
            delete_timeout: Duration::from_secs(DEFAULT_DELETE_TIMEOUT_SECS),
        }
    }
}

/// Query terms from a text file.
///
/// Keyword searches take one term per non-empty line (the words of a line must
/// all match); other kinds split on line breaks, spaces and commas.
pub fn read_terms_file(path: &Path, kind: SearchKind) -> Result<Vec<String>, RetrieverError> {
    let content = fs::read_to_string(path)
        .map_err(|err| RetrieverError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(parse_terms(&content, kind))
}

pub fn parse_terms(content: &str, kind: SearchKind) -> Vec<String> {
    match kind {
        SearchKind::Keyword => content
            .lines()
            .map(|line| line.replace(',', " ").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        SearchKind::Accnum | SearchKind::Mrn => split_terms(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_shorthand_and_detailed() {
        let config: Config = serde_json::from_str(
            r#"{
                "regions": {
                    "lab": "http://lab-vna:8083/",
                    "dr": { "archive_url": "http://dr-vna:8083" }
                },
                "default_region": "lab"
            }"#,
        )
        .unwrap();

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.archive_url(None).unwrap(), "http://lab-vna:8083");
        assert_eq!(resolved.archive_url(Some("dr")).unwrap(), "http://dr-vna:8083");
        assert!(resolved.regions.contains_key("prod"));
        assert!(resolved.anonymize);
    }

    #[test]
    fn keyword_terms_are_per_line() {
        let terms = parse_terms("contrast mri abdom\n\nliver, ct\n", SearchKind::Keyword);
        assert_eq!(terms, vec!["contrast mri abdom", "liver  ct"]);
    }
}
