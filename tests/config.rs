use std::time::Duration;

use assert_matches::assert_matches;

use vna_retriever::config::{
    Config, ConfigLoader, Credentials, DEFAULT_REPORT_URL, RegionEntry, parse_terms,
    read_terms_file,
};
use vna_retriever::domain::SearchKind;
use vna_retriever::error::RetrieverError;

#[test]
fn defaults_without_config_file() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved.default_region, "prod");
    assert_eq!(resolved.archive_url(None).unwrap(), "http://10.47.11.221:8083");
    assert_eq!(resolved.archive_url(Some("test")).unwrap(), "http://vnatest1vt:8083");
    assert_eq!(resolved.report_url, DEFAULT_REPORT_URL);
    assert_eq!(resolved.timeout, Duration::from_secs(60));
    assert_eq!(resolved.delete_timeout, Duration::from_secs(10));
    assert!(resolved.anonymize);
}

#[test]
fn unknown_region_is_rejected() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_matches!(
        resolved.archive_url(Some("staging")),
        Err(RetrieverError::UnknownRegion(name)) if name == "staging"
    );

    let config = Config {
        default_region: Some("staging".to_string()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(RetrieverError::UnknownRegion(_))
    );
}

#[test]
fn config_file_overrides() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("vna-retriever.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "regions": { "prod": "http://vna-prod:9000/" },
            "report_url": "http://reports.local/",
            "timeout_secs": 5,
            "delete_timeout_secs": 2,
            "anonymize": false
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.archive_url(None).unwrap(), "http://vna-prod:9000");
    assert_eq!(resolved.report_url, "http://reports.local");
    assert_eq!(resolved.timeout, Duration::from_secs(5));
    assert_eq!(resolved.delete_timeout, Duration::from_secs(2));
    assert!(!resolved.anonymize);
}

#[test]
fn broken_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(RetrieverError::ConfigParse(_))
    );

    let missing = temp.path().join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(RetrieverError::ConfigRead(_))
    );
}

#[test]
fn region_entry_forms() {
    let entry: RegionEntry = serde_json::from_str(r#""http://a:1""#).unwrap();
    assert_matches!(entry, RegionEntry::Shorthand(url) if url == "http://a:1");
    let entry: RegionEntry = serde_json::from_str(r#"{"archive_url": "http://b:2"}"#).unwrap();
    assert_matches!(entry, RegionEntry::Detailed(obj) if obj.archive_url == "http://b:2");
}

#[test]
fn terms_file_splits_on_separators() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("accnums.txt");
    std::fs::write(&path, "E123456789, E012345678\nE111\r\n\n E222 ").unwrap();
    let terms = read_terms_file(&path, SearchKind::Accnum).unwrap();
    assert_eq!(terms, vec!["E123456789", "E012345678", "E111", "E222"]);

    assert_eq!(
        parse_terms("contrast mri abdom", SearchKind::Keyword),
        vec!["contrast mri abdom"]
    );
}

#[test]
fn credentials_debug_hides_password() {
    let credentials = Credentials::new("jdoe", "hunter2");
    let debug = format!("{credentials:?}");
    assert!(debug.contains("jdoe"));
    assert!(!debug.contains("hunter2"));
    assert_eq!(credentials.password(), "hunter2");
}
