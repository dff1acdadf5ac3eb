use vna_retriever::naming::{
    OTHERS_DIR, PLACEHOLDER_NAME, matching_exclude, safe_component, sanitize_series_name,
    unique_name,
};

#[test]
fn sanitized_names_are_lowercase_and_path_safe() {
    let name = sanitize_series_name("  AX T1/FS: POST? *SUB\\2  ").unwrap();
    assert_eq!(name, "ax t1-fs- post sub-2");
    assert_eq!(name, name.to_lowercase());
}

#[test]
fn folder_components_keep_case() {
    assert_eq!(safe_component(" E123/45 "), "E123-45");
    assert_eq!(safe_component("MR*0001?"), "MR0001");
}

#[test]
fn placeholder_collides_like_any_name() {
    let existing = [PLACEHOLDER_NAME, "UnknownProtocol+", OTHERS_DIR];
    let name = unique_name(PLACEHOLDER_NAME, |candidate| existing.contains(&candidate));
    assert_eq!(name, "UnknownProtocol++");
}

#[test]
fn exclusion_ignores_empty_terms() {
    assert_eq!(matching_exclude("anything", &[String::new()]), None);
    let terms = vec!["sub".to_string()];
    assert_eq!(matching_exclude("sub-cor", &terms), Some("sub"));
}
