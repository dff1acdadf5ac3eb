//! Folder naming for series directories.

/// Appended to a name until it no longer collides with a sibling.
pub const COLLISION_MARKER: char = '+';

/// Used when a series has no usable description or its folder cannot be renamed.
pub const PLACEHOLDER_NAME: &str = "UnknownProtocol";

/// Sibling folder that receives excluded series.
pub const OTHERS_DIR: &str = "others";

/// Lower-cases a series description and strips path-unsafe characters.
///
/// `/`, `\` and `:` become `-`; `?` and `*` are dropped. Returns `None`
/// when nothing usable is left (empty, or only dots).
pub fn sanitize_series_name(raw: &str) -> Option<String> {
    let name = safe_component(&raw.to_lowercase());
    if name.trim_matches('.').is_empty() {
        return None;
    }
    Some(name)
}

/// Same character rules as [`sanitize_series_name`] but keeps the case.
/// Used for accession numbers and MRNs, which become folder names verbatim.
pub fn safe_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        match ch {
            '/' | '\\' | ':' => out.push('-'),
            '?' | '*' => {}
            ch if ch.is_control() => {}
            ch => out.push(ch),
        }
    }
    out.trim().to_string()
}

/// Appends [`COLLISION_MARKER`] to `base` until `taken` reports the candidate free.
///
/// Terminates for any `taken` that rejects finitely many names.
pub fn unique_name<F>(base: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut candidate = base.to_string();
    while taken(&candidate) {
        candidate.push(COLLISION_MARKER);
    }
    candidate
}

/// First exclude term contained in `name`. Matching is case-sensitive.
pub fn matching_exclude<'a>(name: &str, exclude_terms: &'a [String]) -> Option<&'a str> {
    exclude_terms
        .iter()
        .map(String::as_str)
        .find(|term| !term.is_empty() && name.contains(term))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn sanitizer_strips_unsafe_characters() {
        let name = sanitize_series_name("T1/T2 AX: Post? *Gd\\").unwrap();
        assert_eq!(name, "t1-t2 ax- post gd-");
        for ch in ['/', '\\', ':', '?', '*'] {
            assert!(!name.contains(ch));
        }
    }

    #[test]
    fn sanitizer_rejects_empty_and_dot_names() {
        assert_eq!(sanitize_series_name("  "), None);
        assert_eq!(sanitize_series_name("?*"), None);
        assert_eq!(sanitize_series_name(".."), None);
    }

    #[test]
    fn unique_names_are_distinct() {
        let mut taken = BTreeSet::new();
        for _ in 0..5 {
            let name = unique_name("localizer", |candidate| taken.contains(candidate));
            assert!(taken.insert(name));
        }
        assert!(taken.contains("localizer++++"));
    }

    #[test]
    fn exclusion_is_case_sensitive() {
        let terms = vec!["sub".to_string(), "COR".to_string()];
        assert_eq!(matching_exclude("t1 sub 3d", &terms), Some("sub"));
        assert_eq!(matching_exclude("t2 cor", &terms), None);
    }
}
