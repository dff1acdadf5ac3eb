use roxmltree::{Document, Node, ParsingOptions};
use serde::Serialize;

use crate::error::RetrieverError;

pub const SERIES_DESCRIPTION: (&str, &str) = ("0008103E", "SeriesDescription");
pub const SERIES_NUMBER: (&str, &str) = ("00200011", "SeriesNumber");
pub const MODALITY: (&str, &str) = ("00080060", "Modality");

/// Fields read from a series metadata document (DICOM Native XML model).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeriesMetadata {
    pub description: Option<String>,
    pub series_number: Option<String>,
    pub modality: Option<String>,
}

pub fn parse_series_metadata(xml: &str) -> Result<SeriesMetadata, RetrieverError> {
    let document = parse_document(xml)?;
    Ok(SeriesMetadata {
        description: attribute_value(&document, SERIES_DESCRIPTION),
        series_number: attribute_value(&document, SERIES_NUMBER),
        modality: attribute_value(&document, MODALITY),
    })
}

fn parse_document(body: &str) -> Result<Document<'_>, RetrieverError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(first_native_model(body), options)
        .map_err(|err| RetrieverError::MetadataParse(err.to_string()))
}

/// First `<NativeDicomModel>` element of the body.
///
/// Multipart responses carry MIME boundaries and one model per instance;
/// bodies without a complete element are returned unchanged.
fn first_native_model(body: &str) -> &str {
    const OPEN: &str = "<NativeDicomModel";
    const CLOSE: &str = "</NativeDicomModel>";
    let body = body.trim_start_matches('\u{feff}');
    let Some(start) = body.find(OPEN) else {
        return body;
    };
    if body[start..].starts_with(&format!("{OPEN}/")) {
        return body;
    }
    match body[start..].find(CLOSE) {
        Some(end) => &body[start..start + end + CLOSE.len()],
        None => body,
    }
}

/// Text of the first `Value` of the `DicomAttribute` identified by `(tag, keyword)`.
///
/// Top-level attributes win over attributes nested in sequence items.
pub fn attribute_value(document: &Document<'_>, (tag, keyword): (&str, &str)) -> Option<String> {
    let matches = |node: &Node<'_, '_>| {
        node.is_element()
            && node.tag_name().name() == "DicomAttribute"
            && (node
                .attribute("tag")
                .map(|value| value.eq_ignore_ascii_case(tag))
                .unwrap_or(false)
                || node.attribute("keyword") == Some(keyword))
    };

    let top_level = document.descendants().find(|node| {
        matches(node)
            && node
                .parent_element()
                .map(|parent| parent.tag_name().name() == "NativeDicomModel")
                .unwrap_or(false)
    });
    let attribute = top_level.or_else(|| document.descendants().find(|node| matches(node)))?;

    let values = attribute
        .children()
        .filter(|child| child.is_element() && child.tag_name().name() == "Value");
    let value = values
        .clone()
        .find(|child| child.attribute("number") == Some("1"))
        .or_else(|| values.clone().next())?;

    let text = value.text()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}
