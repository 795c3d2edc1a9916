//! Download filename derivation.

use crate::format::OutputFormat;

const FALLBACK_BASE: &str = "image";

/// Filename offered to the client for the converted image.
///
/// Takes the uploaded name, keeps only its last path component, strips the
/// extension, and appends the output format's extension. Quotes and control
/// characters are replaced so the result can sit inside a quoted
/// `content-disposition` parameter.
pub fn suggested_filename(original: Option<&str>, format: OutputFormat) -> String {
    format!("{}{}", base_name(original.unwrap_or("")), format.extension())
}

fn base_name(original: &str) -> String {
    let component = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let stem = match component.rfind('.') {
        Some(i) if i > 0 => &component[..i],
        _ => component,
    };

    let sanitized: String = stem
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();

    if sanitized.trim_matches(['.', ' ']).is_empty() {
        FALLBACK_BASE.to_owned()
    } else {
        sanitized
    }
}
