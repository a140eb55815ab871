//! Column header normalization.

use std::collections::HashSet;

use crate::error::{CsvServiceError, Result};

/// Normalizes a raw header into a canonical column identifier.
///
/// Lowercases, drops every character that is not alphanumeric, `_` or
/// whitespace, trims, and joins the remaining words with a single `_`.
/// `"  Unit Price ($) "` becomes `"unit_price"`.
pub fn normalize_header(raw: &str) -> String {
    let kept: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Normalizes every header, preserving order and length.
pub fn normalize_headers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|h| normalize_header(h.as_ref())).collect()
}

/// Rejects header lists in which two columns share an identifier.
pub fn ensure_unique(headers: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(headers.len());
    for header in headers {
        if !seen.insert(header.as_str()) {
            return Err(CsvServiceError::ParseFailure {
                message: format!("duplicate column '{}' after header normalization", header),
            });
        }
    }
    Ok(())
}
