//! Delimited key paths.

use crate::error::{ConfigError, Result};

/// Delimiter between key path segments in the store.
pub const KEY_DELIMITER: &str = "/";

/// Append `segment` to `prefix`, leaving out the delimiter when the prefix is empty.
pub fn join(prefix: &str, segment: &str, delimiter: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else if segment.is_empty() {
        prefix.to_string()
    } else {
        format!("{}{}{}", prefix.trim_end_matches(delimiter), delimiter, segment)
    }
}

/// Join any number of segments with the store delimiter, skipping empty ones.
pub fn join_all<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .fold(String::new(), |acc, segment| join(&acc, segment, KEY_DELIMITER))
}

/// Strip `prefix` from `key` and split the remainder into segments.
///
/// Returns `None` when `key` is not at or below `prefix`.
pub fn relative_segments<'a>(prefix: &str, key: &'a str, delimiter: &str) -> Option<Vec<&'a str>> {
    let prefix = prefix.trim_end_matches(delimiter);
    let rest = if prefix.is_empty() {
        key
    } else {
        let rest = key.strip_prefix(prefix)?;
        if rest.is_empty() {
            rest
        } else {
            rest.strip_prefix(delimiter)?
        }
    };

    Some(
        rest.split(delimiter)
            .filter(|segment| !segment.is_empty())
            .collect(),
    )
}

/// Check that a field name can be used as a single path segment.
pub(crate) fn validate_segment(segment: &str, delimiter: &str) -> Result<()> {
    if segment.contains(delimiter) {
        return Err(ConfigError::InvalidKey {
            key: segment.to_string(),
            reason: format!("segment contains the key delimiter '{}'", delimiter),
        });
    }
    Ok(())
}
