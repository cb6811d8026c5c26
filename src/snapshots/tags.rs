//! Tag normalization.

use crate::error::{Result, SnapshotError};

/// Longest accepted tag, in characters.
pub const MAX_TAG_LEN: usize = 64;

/// Normalize a tag list: trim, lowercase, drop duplicates (first wins).
///
/// Empty, overlong, or control-character tags are rejected.
pub fn normalize_tags<I, S>(tags: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();

    for raw in tags {
        let tag = raw.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            return Err(SnapshotError::validation("tags must not be empty"));
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(SnapshotError::validation(format!(
                "tag '{}' is longer than {} characters",
                tag, MAX_TAG_LEN
            )));
        }
        if tag.chars().any(char::is_control) {
            return Err(SnapshotError::validation(format!(
                "tag {:?} contains control characters",
                tag
            )));
        }
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }

    Ok(normalized)
}

/// Normalize tags used as a list filter. Blank entries are ignored.
pub fn normalize_filter(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}
