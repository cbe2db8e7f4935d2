//! Tag canonicalization rules shared by the reducer, the merge algorithm,
//! and the sync payloads. A tag vector in `PersistedState` is always in
//! canonical form: lowercase, deduplicated, sorted.

use thiserror::Error;

pub const MAX_TAGS_PER_TRACK: usize = 32;
pub const MAX_TAG_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag is empty after trimming")]
    Empty,
    #[error("tag exceeds {MAX_TAG_LEN} characters")]
    TooLong,
    #[error("tag contains characters outside alphanumeric/space/hyphen")]
    InvalidCharacters,
    #[error("track already has {MAX_TAGS_PER_TRACK} tags")]
    TooManyTags,
}

/// Validates a single raw tag and returns its case-folded form.
pub fn validate_tag(raw: &str) -> Result<String, TagError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TagError::Empty);
    }
    if trimmed.chars().count() > MAX_TAG_LEN {
        return Err(TagError::TooLong);
    }
    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '-')
    {
        return Err(TagError::InvalidCharacters);
    }
    Ok(trimmed.to_lowercase())
}

/// Lowercases, trims, drops invalid entries, dedupes, and sorts. Idempotent:
/// canonicalizing canonical input returns it unchanged.
pub fn canonicalize<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .filter_map(|t| validate_tag(t.as_ref()).ok())
        .collect();
    out.sort();
    out.dedup();
    out.truncate(MAX_TAGS_PER_TRACK);
    out
}

/// Set union of two canonical tag vectors, in canonical form.
pub fn union(local: &[String], remote: &[String]) -> Vec<String> {
    canonicalize(local.iter().chain(remote.iter()))
}
