//! Email matching policy shared by every lookup in the portal core.
//!
//! Emails match case-insensitively. New records are written with the
//! normalized form, but records written before normalization was enforced
//! keep their original casing, so lookups try the normalized form first and
//! fall back to the caller-supplied form.

use crate::error::Result;
use std::future::Future;

/// Canonical form used for new writes and first-choice lookups.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Keys to try, in order: normalized form, then the raw form if it differs.
pub fn lookup_keys(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let normalized = normalize_email(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    if normalized == trimmed {
        vec![normalized]
    } else {
        vec![normalized, trimmed.to_string()]
    }
}

/// Runs `fetch` for each lookup key and returns the first non-empty result.
pub async fn find_by_email<T, F, Fut>(raw: &str, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    for key in lookup_keys(raw) {
        let found = fetch(key).await?;
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}
