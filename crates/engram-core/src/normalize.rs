//! Value normalization applied to every write before it reaches the store.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{ValidationError, MAX_CONTENT_CHARS};

/// Trim and lowercase a category token; empty input falls back to `general`.
#[must_use]
pub fn normalize_category(category: Option<&str>) -> String {
    let trimmed = category.unwrap_or_default().trim();
    if trimmed.is_empty() {
        "general".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Trim each tag, drop blanks, and deduplicate preserving first occurrence.
#[must_use]
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !seen.iter().any(|t: &String| t == trimmed) {
            seen.push(trimmed.to_string());
        }
    }
    seen
}

/// Trim content, rejecting empty and over-long values.
///
/// # Errors
/// Returns [`ValidationError::EmptyContent`] when nothing remains after
/// trimming, [`ValidationError::ContentTooLong`] past [`MAX_CONTENT_CHARS`].
pub fn normalize_content(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let chars = trimmed.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong(chars));
    }
    Ok(trimmed.to_string())
}

/// Fresh memory identity: a version-4 UUID in textual form.
#[must_use]
pub fn new_memory_id() -> String {
    Uuid::new_v4().to_string()
}

/// Stable SHA-256 hex digest of trimmed content, used for create-time dedup
/// and export bundle verification.
#[must_use]
pub fn content_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}
