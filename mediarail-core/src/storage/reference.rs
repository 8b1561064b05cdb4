//! Storage reference classification
//!
//! A storage reference is the string the backend hands back for an uploaded
//! binary: either a fully-qualified HTTP(S) URL or an opaque backend key.
//! Classification happens exactly once, at construction; downstream code
//! carries the classified value and never re-derives the classification
//! from a possibly mutated string.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static HTTP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("static regex must compile"));

/// A classified reference to an uploaded binary in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageReference {
    /// Fully-qualified HTTP(S) URL, directly playable
    Url(String),
    /// Opaque backend-specific key, needs resolution before playback
    Key(String),
}

impl StorageReference {
    /// Classify a raw reference string.
    ///
    /// Backticks and surrounding whitespace are scrubbed first; some
    /// backends wrap reference strings in markdown-style quoting. Returns
    /// `None` for strings that are empty after scrubbing.
    pub fn classify(raw: &str) -> Option<Self> {
        let cleaned = raw.replace('`', "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return None;
        }

        if HTTP_PREFIX.is_match(cleaned) {
            Some(StorageReference::Url(cleaned.to_string()))
        } else {
            Some(StorageReference::Key(cleaned.to_string()))
        }
    }

    /// The underlying reference string.
    pub fn as_str(&self) -> &str {
        match self {
            StorageReference::Url(s) | StorageReference::Key(s) => s,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, StorageReference::Url(_))
    }

    /// Last path segment of the reference, without any query string.
    ///
    /// Used to derive a display file name from a key or URL.
    pub fn file_name(&self) -> &str {
        let without_query = self.as_str().split('?').next().unwrap_or("");
        without_query.rsplit('/').next().unwrap_or("")
    }
}

impl std::fmt::Display for StorageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a bare string looks like an HTTP(S) URL.
///
/// Used when probing resolution responses, where the string has not yet
/// been promoted to a `StorageReference`.
pub fn is_http_url(value: &str) -> bool {
    HTTP_PREFIX.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_classification() {
        let r = StorageReference::classify("https://cdn.example.com/v/clip.mp4").unwrap();
        assert!(r.is_url());
        assert_eq!(r.as_str(), "https://cdn.example.com/v/clip.mp4");

        let r = StorageReference::classify("HTTP://host/clip.mp4").unwrap();
        assert!(r.is_url());
    }

    #[test]
    fn key_classification() {
        let r = StorageReference::classify("uploads/2024/clip.mp4").unwrap();
        assert!(!r.is_url());
        assert_eq!(r.as_str(), "uploads/2024/clip.mp4");
    }

    #[test]
    fn scrubs_backticks_and_whitespace() {
        let r = StorageReference::classify(" `https://cdn/x.mp4` ").unwrap();
        assert_eq!(r, StorageReference::Url("https://cdn/x.mp4".to_string()));
    }

    #[test]
    fn empty_after_scrub_is_none() {
        assert!(StorageReference::classify("  ").is_none());
        assert!(StorageReference::classify("``").is_none());
    }

    #[test]
    fn file_name_extraction() {
        let r = StorageReference::classify("https://cdn/x/clip.mp4?sig=abc").unwrap();
        assert_eq!(r.file_name(), "clip.mp4");

        let r = StorageReference::classify("uploads/clip.mov").unwrap();
        assert_eq!(r.file_name(), "clip.mov");

        let r = StorageReference::classify("bare-key").unwrap();
        assert_eq!(r.file_name(), "bare-key");
    }
}
