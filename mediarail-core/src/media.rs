//! Media blob type and file-name classification
//!
//! A `MediaBlob` is the raw binary moving through the ingestion pipeline.
//! It is owned exclusively by whichever stage is currently processing it and
//! is consumed by the stage that sends it over the wire.

use std::path::Path;

use bytes::Bytes;

/// File extensions accepted as playable media in catalog listings.
///
/// Entries whose name/URL/key does not end in one of these are dropped from
/// the view (not deleted server-side).
pub const MEDIA_EXTENSIONS: [&str; 7] = ["mp4", "mov", "m4v", "webm", "ogg", "avi", "mkv"];

/// Raw binary media payload plus declared MIME type.
///
/// Ephemeral by design: pipeline stages take it by value and it is never
/// retained after the step that consumes it completes.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    bytes: Bytes,
    mime: String,
    file_name: String,
}

impl MediaBlob {
    /// Create a blob from in-memory bytes with a declared MIME type.
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
            file_name: file_name.into(),
        }
    }

    /// Read a blob from disk, guessing the MIME type from the extension.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - File cannot be read
    pub async fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        Ok(Self::new(bytes, mime.essence_str(), file_name))
    }

    /// Byte length of the payload.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Declared MIME type, e.g. `video/mp4`.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Original file name as selected by the user.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the declared MIME type is any video format.
    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    /// Borrow the raw payload.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consume the blob, yielding the payload.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Whether a file name, URL or storage key names a playable media file.
///
/// Query strings are ignored; comparison is case-insensitive.
pub fn is_media_file_name(value: &str) -> bool {
    let without_query = value.split('?').next().unwrap_or("");
    let lowered = without_query.to_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .any(|ext| lowered.ends_with(&format!(".{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_length_and_mime() {
        let blob = MediaBlob::new(vec![0u8; 64], "video/mp4", "clip.mp4");
        assert_eq!(blob.len(), 64);
        assert!(blob.is_video());
        assert_eq!(blob.file_name(), "clip.mp4");
    }

    #[test]
    fn non_video_mime_rejected() {
        let blob = MediaBlob::new(vec![0u8; 8], "image/png", "pic.png");
        assert!(!blob.is_video());
    }

    #[test]
    fn media_file_name_allowlist() {
        assert!(is_media_file_name("intro.mp4"));
        assert!(is_media_file_name("session.MOV"));
        assert!(is_media_file_name("https://cdn/x/clip.webm?sig=abc"));
        assert!(is_media_file_name("uploads/2024/lesson.mkv"));

        assert!(!is_media_file_name("notes.txt"));
        assert!(!is_media_file_name("thumb.png"));
        assert!(!is_media_file_name("mp4")); // no extension separator
    }
}
