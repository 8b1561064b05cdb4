//! Upload coordination
//!
//! Sends a media blob to the generic upload endpoint and normalizes the
//! response into a classified storage reference. Raw upload responses are
//! never allowed past this point: everything downstream works with the
//! normalized reference.

use std::sync::Arc;

use crate::backend::StorageBackend;
use crate::media::MediaBlob;

use super::{StorageError, StorageReference, extract};

/// Coordinates multipart uploads against the generic storage endpoint.
pub struct UploadCoordinator {
    backend: Arc<dyn StorageBackend>,
    endpoint: String,
}

impl UploadCoordinator {
    pub fn new(backend: Arc<dyn StorageBackend>, endpoint: impl Into<String>) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
        }
    }

    /// Upload a blob, consuming it, and return the normalized reference.
    ///
    /// The blob is gone after this call regardless of outcome; an upload is
    /// never retried with a stale payload.
    ///
    /// # Errors
    ///
    /// - `StorageError::UploadFailed` - Transport failure, or the response
    ///   carried no reference string in any known location
    pub async fn upload(&self, blob: MediaBlob) -> Result<StorageReference, StorageError> {
        let file_name = blob.file_name().to_string();
        let mime = blob.mime().to_string();
        let size = blob.len();

        tracing::info!("uploading {file_name} ({size} bytes) to {}", self.endpoint);

        let response = self
            .backend
            .post_multipart(&self.endpoint, &file_name, &mime, blob.into_bytes())
            .await
            .map_err(|e| StorageError::UploadFailed { reason: e.to_string() })?;

        let raw = extract::reference_string(&response).ok_or_else(|| StorageError::UploadFailed {
            reason: "no reference in response".to_string(),
        })?;

        let reference =
            StorageReference::classify(&raw).ok_or_else(|| StorageError::UploadFailed {
                reason: "no reference in response".to_string(),
            })?;

        tracing::debug!(
            "upload normalized to {} reference: {reference}",
            if reference.is_url() { "url" } else { "key" }
        );

        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sim::ScriptedBackend;

    fn coordinator(backend: ScriptedBackend) -> UploadCoordinator {
        UploadCoordinator::new(Arc::new(backend), "s3/upload")
    }

    #[tokio::test]
    async fn upload_normalizes_nested_key() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "data": { "key": "uploads/a.mp4" } }));

        let blob = MediaBlob::new(vec![1u8; 16], "video/mp4", "a.mp4");
        let reference = coordinator(backend).upload(blob).await.unwrap();

        assert_eq!(reference, StorageReference::Key("uploads/a.mp4".to_string()));
    }

    #[tokio::test]
    async fn upload_prefers_direct_url() {
        let backend = ScriptedBackend::new();
        backend.script_json(
            "s3/upload",
            json!({ "key": "uploads/a.mp4", "url": "https://cdn/a.mp4" }),
        );

        let blob = MediaBlob::new(vec![1u8; 16], "video/mp4", "a.mp4");
        let reference = coordinator(backend).upload(blob).await.unwrap();

        assert!(reference.is_url());
    }

    #[tokio::test]
    async fn upload_without_reference_fails() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "status": 200 }));

        let blob = MediaBlob::new(vec![1u8; 16], "video/mp4", "a.mp4");
        let err = coordinator(backend).upload(blob).await.unwrap_err();

        match err {
            StorageError::UploadFailed { reason } => {
                assert_eq!(reason, "no reference in response");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
