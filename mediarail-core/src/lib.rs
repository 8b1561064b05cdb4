//! Mediarail Core - Media asset ingestion and playback resolution
//!
//! This crate provides the building blocks for getting large video files
//! from a constrained client into opaque object storage and back out again:
//! size gating, one-shot compression, multipart upload with response
//! normalization, catalog synchronization, and ordered fallback resolution
//! of playback URLs from storage references.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod ingest;
pub mod media;
#[cfg(any(test, feature = "test-utils"))]
pub mod sim;
pub mod storage;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use backend::{HttpBackend, StorageBackend};
pub use catalog::{AssetRecord, CatalogClient, CatalogError};
pub use config::MediarailConfig;
pub use ingest::{IngestError, IngestService, IngestStage};
pub use media::MediaBlob;
pub use storage::{PlaybackResolver, StorageError, StorageReference, UploadCoordinator};

/// Core errors that can bubble up from any Mediarail subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MediarailError {
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediarailError {
    /// Returns a user-friendly error message suitable for display.
    ///
    /// Each pipeline stage maps to exactly one user-facing message; none of
    /// them suggest a retry because the pipeline never retries on its own.
    pub fn user_message(&self) -> String {
        match self {
            MediarailError::Ingest(e) => match e {
                IngestError::Selection { .. } => "Please select a video file".to_string(),
                IngestError::EngineUnavailable { .. } => {
                    "Failed to load the video compression component".to_string()
                }
                IngestError::CompressionFailed { .. } => "Video compression failed".to_string(),
                IngestError::StillTooLarge { .. } => {
                    "File is still too large after compression. Please choose a smaller video."
                        .to_string()
                }
                IngestError::Cancelled => "Operation cancelled".to_string(),
            },
            MediarailError::Storage(e) => match e {
                StorageError::UploadFailed { .. } => {
                    "Failed to upload video. Please try again.".to_string()
                }
                StorageError::Unresolvable => "Video URL not available for preview".to_string(),
                _ => "Storage error occurred".to_string(),
            },
            MediarailError::Catalog(CatalogError::NotFound { id }) => {
                format!("Video '{id}' was not found")
            }
            MediarailError::Catalog(_) => "Failed to save video. Please try again.".to_string(),
            MediarailError::Configuration { reason } => {
                format!("Configuration error: {reason}")
            }
            MediarailError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input rather than system failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MediarailError::Ingest(IngestError::Selection { .. })
                | MediarailError::Ingest(IngestError::StillTooLarge { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, MediarailError>;
