//! Object-storage layer: upload normalization and playback resolution.
//!
//! Covers the two storage-facing halves of the pipeline: pushing a binary
//! up through the generic upload endpoint (and normalizing whatever shape
//! the response takes into a classified `StorageReference`), and later
//! turning a bare storage key back into something playable via an ordered
//! fallback search over URL-style and stream-style endpoints.

pub mod extract;
pub mod handle;
pub mod reference;
pub mod resolver;
pub mod upload;

pub use handle::{HandleRegistry, LocalHandle};
pub use reference::{StorageReference, is_http_url};
pub use resolver::{CancelFlag, PlaybackResolver, ResolveState, ResolvedPlayback};
pub use upload::UploadCoordinator;

use crate::backend::BackendError;

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Upload call failed or its response carried no reference string
    #[error("Upload failed: {reason}")]
    UploadFailed {
        /// Description of what went wrong
        reason: String,
    },

    /// Every resolution candidate was exhausted without a playable result
    #[error("No playback URL could be resolved")]
    Unresolvable,

    /// The caller abandoned interest mid-resolution
    #[error("Resolution cancelled")]
    Cancelled,

    /// Transport-level failure outside the probe loop
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
