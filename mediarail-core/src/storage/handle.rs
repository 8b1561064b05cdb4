//! Local playable handles
//!
//! When no endpoint yields a direct URL but one streams raw bytes, the
//! resolver hands the caller a process-local, revocable handle that a UI can
//! treat as a URL. Handles are owned by the view that requested resolution:
//! exactly one release per handle, on view close or replacement. Dropping an
//! unreleased handle releases it as a last resort and logs the leak.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

/// URL scheme for local handles.
const HANDLE_SCHEME: &str = "mediarail://handle/";

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<Uuid, Bytes>>,
}

/// Registry of live local handles.
///
/// Cheap to clone; all clones share one entry table.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<RegistryInner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binary body and mint a handle for it.
    pub fn register(&self, body: Bytes) -> LocalHandle {
        let id = Uuid::new_v4();
        self.inner.entries.lock().insert(id, body);
        tracing::debug!("registered local handle {id}");

        LocalHandle {
            id,
            registry: Arc::clone(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    /// Look up the body behind a handle URL, if the handle is still live.
    pub fn fetch(&self, url: &str) -> Option<Bytes> {
        let id = url.strip_prefix(HANDLE_SCHEME)?.parse().ok()?;
        self.inner.entries.lock().get(&id).cloned()
    }

    /// Number of live handles. Sessions should not see this grow unbounded.
    pub fn live_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

/// A revocable reference to in-memory binary data, exposed as a URL.
///
/// Not cloneable: release responsibility belongs to exactly one owner.
pub struct LocalHandle {
    id: Uuid,
    registry: Arc<RegistryInner>,
    released: AtomicBool,
}

impl LocalHandle {
    /// The URL a player can use while the handle is live.
    pub fn url(&self) -> String {
        format!("{HANDLE_SCHEME}{}", self.id)
    }

    /// Revoke the handle, freeing the buffered body.
    ///
    /// Idempotent at the call site but the underlying entry is removed
    /// exactly once; a second call is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.entries.lock().remove(&self.id);
        tracing::debug!("released local handle {}", self.id);
    }

    /// Whether the handle has already been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            tracing::warn!("local handle {} dropped without release", self.id);
            self.release();
        }
    }
}

impl std::fmt::Debug for LocalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_fetch_release() {
        let registry = HandleRegistry::new();
        let handle = registry.register(Bytes::from_static(b"mp4 payload"));

        let url = handle.url();
        assert!(url.starts_with(HANDLE_SCHEME));
        assert_eq!(registry.fetch(&url).unwrap(), Bytes::from_static(b"mp4 payload"));
        assert_eq!(registry.live_count(), 1);

        handle.release();
        assert!(registry.fetch(&url).is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn release_is_exactly_once() {
        let registry = HandleRegistry::new();
        let first = registry.register(Bytes::from_static(b"a"));
        let second = registry.register(Bytes::from_static(b"b"));

        first.release();
        first.release(); // second call must not disturb other entries
        assert_eq!(registry.live_count(), 1);
        assert!(registry.fetch(&second.url()).is_some());
        second.release();
    }

    #[test]
    fn drop_releases_as_last_resort() {
        let registry = HandleRegistry::new();
        {
            let _handle = registry.register(Bytes::from_static(b"leaky"));
        }
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn fetch_rejects_foreign_urls() {
        let registry = HandleRegistry::new();
        assert!(registry.fetch("https://cdn/x.mp4").is_none());
        assert!(registry.fetch("mediarail://handle/not-a-uuid").is_none());
    }
}
