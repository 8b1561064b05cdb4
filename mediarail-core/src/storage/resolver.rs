//! Playback URL resolution
//!
//! Turning an opaque storage key back into something playable is a search
//! problem: deployments differ in which resolution endpoints exist at all,
//! so the resolver walks a fixed, ordered list of URL-style endpoints and
//! then a fixed, ordered list of stream-style endpoints, short-circuiting on
//! the first success. The ordering is a correctness requirement, not an
//! optimization: earlier endpoints are preferred when a deployment exposes
//! several, and tests pin the exact visit order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::StorageBackend;

use super::handle::{HandleRegistry, LocalHandle};
use super::reference::{StorageReference, is_http_url};
use super::{StorageError, extract};

/// URL-style endpoints, queried as `<endpoint>?key=<encoded>`.
///
/// Each is expected to return JSON containing a URL field.
const URL_PROBES: [&str; 4] = ["s3/url", "s3/presign", "s3/get-url", "s3/signed-url"];

/// Stream-style endpoints queried as `<endpoint>?key=<encoded>`.
const STREAM_QUERY_PROBES: [&str; 4] = ["s3/get", "s3/download", "s3/view", "s3/file"];

/// Stream-style endpoints queried as `<endpoint>/<encoded>`.
const STREAM_PATH_PROBES: [&str; 5] = ["s3", "s3/file", "s3/download", "s3/view", "s3/get"];

/// States of one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    Idle,
    ProbingDirectUrls,
    ProbingStreamEndpoints,
    Resolved,
    Unresolvable,
}

/// Outcome of a successful resolution.
///
/// When playback goes through a local handle, the handle rides along and its
/// release is the caller's responsibility; a remote URL carries no handle.
#[derive(Debug)]
pub struct ResolvedPlayback {
    pub url: String,
    pub handle: Option<LocalHandle>,
}

/// Shared abandonment flag checked between suspension points.
///
/// In-flight calls are not aborted mid-request; the resolver simply stops
/// awaiting further probes once the flag is set.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves storage references to playable URLs via ordered fallback probes.
pub struct PlaybackResolver {
    backend: Arc<dyn StorageBackend>,
    registry: HandleRegistry,
}

impl PlaybackResolver {
    pub fn new(backend: Arc<dyn StorageBackend>, registry: HandleRegistry) -> Self {
        Self { backend, registry }
    }

    /// The handle registry this resolver mints local handles from.
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Resolve a reference to a playable URL.
    ///
    /// URL-classified references return immediately without any network
    /// calls. Keys walk the URL-style probes, then the stream-style probes,
    /// stopping at the first success.
    ///
    /// # Errors
    ///
    /// - `StorageError::Unresolvable` - Every candidate failed
    /// - `StorageError::Cancelled` - Caller abandoned interest; any handle
    ///   produced after abandonment has already been released
    pub async fn resolve(
        &self,
        reference: &StorageReference,
        cancel: &CancelFlag,
    ) -> Result<ResolvedPlayback, StorageError> {
        let mut state = ResolveState::Idle;

        let key = match reference {
            StorageReference::Url(url) => {
                tracing::debug!("reference already a URL, no probing needed");
                return Ok(ResolvedPlayback {
                    url: url.clone(),
                    handle: None,
                });
            }
            StorageReference::Key(key) => key,
        };

        let encoded = urlencoding::encode(key);

        state = Self::transition(state, ResolveState::ProbingDirectUrls);
        if let Some(url) = self.probe_url_endpoints(&encoded, Some(cancel)).await? {
            Self::transition(state, ResolveState::Resolved);
            return Ok(ResolvedPlayback { url, handle: None });
        }

        state = Self::transition(state, ResolveState::ProbingStreamEndpoints);
        for endpoint in Self::stream_endpoints(&encoded) {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            let body = match self.backend.get_bytes(&endpoint).await {
                Ok(body) if !body.is_empty() => body,
                Ok(_) => {
                    tracing::trace!("stream probe {endpoint} returned an empty body");
                    continue;
                }
                Err(e) => {
                    tracing::debug!("stream probe {endpoint} failed: {e}");
                    continue;
                }
            };

            let handle = self.registry.register(body);
            if cancel.is_cancelled() {
                // Abandoned while the call was in flight: the handle must
                // not outlive the view that asked for it.
                handle.release();
                return Err(StorageError::Cancelled);
            }

            Self::transition(state, ResolveState::Resolved);
            return Ok(ResolvedPlayback {
                url: handle.url(),
                handle: Some(handle),
            });
        }

        Self::transition(state, ResolveState::Unresolvable);
        Err(StorageError::Unresolvable)
    }

    /// Resolve a key to a direct HTTP URL using only the URL-style probes.
    ///
    /// Used before persisting a key-classified reference: a local handle
    /// must never be written into the catalog, so the stream-style probes
    /// are off limits here. Returns `Ok(None)` when no endpoint yields one.
    pub async fn resolve_http_url(
        &self,
        reference: &StorageReference,
    ) -> Result<Option<String>, StorageError> {
        match reference {
            StorageReference::Url(url) => Ok(Some(url.clone())),
            StorageReference::Key(key) => {
                let encoded = urlencoding::encode(key);
                self.probe_url_endpoints(&encoded, None).await
            }
        }
    }

    async fn probe_url_endpoints(
        &self,
        encoded_key: &str,
        cancel: Option<&CancelFlag>,
    ) -> Result<Option<String>, StorageError> {
        for probe in URL_PROBES {
            if let Some(cancel) = cancel
                && cancel.is_cancelled()
            {
                return Err(StorageError::Cancelled);
            }

            let endpoint = format!("{probe}?key={encoded_key}");
            let body = match self.backend.get_json(&endpoint).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!("url probe {endpoint} failed: {e}");
                    continue;
                }
            };

            match extract::url_string(&body) {
                Some(url) if is_http_url(&url) => {
                    tracing::debug!("url probe {endpoint} resolved playback URL");
                    return Ok(Some(url));
                }
                _ => {
                    tracing::trace!("url probe {endpoint} answered without a usable URL");
                }
            }
        }

        Ok(None)
    }

    /// Stream-style candidates in declared order: query-form, then path-form.
    fn stream_endpoints(encoded_key: &str) -> Vec<String> {
        STREAM_QUERY_PROBES
            .iter()
            .map(|probe| format!("{probe}?key={encoded_key}"))
            .chain(
                STREAM_PATH_PROBES
                    .iter()
                    .map(|probe| format!("{probe}/{encoded_key}")),
            )
            .collect()
    }

    fn transition(from: ResolveState, to: ResolveState) -> ResolveState {
        tracing::trace!("resolver: {from:?} -> {to:?}");
        to
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::sim::ScriptedBackend;

    fn resolver(backend: ScriptedBackend) -> PlaybackResolver {
        PlaybackResolver::new(Arc::new(backend), HandleRegistry::new())
    }

    fn key_ref(key: &str) -> StorageReference {
        StorageReference::Key(key.to_string())
    }

    #[tokio::test]
    async fn url_reference_short_circuits_without_calls() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let reference = StorageReference::Url("https://cdn/x.mp4".to_string());
        let resolved = resolver.resolve(&reference, &CancelFlag::new()).await.unwrap();

        assert_eq!(resolved.url, "https://cdn/x.mp4");
        assert!(resolved.handle.is_none());
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn third_url_probe_wins_after_two_misses() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/url?key=clip.mp4", json!({}));
        backend.script_json("s3/presign?key=clip.mp4", json!({ "url": "" }));
        backend.script_json("s3/get-url?key=clip.mp4", json!({ "url": "https://cdn/x.mp4" }));
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let resolved = resolver
            .resolve(&key_ref("clip.mp4"), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(resolved.url, "https://cdn/x.mp4");
        let log = calls.lock().clone();
        assert_eq!(
            log,
            vec![
                "GET s3/url?key=clip.mp4",
                "GET s3/presign?key=clip.mp4",
                "GET s3/get-url?key=clip.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn stream_probe_mints_local_handle() {
        let backend = ScriptedBackend::new();
        backend.script_bytes("s3/view?key=clip.mp4", Bytes::from_static(b"mp4 bytes"));
        let resolver = resolver(backend);

        let resolved = resolver
            .resolve(&key_ref("clip.mp4"), &CancelFlag::new())
            .await
            .unwrap();

        let handle = resolved.handle.expect("stream resolution carries a handle");
        assert_eq!(resolved.url, handle.url());
        assert_eq!(
            resolver.registry().fetch(&resolved.url).unwrap(),
            Bytes::from_static(b"mp4 bytes")
        );
        handle.release();
    }

    #[tokio::test]
    async fn url_probes_precede_stream_probes_in_order() {
        let backend = ScriptedBackend::new();
        backend.script_bytes("s3/get?key=k", Bytes::from_static(b"payload"));
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let resolved = resolver.resolve(&key_ref("k"), &CancelFlag::new()).await.unwrap();
        resolved.handle.unwrap().release();

        let log = calls.lock().clone();
        assert_eq!(
            log,
            vec![
                "GET s3/url?key=k",
                "GET s3/presign?key=k",
                "GET s3/get-url?key=k",
                "GET s3/signed-url?key=k",
                "GET s3/get?key=k",
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_probes_are_unresolvable() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let err = resolver.resolve(&key_ref("k"), &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unresolvable));

        // 4 URL probes + 4 query-form + 5 path-form stream probes
        assert_eq!(calls.lock().len(), 13);
    }

    #[tokio::test]
    async fn key_is_percent_encoded_in_probes() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let _ = resolver
            .resolve(&key_ref("uploads/a b.mp4"), &CancelFlag::new())
            .await;

        assert_eq!(calls.lock()[0], "GET s3/url?key=uploads%2Fa%20b.mp4");
    }

    #[tokio::test]
    async fn cancellation_stops_probing() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = resolver.resolve(&key_ref("k"), &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn cancellation_after_stream_body_releases_handle() {
        let backend = ScriptedBackend::new();
        let cancel = CancelFlag::new();
        backend.script_bytes("s3/get?key=k", Bytes::from_static(b"late"));
        backend.cancel_after_response(cancel.clone());
        let resolver = resolver(backend);

        let err = resolver.resolve(&key_ref("k"), &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert_eq!(resolver.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn persist_time_resolution_never_streams() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let result = resolver.resolve_http_url(&key_ref("k")).await.unwrap();
        assert!(result.is_none());

        let log = calls.lock().clone();
        assert_eq!(log.len(), 4);
        assert!(log.iter().all(|call| !call.contains("s3/get")));
    }
}
