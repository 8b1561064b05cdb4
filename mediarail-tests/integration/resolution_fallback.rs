//! Ordered fallback resolution: every candidate endpoint in declared order,
//! first success wins, and local handle lifecycle across cancellation.

use std::sync::Arc;

use bytes::Bytes;
use mediarail_core::sim::ScriptedBackend;
use mediarail_core::storage::{
    CancelFlag, HandleRegistry, PlaybackResolver, StorageError, StorageReference,
};
use serde_json::json;

/// All resolution candidates for a key, in the order they must be visited.
/// The first four are URL-style (JSON), the rest stream raw bytes.
fn candidates(encoded_key: &str) -> Vec<String> {
    let url_probes = ["s3/url", "s3/presign", "s3/get-url", "s3/signed-url"];
    let stream_query = ["s3/get", "s3/download", "s3/view", "s3/file"];
    let stream_path = ["s3", "s3/file", "s3/download", "s3/view", "s3/get"];

    url_probes
        .iter()
        .chain(stream_query.iter())
        .map(|probe| format!("{probe}?key={encoded_key}"))
        .chain(stream_path.iter().map(|probe| format!("{probe}/{encoded_key}")))
        .collect()
}

fn resolver(backend: ScriptedBackend) -> PlaybackResolver {
    PlaybackResolver::new(Arc::new(backend), HandleRegistry::new())
}

fn key(value: &str) -> StorageReference {
    StorageReference::Key(value.to_string())
}

/// For every position k in the candidate list: when only candidate k is
/// live, the resolver visits exactly candidates 0..=k and stops.
#[tokio::test]
async fn first_live_candidate_wins_at_every_position() {
    let all = candidates("clip.mp4");

    for winner in 0..all.len() {
        let backend = ScriptedBackend::new();
        if winner < 4 {
            backend.script_json(&all[winner], json!({ "url": "https://cdn/clip.mp4" }));
        } else {
            backend.script_bytes(&all[winner], Bytes::from_static(b"payload"));
        }
        let calls = backend.call_log();
        let resolver = resolver(backend);

        let resolved = resolver
            .resolve(&key("clip.mp4"), &CancelFlag::new())
            .await
            .unwrap_or_else(|e| panic!("candidate {winner} should resolve: {e}"));

        if let Some(handle) = resolved.handle {
            handle.release();
        }

        let expected: Vec<String> = all[..=winner]
            .iter()
            .map(|endpoint| format!("GET {endpoint}"))
            .collect();
        assert_eq!(calls.lock().clone(), expected, "winner at position {winner}");
    }
}

#[tokio::test]
async fn exhausting_all_candidates_is_unresolvable() {
    let backend = ScriptedBackend::new();
    let calls = backend.call_log();
    let resolver = resolver(backend);

    let err = resolver
        .resolve(&key("clip.mp4"), &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Unresolvable));
    assert_eq!(calls.lock().len(), candidates("clip.mp4").len());
}

#[tokio::test]
async fn url_reference_needs_no_probing_at_all() {
    let backend = ScriptedBackend::new();
    let calls = backend.call_log();
    let resolver = resolver(backend);

    let reference = StorageReference::Url("https://cdn/direct.mp4".to_string());
    let resolved = resolver.resolve(&reference, &CancelFlag::new()).await.unwrap();

    assert_eq!(resolved.url, "https://cdn/direct.mp4");
    assert!(resolved.handle.is_none());
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn stream_resolution_registers_a_fetchable_handle() {
    let backend = ScriptedBackend::new();
    backend.script_bytes("s3/download?key=clip.mp4", Bytes::from_static(b"video bytes"));
    let resolver = resolver(backend);

    let resolved = resolver
        .resolve(&key("clip.mp4"), &CancelFlag::new())
        .await
        .unwrap();

    let handle = resolved.handle.expect("stream result carries a handle");
    assert_eq!(
        resolver.registry().fetch(&resolved.url).unwrap(),
        Bytes::from_static(b"video bytes")
    );
    assert_eq!(resolver.registry().live_count(), 1);

    handle.release();
    assert_eq!(resolver.registry().live_count(), 0);
    assert!(resolver.registry().fetch(&resolved.url).is_none());
}

#[tokio::test]
async fn cancellation_mid_probe_stops_and_leaks_nothing() {
    let backend = ScriptedBackend::new();
    let cancel = CancelFlag::new();
    backend.script_bytes("s3/view?key=clip.mp4", Bytes::from_static(b"late body"));
    // Flag flips right after the stream body is served, as if the viewer
    // closed the player while the request was in flight
    backend.cancel_after_response(cancel.clone());
    let resolver = resolver(backend);

    let err = resolver.resolve(&key("clip.mp4"), &cancel).await.unwrap_err();

    assert!(matches!(err, StorageError::Cancelled));
    assert_eq!(resolver.registry().live_count(), 0);
}

#[tokio::test]
async fn keys_with_path_separators_stay_encoded() {
    let backend = ScriptedBackend::new();
    backend.script_json(
        "s3/url?key=courses%2F2024%2Fintro%20lesson.mp4",
        json!({ "url": "https://cdn/intro.mp4" }),
    );
    let resolver = resolver(backend);

    let resolved = resolver
        .resolve(&key("courses/2024/intro lesson.mp4"), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(resolved.url, "https://cdn/intro.mp4");
}

#[tokio::test]
async fn non_url_answers_from_url_probes_are_skipped() {
    let backend = ScriptedBackend::new();
    // A key echoed back is not a playable URL and must not short-circuit
    backend.script_json("s3/url?key=clip.mp4", json!({ "url": "clip.mp4" }));
    backend.script_json("s3/presign?key=clip.mp4", json!({ "url": "https://cdn/ok.mp4" }));
    let resolver = resolver(backend);

    let resolved = resolver
        .resolve(&key("clip.mp4"), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(resolved.url, "https://cdn/ok.mp4");
}
