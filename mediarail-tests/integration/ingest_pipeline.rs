//! End-to-end ingestion runs against a scripted backend and simulated
//! compression engine: size gating, the one-shot compression policy, upload
//! ordering, and catalog persistence.

use std::sync::Arc;

use mediarail_core::config::MediarailConfig;
use mediarail_core::ingest::{IngestError, IngestService};
use mediarail_core::media::MediaBlob;
use mediarail_core::sim::{ScriptedBackend, SimTranscoder};
use mediarail_core::storage::CancelFlag;
use mediarail_core::MediarailError;
use serde_json::json;

const MIB: usize = 1024 * 1024;

fn service_with(backend: ScriptedBackend, transcoder: SimTranscoder) -> IngestService {
    IngestService::new(
        MediarailConfig::default(),
        Arc::new(backend),
        Arc::new(transcoder),
    )
}

fn video(len: usize) -> MediaBlob {
    MediaBlob::new(vec![0u8; len], "video/mp4", "session.mp4")
}

#[tokio::test]
async fn six_mib_file_is_compressed_to_four_then_uploaded() {
    let backend = ScriptedBackend::new();
    backend.script_json("s3/upload", json!({ "url": "https://cdn/session.mp4" }));
    backend.script_json("mindfulness-videos", json!({ "data": { "_id": "rec1" } }));
    let calls = backend.call_log();
    let bodies = backend.posted_bodies();

    let transcoder = SimTranscoder::new().with_output_size(4 * MIB);
    let invocations = transcoder.invocations();
    let service = service_with(backend, transcoder);

    let record = service
        .ingest(video(6 * MIB), "Evening wind-down".to_string(), "calm".to_string())
        .await
        .unwrap();

    assert_eq!(record.id, "rec1");
    assert_eq!(*invocations.lock(), 1);

    // Upload strictly precedes persistence
    let log = calls.lock().clone();
    assert_eq!(log, vec!["POST s3/upload", "POST mindfulness-videos"]);

    let body = bodies.lock().last().cloned().unwrap();
    assert_eq!(body["title"], "Evening wind-down");
    assert_eq!(body["videoUrl"], "https://cdn/session.mp4");
    assert_eq!(body["isActive"], true);
}

#[tokio::test]
async fn file_within_limit_is_uploaded_unmodified() {
    let backend = ScriptedBackend::new();
    backend.script_json("s3/upload", json!({ "url": "https://cdn/small.mp4" }));
    backend.script_json("mindfulness-videos", json!({ "_id": "rec2" }));

    let transcoder = SimTranscoder::new();
    let invocations = transcoder.invocations();
    let service = service_with(backend, transcoder);

    service
        .ingest(video(3 * MIB), "Short".to_string(), String::new())
        .await
        .unwrap();

    assert_eq!(*invocations.lock(), 0);
}

#[tokio::test]
async fn still_oversized_output_reaches_no_network() {
    let backend = ScriptedBackend::new();
    let calls = backend.call_log();

    // "Compression" lands above the 5 MiB ceiling
    let transcoder = SimTranscoder::new().with_output_size(5 * MIB + 1);
    let service = service_with(backend, transcoder);

    let err = service
        .ingest(video(8 * MIB), "Too big".to_string(), String::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MediarailError::Ingest(IngestError::StillTooLarge { .. })
    ));
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn key_reference_is_refined_before_persistence() {
    let backend = ScriptedBackend::new();
    backend.script_json("s3/upload", json!({ "data": { "key": "uploads/session.mp4" } }));
    backend.script_json(
        "s3/url?key=uploads%2Fsession.mp4",
        json!({ "url": "https://cdn/signed/session.mp4" }),
    );
    backend.script_json("mindfulness-videos", json!({ "_id": "rec3" }));
    let calls = backend.call_log();
    let bodies = backend.posted_bodies();

    let service = service_with(backend, SimTranscoder::new());

    service
        .ingest(video(MIB), "Keyed".to_string(), String::new())
        .await
        .unwrap();

    // The stored reference is the refined URL, not the raw key
    let body = bodies.lock().last().cloned().unwrap();
    assert_eq!(body["videoUrl"], "https://cdn/signed/session.mp4");

    // Refinement only ever touches URL-style probes
    let log = calls.lock().clone();
    assert_eq!(
        log,
        vec![
            "POST s3/upload",
            "GET s3/url?key=uploads%2Fsession.mp4",
            "POST mindfulness-videos",
        ]
    );
}

#[tokio::test]
async fn unrefinable_key_is_persisted_raw_and_resolved_at_playback() {
    let backend = ScriptedBackend::new();
    backend.script_json("s3/upload", json!({ "key": "uploads/raw.mp4" }));
    backend.script_json("mindfulness-videos", json!({ "_id": "rec4" }));
    backend.script_bytes(
        "s3/get?key=uploads%2Fraw.mp4",
        bytes::Bytes::from_static(b"mp4 payload"),
    );
    let bodies = backend.posted_bodies();

    let service = service_with(backend, SimTranscoder::new());

    let record = service
        .ingest(video(MIB), "Raw key".to_string(), String::new())
        .await
        .unwrap();

    assert_eq!(bodies.lock().last().unwrap()["videoUrl"], "uploads/raw.mp4");

    // Playback falls through to the stream probes and yields a local handle
    let url = service
        .playback_url(&record, &CancelFlag::new())
        .await
        .unwrap();
    assert!(url.starts_with("mediarail://handle/"));

    // Cached for the session: resolving again returns the same handle URL
    let again = service
        .playback_url(&record, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(url, again);
}

#[tokio::test]
async fn edit_without_replacement_preserves_stored_reference() {
    let backend = ScriptedBackend::new();
    backend.script_json("mindfulness-videos/rec5", json!({ "ok": true }));
    let calls = backend.call_log();
    let bodies = backend.posted_bodies();

    let service = service_with(backend, SimTranscoder::new());

    service
        .edit(
            "rec5",
            Some("Renamed".to_string()),
            Some("new description".to_string()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(calls.lock().clone(), vec!["PATCH mindfulness-videos/rec5"]);

    let body = bodies.lock().last().cloned().unwrap();
    assert_eq!(body["title"], "Renamed");
    assert_eq!(body["description"], "new description");
    assert!(body.get("videoUrl").is_none());
}

#[tokio::test]
async fn edit_with_replacement_runs_the_full_media_path() {
    let backend = ScriptedBackend::new();
    backend.script_json("s3/upload", json!({ "url": "https://cdn/replacement.mp4" }));
    backend.script_json("mindfulness-videos/rec6", json!({ "ok": true }));
    let bodies = backend.posted_bodies();

    let transcoder = SimTranscoder::new().with_output_size(2 * MIB);
    let invocations = transcoder.invocations();
    let service = service_with(backend, transcoder);

    let record = service
        .edit("rec6", None, None, Some(video(7 * MIB)))
        .await
        .unwrap();

    assert_eq!(*invocations.lock(), 1);

    let body = bodies.lock().last().cloned().unwrap();
    assert_eq!(body["videoUrl"], "https://cdn/replacement.mp4");
    assert!(body.get("title").is_none());

    // The returned record carries the new reference and measured duration
    assert_eq!(record.id, "rec6");
    assert!(record.reference.is_url());
    assert_eq!(record.reference.as_str(), "https://cdn/replacement.mp4");
}

#[tokio::test]
async fn non_video_selection_fails_before_the_pipeline_starts() {
    let backend = ScriptedBackend::new();
    let calls = backend.call_log();
    let service = service_with(backend, SimTranscoder::new());

    let blob = MediaBlob::new(vec![1u8; 64], "text/plain", "notes.txt");
    let err = service
        .ingest(blob, "Notes".to_string(), String::new())
        .await
        .unwrap_err();

    assert!(err.is_user_error());
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn remove_deletes_the_catalog_record() {
    let backend = ScriptedBackend::new();
    backend.script_json("mindfulness-videos/rec7", json!({}));
    let calls = backend.call_log();
    let service = service_with(backend, SimTranscoder::new());

    service.remove("rec7").await.unwrap();
    assert_eq!(calls.lock().clone(), vec!["DELETE mindfulness-videos/rec7"]);
}
