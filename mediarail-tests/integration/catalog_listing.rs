//! Listing behavior across backend shapes: catalog records with full
//! metadata, heterogeneous response nesting, and the degraded raw-storage
//! fallback with its media-extension allowlist.

use std::sync::Arc;

use mediarail_core::catalog::CatalogClient;
use mediarail_core::config::MediarailConfig;
use mediarail_core::sim::ScriptedBackend;
use serde_json::json;

fn client(backend: ScriptedBackend) -> CatalogClient {
    CatalogClient::new(Arc::new(backend), &MediarailConfig::default())
}

#[tokio::test]
async fn catalog_records_keep_their_metadata() {
    let backend = ScriptedBackend::new();
    backend.script_json(
        "mindfulness-videos?page=1&limit=1000",
        json!({ "data": { "items": [
            {
                "_id": "a1",
                "title": "Body scan",
                "description": "Guided body scan",
                "videoUrl": "https://cdn/body-scan.mp4",
                "thumbnailUrl": "https://cdn/body-scan.jpg",
                "durationSeconds": 600,
                "tags": ["guided", "beginner"],
                "isActive": false,
            },
        ]}}),
    );

    let records = client(backend).list().await.unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.id, "a1");
    assert_eq!(record.title, "Body scan");
    assert_eq!(record.description, "Guided body scan");
    assert_eq!(record.thumbnail_url.as_deref(), Some("https://cdn/body-scan.jpg"));
    assert_eq!(record.duration_seconds, 600);
    assert_eq!(record.tags, vec!["guided", "beginner"]);
    assert!(!record.is_active);
}

#[tokio::test]
async fn deeply_nested_listing_shapes_are_found() {
    let backend = ScriptedBackend::new();
    backend.script_json(
        "mindfulness-videos?page=1&limit=1000",
        json!({ "data": { "data": { "items": [
            { "title": "Nested", "videoKey": "uploads/nested.mp4" },
        ]}}}),
    );

    let records = client(backend).list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "Nested");
    assert!(!records[0].reference.is_url());
}

#[tokio::test]
async fn unreachable_catalog_degrades_to_raw_storage() {
    let backend = ScriptedBackend::new();
    // Catalog endpoint is not scripted, so listing it fails with a 404
    backend.script_json(
        "s3/list",
        json!({ "data": { "files": [
            { "Key": "uploads/morning.mp4" },
            { "Key": "uploads/cover.jpg" },
            { "Key": "uploads/archive.zip" },
            "https://cdn/evening.webm",
        ]}}),
    );
    let calls = backend.call_log();

    let records = client(backend).list().await.unwrap();

    // Only media files survive the allowlist; titles come from file names
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].title, "morning.mp4");
    assert_eq!(records[1].title, "evening.webm");
    assert!(records[1].reference.is_url());

    let log = calls.lock().clone();
    assert_eq!(log[0], "GET mindfulness-videos?page=1&limit=1000");
    assert_eq!(log[1], "GET s3/list");
}

#[tokio::test]
async fn bare_string_entries_are_classified() {
    let backend = ScriptedBackend::new();
    backend.script_json(
        "mindfulness-videos?page=1&limit=1000",
        json!({ "items": ["uploads/plain.mp4", "https://cdn/hosted.mov"] }),
    );

    let records = client(backend).list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(!records[0].reference.is_url());
    assert!(records[1].reference.is_url());
}

#[tokio::test]
async fn empty_listing_is_not_an_error() {
    let backend = ScriptedBackend::new();
    backend.script_json("mindfulness-videos?page=1&limit=1000", json!({ "items": [] }));

    let records = client(backend).list().await.unwrap();
    assert!(records.is_empty());
}
