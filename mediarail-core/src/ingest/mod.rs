//! Asset ingestion pipeline
//!
//! Drives one file from selection to a persisted catalog record: MIME
//! check, size gate, at most one compression pass, multipart upload with
//! concurrent duration measurement, then catalog persistence. The pipeline
//! never retries a stage on its own; every failure surfaces to the caller
//! and a fresh attempt starts from selection.

pub mod duration;
pub mod size_gate;
pub mod transcode;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::catalog::{AssetDraft, AssetPatch, AssetRecord, CatalogClient};
use crate::config::MediarailConfig;
use crate::media::MediaBlob;
use crate::storage::handle::HandleRegistry;
use crate::storage::resolver::{CancelFlag, PlaybackResolver, ResolvedPlayback};
use crate::storage::upload::UploadCoordinator;

pub use duration::DurationProbe;
pub use size_gate::GateDecision;
pub use transcode::{
    CompressionConstraints, CompressionJob, FfmpegTranscoder, ProgressReporter, Transcoder,
};

/// Ingestion pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid selection: {reason}")]
    Selection { reason: String },

    #[error("Compression engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    #[error("Compression failed: {reason}")]
    CompressionFailed { reason: String },

    #[error("Compressed output is {actual} bytes, ceiling is {ceiling}")]
    StillTooLarge { actual: u64, ceiling: u64 },

    #[error("Ingestion cancelled")]
    Cancelled,
}

/// Stages an ingestion run moves through, in order.
///
/// The compression arm is only entered for over-limit files; within-limit
/// files jump from `FileSelected` straight to `Uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Idle,
    FileSelected,
    NeedsCompression,
    Compressing,
    Compressed,
    CompressionFailed,
    Uploading,
    Persisting,
    Done,
    Failed,
}

/// Observable progress of one ingestion run.
///
/// `stage` tracks the state machine; `compression_percent` only moves while
/// the run is in `Compressing` and is monotone within a run.
pub struct IngestEvents {
    pub stage: watch::Receiver<IngestStage>,
    pub compression_percent: watch::Receiver<u8>,
}

struct StageReporter {
    tx: watch::Sender<IngestStage>,
}

impl StageReporter {
    fn channel() -> (Self, watch::Receiver<IngestStage>) {
        let (tx, rx) = watch::channel(IngestStage::Idle);
        (Self { tx }, rx)
    }

    fn enter(&self, stage: IngestStage) {
        tracing::debug!("ingest stage: {stage:?}");
        let _ = self.tx.send(stage);
    }
}

/// Facade over the full ingest/edit/remove/playback surface.
pub struct IngestService {
    config: MediarailConfig,
    transcoder: Arc<dyn Transcoder>,
    uploader: UploadCoordinator,
    resolver: PlaybackResolver,
    catalog: CatalogClient,
    duration: DurationProbe,
    // Resolved playback per record, valid for this process only. Holding the
    // ResolvedPlayback keeps any local handle alive until eviction.
    playback_cache: parking_lot::Mutex<HashMap<String, ResolvedPlayback>>,
}

impl IngestService {
    pub fn new(
        config: MediarailConfig,
        backend: Arc<dyn crate::backend::StorageBackend>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let registry = HandleRegistry::new();
        Self {
            uploader: UploadCoordinator::new(Arc::clone(&backend), config.network.upload_endpoint),
            resolver: PlaybackResolver::new(Arc::clone(&backend), registry),
            catalog: CatalogClient::new(Arc::clone(&backend), &config),
            duration: DurationProbe::new(config.transcode.scratch_dir.clone()),
            transcoder,
            config,
            playback_cache: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Ingest a new asset end to end.
    pub async fn ingest(
        &self,
        blob: MediaBlob,
        title: String,
        description: String,
    ) -> crate::Result<AssetRecord> {
        let (events, run) = self.start_ingest(blob, title, description);
        drop(events);
        run.await
    }

    /// Ingest with stage and compression-progress observation.
    ///
    /// The returned future must be awaited; the events side can be read
    /// concurrently (or dropped, which the run does not notice).
    pub fn start_ingest(
        &self,
        blob: MediaBlob,
        title: String,
        description: String,
    ) -> (
        IngestEvents,
        impl Future<Output = crate::Result<AssetRecord>> + '_,
    ) {
        let (stage, stage_rx) = StageReporter::channel();
        let (progress, progress_rx) = ProgressReporter::channel();

        let events = IngestEvents {
            stage: stage_rx,
            compression_percent: progress_rx,
        };

        let run = async move {
            let result = self.run_ingest(blob, title, description, &stage, progress).await;
            match &result {
                Ok(_) => stage.enter(IngestStage::Done),
                Err(_) => stage.enter(IngestStage::Failed),
            }
            result
        };

        (events, run)
    }

    async fn run_ingest(
        &self,
        blob: MediaBlob,
        title: String,
        description: String,
        stage: &StageReporter,
        progress: ProgressReporter,
    ) -> crate::Result<AssetRecord> {
        self.check_selection(&blob)?;
        stage.enter(IngestStage::FileSelected);

        let blob = self.gate_and_compress(blob, stage, progress).await?;
        let (reference, duration_seconds) = self.upload_and_measure(blob, stage).await?;

        stage.enter(IngestStage::Persisting);
        let persisted = self.persist_reference(&reference).await;

        let record = self
            .catalog
            .create(AssetDraft {
                title,
                description,
                reference: persisted,
                thumbnail_url: String::new(),
                duration_seconds,
                tags: Vec::new(),
                is_active: true,
            })
            .await?;

        Ok(record)
    }

    /// Replace metadata and optionally the media of an existing record,
    /// returning the record as it stands after the update.
    ///
    /// Without a new file this is a metadata-only patch: no gate, no
    /// compression, no upload, and the stored reference is untouched.
    pub async fn edit(
        &self,
        id: &str,
        title: Option<String>,
        description: Option<String>,
        replacement: Option<MediaBlob>,
    ) -> crate::Result<AssetRecord> {
        let mut patch = AssetPatch {
            title,
            description,
            ..AssetPatch::default()
        };

        if let Some(blob) = replacement {
            self.check_selection(&blob)?;
            let (stage, _rx) = StageReporter::channel();
            let (progress, _rx) = ProgressReporter::channel();

            let blob = self.gate_and_compress(blob, &stage, progress).await?;
            let (reference, duration_seconds) = self.upload_and_measure(blob, &stage).await?;

            patch.reference = Some(self.persist_reference(&reference).await);
            patch.duration_seconds = Some(duration_seconds);
        }

        let record = self.catalog.update(id, patch).await?;
        self.playback_cache.lock().remove(id);
        Ok(record)
    }

    /// Delete a record and forget any cached playback for it.
    pub async fn remove(&self, id: &str) -> crate::Result<()> {
        self.catalog.remove(id).await?;
        self.playback_cache.lock().remove(id);
        Ok(())
    }

    /// List all assets.
    pub async fn list(&self) -> crate::Result<Vec<AssetRecord>> {
        Ok(self.catalog.list().await?)
    }

    /// Resolve a record's reference to something playable, caching the
    /// result (and keeping any local handle alive) for this session.
    pub async fn playback_url(
        &self,
        record: &AssetRecord,
        cancel: &CancelFlag,
    ) -> crate::Result<String> {
        if let Some(resolved) = self.playback_cache.lock().get(&record.id) {
            return Ok(resolved.url.clone());
        }

        let resolved = self.resolver.resolve(&record.reference, cancel).await?;
        let url = resolved.url.clone();
        self.playback_cache.lock().insert(record.id.clone(), resolved);
        Ok(url)
    }

    fn check_selection(&self, blob: &MediaBlob) -> Result<(), IngestError> {
        if blob.is_empty() {
            return Err(IngestError::Selection {
                reason: "selected file is empty".to_string(),
            });
        }
        if !blob.is_video() {
            return Err(IngestError::Selection {
                reason: format!("not a video file: {}", blob.mime()),
            });
        }
        Ok(())
    }

    /// Size-gate the blob and compress it at most once.
    ///
    /// A result still over the ceiling is rejected before any upload.
    async fn gate_and_compress(
        &self,
        blob: MediaBlob,
        stage: &StageReporter,
        progress: ProgressReporter,
    ) -> Result<MediaBlob, IngestError> {
        let ceiling = self.config.ingest.size_ceiling;

        match size_gate::decide(&blob, ceiling) {
            GateDecision::WithinLimit => {
                tracing::debug!("{} within size limit, no compression", blob.file_name());
                return Ok(blob);
            }
            GateDecision::OverLimit => {
                stage.enter(IngestStage::NeedsCompression);
            }
        }

        self.transcoder.ensure_ready().await?;
        stage.enter(IngestStage::Compressing);

        let job = CompressionJob {
            blob,
            constraints: CompressionConstraints {
                max_output_bytes: ceiling,
                max_width: self.config.transcode.max_width,
            },
            progress,
        };

        match self.transcoder.compress(job).await {
            Ok(compressed) => {
                stage.enter(IngestStage::Compressed);
                Ok(compressed)
            }
            Err(e) => {
                stage.enter(IngestStage::CompressionFailed);
                Err(e)
            }
        }
    }

    /// Upload the blob while measuring its duration from a local copy.
    async fn upload_and_measure(
        &self,
        blob: MediaBlob,
        stage: &StageReporter,
    ) -> crate::Result<(crate::storage::StorageReference, u64)> {
        stage.enter(IngestStage::Uploading);

        // Duration is measured from the bytes being uploaded, so both can
        // run concurrently. The blob clone shares the underlying buffer.
        let probe_blob = blob.clone();
        let (uploaded, duration_seconds) = tokio::join!(
            self.uploader.upload(blob),
            self.duration.measure(&probe_blob),
        );

        Ok((uploaded?, duration_seconds))
    }

    /// Refine a reference to a stable HTTP URL before persisting it.
    ///
    /// Only URL-style probes are consulted: a process-local handle must
    /// never end up in the catalog. A key that refuses to resolve is stored
    /// raw and resolved again at playback time.
    async fn persist_reference(&self, reference: &crate::storage::StorageReference) -> String {
        if reference.is_url() {
            return reference.as_str().to_string();
        }

        match self.resolver.resolve_http_url(reference).await {
            Ok(Some(url)) => url,
            Ok(None) => reference.as_str().to_string(),
            Err(e) => {
                tracing::debug!("persist-time resolution failed ({e}), storing key as-is");
                reference.as_str().to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::sim::{ScriptedBackend, SimTranscoder};

    fn service(backend: ScriptedBackend, transcoder: SimTranscoder) -> IngestService {
        IngestService::new(
            MediarailConfig::for_testing(),
            Arc::new(backend),
            Arc::new(transcoder),
        )
    }

    fn video(len: usize) -> MediaBlob {
        MediaBlob::new(vec![0u8; len], "video/mp4", "clip.mp4")
    }

    #[tokio::test]
    async fn small_file_skips_compression() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "url": "https://cdn/clip.mp4" }));
        backend.script_json("mindfulness-videos", json!({ "_id": "v1" }));
        let transcoder = SimTranscoder::new();
        let invocations = transcoder.invocations();
        let service = service(backend, transcoder);

        // 512 bytes, test ceiling is 1024
        let record = service
            .ingest(video(512), "Calm".to_string(), String::new())
            .await
            .unwrap();

        assert_eq!(record.id, "v1");
        assert!(record.reference.is_url());
        assert_eq!(*invocations.lock(), 0);
    }

    #[tokio::test]
    async fn oversized_file_is_compressed_then_uploaded() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "data": { "key": "uploads/clip.mp4" } }));
        backend.script_json("mindfulness-videos", json!({ "_id": "v2" }));
        let transcoder = SimTranscoder::new().with_output_size(800);
        let invocations = transcoder.invocations();
        let service = service(backend, transcoder);

        let record = service
            .ingest(video(2048), "Big".to_string(), String::new())
            .await
            .unwrap();

        assert_eq!(record.id, "v2");
        assert_eq!(*invocations.lock(), 1);
    }

    #[tokio::test]
    async fn still_too_large_never_uploads() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        // Sim engine honors the job ceiling, just like the real one
        let transcoder = SimTranscoder::new().with_output_size(4096);
        let service = service(backend, transcoder);

        let err = service
            .ingest(video(2048), "Huge".to_string(), String::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            crate::MediarailError::Ingest(IngestError::StillTooLarge { .. })
        ));
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn non_video_is_rejected_before_any_network_call() {
        let backend = ScriptedBackend::new();
        let calls = backend.call_log();
        let service = service(backend, SimTranscoder::new());

        let blob = MediaBlob::new(vec![1u8; 10], "application/pdf", "doc.pdf");
        let err = service
            .ingest(blob, "Doc".to_string(), String::new())
            .await
            .unwrap_err();

        assert!(err.is_user_error());
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn stage_channel_ends_at_done_on_success() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "url": "https://cdn/c.mp4" }));
        backend.script_json("mindfulness-videos", json!({ "_id": "v3" }));
        let service = service(backend, SimTranscoder::new().with_output_size(100));

        let (events, run) =
            service.start_ingest(video(2048), "Stages".to_string(), String::new());
        run.await.unwrap();

        // watch only retains the latest stage; a finished run shows Done
        assert_eq!(*events.stage.borrow(), IngestStage::Done);
    }

    #[tokio::test]
    async fn stage_channel_ends_at_failed_on_error() {
        let backend = ScriptedBackend::new();
        let service = service(backend, SimTranscoder::new().failing("no engine"));

        let (events, run) =
            service.start_ingest(video(2048), "Broken".to_string(), String::new());
        let err = run.await.unwrap_err();

        assert!(matches!(
            err,
            crate::MediarailError::Ingest(IngestError::CompressionFailed { .. })
        ));
        assert_eq!(*events.stage.borrow(), IngestStage::Failed);
    }

    #[tokio::test]
    async fn edit_without_file_patches_metadata_only() {
        let backend = ScriptedBackend::new();
        backend.script_json("mindfulness-videos/v1", json!({ "ok": true }));
        let calls = backend.call_log();
        let bodies = backend.posted_bodies();
        let service = service(backend, SimTranscoder::new());

        let record = service
            .edit("v1", Some("New title".to_string()), None, None)
            .await
            .unwrap();

        assert_eq!(record.id, "v1");
        assert_eq!(record.title, "New title");
        assert_eq!(calls.lock().clone(), vec!["PATCH mindfulness-videos/v1"]);
        let body = bodies.lock()[0].clone();
        assert_eq!(body["title"], "New title");
        assert!(body.get("videoUrl").is_none());
        assert!(body.get("durationSeconds").is_none());
    }

    #[tokio::test]
    async fn edit_with_file_uploads_and_patches_reference() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "url": "https://cdn/new.mp4" }));
        backend.script_json("mindfulness-videos/v1", json!({ "ok": true }));
        let bodies = backend.posted_bodies();
        let service = service(backend, SimTranscoder::new());

        let record = service
            .edit("v1", None, None, Some(video(512)))
            .await
            .unwrap();

        let body = bodies.lock().last().cloned().unwrap();
        assert_eq!(body["videoUrl"], "https://cdn/new.mp4");
        assert!(body.get("durationSeconds").is_some());

        // The returned record reflects the replacement upload
        assert_eq!(record.id, "v1");
        assert!(record.reference.is_url());
    }

    #[tokio::test]
    async fn playback_resolution_is_cached_per_record() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/url?key=k.mp4", json!({ "url": "https://cdn/k.mp4" }));
        let calls = backend.call_log();
        let service = service(backend, SimTranscoder::new());

        let record = AssetRecord {
            id: "v9".to_string(),
            title: String::new(),
            description: String::new(),
            reference: crate::storage::StorageReference::Key("k.mp4".to_string()),
            thumbnail_url: None,
            duration_seconds: 0,
            tags: Vec::new(),
            is_active: true,
        };

        let cancel = CancelFlag::new();
        let first = service.playback_url(&record, &cancel).await.unwrap();
        let second = service.playback_url(&record, &cancel).await.unwrap();

        assert_eq!(first, "https://cdn/k.mp4");
        assert_eq!(first, second);
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_key_is_persisted_raw() {
        let backend = ScriptedBackend::new();
        backend.script_json("s3/upload", json!({ "key": "uploads/k.mp4" }));
        backend.script_json("mindfulness-videos", json!({ "_id": "v4" }));
        let bodies = backend.posted_bodies();
        let service = service(backend, SimTranscoder::new());

        service
            .ingest(video(512), "Raw".to_string(), String::new())
            .await
            .unwrap();

        let body = bodies.lock().last().cloned().unwrap();
        assert_eq!(body["videoUrl"], "uploads/k.mp4");
    }
}
