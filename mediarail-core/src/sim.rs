//! Deterministic test doubles
//!
//! Scripted stand-ins for the backend transport and the compression engine,
//! so pipeline behavior (probe ordering, fallback, failure handling) can be
//! exercised without a network or an ffmpeg binary. Endpoints answer only
//! what they were scripted with; everything else is a 404, which is exactly
//! how resolution probing encounters absent routes in production.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use crate::backend::{BackendError, StorageBackend};
use crate::ingest::transcode::{CompressionJob, Transcoder};
use crate::ingest::IngestError;
use crate::media::MediaBlob;
use crate::storage::resolver::CancelFlag;

/// Backend double that serves pre-scripted responses and logs every call.
///
/// The call log records `"{METHOD} {endpoint}"` in invocation order, which
/// lets tests pin exact probe sequences.
#[derive(Default)]
pub struct ScriptedBackend {
    json_responses: Mutex<HashMap<String, Value>>,
    byte_responses: Mutex<HashMap<String, Bytes>>,
    calls: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
    cancel_after: Mutex<Option<CancelFlag>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a JSON response for an endpoint (exact match, query included).
    pub fn script_json(&self, endpoint: &str, response: Value) {
        self.json_responses
            .lock()
            .insert(endpoint.to_string(), response);
    }

    /// Script a raw binary response for an endpoint.
    pub fn script_bytes(&self, endpoint: &str, response: Bytes) {
        self.byte_responses
            .lock()
            .insert(endpoint.to_string(), response);
    }

    /// Shared handle to the call log, usable after the backend moves into
    /// an `Arc<dyn StorageBackend>`.
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    /// Shared handle to the JSON bodies sent via POST and PATCH.
    pub fn posted_bodies(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.bodies)
    }

    /// Arm the flag to be set right after the next successful response,
    /// simulating a caller that abandons interest while a call is in flight.
    pub fn cancel_after_response(&self, flag: CancelFlag) {
        *self.cancel_after.lock() = Some(flag);
    }

    fn record(&self, method: &str, endpoint: &str) {
        self.calls.lock().push(format!("{method} {endpoint}"));
    }

    fn served(&self) {
        if let Some(flag) = self.cancel_after.lock().take() {
            flag.cancel();
        }
    }

    fn lookup_json(&self, endpoint: &str) -> Result<Value, BackendError> {
        match self.json_responses.lock().get(endpoint) {
            Some(response) => {
                self.served();
                Ok(response.clone())
            }
            None => Err(BackendError::Status { status: 404 }),
        }
    }
}

#[async_trait]
impl StorageBackend for ScriptedBackend {
    async fn get_json(&self, endpoint: &str) -> Result<Value, BackendError> {
        self.record("GET", endpoint);
        self.lookup_json(endpoint)
    }

    async fn get_bytes(&self, endpoint: &str) -> Result<Bytes, BackendError> {
        self.record("GET", endpoint);
        match self.byte_responses.lock().get(endpoint) {
            Some(response) => {
                self.served();
                Ok(response.clone())
            }
            None => Err(BackendError::Status { status: 404 }),
        }
    }

    async fn post_multipart(
        &self,
        endpoint: &str,
        _file_name: &str,
        _mime: &str,
        _body: Bytes,
    ) -> Result<Value, BackendError> {
        self.record("POST", endpoint);
        self.lookup_json(endpoint)
    }

    async fn post_json(&self, endpoint: &str, body: Value) -> Result<Value, BackendError> {
        self.record("POST", endpoint);
        let response = self.lookup_json(endpoint)?;
        self.bodies.lock().push(body);
        Ok(response)
    }

    async fn patch_json(&self, endpoint: &str, body: Value) -> Result<Value, BackendError> {
        self.record("PATCH", endpoint);
        let response = self.lookup_json(endpoint)?;
        self.bodies.lock().push(body);
        Ok(response)
    }

    async fn delete(&self, endpoint: &str) -> Result<(), BackendError> {
        self.record("DELETE", endpoint);
        self.lookup_json(endpoint)?;
        Ok(())
    }
}

/// Compression engine double with a configurable outcome.
///
/// Produces an output blob of a fixed size, so tests choose which side of
/// the size ceiling a "compressed" result lands on. Honors the job ceiling
/// the way the real engine does.
pub struct SimTranscoder {
    output_size: usize,
    failure: Option<String>,
    invocations: Arc<Mutex<usize>>,
}

impl SimTranscoder {
    pub fn new() -> Self {
        Self {
            output_size: 1024,
            failure: None,
            invocations: Arc::new(Mutex::new(0)),
        }
    }

    /// Size of the blob every compression run produces.
    pub fn with_output_size(mut self, bytes: usize) -> Self {
        self.output_size = bytes;
        self
    }

    /// Make every compression run fail with the given reason.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Shared compression-run counter.
    pub fn invocations(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.invocations)
    }
}

impl Default for SimTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for SimTranscoder {
    async fn ensure_ready(&self) -> Result<(), IngestError> {
        Ok(())
    }

    async fn compress(&self, job: CompressionJob) -> Result<MediaBlob, IngestError> {
        *self.invocations.lock() += 1;

        if let Some(reason) = &self.failure {
            return Err(IngestError::CompressionFailed {
                reason: reason.clone(),
            });
        }

        job.progress.report(50);

        if self.output_size as u64 > job.constraints.max_output_bytes {
            return Err(IngestError::StillTooLarge {
                actual: self.output_size as u64,
                ceiling: job.constraints.max_output_bytes,
            });
        }

        job.progress.report(100);
        Ok(MediaBlob::new(
            vec![0u8; self.output_size],
            "video/mp4",
            job.blob.file_name().to_string(),
        ))
    }
}
