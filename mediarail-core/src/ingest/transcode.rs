//! Transcode engine
//!
//! Wraps the ffmpeg CLI behind a trait seam so the pipeline can run against
//! a scripted engine in tests. The production engine is a single shared,
//! lazily-initialized resource: initialization is memoized and single-flight
//! (a failed load stays retryable), and compression jobs are serialized
//! because they share one scratch-directory namespace. Every scratch file is
//! removed on every exit path, success or failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::TranscodeConfig;
use crate::media::MediaBlob;

use super::IngestError;
use super::duration::duration_from_headers;

/// Output targets for one compression attempt.
#[derive(Debug, Clone, Copy)]
pub struct CompressionConstraints {
    /// Hard ceiling for the encoded output; exceeding it is `StillTooLarge`
    pub max_output_bytes: u64,
    /// Maximum output width; sources narrower than this are not upscaled
    pub max_width: u32,
}

/// Monotone integer progress reporter for a compression job.
///
/// Percentages are clamped to 0..=100 and never move backwards, whatever
/// order the underlying encoder emits ticks in. Subscribers that have gone
/// away are ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: watch::Sender<u8>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0u8);
        (Self { tx }, rx)
    }

    /// Report a progress percentage; regressions are dropped.
    pub fn report(&self, percent: u8) {
        let next = percent.min(100);
        self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

/// One compression attempt: input blob, constraints, progress channel.
///
/// A job exists for the duration of exactly one attempt and is never
/// retried automatically; the caller must select a new file.
pub struct CompressionJob {
    pub blob: MediaBlob,
    pub constraints: CompressionConstraints,
    pub progress: ProgressReporter,
}

impl CompressionJob {
    /// Create a job and the receiver its progress ticks arrive on.
    pub fn new(blob: MediaBlob, constraints: CompressionConstraints) -> (Self, watch::Receiver<u8>) {
        let (progress, rx) = ProgressReporter::channel();
        (
            Self {
                blob,
                constraints,
                progress,
            },
            rx,
        )
    }
}

/// Abstraction over the compression engine for production and tests.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Idempotent, memoized engine initialization.
    ///
    /// Concurrent callers await the same in-flight initialization. Failure
    /// is fatal for the current job only; a later call may succeed.
    ///
    /// # Errors
    /// - `IngestError::EngineUnavailable` - Engine could not be initialized
    async fn ensure_ready(&self) -> Result<(), IngestError>;

    /// Run one compression attempt, consuming the job.
    ///
    /// # Errors
    /// - `IngestError::EngineUnavailable` - Engine could not be initialized
    /// - `IngestError::CompressionFailed` - Encode failed or timed out
    /// - `IngestError::StillTooLarge` - Output still exceeds the ceiling
    async fn compress(&self, job: CompressionJob) -> Result<MediaBlob, IngestError>;
}

enum EngineState {
    Cold,
    Ready { scratch_dir: PathBuf },
}

/// Production engine shelling out to the ffmpeg binary.
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
    // Mutex doubles as the single-flight guard: whoever holds it performs
    // initialization while later callers queue on the lock.
    state: tokio::sync::Mutex<EngineState>,
    // Compression shares one scratch namespace; jobs do not overlap.
    job_lock: tokio::sync::Mutex<()>,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(EngineState::Cold),
            job_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn initialize(&self) -> Result<PathBuf, IngestError> {
        let output = tokio::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|e| IngestError::EngineUnavailable {
                reason: format!("ffmpeg binary not runnable: {e}"),
            })?;

        if !output.status.success() {
            return Err(IngestError::EngineUnavailable {
                reason: "ffmpeg binary found but returned an error".to_string(),
            });
        }

        let scratch_dir = self
            .config
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("mediarail-engine"));

        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| IngestError::EngineUnavailable {
                reason: format!("could not create scratch directory: {e}"),
            })?;

        tracing::info!("transcode engine ready, scratch at {}", scratch_dir.display());
        Ok(scratch_dir)
    }

    fn scale_filter(&self, max_width: u32) -> String {
        // -2 keeps the height an even number, as libx264 requires
        format!("scale='min({max_width},iw)':-2")
    }

    async fn run_encode(
        &self,
        input_path: &Path,
        output_path: &Path,
        total_seconds: Option<f64>,
        progress: &ProgressReporter,
        max_width: u32,
    ) -> Result<(), IngestError> {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-i")
            .arg(input_path)
            .arg("-vf")
            .arg(self.scale_filter(max_width))
            .arg("-c:v")
            .arg("libx264")
            .arg("-crf")
            .arg(self.config.crf.to_string())
            .arg("-preset")
            .arg(self.config.preset)
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(self.config.audio_bitrate)
            .arg("-movflags")
            .arg("+faststart")
            .arg("-progress")
            .arg("pipe:1")
            .arg("-nostats")
            .arg(output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| IngestError::CompressionFailed {
            reason: format!("failed to spawn ffmpeg: {e}"),
        })?;

        let stdout = child.stdout.take();
        let progress_task = {
            let progress = progress.clone();
            tokio::spawn(async move {
                if let Some(stdout) = stdout {
                    forward_progress(stdout, total_seconds, progress).await;
                }
            })
        };

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        });

        let status = match tokio::time::timeout(self.config.job_timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(IngestError::CompressionFailed {
                    reason: format!("ffmpeg process error: {e}"),
                });
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(IngestError::CompressionFailed {
                    reason: format!(
                        "compression timed out after {}s",
                        self.config.job_timeout.as_secs()
                    ),
                });
            }
        };

        let _ = progress_task.await;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let excerpt: String = stderr_text.lines().rev().take(5).collect::<Vec<_>>().join("; ");
            return Err(IngestError::CompressionFailed {
                reason: format!("ffmpeg exited with {status}: {excerpt}"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn ensure_ready(&self) -> Result<(), IngestError> {
        let mut state = self.state.lock().await;
        if matches!(*state, EngineState::Ready { .. }) {
            return Ok(());
        }

        // Failure leaves the state Cold so a later attempt can retry.
        let scratch_dir = self.initialize().await?;
        *state = EngineState::Ready { scratch_dir };
        Ok(())
    }

    async fn compress(&self, job: CompressionJob) -> Result<MediaBlob, IngestError> {
        self.ensure_ready().await?;

        let scratch_dir = {
            let state = self.state.lock().await;
            match &*state {
                EngineState::Ready { scratch_dir } => scratch_dir.clone(),
                EngineState::Cold => unreachable!("ensure_ready leaves the engine ready"),
            }
        };

        let _job = self.job_lock.lock().await;

        let CompressionJob {
            blob,
            constraints,
            progress,
        } = job;

        let job_id = Uuid::new_v4();
        let input_path = scratch_dir.join(format!("in-{job_id}"));
        let output_path = scratch_dir.join(format!("out-{job_id}.mp4"));

        let file_name = blob.file_name().to_string();
        let input_size = blob.len();
        let total_seconds = duration_from_headers(blob.bytes());

        tracing::info!("compressing {file_name} ({input_size} bytes), job {job_id}");

        tokio::fs::write(&input_path, blob.into_bytes())
            .await
            .map_err(|e| IngestError::CompressionFailed {
                reason: format!("could not stage input: {e}"),
            })?;

        let encode_result = self
            .run_encode(
                &input_path,
                &output_path,
                total_seconds,
                &progress,
                constraints.max_width,
            )
            .await;

        let output = match encode_result {
            Ok(()) => tokio::fs::read(&output_path)
                .await
                .map_err(|e| IngestError::CompressionFailed {
                    reason: format!("could not read output: {e}"),
                }),
            Err(e) => Err(e),
        };

        // Scratch files go away on every path; engine-internal storage must
        // not grow across repeated jobs.
        let _ = tokio::fs::remove_file(&input_path).await;
        let _ = tokio::fs::remove_file(&output_path).await;

        let output = output?;

        if output.len() as u64 > constraints.max_output_bytes {
            return Err(IngestError::StillTooLarge {
                actual: output.len() as u64,
                ceiling: constraints.max_output_bytes,
            });
        }

        progress.report(100);
        tracing::info!(
            "compressed {file_name}: {input_size} -> {} bytes",
            output.len()
        );

        Ok(MediaBlob::new(output, "video/mp4", file_name))
    }
}

/// Translate ffmpeg `-progress` key/value output into percentage ticks.
async fn forward_progress(
    stdout: tokio::process::ChildStdout,
    total_seconds: Option<f64>,
    progress: ProgressReporter,
) {
    let Some(total) = total_seconds.filter(|t| *t > 0.0) else {
        // Without a known duration there is nothing to scale against; the
        // engine reports 100 on completion instead.
        return;
    };

    let mut lines = tokio::io::BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        // out_time_us and out_time_ms both carry microseconds
        if key != "out_time_us" && key != "out_time_ms" {
            continue;
        }
        if let Ok(micros) = value.trim().parse::<i64>()
            && micros >= 0
        {
            let fraction = (micros as f64 / 1_000_000.0) / total;
            progress.report((fraction * 100.0).min(100.0) as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotone_and_clamped() {
        let (reporter, rx) = ProgressReporter::channel();

        reporter.report(10);
        assert_eq!(*rx.borrow(), 10);

        reporter.report(5); // regression dropped
        assert_eq!(*rx.borrow(), 10);

        reporter.report(80);
        assert_eq!(*rx.borrow(), 80);

        reporter.report(200); // clamped
        assert_eq!(*rx.borrow(), 100);
    }

    #[test]
    fn progress_survives_dropped_receiver() {
        let (reporter, rx) = ProgressReporter::channel();
        drop(rx);
        reporter.report(50); // must not panic
    }

    #[test]
    fn scale_filter_caps_width_without_upscaling() {
        let engine = FfmpegTranscoder::new(TranscodeConfig::default());
        assert_eq!(engine.scale_filter(1280), "scale='min(1280,iw)':-2");
    }

    #[tokio::test]
    async fn failed_compress_leaves_no_scratch_files_behind() {
        let scratch = tempfile::tempdir().unwrap();
        let config = TranscodeConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            ..TranscodeConfig::default()
        };
        let engine = FfmpegTranscoder::new(config);

        let blob = MediaBlob::new(vec![0u8; 256], "video/mp4", "garbage.mp4");
        let (job, _rx) = CompressionJob::new(
            blob,
            CompressionConstraints {
                max_output_bytes: 1024,
                max_width: 1280,
            },
        );

        // Fails either way: no ffmpeg binary, or ffmpeg rejecting the input
        assert!(engine.compress(job).await.is_err());

        // The shared scratch namespace must be clean for the next job
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn compression_job_starts_at_zero() {
        let blob = MediaBlob::new(vec![0u8; 8], "video/mp4", "a.mp4");
        let (_job, rx) = CompressionJob::new(
            blob,
            CompressionConstraints {
                max_output_bytes: 1024,
                max_width: 1280,
            },
        );
        assert_eq!(*rx.borrow(), 0);
    }
}
