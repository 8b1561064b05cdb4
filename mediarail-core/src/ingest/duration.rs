//! Duration probing
//!
//! Duration is best-effort metadata, never a correctness requirement: any
//! failure yields 0 seconds rather than failing the pipeline. Container
//! headers are parsed in memory first (MP4 moov/mvhd, then AVI avih); if
//! neither matches, a headless `ffprobe` decode is attempted through a
//! scratch file that is removed on every exit path.

use std::path::PathBuf;

use crate::media::MediaBlob;

/// Probes playable duration from media blobs.
pub struct DurationProbe {
    scratch_dir: PathBuf,
}

impl DurationProbe {
    /// `scratch_dir` of `None` falls back to the system temp directory.
    pub fn new(scratch_dir: Option<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Measure duration in whole seconds, rounded; 0 on any failure.
    pub async fn measure(&self, blob: &MediaBlob) -> u64 {
        if let Some(seconds) = duration_from_headers(blob.bytes()) {
            return round_seconds(seconds);
        }

        match self.ffprobe_duration(blob).await {
            Some(seconds) => round_seconds(seconds),
            None => {
                tracing::debug!("could not determine duration for {}", blob.file_name());
                0
            }
        }
    }

    /// Decode-based fallback via the ffprobe binary.
    ///
    /// The blob is staged into the scratch directory under a unique name
    /// and removed again whether or not the probe succeeds.
    async fn ffprobe_duration(&self, blob: &MediaBlob) -> Option<f64> {
        let scratch_path = self
            .scratch_dir
            .join(format!("mediarail-probe-{}", uuid::Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&scratch_path, blob.bytes()).await {
            tracing::debug!("could not stage probe file: {e}");
            return None;
        }

        let output = tokio::process::Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(&scratch_path)
            .output()
            .await;

        let _ = tokio::fs::remove_file(&scratch_path).await;

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::debug!(
                    "ffprobe failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return None;
            }
            Err(e) => {
                tracing::debug!("ffprobe not runnable: {e}");
                return None;
            }
        };

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
    }
}

fn round_seconds(seconds: f64) -> u64 {
    seconds.round().max(0.0) as u64
}

/// Parse duration directly from container headers, if recognizable.
pub fn duration_from_headers(data: &[u8]) -> Option<f64> {
    if let Some(seconds) = mp4_duration(data) {
        tracing::trace!("mvhd header duration: {seconds}s");
        return Some(seconds);
    }
    if let Some(seconds) = avi_duration(data) {
        tracing::trace!("avih header duration: {seconds}s");
        return Some(seconds);
    }
    None
}

/// MP4 duration from the mvhd box inside the moov atom.
fn mp4_duration(data: &[u8]) -> Option<f64> {
    let moov = find_atom(data, b"moov")?;
    let mvhd = find_atom(moov, b"mvhd")?;
    parse_mvhd(mvhd)
}

/// Walk top-level atoms looking for `atom_type`, returning its payload.
fn find_atom<'a>(data: &'a [u8], atom_type: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let size = u32::from_be_bytes(data[pos..pos + 4].try_into().ok()?) as usize;
        let found_type = &data[pos + 4..pos + 8];

        if found_type == atom_type {
            // size 0 means "extends to end of file"; 1..8 cannot even cover
            // the atom's own header
            let end = if size == 0 {
                data.len()
            } else if size < 8 {
                return None;
            } else {
                pos.checked_add(size)?.min(data.len())
            };
            return Some(&data[pos + 8..end.max(pos + 8)]);
        }

        // size 1 means 64-bit size, which we are not going to see in a
        // header probe of in-memory uploads; treat it like any runt atom
        if size < 8 {
            return None;
        }
        pos = pos.checked_add(size)?;
    }

    None
}

/// Duration in seconds from an mvhd payload (version 0 or 1).
fn parse_mvhd(mvhd: &[u8]) -> Option<f64> {
    let version = *mvhd.first()?;

    let (timescale, duration) = match version {
        0 => {
            // version+flags(4) created(4) modified(4) timescale(4) duration(4)
            if mvhd.len() < 20 {
                return None;
            }
            let timescale = u32::from_be_bytes(mvhd[12..16].try_into().ok()?) as u64;
            let duration = u32::from_be_bytes(mvhd[16..20].try_into().ok()?) as u64;
            (timescale, duration)
        }
        1 => {
            // version+flags(4) created(8) modified(8) timescale(4) duration(8)
            if mvhd.len() < 32 {
                return None;
            }
            let timescale = u32::from_be_bytes(mvhd[20..24].try_into().ok()?) as u64;
            let duration = u64::from_be_bytes(mvhd[24..32].try_into().ok()?);
            (timescale, duration)
        }
        _ => return None,
    };

    if timescale == 0 {
        return None;
    }
    Some(duration as f64 / timescale as f64)
}

/// AVI duration from the avih chunk inside the hdrl LIST.
fn avi_duration(data: &[u8]) -> Option<f64> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"AVI " {
        return None;
    }

    let mut pos = 12usize;
    while pos + 8 < data.len() {
        let chunk_id = &data[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes(data[pos + 4..pos + 8].try_into().ok()?) as usize;

        if chunk_id == b"LIST" && pos + 12 < data.len() && &data[pos + 8..pos + 12] == b"hdrl" {
            if let Some(seconds) = avih_duration_in_hdrl(data, pos + 12, pos + chunk_size) {
                return Some(seconds);
            }
        }

        pos = pos.checked_add(8 + chunk_size)?;
        if pos % 2 == 1 {
            pos += 1; // chunks align to 2-byte boundaries
        }
    }

    None
}

fn avih_duration_in_hdrl(data: &[u8], start: usize, end: usize) -> Option<f64> {
    let mut pos = start;

    while pos + 8 < end && pos + 8 < data.len() {
        let chunk_id = &data[pos..pos + 4];
        let chunk_size = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().ok()?) as usize;

        if chunk_id == b"avih" && pos + 8 + 20 <= data.len() {
            let header = &data[pos + 8..];
            let micros_per_frame = u32::from_le_bytes(header[0..4].try_into().ok()?);
            let total_frames = u32::from_le_bytes(header[16..20].try_into().ok()?);

            if micros_per_frame > 0 && total_frames > 0 {
                let seconds = (total_frames as f64 * micros_per_frame as f64) / 1_000_000.0;
                // Reject absurd values rather than persist garbage metadata
                if (0.1..=86_400.0).contains(&seconds) {
                    return Some(seconds);
                }
                tracing::debug!("implausible AVI duration {seconds}s ignored");
            }
        }

        pos = pos.checked_add(8 + chunk_size)?;
        if pos % 2 == 1 {
            pos += 1;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal MP4: a moov atom containing a version-0 mvhd.
    fn mp4_fixture(timescale: u32, duration: u32) -> Vec<u8> {
        let mut mvhd = vec![0u8; 28];
        mvhd[12..16].copy_from_slice(&timescale.to_be_bytes());
        mvhd[16..20].copy_from_slice(&duration.to_be_bytes());

        let mut mvhd_box = Vec::new();
        mvhd_box.extend_from_slice(&((mvhd.len() as u32 + 8).to_be_bytes()));
        mvhd_box.extend_from_slice(b"mvhd");
        mvhd_box.extend_from_slice(&mvhd);

        let mut moov = Vec::new();
        moov.extend_from_slice(&((mvhd_box.len() as u32 + 8).to_be_bytes()));
        moov.extend_from_slice(b"moov");
        moov.extend_from_slice(&mvhd_box);
        moov
    }

    /// Minimal AVI: RIFF header with a hdrl LIST holding an avih chunk.
    fn avi_fixture(micros_per_frame: u32, total_frames: u32) -> Vec<u8> {
        let mut avih = vec![0u8; 56];
        avih[0..4].copy_from_slice(&micros_per_frame.to_le_bytes());
        avih[16..20].copy_from_slice(&total_frames.to_le_bytes());

        let mut hdrl = Vec::new();
        hdrl.extend_from_slice(b"hdrl");
        hdrl.extend_from_slice(b"avih");
        hdrl.extend_from_slice(&(avih.len() as u32).to_le_bytes());
        hdrl.extend_from_slice(&avih);

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((4 + hdrl.len() as u32 + 8).to_le_bytes()));
        out.extend_from_slice(b"AVI ");
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&(hdrl.len() as u32).to_le_bytes());
        out.extend_from_slice(&hdrl);
        out
    }

    #[test]
    fn mp4_mvhd_duration() {
        let data = mp4_fixture(1000, 93_500); // 93.5 seconds
        let seconds = duration_from_headers(&data).unwrap();
        assert!((seconds - 93.5).abs() < 1e-9);
    }

    #[test]
    fn mp4_zero_timescale_is_rejected() {
        let data = mp4_fixture(0, 1000);
        assert!(duration_from_headers(&data).is_none());
    }

    #[test]
    fn avi_avih_duration() {
        // 40000 us/frame (25 fps) * 250 frames = 10 seconds
        let data = avi_fixture(40_000, 250);
        let seconds = duration_from_headers(&data).unwrap();
        assert!((seconds - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_size_moov_spans_the_rest_of_the_buffer() {
        // A size-0 moov header followed by a real mvhd still parses
        let mut data = mp4_fixture(1000, 5_000);
        data[0..4].copy_from_slice(&0u32.to_be_bytes());
        let seconds = duration_from_headers(&data).unwrap();
        assert!((seconds - 5.0).abs() < 1e-9);
    }

    #[test]
    fn runt_atoms_yield_none_without_panicking() {
        // Bare size-0 moov header with no payload at all
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        assert!(duration_from_headers(&data).is_none());

        // Declared size smaller than the atom header itself
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 16]);
        assert!(duration_from_headers(&data).is_none());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(duration_from_headers(b"not a media file at all").is_none());
        assert!(duration_from_headers(&[]).is_none());
    }

    #[tokio::test]
    async fn measure_is_zero_and_cleans_scratch_on_unparseable_input() {
        let scratch = tempfile::tempdir().unwrap();
        let probe = DurationProbe::new(Some(scratch.path().to_path_buf()));
        let blob = MediaBlob::new(vec![0u8; 32], "video/mp4", "junk.mp4");

        // Header parse fails and ffprobe (if present) cannot decode zeros
        assert_eq!(probe.measure(&blob).await, 0);

        // Staged probe file must not survive the attempt
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn measure_rounds_header_duration() {
        let probe = DurationProbe::new(None);
        let blob = MediaBlob::new(mp4_fixture(1000, 93_500), "video/mp4", "clip.mp4");
        assert_eq!(probe.measure(&blob).await, 94);
    }
}
