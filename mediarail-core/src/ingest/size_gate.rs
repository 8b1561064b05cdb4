//! Size gating
//!
//! The single switch that decides whether a selected file goes through the
//! transcode engine at all. Pure and synchronous: byte length against the
//! configured ceiling, nothing else.

use crate::media::MediaBlob;

/// Outcome of the size gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// File fits under the ceiling; flows straight to upload
    WithinLimit,
    /// File exceeds the ceiling; compression is required first
    OverLimit,
}

/// Decide whether a blob requires compression before upload.
pub fn decide(blob: &MediaBlob, size_ceiling: u64) -> GateDecision {
    if blob.len() > size_ceiling {
        GateDecision::OverLimit
    } else {
        GateDecision::WithinLimit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_of(len: usize) -> MediaBlob {
        MediaBlob::new(vec![0u8; len], "video/mp4", "clip.mp4")
    }

    #[test]
    fn under_ceiling_is_within_limit() {
        assert_eq!(decide(&blob_of(100), 1024), GateDecision::WithinLimit);
    }

    #[test]
    fn exactly_at_ceiling_is_within_limit() {
        assert_eq!(decide(&blob_of(1024), 1024), GateDecision::WithinLimit);
    }

    #[test]
    fn one_byte_over_is_over_limit() {
        assert_eq!(decide(&blob_of(1025), 1024), GateDecision::OverLimit);
    }

    #[test]
    fn decision_is_deterministic() {
        let blob = blob_of(2048);
        for _ in 0..3 {
            assert_eq!(decide(&blob, 1024), GateDecision::OverLimit);
        }
    }
}
