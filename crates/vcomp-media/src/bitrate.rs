//! Bitrate budgeting for target-size encodes.

use crate::error::{MediaError, MediaResult};

/// Kilobits in one megabyte (`8 * 1048.576`).
pub const KILOBITS_PER_MEGABYTE: f64 = 8388.608;

/// Average bitrate in kbps that fits `target_mb` megabytes into `duration_secs`.
pub fn bitrate_kbps(duration_secs: f64, target_mb: f64) -> f64 {
    target_mb * KILOBITS_PER_MEGABYTE / duration_secs
}

/// Encoder bitrate argument (bits per second) for a kbps value, rounded
/// to the nearest integer.
pub fn encoder_bitrate(kbps: f64) -> u64 {
    (kbps * 1000.0).round() as u64
}

/// Target output sizes in megabytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateBudget {
    pub video_mb: f64,
    pub audio_mb: f64,
}

impl Default for BitrateBudget {
    fn default() -> Self {
        Self {
            video_mb: 8.0,
            audio_mb: 1.0,
        }
    }
}

/// Encoder bitrates in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrates {
    pub video: u64,
    pub audio: u64,
}

impl BitrateBudget {
    /// Compute encoder bitrates for a clip of `duration_secs`.
    pub fn bitrates(&self, duration_secs: f64) -> MediaResult<Bitrates> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(MediaError::InvalidBudget(format!(
                "duration must be positive, got {}",
                duration_secs
            )));
        }
        if self.video_mb <= 0.0 || self.audio_mb <= 0.0 {
            return Err(MediaError::InvalidBudget(format!(
                "targets must be positive, got video={} audio={}",
                self.video_mb, self.audio_mb
            )));
        }
        Ok(Bitrates {
            video: encoder_bitrate(bitrate_kbps(duration_secs, self.video_mb)),
            audio: encoder_bitrate(bitrate_kbps(duration_secs, self.audio_mb)),
        })
    }
}
