//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vcomp_media::{BitrateBudget, TranscodeSettings};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parent of the per-job scratch directories
    pub work_dir: PathBuf,
    /// Whole-job deadline; exceeding it publishes a failure
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Lifetime of the presigned download URL in a success result
    pub download_url_ttl: Duration,
    /// Target output size
    pub budget: BitrateBudget,
    pub transcode: TranscodeSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vcomp"),
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            download_url_ttl: Duration::from_secs(120),
            budget: BitrateBudget::default(),
            transcode: TranscodeSettings::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let megabytes = |name: &str, default: f64| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(default)
        };

        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            job_timeout: secs("WORKER_JOB_TIMEOUT", defaults.job_timeout),
            shutdown_timeout: secs("WORKER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            download_url_ttl: secs("WORKER_DOWNLOAD_URL_TTL_SECS", defaults.download_url_ttl),
            budget: BitrateBudget {
                video_mb: megabytes("WORKER_VIDEO_TARGET_MB", defaults.budget.video_mb),
                audio_mb: megabytes("WORKER_AUDIO_TARGET_MB", defaults.budget.audio_mb),
            },
            transcode: TranscodeSettings {
                video_codec: std::env::var("WORKER_VIDEO_CODEC")
                    .unwrap_or(defaults.transcode.video_codec),
                preset: std::env::var("WORKER_PRESET").unwrap_or(defaults.transcode.preset),
                audio_codec: std::env::var("WORKER_AUDIO_CODEC")
                    .unwrap_or(defaults.transcode.audio_codec),
            },
        }
    }
}
