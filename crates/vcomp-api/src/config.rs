//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Lifetime of presigned upload URLs
    pub upload_url_ttl: Duration,
    /// Lifetime of presigned thumbnail URLs
    pub thumbnail_url_ttl: Duration,
    /// Deadline for one ffprobe run
    pub probe_timeout: Duration,
    /// Deadline for one thumbnail render
    pub thumbnail_timeout: Duration,
    /// How long a status poll waits for a result before answering "processing"
    pub status_poll_timeout: Duration,
    /// A job with no result this long after publication is reported stale
    pub stale_job_after: Duration,
    /// Index entries older than this are evicted
    pub result_retention: Duration,
    /// Maximum concurrent cleanup deletions
    pub cleanup_max_concurrent: usize,
    /// Interval between cleanup queue scans
    pub cleanup_tick: Duration,
    /// Bytes fetched from the start of an object to render a thumbnail
    pub thumbnail_range_bytes: u64,
    /// Parent of per-request scratch directories
    pub scratch_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            upload_url_ttl: Duration::from_secs(360),
            thumbnail_url_ttl: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(5),
            thumbnail_timeout: Duration::from_secs(30),
            status_poll_timeout: Duration::from_secs(4),
            stale_job_after: Duration::from_secs(3600),
            result_retention: Duration::from_secs(24 * 3600),
            cleanup_max_concurrent: 8,
            cleanup_tick: Duration::from_millis(1000),
            thumbnail_range_bytes: 1_048_575,
            scratch_dir: std::env::temp_dir().join("vcomp-api"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            env_parse(name).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            upload_url_ttl: secs("UPLOAD_URL_TTL_SECS", defaults.upload_url_ttl),
            thumbnail_url_ttl: secs("THUMBNAIL_URL_TTL_SECS", defaults.thumbnail_url_ttl),
            probe_timeout: secs("PROBE_TIMEOUT_SECS", defaults.probe_timeout),
            thumbnail_timeout: secs("THUMBNAIL_TIMEOUT_SECS", defaults.thumbnail_timeout),
            status_poll_timeout: secs("STATUS_POLL_TIMEOUT_SECS", defaults.status_poll_timeout),
            stale_job_after: secs("STALE_JOB_AFTER_SECS", defaults.stale_job_after),
            result_retention: secs("RESULT_RETENTION_SECS", defaults.result_retention),
            cleanup_max_concurrent: env_parse::<usize>("CLEANUP_MAX_CONCURRENT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.cleanup_max_concurrent),
            cleanup_tick: env_parse("CLEANUP_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cleanup_tick),
            thumbnail_range_bytes: env_parse::<u64>("THUMBNAIL_RANGE_BYTES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.thumbnail_range_bytes),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
