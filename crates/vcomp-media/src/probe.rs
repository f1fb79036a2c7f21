//! FFprobe container metadata.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;
use vcomp_models::{Metadata, Tags};

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Extracts container metadata from a local file.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<Metadata>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FfprobeFormat {
    filename: String,
    nb_streams: i64,
    nb_programs: i64,
    format_name: String,
    format_long_name: String,
    start_time: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
    probe_score: i64,
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FfprobeTags {
    compatible_brands: String,
    major_brand: String,
    minor_version: String,
}

/// Map `ffprobe -print_format json -show_format` output to [`Metadata`].
///
/// The duration is normalized to the shortest decimal form of its
/// floating point value; an unparseable duration maps to an empty string.
pub fn parse_ffprobe_output(stdout: &[u8]) -> MediaResult<Metadata> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    let format = probe.format;

    let duration = format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .map(Metadata::format_duration)
        .unwrap_or_default();

    Ok(Metadata {
        filename: format.filename,
        nb_streams: format.nb_streams,
        nb_programs: format.nb_programs,
        format_name: format.format_name,
        format_long_name: format.format_long_name,
        start_time: format.start_time.unwrap_or_default(),
        duration,
        size: format.size.unwrap_or_default(),
        bit_rate: format.bit_rate.unwrap_or_default(),
        probe_score: format.probe_score,
        tags: Tags {
            compatible_brands: format.tags.compatible_brands,
            major_brand: format.tags.major_brand,
            minor_version: format.tags.minor_version,
        },
    })
}

/// [`Prober`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    timeout: Duration,
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl FfprobeProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> MediaResult<Metadata> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        check_ffprobe()?;
        debug!("Probing {}", path.display());

        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| MediaError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(MediaError::ffprobe_failed(
                "FFprobe failed",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        parse_ffprobe_output(&output.stdout)
    }
}
