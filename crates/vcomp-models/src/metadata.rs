//! Probe-derived container metadata.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Container metadata as reported by the probe tool.
///
/// `duration` stays string-encoded seconds on the wire; consumers parse it
/// with [`Metadata::duration_secs`] before doing bitrate math.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub nb_streams: i64,
    #[serde(default)]
    pub nb_programs: i64,
    #[serde(default)]
    pub format_name: String,
    #[serde(default)]
    pub format_long_name: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub bit_rate: String,
    #[serde(default)]
    pub probe_score: i64,
    #[serde(default)]
    pub tags: Tags,
}

/// Container tag fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub compatible_brands: String,
    #[serde(default)]
    pub major_brand: String,
    #[serde(default)]
    pub minor_version: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum DurationError {
    #[error("duration is missing")]
    Missing,

    #[error("duration is not numeric: {0:?}")]
    NotNumeric(String),

    #[error("duration must be positive, got {0}")]
    NotPositive(f64),
}

impl Metadata {
    /// Parse the string-encoded duration into seconds.
    ///
    /// Rejects empty, non-numeric, non-finite and non-positive values.
    pub fn duration_secs(&self) -> Result<f64, DurationError> {
        let raw = self.duration.trim();
        if raw.is_empty() {
            return Err(DurationError::Missing);
        }
        let secs: f64 = raw
            .parse()
            .map_err(|_| DurationError::NotNumeric(raw.to_string()))?;
        if !secs.is_finite() {
            return Err(DurationError::NotNumeric(raw.to_string()));
        }
        if secs <= 0.0 {
            return Err(DurationError::NotPositive(secs));
        }
        Ok(secs)
    }

    /// Encode seconds the way the probe mapping stores them (shortest form).
    pub fn format_duration(secs: f64) -> String {
        format!("{}", secs)
    }
}
