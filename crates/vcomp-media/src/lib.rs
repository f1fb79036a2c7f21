//! FFmpeg CLI wrapper for video compression.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A runner with timeout and cancellation that kills the child process
//! - FFprobe container metadata extraction
//! - Two-pass target-size transcoding
//! - Single-frame thumbnail rendering
//! - Bitrate budgeting from a target output size

pub mod bitrate;
pub mod command;
pub mod error;
pub mod probe;
pub mod thumbnail;
pub mod transcode;

pub use bitrate::{bitrate_kbps, encoder_bitrate, BitrateBudget, Bitrates};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{parse_ffprobe_output, FfprobeProber, Prober};
pub use thumbnail::{FfmpegThumbnailer, Thumbnailer};
pub use transcode::{FfmpegTranscoder, TranscodeJob, TranscodeSettings, Transcoder};
