//! Two-pass target-size transcoding.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::bitrate::Bitrates;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// Encoder choices shared by both passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub video_codec: String,
    pub preset: String,
    pub audio_codec: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx265".to_string(),
            preset: "medium".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

/// One transcode invocation. All paths should live in the job's scratch dir.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Working directory for both passes
    pub scratch: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Prefix for the encoder's pass statistics files
    pub passlog: PathBuf,
    pub bitrates: Bitrates,
}

impl TranscodeJob {
    /// Lay out output and pass-log paths inside `scratch`.
    pub fn in_scratch(scratch: &Path, input: PathBuf, bitrates: Bitrates) -> Self {
        Self {
            scratch: scratch.to_path_buf(),
            input,
            output: scratch.join("compressed.mp4"),
            passlog: scratch.join("passlog"),
            bitrates,
        }
    }
}

/// Produces a compressed copy of a local file in two passes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Analysis pass; writes only the pass statistics.
    async fn first_pass(&self, job: &TranscodeJob) -> MediaResult<()>;

    /// Encoding pass; writes `job.output`.
    async fn second_pass(&self, job: &TranscodeJob) -> MediaResult<()>;
}

fn base_command(
    settings: &TranscodeSettings,
    job: &TranscodeJob,
    output: &Path,
    pass: u8,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(&job.input, output)
        .video_codec(&settings.video_codec)
        .preset(&settings.preset)
        .video_bitrate(job.bitrates.video)
        .pass(pass, &job.passlog);

    // libx265 ignores -passlogfile and names its own stats file.
    if settings.video_codec == "libx265" {
        cmd = cmd
            .output_arg("-x265-params")
            .output_arg(format!("stats={}", job.passlog.with_extension("x265.log").display()));
    }

    cmd.audio_codec(&settings.audio_codec)
        .audio_bitrate(job.bitrates.audio)
}

/// Analysis pass; output is discarded.
pub fn pass_one_command(settings: &TranscodeSettings, job: &TranscodeJob) -> FfmpegCommand {
    base_command(settings, job, Path::new(NULL_SINK), 1).format("mp4")
}

/// Encoding pass writing `job.output`.
pub fn pass_two_command(settings: &TranscodeSettings, job: &TranscodeJob) -> FfmpegCommand {
    base_command(settings, job, &job.output, 2)
}

/// [`Transcoder`] running two FFmpeg passes.
pub struct FfmpegTranscoder {
    settings: TranscodeSettings,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegTranscoder {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self {
            settings,
            cancel_rx: None,
        }
    }

    /// Kill the running pass when `cancel_rx` turns `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn runner(&self, job: &TranscodeJob) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new().with_working_dir(&job.scratch);
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        runner
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn first_pass(&self, job: &TranscodeJob) -> MediaResult<()> {
        info!(
            video_bps = job.bitrates.video,
            audio_bps = job.bitrates.audio,
            "Transcode pass 1: {}",
            job.input.display()
        );
        self.runner(job).run(&pass_one_command(&self.settings, job)).await
    }

    async fn second_pass(&self, job: &TranscodeJob) -> MediaResult<()> {
        info!("Transcode pass 2: {}", job.output.display());
        self.runner(job).run(&pass_two_command(&self.settings, job)).await
    }
}
