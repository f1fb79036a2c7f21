//! Thumbnail generation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

const THUMBNAIL_TIMESTAMP: &str = "00:00:01";
const THUMBNAIL_SIZE: &str = "400x300";

/// Renders a still image from a (possibly truncated) video file.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn thumbnail(&self, video: &Path, output: &Path) -> MediaResult<()>;
}

/// One 400x300 JPEG frame taken at t=1s.
pub fn thumbnail_command(video: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video, output)
        .seek(THUMBNAIL_TIMESTAMP)
        .duration(1)
        .size(THUMBNAIL_SIZE)
        .single_frame()
        .format("mjpeg")
}

/// [`Thumbnailer`] backed by FFmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    timeout: Duration,
}

impl Default for FfmpegThumbnailer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl FfmpegThumbnailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Thumbnailer for FfmpegThumbnailer {
    async fn thumbnail(&self, video: &Path, output: &Path) -> MediaResult<()> {
        let cmd = thumbnail_command(video, output);
        FfmpegRunner::new().with_timeout(self.timeout).run(&cmd).await
    }
}
