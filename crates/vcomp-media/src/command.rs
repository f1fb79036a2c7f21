//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

const LOG_LEVEL: &str = "error";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Seek to a timestamp (`HH:MM:SS`) before decoding.
    pub fn seek(self, timestamp: impl Into<String>) -> Self {
        self.input_arg("-ss").input_arg(timestamp)
    }

    /// Limit input duration in whole seconds.
    pub fn duration(self, seconds: u32) -> Self {
        self.input_arg("-t").input_arg(seconds.to_string())
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set video bitrate in bits per second.
    pub fn video_bitrate(self, bps: u64) -> Self {
        self.output_arg("-b:v").output_arg(bps.to_string())
    }

    /// Set audio bitrate in bits per second.
    pub fn audio_bitrate(self, bps: u64) -> Self {
        self.output_arg("-b:a").output_arg(bps.to_string())
    }

    /// Select the encoding pass and where its statistics live.
    pub fn pass(self, pass: u8, passlog: impl AsRef<Path>) -> Self {
        self.output_arg("-pass")
            .output_arg(pass.to_string())
            .output_arg("-passlogfile")
            .output_arg(passlog.as_ref().to_string_lossy().to_string())
    }

    /// Force the output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Scale output frames to `WxH`.
    pub fn size(self, size: impl Into<String>) -> Self {
        self.output_arg("-s").output_arg(size)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(LOG_LEVEL.to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Runner for FFmpeg commands with timeout and cancellation.
///
/// The child is killed when the timeout elapses, when the cancel signal
/// turns `true`, or when the run future is dropped.
pub struct FfmpegRunner {
    program: String,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
    /// Child working directory; encoders drop side files here
    working_dir: Option<PathBuf>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            cancel_rx: None,
            timeout: None,
            working_dir: None,
        }
    }

    /// Run a different executable with the same supervision.
    #[cfg(test)]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run the child inside `dir`.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_args(&cmd.build_args()).await
    }

    /// Run the program with raw arguments.
    pub async fn run_args(&self, args: &[String]) -> MediaResult<()> {
        if self.program == "ffmpeg" {
            check_ffmpeg()?;
        }

        debug!(
            cwd = ?self.working_dir(),
            "Running: {} {}",
            self.program,
            args.join(" ")
        );

        let mut command = Command::new(&self.program);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = reader.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        });

        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled = async move {
            match cancel_rx.as_mut() {
                Some(rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    d
                }
                None => std::future::pending::<Duration>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancelled => Outcome::Cancelled,
            d = deadline => Outcome::TimedOut(d),
        };

        let result = match outcome {
            Outcome::Exited(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    let tail = stderr_handle.await.unwrap_or_default();
                    return Err(MediaError::ffmpeg_failed(
                        format!("{} exited with non-zero status", self.program),
                        (!tail.is_empty()).then_some(tail),
                        status.code(),
                    ));
                }
            }
            Outcome::Cancelled => {
                info!("{} cancelled, killing process", self.program);
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            Outcome::TimedOut(d) => {
                warn!("{} timed out after {:?}, killing process", self.program, d);
                let _ = child.kill().await;
                Err(MediaError::Timeout(d))
            }
        };

        let _ = stderr_handle.await;
        result
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek("00:00:01")
            .duration(1)
            .video_codec("libx265")
            .video_bitrate(307627);

        let args = cmd.build_args();
        assert_eq!(&args[..3], ["-y", "-v", "error"]);
        assert_eq!(&args[3..7], ["-ss", "00:00:01", "-t", "1"]);
        assert_eq!(&args[7..9], ["-i", "input.mp4"]);
        assert!(args.windows(2).any(|w| w == ["-b:v", "307627"]));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_success_and_failure() {
        FfmpegRunner::new()
            .with_program("true")
            .run_args(&[])
            .await
            .unwrap();

        let err = FfmpegRunner::new()
            .with_program("false")
            .run_args(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FfmpegFailed { exit_code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_uses_working_dir() {
        let dir = tempfile::tempdir().unwrap();

        FfmpegRunner::new()
            .with_program("sh")
            .with_working_dir(dir.path())
            .run_args(&["-c".to_string(), "touch x265_2pass.log".to_string()])
            .await
            .unwrap();

        assert!(dir.path().join("x265_2pass.log").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_timeout_kills_child() {
        let started = std::time::Instant::now();
        let err = FfmpegRunner::new()
            .with_program("sleep")
            .with_timeout(Duration::from_millis(100))
            .run_args(&["5".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_cancel_kills_child() {
        let (tx, rx) = watch::channel(false);
        let runner = FfmpegRunner::new().with_program("sleep").with_cancel(rx);

        let handle = tokio::spawn(async move { runner.run_args(&["5".to_string()]).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }
}
