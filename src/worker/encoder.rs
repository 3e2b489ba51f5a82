// GIF encoder: the external ffmpeg process

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::config::GifConfig;
use crate::error::{Result, SentryError};
use crate::tools;

/// Renders a short looping clip of `video` into `output`.
pub trait Encoder {
    fn encode(&self, video: &Path, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegGifEncoder {
    pub config: GifConfig,
}

impl FfmpegGifEncoder {
    pub fn new(config: GifConfig) -> Self {
        Self { config }
    }

    /// ffmpeg arguments for the leading window of `video`. The output format
    /// is forced because the temp name does not end in `.gif`.
    pub fn gif_args(&self, video: &Path, output: &Path) -> Vec<String> {
        let filter = format!("fps={},scale={}:-1:flags=lanczos", self.config.fps, self.config.width);
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(), "error".into(),
            "-ss".into(), format_duration(self.config.start_secs),
            "-t".into(), format_duration(self.config.seconds),
            "-i".into(), video.to_string_lossy().to_string(),
            "-vf".into(), filter,
            "-f".into(), "gif".into(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl Encoder for FfmpegGifEncoder {
    fn encode(&self, video: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(tools::ffmpeg_path());
        cmd.args(self.gif_args(video, output));

        let result = tools::run_with_timeout(
            &mut cmd,
            "ffmpeg",
            Duration::from_secs(self.config.timeout_secs),
        )?;

        if !result.status.success() {
            return Err(SentryError::Encoder(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                result.stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Format seconds as HH:MM:SS.mmm for ffmpeg.
fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = seconds % 60.0;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}
