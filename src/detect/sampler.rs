// ffmpeg-backed frame sampler
//
// Probes the source frame rate, then streams every `step`-th frame from the
// first `max_seconds` as MJPEG over a pipe. Frames are decoded lazily as the
// caller pulls them; dropping the iterator kills ffmpeg.

use std::io::{BufReader, Bytes, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use super::{Frame, FrameSampler};
use crate::config::DetectionConfig;
use crate::constants::{FALLBACK_SOURCE_FPS, SAMPLER_PROBE_TIMEOUT_SECS, SNAPSHOT_JPEG_QSCALE};
use crate::error::{Result, SentryError};
use crate::tools;

#[derive(Debug, Clone)]
pub struct FfmpegSampler {
    pub sample_fps: f64,
    pub max_seconds: u64,
}

impl FfmpegSampler {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            sample_fps: config.sample_fps,
            max_seconds: config.max_seconds,
        }
    }
}

impl FrameSampler for FfmpegSampler {
    fn sample<'a>(&'a self, video: &Path) -> Result<Box<dyn Iterator<Item = Result<Frame>> + 'a>> {
        if !video.is_file() {
            return Err(SentryError::VideoNotFound(video.display().to_string()));
        }

        let fps = probe_fps(video).unwrap_or(FALLBACK_SOURCE_FPS);
        let step = sample_step(fps, self.sample_fps);

        let mut cmd = Command::new(tools::ffmpeg_path());
        cmd.args(sample_args(video, step, self.max_seconds))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| SentryError::Sampler(format!("Failed to run ffmpeg: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SentryError::Sampler("ffmpeg stdout unavailable".to_string()))?;

        Ok(Box::new(SampledFrames {
            child: Some(child),
            splitter: MjpegSplitter::new(BufReader::new(stdout)),
            step,
            ordinal: 0,
        }))
    }
}

/// Source frames between samples: `max(round(source_fps / sample_fps), 1)`.
pub fn sample_step(source_fps: f64, sample_fps: f64) -> u64 {
    if source_fps <= 0.0 || sample_fps <= 0.0 {
        return 1;
    }
    ((source_fps / sample_fps).round() as u64).max(1)
}

fn sample_args(video: &Path, step: u64, max_seconds: u64) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(), "error".into(),
        "-t".into(), max_seconds.to_string(),
        "-i".into(), video.to_string_lossy().to_string(),
        "-vf".into(), format!("select=not(mod(n\\,{}))", step),
        "-vsync".into(), "vfr".into(),
        "-f".into(), "image2pipe".into(),
        "-c:v".into(), "mjpeg".into(),
        "-q:v".into(), SNAPSHOT_JPEG_QSCALE.to_string(),
        "pipe:1".into(),
    ]
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Option<Vec<ProbeStream>>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Frame rate of the first video stream, if ffprobe can tell us.
pub fn probe_fps(video: &Path) -> Option<f64> {
    let mut cmd = Command::new(tools::ffprobe_path());
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams", "v:0"])
        .arg(video);

    let output = tools::run_with_timeout(
        &mut cmd,
        "ffprobe",
        Duration::from_secs(SAMPLER_PROBE_TIMEOUT_SECS),
    )
    .ok()?;
    if !output.status.success() {
        return None;
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout).ok()?;
    let stream = parsed.streams?.into_iter().next()?;
    parse_frame_rate(stream.avg_frame_rate.as_deref())
        .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()))
}

/// Parse frame rate string like "30000/1001" to f64
fn parse_frame_rate(rate_str: Option<&str>) -> Option<f64> {
    let rate_str = rate_str?;
    let fps = if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        rate_str.parse().ok()?
    };
    (fps > 0.0).then_some(fps)
}

struct SampledFrames {
    child: Option<Child>,
    splitter: MjpegSplitter<BufReader<ChildStdout>>,
    step: u64,
    ordinal: u64,
}

impl Iterator for SampledFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;

        match self.splitter.next_jpeg() {
            Ok(Some(jpeg)) => {
                let frame = Frame { index: self.ordinal * self.step, jpeg };
                self.ordinal += 1;
                Some(Ok(frame))
            }
            Ok(None) => {
                let mut child = self.child.take()?;
                match child.wait() {
                    // An undecodable clip that produced nothing is a failure;
                    // a stream that ends early after some frames is just short.
                    Ok(status) if !status.success() && self.ordinal == 0 => Some(Err(
                        SentryError::Sampler(format!("ffmpeg exited with {}", status)),
                    )),
                    Ok(_) => None,
                    Err(e) => Some(Err(SentryError::Io(e))),
                }
            }
            Err(e) => {
                self.kill();
                Some(Err(SentryError::Io(e)))
            }
        }
    }
}

impl SampledFrames {
    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for SampledFrames {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Splits a concatenated JPEG stream on SOI/EOI markers.
pub struct MjpegSplitter<R: Read> {
    bytes: Bytes<R>,
}

impl<R: Read> MjpegSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self { bytes: reader.bytes() }
    }

    /// Next complete image, or `None` at end of stream. A truncated trailing
    /// image is dropped.
    pub fn next_jpeg(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut prev = 0u8;
        loop {
            let b = match self.bytes.next() {
                Some(b) => b?,
                None => return Ok(None),
            };
            if prev == 0xFF && b == 0xD8 {
                break;
            }
            prev = b;
        }

        let mut image = vec![0xFF, 0xD8];
        let mut prev = 0u8;
        loop {
            let b = match self.bytes.next() {
                Some(b) => b?,
                None => return Ok(None),
            };
            image.push(b);
            if prev == 0xFF && b == 0xD9 {
                return Ok(Some(image));
            }
            prev = b;
        }
    }
}
