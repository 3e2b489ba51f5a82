// Runtime configuration: directory layout plus pipeline tunables
//
// Resolution order for directories:
// 1) CLI flag / environment variable (handled by clap in cli.rs)
// 2) Defaults under the user's home directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Result, SentryError};

/// Where every stage lives on disk. The source tree is read-only; everything
/// else sits under `base_dir`.
#[derive(Debug, Clone)]
pub struct Layout {
    pub base_dir: PathBuf,
    pub source_dir: PathBuf,
}

impl Layout {
    pub fn new(base_dir: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            source_dir: source_dir.into(),
        }
    }

    /// Layout from optional overrides, falling back to `~/tesla-alerts` and the
    /// default dashcam mount.
    pub fn resolve(base_dir: Option<PathBuf>, source_dir: Option<PathBuf>) -> Self {
        let base_dir = base_dir.unwrap_or_else(default_base_dir);
        let source_dir = source_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR));
        Self::new(base_dir, source_dir)
    }

    pub fn intake_dir(&self) -> PathBuf {
        self.base_dir.join(INTAKE_FOLDER)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.base_dir.join(PROCESSED_FOLDER)
    }

    pub fn alerts_dir(&self) -> PathBuf {
        self.base_dir.join(ALERTS_FOLDER)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.base_dir.join(MEDIA_FOLDER)
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.base_dir.join(JOBS_FOLDER).join(GIF_QUEUE_FOLDER)
    }

    /// Create all owned directories. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.intake_dir(),
            self.processed_dir(),
            self.alerts_dir(),
            self.media_dir(),
            self.queue_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn default_base_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(DEFAULT_BASE_FOLDER))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_FOLDER))
}

/// Stability gate timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub window_secs: u64,
    pub poll_secs: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window_secs: STABLE_WINDOW_SECS,
            poll_secs: STABLE_POLL_SECS,
        }
    }
}

impl StabilityConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

/// Frame sampling and the alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub sample_fps: f64,
    pub max_seconds: u64,
    pub max_frames: usize,
    pub classes: Vec<u32>,
    pub min_confidence: f64,
    pub min_hits: usize,
    /// External detector program and arguments (see detect::command).
    pub detector_command: Vec<String>,
    pub detector_timeout_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sample_fps: SAMPLE_FPS,
            max_seconds: SAMPLE_MAX_SECONDS,
            max_frames: SAMPLE_MAX_FRAMES,
            classes: DETECT_CLASSES.to_vec(),
            min_confidence: MIN_CONFIDENCE,
            min_hits: MIN_HITS_PER_CLIP,
            detector_command: Vec::new(),
            detector_timeout_secs: DETECTOR_TIMEOUT_SECS,
        }
    }
}

/// GIF encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GifConfig {
    pub start_secs: f64,
    pub seconds: f64,
    pub fps: u32,
    pub width: u32,
    pub timeout_secs: u64,
}

impl Default for GifConfig {
    fn default() -> Self {
        Self {
            start_secs: GIF_START_SECS,
            seconds: GIF_SECONDS,
            fps: GIF_FPS,
            width: GIF_SCALE_WIDTH,
            timeout_secs: ENCODER_TIMEOUT_SECS,
        }
    }
}

/// Loop pacing for both services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub processor_ms: u64,
    pub worker_idle_ms: u64,
    pub worker_between_jobs_ms: u64,
    pub stale_claim_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            processor_ms: PROCESSOR_POLL_MS,
            worker_idle_ms: WORKER_IDLE_POLL_MS,
            worker_between_jobs_ms: WORKER_BETWEEN_JOBS_MS,
            stale_claim_secs: STALE_CLAIM_SECS,
        }
    }
}

/// All tunables. Every section and field is optional in the JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stability: StabilityConfig,
    pub detection: DetectionConfig,
    pub gif: GifConfig,
    pub poll: PollConfig,
}

impl Config {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    SentryError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                serde_json::from_str::<Config>(&raw).map_err(|e| {
                    SentryError::Config(format!("cannot parse {}: {}", p.display(), e))
                })?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.min_confidence) {
            return Err(SentryError::Config(format!(
                "detection.min_confidence must be within [0, 1], got {}",
                d.min_confidence
            )));
        }
        if d.sample_fps <= 0.0 {
            return Err(SentryError::Config("detection.sample_fps must be positive".to_string()));
        }
        if self.stability.poll_secs == 0 && self.stability.window_secs > 0 {
            return Err(SentryError::Config("stability.poll_secs must be positive".to_string()));
        }
        if self.gif.seconds <= 0.0 || self.gif.fps == 0 || self.gif.width == 0 {
            return Err(SentryError::Config("gif window, fps and width must be positive".to_string()));
        }
        // A live claim is never older than one encoder run.
        if self.poll.stale_claim_secs <= self.gif.timeout_secs {
            return Err(SentryError::Config(format!(
                "poll.stale_claim_secs ({}) must exceed gif.timeout_secs ({})",
                self.poll.stale_claim_secs, self.gif.timeout_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/data", "/teslacam");
        assert_eq!(layout.intake_dir(), PathBuf::from("/data/inbox"));
        assert_eq!(layout.processed_dir(), PathBuf::from("/data/processed"));
        assert_eq!(layout.queue_dir(), PathBuf::from("/data/jobs/gif_queue"));
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path(), tmp.path().join("src"));
        layout.ensure_dirs().unwrap();
        layout.ensure_dirs().unwrap();
        assert!(layout.intake_dir().is_dir());
        assert!(layout.media_dir().is_dir());
        assert!(layout.queue_dir().is_dir());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sentry.json");
        std::fs::write(&path, r#"{"detection": {"min_hits": 5}}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.detection.min_hits, 5);
        assert!((config.detection.min_confidence - MIN_CONFIDENCE).abs() < 1e-9);
        assert_eq!(config.stability.window_secs, STABLE_WINDOW_SECS);
        assert_eq!(config.gif.fps, GIF_FPS);
    }

    #[test]
    fn test_stale_claim_age_must_exceed_encoder_timeout() {
        let mut config = Config::default();
        config.gif.timeout_secs = 600;
        assert!(matches!(config.validate(), Err(SentryError::Config(_))));

        config.poll.stale_claim_secs = 600;
        assert!(config.validate().is_err());

        config.poll.stale_claim_secs = 1800;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let mut config = Config::default();
        config.detection.min_confidence = 1.5;
        assert!(matches!(config.validate(), Err(SentryError::Config(_))));
    }
}
