// Clip Sentry Constants
// Defaults for every tunable live here; config.rs layers a JSON file on top.

// Paths (relative to the base directory)
pub const DEFAULT_BASE_FOLDER: &str = "tesla-alerts";
pub const DEFAULT_SOURCE_DIR: &str = "/mnt/teslacam/TeslaCam";
pub const INTAKE_FOLDER: &str = "inbox";
pub const PROCESSED_FOLDER: &str = "processed";
pub const ALERTS_FOLDER: &str = "alerts";
pub const MEDIA_FOLDER: &str = "media";
pub const JOBS_FOLDER: &str = "jobs";
pub const GIF_QUEUE_FOLDER: &str = "gif_queue";

// Environment overrides
pub const ENV_BASE_DIR: &str = "SENTRY_BASE_DIR";
pub const ENV_SOURCE_DIR: &str = "SENTRY_SOURCE_DIR";
pub const ENV_FFMPEG_PATH: &str = "SENTRY_FFMPEG_PATH";
pub const ENV_FFPROBE_PATH: &str = "SENTRY_FFPROBE_PATH";

// File naming
pub const HIDDEN_PREFIX: char = '.';
pub const TEMP_SUFFIX: &str = ".tmp";
pub const ERROR_PREFIX: &str = "error_";
pub const CLIP_EXTENSIONS: [&str; 1] = ["mp4"];

// Job queue file states: <id>.json -> <id>.json.processing -> <id>.json.done
pub const JOB_PENDING_SUFFIX: &str = ".json";
pub const JOB_CLAIMED_SUFFIX: &str = ".json.processing";
pub const JOB_DONE_SUFFIX: &str = ".json.done";

// Stability gate
pub const STABLE_WINDOW_SECS: u64 = 8;
pub const STABLE_POLL_SECS: u64 = 2;

// Frame sampling
pub const SAMPLE_FPS: f64 = 3.0;
pub const SAMPLE_MAX_SECONDS: u64 = 10;
pub const SAMPLE_MAX_FRAMES: usize = 30;
pub const FALLBACK_SOURCE_FPS: f64 = 30.0;
pub const SNAPSHOT_JPEG_QSCALE: u32 = 2; // ffmpeg -q:v, 2 is near-lossless

// Detection rule (COCO ids: 0 person, 1 bicycle, 2 car, 3 motorcycle, 4 airplane, 5 bus, 7 truck)
pub const DETECT_CLASSES: [u32; 7] = [0, 1, 2, 3, 4, 5, 7];
pub const MIN_CONFIDENCE: f64 = 0.35;
pub const MIN_HITS_PER_CLIP: usize = 3;

// GIF generation
pub const GIF_START_SECS: f64 = 0.0;
pub const GIF_SECONDS: f64 = 5.0;
pub const GIF_FPS: u32 = 10;
pub const GIF_SCALE_WIDTH: u32 = 640;

// Loop pacing
pub const PROCESSOR_POLL_MS: u64 = 1000;
pub const WORKER_IDLE_POLL_MS: u64 = 500;
pub const WORKER_BETWEEN_JOBS_MS: u64 = 100;

// External process timeouts
pub const ENCODER_TIMEOUT_SECS: u64 = 120;
pub const DETECTOR_TIMEOUT_SECS: u64 = 60;
pub const SAMPLER_PROBE_TIMEOUT_SECS: u64 = 30;

// Claims older than this are assumed abandoned by a dead worker
pub const STALE_CLAIM_SECS: u64 = 3 * ENCODER_TIMEOUT_SECS;

// Read surface
pub const DEFAULT_ALERT_LIST_LIMIT: usize = 200;
