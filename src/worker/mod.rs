// GIF worker -- drains the job queue and renders alert GIFs.
//
// Runs as its own process, independent of the processor. Each cycle claims
// the oldest pending job; every claimed job ends in `.done`, whatever
// happened while rendering it.

pub mod encoder;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::alerts::{is_valid_alert_id, AlertStatus, AlertStore};
use crate::config::{Layout, PollConfig};
use crate::constants::ERROR_PREFIX;
use crate::error::{Result, SentryError};
use crate::fsutil::{file_name_str, temp_path_for};
use crate::queue::{ClaimedJob, JobQueue};

pub use encoder::{Encoder, FfmpegGifEncoder};

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Rendered { alert_id: String, gif: String },
    Failed { alert_id: Option<String>, error: String },
}

pub struct ArtifactWorker {
    queue: JobQueue,
    alerts: AlertStore,
    processed_dir: PathBuf,
    media_dir: PathBuf,
    encoder: Box<dyn Encoder>,
    worker_id: String,
}

impl ArtifactWorker {
    pub fn new(layout: &Layout, encoder: Box<dyn Encoder>) -> Self {
        Self {
            queue: JobQueue::new(layout.queue_dir()),
            alerts: AlertStore::new(layout.alerts_dir(), layout.media_dir()),
            processed_dir: layout.processed_dir(),
            media_dir: layout.media_dir(),
            encoder,
            worker_id: get_worker_id(),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claim and process one job. `Ok(None)` when the queue is empty.
    pub fn run_next_job(&self) -> Result<Option<JobOutcome>> {
        let claimed = match self.queue.claim_next()? {
            Some(c) => c,
            None => return Ok(None),
        };
        info!("claimed job {} ({})", claimed.id, self.worker_id);
        Ok(Some(self.process_claimed(claimed)))
    }

    /// Process until nothing is left to claim.
    pub fn drain(&self) -> Result<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_next_job()? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Poll forever (until `shutdown`), one job per cycle.
    pub fn run(&self, poll: &PollConfig, shutdown: &AtomicBool) {
        info!(
            "gif worker {} watching {} (media {})",
            self.worker_id,
            self.queue.dir().display(),
            self.media_dir.display()
        );

        match self.queue.requeue_stale(Duration::from_secs(poll.stale_claim_secs)) {
            Ok(0) => {}
            Ok(n) => info!("requeued {} stale claim(s)", n),
            Err(e) => warn!("stale claim recovery failed: {}", e),
        }

        while !shutdown.load(Ordering::Relaxed) {
            let pause = match self.run_next_job() {
                Ok(Some(_)) => poll.worker_between_jobs_ms,
                Ok(None) => poll.worker_idle_ms,
                Err(e) => {
                    error!("gif worker: queue scan failed [{}]: {}", e.kind().as_str(), e);
                    poll.worker_idle_ms
                }
            };
            crate::sleep_unless_shutdown(Duration::from_millis(pause), shutdown);
        }

        info!("gif worker {} stopped", self.worker_id);
    }

    fn process_claimed(&self, claimed: ClaimedJob) -> JobOutcome {
        let mut alert_id: Option<String> = None;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.render(&claimed, &mut alert_id)
        }))
        .unwrap_or_else(|_| Err(SentryError::Other("render panicked (recovered)".to_string())));

        let outcome = match result {
            Ok(gif) => {
                let alert_id = alert_id.clone().unwrap_or_else(|| claimed.id.clone());
                info!("done alert={} gif={}", alert_id, gif);
                JobOutcome::Rendered { alert_id, gif }
            }
            Err(e) => {
                warn!("FAILED {} [{}]: {}", claimed.id, e.kind().as_str(), e);
                // Fall back to the file name: jobs are named after their alert.
                let target = alert_id.or_else(|| {
                    is_valid_alert_id(&claimed.id).then(|| claimed.id.clone())
                });
                if let Some(id) = &target {
                    if let Err(update_err) = self.alerts.advance_status(id, AlertStatus::GifFailed, None) {
                        warn!("could not mark alert {} gif_failed: {}", id, update_err);
                    }
                }
                JobOutcome::Failed { alert_id: target, error: e.to_string() }
            }
        };

        let job_id = claimed.id.clone();
        if let Err(e) = self.queue.complete(claimed) {
            error!("could not mark job {} done: {}", job_id, e);
        }

        outcome
    }

    fn render(&self, claimed: &ClaimedJob, alert_id: &mut Option<String>) -> Result<String> {
        let job = claimed.read()?;
        *alert_id = Some(job.alert_id.clone());

        let video = resolve_video_path(&job.video, &self.processed_dir)?;
        let out_gif = self.media_dir.join(format!("{}.gif", job.alert_id));
        let gif_name = file_name_str(&out_gif)?.to_string();

        info!("making gif alert={} video={}", job.alert_id, video.display());
        render_atomic(self.encoder.as_ref(), &video, &out_gif)?;

        // A GIF the record does not point at would outlive a gif_failed alert.
        if let Err(e) = self
            .alerts
            .advance_status(&job.alert_id, AlertStatus::GifDone, Some(&gif_name))
        {
            let _ = std::fs::remove_file(&out_gif);
            return Err(e);
        }
        Ok(gif_name)
    }
}

/// Encode into a hidden temp file and rename it over `out` on success.
fn render_atomic(encoder: &dyn Encoder, video: &Path, out: &Path) -> Result<()> {
    let tmp = temp_path_for(out)?;

    let result = encoder.encode(video, &tmp).and_then(|_| {
        let size = std::fs::metadata(&tmp).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(SentryError::Encoder("encoder produced no output".to_string()));
        }
        std::fs::rename(&tmp, out)?;
        Ok(())
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// The job records wherever the clip was when it was enqueued (usually
/// intake). The processor may have archived it since, so fall back to the
/// same name in the processed archive, plain or `error_`-prefixed.
pub fn resolve_video_path(video: &str, processed_dir: &Path) -> Result<PathBuf> {
    let recorded = PathBuf::from(video);
    if recorded.is_file() {
        return Ok(recorded);
    }

    let name = match recorded.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return Err(SentryError::VideoNotFound(video.to_string())),
    };
    let candidates = [
        processed_dir.join(name),
        processed_dir.join(format!("{}{}", ERROR_PREFIX, name)),
    ];
    if let Some(path) = candidates.iter().find(|p| p.is_file()) {
        debug!("video moved, using {}", path.display());
        return Ok(path.clone());
    }

    Err(SentryError::VideoNotFound(format!(
        "{} (also tried {})",
        video,
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Get worker identifier
fn get_worker_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    format!("{}:{}", hostname, pid)
}
