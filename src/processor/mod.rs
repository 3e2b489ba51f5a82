// Intake processor -- detection, alert creation, archiving
//
// Everything in intake is complete (the ingest stage only publishes by
// rename), so the processor never has to wait on a file. Each clip ends the
// pass in the archive: `processed/<name>` when analysis finished, or
// `processed/error_<name>` when it did not.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::alerts::{new_alert_id, AlertRecord, AlertStatus, AlertStore};
use crate::config::{Layout, PollConfig};
use crate::constants::ERROR_PREFIX;
use crate::detect::{detect_hits, AlertRule, Detector, FrameSampler};
use crate::error::{Result, SentryError};
use crate::fsutil::file_name_str;
use crate::ingest::discover::is_clip_file;
use crate::ingest::{IngestResult, IngestStage};
use crate::queue::{GifJob, JobQueue};


/// What a single clip turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipOutcome {
    Alerted(String),
    NoAlert,
    Failed(String),
}

/// Counters for one pass over intake.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntakeResult {
    pub clips: usize,
    pub alerts: usize,
    pub failed: usize,
}

pub struct IntakeProcessor {
    intake_dir: PathBuf,
    processed_dir: PathBuf,
    alerts: AlertStore,
    queue: JobQueue,
    rule: AlertRule,
    sampler: Box<dyn FrameSampler>,
    detector: Box<dyn Detector>,
}

impl IntakeProcessor {
    pub fn new(
        layout: &Layout,
        rule: AlertRule,
        sampler: Box<dyn FrameSampler>,
        detector: Box<dyn Detector>,
    ) -> Self {
        Self {
            intake_dir: layout.intake_dir(),
            processed_dir: layout.processed_dir(),
            alerts: AlertStore::new(layout.alerts_dir(), layout.media_dir()),
            queue: JobQueue::new(layout.queue_dir()),
            rule,
            sampler,
            detector,
        }
    }

    /// Clips currently in intake, sorted by name. Hidden temp copies are
    /// never listed.
    pub fn pending_clips(&self) -> Result<Vec<PathBuf>> {
        let mut clips = Vec::new();
        for entry in fs::read_dir(&self.intake_dir)? {
            let path = entry?.path();
            if path.is_file() && is_clip_file(&path) {
                clips.push(path);
            }
        }
        clips.sort();
        Ok(clips)
    }

    /// Process a snapshot of intake. Files arriving mid-pass wait for the
    /// next one.
    pub fn process_pass(&mut self) -> Result<IntakeResult> {
        let mut result = IntakeResult::default();
        for clip in self.pending_clips()? {
            result.clips += 1;
            match self.process_clip(&clip) {
                ClipOutcome::Alerted(_) => result.alerts += 1,
                ClipOutcome::NoAlert => {}
                ClipOutcome::Failed(_) => result.failed += 1,
            }
        }
        Ok(result)
    }

    /// Analyze one clip, then archive it whatever the outcome.
    pub fn process_clip(&mut self, clip: &Path) -> ClipOutcome {
        info!("processing {}", clip.display());

        let analyzed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.analyze(clip)))
            .unwrap_or_else(|_| Err(SentryError::Other("analysis panicked (recovered)".to_string())));

        let outcome = match analyzed {
            Ok(Some(id)) => ClipOutcome::Alerted(id),
            Ok(None) => ClipOutcome::NoAlert,
            Err(e) => {
                error!("failed on {} [{}]: {}", clip.display(), e.kind().as_str(), e);
                ClipOutcome::Failed(e.to_string())
            }
        };

        let failed = matches!(outcome, ClipOutcome::Failed(_));
        match self.archive(clip, failed) {
            Ok(dest) => debug!("archived {}", dest.display()),
            Err(SentryError::Io(e)) if e.kind() == IoErrorKind::NotFound => {
                warn!("{} vanished before it could be archived", clip.display());
            }
            Err(e) => error!("could not archive {}: {}", clip.display(), e),
        }

        outcome
    }

    /// Detection plus alert creation. `Ok(None)` when the clip does not
    /// qualify.
    ///
    /// The record is written once, already `gif_queued`, before its job
    /// exists. After `enqueue` a worker may own the record, so the processor
    /// never writes it again on the success path.
    fn analyze(&mut self, clip: &Path) -> Result<Option<String>> {
        let summary = detect_hits(self.sampler.as_ref(), self.detector.as_mut(), clip, &self.rule)?;
        debug!(
            "{}: {} hit(s) over {} frame(s)",
            clip.display(),
            summary.hits.len(),
            summary.frames_seen
        );

        if !summary.should_alert(&self.rule) {
            return Ok(None);
        }
        let best = match &summary.best_frame {
            Some(frame) => frame,
            None => return Ok(None),
        };

        let id = new_alert_id();
        let jpeg = self.alerts.save_snapshot(&id, &best.jpeg)?;
        let source_file = file_name_str(clip)?.to_string();
        let mut record = AlertRecord::new(&id, source_file, summary.best_score, summary.hits.clone(), jpeg.clone());
        record.status = AlertStatus::GifQueued;
        self.alerts.create(&record)?;

        if let Err(e) = self.queue.enqueue(&GifJob::new(clip, &id)) {
            // No job exists, so nothing else will ever move this record.
            if let Err(update_err) = self.alerts.advance_status(&id, AlertStatus::GifFailed, None) {
                warn!("could not mark alert {} gif_failed: {}", id, update_err);
            }
            return Err(e);
        }

        info!("ALERT {} jpg={} score={:.2}", id, jpeg, summary.best_score);
        Ok(Some(id))
    }

    fn archive(&self, clip: &Path, failed: bool) -> Result<PathBuf> {
        let name = file_name_str(clip)?;
        let dest = if failed {
            self.processed_dir.join(format!("{}{}", ERROR_PREFIX, name))
        } else {
            self.processed_dir.join(name)
        };
        fs::rename(clip, &dest)?;
        Ok(dest)
    }
}

/// The processor daemon: one ingest scan then one intake pass per cycle.
pub struct ProcessorService {
    ingest: IngestStage,
    intake: IntakeProcessor,
    poll: PollConfig,
}

impl ProcessorService {
    pub fn new(ingest: IngestStage, intake: IntakeProcessor, poll: PollConfig) -> Self {
        Self { ingest, intake, poll }
    }

    /// Clear leftovers from an interrupted run.
    pub fn startup(&self) {
        match self.ingest.sweep_intake() {
            Ok(0) => {}
            Ok(n) => info!("removed {} stale temp file(s) from intake", n),
            Err(e) => warn!("intake sweep failed: {}", e),
        }
    }

    /// One cycle.
    pub fn run_once(&mut self) -> Result<(IngestResult, IntakeResult)> {
        let ingested = self.ingest.scan();
        let processed = self.intake.process_pass()?;
        if processed.clips > 0 {
            info!(
                "pass: {} clip(s), {} alert(s), {} failed",
                processed.clips, processed.alerts, processed.failed
            );
        }
        Ok((ingested, processed))
    }

    /// Loop until `shutdown` is set. A failing or panicking cycle is logged
    /// and the loop carries on.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        self.startup();
        info!("processor running");

        while !shutdown.load(Ordering::Relaxed) {
            let cycle = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.run_once()));
            match cycle {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("processor cycle failed [{}]: {}", e.kind().as_str(), e),
                Err(_) => error!("processor cycle panicked (recovered)"),
            }
            crate::sleep_unless_shutdown(Duration::from_millis(self.poll.processor_ms), shutdown);
        }

        info!("processor stopped");
    }
}
