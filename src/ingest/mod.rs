// Ingestion stage: source tree -> stability gate -> intake

pub mod copy;
pub mod discover;
pub mod stability;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{Layout, StabilityConfig};
use crate::error::Result;
use crate::fsutil::is_hidden;

pub use copy::{copy_to_intake, CopyOutcome};
pub use stability::is_stable;

/// Counters for one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestResult {
    pub discovered: usize,
    pub copied: usize,
    pub already_present: usize,
    pub unstable: usize,
    pub failed: usize,
}

/// Walks the source tree and publishes newly stable clips into intake.
///
/// The `seen` set is only an optimisation: it is lost on restart, and
/// correctness comes from [`copy_to_intake`] skipping names that are already
/// in intake or the archive.
pub struct IngestStage {
    source_dir: PathBuf,
    intake_dir: PathBuf,
    processed_dir: PathBuf,
    stable_window: Duration,
    poll_interval: Duration,
    seen: HashSet<PathBuf>,
}

impl IngestStage {
    pub fn new(layout: &Layout, stability: &StabilityConfig) -> Self {
        Self {
            source_dir: layout.source_dir.clone(),
            intake_dir: layout.intake_dir(),
            processed_dir: layout.processed_dir(),
            stable_window: stability.window(),
            poll_interval: stability.poll(),
            seen: HashSet::new(),
        }
    }

    pub fn with_timing(mut self, stable_window: Duration, poll_interval: Duration) -> Self {
        self.stable_window = stable_window;
        self.poll_interval = poll_interval;
        self
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// One pass over the source tree.
    pub fn scan(&mut self) -> IngestResult {
        let mut result = IngestResult::default();

        for clip in discover::discover_clips(&self.source_dir) {
            result.discovered += 1;

            if self.seen.contains(&clip) || is_hidden(&clip) {
                continue;
            }

            match self.ingest_one(&clip) {
                Ok(Some(CopyOutcome::Copied(dest))) => {
                    result.copied += 1;
                    self.seen.insert(clip);
                    info!("copied -> intake: {}", display_name(&dest));
                }
                Ok(Some(CopyOutcome::AlreadyPresent)) => {
                    result.already_present += 1;
                    debug!("already ingested: {}", clip.display());
                    self.seen.insert(clip);
                }
                Ok(None) => {
                    // Left unseen so the next scan checks it again.
                    result.unstable += 1;
                    debug!("not yet stable: {}", clip.display());
                }
                Err(e) => {
                    result.failed += 1;
                    warn!("ingest failed [{}] {}: {}", e.kind().as_str(), clip.display(), e);
                }
            }
        }

        result
    }

    /// Gate + copy for one clip. `Ok(None)` means "not stable yet".
    fn ingest_one(&self, clip: &Path) -> Result<Option<CopyOutcome>> {
        let name = crate::fsutil::file_name_str(clip)?;
        // Cheap check first so restarts don't pay the stability window per clip.
        if copy::already_ingested(name, &self.intake_dir, &self.processed_dir) {
            return Ok(Some(CopyOutcome::AlreadyPresent));
        }
        if !is_stable(clip, self.stable_window, self.poll_interval) {
            return Ok(None);
        }
        copy_to_intake(clip, &self.intake_dir, &self.processed_dir).map(Some)
    }

    /// Remove temp files an interrupted copy left in intake.
    pub fn sweep_intake(&self) -> Result<usize> {
        crate::fsutil::sweep_temp_files(&self.intake_dir)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn stage(tmp: &TempDir) -> (Layout, IngestStage) {
        let layout = Layout::new(tmp.path().join("base"), tmp.path().join("TeslaCam"));
        layout.ensure_dirs().unwrap();
        fs::create_dir_all(layout.source_dir.join("SavedClips/2024-05-01_10-00-00")).unwrap();
        let stage = IngestStage::new(&layout, &StabilityConfig::default())
            .with_timing(Duration::from_millis(20), Duration::from_millis(10));
        (layout, stage)
    }

    fn intake_names(layout: &Layout) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(layout.intake_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_scan_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (layout, mut stage) = stage(&tmp);
        let event = layout.source_dir.join("SavedClips/2024-05-01_10-00-00");
        fs::write(event.join("front.mp4"), b"front").unwrap();
        fs::write(event.join("back.mp4"), b"back").unwrap();

        let first = stage.scan();
        assert_eq!(first.copied, 2);
        let second = stage.scan();
        assert_eq!(second.copied, 0);

        assert_eq!(intake_names(&layout), vec!["back.mp4", "front.mp4"]);
    }

    #[test]
    fn test_restart_does_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        let (layout, mut stage) = stage(&tmp);
        fs::write(layout.source_dir.join("SavedClips/front.mp4"), b"front").unwrap();
        stage.scan();

        // Fresh stage = empty seen set, as after a process restart.
        let mut restarted = IngestStage::new(&layout, &StabilityConfig::default())
            .with_timing(Duration::from_millis(20), Duration::from_millis(10));
        let result = restarted.scan();
        assert_eq!(result.copied, 0);
        assert_eq!(result.already_present, 1);
        assert_eq!(intake_names(&layout), vec!["front.mp4"]);
    }

    #[test]
    fn test_processed_clip_is_not_reingested() {
        let tmp = TempDir::new().unwrap();
        let (layout, mut stage) = stage(&tmp);
        fs::write(layout.source_dir.join("SavedClips/front.mp4"), b"front").unwrap();
        fs::write(layout.processed_dir().join("front.mp4"), b"front").unwrap();

        let result = stage.scan();
        assert_eq!(result.copied, 0);
        assert!(intake_names(&layout).is_empty());
    }

    #[test]
    fn test_unstable_clip_is_retried_next_scan() {
        let tmp = TempDir::new().unwrap();
        let (layout, stage) = stage(&tmp);
        let mut stage = stage.with_timing(Duration::from_millis(200), Duration::from_millis(10));
        let clip = layout.source_dir.join("SavedClips/front.mp4");
        fs::write(&clip, b"f").unwrap();

        let writer_clip = clip.clone();
        let writer = std::thread::spawn(move || {
            use std::io::Write;
            let mut f = fs::OpenOptions::new().append(true).open(&writer_clip).unwrap();
            for _ in 0..10 {
                std::thread::sleep(Duration::from_millis(15));
                f.write_all(b"more").unwrap();
            }
        });

        let first = stage.scan();
        writer.join().unwrap();
        assert_eq!(first.unstable, 1);
        assert_eq!(stage.seen_count(), 0);

        let second = stage.scan();
        assert_eq!(second.copied, 1);
        assert_eq!(fs::read(layout.intake_dir().join("front.mp4")).unwrap().len(), 41);
    }

    #[test]
    fn test_source_tree_is_untouched() {
        let tmp = TempDir::new().unwrap();
        let (layout, mut stage) = stage(&tmp);
        let clip = layout.source_dir.join("SavedClips/front.mp4");
        fs::write(&clip, b"front").unwrap();

        stage.scan();
        assert_eq!(fs::read(&clip).unwrap(), b"front");
    }
}
