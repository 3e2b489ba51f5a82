// Directory-backed job queue
//
// State lives entirely in file names:
//   <id>.json             pending
//   <id>.json.processing  claimed by exactly one worker
//   <id>.json.done        finished (success or failure), kept as history
// Claiming is a rename; the filesystem guarantees only one renamer wins.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::alerts::is_valid_alert_id;
use crate::constants::{JOB_CLAIMED_SUFFIX, JOB_DONE_SUFFIX, JOB_PENDING_SUFFIX};
use crate::error::{Result, SentryError};
use crate::fsutil::{is_hidden, write_json_atomic};

/// A request to render the GIF for one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GifJob {
    pub video: String,
    pub alert_id: String,
}

/// Wire form with every field optional so a missing field is reported as a
/// malformed job rather than a generic parse failure.
#[derive(Debug, Deserialize)]
struct RawGifJob {
    #[serde(default)]
    video: Option<String>,
    #[serde(default)]
    alert_id: Option<String>,
}

impl GifJob {
    pub fn new(video: &Path, alert_id: impl Into<String>) -> Self {
        Self {
            video: video.to_string_lossy().to_string(),
            alert_id: alert_id.into(),
        }
    }

    /// Parse and validate a job payload.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawGifJob = serde_json::from_slice(bytes)
            .map_err(|e| SentryError::MalformedJob(format!("not a job document: {}", e)))?;

        let alert_id = raw.alert_id.map(|s| s.trim().to_string()).unwrap_or_default();
        let video = raw.video.map(|s| s.trim().to_string()).unwrap_or_default();

        if alert_id.is_empty() {
            return Err(SentryError::MalformedJob("job missing alert_id".to_string()));
        }
        if !is_valid_alert_id(&alert_id) {
            return Err(SentryError::MalformedJob(format!("invalid alert_id {:?}", alert_id)));
        }
        if video.is_empty() {
            return Err(SentryError::MalformedJob("job missing video".to_string()));
        }
        Ok(Self { video, alert_id })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Claimed,
    Done,
}

impl JobState {
    pub fn suffix(&self) -> &'static str {
        match self {
            JobState::Pending => JOB_PENDING_SUFFIX,
            JobState::Claimed => JOB_CLAIMED_SUFFIX,
            JobState::Done => JOB_DONE_SUFFIX,
        }
    }

    /// State and job id for a queue file name, if it is one.
    pub fn from_file_name(name: &str) -> Option<(JobState, &str)> {
        if name.starts_with('.') {
            return None;
        }
        for state in [JobState::Done, JobState::Claimed, JobState::Pending] {
            if let Some(id) = name.strip_suffix(state.suffix()) {
                if !id.is_empty() {
                    return Some((state, id));
                }
            }
        }
        None
    }
}

/// A job this process holds exclusively until `complete` is called.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: String,
    pub path: PathBuf,
}

impl ClaimedJob {
    pub fn read(&self) -> Result<GifJob> {
        GifJob::parse(&fs::read(&self.path)?)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub claimed: usize,
    pub done: usize,
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    dir: PathBuf,
}

impl JobQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str, state: JobState) -> PathBuf {
        self.dir.join(format!("{}{}", id, state.suffix()))
    }

    /// Write `<alert_id>.json` atomically. The temp name is hidden and does
    /// not end in `.json`, so a scanning worker never sees a partial job.
    pub fn enqueue(&self, job: &GifJob) -> Result<PathBuf> {
        if !is_valid_alert_id(&job.alert_id) {
            return Err(SentryError::MalformedJob(format!("invalid alert_id {:?}", job.alert_id)));
        }
        let path = self.path_for(&job.alert_id, JobState::Pending);
        write_json_atomic(&path, job)?;
        Ok(path)
    }

    /// Pending jobs, oldest first by modification time (ties by name).
    pub fn pending_oldest_first(&self) -> Result<Vec<PathBuf>> {
        let mut jobs: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if !matches!(JobState::from_file_name(name), Some((JobState::Pending, _))) {
                continue;
            }
            // Claimed by someone else between listing and stat.
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            jobs.push((modified, entry.path()));
        }
        jobs.sort();
        Ok(jobs.into_iter().map(|(_, p)| p).collect())
    }

    /// Claim the oldest pending job by renaming it to `.processing`.
    ///
    /// A rename that fails with "not found" means another worker won that
    /// job; we quietly move on to the next candidate. Returns `None` when
    /// nothing is left to claim.
    pub fn claim_next(&self) -> Result<Option<ClaimedJob>> {
        for pending in self.pending_oldest_first()? {
            let name = match pending.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let id = match JobState::from_file_name(&name) {
                Some((JobState::Pending, id)) => id.to_string(),
                _ => continue,
            };
            match self.try_claim(&pending, &id) {
                Ok(Some(claimed)) => return Ok(Some(claimed)),
                Ok(None) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn try_claim(&self, pending: &Path, id: &str) -> Result<Option<ClaimedJob>> {
        let claimed = self.path_for(id, JobState::Claimed);
        match fs::rename(pending, &claimed) {
            Ok(()) => {
                // Stamp the claim time so stale-claim recovery can age it. An
                // unstamped claim could look stale at once, so give it back.
                if let Err(e) = filetime::set_file_mtime(&claimed, filetime::FileTime::now()) {
                    warn!("could not stamp claim for job {}: {}", id, e);
                    if let Err(back) = fs::rename(&claimed, pending) {
                        warn!("could not release claim for job {}: {}", id, back);
                    }
                    return Err(e.into());
                }
                Ok(Some(ClaimedJob { id: id.to_string(), path: claimed }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("lost claim race for job {}", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move a claimed job to `.done`. Used for success and failure alike.
    pub fn complete(&self, claimed: ClaimedJob) -> Result<PathBuf> {
        let done = self.path_for(&claimed.id, JobState::Done);
        fs::rename(&claimed.path, &done)?;
        Ok(done)
    }

    /// Return claims older than `max_age` to pending. Only safe because every
    /// worker bounds its encoder with a timeout well under `max_age`.
    pub fn requeue_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut requeued = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let id = match JobState::from_file_name(&name) {
                Some((JobState::Claimed, id)) => id.to_string(),
                _ => continue,
            };
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| now.duration_since(t).ok());
            if !matches!(age, Some(a) if a >= max_age) {
                continue;
            }
            match fs::rename(entry.path(), self.path_for(&id, JobState::Pending)) {
                Ok(()) => {
                    requeued += 1;
                    info!("requeued stale claim for job {}", id);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(requeued)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_hidden(&path) {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match JobState::from_file_name(name) {
                Some((JobState::Pending, _)) => counts.pending += 1,
                Some((JobState::Claimed, _)) => counts.claimed += 1,
                Some((JobState::Done, _)) => counts.done += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    fn queue(tmp: &TempDir) -> JobQueue {
        let dir = tmp.path().join("gif_queue");
        fs::create_dir_all(&dir).unwrap();
        JobQueue::new(dir)
    }

    fn job(id: &str) -> GifJob {
        GifJob::new(Path::new("/data/inbox/front.mp4"), id)
    }

    #[test]
    fn test_file_name_states() {
        assert_eq!(JobState::from_file_name("abc.json"), Some((JobState::Pending, "abc")));
        assert_eq!(JobState::from_file_name("abc.json.processing"), Some((JobState::Claimed, "abc")));
        assert_eq!(JobState::from_file_name("abc.json.done"), Some((JobState::Done, "abc")));
        assert_eq!(JobState::from_file_name(".abc.json.1a2b.tmp"), None);
        assert_eq!(JobState::from_file_name(".json"), None);
        assert_eq!(JobState::from_file_name("notes.txt"), None);
    }

    #[test]
    fn test_parse_validates_required_fields() {
        assert!(GifJob::parse(br#"{"video": "/v.mp4", "alert_id": "a1"}"#).is_ok());
        let bad_payloads: [&[u8]; 5] = [
            br#"{"video": "/v.mp4"}"#,
            br#"{"alert_id": "a1"}"#,
            br#"{"video": "  ", "alert_id": "a1"}"#,
            br#"{"video": "/v.mp4", "alert_id": "../../etc"}"#,
            b"[1, 2",
        ];
        for bad in bad_payloads {
            let err = GifJob::parse(bad).unwrap_err();
            assert!(matches!(err, SentryError::MalformedJob(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_lifecycle_pending_claimed_done() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        q.enqueue(&job("a1")).unwrap();
        assert_eq!(q.counts().unwrap(), QueueCounts { pending: 1, claimed: 0, done: 0 });

        let claimed = q.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, "a1");
        assert_eq!(claimed.read().unwrap(), job("a1"));
        assert_eq!(q.counts().unwrap(), QueueCounts { pending: 0, claimed: 1, done: 0 });
        assert!(q.claim_next().unwrap().is_none());

        let done = q.complete(claimed).unwrap();
        assert!(done.ends_with("a1.json.done"));
        assert_eq!(q.counts().unwrap(), QueueCounts { pending: 0, claimed: 0, done: 1 });
        assert!(q.claim_next().unwrap().is_none(), "done jobs are never reprocessed");
    }

    #[test]
    fn test_claims_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        for (id, secs) in [("newer", 2_000), ("oldest", 1_000), ("newest", 3_000)] {
            let path = q.enqueue(&job(id)).unwrap();
            filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(secs, 0)).unwrap();
        }

        let order: Vec<String> = std::iter::from_fn(|| q.claim_next().unwrap().map(|c| c.id)).collect();
        assert_eq!(order, vec!["oldest", "newer", "newest"]);
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        q.enqueue(&job("contested")).unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let q = q.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    q.claim_next().unwrap().map(|c| c.id)
                })
            })
            .collect();

        let winners: Vec<String> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners, vec!["contested".to_string()]);
    }

    #[test]
    fn test_lost_race_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        let pending = q.enqueue(&job("gone")).unwrap();
        // Another worker renamed it first.
        fs::rename(&pending, q.dir().join("gone.json.processing")).unwrap();
        assert!(q.try_claim(&pending, "gone").unwrap().is_none());
    }

    #[test]
    fn test_claim_of_old_job_is_not_immediately_stale() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        let pending = q.enqueue(&job("old")).unwrap();
        filetime::set_file_mtime(&pending, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();

        let claimed = q.claim_next().unwrap().unwrap();
        assert_eq!(q.requeue_stale(Duration::from_secs(60)).unwrap(), 0);
        assert!(claimed.path.exists());
    }

    #[test]
    fn test_requeue_stale_claims() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        q.enqueue(&job("stale")).unwrap();
        q.enqueue(&job("fresh")).unwrap();
        let stale = q.claim_next().unwrap().unwrap();
        let fresh = q.claim_next().unwrap().unwrap();
        let (stale, _fresh) = if stale.id == "stale" { (stale, fresh) } else { (fresh, stale) };
        filetime::set_file_mtime(&stale.path, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();

        assert_eq!(q.requeue_stale(Duration::from_secs(60)).unwrap(), 1);
        assert_eq!(q.counts().unwrap(), QueueCounts { pending: 1, claimed: 1, done: 0 });
        assert_eq!(q.claim_next().unwrap().unwrap().id, "stale");
    }

    #[test]
    fn test_enqueue_rejects_unsafe_id() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp);
        assert!(q.enqueue(&job("../escape")).is_err());
    }
}
