// Alert store: one JSON document per alert, the dashboard's source of truth

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::Hit;
use crate::error::{Result, SentryError};
use crate::fsutil::{is_hidden, write_atomic, write_json_atomic};

/// Alert lifecycle. Only ever moves forward:
/// `queued -> gif_queued -> gif_done | gif_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Queued,
    GifQueued,
    GifDone,
    GifFailed,
}

impl AlertStatus {
    fn rank(&self) -> u8 {
        match self {
            AlertStatus::Queued => 0,
            AlertStatus::GifQueued => 1,
            AlertStatus::GifDone | AlertStatus::GifFailed => 2,
        }
    }

    /// Strictly forward; terminal states accept nothing.
    pub fn can_advance_to(&self, next: AlertStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Queued => "queued",
            AlertStatus::GifQueued => "gif_queued",
            AlertStatus::GifDone => "gif_done",
            AlertStatus::GifFailed => "gif_failed",
        }
    }
}

/// On-disk alert document (`<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub source_file: String,
    pub score: f64,
    pub hits: Vec<Hit>,
    pub jpeg: String,
    /// Empty until the worker produces the GIF.
    #[serde(default)]
    pub gif: String,
    pub status: AlertStatus,
}

impl AlertRecord {
    pub fn new(id: impl Into<String>, source_file: impl Into<String>, score: f64, hits: Vec<Hit>, jpeg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: chrono::Utc::now().timestamp(),
            source_file: source_file.into(),
            score,
            hits,
            jpeg: jpeg.into(),
            gif: String::new(),
            status: AlertStatus::Queued,
        }
    }
}

/// Fresh collision-free alert id (12 hex chars of a v4 UUID).
pub fn new_alert_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Alert ids end up in file names; keep them to a safe alphabet.
pub fn is_valid_alert_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct AlertStore {
    alerts_dir: PathBuf,
    media_dir: PathBuf,
}

impl AlertStore {
    pub fn new(alerts_dir: impl Into<PathBuf>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            alerts_dir: alerts_dir.into(),
            media_dir: media_dir.into(),
        }
    }

    pub fn record_path(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_alert_id(id) {
            return Err(SentryError::MalformedJob(format!("invalid alert id {:?}", id)));
        }
        Ok(self.alerts_dir.join(format!("{}.json", id)))
    }

    /// Persist a complete new record in one atomic write.
    pub fn create(&self, record: &AlertRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        write_json_atomic(&path, record)
    }

    /// Store the snapshot as `<id>.jpg` in the media dir; returns the file name.
    pub fn save_snapshot(&self, id: &str, jpeg: &[u8]) -> Result<String> {
        if !is_valid_alert_id(id) {
            return Err(SentryError::MalformedJob(format!("invalid alert id {:?}", id)));
        }
        let name = format!("{}.jpg", id);
        write_atomic(&self.media_dir.join(&name), jpeg)?;
        Ok(name)
    }

    pub fn get(&self, id: &str) -> Result<Option<AlertRecord>> {
        let path = self.record_path(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write of the status (and optionally the GIF name).
    ///
    /// Returns `Ok(false)` without touching anything when the record does not
    /// exist yet or the transition would not move forward. Identity fields
    /// are carried over unchanged.
    pub fn advance_status(&self, id: &str, status: AlertStatus, gif: Option<&str>) -> Result<bool> {
        let mut record = match self.get(id)? {
            Some(r) => r,
            None => {
                debug!("alert {} not found, skipping {} update", id, status.as_str());
                return Ok(false);
            }
        };

        if !record.status.can_advance_to(status) {
            debug!(
                "alert {} already {}, ignoring {}",
                id,
                record.status.as_str(),
                status.as_str()
            );
            return Ok(false);
        }

        record.status = status;
        if let Some(gif) = gif {
            record.gif = gif.to_string();
        }
        write_json_atomic(&self.record_path(id)?, &record)?;
        Ok(true)
    }

    /// All readable records, newest first. Unparseable files are skipped.
    pub fn list_newest_first(&self, limit: Option<usize>) -> Result<Vec<AlertRecord>> {
        let mut alerts = Vec::new();
        for entry in fs::read_dir(&self.alerts_dir)? {
            let path = entry?.path();
            if is_hidden(&path) || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(SentryError::from).and_then(|b| {
                serde_json::from_slice::<AlertRecord>(&b).map_err(SentryError::from)
            }) {
                Ok(alert) => alerts.push(alert),
                Err(e) => warn!("skipping unreadable alert {}: {}", path.display(), e),
            }
        }

        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    /// Resolve a media file by bare name. Anything that is not a plain file
    /// name inside the media dir is rejected.
    pub fn media_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = Path::new(name);
        let plain = candidate.components().count() == 1
            && candidate.file_name().map(|n| n == candidate.as_os_str()).unwrap_or(false)
            && !name.starts_with('.');
        if !plain {
            return Err(SentryError::InvalidMediaName(name.to_string()));
        }
        let path = self.media_dir.join(candidate);
        if !path.is_file() {
            return Err(SentryError::InvalidMediaName(format!("{} (not found)", name)));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> AlertStore {
        let alerts = tmp.path().join("alerts");
        let media = tmp.path().join("media");
        fs::create_dir_all(&alerts).unwrap();
        fs::create_dir_all(&media).unwrap();
        AlertStore::new(alerts, media)
    }

    fn record(id: &str, timestamp: i64) -> AlertRecord {
        let mut r = AlertRecord::new(
            id,
            "front.mp4",
            0.9,
            vec![Hit { frame: 10, class_id: 0, confidence_score: 0.9 }],
            format!("{}.jpg", id),
        );
        r.timestamp = timestamp;
        r
    }

    #[test]
    fn test_status_order() {
        use AlertStatus::*;
        assert!(Queued.can_advance_to(GifQueued));
        assert!(Queued.can_advance_to(GifDone));
        assert!(GifQueued.can_advance_to(GifFailed));
        assert!(!GifQueued.can_advance_to(Queued));
        assert!(!GifDone.can_advance_to(GifFailed));
        assert!(!GifFailed.can_advance_to(GifDone));
        assert!(!GifQueued.can_advance_to(GifQueued));
    }

    #[test]
    fn test_json_schema_field_names() {
        let json = serde_json::to_value(record("abc123def456", 1_700_000_000)).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["hits"][0]["frame"], 10);
        assert_eq!(json["hits"][0]["class_id"], 0);
        assert_eq!(json["hits"][0]["confidence_score"], 0.9);
        for key in ["id", "timestamp", "source_file", "score", "jpeg", "gif"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_advance_keeps_identity_fields() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let original = record("a1", 100);
        store.create(&original).unwrap();

        assert!(store.advance_status("a1", AlertStatus::GifQueued, None).unwrap());
        assert!(store.advance_status("a1", AlertStatus::GifDone, Some("a1.gif")).unwrap());
        // Terminal: nothing moves it again.
        assert!(!store.advance_status("a1", AlertStatus::GifFailed, None).unwrap());
        assert!(!store.advance_status("a1", AlertStatus::GifQueued, None).unwrap());

        let stored = store.get("a1").unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::GifDone);
        assert_eq!(stored.gif, "a1.gif");
        assert_eq!(stored.id, original.id);
        assert_eq!(stored.timestamp, original.timestamp);
        assert_eq!(stored.source_file, original.source_file);
        assert_eq!(stored.hits, original.hits);
        assert_eq!(stored.score, original.score);
    }

    #[test]
    fn test_advance_missing_record_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(!store.advance_status("nothere", AlertStatus::GifDone, Some("x.gif")).unwrap());
        assert!(store.get("nothere").unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.create(&record("old", 100)).unwrap();
        store.create(&record("new", 300)).unwrap();
        store.create(&record("mid", 200)).unwrap();
        fs::write(tmp.path().join("alerts/broken.json"), b"{not json").unwrap();

        let ids: Vec<String> = store.list_newest_first(None).unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert_eq!(store.list_newest_first(Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_media_path_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let name = store.save_snapshot("a1", b"jpeg").unwrap();
        assert_eq!(name, "a1.jpg");

        assert!(store.media_path("a1.jpg").is_ok());
        assert!(store.media_path("../alerts/a1.json").is_err());
        assert!(store.media_path("/etc/passwd").is_err());
        assert!(store.media_path(".hidden").is_err());
        assert!(store.media_path("missing.gif").is_err());
    }

    #[test]
    fn test_ids_are_unique_and_valid() {
        let a = new_alert_id();
        let b = new_alert_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 12);
        assert!(is_valid_alert_id(&a));
        assert!(!is_valid_alert_id("../x"));
        assert!(!is_valid_alert_id(""));
    }
}
