// Atomic file helpers shared by every stage
//
// Every write lands under a hidden, per-operation temp name in the target
// directory and is renamed into place, so readers never see partial files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::constants::{HIDDEN_PREFIX, TEMP_SUFFIX};
use crate::error::{Result, SentryError};

/// Unique hidden temp path next to `dest`: `.<name>.<token>.tmp`.
pub fn temp_path_for(dest: &Path) -> Result<PathBuf> {
    let name = file_name_str(dest)?;
    let parent = dest.parent().unwrap_or(Path::new("."));
    let token = &Uuid::new_v4().simple().to_string()[..8];
    Ok(parent.join(format!("{}{}.{}{}", HIDDEN_PREFIX, name, token, TEMP_SUFFIX)))
}

/// Write `bytes` to `dest` via temp file + fsync + rename.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path_for(dest)?;
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dest)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(dest: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(dest, &bytes)
}

/// Final path component as UTF-8.
pub fn file_name_str(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SentryError::InvalidPath(path.display().to_string()))
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(HIDDEN_PREFIX))
        .unwrap_or(false)
}

/// Hidden temp files left in `dir` by an interrupted write. Returns how many
/// were removed.
pub fn sweep_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = is_hidden(&path)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(TEMP_SUFFIX))
                .unwrap_or(false);
        if stale && path.is_file() && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
