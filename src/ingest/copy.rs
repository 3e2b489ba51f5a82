// Atomic copy of a stable clip into intake

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::constants::ERROR_PREFIX;
use crate::error::{Result, SentryError};
use crate::fsutil::{file_name_str, temp_path_for};

/// Outcome of one publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied(PathBuf),
    /// Already in intake or already retired to the archive.
    AlreadyPresent,
}

/// Copy `source` into `intake_dir` under its own file name.
///
/// The bytes land under a hidden temp name first and are linked into place,
/// so the final name never refers to a partial copy and is never replaced. A clip already present
/// in intake, or already archived in `processed_dir`, is skipped.
pub fn copy_to_intake(source: &Path, intake_dir: &Path, processed_dir: &Path) -> Result<CopyOutcome> {
    let name = file_name_str(source)?;
    let dest = intake_dir.join(name);

    if already_ingested(name, intake_dir, processed_dir) {
        return Ok(CopyOutcome::AlreadyPresent);
    }

    let tmp = temp_path_for(&dest)?;
    if let Err(e) = copy_preserving_mtime(source, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if publish_no_clobber(&tmp, &dest)? {
        Ok(CopyOutcome::Copied(dest))
    } else {
        Ok(CopyOutcome::AlreadyPresent)
    }
}

/// Link `tmp` to `dest` unless `dest` already exists, then drop `tmp`.
/// Returns false when another ingester published the name first; their
/// copy is left untouched.
fn publish_no_clobber(tmp: &Path, dest: &Path) -> Result<bool> {
    let linked = fs::hard_link(tmp, dest);
    let _ = fs::remove_file(tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(SentryError::Io(e)),
    }
}

/// True if `name` is in intake or already retired to the archive.
pub fn already_ingested(name: &str, intake_dir: &Path, processed_dir: &Path) -> bool {
    intake_dir.join(name).exists()
        || processed_dir.join(name).exists()
        || processed_dir.join(format!("{}{}", ERROR_PREFIX, name)).exists()
}

fn copy_preserving_mtime(source: &Path, dest: &Path) -> Result<()> {
    let copied = fs::copy(source, dest)?;

    // The source may still be appended to by a misbehaving writer; a short
    // copy would otherwise be published as a complete clip.
    let source_meta = fs::metadata(source)?;
    if copied != source_meta.len() {
        return Err(SentryError::Other(format!(
            "Copy size mismatch for {} ({} vs {})",
            source.display(),
            copied,
            source_meta.len()
        )));
    }

    if let Ok(modified) = source_meta.modified() {
        let _ = filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(modified));
    }

    fs::File::open(dest)?.sync_all()?;
    Ok(())
}
