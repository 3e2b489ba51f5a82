// Clip discovery under the read-only source tree

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::constants::CLIP_EXTENSIONS;
use crate::fsutil::is_hidden;

/// Every clip file under `root` (any depth), sorted by path. A missing root
/// yields nothing; unreadable entries are skipped.
pub fn discover_clips(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_clip_file(p))
        .collect();

    files.sort();
    files
}

/// Clip extension match, case-insensitive. Hidden files never qualify.
pub fn is_clip_file(path: &Path) -> bool {
    if is_hidden(path) {
        return false;
    }
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return false,
    };
    CLIP_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_clip_file() {
        assert!(is_clip_file(Path::new("2024-05-01_10-00-00-front.mp4")));
        assert!(is_clip_file(Path::new("clip.MP4")));
        assert!(!is_clip_file(Path::new(".clip.mp4")));
        assert!(!is_clip_file(Path::new("event.json")));
        assert!(!is_clip_file(Path::new("thumb.png")));
    }

    #[test]
    fn test_discover_recurses_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("SentryClips/2024-05-01_10-00-00")).unwrap();
        std::fs::create_dir_all(root.join("RecentClips")).unwrap();
        std::fs::write(root.join("SentryClips/2024-05-01_10-00-00/b-front.mp4"), b"x").unwrap();
        std::fs::write(root.join("SentryClips/2024-05-01_10-00-00/event.json"), b"{}").unwrap();
        std::fs::write(root.join("RecentClips/a-back.mp4"), b"x").unwrap();
        std::fs::write(root.join("RecentClips/.hidden.mp4"), b"x").unwrap();

        let found = discover_clips(root);
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("RecentClips/a-back.mp4"));
        assert!(found[1].ends_with("b-front.mp4"));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_clips(&tmp.path().join("not-mounted")).is_empty());
    }
}
