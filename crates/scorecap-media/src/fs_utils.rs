//! Filesystem utilities shared across stages.

use std::path::{Path, PathBuf};

use crate::error::MediaResult;

/// Create a directory and all parents.
pub fn ensure_dir(dir: impl AsRef<Path>) -> MediaResult<()> {
    std::fs::create_dir_all(dir.as_ref())?;
    Ok(())
}

/// Remove files in `dir` whose names match `prefix`. Missing dirs are fine.
pub fn clear_matching_files(dir: impl AsRef<Path>, prefix: &str) -> MediaResult<()> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.path().is_file() && name.starts_with(prefix) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}

/// Sorted file paths in `dir` whose names start with `prefix`.
pub fn list_sorted_files(dir: impl AsRef<Path>, prefix: &str) -> MediaResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with(prefix))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Total size in bytes of a directory tree. Unreadable entries count as zero.
pub fn dir_size_bytes(dir: impl AsRef<Path>) -> u64 {
    fn walk(path: &Path) -> u64 {
        let mut total = 0u64;
        let Ok(entries) = std::fs::read_dir(path) else {
            return 0;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += walk(&path);
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
        total
    }
    let dir = dir.as_ref();
    if dir.is_file() {
        return dir.metadata().map(|m| m.len()).unwrap_or(0);
    }
    walk(dir)
}

/// Replace `dst` atomically by writing a sibling temp file and renaming it.
pub fn atomic_overwrite(dst: &Path, bytes: &[u8]) -> MediaResult<()> {
    let tmp = dst.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    match std::fs::rename(&tmp, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_sorted_files() {
        let dir = TempDir::new().unwrap();
        for name in ["frame_000002.png", "frame_000001.png", "other.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let frames = list_sorted_files(dir.path(), "frame_").unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with("frame_000001.png"));
    }

    #[test]
    fn test_clear_matching_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("frame_000001.png"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();
        clear_matching_files(dir.path(), "frame_").unwrap();
        assert!(!dir.path().join("frame_000001.png").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_dir_size_bytes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.bin"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size_bytes(dir.path()), 150);
    }

    #[test]
    fn test_atomic_overwrite() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("page.png");
        std::fs::write(&target, b"old").unwrap();
        atomic_overwrite(&target, b"new").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!dir.path().join("page.tmp").exists());
    }
}
