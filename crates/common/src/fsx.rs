//! Named filesystem probes.
//!
//! "Not found" is a normal outcome here, never an error path: probes return
//! plain booleans or `Option`s so callers don't branch on `io::ErrorKind`.

use std::{
    io,
    path::{Path, PathBuf},
};

/// Whether anything exists at `path`, without following a final symlink.
///
/// A dangling symlink counts as existing — it still occupies the path and
/// must be removed before anything else can be created there.
#[must_use]
pub fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Whether `path` itself is a symbolic link.
#[must_use]
pub fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Read the raw (possibly relative) target of a symlink.
///
/// `None` when the path is missing or not a symlink.
#[must_use]
pub fn link_target(path: &Path) -> Option<PathBuf> {
    std::fs::read_link(path).ok()
}

/// Fully resolve a symlink at `path` to an absolute, canonical target.
///
/// `None` when the path is missing, not a symlink, or dangling.
#[must_use]
pub fn resolve_target(path: &Path) -> Option<PathBuf> {
    if !is_symlink(path) {
        return None;
    }
    std::fs::canonicalize(path).ok()
}

/// Remove whatever occupies `path`: file, symlink, or directory tree.
///
/// Missing paths are success (removal is idempotent).
pub fn remove_any(path: &Path) -> io::Result<()> {
    let meta = match path.symlink_metadata() {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        // Symlinks to directories are removed as files, never followed.
        std::fs::remove_file(path)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_sees_dangling_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("dangling");
        #[cfg(unix)]
        std::os::unix::fs::symlink(tmp.path().join("nope"), &link).unwrap();
        #[cfg(windows)]
        std::os::windows::fs::symlink_dir(tmp.path().join("nope"), &link).unwrap();

        assert!(exists(&link));
        assert!(is_symlink(&link));
        assert!(resolve_target(&link).is_none());
        assert_eq!(link_target(&link), Some(tmp.path().join("nope")));
    }

    #[test]
    fn test_remove_any_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing");
        remove_any(&missing).unwrap();

        let dir = tmp.path().join("dir");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested/file"), b"x").unwrap();
        remove_any(&dir).unwrap();
        assert!(!exists(&dir));
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_any_deletes_link_not_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("real");
        std::fs::create_dir(&target).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        remove_any(&link).unwrap();
        assert!(!exists(&link));
        assert!(target.is_dir());
    }
}
