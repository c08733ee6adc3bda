//! Filesystem helpers shared by the environment, cache and writers.
//!
//! Timestamps are microseconds since the Unix epoch, the resolution the
//! environment records read times in.

use crate::error::BuildError;
use std::{
    fs, io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

/// Current time in microseconds.
pub fn now_micros() -> u64 {
    to_micros(SystemTime::now())
}

/// Modification time of `path` in microseconds, `None` if it can't be read.
pub fn mtime_micros(path: &Path) -> Option<u64> {
    fs::metadata(path).and_then(|m| m.modified()).ok().map(to_micros)
}

fn to_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Write `data` next to `path` and rename it into place.
///
/// Readers see either the old content or the new one, never a prefix.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, data)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        fs::remove_file(&tmp).ok();
    })
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_all(path: &Path) -> Result<(), BuildError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(BuildError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/environment.json");

        atomic_write(&path, b"{}").unwrap();
        atomic_write(&path, b"{\"version\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"version\":1}");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_mtime_micros() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.rst");
        assert_eq!(mtime_micros(&path), None);

        fs::write(&path, "# Home").unwrap();
        let mtime = mtime_micros(&path).unwrap();
        assert!(mtime > 0);
        assert!(mtime <= now_micros());
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_dir_all(&dir.path().join("missing")).unwrap();
    }
}
