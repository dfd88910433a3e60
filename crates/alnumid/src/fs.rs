//! Small filesystem helpers shared by the persisted records.

use crate::{Error, Result};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Writes `path` through a dot-prefixed sibling and renames it into place, so
/// readers only ever observe complete files.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic_with(path, |file| file.write_all(contents))
}

/// Like [`write_atomic`], handing the temporary file to `fill`.
pub(crate) fn write_atomic_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let tmp = temp_sibling(path);
    let result = File::create(&tmp)
        .and_then(|mut file| {
            fill(&mut file)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));

    result.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::storage(path, e)
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Finds the most recently modified `<prefix>*.csv` file in `dir`.
///
/// Ties on modification time fall back to the file name, which embeds the
/// batch timestamp. A missing directory yields `None`.
pub(crate) fn latest_with_prefix(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage(dir, e)),
    };

    let mut latest: Option<(SystemTime, String, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| Error::storage(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) || !name.ends_with(".csv") {
            continue;
        }
        let meta = entry.metadata().map_err(|e| Error::storage(entry.path(), e))?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map_err(|e| Error::storage(entry.path(), e))?;
        let newer = latest
            .as_ref()
            .is_none_or(|(t, n, _)| (modified, &name) > (*t, n));
        if newer {
            latest = Some((modified, name, entry.path()));
        }
    }
    Ok(latest.map(|(_, _, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AL_RED.txt");
        write_atomic(&path, b"7").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "7");
        assert!(!dir.path().join(".AL_RED.txt.tmp").exists());
    }

    #[test]
    fn latest_ignores_other_keys_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("AL_RED_20240101T000000.000.csv"), "a").unwrap();
        fs::write(dir.path().join("AL_RED_20240102T000000.000.csv"), "b").unwrap();
        fs::write(dir.path().join(".AL_RED_20240103T000000.000.csv.tmp"), "c").unwrap();
        fs::write(dir.path().join("AL_BLK_20240104T000000.000.csv"), "d").unwrap();

        let latest = latest_with_prefix(dir.path(), "AL_RED_").unwrap().unwrap();
        // Same mtime resolution on fast filesystems: the name breaks the tie.
        assert!(
            latest.ends_with("AL_RED_20240102T000000.000.csv"),
            "{}",
            latest.display()
        );
    }

    #[test]
    fn missing_directory_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            latest_with_prefix(&dir.path().join("nope"), "AL_RED_")
                .unwrap()
                .is_none()
        );
    }
}
