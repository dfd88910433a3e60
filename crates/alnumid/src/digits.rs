use crate::{AllocationKey, Error, MAX_WIDTH, Result, fs::write_atomic};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Persists the current suffix width of every [`AllocationKey`].
///
/// One small text file per key (`<dir>/<CATEGORY>_<COLOR>.txt`) holds a single
/// integer. A missing file is created with the default width on first read.
/// An unreadable or unparsable file is fatal: substituting the default there
/// could shrink the width and re-issue old suffixes.
///
/// The store performs no locking of its own. Callers serialize access through
/// [`crate::AllocationContext`].
#[derive(Debug, Clone)]
pub struct DigitLengthStore {
    dir: PathBuf,
    default_width: usize,
}

impl DigitLengthStore {
    pub fn new(dir: impl Into<PathBuf>, default_width: usize) -> Result<Self> {
        if default_width == 0 || default_width > MAX_WIDTH {
            return Err(Error::invalid(format!(
                "default width must be between 1 and {MAX_WIDTH}"
            )));
        }
        Ok(Self {
            dir: dir.into(),
            default_width,
        })
    }

    pub const fn default_width(&self) -> usize {
        self.default_width
    }

    fn path_for(&self, key: &AllocationKey) -> PathBuf {
        self.dir
            .join(format!("{}_{}.txt", key.category(), key.color()))
    }

    /// Returns the persisted width, creating the record on first use.
    pub fn read(&self, key: &AllocationKey) -> Result<usize> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => parse_width(&path, &raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(%key, width = self.default_width, "creating width record");
                self.persist(&path, self.default_width)?;
                Ok(self.default_width)
            }
            Err(e) => Err(Error::storage(path, e)),
        }
    }

    /// Raises the persisted width to `width` and returns the effective width.
    ///
    /// A request to lower the width is ignored; the stored value wins.
    pub fn write(&self, key: &AllocationKey, width: usize) -> Result<usize> {
        if width == 0 || width > MAX_WIDTH {
            return Err(Error::WidthExhausted {
                max_width: MAX_WIDTH,
            });
        }
        let current = self.read(key)?;
        if width <= current {
            return Ok(current);
        }
        debug!(%key, from = current, to = width, "growing width");
        self.persist(&self.path_for(key), width)?;
        Ok(width)
    }

    fn persist(&self, path: &Path, width: usize) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))?;
        write_atomic(path, width.to_string().as_bytes())
    }
}

fn parse_width(path: &Path, raw: &str) -> Result<usize> {
    let width: usize = raw
        .trim()
        .parse()
        .map_err(|e| Error::corrupt(path, format!("width {raw:?}: {e}")))?;
    if width == 0 || width > MAX_WIDTH {
        return Err(Error::corrupt(path, format!("width {width} out of range")));
    }
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AllocationKey {
        AllocationKey::new("AL", "RED").unwrap()
    }

    #[test]
    fn first_read_creates_default_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DigitLengthStore::new(dir.path().join("widths"), 6).unwrap();

        assert_eq!(store.read(&key()).unwrap(), 6);
        let raw = fs::read_to_string(dir.path().join("widths/AL_RED.txt")).unwrap();
        assert_eq!(raw, "6");
    }

    #[test]
    fn width_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let store = DigitLengthStore::new(dir.path(), 2).unwrap();

        assert_eq!(store.write(&key(), 3).unwrap(), 3);
        assert_eq!(store.write(&key(), 2).unwrap(), 3);
        assert_eq!(store.read(&key()).unwrap(), 3);
    }

    #[test]
    fn keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DigitLengthStore::new(dir.path(), 6).unwrap();
        let other = AllocationKey::new("AL", "BLK").unwrap();

        store.write(&key(), 7).unwrap();
        assert_eq!(store.read(&other).unwrap(), 6);
    }

    #[test]
    fn corrupt_record_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DigitLengthStore::new(dir.path(), 6).unwrap();
        fs::write(dir.path().join("AL_RED.txt"), "six").unwrap();

        assert!(matches!(
            store.read(&key()),
            Err(Error::CorruptRecord { .. })
        ));
        // The corrupt value is left in place for the operator.
        let raw = fs::read_to_string(dir.path().join("AL_RED.txt")).unwrap();
        assert_eq!(raw, "six");
    }

    #[test]
    fn rejects_unsupported_default() {
        assert!(DigitLengthStore::new("x", 0).is_err());
        assert!(DigitLengthStore::new("x", MAX_WIDTH + 1).is_err());
    }
}
