use crate::{
    AllocationKey, DigitLengthStore, Error, Result, Step, Suffix, fs::latest_with_prefix,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Recovers where a key's sequence left off.
///
/// The resume point is derived from the most recently *modified* tracking
/// file of the key, never from the timestamps recorded inside it. Batch files
/// are only ever renamed into place once complete, so a run that died before
/// persisting simply leaves the previous batch as the latest one.
#[derive(Debug, Clone)]
pub struct SequenceCursor {
    tracking_dir: PathBuf,
}

#[derive(Deserialize)]
struct SuffixColumn {
    suffix: String,
}

impl SequenceCursor {
    pub fn new(tracking_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracking_dir: tracking_dir.into(),
        }
    }

    /// Returns the first suffix the next batch for `key` should issue.
    ///
    /// With no history this is the zero suffix of `width`. Otherwise it is the
    /// successor of the last suffix in the latest batch. When that successor
    /// grows the width, the growth is persisted through `digits` before the
    /// suffix is returned.
    pub fn resume(
        &self,
        key: &AllocationKey,
        width: usize,
        digits: &DigitLengthStore,
    ) -> Result<Suffix> {
        let Some(path) = latest_with_prefix(&self.tracking_dir, &key.file_prefix())? else {
            trace!(%key, "no batch history");
            return Suffix::zero(width);
        };
        let Some(last) = last_suffix(&path)? else {
            trace!(%key, path = %path.display(), "latest batch is empty");
            return Suffix::zero(width);
        };

        let (next, step) = last.successor();
        if let Step::Grew { width: grown } = step {
            debug!(%key, %last, grown, "resume point crosses width boundary");
            digits.write(key, grown)?;
        }
        Ok(next.pad_to(width))
    }
}

fn last_suffix(path: &Path) -> Result<Option<Suffix>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| Error::from_csv(path, e))?;
    let mut last = None;
    for row in reader.deserialize::<SuffixColumn>() {
        last = Some(row.map_err(|e| Error::from_csv(path, e))?.suffix);
    }
    last.map(|raw| {
        Suffix::parse(raw.trim()).map_err(|e| Error::corrupt(path, e.to_string()))
    })
    .transpose()
}
