use crate::{
    Clock, Error, ResetSchedule, Result,
    fs::write_atomic_with,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

/// Limits on identifier issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Identifiers that may be issued within one window.
    pub max_ids: u64,
    /// When the window resets.
    pub schedule: ResetSchedule,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_ids: 200_000,
            schedule: ResetSchedule::default(),
        }
    }
}

/// One accepted request, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaEntry {
    pub count: u64,
    pub category: String,
    pub special_code: String,
    pub started_at: DateTime<FixedOffset>,
}

/// Append-only record of issued identifier counts.
///
/// Only entries at or after the schedule's window start count against the
/// quota. Older entries are pruned before every read. The ledger itself does
/// not lock; [`crate::AllocationContext`] owns it behind its mutex so that a
/// check-then-append can never interleave with another.
pub struct QuotaLedger {
    path: PathBuf,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(path: impl Into<PathBuf>, policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            policy,
            clock,
        }
    }

    pub const fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifiers still available in the current window.
    pub fn remaining(&self) -> Result<u64> {
        let entries = self.prune()?;
        Ok(self.policy.max_ids.saturating_sub(consumed(&entries)))
    }

    /// Records `count` identifiers against the quota.
    ///
    /// Rejects a zero count or one larger than [`Self::remaining`]; a rejected
    /// request leaves the ledger untouched. Returns what remains afterwards.
    pub fn admit(&self, count: u64, category: &str, special_code: &str) -> Result<u64> {
        if count == 0 {
            return Err(Error::invalid("count must be greater than 0"));
        }
        let entries = self.prune()?;
        let remaining = self.policy.max_ids.saturating_sub(consumed(&entries));
        if count > remaining {
            return Err(Error::QuotaExceeded {
                requested: count,
                remaining,
            });
        }

        let entry = QuotaEntry {
            count,
            category: category.to_owned(),
            special_code: special_code.to_owned(),
            started_at: self.policy.schedule.local(self.clock.now()),
        };
        self.append(&entry)?;
        info!(count, remaining = remaining - count, "quota admitted");
        Ok(remaining - count)
    }

    /// Drops entries older than the window start and returns the survivors.
    ///
    /// Safe to call repeatedly; a ledger with nothing left is removed.
    pub fn prune(&self) -> Result<Vec<QuotaEntry>> {
        let entries = self.read_all()?;
        let boundary = self.policy.schedule.window_start(self.clock.now());
        let total = entries.len();
        let kept: Vec<_> = entries
            .into_iter()
            .filter(|e| e.started_at >= boundary)
            .collect();

        if kept.len() == total {
            return Ok(kept);
        }
        debug!(dropped = total - kept.len(), %boundary, "pruning quota ledger");
        if kept.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::storage(&self.path, e)),
            }
        } else {
            write_atomic_with(&self.path, |file| {
                let mut writer = csv::Writer::from_writer(file);
                for entry in &kept {
                    writer.serialize(entry).map_err(io::Error::other)?;
                }
                writer.flush()
            })?;
        }
        Ok(kept)
    }

    fn read_all(&self) -> Result<Vec<QuotaEntry>> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(Error::from_csv(&self.path, e)),
        };
        reader
            .deserialize()
            .map(|row| row.map_err(|e| Error::from_csv(&self.path, e)))
            .collect()
    }

    fn append(&self, entry: &QuotaEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage(&self.path, e))?;
        let needs_header = file
            .metadata()
            .map_err(|e| Error::storage(&self.path, e))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(entry)
            .map_err(|e| Error::from_csv(&self.path, e))?;
        writer.flush().map_err(|e| Error::storage(&self.path, e))
    }
}

fn consumed(entries: &[QuotaEntry]) -> u64 {
    entries.iter().map(|e| e.count).sum()
}

fn is_not_found(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(e) if e.kind() == io::ErrorKind::NotFound)
}
