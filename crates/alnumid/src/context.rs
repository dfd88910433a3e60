use crate::{
    AllocationKey, Clock, DigitLengthStore, QuotaLedger, QuotaPolicy, Result, SequenceCursor,
    Suffix, WidthSink,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{Mutex as KeyMutex, OwnedMutexGuard};
use tracing::debug;

/// Where every persisted record lives, relative to one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub tracking_dir: PathBuf,
    pub result_dir: PathBuf,
    pub widths_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub token_key_path: PathBuf,
}

impl StorageLayout {
    /// The conventional layout under `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            tracking_dir: root.join("tracking"),
            result_dir: root.join("results"),
            widths_dir: root.join("widths"),
            ledger_path: root.join("quota_ledger.csv"),
            token_key_path: root.join("keys").join("token.key"),
        }
    }
}

struct Shared {
    digits: DigitLengthStore,
    quota: QuotaLedger,
    /// Next suffix after the last range handed out in this process.
    reservations: HashMap<AllocationKey, Suffix>,
}

/// Held by a run for one key from positioning until its batch is persisted.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Process-wide state shared by every allocation run.
///
/// All reads and writes of widths and of the quota ledger happen under one
/// lock that spans every key. The lock is held only for those short
/// read-modify-write sections. Suffix production, token lookups and batch
/// writes run without it.
///
/// Runs on the same key are serialised separately through [`Self::lock_key`].
/// The resume point is read from the newest batch file, so a key's batches
/// must land on disk in the order their ranges were handed out.
///
/// Construct one per process and hand it to runs by reference (usually via
/// `Arc`).
pub struct AllocationContext {
    shared: Mutex<Shared>,
    key_locks: Mutex<HashMap<AllocationKey, Arc<KeyMutex<()>>>>,
    cursor: SequenceCursor,
}

impl AllocationContext {
    pub fn new(
        layout: &StorageLayout,
        default_width: usize,
        policy: QuotaPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            shared: Mutex::new(Shared {
                digits: DigitLengthStore::new(&layout.widths_dir, default_width)?,
                quota: QuotaLedger::new(&layout.ledger_path, policy, clock),
                reservations: HashMap::new(),
            }),
            key_locks: Mutex::new(HashMap::new()),
            cursor: SequenceCursor::new(&layout.tracking_dir),
        })
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        *self.shared.lock().quota.policy()
    }

    pub fn remaining(&self) -> Result<u64> {
        self.shared.lock().quota.remaining()
    }

    /// Atomically checks and records `count` identifiers against the quota.
    pub fn admit(&self, count: u64, category: &str, special_code: &str) -> Result<u64> {
        self.shared.lock().quota.admit(count, category, special_code)
    }

    pub fn width(&self, key: &AllocationKey) -> Result<usize> {
        self.shared.lock().digits.read(key)
    }

    /// Waits until no other run holds `key`, then holds it until the guard
    /// is dropped.
    pub async fn lock_key(&self, key: &AllocationKey) -> KeyGuard {
        let lock = self
            .key_locks
            .lock()
            .entry(key.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Decides where a run of `count` suffixes for `key` starts, and reserves
    /// that range against later runs in this process.
    ///
    /// The start is the later of the persisted resume point and the end of
    /// the last reservation, padded to the current width. A width implied by
    /// the reservation is persisted before returning.
    pub fn position(&self, key: &AllocationKey, count: u64) -> Result<Suffix> {
        let mut shared = self.shared.lock();
        let width = shared.digits.read(key)?;
        let resumed = self.cursor.resume(key, width, &shared.digits)?;

        let start = match shared.reservations.get(key) {
            Some(reserved) if *reserved > resumed => reserved.clone(),
            _ => resumed,
        };
        let start = start.pad_to(width);
        if start.width() > width {
            shared.digits.write(key, start.width())?;
        }

        let end = start.advanced_by(count)?;
        debug!(%key, %start, %end, count, "range reserved");
        shared.reservations.insert(key.clone(), end);
        Ok(start)
    }
}

impl WidthSink for &AllocationContext {
    fn grow(&mut self, key: &AllocationKey, width: usize) -> Result<()> {
        self.shared.lock().digits.write(key, width).map(drop)
    }
}
