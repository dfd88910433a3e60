use crate::{AllocationKey, Error, Result, Suffix, fs::write_atomic_with};
use chrono::{DateTime, FixedOffset, TimeDelta};
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{error, info};

/// One issued identifier with everything known about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub suffix: Suffix,
    pub identifier: String,
    pub token: String,
    /// Empty until reconciliation succeeds.
    pub link: String,
}

/// The output of one generation run for one key.
#[derive(Debug, Clone)]
pub struct Batch {
    pub key: AllocationKey,
    pub special_code: String,
    pub category_name: String,
    pub color_name: String,
    pub entries: Vec<BatchEntry>,
    pub issued_at: DateTime<FixedOffset>,
}

/// Where a persisted batch ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedBatch {
    pub tracking: PathBuf,
    pub result: PathBuf,
}

/// Durable storage for finished batches.
pub trait BatchSink: Send + Sync {
    /// Writes the tracking record first and the result table second.
    ///
    /// A failure after the tracking record landed is reported as
    /// [`Error::PartialPersist`].
    fn persist(&self, batch: &Batch) -> Result<PersistedBatch>;
}

#[derive(Serialize)]
struct TrackingRecord<'a> {
    category: &'a str,
    color: &'a str,
    special_code: &'a str,
    suffix: &'a str,
    identifier: &'a str,
    token: &'a str,
    short_link: &'a str,
    issued_date: DateTime<FixedOffset>,
    is_scanned: bool,
    scanned_date: Option<String>,
    is_activated: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Serialize)]
struct ResultRecord<'a> {
    #[serde(rename = "Product category")]
    category: &'a str,
    #[serde(rename = "Cap colour")]
    color: &'a str,
    #[serde(rename = "Unique record")]
    link: &'a str,
    #[serde(rename = "Date of generation")]
    issued: &'a str,
}

/// Writes batches as CSV files, one tracking file and one result file per
/// batch, named `<CATEGORY>_<COLOR>_<timestamp>.csv`.
///
/// The tracking directory doubles as the batch history read by
/// [`crate::SequenceCursor`]. Files appear there only once fully written.
#[derive(Debug, Clone)]
pub struct CsvBatchStore {
    tracking_dir: PathBuf,
    result_dir: PathBuf,
}

impl CsvBatchStore {
    pub fn new(tracking_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracking_dir: tracking_dir.into(),
            result_dir: result_dir.into(),
        }
    }

    pub fn tracking_dir(&self) -> &Path {
        &self.tracking_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    fn write_tracking(&self, batch: &Batch) -> Result<PathBuf> {
        let path = free_name(&self.tracking_dir, &batch.key, batch.issued_at)?;
        write_atomic_with(&path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            for entry in &batch.entries {
                writer
                    .serialize(TrackingRecord {
                        category: batch.key.category(),
                        color: batch.key.color(),
                        special_code: &batch.special_code,
                        suffix: entry.suffix.as_str(),
                        identifier: &entry.identifier,
                        token: &entry.token,
                        short_link: &entry.link,
                        issued_date: batch.issued_at,
                        is_scanned: false,
                        scanned_date: None,
                        is_activated: false,
                        latitude: None,
                        longitude: None,
                    })
                    .map_err(io::Error::other)?;
            }
            writer.flush()
        })?;
        Ok(path)
    }

    fn write_result(&self, batch: &Batch) -> Result<PathBuf> {
        let path = free_name(&self.result_dir, &batch.key, batch.issued_at)?;
        let issued = batch.issued_at.format("%d/%m/%Y").to_string();
        write_atomic_with(&path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            for entry in &batch.entries {
                writer
                    .serialize(ResultRecord {
                        category: &batch.category_name,
                        color: &batch.color_name,
                        link: &entry.link,
                        issued: &issued,
                    })
                    .map_err(io::Error::other)?;
            }
            writer.flush()
        })?;
        Ok(path)
    }
}

impl BatchSink for CsvBatchStore {
    fn persist(&self, batch: &Batch) -> Result<PersistedBatch> {
        let tracking = self.write_tracking(batch)?;
        let result = match self.write_result(batch) {
            Ok(path) => path,
            Err(source) => {
                error!(
                    key = %batch.key,
                    tracking = %tracking.display(),
                    %source,
                    "result table not written, tracking record needs manual reconciliation"
                );
                return Err(Error::PartialPersist {
                    tracking,
                    source: Box::new(source),
                });
            }
        };
        info!(
            key = %batch.key,
            ids = batch.entries.len(),
            tracking = %tracking.display(),
            result = %result.display(),
            "batch persisted"
        );
        Ok(PersistedBatch { tracking, result })
    }
}

/// Picks an unused file name in `dir` for a batch issued at `at`.
///
/// Colliding stamps are nudged forward so names keep sorting in issue order.
fn free_name(dir: &Path, key: &AllocationKey, at: DateTime<FixedOffset>) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))?;
    let prefix = key.file_prefix();
    let mut at = at;
    loop {
        let path = dir.join(format!("{prefix}{}.csv", at.format("%Y%m%dT%H%M%S%.6f")));
        if !path.exists() {
            return Ok(path);
        }
        at += TimeDelta::microseconds(1);
    }
}
