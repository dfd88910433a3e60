//! Error types for the allocation engine.
//!
//! The variants fall into four families:
//!
//! - **Rejections** ([`Error::InvalidRequest`], [`Error::QuotaExceeded`]) are
//!   raised synchronously, before any identifier is allocated.
//! - **Storage failures** ([`Error::Storage`], [`Error::CorruptRecord`],
//!   [`Error::PartialPersist`]) abort the run for the affected key. Defaults
//!   are never substituted once a record is known to exist.
//! - **Consistency violations** ([`Error::ConsistencyViolation`]) indicate a
//!   bug in the allocator, not a transient condition.
//! - **Resolution stalls** ([`Error::ResolutionStalled`]) are only produced
//!   when reconciliation runs under a bounded pass policy.

use crate::AllocationKey;
use std::path::PathBuf;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the allocation engine can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The request was malformed and was rejected before any work began.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The request asks for more identifiers than the current quota window
    /// still allows.
    #[error("quota exceeded: requested {requested}, remaining {remaining}")]
    QuotaExceeded { requested: u64, remaining: u64 },

    /// A persisted record could not be read or written.
    #[error("storage failure at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record exists but its content cannot be trusted.
    #[error("corrupt record at {}: {reason}", .path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    /// The tracking record was written but the result table was not. The
    /// operator must reconcile the two files by hand.
    #[error("partial persist: tracking record {} written, result table failed: {source}", .tracking.display())]
    PartialPersist {
        tracking: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// A suffix was emitted twice within one batch.
    #[error("duplicate suffix {suffix} emitted for {key}")]
    ConsistencyViolation { key: AllocationKey, suffix: String },

    /// A string could not be interpreted as a suffix.
    #[error("invalid suffix {value:?}: {reason}")]
    InvalidSuffix { value: String, reason: &'static str },

    /// The suffix space cannot grow any further.
    #[error("suffix width exhausted beyond {max_width} symbols")]
    WidthExhausted { max_width: usize },

    /// Reconciliation gave up after the configured number of passes.
    #[error("{unresolved} tokens still unresolved after {passes} passes")]
    ResolutionStalled { unresolved: usize, passes: u32 },
}

impl Error {
    /// Returns `true` for errors raised before any work began.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. } | Self::QuotaExceeded { .. })
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Maps a `csv` failure onto the storage family, keeping I/O errors as
    /// [`Error::Storage`] and everything else as [`Error::CorruptRecord`].
    pub(crate) fn from_csv(path: impl Into<PathBuf>, err: csv::Error) -> Self {
        let path = path.into();
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(source) => Self::storage(path, source),
                other => Self::corrupt(path, format!("{other:?}")),
            }
        } else {
            Self::corrupt(path, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_flagged() {
        assert!(Error::invalid("x").is_rejection());
        assert!(
            Error::QuotaExceeded {
                requested: 10,
                remaining: 5
            }
            .is_rejection()
        );
        assert!(!Error::WidthExhausted { max_width: 24 }.is_rejection());
    }

    #[test]
    fn partial_persist_names_tracking_file() {
        let err = Error::PartialPersist {
            tracking: PathBuf::from("track/AL_RED_1.csv"),
            source: Box::new(Error::storage(
                "result/AL_RED_1.csv",
                std::io::Error::other("disk full"),
            )),
        };
        let msg = err.to_string();
        assert!(msg.contains("track/AL_RED_1.csv"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }
}
