use crate::{AllocationKey, Error, Result, Step, Suffix};
use std::collections::HashSet;
use tracing::{debug, error};

/// Receives width growth as it happens during allocation.
///
/// Implementations must persist the new width before returning; the
/// allocator keeps emitting suffixes of the new width right after.
pub trait WidthSink {
    fn grow(&mut self, key: &AllocationKey, width: usize) -> Result<()>;
}

impl<F> WidthSink for F
where
    F: FnMut(&AllocationKey, usize) -> Result<()>,
{
    fn grow(&mut self, key: &AllocationKey, width: usize) -> Result<()> {
        self(key, width)
    }
}

/// Produces the suffixes of one batch in strictly increasing order.
///
/// The starting suffix is emitted first; every later call advances by one
/// [`Suffix::step`]. Stepping is lazy, so the allocator never advances past
/// the last suffix it hands out and never persists a growth nobody used.
///
/// Every emitted suffix is remembered for the lifetime of the allocator. A
/// repeat is reported as [`Error::ConsistencyViolation`] and indicates a bug,
/// never a condition to retry.
///
/// # Example
///
/// ```
/// use alnumid::{AllocationKey, Result, Suffix, SuffixAllocator};
///
/// let key = AllocationKey::new("AL", "RED").unwrap();
/// let mut grown = Vec::new();
/// let mut allocator = SuffixAllocator::new(
///     key,
///     Suffix::parse("ZY").unwrap(),
///     |_: &AllocationKey, width: usize| -> Result<()> {
///         grown.push(width);
///         Ok(())
///     },
/// );
///
/// let batch = allocator.take(3).unwrap();
/// let batch: Vec<_> = batch.iter().map(Suffix::as_str).collect();
/// assert_eq!(batch, ["ZY", "ZZ", "100"]);
/// drop(allocator);
/// assert_eq!(grown, [3]);
/// ```
pub struct SuffixAllocator<S: WidthSink> {
    key: AllocationKey,
    next: Suffix,
    started: bool,
    emitted: HashSet<Suffix>,
    sink: S,
}

impl<S: WidthSink> SuffixAllocator<S> {
    pub fn new(key: AllocationKey, start: Suffix, sink: S) -> Self {
        Self {
            key,
            next: start,
            started: false,
            emitted: HashSet::new(),
            sink,
        }
    }

    pub const fn key(&self) -> &AllocationKey {
        &self.key
    }

    /// Number of suffixes handed out so far.
    pub fn emitted(&self) -> usize {
        self.emitted.len()
    }

    /// Returns the next suffix of the batch.
    pub fn try_next(&mut self) -> Result<Suffix> {
        if self.started {
            if let Step::Grew { width } = self.next.step() {
                debug!(key = %self.key, width, "width grew mid-batch");
                self.sink.grow(&self.key, width)?;
            }
        }
        self.started = true;

        let suffix = self.next.clone();
        if !self.emitted.insert(suffix.clone()) {
            error!(key = %self.key, %suffix, "duplicate suffix within batch");
            return Err(Error::ConsistencyViolation {
                key: self.key.clone(),
                suffix: suffix.to_string(),
            });
        }
        Ok(suffix)
    }

    /// Collects the next `count` suffixes.
    pub fn take(&mut self, count: usize) -> Result<Vec<Suffix>> {
        self.emitted.reserve(count);
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            batch.push(self.try_next()?);
        }
        Ok(batch)
    }
}
