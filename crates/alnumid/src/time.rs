use chrono::{DateTime, Days, FixedOffset, NaiveTime, Offset, TimeZone, Utc};

/// A source of wall-clock time.
///
/// This abstraction lets the quota ledger and the batch persister run against
/// the system clock in production and a fixed instant in tests.
///
/// # Example
///
/// ```
/// use alnumid::Clock;
/// use chrono::{DateTime, TimeZone, Utc};
///
/// struct FixedTime;
/// impl Clock for FixedTime {
///     fn now(&self) -> DateTime<Utc> {
///         Utc.with_ymd_and_hms(2024, 3, 10, 4, 30, 0).unwrap()
///     }
/// }
///
/// assert_eq!(FixedTime.now().timestamp(), 1_710_045_000);
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// The fixed daily instant at which the issuance quota resets.
///
/// The window is *not* a sliding 24 hours. Entries count while they are at or
/// after [`Self::window_start`], which is the reset time on the day before
/// "today" in the configured offset, whatever the current time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSchedule {
    offset: FixedOffset,
    at: NaiveTime,
}

impl ResetSchedule {
    /// Returns `None` for an out-of-range hour, minute or offset.
    pub fn new(hour: u32, minute: u32, utc_offset_minutes: i32) -> Option<Self> {
        Some(Self {
            offset: FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?,
            at: NaiveTime::from_hms_opt(hour, minute, 0)?,
        })
    }

    /// The timezone ledger timestamps and batch dates are rendered in.
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Converts an instant into the schedule's offset.
    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    /// Start of the quota window containing `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.local(now).date_naive();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let local = yesterday.and_time(self.at);
        // A fixed offset never produces gaps or folds.
        self.offset
            .from_local_datetime(&local)
            .single()
            .map_or(now, |dt| dt.with_timezone(&Utc))
    }
}

impl Default for ResetSchedule {
    /// 13:00 at UTC+05:30.
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(330 * 60).unwrap_or(Utc.fix()),
            at: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
        }
    }
}
