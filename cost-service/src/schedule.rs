//! Calendar-boundary reset scheduling.

use cost_client::domain::Interval;
use jiff::{tz::TimeZone, Timestamp};
use time::OffsetDateTime;

use crate::error::AccrualError;

/// Wall-clock source for boundary checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// First instant of the next `interval` period strictly after `now`, on the
/// local calendar of `zone`.
///
/// The zone's rules are applied to the boundary itself, so a day that
/// contains a daylight-saving transition is 23 or 25 hours long.
pub fn next_boundary(
    interval: Interval,
    now: OffsetDateTime,
    zone: &TimeZone,
) -> Result<OffsetDateTime, AccrualError> {
    let out_of_range = || AccrualError::BoundaryOutOfRange(interval);

    let now = Timestamp::from_nanosecond(now.unix_timestamp_nanos()).map_err(|_| out_of_range())?;
    let today = now.to_zoned(zone.clone()).date();

    let date = match interval {
        Interval::Daily => today.tomorrow(),
        Interval::Monthly => today.last_of_month().tomorrow(),
        Interval::Yearly => today.last_of_year().tomorrow(),
    }
    .map_err(|_| out_of_range())?;

    // Where local midnight falls in a gap, the first instant after it is used.
    let start = date.to_zoned(zone.clone()).map_err(|_| out_of_range())?;
    OffsetDateTime::from_unix_timestamp_nanos(start.timestamp().as_nanosecond())
        .map_err(|_| out_of_range())
}

/// Single-shot wake-up at the next boundary of one interval.
///
/// After firing, the next boundary is computed from the boundary that just
/// fired rather than from a fresh clock reading, so a timer that wakes a
/// little early or late still yields exactly one reset per boundary.
#[derive(Debug, Clone)]
pub struct ResetScheduler {
    interval: Interval,
    zone: TimeZone,
    next_reset_at: OffsetDateTime,
}

impl ResetScheduler {
    /// Arms the scheduler relative to `now`. A boundary missed while the
    /// process was down is not replayed.
    pub fn new(
        interval: Interval,
        zone: TimeZone,
        now: OffsetDateTime,
    ) -> Result<Self, AccrualError> {
        let next_reset_at = next_boundary(interval, now, &zone)?;
        Ok(Self {
            interval,
            zone,
            next_reset_at,
        })
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn next_reset_at(&self) -> OffsetDateTime {
        self.next_reset_at
    }

    /// Whether the armed boundary has been reached at `now`.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        now >= self.next_reset_at
    }

    /// Re-arms after a firing and returns the boundary that fired.
    pub fn on_fire(&mut self) -> Result<OffsetDateTime, AccrualError> {
        let fired = self.next_reset_at;
        self.next_reset_at = next_boundary(self.interval, fired, &self.zone)?;
        Ok(fired)
    }

    /// Time left until the armed boundary, zero when it is already due.
    pub fn remaining(&self, now: OffsetDateTime) -> std::time::Duration {
        let left = self.next_reset_at - now;
        if left.is_negative() {
            std::time::Duration::ZERO
        } else {
            left.unsigned_abs()
        }
    }

    /// Monotonic deadline for the armed boundary, given the wall-clock `now`.
    pub fn deadline(&self, now: OffsetDateTime) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.remaining(now)
    }
}

/// Name for logs: the IANA name when the zone has one.
pub fn zone_label(zone: &TimeZone) -> &str {
    zone.iana_name().unwrap_or("fixed offset")
}
