//! Billing-period calendar.
//!
//! Periods are `YYYY-MM` tokens in the plan's civil timezone
//! (`America/Argentina/Mendoza` unless configured otherwise). The current
//! period comes from projecting the instant into that timezone and taking
//! its year-month; there is no UTC arithmetic anywhere.

use jiff::Timestamp;
use jiff::tz::TimeZone;
use payloads::Period;

use crate::time::TimeSource;

/// The billing period the given instant falls in, per the civil timezone.
pub fn period_at(instant: Timestamp, tz: &TimeZone) -> Period {
    let zoned = instant.to_zoned(tz.clone());
    Period::from_parts(zoned.year(), zoned.month() as u8)
        .expect("a civil date always has a valid year-month")
}

/// The current billing period.
pub fn now_period(time_source: &TimeSource, tz: &TimeZone) -> Period {
    period_at(time_source.now(), tz)
}

/// Half-open instant window `[start, end)` covering a period's civil month.
pub fn period_bounds(
    period: &Period,
    tz: &TimeZone,
) -> (Timestamp, Timestamp) {
    let first_of = |p: &Period| {
        jiff::civil::date(p.year(), p.month() as i8, 1)
            .to_zoned(tz.clone())
            .expect("the first of a month exists in every timezone")
            .timestamp()
    };
    (first_of(period), first_of(&period.succ()))
}
