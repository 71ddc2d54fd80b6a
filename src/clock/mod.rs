// src/clock/mod.rs

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::{fmt, str::FromStr};

use crate::error::IngestError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Symbolic day boundaries, resolved against the source region's calendar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeReference {
    TodayStart,
    TodayEnd,
    YesterdayStart,
    YesterdayEnd,
}

impl TimeReference {
    pub fn as_str(&self) -> &str {
        match self {
            TimeReference::TodayStart => "today-start",
            TimeReference::TodayEnd => "today-end",
            TimeReference::YesterdayStart => "yesterday-start",
            TimeReference::YesterdayEnd => "yesterday-end",
        }
    }
}

impl FromStr for TimeReference {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "today-start" => Ok(TimeReference::TodayStart),
            "today-end" => Ok(TimeReference::TodayEnd),
            "yesterday-start" => Ok(TimeReference::YesterdayStart),
            "yesterday-end" => Ok(TimeReference::YesterdayEnd),
            other => Err(IngestError::Config(format!("unknown time reference '{other}'"))),
        }
    }
}

impl fmt::Display for TimeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of "now". Swapped for a fixed instant in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// `00:00:00` of `day`.
pub fn day_start(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

/// `23:59:59` of `day`.
pub fn day_end(day: NaiveDate) -> NaiveDateTime {
    day_start(day) + Duration::seconds(SECONDS_PER_DAY - 1)
}

/// `23:59:59 UTC` of `day`, the value stored in the checkpoint once `day` is done.
pub fn day_end_utc(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day_end(day))
}

/// Calendar days left to ingest, bounded by civil start/end instants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayRange {
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DayRange {
    pub fn new(begin: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { begin, end }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Every calendar date from `begin` to `end`, inclusive.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.end.date();
        let first = self.begin.date();
        let empty = self.is_empty();
        first
            .iter_days()
            .take_while(move |d| !empty && *d <= last)
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.end.date() - self.begin.date()).num_days() + 1) as usize
        }
    }
}

/// The request bounds for one UTC calendar day, rendered in the source region's
/// civil time. The two ends may carry different offsets on a DST transition day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayWindow {
    pub day: NaiveDate,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DayWindow {
    pub const PARAM_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S%:z";

    pub fn start_param(&self) -> String {
        self.start.format(Self::PARAM_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(Self::PARAM_FORMAT).to_string()
    }
}

/// Resolves symbolic references, per-day offsets and the pending ingestion range
/// for a source region.
pub struct TimeResolver<C = SystemClock> {
    tz: Tz,
    clock: C,
}

impl TimeResolver<SystemClock> {
    pub fn system(tz: Tz) -> Self {
        Self::new(tz, SystemClock)
    }
}

impl<C: Clock> TimeResolver<C> {
    pub fn new(tz: Tz, clock: C) -> Self {
        Self { tz, clock }
    }

    /// Today's date in the source region.
    pub fn local_today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.tz).date_naive()
    }

    pub fn resolve(&self, reference: TimeReference) -> NaiveDateTime {
        let today = self.local_today();
        let yesterday = today - Duration::days(1);
        match reference {
            TimeReference::TodayStart => day_start(today),
            TimeReference::TodayEnd => day_end(today),
            TimeReference::YesterdayStart => day_start(yesterday),
            TimeReference::YesterdayEnd => day_end(yesterday),
        }
    }

    /// UTC offset of the source region in effect at the start of `date`.
    pub fn local_offset(&self, date: NaiveDate) -> Duration {
        let offset = self.tz.offset_from_utc_datetime(&day_start(date)).fix();
        Duration::seconds(offset.local_minus_utc() as i64)
    }

    /// Latest day whose whole UTC span is in the past and whose local
    /// calendar day is over. Fetch days are UTC days, so right after local
    /// midnight the local yesterday may still be running in UTC.
    pub fn last_complete_day(&self) -> NaiveDate {
        let local_yesterday = self.resolve(TimeReference::YesterdayEnd).date();
        let utc_yesterday = self.clock.now().date_naive() - Duration::days(1);
        local_yesterday.min(utc_yesterday)
    }

    /// Days between the checkpoint and the end of yesterday. Empty when caught up.
    pub fn derive_range(&self, checkpoint: DateTime<Utc>) -> DayRange {
        let begin = day_start((checkpoint.naive_utc() + Duration::days(1)).date());
        let end = day_end(self.last_complete_day());
        DayRange::new(begin, end)
    }

    /// Request bounds covering `day` from 00:00 to 23:59 UTC in local civil time.
    pub fn day_window(&self, day: NaiveDate) -> DayWindow {
        let start = Utc.from_utc_datetime(&day_start(day));
        let end = start + Duration::minutes(23 * 60 + 59);
        DayWindow {
            day,
            start: start.with_timezone(&self.tz).fixed_offset(),
            end: end.with_timezone(&self.tz).fixed_offset(),
        }
    }
}
