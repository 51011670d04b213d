//! Time utilities: schedule-local start times, capture timestamps, and the clock seam.

use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Source of "now" for the detector and scheduler.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Resolve a schedule timezone label.
///
/// Accepts IANA names ("America/Chicago") and the US abbreviations schedule
/// files commonly carry ("ET", "CT", "MT", "PT").
pub fn resolve_timezone(label: &str) -> Option<Tz> {
    let label = label.trim();
    let alias = match label.to_ascii_uppercase().as_str() {
        "ET" | "EST" | "EDT" => Some(chrono_tz::America::New_York),
        "CT" | "CST" | "CDT" => Some(chrono_tz::America::Chicago),
        "MT" | "MST" | "MDT" => Some(chrono_tz::America::Denver),
        "PT" | "PST" | "PDT" => Some(chrono_tz::America::Los_Angeles),
        "UTC" | "Z" => Some(chrono_tz::UTC),
        _ => None,
    };
    alias.or_else(|| label.parse().ok())
}

/// Parse a time-of-day like "14:00", "14:00:30" or "2:00 PM".
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

/// Turn a schedule date ("2025-06-01") and optional start time into a UTC instant.
///
/// A missing or blank start time means midnight. During a DST fall-back overlap the
/// earlier instant is used; times that do not exist locally (spring-forward gap)
/// are an error.
pub fn local_start_to_utc(date: &str, start_time: Option<&str>, tz: Tz) -> Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{date}': {e}"))?;

    let ndt = match start_time.map(str::trim).filter(|s| !s.is_empty()) {
        Some(t) => day.and_time(
            parse_time_of_day(t).ok_or_else(|| anyhow::anyhow!("invalid start time '{t}'"))?,
        ),
        None => day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid midnight for {date}"))?,
    };

    let local = tz
        .from_local_datetime(&ndt)
        .earliest()
        .ok_or_else(|| anyhow::anyhow!("nonexistent local time (DST gap): {ndt} {tz}"))?;

    Ok(local.with_timezone(&Utc))
}

/// Parse a capture timestamp.
///
/// RFC 3339 strings carry their own offset; naive ISO strings
/// ("2025-06-01T09:00:00.123456") are read as local time in `tz`.
pub fn parse_capture_time(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Helper: format a UTC time into RFC3339.
pub fn to_rfc3339_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
