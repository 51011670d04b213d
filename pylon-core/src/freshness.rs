//! Freshness: is a telemetry snapshot recent enough to imply a live event?

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::telemetry::TelemetrySnapshot;
use crate::time::parse_capture_time;

/// Default staleness threshold.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 10;

/// True iff the snapshot has a readable capture time and `now - capture < max_age`.
///
/// Missing snapshot, missing timestamp and unparsable timestamp all read as
/// "not fresh". A capture time in the future (clock skew) counts as fresh.
pub fn is_fresh(
    snapshot: Option<&TelemetrySnapshot>,
    max_age: Duration,
    now: DateTime<Utc>,
    tz: Tz,
) -> bool {
    let Some(stamp) = snapshot.and_then(|s| s.last_update.as_deref()) else {
        return false;
    };
    let Some(captured) = parse_capture_time(stamp, tz) else {
        return false;
    };
    now - captured < max_age
}
