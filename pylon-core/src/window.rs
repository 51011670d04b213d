//! Schedule window: does "now" fall inside any event's active band?
//!
//! The band opens `before` ahead of the nominal start (pre-race ceremonies,
//! early green flags) and stays open `after` it (rain delays, long races).

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::schedule::{ScheduleSnapshot, ScheduledEvent};
use crate::series::Series;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub before: Duration,
    pub after: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            before: Duration::hours(2),
            after: Duration::hours(6),
        }
    }
}

/// The event whose window contains "now".
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMatch {
    /// Series label as written in the schedule file.
    pub series_label: Option<String>,
    pub event: ScheduledEvent,
    /// Nominal start instant.
    pub start: DateTime<Utc>,
}

impl WindowMatch {
    /// Series to poll for this event; unrecognized labels map to `default`.
    pub fn series_or(&self, default: Series) -> Series {
        Series::from_label_or(self.series_label.as_deref(), default)
    }
}

/// First event (series in caller order, then file order) whose window contains `now`.
///
/// Bounds are inclusive on both ends. Events that cannot be placed in time are
/// skipped.
pub fn active_window(
    schedule: &ScheduleSnapshot,
    now: DateTime<Utc>,
    cfg: &WindowConfig,
    default_tz: Tz,
) -> Option<WindowMatch> {
    for sched in &schedule.series {
        let tz = sched.tz_or(default_tz);

        for race in &sched.races {
            let start = match race.start_utc(tz) {
                Ok(s) => s,
                Err(e) => {
                    debug!(series = sched.series_label(), race = %race.display_name(), error = %e, "skipping unreadable schedule entry");
                    continue;
                }
            };

            if start - cfg.before <= now && now <= start + cfg.after {
                return Some(WindowMatch {
                    series_label: sched.series.clone(),
                    event: race.clone(),
                    start,
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::SeriesSchedule;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap()
    }

    fn one_event() -> ScheduleSnapshot {
        ScheduleSnapshot::new(vec![SeriesSchedule::new(
            "CUP",
            vec![ScheduledEvent::new("2025-06-01", "14:00", "Test 400")],
        )])
    }

    fn check(now: DateTime<Utc>) -> Option<WindowMatch> {
        active_window(&one_event(), now, &WindowConfig::default(), chrono_tz::UTC)
    }

    #[test]
    fn window_bounds_are_inclusive() {
        assert!(check(t0() - Duration::hours(2)).is_some());
        assert!(check(t0()).is_some());
        assert!(check(t0() + Duration::hours(6)).is_some());
    }

    #[test]
    fn one_second_outside_is_no_match() {
        assert!(check(t0() - Duration::hours(2) - Duration::seconds(1)).is_none());
        assert!(check(t0() + Duration::hours(6) + Duration::seconds(1)).is_none());
    }

    #[test]
    fn match_reports_event_and_start() {
        let m = check(t0() + Duration::minutes(30)).unwrap();
        assert_eq!(m.event.race_name, "Test 400");
        assert_eq!(m.start, t0());
        assert_eq!(m.series_or(Series::Trucks), Series::Cup);
    }

    #[test]
    fn first_match_wins_in_caller_order() {
        let snap = ScheduleSnapshot::new(vec![
            SeriesSchedule::new("TRUCKS", vec![ScheduledEvent::new("2025-06-01", "13:00", "Truck Race")]),
            SeriesSchedule::new("CUP", vec![ScheduledEvent::new("2025-06-01", "14:00", "Cup Race")]),
        ]);
        let m = active_window(&snap, t0(), &WindowConfig::default(), chrono_tz::UTC).unwrap();
        assert_eq!(m.event.race_name, "Truck Race");
    }

    #[test]
    fn bad_entries_are_skipped_not_fatal() {
        let snap = ScheduleSnapshot::new(vec![SeriesSchedule::new(
            "CUP",
            vec![
                ScheduledEvent::new("June first", "14:00", "Broken"),
                ScheduledEvent::new("2025-06-01", "25:99", "Also broken"),
                ScheduledEvent::new("2025-06-01", "14:00", "Good"),
            ],
        )]);
        let m = active_window(&snap, t0(), &WindowConfig::default(), chrono_tz::UTC).unwrap();
        assert_eq!(m.event.race_name, "Good");
    }

    #[test]
    fn schedule_timezone_overrides_default() {
        // 14:00 Eastern in June is 18:00 UTC.
        let snap = ScheduleSnapshot::new(vec![SeriesSchedule::new(
            "CUP",
            vec![ScheduledEvent::new("2025-06-01", "14:00", "Eastern Race")],
        )
        .with_timezone("ET")]);
        let eastern_start = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let m = active_window(&snap, eastern_start, &WindowConfig::default(), chrono_tz::UTC).unwrap();
        assert_eq!(m.start, eastern_start);
        // 14:00 UTC is four hours early for that race.
        assert!(active_window(&snap, t0(), &WindowConfig::default(), chrono_tz::UTC).is_none());
    }

    #[test]
    fn unknown_series_label_uses_default() {
        let snap = ScheduleSnapshot::new(vec![SeriesSchedule::new(
            "ARCA",
            vec![ScheduledEvent::new("2025-06-01", "14:00", "Support Race")],
        )]);
        let m = active_window(&snap, t0(), &WindowConfig::default(), chrono_tz::UTC).unwrap();
        assert_eq!(m.series_or(Series::Cup), Series::Cup);
    }
}
