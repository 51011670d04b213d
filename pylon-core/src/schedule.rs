//! Schedule snapshot: per-series race calendars.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::series::Series;
use crate::time::{local_start_to_utc, resolve_timezone};

/// One scheduled event. Only `date`, `start_time`, `race_name` and `is_chase`
/// matter to the detector; the rest is carried for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    /// Calendar date, "YYYY-MM-DD".
    pub date: String,
    /// Local time of day, "HH:MM". Absent means midnight.
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub race_name: String,
    /// Championship (playoff) round.
    #[serde(default)]
    pub is_chase: bool,

    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub broadcast: Option<String>,
    #[serde(default)]
    pub laps: Option<u32>,
}

impl ScheduledEvent {
    pub fn new(date: impl Into<String>, start_time: impl Into<String>, race_name: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            start_time: Some(start_time.into()),
            race_name: race_name.into(),
            ..Self::default()
        }
    }

    /// Nominal start instant, interpreting the local fields in `tz`.
    pub fn start_utc(&self, tz: Tz) -> anyhow::Result<DateTime<Utc>> {
        local_start_to_utc(&self.date, self.start_time.as_deref(), tz)
    }

    pub fn display_name(&self) -> &str {
        if self.race_name.trim().is_empty() {
            self.track.as_deref().unwrap_or("Unknown")
        } else {
            &self.race_name
        }
    }
}

/// A single series' calendar, as stored in one schedule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSchedule {
    #[serde(default)]
    pub series: Option<String>,
    /// IANA name or US abbreviation ("ET").
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub races: Vec<ScheduledEvent>,
}

impl SeriesSchedule {
    pub fn new(series: impl Into<String>, races: Vec<ScheduledEvent>) -> Self {
        Self {
            series: Some(series.into()),
            timezone: None,
            races,
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// The schedule's own timezone when it names a known one, else `fallback`.
    pub fn tz_or(&self, fallback: Tz) -> Tz {
        self.timezone
            .as_deref()
            .and_then(resolve_timezone)
            .unwrap_or(fallback)
    }

    pub fn series_label(&self) -> &str {
        self.series.as_deref().unwrap_or("UNKNOWN")
    }
}

/// All loaded series calendars, in caller priority order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleSnapshot {
    pub series: Vec<SeriesSchedule>,
}

impl ScheduleSnapshot {
    pub fn new(series: Vec<SeriesSchedule>) -> Self {
        Self { series }
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.races.is_empty())
    }
}

/// The soonest event starting after `now`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingEvent {
    pub series_label: String,
    pub event: ScheduledEvent,
    pub start: DateTime<Utc>,
}

/// Find the next event that has not started yet, optionally limited to one series.
///
/// Events whose date or time cannot be read are skipped.
pub fn next_event(
    schedule: &ScheduleSnapshot,
    now: DateTime<Utc>,
    only: Option<Series>,
    default_tz: Tz,
) -> Option<UpcomingEvent> {
    let mut best: Option<UpcomingEvent> = None;

    for sched in &schedule.series {
        if let Some(want) = only {
            if sched.series.as_deref().and_then(|l| l.parse::<Series>().ok()) != Some(want) {
                continue;
            }
        }
        let tz = sched.tz_or(default_tz);

        for race in &sched.races {
            let Ok(start) = race.start_utc(tz) else {
                continue;
            };
            if start <= now {
                continue;
            }
            if best.as_ref().map(|b| start < b.start).unwrap_or(true) {
                best = Some(UpcomingEvent {
                    series_label: sched.series_label().to_string(),
                    event: race.clone(),
                    start,
                });
            }
        }
    }

    best
}

/// Human countdown to `start`: "2d 3h 15m", "3h 15m", or "RACE STARTED".
pub fn countdown(start: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if start < now {
        return "RACE STARTED".to_string();
    }

    let total_minutes = (start - now).num_minutes();
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else {
        format!("{hours}h {minutes}m")
    }
}
