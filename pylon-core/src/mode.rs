//! Mode detection: fold telemetry freshness and the schedule window into ACTIVE/IDLE.
//!
//! Rules are evaluated in order and the first one that fires decides. Nothing
//! fires means IDLE.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::freshness::{DEFAULT_MAX_AGE_MINUTES, is_fresh};
use crate::schedule::ScheduleSnapshot;
use crate::telemetry::TelemetrySnapshot;
use crate::window::{WindowConfig, WindowMatch, active_window};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Active,
    Idle,
}

/// Which rule produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    FreshTelemetry,
    ScheduleWindow,
    NoSignal,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Active => "ACTIVE",
            Mode::Idle => "IDLE",
        })
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::FreshTelemetry => "fresh telemetry",
            Reason::ScheduleWindow => "schedule window",
            Reason::NoSignal => "no signal",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Telemetry captured within the freshness threshold.
    FreshTelemetry,
    /// A schedule entry is inside its window. When `require_prior_telemetry` is
    /// set, some telemetry (even stale) must also exist.
    ScheduleWindow { require_prior_telemetry: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorPolicy {
    pub max_age: Duration,
    pub window: WindowConfig,
    pub require_prior_telemetry: bool,
    /// Zone for schedule files without their own and for naive capture stamps.
    pub timezone: Tz,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::minutes(DEFAULT_MAX_AGE_MINUTES),
            window: WindowConfig::default(),
            require_prior_telemetry: true,
            timezone: chrono_tz::America::New_York,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeReport {
    pub mode: Mode,
    pub reason: Reason,
    /// Event whose window contains the decision instant, if any. Present even
    /// when another rule decided, so callers can pick a target series.
    pub window: Option<WindowMatch>,
    pub decided_at: DateTime<Utc>,
}

impl ModeReport {
    pub fn is_active(&self) -> bool {
        self.mode == Mode::Active
    }
}

#[derive(Debug, Clone)]
pub struct ModeDetector {
    policy: DetectorPolicy,
    rules: Vec<Rule>,
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self::new(DetectorPolicy::default())
    }
}

impl ModeDetector {
    pub fn new(policy: DetectorPolicy) -> Self {
        let rules = vec![
            Rule::FreshTelemetry,
            Rule::ScheduleWindow {
                require_prior_telemetry: policy.require_prior_telemetry,
            },
        ];
        Self { policy, rules }
    }

    /// Replace the rule list. Order is priority.
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn policy(&self) -> &DetectorPolicy {
        &self.policy
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify the world at `now`.
    ///
    /// `schedule` of `None` or an empty snapshot both mean "no schedule".
    pub fn determine_mode(
        &self,
        telemetry: Option<&TelemetrySnapshot>,
        schedule: Option<&ScheduleSnapshot>,
        now: DateTime<Utc>,
    ) -> ModeReport {
        let schedule = schedule.filter(|s| !s.is_empty());
        let window = schedule.and_then(|s| active_window(s, now, &self.policy.window, self.policy.timezone));

        let fired = self
            .rules
            .iter()
            .find_map(|rule| self.evaluate(*rule, telemetry, schedule.is_some(), window.is_some(), now));

        let (mode, reason) = match fired {
            Some(reason) => (Mode::Active, reason),
            None => (Mode::Idle, Reason::NoSignal),
        };

        ModeReport {
            mode,
            reason,
            window,
            decided_at: now,
        }
    }

    fn evaluate(
        &self,
        rule: Rule,
        telemetry: Option<&TelemetrySnapshot>,
        has_schedule: bool,
        in_window: bool,
        now: DateTime<Utc>,
    ) -> Option<Reason> {
        match rule {
            Rule::FreshTelemetry => is_fresh(telemetry, self.policy.max_age, now, self.policy.timezone)
                .then_some(Reason::FreshTelemetry),
            Rule::ScheduleWindow {
                require_prior_telemetry,
            } => {
                let corroborated = telemetry.is_some() || !require_prior_telemetry;
                (has_schedule && in_window && corroborated).then_some(Reason::ScheduleWindow)
            }
        }
    }
}

/// Decide with the default policy.
pub fn determine_mode(
    telemetry: Option<&TelemetrySnapshot>,
    schedule: Option<&ScheduleSnapshot>,
    now: DateTime<Utc>,
) -> Mode {
    ModeDetector::default().determine_mode(telemetry, schedule, now).mode
}
