//! Poller run-state and its transition function.
//!
//! Two phases, Idle-Watch and Active-Poll. `transition` is pure: it takes the
//! current state plus one input and returns the next state and what changed.
//! All I/O (schedule loads, fetches, sleeping) lives in `crate::scheduler`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::mode::ModeReport;
use crate::series::Series;

pub const DEFAULT_FAST_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SLOW_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_ERROR_CUTOFF: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Sleep between ticks while polling.
    pub fast_interval: Duration,
    /// Sleep between schedule checks while idle.
    pub slow_interval: Duration,
    /// Consecutive failed fetches that force Active-Poll back to Idle-Watch.
    pub error_cutoff: u32,
    /// Series to poll when nothing else names one.
    pub default_series: Series,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(DEFAULT_FAST_INTERVAL_SECS),
            slow_interval: Duration::from_secs(DEFAULT_SLOW_INTERVAL_SECS),
            error_cutoff: DEFAULT_ERROR_CUTOFF,
            default_series: Series::Cup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    IdleWatch,
    ActivePoll { series: Series },
}

impl Phase {
    pub fn is_polling(&self) -> bool {
        matches!(self, Phase::ActivePoll { .. })
    }

    pub fn target(&self) -> Option<Series> {
        match self {
            Phase::ActivePoll { series } => Some(*series),
            Phase::IdleWatch => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub phase: Phase,
    pub consecutive_errors: u32,
    /// Survives phase changes; it describes the snapshot sink, not the phase.
    pub last_success: Option<DateTime<Utc>>,
    /// When the current Active-Poll phase began.
    pub entered_at: Option<DateTime<Utc>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: Phase::IdleWatch,
            consecutive_errors: 0,
            last_success: None,
            entered_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ModeIdle,
    ErrorCutoff,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// Fresh detector output. `hint` is the series named by the last telemetry,
    /// used when the schedule does not imply one.
    ModeChecked {
        report: &'a ModeReport,
        hint: Option<Series>,
    },
    FetchSucceeded {
        at: DateTime<Utc>,
    },
    FetchFailed,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stayed,
    Entered { series: Series },
    Retargeted { from: Series, to: Series },
    Exited { series: Series, reason: ExitReason },
}

impl Transition {
    /// The phase itself changed (not just the target).
    pub fn changes_phase(&self) -> bool {
        matches!(self, Transition::Entered { .. } | Transition::Exited { .. })
    }
}

/// Compute the next run-state for one input.
pub fn transition(state: &RunState, input: &Input<'_>, cfg: &PollerConfig) -> (RunState, Transition) {
    let mut next = state.clone();

    let change = match (*input, state.phase) {
        (Input::ModeChecked { report, hint }, Phase::IdleWatch) => {
            if !report.is_active() {
                Transition::Stayed
            } else {
                let series = select_series(report, hint, cfg.default_series);
                next.phase = Phase::ActivePoll { series };
                next.consecutive_errors = 0;
                next.entered_at = Some(report.decided_at);
                Transition::Entered { series }
            }
        }
        (Input::ModeChecked { report, hint }, Phase::ActivePoll { series }) => {
            if !report.is_active() {
                exit(&mut next);
                Transition::Exited {
                    series,
                    reason: ExitReason::ModeIdle,
                }
            } else {
                // The matched window names the series first, then the telemetry's own label.
                let wanted = report
                    .window
                    .as_ref()
                    .map(|w| w.series_or(cfg.default_series))
                    .or(hint)
                    .unwrap_or(series);
                if wanted != series {
                    next.phase = Phase::ActivePoll { series: wanted };
                    Transition::Retargeted {
                        from: series,
                        to: wanted,
                    }
                } else {
                    Transition::Stayed
                }
            }
        }
        (Input::FetchSucceeded { at }, Phase::ActivePoll { .. }) => {
            next.consecutive_errors = 0;
            next.last_success = Some(at);
            Transition::Stayed
        }
        (Input::FetchFailed, Phase::ActivePoll { series }) => {
            next.consecutive_errors = state.consecutive_errors.saturating_add(1);
            if next.consecutive_errors >= cfg.error_cutoff.max(1) {
                exit(&mut next);
                Transition::Exited {
                    series,
                    reason: ExitReason::ErrorCutoff,
                }
            } else {
                Transition::Stayed
            }
        }
        (Input::Stop, Phase::ActivePoll { series }) => {
            exit(&mut next);
            Transition::Exited {
                series,
                reason: ExitReason::Stopped,
            }
        }
        // Fetch outcomes and stops while idle change nothing.
        (_, Phase::IdleWatch) => Transition::Stayed,
    };

    (next, change)
}

fn exit(state: &mut RunState) {
    state.phase = Phase::IdleWatch;
    state.consecutive_errors = 0;
    state.entered_at = None;
}

/// Schedule window first, then the telemetry's own series, then the default.
fn select_series(report: &ModeReport, hint: Option<Series>, default: Series) -> Series {
    report
        .window
        .as_ref()
        .map(|w| w.series_or(default))
        .or(hint)
        .unwrap_or(default)
}
