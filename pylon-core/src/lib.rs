//! pylon-core: race-state detection and the adaptive live-polling loop

pub mod freshness;
pub mod history;
pub mod mode;
pub mod poller;
pub mod schedule;
pub mod scheduler;
pub mod series;
pub mod telemetry;
pub mod time;
pub mod window;

pub use freshness::is_fresh;
pub use history::{Movement, PositionHistory};
pub use mode::{DetectorPolicy, Mode, ModeDetector, ModeReport, Reason, Rule, determine_mode};
pub use poller::{ExitReason, Phase, PollerConfig, RunState, Transition, transition};
pub use schedule::{ScheduleSnapshot, ScheduledEvent, SeriesSchedule, UpcomingEvent, countdown, next_event};
pub use scheduler::{
    MemorySink, ModeOutput, PollingScheduler, ScheduleLoader, SnapshotSink, StaticSchedule, TelemetryFetcher,
    TickOutcome,
};
pub use series::Series;
pub use telemetry::{CarRecord, FlagStatus, TelemetrySnapshot};
pub use time::{Clock, ManualClock, SystemClock};
pub use window::{WindowConfig, WindowMatch, active_window};
