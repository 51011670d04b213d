//! Polling scheduler: the long-lived loop that drives fetches from mode decisions.
//!
//! Each tick loads the schedule, reads the last-known snapshot, asks the
//! detector for a mode, feeds that into the run-state machine and, while in
//! Active-Poll, performs exactly one fetch. The loop only suspends on the fetch
//! and on the inter-tick sleep; both race against the stop token.
//!
//! Collaborators are traits so the loop runs against stubs in tests:
//! [`ScheduleLoader`], [`TelemetryFetcher`], [`SnapshotSink`] and
//! [`Clock`](crate::time::Clock).

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::history::{Movement, PositionHistory};
use crate::mode::{Mode, ModeDetector, ModeReport, Reason};
use crate::poller::{ExitReason, Input, Phase, PollerConfig, RunState, Transition, transition};
use crate::schedule::{ScheduleSnapshot, UpcomingEvent, next_event};
use crate::series::Series;
use crate::telemetry::TelemetrySnapshot;
use crate::time::Clock;

/// Supplies the current schedule. Missing per-series files are left out, not errors.
pub trait ScheduleLoader {
    fn load_schedules(&self) -> anyhow::Result<ScheduleSnapshot>;
}

/// Fetches one live snapshot. Returns `None` on any failure and must bound its
/// own wait with a timeout.
pub trait TelemetryFetcher {
    fn fetch(&self, series: Series) -> impl Future<Output = Option<TelemetrySnapshot>> + Send;
}

/// Holder of the latest persisted snapshot.
///
/// `replace` swaps the whole value; readers never observe a partial write.
pub trait SnapshotSink {
    fn latest(&self) -> Option<Arc<TelemetrySnapshot>>;
    fn replace(&self, snapshot: TelemetrySnapshot) -> anyhow::Result<Arc<TelemetrySnapshot>>;
}

/// A schedule that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticSchedule(pub ScheduleSnapshot);

impl ScheduleLoader for StaticSchedule {
    fn load_schedules(&self) -> anyhow::Result<ScheduleSnapshot> {
        Ok(self.0.clone())
    }
}

/// In-memory sink. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    slot: Arc<RwLock<Option<Arc<TelemetrySnapshot>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: TelemetrySnapshot) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(Arc::new(snapshot)))),
        }
    }
}

impl SnapshotSink for MemorySink {
    fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, snapshot: TelemetrySnapshot) -> anyhow::Result<Arc<TelemetrySnapshot>> {
        let fresh = Arc::new(snapshot);
        let mut guard = self
            .slot
            .write()
            .map_err(|_| anyhow::anyhow!("snapshot slot poisoned"))?;
        *guard = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}

impl<T: SnapshotSink + ?Sized> SnapshotSink for Arc<T> {
    fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        (**self).latest()
    }

    fn replace(&self, snapshot: TelemetrySnapshot) -> anyhow::Result<Arc<TelemetrySnapshot>> {
        (**self).replace(snapshot)
    }
}

/// What downstream UIs see: the mode, plus the event that justifies it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeOutput {
    pub mode: Mode,
    pub reason: Reason,
    pub phase: Phase,
    /// Matched event's display name (ACTIVE only).
    pub event_name: Option<String>,
    /// Matched event's computed start (ACTIVE only).
    pub event_start: Option<DateTime<Utc>>,
    /// Soonest upcoming event (IDLE only).
    pub next_event: Option<UpcomingEvent>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ModeOutput {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            reason: Reason::NoSignal,
            phase: Phase::IdleWatch,
            event_name: None,
            event_start: None,
            next_event: None,
            updated_at: None,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub report: ModeReport,
    /// `Some(true)` on a successful fetch, `Some(false)` on a failed one,
    /// `None` when no fetch was attempted.
    pub fetched: Option<bool>,
    /// How long to wait before the next tick.
    pub sleep: Duration,
}

pub struct PollingScheduler<L, F, S, C> {
    loader: L,
    fetcher: F,
    sink: S,
    clock: C,
    detector: ModeDetector,
    config: PollerConfig,
    state: RunState,
    history: PositionHistory,
    last_mode: Option<Mode>,
    mode_tx: watch::Sender<ModeOutput>,
}

/// Run file-bound collaborator work on the blocking pool.
async fn off_runtime<T, W>(work: W) -> anyhow::Result<T>
where
    W: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| anyhow::anyhow!("blocking task failed: {e}"))?
}

impl<L, F, S, C> PollingScheduler<L, F, S, C>
where
    L: ScheduleLoader + Clone + Send + 'static,
    F: TelemetryFetcher,
    S: SnapshotSink + Clone + Send + 'static,
    C: Clock,
{
    pub fn new(loader: L, fetcher: F, sink: S, clock: C, detector: ModeDetector, config: PollerConfig) -> Self {
        let (mode_tx, _) = watch::channel(ModeOutput::default());
        Self {
            loader,
            fetcher,
            sink,
            clock,
            detector,
            config,
            state: RunState::default(),
            history: PositionHistory::new(),
            last_mode: None,
            mode_tx,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }

    /// Watch the mode output. The receiver always holds the latest value.
    pub fn subscribe(&self) -> watch::Receiver<ModeOutput> {
        self.mode_tx.subscribe()
    }

    /// Run one decision cycle, fetching at most once.
    pub async fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();

        let loader = self.loader.clone();
        let schedule = match off_runtime(move || loader.load_schedules()).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "schedule load failed; treating as no schedule");
                ScheduleSnapshot::default()
            }
        };

        let telemetry = self.sink.latest();
        let report = self
            .detector
            .determine_mode(telemetry.as_deref(), Some(&schedule), now);

        if self.last_mode != Some(report.mode) {
            if let Some(prev) = self.last_mode {
                info!(from = ?prev, to = ?report.mode, reason = ?report.reason, "mode changed");
            }
            self.last_mode = Some(report.mode);
        }

        let hint = telemetry
            .as_ref()
            .and_then(|t| t.series.as_deref())
            .and_then(|l| l.parse::<Series>().ok());
        self.apply(Input::ModeChecked { report: &report, hint });
        self.publish(&report, &schedule, now);

        let Some(series) = self.state.phase.target() else {
            if report.is_active() {
                debug!("mode active but not polling");
            } else {
                debug!("no event active; watching schedule");
            }
            return TickOutcome {
                report,
                fetched: None,
                sleep: self.config.slow_interval,
            };
        };

        let ok = self.poll_once(series).await;

        // Any tick that fetched keeps the fast cadence, including one that hit the cutoff.
        TickOutcome {
            report,
            fetched: Some(ok),
            sleep: self.config.fast_interval,
        }
    }

    /// Loop until `cancel` fires. Returns the final run-state.
    pub async fn run(mut self, cancel: CancellationToken) -> RunState {
        info!(
            fast_secs = self.config.fast_interval.as_secs(),
            slow_secs = self.config.slow_interval.as_secs(),
            cutoff = self.config.error_cutoff,
            rules = ?self.detector.rules(),
            "poller started"
        );

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(outcome.sleep) => {}
            }
        }

        self.apply(Input::Stop);
        let phase = self.state.phase;
        self.mode_tx.send_modify(|out| out.phase = phase);
        info!("poller stopped");
        self.state
    }

    async fn poll_once(&mut self, series: Series) -> bool {
        let fetched = self.fetcher.fetch(series).await;

        let snapshot = match fetched {
            Some(s) if !s.is_empty() => s,
            Some(_) => {
                warn!(%series, "feed returned no cars");
                self.apply(Input::FetchFailed);
                return false;
            }
            None => {
                warn!(%series, errors = self.state.consecutive_errors + 1, "fetch failed");
                self.apply(Input::FetchFailed);
                return false;
            }
        };

        if let Err(reason) = snapshot.validate() {
            warn!(%series, %reason, "snapshot has irregular running order");
        }

        let sink = self.sink.clone();
        let stored = match off_runtime(move || sink.replace(snapshot)).await {
            Ok(s) => s,
            Err(e) => {
                error!(%series, error = %e, "could not persist snapshot");
                self.apply(Input::FetchFailed);
                return false;
            }
        };

        let previous_leader = self.history.previous_leader().map(str::to_string);
        let moves = self.history.observe(&stored);
        if let Some(leader) = stored.leader() {
            if previous_leader.as_deref().is_some_and(|p| p != leader.car) {
                info!(%series, car = %leader.car, driver = %leader.driver, "lead change");
            }
        }
        let movers = moves
            .iter()
            .filter(|(_, m)| matches!(m, Movement::Gained(_) | Movement::Lost(_)))
            .count();

        info!(
            %series,
            lap = stored.lap,
            laps_total = stored.laps_total,
            flag = ?stored.flag,
            racing = stored.flag.is_racing(),
            cars = stored.cars.len(),
            movers,
            "snapshot updated"
        );

        self.apply(Input::FetchSucceeded { at: self.clock.now() });
        true
    }

    fn apply(&mut self, input: Input<'_>) {
        let (next, change) = transition(&self.state, &input, &self.config);
        self.state = next;
        if change.changes_phase() {
            debug!(phase = ?self.state.phase, "phase changed");
        }

        match change {
            Transition::Stayed => {}
            Transition::Entered { series } => {
                info!(%series, "starting live polling");
                self.history.reset();
            }
            Transition::Retargeted { from, to } => {
                info!(%from, %to, "switching polled series");
                self.history.reset();
            }
            Transition::Exited { series, reason } => {
                match reason {
                    ExitReason::ErrorCutoff => {
                        error!(%series, cutoff = self.config.error_cutoff, "too many consecutive errors; stopping live polling")
                    }
                    ExitReason::ModeIdle => info!(%series, "event window closed; stopping live polling"),
                    ExitReason::Stopped => info!(%series, "shutdown; leaving live polling"),
                }
                self.history.reset();
            }
        }
    }

    fn publish(&self, report: &ModeReport, schedule: &ScheduleSnapshot, now: DateTime<Utc>) {
        let (event_name, event_start) = match (&report.window, report.is_active()) {
            (Some(w), true) => (Some(w.event.display_name().to_string()), Some(w.start)),
            _ => (None, None),
        };
        let next_event = if report.is_active() {
            None
        } else {
            next_event(schedule, now, None, self.detector.policy().timezone)
        };

        self.mode_tx.send_replace(ModeOutput {
            mode: report.mode,
            reason: report.reason,
            phase: self.state.phase,
            event_name,
            event_start,
            next_event,
            updated_at: Some(now),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::DetectorPolicy;
    use crate::schedule::{ScheduledEvent, SeriesSchedule};
    use crate::telemetry::CarRecord;
    use crate::time::ManualClock;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Option<TelemetrySnapshot>>>,
        calls: AtomicUsize,
        last_series: Mutex<Option<Series>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Option<TelemetrySnapshot>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TelemetryFetcher for ScriptedFetcher {
        async fn fetch(&self, series: Series) -> Option<TelemetrySnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_series.lock().unwrap() = Some(series);
            self.script.lock().unwrap().pop_front().flatten()
        }
    }

    #[derive(Clone)]
    struct BrokenLoader;

    impl ScheduleLoader for BrokenLoader {
        fn load_schedules(&self) -> anyhow::Result<ScheduleSnapshot> {
            anyhow::bail!("disk on fire")
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap()
    }

    fn schedule() -> StaticSchedule {
        StaticSchedule(ScheduleSnapshot::new(vec![SeriesSchedule::new(
            "TRUCKS",
            vec![ScheduledEvent::new("2025-06-01", "14:00", "Truck 250")],
        )]))
    }

    fn detector() -> ModeDetector {
        ModeDetector::new(DetectorPolicy {
            timezone: chrono_tz::UTC,
            ..DetectorPolicy::default()
        })
    }

    fn config() -> PollerConfig {
        PollerConfig {
            error_cutoff: 3,
            fast_interval: Duration::from_millis(5),
            slow_interval: Duration::from_millis(30),
            ..PollerConfig::default()
        }
    }

    fn stale() -> TelemetrySnapshot {
        TelemetrySnapshot::new(vec![CarRecord::new(1, "99", "Old")])
            .with_last_update("2025-06-01T09:00:00+00:00")
    }

    fn live(lap: u32, order: &[&str]) -> TelemetrySnapshot {
        TelemetrySnapshot::new(
            order
                .iter()
                .enumerate()
                .map(|(i, c)| CarRecord::new(i as u32 + 1, *c, ""))
                .collect(),
        )
        .with_laps(lap, 250)
        .with_last_update(t0().to_rfc3339())
    }

    fn scheduler(
        fetcher: ScriptedFetcher,
        sink: MemorySink,
    ) -> PollingScheduler<StaticSchedule, ScriptedFetcher, MemorySink, Arc<ManualClock>> {
        let clock = Arc::new(ManualClock::new(t0()));
        PollingScheduler::new(schedule(), fetcher, sink, clock, detector(), config())
    }

    #[tokio::test]
    async fn idle_tick_does_not_fetch_and_sleeps_slow() {
        let mut s = scheduler(ScriptedFetcher::default(), MemorySink::new());
        let out = s.tick().await;
        // Window matches but nothing has ever been fetched.
        assert_eq!(out.report.mode, Mode::Idle);
        assert_eq!(out.fetched, None);
        assert_eq!(out.sleep, config().slow_interval);
        assert_eq!(s.fetcher().calls(), 0);
        assert_eq!(s.state().phase, Phase::IdleWatch);
    }

    #[tokio::test]
    async fn active_tick_fetches_window_series_and_replaces_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![Some(live(10, &["24", "5"]))]);
        let sink = MemorySink::with_snapshot(stale());
        let mut s = scheduler(fetcher, sink.clone());

        let out = s.tick().await;
        assert_eq!(out.report.reason, Reason::ScheduleWindow);
        assert_eq!(out.fetched, Some(true));
        assert_eq!(out.sleep, config().fast_interval);
        assert_eq!(*s.fetcher().last_series.lock().unwrap(), Some(Series::Trucks));

        let latest = sink.latest().unwrap();
        assert_eq!(latest.lap, 10);
        // Replaced wholesale: nothing of the stale record survives.
        assert!(latest.cars.iter().all(|c| c.car != "99"));
        assert_eq!(s.state().last_success, Some(t0()));
        assert_eq!(s.state().consecutive_errors, 0);
    }

    #[tokio::test]
    async fn cutoff_demotes_to_idle_with_counter_reset() {
        let fetcher = ScriptedFetcher::new(vec![None, None, None]);
        let sink = MemorySink::with_snapshot(stale());
        let mut s = scheduler(fetcher, sink.clone());

        for expected in 1..3 {
            let out = s.tick().await;
            assert_eq!(out.fetched, Some(false));
            assert_eq!(s.state().consecutive_errors, expected);
            assert!(s.state().phase.is_polling());
        }

        let out = s.tick().await;
        assert_eq!(out.fetched, Some(false));
        assert_eq!(out.sleep, config().fast_interval);
        assert_eq!(s.state().phase, Phase::IdleWatch);
        assert_eq!(s.state().consecutive_errors, 0);
        // Failures never touch the persisted snapshot.
        assert_eq!(sink.latest().unwrap().cars[0].car, "99");
    }

    #[tokio::test]
    async fn success_after_failures_resets_counter() {
        let fetcher = ScriptedFetcher::new(vec![None, None, Some(live(3, &["5", "24"]))]);
        let mut s = scheduler(fetcher, MemorySink::with_snapshot(stale()));

        s.tick().await;
        s.tick().await;
        assert_eq!(s.state().consecutive_errors, 2);

        let out = s.tick().await;
        assert_eq!(out.fetched, Some(true));
        assert_eq!(s.state().consecutive_errors, 0);
        assert!(s.state().phase.is_polling());
    }

    #[tokio::test]
    async fn empty_feed_counts_as_failure() {
        let fetcher = ScriptedFetcher::new(vec![Some(TelemetrySnapshot::default())]);
        let sink = MemorySink::with_snapshot(stale());
        let mut s = scheduler(fetcher, sink.clone());

        let out = s.tick().await;
        assert_eq!(out.fetched, Some(false));
        assert_eq!(s.state().consecutive_errors, 1);
        assert_eq!(sink.latest().unwrap().cars[0].car, "99");
    }

    #[tokio::test]
    async fn window_closing_stops_polling_and_clears_history() {
        let fetcher = ScriptedFetcher::new(vec![Some(live(1, &["24", "5"]))]);
        let clock = Arc::new(ManualClock::new(t0()));
        let mut s = PollingScheduler::new(
            schedule(),
            fetcher,
            MemorySink::with_snapshot(stale()),
            Arc::clone(&clock),
            detector(),
            config(),
        );

        s.tick().await;
        assert!(!s.history().is_empty());

        // Well past the window, and the fetched snapshot is hours old.
        clock.set(t0() + chrono::Duration::hours(7));
        let out = s.tick().await;
        assert_eq!(out.report.mode, Mode::Idle);
        assert_eq!(s.state().phase, Phase::IdleWatch);
        assert!(s.history().is_empty());
        assert_eq!(s.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn broken_schedule_is_treated_as_empty() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mut s = PollingScheduler::new(
            BrokenLoader,
            ScriptedFetcher::default(),
            MemorySink::with_snapshot(stale()),
            clock,
            detector(),
            config(),
        );
        let out = s.tick().await;
        assert_eq!(out.report.mode, Mode::Idle);
        assert_eq!(out.fetched, None);
    }

    #[tokio::test]
    async fn mode_output_carries_event_or_next_event() {
        let fetcher = ScriptedFetcher::new(vec![Some(live(1, &["24"]))]);
        // Before the window opens and two hours after the stale capture.
        let clock = Arc::new(ManualClock::new(t0() - chrono::Duration::hours(3)));
        let mut s = PollingScheduler::new(
            schedule(),
            fetcher,
            MemorySink::with_snapshot(stale()),
            Arc::clone(&clock),
            detector(),
            config(),
        );
        let rx = s.subscribe();

        s.tick().await;
        {
            let out = rx.borrow();
            assert_eq!(out.mode, Mode::Idle);
            assert_eq!(out.event_name, None);
            assert_eq!(out.next_event.as_ref().unwrap().event.race_name, "Truck 250");
        }

        clock.set(t0());
        s.tick().await;
        let out = rx.borrow();
        assert_eq!(out.mode, Mode::Active);
        assert_eq!(out.event_name.as_deref(), Some("Truck 250"));
        assert_eq!(out.event_start, Some(t0()));
        assert_eq!(out.phase, Phase::ActivePoll { series: Series::Trucks });
    }

    #[tokio::test]
    async fn run_exits_promptly_when_cancelled() {
        let fetcher = ScriptedFetcher::new(vec![Some(live(1, &["24"])); 64]);
        let s = scheduler(fetcher, MemorySink::with_snapshot(stale()));
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            stopper.cancel();
        });

        let final_state = tokio::time::timeout(Duration::from_secs(5), s.run(cancel))
            .await
            .expect("run did not stop");
        assert_eq!(final_state.phase, Phase::IdleWatch);
        assert_eq!(final_state.consecutive_errors, 0);
        assert!(final_state.last_success.is_some());
    }

    #[tokio::test]
    async fn mode_output_reports_idle_watch_after_shutdown() {
        let fetcher = ScriptedFetcher::new(vec![Some(live(1, &["24"])); 64]);
        let s = scheduler(fetcher, MemorySink::with_snapshot(stale()));
        let mut rx = s.subscribe();
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        let handle = tokio::spawn(s.run(cancel));
        rx.wait_for(|out| out.phase.is_polling()).await.unwrap();
        stopper.cancel();
        handle.await.unwrap();

        assert_eq!(rx.borrow().phase, Phase::IdleWatch);
    }

    #[derive(Clone, Default)]
    struct ThreadRecordingLoader {
        seen: Arc<Mutex<Option<std::thread::ThreadId>>>,
    }

    impl ScheduleLoader for ThreadRecordingLoader {
        fn load_schedules(&self) -> anyhow::Result<ScheduleSnapshot> {
            *self.seen.lock().unwrap() = Some(std::thread::current().id());
            schedule().load_schedules()
        }
    }

    #[tokio::test]
    async fn schedule_load_runs_off_the_runtime_thread() {
        let loader = ThreadRecordingLoader::default();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut s = PollingScheduler::new(
            loader.clone(),
            ScriptedFetcher::default(),
            MemorySink::new(),
            clock,
            detector(),
            config(),
        );

        s.tick().await;
        let seen = loader.seen.lock().unwrap().expect("loader was called");
        assert_ne!(seen, std::thread::current().id());
    }

    #[tokio::test]
    async fn irregular_running_order_is_still_persisted() {
        let mut dup = live(5, &["24", "5"]);
        dup.cars[1].car = "24".to_string();
        let sink = MemorySink::with_snapshot(stale());
        let mut s = scheduler(ScriptedFetcher::new(vec![Some(dup)]), sink.clone());

        let out = s.tick().await;
        assert_eq!(out.fetched, Some(true));
        assert!(sink.latest().unwrap().validate().is_err());
        assert_eq!(sink.latest().unwrap().lap, 5);
    }

    #[tokio::test]
    async fn run_with_cancelled_token_never_fetches() {
        let s = scheduler(ScriptedFetcher::default(), MemorySink::with_snapshot(stale()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let final_state = s.run(cancel).await;
        assert_eq!(final_state, RunState::default());
    }
}
