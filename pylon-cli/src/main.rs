use anyhow::{Context, Result, bail};
use chrono::Utc;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use pylon_core::{
    Mode, ModeDetector, ModeOutput, PollingScheduler, ScheduleLoader, Series, SnapshotSink, SystemClock,
    TelemetryFetcher, TelemetrySnapshot, countdown, next_event,
};
use pylon_feed::{FileScheduleLoader, FileSnapshotStore, HttpFetcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod state;

use config::{Config, init_config, load_config};

#[derive(Parser, Debug)]
#[command(
    name = "pylon",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PYLON_BUILD_SHA"), ")"),
    about = "Race-state detector and adaptive live-timing poller"
)]
struct Cli {
    /// Config file (default: ~/.pylon/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for pylon crates (RUST_LOG still wins)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling daemon until Ctrl-C
    Run,

    /// Decide ACTIVE/IDLE once from the files on disk
    Mode,

    /// Fetch one live snapshot and persist it
    Fetch {
        /// CUP, OREILLY or TRUCKS (default: [poller] default_series)
        #[arg(long)]
        series: Option<String>,
    },

    /// Show the next scheduled event and a countdown
    Next {
        #[arg(long)]
        series: Option<String>,
    },

    /// Manage ~/.pylon/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config if none exists
    Init,
    /// Print the effective config
    Show,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "pylon=debug,pylon_core=debug,pylon_feed=debug"
    } else {
        "pylon=info,pylon_core=info,pylon_feed=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_file = cli.config.as_deref();

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init => init_config(config_file)?,
            ConfigCommand::Show => {
                let cfg = load_config(config_file)?;
                print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
            }
        },

        Command::Run => run(load_config(config_file)?).await?,

        Command::Mode => show_mode(&load_config(config_file)?)?,

        Command::Fetch { series } => {
            let cfg = load_config(config_file)?;
            let series = pick_series(series.as_deref(), &cfg)?;
            fetch_once(&cfg, series).await?;
        }

        Command::Next { series } => {
            let cfg = load_config(config_file)?;
            let only = series.as_deref().map(parse_series).transpose()?;
            show_next(&cfg, only)?;
        }
    }

    Ok(())
}

fn parse_series(label: &str) -> Result<Series> {
    label.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn pick_series(label: Option<&str>, cfg: &Config) -> Result<Series> {
    match label {
        Some(l) => parse_series(l),
        None => cfg.default_series(),
    }
}

fn schedule_loader(cfg: &Config) -> Result<FileScheduleLoader> {
    Ok(FileScheduleLoader::new(cfg.data_dir()?, cfg.paths.schedule_files.clone()))
}

async fn run(cfg: Config) -> Result<()> {
    let loader = schedule_loader(&cfg)?;
    let store = Arc::new(FileSnapshotStore::open(cfg.snapshot_path()?));
    let fetcher = HttpFetcher::new(cfg.feed_settings()?)?;
    let detector = ModeDetector::new(cfg.detector_policy()?);
    let tz = detector.policy().timezone;

    info!(
        data_dir = %loader.dir().display(),
        snapshot = %store.path().display(),
        "starting"
    );
    if cfg.detector.require_prior_telemetry && store.latest().is_none() {
        warn!("no snapshot on disk yet; schedule windows stay IDLE until `pylon fetch` seeds one");
    }

    let scheduler = PollingScheduler::new(loader, fetcher, store, SystemClock, detector, cfg.poller_config()?);
    let rx = scheduler.subscribe();

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received; stopping"),
            Err(e) => warn!(error = %e, "ctrl-c handler failed; stopping"),
        }
        stopper.cancel();
    });

    let status = tokio::spawn(print_mode_changes(rx, tz, cancel.clone()));

    let final_state = scheduler.run(cancel).await;
    let _ = status.await;

    info!(
        last_success = ?final_state.last_success,
        "poller exited"
    );
    Ok(())
}

/// Print one status line whenever the published mode flips.
async fn print_mode_changes(mut rx: watch::Receiver<ModeOutput>, tz: Tz, cancel: CancellationToken) {
    let mut shown: Option<Mode> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let out = rx.borrow_and_update().clone();
        if shown == Some(out.mode) {
            continue;
        }
        shown = Some(out.mode);
        println!("{}", status_line(&out, tz));
    }
}

fn status_line(out: &ModeOutput, tz: Tz) -> String {
    let now = out.updated_at.unwrap_or_else(Utc::now);
    match out.mode {
        Mode::Active => {
            let name = out.event_name.as_deref().unwrap_or("live telemetry");
            format!("ACTIVE  {name} ({})", out.reason)
        }
        Mode::Idle => match &out.next_event {
            Some(next) => format!(
                "IDLE    next: {} {} at {} (in {})",
                next.series_label,
                next.event.display_name(),
                next.start.with_timezone(&tz).format("%a %b %-d %H:%M %Z"),
                countdown(next.start, now)
            ),
            None => "IDLE    no upcoming events".to_string(),
        },
    }
}

fn show_mode(cfg: &Config) -> Result<()> {
    let schedule = schedule_loader(cfg)?.load_schedules()?;
    let store = FileSnapshotStore::open(cfg.snapshot_path()?);
    let detector = ModeDetector::new(cfg.detector_policy()?);
    let tz = detector.policy().timezone;

    let telemetry = store.latest();
    let report = detector.determine_mode(telemetry.as_deref(), Some(&schedule), Utc::now());

    println!("Mode:   {}", report.mode);
    println!("Reason: {}", report.reason);
    if let Some(w) = &report.window {
        println!(
            "Window: {} {} (start {})",
            w.series_label.as_deref().unwrap_or("?"),
            w.event.display_name(),
            w.start.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
        );
    }
    match telemetry.as_deref().and_then(|t| t.last_update.as_deref()) {
        Some(stamp) => println!("Last snapshot: {stamp}"),
        None => println!("Last snapshot: none"),
    }
    Ok(())
}

async fn fetch_once(cfg: &Config, series: Series) -> Result<()> {
    let fetcher = HttpFetcher::new(cfg.feed_settings()?)?;
    let store = FileSnapshotStore::open(cfg.snapshot_path()?);

    let Some(snapshot) = fetcher.fetch(series).await else {
        bail!("no live data for {series} (see log for details)");
    };
    let stored = store.replace(snapshot)?;
    print_snapshot(&stored);
    println!("Saved {}", store.path().display());
    Ok(())
}

fn print_snapshot(snap: &TelemetrySnapshot) {
    println!(
        "{} {}: {:?} lap {}/{} ({} cars)",
        snap.series.as_deref().unwrap_or("?"),
        snap.track.as_deref().unwrap_or(""),
        snap.flag,
        snap.lap,
        snap.laps_total,
        snap.cars.len()
    );
    for car in snap.cars.iter().take(10) {
        let gap = match car.interval {
            Some(i) => format!("+{i:.3}"),
            None => "leader".to_string(),
        };
        let battle = if car.is_battling() { " *" } else { "" };
        println!("  P{:<2} #{:<3} {:<20} {gap}{battle}", car.position, car.car, car.driver);
    }
}

fn show_next(cfg: &Config, only: Option<Series>) -> Result<()> {
    let schedule = schedule_loader(cfg)?.load_schedules()?;
    let tz = cfg.timezone()?;
    let now = Utc::now();

    match next_event(&schedule, now, only, tz) {
        Some(next) => {
            println!("{} {}", next.series_label, next.event.display_name());
            if let Some(track) = &next.event.track {
                println!("Track: {track}");
            }
            println!("Start: {}", next.start.with_timezone(&tz).format("%a %Y-%m-%d %H:%M %Z"));
            println!("In:    {}", countdown(next.start, now));
        }
        None => println!("No upcoming events"),
    }
    Ok(())
}
