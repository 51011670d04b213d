use anyhow::{Context, Result};
use chrono_tz::Tz;
use pylon_core::poller::{DEFAULT_ERROR_CUTOFF, DEFAULT_FAST_INTERVAL_SECS, DEFAULT_SLOW_INTERVAL_SECS};
use pylon_core::time::resolve_timezone;
use pylon_core::{DetectorPolicy, PollerConfig, Series, WindowConfig};
use pylon_feed::live_feed::{DEFAULT_TIMEOUT_SECS, DEFAULT_URL_TEMPLATE, DEFAULT_USER_AGENT};
use pylon_feed::{DEFAULT_SCHEDULE_FILES, DEFAULT_SNAPSHOT_FILE, FeedSettings};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::{default_data_dir, ensure_pylon_home};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub poller: PollerSection,
    #[serde(default)]
    pub feed: FeedSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Directory holding schedule files and the live snapshot (default: ~/.pylon/data)
    pub data_dir: Option<PathBuf>,
    /// Schedule files, highest-priority series first.
    pub schedule_files: Vec<String>,
    pub snapshot_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub freshness_minutes: u32,
    pub window_before_minutes: u32,
    pub window_after_minutes: u32,
    /// Schedule window only counts once some telemetry has been captured.
    pub require_prior_telemetry: bool,
    /// Zone for schedule files without one and for naive capture stamps.
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    pub fast_secs: u64,
    pub slow_secs: u64,
    pub error_cutoff: u32,
    pub default_series: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    /// `{series}` expands to cup/oreilly/trucks, `{id}` to 1/2/3.
    pub url_template: String,
    /// Per-series URLs keyed by series label; these win over the template.
    pub urls: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            schedule_files: DEFAULT_SCHEDULE_FILES.iter().map(|s| s.to_string()).collect(),
            snapshot_file: DEFAULT_SNAPSHOT_FILE.to_string(),
        }
    }
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            freshness_minutes: 10,
            window_before_minutes: 120,
            window_after_minutes: 360,
            require_prior_telemetry: true,
            timezone: "America/New_York".to_string(),
        }
    }
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            fast_secs: DEFAULT_FAST_INTERVAL_SECS,
            slow_secs: DEFAULT_SLOW_INTERVAL_SECS,
            error_cutoff: DEFAULT_ERROR_CUTOFF,
            default_series: "CUP".to_string(),
        }
    }
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            urls: BTreeMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.paths.data_dir {
            Some(d) => Ok(d.clone()),
            None => default_data_dir(),
        }
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(&self.paths.snapshot_file))
    }

    pub fn timezone(&self) -> Result<Tz> {
        resolve_timezone(&self.detector.timezone)
            .with_context(|| format!("unknown timezone in [detector]: {}", self.detector.timezone))
    }

    pub fn default_series(&self) -> Result<Series> {
        self.poller
            .default_series
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("[poller] default_series")
    }

    pub fn detector_policy(&self) -> Result<DetectorPolicy> {
        let d = &self.detector;
        Ok(DetectorPolicy {
            max_age: chrono::Duration::minutes(i64::from(d.freshness_minutes.max(1))),
            window: WindowConfig {
                before: chrono::Duration::minutes(i64::from(d.window_before_minutes)),
                after: chrono::Duration::minutes(i64::from(d.window_after_minutes)),
            },
            require_prior_telemetry: d.require_prior_telemetry,
            timezone: self.timezone()?,
        })
    }

    /// Zero intervals and a zero cutoff are clamped to 1.
    pub fn poller_config(&self) -> Result<PollerConfig> {
        let p = &self.poller;
        Ok(PollerConfig {
            fast_interval: Duration::from_secs(p.fast_secs.max(1)),
            slow_interval: Duration::from_secs(p.slow_secs.max(1)),
            error_cutoff: p.error_cutoff.max(1),
            default_series: self.default_series()?,
        })
    }

    pub fn feed_settings(&self) -> Result<FeedSettings> {
        let f = &self.feed;
        let mut overrides = HashMap::new();
        for (label, url) in &f.urls {
            let series: Series = label
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("[feed.urls] key {label}"))?;
            overrides.insert(series, url.clone());
        }
        Ok(FeedSettings {
            url_template: f.url_template.clone(),
            overrides,
            timeout: Duration::from_secs(f.timeout_secs.max(1)),
            user_agent: f.user_agent.clone(),
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_pylon_home()?.join("config.toml"))
}

fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => config_path(),
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let p = resolve_path(explicit)?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config(cfg: &Config, explicit: Option<&Path>) -> Result<PathBuf> {
    let p = resolve_path(explicit)?;
    if let Some(dir) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(p)
}

pub fn init_config(explicit: Option<&Path>) -> Result<()> {
    let p = resolve_path(explicit)?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    let written = save_config(&Config::default(), Some(&p))?;
    println!("Wrote {}", written.display());
    Ok(())
}
