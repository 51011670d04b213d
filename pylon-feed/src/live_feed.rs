//! HTTP telemetry fetcher.
//!
//! GETs one URL per series and expects the snapshot JSON shape. Every failure
//! (transport, timeout, non-2xx, bad body, empty field) comes back as `None`
//! with a log line; the scheduler counts it.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pylon_core::time::to_rfc3339_utc;
use pylon_core::{FlagStatus, Series, TelemetryFetcher, TelemetrySnapshot};
use reqwest::StatusCode;
use tracing::{debug, warn};

pub const DEFAULT_URL_TEMPLATE: &str = "http://127.0.0.1:8787/live/{series}.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("pylon/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// `{series}` expands to the lowercase label, `{id}` to the numeric id.
    pub url_template: String,
    /// Full URLs that win over the template for specific series.
    pub overrides: HashMap<Series, String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            overrides: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FeedSettings {
    pub fn url_for(&self, series: Series) -> String {
        if let Some(url) = self.overrides.get(&series) {
            return url.clone();
        }
        self.url_template
            .replace("{series}", &series.label().to_ascii_lowercase())
            .replace("{id}", &series.id().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FeedSettings,
}

impl HttpFetcher {
    pub fn new(settings: FeedSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .context("build http client")?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    async fn fetch_body(&self, series: Series) -> Result<Option<String>> {
        let url = self.settings.url_for(series);
        debug!(%series, %url, "fetching live feed");

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            warn!(%series, "feed forbidden (403); event may not be live yet");
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("GET {url}: {status}");
        }

        let body = resp.text().await.with_context(|| format!("read body from {url}"))?;
        Ok(Some(body))
    }
}

/// Decode a feed body into a snapshot for `series`.
///
/// Accepts the flag as a label or as the upstream numeric code. Fills in the
/// series label and capture time when the payload omits them and returns the
/// running order sorted by position.
pub fn decode_feed(body: &str, series: Series, fetched_at: DateTime<Utc>) -> Result<TelemetrySnapshot> {
    let mut raw: serde_json::Value = serde_json::from_str(body).context("parse live feed")?;
    if let Some(code) = raw.get("flag").and_then(serde_json::Value::as_i64) {
        raw["flag"] = serde_json::to_value(FlagStatus::from_code(code)).context("encode flag")?;
    }
    let mut snap: TelemetrySnapshot = serde_json::from_value(raw).context("decode live feed")?;

    if snap.series.as_deref().is_none_or(|s| s.trim().is_empty()) {
        snap.series = Some(series.label().to_string());
    }
    if snap.last_update.as_deref().is_none_or(|s| s.trim().is_empty()) {
        snap.last_update = Some(to_rfc3339_utc(fetched_at));
    }
    if snap.laps_to_go.is_none() && snap.laps_total > 0 {
        snap.laps_to_go = Some(snap.laps_total.saturating_sub(snap.lap));
    }

    Ok(snap.sorted())
}

impl TelemetryFetcher for HttpFetcher {
    async fn fetch(&self, series: Series) -> Option<TelemetrySnapshot> {
        let body = match self.fetch_body(series).await {
            Ok(Some(b)) => b,
            Ok(None) => return None,
            Err(e) => {
                warn!(%series, error = %format!("{e:#}"), "live feed request failed");
                return None;
            }
        };

        match decode_feed(&body, series, Utc::now()) {
            Ok(snap) if snap.is_empty() => {
                warn!(%series, "live feed has no cars");
                None
            }
            Ok(snap) => Some(snap),
            Err(e) => {
                warn!(%series, error = %format!("{e:#}"), "live feed body rejected");
                None
            }
        }
    }
}
