use std::time::Duration;

use url::Url;

use crate::error::DashboardError;

pub const DEFAULT_PAGE_URL: &str = "http://localhost:8000/index.html";
pub const DEFAULT_DISPATCH_URL: &str = "https://pascoa-dispatch.luis-h-carvalho.workers.dev/";
pub const METRICS_PATH: &str = "data/metrics.json";

/// Timings of one update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTimings {
    /// Wait after a successful dispatch before the first poll.
    pub grace: Duration,
    pub poll_interval: Duration,
    /// Measured from the first poll.
    pub deadline: Duration,
}

impl Default for UpdateTimings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(15),
            poll_interval: Duration::from_secs(8),
            deadline: Duration::from_secs(3 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the dashboard page; the metrics document is resolved relative to it.
    pub page_url: String,
    pub dispatch_url: String,
    pub timings: UpdateTimings,
    pub background_refresh: Duration,
    pub time_ago_refresh: Duration,
    pub display_utc_offset_hours: i32,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_url: DEFAULT_PAGE_URL.to_string(),
            dispatch_url: DEFAULT_DISPATCH_URL.to_string(),
            timings: UpdateTimings::default(),
            background_refresh: Duration::from_secs(10 * 60),
            time_ago_refresh: Duration::from_secs(10),
            display_utc_offset_hours: -3,
            http_timeout: Duration::from_secs(30),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        Self {
            page_url: std::env::var("DASH_PAGE_URL").unwrap_or(d.page_url),
            dispatch_url: std::env::var("DISPATCH_URL").unwrap_or(d.dispatch_url),
            timings: UpdateTimings {
                grace: env_secs("GRACE_SECS", d.timings.grace),
                poll_interval: env_secs("POLL_SECS", d.timings.poll_interval),
                deadline: env_secs("DEADLINE_SECS", d.timings.deadline),
            },
            background_refresh: env_secs("BACKGROUND_REFRESH_SECS", d.background_refresh),
            time_ago_refresh: env_secs("TIME_AGO_SECS", d.time_ago_refresh),
            display_utc_offset_hours: std::env::var("DISPLAY_UTC_OFFSET_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.display_utc_offset_hours),
            http_timeout: env_secs("HTTP_TIMEOUT_SECS", d.http_timeout),
        }
    }

    /// Rejects settings that would make the update loop spin or never start.
    pub fn validate(&self) -> Result<(), DashboardError> {
        self.metrics_url()?;
        Url::parse(&self.dispatch_url).map_err(|e| DashboardError::Config {
            message: format!("DISPATCH_URL: {}", e),
        })?;
        if self.timings.poll_interval.is_zero() {
            return Err(DashboardError::Config { message: "POLL_SECS must be > 0".to_string() });
        }
        if self.background_refresh.is_zero() || self.time_ago_refresh.is_zero() {
            return Err(DashboardError::Config {
                message: "refresh periods must be > 0".to_string(),
            });
        }
        if !(-23..=23).contains(&self.display_utc_offset_hours) {
            return Err(DashboardError::Config {
                message: "DISPLAY_UTC_OFFSET_HOURS must be within -23..=23".to_string(),
            });
        }
        Ok(())
    }

    /// `data/metrics.json` resolved against the page's own directory.
    pub fn metrics_url(&self) -> Result<Url, DashboardError> {
        let page = Url::parse(&self.page_url).map_err(|e| DashboardError::Config {
            message: format!("DASH_PAGE_URL: {}", e),
        })?;
        page.join(METRICS_PATH).map_err(|e| DashboardError::Config {
            message: format!("cannot resolve {}: {}", METRICS_PATH, e),
        })
    }
}
