//! Engine and backend configuration.
//!
//! `SyncConfig` holds the scheduler timing knobs. `RemoteConfig` describes the
//! PostgREST endpoint the remote store talks to.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_MIN_INTERVAL_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
const REST_PATH: &str = "/rest/v1";

/// Timing configuration for the sync scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum time between two successful cycles
    pub min_interval: Duration,
    /// Low-frequency poll timer. `None` disables polling.
    pub poll_interval: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Subscribe to the remote change feed while started
    pub realtime: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(DEFAULT_MIN_INTERVAL_SECS),
            poll_interval: Some(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            realtime: true,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn without_polling(mut self) -> Self {
        self.poll_interval = None;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub const fn without_realtime(mut self) -> Self {
        self.realtime = false;
        self
    }

    /// Retry delay after `consecutive_errors` failures in a row.
    ///
    /// `min(backoff_max, backoff_base * 2^(n-1))`. Zero errors means no delay.
    pub fn backoff_delay(&self, consecutive_errors: u32) -> Duration {
        if consecutive_errors == 0 {
            return Duration::ZERO;
        }
        let exponent = consecutive_errors.saturating_sub(1).min(31);
        let factor = 1_u32 << exponent;
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |delay| delay.min(self.backoff_max))
    }
}

/// Connection details for a Supabase/PostgREST backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// REST root, always ending in `/rest/v1`
    pub rest_url: String,
    pub anon_key: String,
}

impl RemoteConfig {
    /// Build a config from the project URL and anon key.
    ///
    /// Accepts either the project root (`https://x.supabase.co`) or the REST
    /// root (`https://x.supabase.co/rest/v1`).
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let url = normalize_required_http_url(url.into(), "supabase_url")?;
        let anon_key = normalize_required_value(anon_key.into(), "supabase_anon_key")?;
        let rest_url = if url.ends_with(REST_PATH) {
            url
        } else {
            format!("{url}{REST_PATH}")
        };
        Ok(Self { rest_url, anon_key })
    }

    /// Project root without the REST suffix (what the auth client expects)
    pub fn project_url(&self) -> &str {
        self.rest_url
            .strip_suffix(REST_PATH)
            .unwrap_or(&self.rest_url)
    }
}

fn normalize_required_value(raw: String, field: &str) -> Result<String> {
    normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput(format!("config field '{field}' is required")))
}

fn normalize_required_http_url(raw: String, field: &str) -> Result<String> {
    let value = normalize_required_value(raw, field)?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "config field '{field}' must include http:// or https://"
        )))
    }
}
