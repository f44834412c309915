//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Number of events requested from the relay and primed from the store when
/// `SUBSCRIPTION_LIMIT` is unset.
pub const DEFAULT_LIMIT: usize = 100;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay WebSocket URL, e.g. `wss://relay.example.com`.
    pub relay_url: String,
    /// Root directory of the file-backed event store.
    pub store_root: PathBuf,
    /// Hex secret key used by `post`. Never logged.
    pub secret_key: Option<String>,
    /// `limit` sent in the subscription filter.
    pub limit: usize,
    /// Optional `since` lower bound for the subscription.
    pub since: Option<i64>,
    /// Optional kind filter.
    pub kinds: Option<Vec<u32>>,
    /// Optional author filter (hex pubkeys).
    pub authors: Option<Vec<String>>,
    /// Optional SOCKS5 proxy (host:port), e.g. a local Tor daemon.
    pub tor_socks: Option<String>,
    /// Deadline for the relay to finish sending its backlog.
    pub eose_timeout: Option<Duration>,
    /// `tracing` filter directive.
    pub log_level: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let relay_url = env::var("RELAY_URL").context("RELAY_URL is not set")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT is not set")?);
        let secret_key = non_empty("SECRET_KEY");
        let limit = match non_empty("SUBSCRIPTION_LIMIT") {
            Some(s) => s.parse().context("SUBSCRIPTION_LIMIT must be a number")?,
            None => DEFAULT_LIMIT,
        };
        let since = match non_empty("FILTER_SINCE") {
            Some(s) => Some(s.parse().context("FILTER_SINCE must be a unix timestamp")?),
            None => None,
        };
        let kinds = non_empty("FILTER_KINDS").map(csv_u32).filter(|v| !v.is_empty());
        let authors = non_empty("FILTER_AUTHORS")
            .map(csv_strings)
            .filter(|v| !v.is_empty());
        let tor_socks = non_empty("TOR_SOCKS");
        let eose_timeout = match non_empty("EOSE_TIMEOUT_SECS") {
            Some(s) => Some(Duration::from_secs(
                s.parse().context("EOSE_TIMEOUT_SECS must be a number")?,
            )),
            None => None,
        };
        let log_level = non_empty("LOG_LEVEL").unwrap_or_else(|| "info".into());
        let log_json = env::var("LOG_JSON").unwrap_or_default() == "1";
        Ok(Self {
            relay_url,
            store_root,
            secret_key,
            limit,
            since,
            kinds,
            authors,
            tor_socks,
            eose_timeout,
            log_level,
            log_json,
        })
    }

    /// The subscription filter object sent with `REQ`.
    pub fn filter(&self) -> Value {
        let mut filter = Map::new();
        filter.insert("limit".into(), Value::from(self.limit));
        if let Some(since) = self.since {
            filter.insert("since".into(), Value::from(since));
        }
        if let Some(kinds) = &self.kinds {
            filter.insert("kinds".into(), Value::from(kinds.clone()));
        }
        if let Some(authors) = &self.authors {
            filter.insert("authors".into(), Value::from(authors.clone()));
        }
        Value::Object(filter)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    input
        .as_ref()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated string into `u32` values, skipping invalid entries.
pub fn csv_u32(input: impl AsRef<str>) -> Vec<u32> {
    input
        .as_ref()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}
