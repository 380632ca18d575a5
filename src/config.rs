//! Connection configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::media::DEFAULT_BUCKET;

/// Where a connected client learns about table changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChangeSource {
    /// The service's realtime socket, with polling for tables it refuses.
    #[default]
    Realtime,
    /// Snapshot polling only.
    Polling,
}

impl FromStr for ChangeSource {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(ChangeSource::Realtime),
            "polling" | "poll" => Ok(ChangeSource::Polling),
            other => Err(StoreError::InvalidOperation(format!(
                "unknown change source: {other}"
            ))),
        }
    }
}

/// Service connection settings.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base URL of the hosted service (e.g. `https://xyz.example.co`).
    pub url: String,

    /// Public API key sent with every request.
    pub api_key: String,

    /// Storage bucket holding question and option images.
    pub bucket: String,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// How often the polling transport re-reads a watched table.
    pub poll_interval: Duration,

    /// Change notification source for [`QuizClient::connect`](crate::QuizClient::connect).
    pub changes: ChangeSource,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            bucket: DEFAULT_BUCKET.to_string(),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            changes: ChangeSource::default(),
        }
    }
}

impl StoreConfig {
    /// Read settings from `QUIZ_STORE_URL`, `QUIZ_STORE_KEY`,
    /// `QUIZ_STORE_BUCKET`, `QUIZ_STORE_POLL_MS` and `QUIZ_STORE_CHANGES`
    /// (`realtime` or `polling`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("QUIZ_STORE_URL").ok_or_else(|| {
            StoreError::Connection("QUIZ_STORE_URL environment variable not set".into())
        })?;
        let api_key = lookup("QUIZ_STORE_KEY").ok_or_else(|| {
            StoreError::Connection("QUIZ_STORE_KEY environment variable not set".into())
        })?;

        let mut config = Self {
            url,
            api_key,
            ..Default::default()
        };
        if let Some(bucket) = lookup("QUIZ_STORE_BUCKET") {
            config.bucket = bucket;
        }
        if let Some(ms) = lookup("QUIZ_STORE_POLL_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                StoreError::InvalidOperation(format!("QUIZ_STORE_POLL_MS is not a number: {ms}"))
            })?;
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(source) = lookup("QUIZ_STORE_CHANGES") {
            config.changes = source.parse()?;
        }
        Ok(config)
    }
}
