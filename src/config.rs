//! Configuration for the pipeline and its two front-ends.
//!
//! Everything is read once at startup (a `.env` file first, then the
//! process environment) and handed to the worker by value.

use crate::domain::keys::DEFAULT_MARKER;
use crate::domain::thumbnail::ThumbnailPolicy;
use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default long-poll wait, in seconds.
pub const DEFAULT_WAIT_SECONDS: u32 = 20;
/// SQS refuses waits above 20 seconds and batches above 10 messages.
pub const MAX_WAIT_SECONDS: u32 = 20;
pub const MAX_BATCH_MESSAGES: u32 = 10;

/// Settings shared by both front-ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub thumbnail: ThumbnailPolicy,
    /// Reserved path segment for derivatives
    pub marker: String,
    /// Cap on concurrently processed units; `None` runs a whole batch at once
    pub max_in_flight: Option<usize>,
    /// Pause after the notification source fails
    pub poll_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thumbnail: ThumbnailPolicy::default(),
            marker: DEFAULT_MARKER.to_string(),
            max_in_flight: None,
            poll_backoff: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_width = parse_or(&lookup, "THUMB_MAX_WIDTH", defaults.thumbnail.max_width)?;
        let max_height = parse_or(&lookup, "THUMB_MAX_HEIGHT", defaults.thumbnail.max_height)?;
        if max_width == 0 || max_height == 0 {
            return Err(ConfigError::invalid(
                "THUMB_MAX_WIDTH/THUMB_MAX_HEIGHT",
                format!("{}x{}", max_width, max_height),
                "bounding box must be non-empty",
            ));
        }

        let quality = parse_or(&lookup, "THUMB_QUALITY", defaults.thumbnail.quality)?;
        if !(1..=100).contains(&quality) {
            return Err(ConfigError::invalid(
                "THUMB_QUALITY",
                quality.to_string(),
                "must be between 1 and 100",
            ));
        }

        let marker = lookup("THUMB_MARKER").unwrap_or(defaults.marker);
        if marker.is_empty() || marker.contains('/') {
            return Err(ConfigError::invalid(
                "THUMB_MARKER",
                marker,
                "must be a single non-empty path segment",
            ));
        }

        let max_in_flight = match lookup("THUMB_MAX_IN_FLIGHT") {
            Some(raw) => match parse::<usize>("THUMB_MAX_IN_FLIGHT", &raw)? {
                0 => {
                    return Err(ConfigError::invalid(
                        "THUMB_MAX_IN_FLIGHT",
                        raw,
                        "must be at least 1",
                    ))
                }
                n => Some(n),
            },
            None => None,
        };

        let backoff_ms = parse_or(
            &lookup,
            "THUMB_POLL_BACKOFF_MS",
            defaults.poll_backoff.as_millis() as u64,
        )?;

        Ok(Self {
            thumbnail: ThumbnailPolicy {
                max_width,
                max_height,
                quality,
            },
            marker,
            max_in_flight,
            poll_backoff: Duration::from_millis(backoff_ms),
        })
    }
}

/// Long-polling (SQS) settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_name: String,
    pub wait_seconds: u32,
    pub max_messages: u32,
}

impl QueueConfig {
    /// `wait_seconds` is clamped to what the queue accepts.
    pub fn new(queue_name: impl Into<String>, wait_seconds: u32) -> Result<Self, ConfigError> {
        let queue_name = queue_name.into();
        if queue_name.trim().is_empty() {
            return Err(ConfigError::Missing("queue name"));
        }
        Ok(Self {
            queue_name,
            wait_seconds: wait_seconds.min(MAX_WAIT_SECONDS),
            max_messages: MAX_BATCH_MESSAGES,
        })
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Result<Self, ConfigError> {
        if !(1..=MAX_BATCH_MESSAGES).contains(&max_messages) {
            return Err(ConfigError::invalid(
                "THUMB_MAX_MESSAGES",
                max_messages.to_string(),
                format!("must be between 1 and {}", MAX_BATCH_MESSAGES),
            ));
        }
        self.max_messages = max_messages;
        Ok(self)
    }
}

/// Push-invocation (Lambda) settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushConfig {
    /// `host:port` of the runtime API
    pub runtime_api: String,
    /// Report a batch with failed units as an invocation error so the
    /// platform redelivers the whole batch.
    pub retry_failed_batches: bool,
}

impl PushConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            runtime_api: lookup("AWS_LAMBDA_RUNTIME_API")
                .ok_or(ConfigError::Missing("AWS_LAMBDA_RUNTIME_API"))?,
            retry_failed_batches: parse_or(&lookup, "THUMB_RETRY_FAILED_BATCHES", false)?,
        })
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(name, raw, e.to_string()))
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}
