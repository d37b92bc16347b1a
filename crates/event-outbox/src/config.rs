//! Outbox configuration.
//!
//! A config is built once, validated, and never mutated afterwards. It can
//! come from [`OutboxConfig::builder`], from a JSON file, and from a small
//! set of environment overrides.

use crate::{OutboxError, OutboxResult, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default collector base URL.
pub const DEFAULT_COLLECTOR_URL: &str = "http://localhost:8001";

/// Default API path appended to the collector URL.
pub const DEFAULT_API_PATH: &str = "/api/v1/s2s/event";

/// Default ingestion queue capacity.
pub const DEFAULT_QUEUE_BUFFER: usize = 1024;

/// Default timer period between flushes.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;

/// Default store size that triggers an immediate flush.
pub const DEFAULT_FLUSH_COUNT: usize = 50;

/// Default retry budget per event.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default timeout for one collector request, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Header carrying `api_key`.
pub const API_KEY_HEADER: &str = "X-Auth-Token";

/// Outbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Collector base URL.
    pub collector_url: String,
    /// API path joined to `collector_url`.
    pub api_path: String,
    /// Optional key sent as the `X-Auth-Token` header.
    pub api_key: Option<String>,
    /// Static headers attached to every request.
    pub headers: BTreeMap<String, String>,
    /// Static query parameters attached to every request.
    pub query_params: BTreeMap<String, String>,
    /// Capacity of the ingestion queue; producers wait when it is full.
    pub queue_buffer: usize,
    /// Timer period between unconditional flushes.
    pub flush_interval_ms: u64,
    /// Store size at which admission triggers an immediate flush.
    pub flush_count: usize,
    /// Deliver every flush as one newline-joined request.
    pub bulk: bool,
    /// Drop events that fail validation instead of storing them.
    pub strict: bool,
    /// Top-level fields strict validation requires.
    pub required_fields: Vec<String>,
    /// Retry budget per event; 0 means unlimited.
    pub max_retries: u32,
    /// Verbose per-send diagnostics.
    pub debug: bool,
    /// Timeout for a single collector request.
    pub request_timeout_ms: u64,
    /// Top-level fields added to JSON object events that do not set them.
    pub default_context: BTreeMap<String, Value>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            api_key: None,
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            queue_buffer: DEFAULT_QUEUE_BUFFER,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_count: DEFAULT_FLUSH_COUNT,
            bulk: false,
            strict: false,
            required_fields: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            debug: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            default_context: BTreeMap::new(),
        }
    }
}

impl OutboxConfig {
    /// Start building a config for the given collector.
    pub fn builder(collector_url: impl Into<String>) -> OutboxConfigBuilder {
        OutboxConfigBuilder {
            config: Self {
                collector_url: collector_url.into(),
                ..Self::default()
            },
        }
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load_from_file(path: &Path) -> OutboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OutboxConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EVENT_OUTBOX_*` environment overrides and re-validate.
    pub fn load_from_env(&mut self) -> OutboxResult<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup` and re-validate.
    pub fn apply_env<F>(&mut self, lookup: F) -> OutboxResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EVENT_OUTBOX_COLLECTOR_URL") {
            self.collector_url = url;
        }
        if let Some(key) = lookup("EVENT_OUTBOX_API_KEY") {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(debug) = lookup("EVENT_OUTBOX_DEBUG") {
            self.debug = parse_flag(&debug);
        }
        if let Some(retries) = lookup("EVENT_OUTBOX_MAX_RETRIES") {
            self.max_retries = retries.trim().parse().map_err(|_| {
                OutboxError::Config(format!("EVENT_OUTBOX_MAX_RETRIES is not a number: {retries}"))
            })?;
        }
        self.validate()
    }

    /// Check every field that would otherwise fail at runtime.
    pub fn validate(&self) -> OutboxResult<()> {
        let endpoint = self.endpoint()?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(OutboxError::Config(format!(
                "collector_url must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        if self.queue_buffer == 0 {
            return Err(OutboxError::Config("queue_buffer must be > 0".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(OutboxError::Config("flush_interval_ms must be > 0".into()));
        }
        if self.flush_count == 0 {
            return Err(OutboxError::Config("flush_count must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(OutboxError::Config("request_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Full request URL: collector base plus API path.
    pub fn endpoint(&self) -> OutboxResult<Url> {
        let base = self.collector_url.trim_end_matches('/');
        let path = self.api_path.trim_start_matches('/');
        let raw = if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&raw).map_err(|e| OutboxError::Config(format!("invalid collector URL {raw}: {e}")))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Whole milliseconds, rounding any sub-millisecond remainder up.
fn millis_ceil(duration: Duration) -> u64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Builder for [`OutboxConfig`].
#[derive(Debug, Clone)]
pub struct OutboxConfigBuilder {
    config: OutboxConfig,
}

impl OutboxConfigBuilder {
    pub fn api_path(mut self, path: impl Into<String>) -> Self {
        self.config.api_path = path.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.query_params.insert(name.into(), value.into());
        self
    }

    pub fn queue_buffer(mut self, capacity: usize) -> Self {
        self.config.queue_buffer = capacity;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms = millis_ceil(interval);
        self
    }

    pub fn flush_count(mut self, count: usize) -> Self {
        self.config.flush_count = count;
        self
    }

    pub fn bulk(mut self, bulk: bool) -> Self {
        self.config.bulk = bulk;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn required_field(mut self, field: impl Into<String>) -> Self {
        self.config.required_fields.push(field.into());
        self
    }

    /// Retry budget per event.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Never give up on an event.
    pub fn unlimited_retries(self) -> Self {
        self.max_retries(0)
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = millis_ceil(timeout);
        self
    }

    /// Add a field every JSON object event receives unless it sets its own.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.default_context.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> OutboxResult<OutboxConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
