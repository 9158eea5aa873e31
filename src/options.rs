use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{Error, Result};

/// Default local timeout for one exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default window during which repeated failure notifications of one call
/// collapse into a single round of response-error observers.
pub const DEFAULT_ERROR_DEBOUNCE: Duration = Duration::from_millis(2_000);

/// Cookie/credential policy forwarded to the exchange primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Service-wide configuration, set once when the service is built.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalConfig {
    /// Prefix for every endpoint path that is not an absolute URL.
    pub base_url: String,
    /// Local timer armed for each exchange. Zero disables the timer.
    pub timeout: Duration,
    /// Re-send after a timeout.
    pub timeout_retry: bool,
    /// Maximum re-sends caused by timeouts.
    pub timeout_retry_count: u32,
    /// Re-send after a failed exchange.
    pub retry: bool,
    /// Maximum re-sends caused by failures.
    pub retry_count: u32,
    /// Pause before each failure re-send.
    pub retry_interval: Duration,
    /// Cancel an in-flight call when an identical one is issued.
    pub cancel_repeated_requests: bool,
    pub credentials: Credentials,
    /// Headers sent with every request, lowest precedence.
    pub headers: HeaderMap,
    pub error_debounce: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            timeout_retry: false,
            timeout_retry_count: 0,
            retry: false,
            retry_count: 0,
            retry_interval: Duration::ZERO,
            cancel_repeated_requests: false,
            credentials: Credentials::default(),
            headers: HeaderMap::new(),
            error_debounce: DEFAULT_ERROR_DEBOUNCE,
        }
    }
}

impl GlobalConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a configuration from environment variables.
    ///
    /// Reads (all optional):
    /// - `FETCH_SERVICE_BASE_URL`
    /// - `FETCH_SERVICE_TIMEOUT_MS`
    /// - `FETCH_SERVICE_RETRY_COUNT` (a value above zero enables retry)
    /// - `FETCH_SERVICE_RETRY_INTERVAL_MS`
    /// - `FETCH_SERVICE_TIMEOUT_RETRY_COUNT` (a value above zero enables timeout retry)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(base_url) = lookup("FETCH_SERVICE_BASE_URL") {
            config.base_url = base_url.trim().to_owned();
        }
        if let Some(ms) = parse_number(&lookup, "FETCH_SERVICE_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(count) = parse_number(&lookup, "FETCH_SERVICE_RETRY_COUNT")? {
            config.retry_count = saturate(count);
            config.retry = count > 0;
        }
        if let Some(ms) = parse_number(&lookup, "FETCH_SERVICE_RETRY_INTERVAL_MS")? {
            config.retry_interval = Duration::from_millis(ms);
        }
        if let Some(count) = parse_number(&lookup, "FETCH_SERVICE_TIMEOUT_RETRY_COUNT")? {
            config.timeout_retry_count = saturate(count);
            config.timeout_retry = count > 0;
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_retry(mut self, count: u32) -> Self {
        self.timeout_retry = true;
        self.timeout_retry_count = count;
        self
    }

    pub fn with_retry(mut self, count: u32, interval: Duration) -> Self {
        self.retry = true;
        self.retry_count = count;
        self.retry_interval = interval;
        self
    }

    pub fn with_cancel_repeated_requests(mut self, enabled: bool) -> Self {
        self.cancel_repeated_requests = enabled;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_error_debounce(mut self, window: Duration) -> Self {
        self.error_debounce = window;
        self
    }

    /// Adds a default header. Invalid names or values are rejected.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Per-endpoint or per-call overrides of the global policy.
///
/// `None` defers to the next broader scope; `Some(false)` or `Some(0)` is an
/// explicit value and is never replaced by a broader one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolicyOverrides {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub timeout_retry: Option<bool>,
    pub timeout_retry_count: Option<u32>,
    pub retry: Option<bool>,
    pub retry_count: Option<u32>,
    pub retry_interval: Option<Duration>,
    pub cancel_repeated_requests: Option<bool>,
    pub credentials: Option<Credentials>,
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| Error::build(format!("invalid header name '{name}': {err}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|err| Error::build(format!("invalid value for header '{name}': {err}")))?;
    Ok((name, value))
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::build(format!("{key} must be a non-negative integer, got '{raw}'")))
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
