//! Wrapper options, with an environment-variable layer.

use std::time::Duration;

use frames::ErrorFields;

use crate::error::ConfigError;

/// Default capacity of the outbound queue used while disconnected.
pub const DEFAULT_MAX_SEND_QUEUE: usize = 10;

pub const ENV_REQUEST_TIMEOUT_MS: &str = "WS_WRAPPER_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_SEND_QUEUE: &str = "WS_WRAPPER_MAX_SEND_QUEUE";
pub const ENV_ERROR_FIELDS: &str = "WS_WRAPPER_ERROR_FIELDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Default timeout for outbound requests. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Messages buffered while disconnected before sends start failing.
    pub max_send_queue: usize,
    /// Error fields serialized when rejecting with an error.
    pub error_fields: ErrorFields,
}

impl Default for Options {
    fn default() -> Self {
        Self { request_timeout: None, max_send_queue: DEFAULT_MAX_SEND_QUEUE, error_fields: ErrorFields::MessageOnly }
    }
}

impl Options {
    /// Build options from environment variables, falling back to defaults.
    ///
    /// - `WS_WRAPPER_REQUEST_TIMEOUT_MS`: default request timeout; `0` disables
    /// - `WS_WRAPPER_MAX_SEND_QUEUE`: queue capacity while disconnected
    /// - `WS_WRAPPER_ERROR_FIELDS`: `message` (default) or `all`
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = env_parse(ENV_REQUEST_TIMEOUT_MS, 0_u64);
        let error_fields = parse_error_fields(std::env::var(ENV_ERROR_FIELDS).ok().as_deref())?;

        Ok(Self {
            request_timeout: timeout_from_millis(timeout_ms),
            max_send_queue: env_parse(ENV_MAX_SEND_QUEUE, DEFAULT_MAX_SEND_QUEUE),
            error_fields,
        })
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    #[must_use]
    pub fn with_max_send_queue(mut self, max: usize) -> Self {
        self.max_send_queue = max;
        self
    }

    #[must_use]
    pub fn with_error_fields(mut self, error_fields: ErrorFields) -> Self {
        self.error_fields = error_fields;
        self
    }
}

/// Zero means "no timeout".
#[must_use]
pub fn timeout_from_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Parse an error-fields policy name.
pub fn parse_error_fields(raw: Option<&str>) -> Result<ErrorFields, ConfigError> {
    match raw.unwrap_or("message") {
        "message" => Ok(ErrorFields::MessageOnly),
        "all" => Ok(ErrorFields::All),
        other => Err(ConfigError::Invalid { var: ENV_ERROR_FIELDS, value: other.to_owned() }),
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
