//! Error types for the wrapper.
//!
//! DESIGN
//! ======
//! Three audiences, three types:
//! - `WrapperError` is returned synchronously to local callers (send, emit,
//!   request, and the `SocketEvents` callbacks that re-raise listener failures).
//! - `RequestError` is what a pending request's future settles with.
//! - `RoutingError` never surfaces locally; it is converted into a reject
//!   frame for the remote caller.

use frames::{ErrorCode, Rejection};

/// Failure of a local, synchronous wrapper operation.
#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    #[error("WebSocket is not connected and send queue is full")]
    QueueFull,
    #[error("channel '{0}' cannot have sub-channels")]
    NestedChannel(String),
    #[error("the wrapper owning this channel has been dropped")]
    Detached,
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A listener failed while handling an inbound event. Any reply owed to
    /// the peer has already been sent.
    #[error("listener for '{event}' failed: {rejection}")]
    Listener { event: String, rejection: Rejection },
    /// A listener returned a deferred reply but the wrapper has no spawner.
    #[error("listener for '{event}' deferred its reply but no spawner is set")]
    NoSpawner { event: String },
}

/// Outcome of a request that did not resolve.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("Request timed out")]
    TimedOut,
    #[error("Request was aborted")]
    Aborted,
    /// The peer answered with a reject frame.
    #[error("{0}")]
    Rejected(Rejection),
}

impl RequestError {
    /// The peer's rejection, if the request was rejected remotely.
    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            Self::TimedOut | Self::Aborted => None,
        }
    }
}

/// Routing miss for an inbound query. Sent back to the peer as a reject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Channel '{channel}' does not exist")]
    UnknownChannel { channel: String },
    #[error("No event listener for '{event}'{}", on_channel(.channel.as_deref()))]
    NoListener { event: String, channel: Option<String> },
}

fn on_channel(channel: Option<&str>) -> String {
    channel.map(|c| format!(" on channel '{c}'")).unwrap_or_default()
}

impl ErrorCode for RoutingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownChannel { .. } => "E_UNKNOWN_CHANNEL",
            Self::NoListener { .. } => "E_NO_LISTENER",
        }
    }
}

/// Failure reported by a `Socket` implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket is closed")]
    Closed,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value}")]
    Invalid { var: &'static str, value: String },
}
