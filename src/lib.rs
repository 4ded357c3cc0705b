//! Events, correlated requests and channels over a single WebSocket.
//!
//! ```text
//!   WebSocketWrapper ── default Channel ── named Channels ("chat", ...)
//!        │                    │
//!        │                    └── ListenerTable (wrapped listeners)
//!        ├── Correlator  (pending requests, timeouts)
//!        └── Connection  (Socket binding, outbound queue)
//! ```
//!
//! The wrapper is single-threaded: handles are `!Send`. Request timeouts run
//! inside the awaited future; deferred listener replies run on a `Spawner`.
//! Wire messages are JSON objects with one-letter keys; see the `frames`
//! crate.

pub mod channel;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod listener;
pub mod transport;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use channel::{Channel, EventHandler, RESERVED_EVENTS};
pub use config::Options;
pub use connection::{CloseFrame, ReadyState, Socket, SocketEvents};
pub use correlator::{RequestOutcome, ResponseFuture};
pub use error::{ConfigError, RequestError, RoutingError, TransportError, WrapperError};
pub use frames::{ErrorFields, ErrorPayload, Message, Rejection, RequestId};
pub use listener::{Listener, ListenerResult, LocalSetSpawner, Reply, Spawner};
pub use transport::WsSocket;
pub use wrapper::WebSocketWrapper;
