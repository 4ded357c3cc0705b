//! `WebSocketWrapper`: events, requests and channels over one socket.
//!
//! ARCHITECTURE
//! ============
//! ```text
//!   Socket ──SocketEvents──▶ Shared::on_message ──decode──▶ route
//!                                                       │
//!                    ┌──────────────────────────────────┼───────────────┐
//!                    ▼                                  ▼               ▼
//!             Correlator (resolve/reject)     Channel::dispatch_wire   Reject
//!                                                       │          (routing miss)
//!                                                       ▼
//!                                           Responder ─▶ Connection::send
//! ```
//!
//! Everything is single-threaded (`Rc`/`RefCell`). No borrow is held across
//! a listener call or a socket send, so listeners may freely emit, request,
//! register listeners or rebind from inside a callback. Request timeouts run
//! inside the awaited `ResponseFuture`; listeners returning `Reply::Deferred`
//! run on the `Spawner` given to `set_spawner`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use frames::{ErrorPayload, Message, Rejection, RequestId, decode_message, encode_message};
use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelRegistry, EventHandler};
use crate::config::Options;
use crate::connection::{CloseFrame, Connection, Lifecycle, ReadyState, Socket, SocketEvents};
use crate::correlator::{Correlator, ResponseFuture};
use crate::error::{RoutingError, WrapperError};
use crate::listener::{Listener, Responder, Spawner};

/// State shared by the wrapper handle, its channels and its socket callbacks.
pub(crate) struct Shared {
    pub(crate) options: Options,
    pub(crate) channels: ChannelRegistry,
    connection: Connection,
    correlator: Correlator,
    data: RefCell<HashMap<String, Value>>,
    spawner: RefCell<Option<Rc<dyn Spawner>>>,
    this: Weak<Shared>,
}

impl Shared {
    fn responder(&self) -> Weak<dyn Responder> {
        self.this.clone()
    }

    pub(crate) fn spawner(&self) -> Option<Rc<dyn Spawner>> {
        self.spawner.borrow().clone()
    }

    fn send_message(&self, message: &Message, ignore_queue_limit: bool) -> Result<(), WrapperError> {
        let text = encode_message(message, self.options.error_fields);
        debug!(kind = message.kind(), id = message.id(), event = message.event(), "wrapper: outbound");
        self.connection.send(text, ignore_queue_limit)
    }

    pub(crate) fn emit_event(&self, channel: Option<&str>, event: &str, args: Vec<Value>) -> Result<(), WrapperError> {
        let message = Message::Emit { event: event.to_owned(), channel: channel.map(str::to_owned), data: args };
        self.send_message(&message, false)
    }

    /// Register a pending request, then send it. The entry is discarded if
    /// the send fails.
    pub(crate) fn send_request(
        &self,
        channel: Option<&str>,
        event: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<ResponseFuture, WrapperError> {
        let (id, response) = self.correlator.register(timeout);
        let message = Message::Request { event: event.to_owned(), channel: channel.map(str::to_owned), data: args, id };
        if let Err(e) = self.send_message(&message, false) {
            self.correlator.discard(id);
            return Err(e);
        }
        Ok(response)
    }

    fn signal(&self, name: &str, args: &[Value]) -> Result<(), WrapperError> {
        self.channels.default_channel().dispatch_signal(name, args)
    }

    /// Parse and route one inbound frame. Malformed frames are dropped.
    fn handle_frame(&self, text: &str) -> Result<(), WrapperError> {
        let message = match decode_message(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "wrapper: dropping malformed frame");
                return Ok(());
            }
        };
        debug!(kind = message.kind(), id = message.id(), event = message.event(), "wrapper: inbound");

        match message {
            Message::Resolve { id, data } => {
                self.correlator.resolve(id, data);
                Ok(())
            }
            Message::Reject { id, error } => {
                self.correlator.reject(id, error);
                Ok(())
            }
            Message::Emit { event, channel, data } => self.route_query(&event, channel.as_deref(), &data, None),
            Message::Request { event, channel, data, id } => {
                self.route_query(&event, channel.as_deref(), &data, Some(id))
            }
        }
    }

    fn route_query(
        &self,
        event: &str,
        channel: Option<&str>,
        args: &[Value],
        request_id: Option<RequestId>,
    ) -> Result<(), WrapperError> {
        let Some(target) = self.channels.get(channel) else {
            debug!(event, channel, "wrapper: query for unknown channel");
            if let Some(id) = request_id {
                let miss = RoutingError::UnknownChannel { channel: channel.unwrap_or_default().to_owned() };
                self.reject(id, ErrorPayload::from_error(&miss).into());
            }
            return Ok(());
        };

        let ran = target.dispatch_wire(event, args, request_id, &self.responder())?;
        if !ran {
            debug!(event, channel, "wrapper: no listener");
            if let Some(id) = request_id {
                let miss = RoutingError::NoListener { event: event.to_owned(), channel: channel.map(str::to_owned) };
                self.reject(id, ErrorPayload::from_error(&miss).into());
            }
        }
        Ok(())
    }
}

impl Responder for Shared {
    fn resolve(&self, id: RequestId, data: Option<Value>) {
        if let Err(e) = self.send_message(&Message::Resolve { id, data }, true) {
            warn!(id, error = %e, "wrapper: failed to send resolve");
        }
    }

    fn reject(&self, id: RequestId, rejection: Rejection) {
        if let Err(e) = self.send_message(&Message::Reject { id, error: rejection }, true) {
            warn!(id, error = %e, "wrapper: failed to send reject");
        }
    }
}

impl Lifecycle for Shared {
    fn on_open(&self, generation: u64) -> Result<(), WrapperError> {
        if !self.connection.is_current(generation) {
            debug!(generation, "wrapper: ignoring open from replaced socket");
            return Ok(());
        }
        self.connection.mark_open();
        match self.connection.flush() {
            Ok(0) => {}
            Ok(sent) => debug!(sent, "wrapper: flushed queued messages"),
            Err(e) => warn!(error = %e, queued = self.connection.queued(), "wrapper: flush interrupted"),
        }
        self.signal("open", &[])
    }

    fn on_message(&self, generation: u64, text: &str) -> Result<(), WrapperError> {
        if !self.connection.is_current(generation) {
            debug!(generation, "wrapper: ignoring message from replaced socket");
            return Ok(());
        }
        let signalled = self.signal("message", &[Value::String(text.to_owned())]);
        let handled = self.handle_frame(text);
        signalled.and(handled)
    }

    fn on_error(&self, generation: u64, description: &str) -> Result<(), WrapperError> {
        if !self.connection.is_current(generation) {
            return Ok(());
        }
        self.signal("error", &[Value::String(description.to_owned())])
    }

    fn on_close(&self, generation: u64, frame: CloseFrame) -> Result<(), WrapperError> {
        if !self.connection.is_current(generation) {
            debug!(generation, "wrapper: ignoring close from replaced socket");
            return Ok(());
        }
        let was_open = self.connection.mark_closed();
        // A u16 and a string always serialize.
        let args = [serde_json::to_value(&frame).unwrap_or_default(), Value::Bool(was_open)];
        let closed = self.signal("close", &args);
        let disconnected = self.signal("disconnect", &args);
        closed.and(disconnected)
    }
}

// =============================================================================
// WRAPPER
// =============================================================================

/// Handle to a wrapper. Clones share state.
#[derive(Clone)]
pub struct WebSocketWrapper {
    shared: Rc<Shared>,
}

impl WebSocketWrapper {
    /// Wrap `socket` with default options.
    pub fn new(socket: Rc<dyn Socket>) -> Self {
        let wrapper = Self::with_options(Options::default());
        wrapper.bind(socket);
        wrapper
    }

    /// Create an unbound wrapper. Sends queue until `bind`.
    #[must_use]
    pub fn with_options(options: Options) -> Self {
        let shared = Rc::new_cyclic(|this: &Weak<Shared>| Shared {
            options,
            channels: ChannelRegistry::new(this.clone()),
            connection: Connection::new(options.max_send_queue),
            correlator: Correlator::new(),
            data: RefCell::new(HashMap::new()),
            spawner: RefCell::new(None),
            this: this.clone(),
        });
        Self { shared }
    }

    /// Attach to `socket`, replacing any previous one. Pending requests and
    /// queued messages are kept. If the socket is already open the queue is
    /// flushed right away.
    pub fn bind(&self, socket: Rc<dyn Socket>) -> &Self {
        let generation = self.shared.connection.bind(socket.clone());
        let sink: Weak<dyn Lifecycle> = self.shared.this.clone();
        socket.attach(SocketEvents::new(sink, generation));
        debug!(generation, state = ?socket.ready_state(), "wrapper: bound socket");

        if socket.ready_state() == ReadyState::Open {
            self.shared.connection.mark_open();
            if let Err(e) = self.shared.connection.flush() {
                warn!(error = %e, "wrapper: flush after bind interrupted");
            }
        }
        self
    }

    /// Run `Reply::Deferred` listener futures on `spawner`. Until one is set
    /// a deferred reply fails with `WrapperError::NoSpawner`.
    pub fn set_spawner(&self, spawner: impl Spawner + 'static) -> &Self {
        *self.shared.spawner.borrow_mut() = Some(Rc::new(spawner));
        self
    }

    /// Channel named `name`, created on first use. An empty name is the
    /// default channel.
    #[must_use]
    pub fn of(&self, name: &str) -> Rc<Channel> {
        self.shared.channels.get_or_create(name)
    }

    #[must_use]
    pub fn default_channel(&self) -> Rc<Channel> {
        self.shared.channels.default_channel().clone()
    }

    #[must_use]
    pub fn options(&self) -> Options {
        self.shared.options
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.data.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.shared.data.borrow_mut().insert(key.into(), value.into());
        self
    }

    /// Reject every pending request with "Request was aborted" and drop the
    /// outbound queue. Returns the number of requests aborted.
    pub fn abort(&self) -> usize {
        self.shared.connection.clear_queue();
        self.shared.correlator.abort_all()
    }

    pub fn disconnect(&self, frame: Option<CloseFrame>) -> &Self {
        self.shared.connection.disconnect(frame);
        self
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.shared.connection.is_connecting()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_connected()
    }

    /// Send raw text, bypassing the protocol encoder.
    pub fn send(&self, text: impl Into<String>, ignore_queue_limit: bool) -> Result<(), WrapperError> {
        self.shared.connection.send(text.into(), ignore_queue_limit)
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.connection.queued()
    }
}

impl EventHandler for WebSocketWrapper {
    fn on(&self, event: &str, listener: Listener) -> &Self {
        self.shared.channels.default_channel().on(event, listener);
        self
    }

    fn once(&self, event: &str, listener: Listener) -> &Self {
        self.shared.channels.default_channel().once(event, listener);
        self
    }

    fn remove_listener(&self, event: &str, listener: Option<&Listener>) -> &Self {
        self.shared.channels.default_channel().remove_listener(event, listener);
        self
    }

    fn remove_all_listeners(&self, event: Option<&str>) -> &Self {
        self.shared.channels.default_channel().remove_all_listeners(event);
        self
    }

    fn event_names(&self) -> Vec<String> {
        self.shared.channels.default_channel().event_names()
    }

    fn listeners(&self, event: &str) -> Vec<Listener> {
        self.shared.channels.default_channel().listeners(event)
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), WrapperError> {
        self.shared.channels.default_channel().emit(event, args)
    }

    fn timeout(&self, timeout: Duration) -> &Self {
        self.shared.channels.default_channel().timeout(timeout);
        self
    }

    fn request(&self, event: &str, args: Vec<Value>) -> Result<ResponseFuture, WrapperError> {
        self.shared.channels.default_channel().request(event, args)
    }
}

impl std::fmt::Debug for WebSocketWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketWrapper")
            .field("state", &self.shared.connection.ready_state())
            .field("pending", &self.pending_requests())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "wrapper_test.rs"]
mod tests;
