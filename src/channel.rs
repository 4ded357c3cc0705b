//! Channels: named listener scopes multiplexed over one connection.
//!
//! The default channel (no name) also receives the lifecycle signals.
//! Named channels are created on first use and live as long as the wrapper;
//! they cannot have sub-channels.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use frames::RequestId;
use serde_json::Value;
use tracing::debug;

use crate::correlator::ResponseFuture;
use crate::error::WrapperError;
use crate::listener::{Listener, ListenerTable, Mode, Responder, Spawner};
use crate::wrapper::Shared;

/// Lifecycle names that are local signals on the default channel.
pub const RESERVED_EVENTS: [&str; 5] = ["open", "message", "error", "close", "disconnect"];

#[must_use]
pub fn is_reserved(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

/// Listener registration plus outbound emit/request, shared by
/// `WebSocketWrapper` (its default channel) and `Channel`.
pub trait EventHandler {
    /// Call `listener` for every matching event.
    fn on(&self, event: &str, listener: Listener) -> &Self;

    /// Call `listener` for the next matching event only.
    fn once(&self, event: &str, listener: Listener) -> &Self;

    /// Remove the first registration of `listener`, or every listener of
    /// `event` when `None`.
    fn remove_listener(&self, event: &str, listener: Option<&Listener>) -> &Self;

    fn remove_all_listeners(&self, event: Option<&str>) -> &Self;

    fn event_names(&self) -> Vec<String>;

    fn listeners(&self, event: &str) -> Vec<Listener>;

    /// Send a fire-and-forget event.
    fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), WrapperError>;

    /// Override the timeout of the next `request` on this handler only.
    /// `Duration::ZERO` waits indefinitely.
    fn timeout(&self, timeout: Duration) -> &Self;

    /// Send a request and return a future for its reply.
    fn request(&self, event: &str, args: Vec<Value>) -> Result<ResponseFuture, WrapperError>;

    fn add_listener(&self, event: &str, listener: Listener) -> &Self {
        self.on(event, listener)
    }

    fn off(&self, event: &str, listener: &Listener) -> &Self {
        self.remove_listener(event, Some(listener))
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

pub struct Channel {
    name: Option<String>,
    engine: Weak<Shared>,
    listeners: RefCell<ListenerTable>,
    next_timeout: Cell<Option<Duration>>,
}

impl Channel {
    pub(crate) fn new(name: Option<String>, engine: Weak<Shared>) -> Self {
        Self { name, engine, listeners: RefCell::new(ListenerTable::default()), next_timeout: Cell::new(None) }
    }

    /// `None` for the default channel.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.name.is_none()
    }

    /// Look up or create a named channel. Only valid on the default channel;
    /// an empty name returns the default channel itself.
    pub fn of(&self, name: &str) -> Result<Rc<Channel>, WrapperError> {
        if let Some(own) = &self.name {
            return Err(WrapperError::NestedChannel(own.clone()));
        }
        let engine = self.engine()?;
        Ok(engine.channels.get_or_create(name))
    }

    fn engine(&self) -> Result<Rc<Shared>, WrapperError> {
        self.engine.upgrade().ok_or(WrapperError::Detached)
    }

    fn spawner(&self) -> Option<Rc<dyn Spawner>> {
        self.engine.upgrade().and_then(|engine| engine.spawner())
    }

    fn mode_for(&self, event: &str) -> Mode {
        if self.is_default() && is_reserved(event) { Mode::Signal } else { Mode::Wire }
    }

    fn register(&self, event: &str, listener: Listener, once: bool) {
        let mode = self.mode_for(event);
        self.listeners.borrow_mut().add(event, listener, once, mode);
    }

    pub(crate) fn has_wire_listeners(&self, event: &str) -> bool {
        self.listeners.borrow().has_listeners(event, Mode::Wire)
    }

    /// Run wire listeners for an inbound emit or request.
    ///
    /// The first listener's result answers the request; later listeners still
    /// run but are not replied. Returns whether any listener ran. Stops at
    /// the first failing listener.
    pub(crate) fn dispatch_wire(
        &self,
        event: &str,
        args: &[Value],
        request_id: Option<RequestId>,
        responder: &Weak<dyn Responder>,
    ) -> Result<bool, WrapperError> {
        let spawner = self.spawner();
        let entries = self.listeners.borrow().snapshot(event, Mode::Wire);
        let mut reply_to = request_id;
        let mut ran = false;
        for entry in entries {
            if entry.once {
                if entry.fired.replace(true) {
                    continue;
                }
                self.listeners.borrow_mut().remove_entry(event, &entry);
            }
            if ran && request_id.is_some() {
                debug!(event, channel = self.name(), "channel: extra listener result not replied");
            }
            ran = true;
            entry.wrapped.invoke_wire(event, args, reply_to.take(), responder, spawner.as_deref())?;
        }
        Ok(ran)
    }

    /// Run signal listeners for a lifecycle name.
    pub(crate) fn dispatch_signal(&self, event: &str, args: &[Value]) -> Result<(), WrapperError> {
        let spawner = self.spawner();
        let entries = self.listeners.borrow().snapshot(event, Mode::Signal);
        for entry in entries {
            if entry.once {
                if entry.fired.replace(true) {
                    continue;
                }
                self.listeners.borrow_mut().remove_entry(event, &entry);
            }
            entry.wrapped.invoke_signal(event, args, spawner.as_deref())?;
        }
        Ok(())
    }
}

impl EventHandler for Channel {
    fn on(&self, event: &str, listener: Listener) -> &Self {
        self.register(event, listener, false);
        self
    }

    fn once(&self, event: &str, listener: Listener) -> &Self {
        self.register(event, listener, true);
        self
    }

    fn remove_listener(&self, event: &str, listener: Option<&Listener>) -> &Self {
        self.listeners.borrow_mut().remove(event, listener);
        self
    }

    fn remove_all_listeners(&self, event: Option<&str>) -> &Self {
        self.listeners.borrow_mut().remove_all(event);
        self
    }

    fn event_names(&self) -> Vec<String> {
        self.listeners.borrow().event_names()
    }

    fn listeners(&self, event: &str) -> Vec<Listener> {
        self.listeners.borrow().listeners(event)
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), WrapperError> {
        if self.mode_for(event) == Mode::Signal {
            return self.dispatch_signal(event, &args);
        }
        self.engine()?.emit_event(self.name(), event, args)
    }

    fn timeout(&self, timeout: Duration) -> &Self {
        self.next_timeout.set(Some(timeout));
        self
    }

    fn request(&self, event: &str, args: Vec<Value>) -> Result<ResponseFuture, WrapperError> {
        let override_timeout = self.next_timeout.take();
        let engine = self.engine()?;
        let timeout = override_timeout.or(engine.options.request_timeout);
        engine.send_request(self.name(), event, args, timeout)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("name", &self.name).field("events", &self.event_names()).finish()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Channels of one wrapper, by name.
pub(crate) struct ChannelRegistry {
    default: Rc<Channel>,
    named: RefCell<HashMap<String, Rc<Channel>>>,
    engine: Weak<Shared>,
}

impl ChannelRegistry {
    pub(crate) fn new(engine: Weak<Shared>) -> Self {
        Self {
            default: Rc::new(Channel::new(None, engine.clone())),
            named: RefCell::new(HashMap::new()),
            engine,
        }
    }

    pub(crate) fn default_channel(&self) -> &Rc<Channel> {
        &self.default
    }

    /// Idempotent; an empty name maps to the default channel.
    pub(crate) fn get_or_create(&self, name: &str) -> Rc<Channel> {
        if name.is_empty() {
            return self.default.clone();
        }
        self.named
            .borrow_mut()
            .entry(name.to_owned())
            .or_insert_with(|| Rc::new(Channel::new(Some(name.to_owned()), self.engine.clone())))
            .clone()
    }

    /// Existing channel for an inbound frame; `None` if never created.
    pub(crate) fn get(&self, name: Option<&str>) -> Option<Rc<Channel>> {
        match name {
            None => Some(self.default.clone()),
            Some(name) => self.named.borrow().get(name).cloned(),
        }
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
