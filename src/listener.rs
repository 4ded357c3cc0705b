//! Listener callables and the wrapping that turns their results into replies.
//!
//! DESIGN
//! ======
//! A `Listener` is a shared callable compared by pointer identity, so the
//! handle used to register can also be used to remove. When registered it is
//! wrapped once per mode:
//!
//! - `Mode::Wire`: for inbound emits and requests. The return value answers
//!   a request (resolve), a returned `Rejection` rejects it and is re-raised
//!   locally, and a `Reply::Deferred` future answers when it settles.
//! - `Mode::Signal`: for the lifecycle names on the default channel. The
//!   return value is ignored.
//!
//! The wrapper for a given listener is cached so registering the same
//! listener again, or under another event, reuses it.
//!
//! Deferred futures run on a `Spawner` set on the wrapper. Without one a
//! deferred reply is refused with `WrapperError::NoSpawner`; a pending
//! request is rejected first.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use frames::{Rejection, RequestId};
use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::WrapperError;

/// What a listener returns.
pub type ListenerResult = Result<Reply, Rejection>;

/// Successful listener outcome.
pub enum Reply {
    /// Answer now. `None` resolves without a payload.
    Immediate(Option<Value>),
    /// Answer when the future settles.
    Deferred(LocalBoxFuture<'static, Result<Option<Value>, Rejection>>),
}

impl Reply {
    #[must_use]
    pub fn empty() -> Self {
        Self::Immediate(None)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Immediate(Some(value.into()))
    }

    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Option<Value>, Rejection>> + 'static,
    {
        Self::Deferred(Box::pin(fut))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Immediate(Some(value))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Runs `Reply::Deferred` futures to completion.
pub trait Spawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Spawns onto the enclosing tokio `LocalSet`. Only use it where every
/// inbound frame is handled inside one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSetSpawner;

impl Spawner for LocalSetSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

/// A registered event callback. Clones share identity.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&[Value]) -> ListenerResult>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> ListenerResult + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> ListenerResult {
        (self.0)(args)
    }

    fn key(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:#x})", self.key())
    }
}

// =============================================================================
// WRAPPING
// =============================================================================

/// Sends replies to inbound requests.
pub(crate) trait Responder {
    fn resolve(&self, id: RequestId, data: Option<Value>);
    fn reject(&self, id: RequestId, rejection: Rejection);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Mode {
    Wire,
    Signal,
}

pub(crate) struct WrappedListener {
    original: Listener,
    mode: Mode,
}

impl WrappedListener {
    /// Run for an inbound emit or request. `reply_to` is set only for the
    /// listener whose result answers the request.
    pub(crate) fn invoke_wire(
        &self,
        event: &str,
        args: &[Value],
        reply_to: Option<RequestId>,
        responder: &Weak<dyn Responder>,
        spawner: Option<&dyn Spawner>,
    ) -> Result<(), WrapperError> {
        match self.original.call(args) {
            Ok(Reply::Immediate(data)) => {
                if let (Some(id), Some(responder)) = (reply_to, responder.upgrade()) {
                    responder.resolve(id, data);
                }
                Ok(())
            }
            Ok(Reply::Deferred(fut)) => {
                let Some(spawner) = spawner else {
                    let err = WrapperError::NoSpawner { event: event.to_owned() };
                    if let (Some(id), Some(responder)) = (reply_to, responder.upgrade()) {
                        responder.reject(id, Rejection::error(err.to_string()));
                    }
                    return Err(err);
                };
                let responder = responder.clone();
                let event = event.to_owned();
                spawner.spawn(Box::pin(async move {
                    let outcome = fut.await;
                    let Some(id) = reply_to else {
                        if let Err(rejection) = outcome {
                            debug!(event, %rejection, "listener: deferred emit handler failed");
                        }
                        return;
                    };
                    let Some(responder) = responder.upgrade() else {
                        debug!(event, id, "listener: wrapper dropped before deferred reply");
                        return;
                    };
                    match outcome {
                        Ok(data) => responder.resolve(id, data),
                        Err(rejection) => responder.reject(id, rejection),
                    }
                }));
                Ok(())
            }
            Err(rejection) => {
                if let (Some(id), Some(responder)) = (reply_to, responder.upgrade()) {
                    responder.reject(id, rejection.clone());
                }
                Err(WrapperError::Listener { event: event.to_owned(), rejection })
            }
        }
    }

    /// Run for a local lifecycle signal. The reply is ignored.
    pub(crate) fn invoke_signal(
        &self,
        event: &str,
        args: &[Value],
        spawner: Option<&dyn Spawner>,
    ) -> Result<(), WrapperError> {
        match self.original.call(args) {
            Ok(Reply::Immediate(_)) => Ok(()),
            Ok(Reply::Deferred(fut)) => {
                let spawner = spawner.ok_or_else(|| WrapperError::NoSpawner { event: event.to_owned() })?;
                spawner.spawn(Box::pin(async move {
                    let _ = fut.await;
                }));
                Ok(())
            }
            Err(rejection) => Err(WrapperError::Listener { event: event.to_owned(), rejection }),
        }
    }
}

// =============================================================================
// TABLE
// =============================================================================

pub(crate) struct Entry {
    pub(crate) wrapped: Rc<WrappedListener>,
    pub(crate) once: bool,
    /// Set before a once-entry is invoked, so re-entrant dispatch skips it.
    pub(crate) fired: Cell<bool>,
}

/// Listeners of one channel, by event name, in registration order.
#[derive(Default)]
pub(crate) struct ListenerTable {
    events: HashMap<String, Vec<Rc<Entry>>>,
    wrappers: HashMap<(usize, Mode), Rc<WrappedListener>>,
}

impl ListenerTable {
    pub(crate) fn add(&mut self, event: &str, listener: Listener, once: bool, mode: Mode) {
        let wrapped = self
            .wrappers
            .entry((listener.key(), mode))
            .or_insert_with(|| Rc::new(WrappedListener { original: listener, mode }))
            .clone();
        let entry = Rc::new(Entry { wrapped, once, fired: Cell::new(false) });
        self.events.entry(event.to_owned()).or_default().push(entry);
    }

    /// Remove every registration of `listener` under `event`, or every
    /// registration under `event` when `listener` is `None`.
    pub(crate) fn remove(&mut self, event: &str, listener: Option<&Listener>) {
        let Some(entries) = self.events.get_mut(event) else {
            return;
        };
        match listener {
            Some(listener) => entries.retain(|e| e.wrapped.original != *listener),
            None => entries.clear(),
        }
        if entries.is_empty() {
            self.events.remove(event);
        }
        self.prune_wrappers();
    }

    /// Remove one specific entry, e.g. a once-entry after it fired.
    pub(crate) fn remove_entry(&mut self, event: &str, entry: &Rc<Entry>) {
        let Some(entries) = self.events.get_mut(event) else {
            return;
        };
        entries.retain(|e| !Rc::ptr_eq(e, entry));
        if entries.is_empty() {
            self.events.remove(event);
        }
        self.prune_wrappers();
    }

    pub(crate) fn remove_all(&mut self, event: Option<&str>) {
        match event {
            Some(event) => self.remove(event, None),
            None => {
                self.events.clear();
                self.wrappers.clear();
            }
        }
    }

    /// Event names with at least one listener, sorted.
    pub(crate) fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn listeners(&self, event: &str) -> Vec<Listener> {
        self.events
            .get(event)
            .map(|entries| entries.iter().map(|e| e.wrapped.original.clone()).collect())
            .unwrap_or_default()
    }

    /// Entries of `mode` registered under `event`, in order.
    pub(crate) fn snapshot(&self, event: &str, mode: Mode) -> Vec<Rc<Entry>> {
        self.events
            .get(event)
            .map(|entries| entries.iter().filter(|e| e.wrapped.mode == mode).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_listeners(&self, event: &str, mode: Mode) -> bool {
        self.events.get(event).is_some_and(|entries| entries.iter().any(|e| e.wrapped.mode == mode))
    }

    #[cfg(test)]
    pub(crate) fn cached_wrappers(&self) -> usize {
        self.wrappers.len()
    }

    fn prune_wrappers(&mut self) {
        let events = &self.events;
        self.wrappers.retain(|_, wrapped| {
            events.values().flatten().any(|e| Rc::ptr_eq(&e.wrapped, wrapped))
        });
    }
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod tests;
