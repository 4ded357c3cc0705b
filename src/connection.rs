//! Connection adapter: the boundary with the raw socket.
//!
//! DESIGN
//! ======
//! A `Socket` is anything with a ready state, a `send(text)` primitive, a
//! close primitive, and a slot for lifecycle callbacks. `bind` hands the
//! socket a `SocketEvents` handle; the socket calls it on open, message,
//! error and close. Each bind bumps a generation counter so callbacks from a
//! replaced socket are ignored.
//!
//! While the socket is not open, outbound text is queued (FIFO, bounded).
//! Protocol responses bypass the bound: a peer already waiting on a reply
//! must not be left hanging because of local backpressure.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{TransportError, WrapperError};

/// Socket ready state, mirroring the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Close code and reason, passed to the close primitive and reported by the
/// `close`/`disconnect` signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    /// Normal closure (1000).
    #[must_use]
    pub fn normal() -> Self {
        Self { code: 1000, reason: String::new() }
    }

    /// Abnormal closure (1006): the connection dropped without a close frame.
    #[must_use]
    pub fn abnormal() -> Self {
        Self { code: 1006, reason: String::new() }
    }
}

/// A raw bidirectional text socket.
pub trait Socket {
    fn ready_state(&self) -> ReadyState;

    /// Transmit one text frame.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Begin closing the socket.
    fn close(&self, frame: Option<CloseFrame>);

    /// Store the lifecycle callbacks. Replaces any previous handle.
    fn attach(&self, events: SocketEvents);
}

// =============================================================================
// LIFECYCLE CALLBACKS
// =============================================================================

/// Receiver of socket lifecycle callbacks, implemented by the wrapper.
pub(crate) trait Lifecycle {
    fn on_open(&self, generation: u64) -> Result<(), WrapperError>;
    fn on_message(&self, generation: u64, text: &str) -> Result<(), WrapperError>;
    fn on_error(&self, generation: u64, description: &str) -> Result<(), WrapperError>;
    fn on_close(&self, generation: u64, frame: CloseFrame) -> Result<(), WrapperError>;
}

/// Lifecycle callback handle given to a socket by `bind`.
///
/// Every method returns the failure of a local listener, if any, so the
/// embedding transport can surface it. Calls after the wrapper is dropped
/// are no-ops.
#[derive(Clone)]
pub struct SocketEvents {
    sink: Weak<dyn Lifecycle>,
    generation: u64,
}

impl SocketEvents {
    pub(crate) fn new(sink: Weak<dyn Lifecycle>, generation: u64) -> Self {
        Self { sink, generation }
    }

    pub fn open(&self) -> Result<(), WrapperError> {
        self.sink.upgrade().map_or(Ok(()), |sink| sink.on_open(self.generation))
    }

    pub fn message(&self, text: &str) -> Result<(), WrapperError> {
        self.sink.upgrade().map_or(Ok(()), |sink| sink.on_message(self.generation, text))
    }

    pub fn error(&self, description: &str) -> Result<(), WrapperError> {
        self.sink.upgrade().map_or(Ok(()), |sink| sink.on_error(self.generation, description))
    }

    pub fn close(&self, frame: CloseFrame) -> Result<(), WrapperError> {
        self.sink.upgrade().map_or(Ok(()), |sink| sink.on_close(self.generation, frame))
    }
}

impl std::fmt::Debug for SocketEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketEvents").field("generation", &self.generation).finish_non_exhaustive()
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Socket binding plus the outbound queue.
pub struct Connection {
    socket: RefCell<Option<Rc<dyn Socket>>>,
    queue: RefCell<VecDeque<String>>,
    max_queue: usize,
    /// Set once the current socket reports open; cleared on close.
    opened: Cell<bool>,
    generation: Cell<u64>,
}

impl Connection {
    #[must_use]
    pub fn new(max_queue: usize) -> Self {
        Self {
            socket: RefCell::new(None),
            queue: RefCell::new(VecDeque::new()),
            max_queue,
            opened: Cell::new(false),
            generation: Cell::new(0),
        }
    }

    /// Replace the active socket and return the new generation.
    ///
    /// The queue is kept: anything buffered for the old socket goes out on
    /// the new one once it opens.
    pub fn bind(&self, socket: Rc<dyn Socket>) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.opened.set(false);
        *self.socket.borrow_mut() = Some(socket);
        generation
    }

    /// Whether `generation` belongs to the currently bound socket.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }

    fn socket(&self) -> Option<Rc<dyn Socket>> {
        self.socket.borrow().clone()
    }

    #[must_use]
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.socket().map(|s| s.ready_state())
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.ready_state() == Some(ReadyState::Connecting)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ready_state() == Some(ReadyState::Open)
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn clear_queue(&self) {
        self.queue.borrow_mut().clear();
    }

    /// Send now if open and nothing is waiting, else queue behind the
    /// backlog. Fails with `QueueFull` when the queue is at capacity, unless
    /// `ignore_queue_limit` is set.
    pub fn send(&self, payload: String, ignore_queue_limit: bool) -> Result<(), WrapperError> {
        let open = self.socket().filter(|s| s.ready_state() == ReadyState::Open);
        if let Some(socket) = &open {
            if self.queue.borrow().is_empty() {
                debug!(len = payload.len(), "connection: sending");
                socket.send(&payload)?;
                return Ok(());
            }
        }

        {
            let mut queue = self.queue.borrow_mut();
            if !ignore_queue_limit && queue.len() >= self.max_queue {
                return Err(WrapperError::QueueFull);
            }
            debug!(queued = queue.len() + 1, "connection: queuing message");
            queue.push_back(payload);
        }

        if open.is_some() {
            if let Err(e) = self.flush() {
                warn!(error = %e, queued = self.queued(), "connection: backlog flush interrupted");
            }
        }
        Ok(())
    }

    /// Send queued messages in order while the socket stays open.
    ///
    /// Returns the number sent. A message the socket refuses goes back to the
    /// front of the queue.
    pub fn flush(&self) -> Result<usize, TransportError> {
        let mut sent = 0;
        while let Some(socket) = self.socket().filter(|s| s.ready_state() == ReadyState::Open) {
            let Some(next) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            debug!(len = next.len(), "connection: sending queued message");
            if let Err(e) = socket.send(&next) {
                self.queue.borrow_mut().push_front(next);
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }

    pub fn mark_open(&self) {
        self.opened.set(true);
    }

    /// Record a close; returns whether the connection had been open.
    pub fn mark_closed(&self) -> bool {
        self.opened.replace(false)
    }

    /// Forward to the socket's close primitive.
    pub fn disconnect(&self, frame: Option<CloseFrame>) {
        if let Some(socket) = self.socket() {
            socket.close(frame);
        }
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
