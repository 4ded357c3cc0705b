//! In-memory socket for tests.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use frames::{Message, decode_message};

use crate::connection::{CloseFrame, ReadyState, Socket, SocketEvents};
use crate::error::{TransportError, WrapperError};

/// Records outbound frames; optionally forwards them to a peer socket.
pub struct MemorySocket {
    state: Cell<ReadyState>,
    sent: RefCell<Vec<String>>,
    events: RefCell<Option<SocketEvents>>,
    closed_with: RefCell<Option<Option<CloseFrame>>>,
    peer: RefCell<Weak<MemorySocket>>,
    fail_sends: Cell<bool>,
}

impl MemorySocket {
    pub fn new(state: ReadyState) -> Rc<Self> {
        Rc::new(Self {
            state: Cell::new(state),
            sent: RefCell::new(Vec::new()),
            events: RefCell::new(None),
            closed_with: RefCell::new(None),
            peer: RefCell::new(Weak::new()),
            fail_sends: Cell::new(false),
        })
    }

    /// Two open sockets wired back to back: a send on one is delivered
    /// synchronously as a message on the other.
    pub fn pair() -> (Rc<Self>, Rc<Self>) {
        let a = Self::new(ReadyState::Open);
        let b = Self::new(ReadyState::Open);
        *a.peer.borrow_mut() = Rc::downgrade(&b);
        *b.peer.borrow_mut() = Rc::downgrade(&a);
        (a, b)
    }

    fn events(&self) -> Option<SocketEvents> {
        self.events.borrow().clone()
    }

    pub fn set_state(&self, state: ReadyState) {
        self.state.set(state);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.set(fail);
    }

    /// Transition to open and fire the open callback.
    pub fn open(&self) -> Result<(), WrapperError> {
        self.state.set(ReadyState::Open);
        self.events().map_or(Ok(()), |e| e.open())
    }

    /// Fire the message callback as if `text` arrived from the peer.
    pub fn deliver(&self, text: &str) -> Result<(), WrapperError> {
        self.events().map_or(Ok(()), |e| e.message(text))
    }

    pub fn fire_error(&self, description: &str) -> Result<(), WrapperError> {
        self.events().map_or(Ok(()), |e| e.error(description))
    }

    /// Transition to closed and fire the close callback.
    pub fn fire_close(&self, code: u16, reason: &str) -> Result<(), WrapperError> {
        self.state.set(ReadyState::Closed);
        self.events().map_or(Ok(()), |e| e.close(CloseFrame { code, reason: reason.to_owned() }))
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.borrow().iter().map(|text| decode_message(text).unwrap()).collect()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.sent_messages().pop()
    }

    /// `Some(frame)` once `close` was called on the socket.
    pub fn closed_with(&self) -> Option<Option<CloseFrame>> {
        self.closed_with.borrow().clone()
    }
}

impl Socket for MemorySocket {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.fail_sends.get() || self.state.get() != ReadyState::Open {
            return Err(TransportError::Closed);
        }
        self.sent.borrow_mut().push(text.to_owned());
        let peer = self.peer.borrow().upgrade();
        if let Some(peer) = peer {
            // Listener failures belong to the receiving side's embedding.
            let _ = peer.deliver(text);
        }
        Ok(())
    }

    fn close(&self, frame: Option<CloseFrame>) {
        *self.closed_with.borrow_mut() = Some(frame.clone());
        self.state.set(ReadyState::Closed);
        if let Some(events) = self.events() {
            let _ = events.close(frame.unwrap_or_else(CloseFrame::normal));
        }
    }

    fn attach(&self, events: SocketEvents) {
        *self.events.borrow_mut() = Some(events);
    }
}
