//! Request correlator: pending outbound requests keyed by id.
//!
//! Ids start at 1 and increase by one per request for the life of the
//! wrapper. Each pending entry owns the sending half of a oneshot. A request
//! with a timeout carries its deadline in its `ResponseFuture`; the deadline
//! is armed on the first poll inside a tokio runtime, so no task is spawned.
//! Whichever of resolve, reject, timeout or abort runs first removes the
//! entry; the others find nothing and are no-ops.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use frames::{Rejection, RequestId};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};
use tracing::debug;

use crate::error::RequestError;

/// What a request settles with. `Ok(None)` is a resolve without payload.
pub type RequestOutcome = Result<Option<Value>, RequestError>;

#[derive(Default)]
struct CorrelatorState {
    pending: HashMap<RequestId, oneshot::Sender<RequestOutcome>>,
    last_id: RequestId,
}

#[derive(Clone, Default)]
pub struct Correlator {
    state: Rc<RefCell<CorrelatorState>>,
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and a future for its outcome.
    ///
    /// A non-zero `timeout` counts from now; the future settles with
    /// `TimedOut` once it passes and removes the entry.
    pub fn register(&self, timeout: Option<Duration>) -> (RequestId, ResponseFuture) {
        let (reply, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.borrow_mut();
            state.last_id += 1;
            let id = state.last_id;
            state.pending.insert(id, reply);
            id
        };

        let deadline = timeout.filter(|t| !t.is_zero()).map(|t| Instant::now() + t);
        let response = ResponseFuture { id, rx, deadline, timer: None, correlator: Rc::downgrade(&self.state) };
        (id, response)
    }

    /// Settle `id` with a resolve. Returns false for unknown ids.
    pub fn resolve(&self, id: RequestId, data: Option<Value>) -> bool {
        self.settle(id, Ok(data))
    }

    /// Settle `id` with a remote rejection. Returns false for unknown ids.
    pub fn reject(&self, id: RequestId, rejection: Rejection) -> bool {
        self.settle(id, Err(RequestError::Rejected(rejection)))
    }

    /// Drop `id` without settling it, e.g. when its frame could not be sent
    /// and the caller already got the send error.
    pub fn discard(&self, id: RequestId) {
        self.state.borrow_mut().pending.remove(&id);
    }

    /// Reject every pending request with `Aborted`. Returns how many there were.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<_> = self.state.borrow_mut().pending.drain().collect();
        let count = drained.len();
        for (_, reply) in drained {
            let _ = reply.send(Err(RequestError::Aborted));
        }
        if count > 0 {
            debug!(count, "correlator: aborted pending requests");
        }
        count
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.state.borrow().pending.contains_key(&id)
    }

    fn settle(&self, id: RequestId, outcome: RequestOutcome) -> bool {
        let reply = self.state.borrow_mut().pending.remove(&id);
        let Some(reply) = reply else {
            debug!(id, "correlator: no pending request for id");
            return false;
        };
        // A dropped receiver means the caller stopped waiting.
        let _ = reply.send(outcome);
        true
    }
}

/// Future for the outcome of one outbound request.
///
/// The timeout only runs while the future is polled. A dropped future leaves
/// its entry pending until the request is answered or aborted.
#[derive(Debug)]
pub struct ResponseFuture {
    id: RequestId,
    rx: oneshot::Receiver<RequestOutcome>,
    deadline: Option<Instant>,
    timer: Option<Pin<Box<Sleep>>>,
    correlator: Weak<RefCell<CorrelatorState>>,
}

impl ResponseFuture {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    fn expire(&self) -> RequestOutcome {
        if let Some(state) = self.correlator.upgrade() {
            if state.borrow_mut().pending.remove(&self.id).is_some() {
                debug!(id = self.id, "correlator: request timed out");
            }
        }
        Err(RequestError::TimedOut)
    }
}

impl Future for ResponseFuture {
    type Output = RequestOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(received) = Pin::new(&mut this.rx).poll(cx) {
            // No value: the request was discarded or the wrapper dropped.
            return Poll::Ready(received.unwrap_or(Err(RequestError::Aborted)));
        }

        let Some(deadline) = this.deadline else {
            return Poll::Pending;
        };
        if this.timer.is_none() {
            // Without a runtime there is no clock to arm; keep waiting.
            if tokio::runtime::Handle::try_current().is_err() {
                return Poll::Pending;
            }
            this.timer = Some(Box::pin(tokio::time::sleep_until(deadline)));
        }
        if let Some(timer) = this.timer.as_mut() {
            ready!(timer.as_mut().poll(cx));
        }
        Poll::Ready(this.expire())
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
