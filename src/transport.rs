//! tokio-tungstenite transport: a `Socket` over a real WebSocket stream.
//!
//! DESIGN
//! ======
//! `WsSocket` is a thin handle: a ready-state cell, an outbound mpsc sender,
//! and the callback slot. The stream itself is owned by a driver task spawned
//! with `spawn_local`, which `select!`s between:
//! - Incoming stream messages → `SocketEvents::message` / `close`
//! - Outbound text queued by `send` → write to the stream
//!
//! Listener failures surfaced by the callbacks are logged; they never tear
//! the connection down. Binary, ping and pong frames are ignored.
//!
//! Both constructors must be called inside a `LocalSet`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::connection::{CloseFrame, ReadyState, Socket, SocketEvents};
use crate::error::{TransportError, WrapperError};

type EventSlot = Rc<RefCell<Option<SocketEvents>>>;

pub struct WsSocket {
    state: Rc<Cell<ReadyState>>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    events: EventSlot,
}

impl WsSocket {
    fn handle(state: ReadyState) -> (Rc<Self>, mpsc::UnboundedReceiver<WsMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let socket = Self { state: Rc::new(Cell::new(state)), outbound, events: Rc::new(RefCell::new(None)) };
        (Rc::new(socket), rx)
    }

    /// Start connecting to `url` as a client. The socket reports
    /// `Connecting` until the handshake completes.
    pub fn connect(url: impl Into<String>) -> Rc<Self> {
        let (socket, rx) = Self::handle(ReadyState::Connecting);
        let state = socket.state.clone();
        let events = socket.events.clone();
        let url = url.into();

        tokio::task::spawn_local(async move {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!(%url, "transport: connected");
                    drive(stream, rx, state, events).await;
                }
                Err(e) => {
                    warn!(%url, error = %e, "transport: connect failed");
                    state.set(ReadyState::Closed);
                    fire(&events, |ev| ev.error(&e.to_string()));
                    fire(&events, |ev| ev.close(CloseFrame::abnormal()));
                }
            }
        });
        socket
    }

    /// Wrap a stream that already completed the server-side handshake.
    pub fn accept<S>(stream: WebSocketStream<S>) -> Rc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let (socket, rx) = Self::handle(ReadyState::Connecting);
        let state = socket.state.clone();
        let events = socket.events.clone();
        tokio::task::spawn_local(drive(stream, rx, state, events));
        socket
    }
}

impl Socket for WsSocket {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.state.get() != ReadyState::Open {
            return Err(TransportError::Closed);
        }
        self.outbound.send(WsMessage::text(text.to_owned())).map_err(|_| TransportError::Closed)
    }

    fn close(&self, frame: Option<CloseFrame>) {
        if matches!(self.state.get(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state.set(ReadyState::Closing);
        let frame = frame.map(|f| WsCloseFrame { code: CloseCode::from(f.code), reason: f.reason.into() });
        if self.outbound.send(WsMessage::Close(frame)).is_err() {
            debug!("transport: driver already gone");
        }
    }

    fn attach(&self, events: SocketEvents) {
        *self.events.borrow_mut() = Some(events);
    }
}

// =============================================================================
// DRIVER
// =============================================================================

async fn drive<S>(
    stream: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    state: Rc<Cell<ReadyState>>,
    events: EventSlot,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();
    state.set(ReadyState::Open);
    fire(&events, SocketEvents::open);

    let close = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => fire(&events, |ev| ev.message(text.as_str())),
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map_or_else(CloseFrame::normal, |f| CloseFrame {
                        code: f.code.into(),
                        reason: f.reason.to_string(),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    fire(&events, |ev| ev.error(&e.to_string()));
                    break CloseFrame::abnormal();
                }
                None => break CloseFrame::abnormal(),
            },
            queued = outbound.recv() => {
                let Some(message) = queued else {
                    break CloseFrame::normal();
                };
                if let Err(e) = write.send(message).await {
                    fire(&events, |ev| ev.error(&e.to_string()));
                    break CloseFrame::abnormal();
                }
            }
        }
    };

    // Flushes the close handshake reply, if any.
    let _ = write.close().await;
    state.set(ReadyState::Closed);
    debug!(code = close.code, reason = %close.reason, "transport: closed");
    fire(&events, |ev| ev.close(close));
}

fn fire(events: &RefCell<Option<SocketEvents>>, callback: impl FnOnce(&SocketEvents) -> Result<(), WrapperError>) {
    let handle = events.borrow().clone();
    if let Some(handle) = handle {
        if let Err(e) = callback(&handle) {
            error!(error = %e, "transport: listener failed");
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
