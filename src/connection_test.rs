use super::*;
use crate::test_helpers::MemorySocket;

fn bound(state: ReadyState, max_queue: usize) -> (Connection, Rc<MemorySocket>) {
    let conn = Connection::new(max_queue);
    let socket = MemorySocket::new(state);
    conn.bind(socket.clone());
    (conn, socket)
}

#[test]
fn sends_immediately_when_open() {
    let (conn, socket) = bound(ReadyState::Open, 10);
    conn.send("a".into(), false).unwrap();
    assert_eq!(socket.sent(), vec!["a"]);
    assert_eq!(conn.queued(), 0);
}

#[test]
fn queue_rejects_past_limit_unless_ignored() {
    let (conn, socket) = bound(ReadyState::Connecting, 10);
    for i in 0..10 {
        conn.send(format!("m{i}"), false).unwrap();
    }
    let err = conn.send("m10".into(), false).unwrap_err();
    assert!(matches!(err, WrapperError::QueueFull));
    assert_eq!(conn.queued(), 10);

    conn.send("reply".into(), true).unwrap();
    assert_eq!(conn.queued(), 11);
    assert!(socket.sent().is_empty());
}

#[test]
fn flush_sends_in_fifo_order() {
    let (conn, socket) = bound(ReadyState::Connecting, 10);
    for text in ["one", "two", "three"] {
        conn.send(text.into(), false).unwrap();
    }
    socket.set_state(ReadyState::Open);
    assert_eq!(conn.flush().unwrap(), 3);
    assert_eq!(socket.sent(), vec!["one", "two", "three"]);
    assert_eq!(conn.queued(), 0);
}

#[test]
fn flush_requeues_refused_message() {
    let (conn, socket) = bound(ReadyState::Connecting, 10);
    conn.send("first".into(), false).unwrap();
    conn.send("second".into(), false).unwrap();
    socket.set_state(ReadyState::Open);
    socket.fail_sends(true);

    assert!(conn.flush().is_err());
    assert_eq!(conn.queued(), 2);

    socket.fail_sends(false);
    conn.flush().unwrap();
    assert_eq!(socket.sent(), vec!["first", "second"]);
}

#[test]
fn send_while_backlogged_keeps_fifo_order() {
    let (conn, socket) = bound(ReadyState::Connecting, 10);
    conn.send("first".into(), false).unwrap();
    socket.set_state(ReadyState::Open);
    socket.fail_sends(true);
    assert!(conn.flush().is_err());

    // Still refused: the new message waits behind the backlog.
    conn.send("second".into(), false).unwrap();
    assert_eq!(conn.queued(), 2);
    assert!(socket.sent().is_empty());

    socket.fail_sends(false);
    conn.send("third".into(), false).unwrap();
    assert_eq!(socket.sent(), vec!["first", "second", "third"]);
    assert_eq!(conn.queued(), 0);
}

#[test]
fn flush_is_noop_while_not_open() {
    let (conn, _socket) = bound(ReadyState::Closed, 10);
    conn.send("x".into(), false).unwrap();
    assert_eq!(conn.flush().unwrap(), 0);
    assert_eq!(conn.queued(), 1);
}

#[test]
fn unbound_connection_queues() {
    let conn = Connection::new(2);
    assert_eq!(conn.ready_state(), None);
    assert!(!conn.is_connected());
    assert!(!conn.is_connecting());
    conn.send("x".into(), false).unwrap();
    conn.send("y".into(), false).unwrap();
    assert!(conn.send("z".into(), false).is_err());
    conn.clear_queue();
    assert_eq!(conn.queued(), 0);
}

#[test]
fn rebinding_bumps_generation_and_keeps_queue() {
    let (conn, _old) = bound(ReadyState::Connecting, 10);
    conn.send("pending".into(), false).unwrap();
    assert!(conn.is_current(1));

    let fresh = MemorySocket::new(ReadyState::Open);
    assert_eq!(conn.bind(fresh.clone()), 2);
    assert!(!conn.is_current(1));
    conn.flush().unwrap();
    assert_eq!(fresh.sent(), vec!["pending"]);
}

#[test]
fn open_flag_tracks_lifecycle() {
    let (conn, _socket) = bound(ReadyState::Open, 10);
    assert!(!conn.mark_closed());
    conn.mark_open();
    assert!(conn.mark_closed());
    assert!(!conn.mark_closed());
}

#[test]
fn disconnect_forwards_close_frame() {
    let (conn, socket) = bound(ReadyState::Open, 10);
    conn.disconnect(Some(CloseFrame { code: 4000, reason: "bye".into() }));
    assert_eq!(socket.closed_with(), Some(Some(CloseFrame { code: 4000, reason: "bye".into() })));
    assert_eq!(conn.ready_state(), Some(ReadyState::Closed));
}
