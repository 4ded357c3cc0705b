use std::time::Duration;

use futures::FutureExt;
use serde_json::json;

use super::*;

#[test]
fn ids_start_at_one_and_increase() {
    let correlator = Correlator::new();
    let ids: Vec<_> = (0..3).map(|_| correlator.register(None).0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(correlator.pending_count(), 3);
}

#[test]
fn resolve_settles_once() {
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(None);
    assert_eq!(fut.id(), id);

    assert!(correlator.resolve(id, Some(json!("welcome"))));
    assert!(!correlator.resolve(id, Some(json!("again"))));
    assert!(!correlator.reject(id, Rejection::error("late")));

    assert_eq!(fut.now_or_never(), Some(Ok(Some(json!("welcome")))));
    assert_eq!(correlator.pending_count(), 0);
}

#[test]
fn resolve_without_payload_is_none() {
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(None);
    correlator.resolve(id, None);
    assert_eq!(fut.now_or_never(), Some(Ok(None)));
}

#[test]
fn reject_carries_rejection() {
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(None);
    correlator.reject(id, Rejection::Value(json!("nope")));

    let err = fut.now_or_never().unwrap().unwrap_err();
    assert_eq!(err.rejection(), Some(&Rejection::Value(json!("nope"))));
}

#[test]
fn unknown_id_is_ignored() {
    let correlator = Correlator::new();
    assert!(!correlator.resolve(42, None));
    assert!(!correlator.reject(42, Rejection::Value(Value::Null)));
}

#[test]
fn abort_all_rejects_everything() {
    let correlator = Correlator::new();
    let (_, a) = correlator.register(None);
    let (_, b) = correlator.register(None);

    assert_eq!(correlator.abort_all(), 2);
    assert_eq!(correlator.pending_count(), 0);
    assert_eq!(a.now_or_never(), Some(Err(RequestError::Aborted)));
    assert_eq!(b.now_or_never(), Some(Err(RequestError::Aborted)));

    // Ids keep counting after an abort.
    assert_eq!(correlator.register(None).0, 3);
}

#[test]
fn discard_removes_without_settling() {
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(None);
    correlator.discard(id);
    assert!(!correlator.is_pending(id));
    // Sender dropped without a value.
    assert_eq!(fut.now_or_never(), Some(Err(RequestError::Aborted)));
}

#[tokio::test]
async fn timeout_rejects_pending_request() {
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(Some(Duration::from_millis(20)));

    assert_eq!(fut.await, Err(RequestError::TimedOut));
    assert!(!correlator.is_pending(id));
    // A late answer finds nothing.
    assert!(!correlator.resolve(id, None));
}

#[test]
fn timeout_runs_on_a_plain_current_thread_runtime() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(Some(Duration::from_millis(10)));

    assert_eq!(runtime.block_on(fut), Err(RequestError::TimedOut));
    assert!(!correlator.is_pending(id));
}

#[test]
fn deadline_waits_when_polled_outside_a_runtime() {
    let correlator = Correlator::new();
    let (id, mut fut) = correlator.register(Some(Duration::from_millis(1)));
    std::thread::sleep(Duration::from_millis(5));

    assert!((&mut fut).now_or_never().is_none());
    correlator.resolve(id, Some(json!("late")));
    assert_eq!(fut.now_or_never(), Some(Ok(Some(json!("late")))));
}

#[tokio::test]
async fn resolve_before_timeout_wins() {
    let correlator = Correlator::new();
    let (id, fut) = correlator.register(Some(Duration::from_millis(20)));
    correlator.resolve(id, Some(json!(1)));
    assert_eq!(fut.await, Ok(Some(json!(1))));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn abort_beats_a_running_deadline() {
    let correlator = Correlator::new();
    let (_, fut) = correlator.register(Some(Duration::from_secs(5)));
    let waiter = async { fut.await };
    let aborter = async {
        tokio::task::yield_now().await;
        correlator.abort_all()
    };

    let (outcome, aborted) = tokio::join!(waiter, aborter);
    assert_eq!(aborted, 1);
    assert_eq!(outcome, Err(RequestError::Aborted));
}

#[tokio::test]
async fn zero_timeout_waits_indefinitely() {
    let correlator = Correlator::new();
    let (id, mut fut) = correlator.register(Some(Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!((&mut fut).now_or_never().is_none());
    assert!(correlator.is_pending(id));
}
