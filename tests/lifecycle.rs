//! Tests for opening, invalidating and tracking connections.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use rstest::rstest;
use wirelink::{
    Connection,
    ConnectionConfig,
    MemoryTransport,
    OpenError,
    ReceiveCallback,
    SendOptions,
    Transport,
    WorkQueue,
};
use wirelink_testing::{ConnectedPair, RecordingSink, SinkEvent, pair, wait_until};

mod common;
use common::{ECHO, SETTLE, TestResult, message};

#[rstest]
fn second_open_is_rejected(pair: ConnectedPair) -> TestResult {
    let sink = RecordingSink::new();
    let result = pair.client.open(&sink, WorkQueue::new("wirelink.test.reopen")?);
    assert!(matches!(result, Err(OpenError::AlreadyOpen)));
    Ok(())
}

#[test]
fn invalidated_connection_cannot_be_opened() -> TestResult {
    let (end, _peer) = MemoryTransport::pair();
    let connection = Connection::new(end, ConnectionConfig::default())?;
    connection.invalidate();
    let sink = RecordingSink::new();
    let result = connection.open(&sink, WorkQueue::new("wirelink.test.closed")?);
    assert!(matches!(result, Err(OpenError::AlreadyOpen)));
    Ok(())
}

struct RefusingTransport;

impl Transport for RefusingTransport {
    fn open(&self, _on_receive: ReceiveCallback) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no peer"))
    }

    fn send_bytes(&self, _bytes: Bytes) -> bool { false }

    fn invalidate(&self) {}
}

#[test]
fn transport_failure_leaves_connection_unopened() -> TestResult {
    let connection = Connection::new(RefusingTransport, ConnectionConfig::default())?;
    let sink = RecordingSink::new();
    let result = connection.open(&sink, WorkQueue::new("wirelink.test.refused")?);

    assert!(matches!(result, Err(OpenError::Transport(_))));
    assert!(!connection.is_valid());
    assert!(connection.dispatcher().is_none());
    Ok(())
}

#[rstest]
fn invalidate_is_idempotent_and_closes_both_ends(pair: ConnectedPair) {
    pair.client.invalidate();
    pair.client.invalidate();

    assert!(!pair.client.is_valid());
    assert!(wait_until(SETTLE, || pair.client_sink.close_count() == 1));
    assert!(wait_until(SETTLE, || pair.server_sink.close_count() == 1));
    assert!(!pair.server.is_valid());

    pair.server.invalidate();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(pair.client_sink.close_count(), 1);
    assert_eq!(pair.server_sink.close_count(), 1);
}

#[rstest]
fn pending_async_reply_is_cancelled_once(pair: ConnectedPair) -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    pair.client.send_with_async_reply(message(ECHO, b""), SendOptions::default(), move |reply| {
        assert!(reply.is_none());
        counted.fetch_add(1, Ordering::SeqCst);
    })?;

    pair.client.invalidate();
    pair.client.invalidate();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pair.client.pending_async_reply_count(), 0);
    Ok(())
}

#[rstest]
fn registry_tracks_live_connections(pair: ConnectedPair) {
    let id = pair.client.id();
    assert_eq!(Connection::lookup(id), Some(pair.client.clone()));
    assert!(Connection::registry().active_ids().contains(&id));

    drop(pair);
    assert!(wait_until(SETTLE, || Connection::lookup(id).is_none()));
    assert!(!Connection::registry().active_ids().contains(&id));
}

#[rstest]
fn close_is_the_last_event(pair: ConnectedPair) -> TestResult {
    pair.server.send(message(ECHO, b""), SendOptions::default())?;
    assert!(pair.client_sink.wait_for_events(1, SETTLE));
    pair.client.invalidate();
    assert!(wait_until(SETTLE, || pair.client_sink.close_count() == 1));
    assert_eq!(pair.client_sink.events().last(), Some(&SinkEvent::Closed));
    Ok(())
}
