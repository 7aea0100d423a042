//! Tests for messages dispatched while a sync call is blocked.

use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use rstest::rstest;
use wirelink::{
    Connection,
    ConnectionConfig,
    MessageName,
    SendOptions,
    SendSyncOptions,
    UnboundedSyncScope,
};
use wirelink_testing::{ConnectedPair, pair, run_on, wait_until};

mod common;
use common::{BlockedDispatcher, ECHO, PING, READY, SETTLE, TestResult, message};

fn flagged() -> SendOptions { SendOptions::default().dispatch_while_waiting_for_sync_reply(true) }

fn push_then_reply(pair: &ConnectedPair, options: SendOptions) {
    pair.server_sink.set_sync_hook(move |connection, request, reply| {
        let _ = connection.send(message(PING, b"plain"), SendOptions::default());
        let _ = connection.send(message(READY, b"urgent"), options);
        let _ = reply.send(request.payload().clone());
    });
}

#[rstest]
fn flagged_message_is_dispatched_before_sync_returns(pair: ConnectedPair) -> TestResult {
    push_then_reply(&pair, SendOptions::default().dispatch_while_waiting_for_sync_reply(true));

    let client = pair.client.clone();
    let sink = pair.client_sink.clone();
    let seen_on_return = run_on(&pair.client_queue, move || {
        client.send_sync(message(ECHO, b""), SETTLE).map(|_| sink.names())
    })?;

    assert_eq!(seen_on_return, vec![READY]);
    assert!(wait_until(SETTLE, || pair.client_sink.names().len() == 2));
    assert_eq!(pair.client_sink.names(), vec![READY, PING]);
    Ok(())
}

#[rstest]
fn unflagged_messages_wait_for_the_dispatcher(pair: ConnectedPair) -> TestResult {
    push_then_reply(&pair, SendOptions::default());

    let client = pair.client.clone();
    let sink = pair.client_sink.clone();
    let seen_on_return = run_on(&pair.client_queue, move || {
        client.send_sync(message(ECHO, b""), SETTLE).map(|_| sink.names())
    })?;

    assert!(seen_on_return.is_empty());
    assert!(wait_until(SETTLE, || pair.client_sink.names().len() == 2));
    assert_eq!(pair.client_sink.names(), vec![PING, READY]);
    Ok(())
}

#[rstest]
fn unbounded_flag_needs_an_active_scope(pair: ConnectedPair) -> TestResult {
    push_then_reply(&pair, SendOptions::default().dispatch_while_waiting_for_unbounded_sync(true));

    let client = pair.client.clone();
    let sink = pair.client_sink.clone();
    let seen_on_return = run_on(&pair.client_queue, move || {
        let _scope = UnboundedSyncScope::new();
        client
            .send_sync_with_options(
                message(ECHO, b""),
                SETTLE,
                SendSyncOptions::default().dispatch_while_waiting_for_unbounded_sync(true),
            )
            .map(|_| sink.names())
    })?;

    assert_eq!(seen_on_return, vec![READY]);
    Ok(())
}

#[rstest]
#[case::ordered(true, vec![PING, ECHO])]
#[case::unordered(false, vec![ECHO])]
fn ordering_flag_pulls_earlier_messages_forward(
    pair: ConnectedPair,
    #[case] maintain_ordering: bool,
    #[case] expected: Vec<MessageName>,
) -> TestResult {
    // While the server is blocked on READY, the client pushes PING and then
    // a sync ECHO that the server must serve from inside its wait.
    pair.client_sink.set_sync_hook(move |connection, request, reply| {
        let _ = connection.send(message(PING, b"earlier"), SendOptions::default());
        let options = SendSyncOptions::default().maintain_ordering_with_async(maintain_ordering);
        let _ = connection.send_sync_with_options(message(ECHO, b""), SETTLE, options);
        let _ = reply.send(request.payload().clone());
    });

    let server = pair.server.clone();
    let sink = pair.server_sink.clone();
    let seen_on_return = run_on(&pair.server_queue, move || {
        server.send_sync(message(READY, b""), SETTLE).map(|_| sink.names())
    })?;

    assert_eq!(seen_on_return, expected);
    assert!(wait_until(SETTLE, || pair.server_sink.names().len() == 2));
    Ok(())
}

#[rstest]
fn sibling_connection_is_served_while_dispatcher_waits(pair: ConnectedPair) -> TestResult {
    let sibling = ConnectedPair::sharing(&pair.client_queue, ConnectionConfig::default())?;
    let sibling_server = sibling.server.clone();
    let sibling_sink = sibling.client_sink.clone();
    pair.server_sink.set_sync_hook(move |_, request, reply| {
        let _ = sibling_server.send(message(PING, b"plain"), SendOptions::default());
        let _ = sibling_server.send(message(READY, b"urgent"), flagged());
        // Only the blocked caller on the shared dispatcher can deliver READY.
        wait_until(SETTLE, || sibling_sink.names() == vec![READY]);
        let _ = reply.send(request.payload().clone());
    });

    let client = pair.client.clone();
    let sink = sibling.client_sink.clone();
    let seen_on_return = run_on(&pair.client_queue, move || {
        client.send_sync(message(ECHO, b""), SETTLE).map(|_| sink.names())
    })?;

    assert_eq!(seen_on_return, vec![READY]);
    assert!(wait_until(SETTLE, || sibling.client_sink.names() == vec![READY, PING]));
    Ok(())
}

#[rstest]
#[case::sibling_first(true, vec![READY, PING])]
#[case::own_first(false, vec![PING, READY])]
fn deferred_messages_keep_arrival_order_across_connections(
    pair: ConnectedPair,
    #[case] sibling_first: bool,
    #[case] expected: Vec<MessageName>,
) -> TestResult {
    let sibling = ConnectedPair::sharing(&pair.client_queue, ConnectionConfig::default())?;
    let order: Arc<Mutex<Vec<MessageName>>> = Arc::default();
    for sink in [&pair.client_sink, &sibling.client_sink] {
        let order = order.clone();
        sink.set_message_hook(move |_, message| {
            order
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.name().clone());
        });
    }

    let mut senders = vec![(sibling.server.clone(), READY), (pair.server.clone(), PING)];
    if !sibling_first {
        senders.reverse();
    }
    let client = pair.client.clone();
    let seen = order.clone();
    let order_on_return = run_on(&pair.client_queue, move || -> TestResult<Vec<MessageName>> {
        for (server, name) in senders {
            server.send(message(name, b""), flagged())?;
            server.flush_sent_messages(SETTLE)?;
            thread::sleep(Duration::from_millis(20));
        }
        client.send_sync(message(ECHO, b""), SETTLE)?;
        Ok(seen.lock().unwrap_or_else(PoisonError::into_inner).clone())
    })?;

    assert_eq!(order_on_return, expected);
    Ok(())
}

#[rstest]
fn invalidated_connection_is_released_from_shared_deferred_queue(pair: ConnectedPair) -> TestResult {
    let doomed = ConnectedPair::sharing(&pair.client_queue, ConnectionConfig::default())?;
    let doomed_id = doomed.client.id();

    let blocked = BlockedDispatcher::block(pair.client_queue.as_ref());
    doomed.server.send(message(READY, b""), flagged())?;
    doomed.server.flush_sent_messages(SETTLE)?;
    thread::sleep(Duration::from_millis(20));
    doomed.client.invalidate();
    blocked.release();
    drop(doomed);

    assert!(wait_until(SETTLE, || Connection::lookup(doomed_id).is_none()));
    assert!(pair.client.is_valid());
    assert!(pair.client_sink.names().is_empty());
    Ok(())
}
