//! Tests for blocking on one specific incoming message.

use std::{
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
    time::{Duration, Instant},
};

use rstest::rstest;
use wirelink::{Error, Message, SendOptions, WaitForOptions};
use wirelink_testing::{ConnectedPair, pair, run_on, wait_until};

mod common;
use common::{BlockedDispatcher, ECHO, PING, READY, SETTLE, TestResult, message};

#[rstest]
fn waiter_receives_matching_message(pair: ConnectedPair) -> TestResult {
    let server = pair.server.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let _ = server.send(message(PING, b"noise"), SendOptions::default());
        let _ = server.send(message(READY, b"go"), SendOptions::default());
    });

    let client = pair.client.clone();
    let got = run_on(&pair.client_queue, move || {
        client.wait_for_message(&READY, 0, SETTLE, WaitForOptions::default())
    })?;

    assert_eq!(got.payload().as_ref(), b"go");
    assert!(wait_until(SETTLE, || pair.client_sink.names() == vec![PING]));
    Ok(())
}

#[rstest]
fn buffered_message_is_taken_immediately(pair: ConnectedPair) -> TestResult {
    let blocked = BlockedDispatcher::block(pair.client_queue.as_ref());
    pair.server.send(message(READY, b"early"), SendOptions::default())?;
    assert!(wait_until(SETTLE, || pair.client.pending_message_count() == 1));

    let got = pair.client.wait_for_message(&READY, 0, Duration::ZERO, WaitForOptions::default())?;
    assert_eq!(got.payload().as_ref(), b"early");
    assert_eq!(pair.client.pending_message_count(), 0);
    blocked.release();
    Ok(())
}

#[rstest]
fn wait_times_out(pair: ConnectedPair) {
    let client = pair.client.clone();
    let started = Instant::now();
    let result = run_on(&pair.client_queue, move || {
        client.wait_for_message(&READY, 0, Duration::from_millis(50), WaitForOptions::default())
    });

    assert_eq!(result.err(), Some(Error::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[rstest]
fn second_waiter_is_rejected(pair: ConnectedPair) -> TestResult {
    let (started_tx, started) = mpsc::channel();
    let client = pair.client.clone();
    let queue = pair.client_queue.clone();
    let first = thread::spawn(move || {
        run_on(&queue, move || {
            let _ = started_tx.send(());
            client.wait_for_message(&READY, 0, Duration::from_secs(30), WaitForOptions::default())
        })
    });

    started.recv_timeout(SETTLE)?;
    thread::sleep(Duration::from_millis(50));
    let second = pair
        .client
        .wait_for_message(&ECHO, 0, Duration::ZERO, WaitForOptions::default());
    assert_eq!(second.err(), Some(Error::MultipleWaitingClients));

    pair.server.send(message(READY, b""), SendOptions::default())?;
    let released = first.join().map_err(|_| "first waiter panicked")?;
    assert!(released.is_ok());
    Ok(())
}

#[rstest]
fn incoming_sync_message_interrupts_wait(pair: ConnectedPair) -> TestResult {
    let (started_tx, started) = mpsc::channel();
    let client = pair.client.clone();
    let queue = pair.client_queue.clone();
    let waiter = thread::spawn(move || {
        run_on(&queue, move || {
            let _ = started_tx.send(());
            client.wait_for_message(
                &READY,
                0,
                Duration::from_secs(30),
                WaitForOptions::default().interrupt_if_sync_message_arrives(true),
            )
        })
    });

    started.recv_timeout(SETTLE)?;
    thread::sleep(Duration::from_millis(20));
    let server = pair.server.clone();
    run_on(&pair.server_queue, move || {
        let _ = server.send_sync(message(ECHO, b""), Duration::from_millis(200));
    });

    let result = waiter.join().map_err(|_| "waiter panicked")?;
    assert_eq!(result.err(), Some(Error::SyncMessageInterruptedWait));
    Ok(())
}

#[rstest]
fn invalidate_releases_waiter(pair: ConnectedPair) -> TestResult {
    let (started_tx, started) = mpsc::channel();
    let client = pair.client.clone();
    let queue = pair.client_queue.clone();
    let waiter = thread::spawn(move || {
        run_on(&queue, move || {
            let _ = started_tx.send(());
            client.wait_for_message(&READY, 0, Duration::from_secs(30), WaitForOptions::default())
        })
    });

    started.recv_timeout(SETTLE)?;
    thread::sleep(Duration::from_millis(20));
    pair.client.invalidate();

    let result = waiter.join().map_err(|_| "waiter panicked")?;
    assert_eq!(result.err(), Some(Error::InvalidConnection));
    Ok(())
}

#[rstest]
fn wait_after_peer_close_is_rejected(pair: ConnectedPair) {
    pair.server.invalidate();
    assert!(wait_until(SETTLE, || !pair.client.is_valid()));

    let result = pair
        .client
        .wait_for_message(&READY, 0, Duration::ZERO, WaitForOptions::default());
    assert_eq!(result.err(), Some(Error::InvalidConnection));
}

#[rstest]
fn deferred_match_is_not_waited_for(pair: ConnectedPair) -> TestResult {
    let client = pair.client.clone();
    let server = pair.server.clone();
    let result = run_on(&pair.client_queue, move || -> TestResult<Result<Message, Error>> {
        let flagged = SendOptions::default().dispatch_while_waiting_for_sync_reply(true);
        server.send(message(READY, b"early"), flagged)?;
        server.flush_sent_messages(SETTLE)?;
        thread::sleep(Duration::from_millis(20));
        Ok(client.wait_for_message(&READY, 0, SETTLE, WaitForOptions::default()))
    })?;

    assert_eq!(result.err(), Some(Error::WaitingOnAlreadyDispatchedMessage));
    assert_eq!(pair.client_sink.names(), vec![READY]);
    Ok(())
}

#[rstest]
fn finite_wait_inside_sync_handler_is_rejected(pair: ConnectedPair) -> TestResult {
    let outcome: Arc<Mutex<Option<Error>>> = Arc::default();
    let store = outcome.clone();
    pair.client_sink.set_sync_hook(move |connection, request, reply| {
        let result = connection.wait_for_message(&READY, 0, Duration::from_millis(50), WaitForOptions::default());
        *store.lock().unwrap_or_else(PoisonError::into_inner) = result.err();
        let _ = reply.send(request.payload().clone());
    });

    let server = pair.server.clone();
    run_on(&pair.server_queue, move || server.send_sync(message(ECHO, b""), SETTLE))?;
    assert_eq!(
        *outcome.lock().unwrap_or_else(PoisonError::into_inner),
        Some(Error::AttemptingToWaitInsideSyncMessageHandling)
    );
    Ok(())
}
