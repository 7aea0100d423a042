//! Tests for the log records emitted on connection state changes.

use std::time::Duration;

use rstest::rstest;
use serial_test::serial;
use wirelink::{ConnectionConfig, SyncReply};
use wirelink_testing::{ConnectedPair, LoggerHandle, logger, run_on, wait_until};

mod common;
use common::{ECHO, SETTLE, TestResult, message};

#[rstest]
#[serial(connection_logs)]
fn invalidate_is_logged(mut logger: LoggerHandle) -> TestResult {
    let pair = ConnectedPair::open(ConnectionConfig::default())?;
    let id = pair.client.id();
    pair.client.invalidate();

    assert!(logger.contains(&format!("connection invalidated: id={id}")));
    Ok(())
}

#[rstest]
#[serial(connection_logs)]
fn peer_close_is_logged(mut logger: LoggerHandle) -> TestResult {
    let pair = ConnectedPair::open(ConnectionConfig::default())?;
    pair.server.invalidate();
    assert!(wait_until(SETTLE, || !pair.client.is_valid()));

    assert!(logger.contains("connection closed by peer"));
    Ok(())
}

#[rstest]
#[serial(connection_logs)]
fn sync_timeout_is_logged(mut logger: LoggerHandle) -> TestResult {
    let pair = ConnectedPair::open(ConnectionConfig::default())?;
    let held = std::sync::Arc::new(std::sync::Mutex::new(Vec::<SyncReply>::new()));
    let store = held.clone();
    pair.server_sink.set_sync_hook(move |_, _, reply| {
        store.lock().expect("held lock").push(reply);
    });

    let client = pair.client.clone();
    let result = run_on(&pair.client_queue, move || {
        client.send_sync(message(ECHO, b""), Duration::from_millis(20))
    });
    assert!(result.is_err());
    assert!(logger.contains("sync request timed out"));
    Ok(())
}
