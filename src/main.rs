//! Demo binary exercising a `wirelink` connection pair.
//!
//! Opens two connections over an in-memory transport, performs a few sync
//! round trips and one async request, then shuts both ends down.

mod cli;

use std::{error::Error, sync::Arc, time::Duration};

use clap::Parser;
use log::info;
use wirelink::{
    Connection,
    ConnectionConfig,
    MemoryTransport,
    Message,
    MessageName,
    MessageSink,
    SendOptions,
    SyncReply,
    WorkQueue,
};

const ECHO: MessageName = MessageName::new("Demo", "Echo");
const PING: MessageName = MessageName::new("Demo", "Ping");

/// Answers every request with its own payload.
struct EchoServer;

impl MessageSink for EchoServer {
    fn did_receive_message(&self, connection: &Connection, message: &mut Message) {
        if let Some(id) = message.async_reply_id() {
            let reply = Message::async_reply(id, message.payload().clone());
            if let Err(e) = connection.send(reply, SendOptions::default()) {
                log::warn!("failed to answer ping: error={e}");
            }
        }
    }

    fn did_receive_sync_message(&self, _connection: &Connection, message: &mut Message, reply: SyncReply) {
        if let Err(e) = reply.send(message.payload().clone()) {
            log::warn!("failed to answer echo: error={e}");
        }
    }

    fn did_close(&self, connection: &Connection) { info!("server saw close: id={}", connection.id()); }

    fn did_receive_invalid_message(&self, _connection: &Connection, name: &MessageName) {
        log::warn!("server received invalid message: name={name}");
    }
}

/// Logs whatever the server pushes unprompted.
struct Client;

impl MessageSink for Client {
    fn did_receive_message(&self, _connection: &Connection, message: &mut Message) {
        info!("client received message: name={}", message.name());
    }

    fn did_close(&self, connection: &Connection) { info!("client saw close: id={}", connection.id()); }

    fn did_receive_invalid_message(&self, _connection: &Connection, name: &MessageName) {
        log::warn!("client received invalid message: name={name}");
    }
}

fn install_metrics_exporter(cli: &cli::Cli) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "metrics")]
    {
        if let Some(addr) = cli.metrics_addr {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()?;
            info!("serving metrics: addr={addr}");
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        if cli.metrics_addr.is_some() {
            log::warn!("built without the metrics feature; ignoring --metrics-addr");
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // Enable structured logging for the demo.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_metrics_exporter(&cli)?;

    let (client_end, server_end) = MemoryTransport::pair();
    let client = Connection::new(client_end, ConnectionConfig::default())?;
    let server = Connection::new(server_end, ConnectionConfig::default())?;

    let client_queue = WorkQueue::new("wirelink.demo.client")?;
    let server_queue = WorkQueue::new("wirelink.demo.server")?;
    let client_sink = Arc::new(Client);
    let server_sink = Arc::new(EchoServer);
    server.open(&server_sink, server_queue)?;
    client.open(&client_sink, client_queue.clone())?;

    let timeout = Duration::from_millis(cli.sync_timeout_ms);
    let count = cli.messages;
    let caller = client.clone();
    let echoed = client_queue
        .run_blocking(move || -> wirelink::Result<u32> {
            let mut echoed = 0;
            for i in 0..count {
                let request = Message::new(ECHO, 0, i.to_le_bytes().to_vec());
                let reply = caller.send_sync(request, timeout)?;
                if reply.payload().as_ref() == i.to_le_bytes() {
                    echoed += 1;
                }
            }
            Ok(echoed)
        })
        .ok_or("client dispatcher stopped")??;
    println!("{echoed}/{count} sync round trips echoed");

    let (tx, rx) = std::sync::mpsc::channel();
    client.send_with_async_reply(Message::new(PING, 0, b"ping".to_vec()), SendOptions::default(), move |reply| {
        let _ = tx.send(reply.is_some());
    })?;
    let answered = rx.recv_timeout(timeout).unwrap_or(false);
    println!("async ping {}", if answered { "answered" } else { "unanswered" });

    client.invalidate();
    server.invalidate();
    Ok(())
}
