//! Command line interface for the wirelink demo binary.
//!
//! Provides a tiny CLI to drive an in-process connection pair and to
//! generate the man page.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wirelink` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wirelink",
    version,
    about = "Exchange messages over an in-process wirelink connection pair"
)]
pub struct Cli {
    /// Number of sync round trips to perform.
    #[arg(short, long, default_value_t = 3)]
    pub messages: u32,

    /// Deadline for each sync call, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub sync_timeout_ms: u64,

    /// Serve Prometheus metrics on this address while the demo runs.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["wirelink"]);
        assert_eq!(cli.messages, 3);
        assert_eq!(cli.sync_timeout_ms, 1000);
        assert!(cli.metrics_addr.is_none());
    }

    #[test]
    fn parses_metrics_address() {
        let cli = Cli::parse_from(["wirelink", "--messages", "5", "--metrics-addr", "127.0.0.1:9000"]);
        assert_eq!(cli.messages, 5);
        assert_eq!(cli.metrics_addr.map(|a| a.port()), Some(9000));
    }
}
