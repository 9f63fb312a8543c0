//! Main entry point for the wallet-sentinel monitor
//!
//! Loads configuration from an optional TOML file, applies command-line
//! overrides and runs one poll loop per watched wallet until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wallet_sentinel::monitor::{
    build_sink, ConfirmationLevel, GapPolicy, MonitorBuilder, MonitorConfig, SinkKind, WalletMonitor,
};

#[derive(Parser, Debug)]
#[command(name = "wallet-sentinel", version, about = "Watch Solana wallets for token transfers")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ledger node JSON-RPC endpoint
    #[arg(long, env = "SOLANA_RPC_URL")]
    rpc_url: Option<String>,

    /// Wallet address to watch (repeatable; replaces the configured list)
    #[arg(short = 'a', long = "address")]
    addresses: Vec<String>,

    /// Seconds to sleep after each processed batch
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds to pause between transactions of one batch
    #[arg(long)]
    per_tx_delay: Option<u64>,

    /// Signatures requested per listing
    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long, value_enum)]
    commitment: Option<ConfirmationLevel>,

    /// Also report balance changes of the watched wallet's own key
    #[arg(long)]
    include_self: bool,

    #[arg(long, value_enum)]
    gap_policy: Option<GapPolicy>,

    #[arg(long, value_enum)]
    sink: Option<SinkKind>,

    /// SQLite file for resumable tracker state
    #[arg(long)]
    tracker_db: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<MonitorConfig> {
        let base = match &self.config {
            Some(path) => MonitorConfig::from_toml_file(path)?,
            None => MonitorConfig::default(),
        };
        let backfill_max_pages = base.backfill_max_pages;

        let mut builder = MonitorBuilder::from_config(base);
        if let Some(url) = self.rpc_url {
            builder = builder.with_rpc_endpoint(url);
        }
        if !self.addresses.is_empty() {
            builder = builder.with_addresses(self.addresses);
        }
        if let Some(seconds) = self.poll_interval {
            builder = builder.with_poll_interval(seconds);
        }
        if let Some(seconds) = self.per_tx_delay {
            builder = builder.with_per_transaction_delay(seconds);
        }
        if let Some(page_size) = self.page_size {
            builder = builder.with_page_size(page_size);
        }
        if let Some(level) = self.commitment {
            builder = builder.with_confirmation_level(level);
        }
        if self.include_self {
            builder = builder.with_include_self(true);
        }
        if let Some(policy) = self.gap_policy {
            builder = builder.with_gap_policy(policy, backfill_max_pages);
        }
        if let Some(sink) = self.sink {
            builder = builder.with_sink(sink);
        }
        if let Some(path) = self.tracker_db {
            builder = builder.with_tracker_db(path);
        }

        Ok(builder.build_config())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Cli::parse().into_config()?;
    info!("wallet-sentinel v{} starting", env!("CARGO_PKG_VERSION"));

    let sink = build_sink(config.sink);
    let monitor = WalletMonitor::connect(config, sink).await?;

    let cancel = CancellationToken::new();
    let monitor_handle = tokio::spawn(monitor.run(cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
    }
    cancel.cancel();

    if let Err(e) = monitor_handle.await {
        error!("Monitor task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::try_parse_from([
            "wallet-sentinel",
            "-a",
            "8JhckE5RX7pZno85WzGAPVdLfQ7po4MHmenwXzSockhx",
            "--poll-interval",
            "3",
            "--page-size",
            "25",
            "--commitment",
            "finalized",
            "--include-self",
            "--gap-policy",
            "backfill",
            "--sink",
            "json",
            "--tracker-db",
            "tracker.db",
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        assert_eq!(config.watched_addresses, vec!["8JhckE5RX7pZno85WzGAPVdLfQ7po4MHmenwXzSockhx"]);
        assert_eq!(config.poll_interval_seconds, 3);
        assert_eq!(config.per_transaction_delay_seconds, 10);
        assert_eq!(config.signature_page_size, 25);
        assert_eq!(config.confirmation_level, ConfirmationLevel::Finalized);
        assert!(config.include_self);
        assert_eq!(config.gap_policy, GapPolicy::Backfill);
        assert_eq!(config.backfill_max_pages, 5);
        assert_eq!(config.sink, SinkKind::Json);
        assert_eq!(config.tracker_db_path.as_deref(), Some("tracker.db"));
    }

    #[test]
    fn test_cli_without_flags_keeps_defaults() {
        let config = Cli::try_parse_from(["wallet-sentinel"]).unwrap().into_config().unwrap();
        assert!(config.watched_addresses.is_empty());
        assert_eq!(config.gap_policy, GapPolicy::Warn);
        assert_eq!(config.sink, SinkKind::Log);
    }
}
