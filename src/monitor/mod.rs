//! Monitor module - watches wallets for token balance changes.
//!
//! Per watched address a poll loop lists new transaction signatures, diffs the
//! pre/post token balances of each transaction and emits BUY/SELL transfer
//! events enriched with the token symbol.

pub mod balance_differ;
pub mod config;
pub mod error;
pub mod event_sink;
pub mod rate_limit;
pub mod rpc;
pub mod scheduler;
pub mod signature_tracker;
pub mod supervisor;
pub mod token_info;
pub mod tracker_store;
pub mod transaction_fetcher;

// Re-export main public types and the supervisor
pub use supervisor::WalletMonitor;
pub use config::{ConfirmationLevel, GapPolicy, MonitorConfig, SinkKind};
pub use error::{ConfigError, MonitorError};

// Re-export pipeline components for embedding and testing
pub use balance_differ::BalanceDiffer;
pub use event_sink::{build_sink, ChannelSink, ConsoleSink, EventSink, JsonLinesSink, LogSink};
pub use rate_limit::RequestThrottle;
pub use rpc::{LedgerRpc, SolanaLedgerRpc, SolanaTokenMetadata, TokenMetadataSource};
pub use scheduler::{AddressMonitor, MonitorContext, MonitorState, TickReport};
pub use signature_tracker::{SignatureTracker, TrackerState};
pub use token_info::TokenInfoResolver;
pub use tracker_store::{MemoryTrackerStore, SqliteTrackerStore, TrackerStore};
pub use transaction_fetcher::TransactionFetcher;

use crate::types::Address;

/// Monitor builder for convenient construction with sensible defaults.
pub struct MonitorBuilder {
    config: MonitorConfig,
}

impl MonitorBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: MonitorConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from TOML.
    pub fn from_config(config: MonitorConfig) -> Self {
        Self { config }
    }

    /// Set the RPC endpoint.
    pub fn with_rpc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.rpc_endpoint_url = endpoint.into();
        self
    }

    /// Replace the watched addresses.
    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.config.watched_addresses = addresses;
        self
    }

    /// Add one watched address.
    pub fn watch(mut self, address: impl Into<Address>) -> Self {
        self.config.watched_addresses.push(address.into());
        self
    }

    /// Set poll and per-transaction intervals in seconds.
    pub fn with_intervals(mut self, poll_seconds: u64, per_transaction_seconds: u64) -> Self {
        self.config.poll_interval_seconds = poll_seconds;
        self.config.per_transaction_delay_seconds = per_transaction_seconds;
        self
    }

    /// Set the sleep after each processed batch.
    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.config.poll_interval_seconds = seconds;
        self
    }

    /// Set the pause between transactions of one batch.
    pub fn with_per_transaction_delay(mut self, seconds: u64) -> Self {
        self.config.per_transaction_delay_seconds = seconds;
        self
    }

    /// Set the sleep after an empty listing.
    pub fn with_idle_interval(mut self, seconds: u64) -> Self {
        self.config.idle_interval_seconds = seconds;
        self
    }

    /// Set the failed-tick cooldown and its cap.
    pub fn with_error_cooldown(mut self, base_seconds: u64, max_seconds: u64) -> Self {
        self.config.error_cooldown_seconds = base_seconds;
        self.config.max_error_cooldown_seconds = max_seconds;
        self
    }

    /// Set the signature page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.config.signature_page_size = page_size;
        self
    }

    /// Set the confirmation level.
    pub fn with_confirmation_level(mut self, level: ConfirmationLevel) -> Self {
        self.config.confirmation_level = level;
        self
    }

    /// Set listing retries within one tick.
    pub fn with_rpc_retry(mut self, attempts: usize, base_ms: u64) -> Self {
        self.config.rpc_retry_attempts = attempts;
        self.config.rpc_retry_base_ms = base_ms;
        self
    }

    /// Set rate limiting.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    pub fn with_include_self(mut self, include_self: bool) -> Self {
        self.config.include_self = include_self;
        self
    }

    /// Set how many ticks a missing transaction is waited for.
    pub fn with_max_not_found_retries(mut self, retries: u32) -> Self {
        self.config.max_not_found_retries = retries;
        self
    }

    /// Set the gap overrun policy.
    pub fn with_gap_policy(mut self, policy: GapPolicy, backfill_max_pages: usize) -> Self {
        self.config.gap_policy = policy;
        self.config.backfill_max_pages = backfill_max_pages;
        self
    }

    /// Set max token cache entries.
    pub fn with_token_cache_capacity(mut self, capacity: u64) -> Self {
        self.config.token_cache_capacity = capacity;
        self
    }

    /// Persist tracker state to a SQLite file.
    pub fn with_tracker_db(mut self, path: impl Into<String>) -> Self {
        self.config.tracker_db_path = Some(path.into());
        self
    }

    pub fn with_sink(mut self, sink: SinkKind) -> Self {
        self.config.sink = sink;
        self
    }

    /// Build the monitor configuration.
    pub fn build_config(self) -> MonitorConfig {
        self.config
    }

    /// Build a monitor connected to the configured RPC node.
    pub async fn connect(self, sink: std::sync::Arc<dyn EventSink>) -> anyhow::Result<WalletMonitor> {
        WalletMonitor::connect(self.config, sink).await
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_builder() {
        let config = MonitorBuilder::new()
            .watch("8JhckE5RX7pZno85WzGAPVdLfQ7po4MHmenwXzSockhx")
            .with_intervals(5, 1)
            .with_page_size(50)
            .with_confirmation_level(ConfirmationLevel::Finalized)
            .with_gap_policy(GapPolicy::Backfill, 3)
            .build_config();

        assert_eq!(config.watched_addresses.len(), 1);
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.per_transaction_delay_seconds, 1);
        assert_eq!(config.signature_page_size, 50);
        assert_eq!(config.confirmation_level, ConfirmationLevel::Finalized);
        assert_eq!(config.gap_policy, GapPolicy::Backfill);
        assert_eq!(config.backfill_max_pages, 3);
    }

    #[test]
    fn test_monitor_builder_defaults() {
        let config = MonitorBuilder::new().build_config();

        assert!(config.watched_addresses.is_empty());
        assert_eq!(config.poll_interval_seconds, 20);
        assert_eq!(config.per_transaction_delay_seconds, 10);
        assert_eq!(config.signature_page_size, 10);
        assert_eq!(config.confirmation_level, ConfirmationLevel::Confirmed);
        assert!(!config.include_self);
        assert_eq!(config.max_not_found_retries, 5);
        assert_eq!(config.sink, SinkKind::Log);
    }
}
