//! Monitor configuration: defaults, TOML loading and validation.

use crate::monitor::error::ConfigError;
use crate::types::Address;
use clap::ValueEnum;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Largest page `getSignaturesForAddress` accepts.
pub const MAX_SIGNATURE_PAGE_SIZE: usize = 1000;

/// Durability tier requested from the ledger node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

/// What to do when one signature page cannot reach the last processed signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Log a data-completeness warning and process the page
    #[default]
    Warn,
    /// Page further back (bounded by `backfill_max_pages`) until the tracked signature shows up
    Backfill,
}

/// Where detected transfers are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Structured `tracing` record
    #[default]
    Log,
    /// Human-readable line on stdout
    Console,
    /// One JSON object per line on stdout
    Json,
}

/// Configuration for the wallet monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ledger node JSON-RPC endpoint
    pub rpc_endpoint_url: String,
    /// Addresses to watch, one poll loop each
    pub watched_addresses: Vec<Address>,
    /// Sleep after a processed batch
    pub poll_interval_seconds: u64,
    /// Pause between transactions of one batch
    pub per_transaction_delay_seconds: u64,
    /// Sleep after an empty signature listing
    pub idle_interval_seconds: u64,
    /// Cooldown after a failed tick (doubled per consecutive failure)
    pub error_cooldown_seconds: u64,
    /// Upper bound for the failed-tick cooldown
    pub max_error_cooldown_seconds: u64,
    /// Signatures requested per listing
    pub signature_page_size: usize,
    /// Confirmation level for listing and fetching
    pub confirmation_level: ConfirmationLevel,
    /// Highest transaction version the node may return
    pub max_supported_transaction_version: u8,
    /// RPC client timeout
    pub rpc_timeout_seconds: u64,
    /// Retries of the signature listing within one tick
    pub rpc_retry_attempts: usize,
    /// Base delay for listing retries
    pub rpc_retry_base_ms: u64,
    /// Client-side request budget against the node
    pub rate_limit_requests_per_second: u32,
    /// Also diff the watched address's own balance rows
    pub include_self: bool,
    /// Ticks a listed signature may come back not found before it is skipped
    pub max_not_found_retries: u32,
    /// Behaviour when a page does not reach the last processed signature
    pub gap_policy: GapPolicy,
    /// Older pages fetched per tick under `GapPolicy::Backfill`
    pub backfill_max_pages: usize,
    /// Maximum mints kept in the token info cache
    pub token_cache_capacity: u64,
    /// SQLite file for tracker state; in-memory when unset
    pub tracker_db_path: Option<String>,
    /// Event sink
    pub sink: SinkKind,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint_url: "https://api.mainnet-beta.solana.com".to_string(),
            watched_addresses: Vec::new(),
            poll_interval_seconds: 20,
            per_transaction_delay_seconds: 10,
            idle_interval_seconds: 10,
            error_cooldown_seconds: 1,
            max_error_cooldown_seconds: 60,
            signature_page_size: 10,
            confirmation_level: ConfirmationLevel::Confirmed,
            max_supported_transaction_version: 0,
            rpc_timeout_seconds: 30,
            rpc_retry_attempts: 3,
            rpc_retry_base_ms: 250,
            rate_limit_requests_per_second: 5,
            include_self: false,
            max_not_found_retries: 5,
            gap_policy: GapPolicy::Warn,
            backfill_max_pages: 5,
            token_cache_capacity: 1000,
            tracker_db_path: None,
            sink: SinkKind::Log,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Check the configuration and return the watched addresses.
    pub fn validate(&self) -> Result<NonEmpty<Address>, ConfigError> {
        if self.rpc_endpoint_url.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if self.signature_page_size == 0 || self.signature_page_size > MAX_SIGNATURE_PAGE_SIZE {
            return Err(ConfigError::InvalidPageSize(self.signature_page_size));
        }
        if self.rate_limit_requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        if self.token_cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }

        for address in &self.watched_addresses {
            Pubkey::from_str(address).map_err(|e| ConfigError::InvalidAddress {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        }

        let mut unique: Vec<Address> = Vec::with_capacity(self.watched_addresses.len());
        for address in &self.watched_addresses {
            if !unique.contains(address) {
                unique.push(address.clone());
            }
        }

        NonEmpty::from_vec(unique).ok_or(ConfigError::NoWatchedAddresses)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn per_transaction_delay(&self) -> Duration {
        Duration::from_secs(self.per_transaction_delay_seconds)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_seconds)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_seconds)
    }

    pub fn max_error_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_error_cooldown_seconds.max(self.error_cooldown_seconds))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }
}
