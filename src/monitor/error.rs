//! Error taxonomy for the monitor pipeline.
//!
//! Every variant is contained within one poll tick; none of them terminate
//! the process. The scheduler matches on the variant to decide whether to
//! retry, skip or advance.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while processing one watched address.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transport or timeout failure talking to the ledger node. Retried next tick.
    #[error("RPC unavailable during {operation}: {source:#}")]
    RpcUnavailable {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The node returned no value for the signature yet.
    #[error("transaction {signature} not visible on the node yet")]
    NotFound { signature: String },

    /// The payload could not be parsed into a transaction detail.
    #[error("malformed response for transaction {signature}: {reason}")]
    MalformedResponse { signature: String, reason: String },

    /// Token metadata could not be resolved. Never surfaced to callers of the resolver.
    #[error("metadata lookup failed for mint {mint}: {source:#}")]
    MetadataLookupFailed {
        mint: String,
        #[source]
        source: anyhow::Error,
    },

    /// More unseen transactions existed than the listing could return.
    #[error(
        "gap overrun for {address}: last processed signature {last_processed} not found in {pages} page(s) of {page_size}; older transfers may be missed"
    )]
    GapOverrun {
        address: String,
        last_processed: String,
        page_size: usize,
        pages: usize,
    },
}

impl MonitorError {
    /// Whether the same work should be attempted again on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MonitorError::RpcUnavailable { .. } | MonitorError::NotFound { .. }
        )
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one watched address is required")]
    NoWatchedAddresses,

    #[error("invalid watched address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("signature page size must be between 1 and 1000, got {0}")]
    InvalidPageSize(usize),

    #[error("rate limit must be at least 1 request per second")]
    InvalidRateLimit,

    #[error("token cache capacity must be at least 1")]
    InvalidCacheCapacity,

    #[error("RPC endpoint URL is empty")]
    EmptyEndpoint,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
