//! Core types shared by the transfer-detection pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A base58 account address (kept as a string so the core does not depend on Solana types)
pub type Address = String;

/// Symbol used when token metadata could not be resolved.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// One historical transaction for an address, as listed by the ledger node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Transaction signature
    pub signature: String,
    /// Slot the transaction landed in
    pub slot: u64,
    /// On-chain error, if the transaction failed
    pub err: Option<String>,
    /// Unix timestamp of the block, if known
    pub block_time: Option<i64>,
}

/// Token balance of one account before or after a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceEntry {
    /// Index into `TransactionDetail::account_keys`
    pub account_index: usize,
    /// Mint of the token held
    pub mint: String,
    /// Decimal-adjusted amount; `None` is treated as zero
    pub ui_amount: Option<f64>,
}

/// Transaction detail needed to diff token balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetail {
    /// Transaction signature
    pub signature: String,
    /// Slot the transaction landed in
    pub slot: u64,
    /// Unix timestamp of the block, if known
    pub block_time: Option<i64>,
    /// On-chain error, rendered as JSON; set for failed transactions
    pub err: Option<String>,
    /// Static keys followed by loaded writable and loaded readonly addresses
    pub account_keys: Vec<Address>,
    /// Token balances before execution
    pub pre_token_balances: Vec<TokenBalanceEntry>,
    /// Token balances after execution
    pub post_token_balances: Vec<TokenBalanceEntry>,
}

/// Direction of a detected token balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferKind {
    Buy,
    Sell,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Buy => write!(f, "BUY"),
            TransferKind::Sell => write!(f, "SELL"),
        }
    }
}

/// Resolved token identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub mint: String,
    pub symbol: String,
}

impl TokenInfo {
    pub fn unknown(mint: &str) -> Self {
        Self {
            mint: mint.to_string(),
            symbol: UNKNOWN_SYMBOL.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.symbol == UNKNOWN_SYMBOL
    }
}

/// A token transfer detected in a watched address's transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Transaction the change was observed in
    pub signature: String,
    /// The watched address whose history listed the transaction
    pub watched_address: Address,
    /// Account whose balance changed
    pub account: Address,
    /// Token mint
    pub mint: String,
    /// BUY when the balance grew, SELL when it shrank
    #[serde(rename = "type")]
    pub kind: TransferKind,
    /// Absolute balance change
    pub amount: f64,
    /// Block time (unix seconds)
    pub timestamp: Option<i64>,
    /// Token symbol, filled in by the token info resolver
    pub symbol: Option<String>,
}

impl TransferEvent {
    /// Attach resolved token metadata to the event.
    pub fn with_token_info(mut self, info: TokenInfo) -> Self {
        self.symbol = Some(info.symbol);
        self
    }

    pub fn symbol_or_unknown(&self) -> &str {
        self.symbol.as_deref().unwrap_or(UNKNOWN_SYMBOL)
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = self
            .timestamp
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown time".to_string());

        write!(
            f,
            "{} {} {} ({}) wallet={} account={} tx={} at {}",
            self.kind,
            self.amount,
            self.symbol_or_unknown(),
            self.mint,
            self.watched_address,
            self.account,
            self.signature,
            when,
        )
    }
}
