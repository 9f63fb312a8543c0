//! wallet-sentinel - Solana wallet token transfer monitor
//!
//! Polls the transaction history of watched wallets and reports BUY/SELL token
//! transfers derived from pre/post token balance changes.

pub mod types;
pub mod monitor;

// Re-export main types for convenience
pub use types::{SignatureInfo, TokenInfo, TransactionDetail, TransferEvent, TransferKind};
pub use monitor::{MonitorBuilder, MonitorConfig, WalletMonitor};
