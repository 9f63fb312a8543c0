//! Ledger node collaborators.
//!
//! The pipeline only sees the `LedgerRpc` and `TokenMetadataSource` traits. The
//! Solana implementations below talk to a JSON-RPC node through the nonblocking
//! `RpcClient`.

use crate::monitor::config::ConfirmationLevel;
use crate::monitor::rate_limit::RequestThrottle;
use crate::types::{SignatureInfo, TokenInfo};
use anyhow::{Context, Result};
use async_trait::async_trait;
use borsh::BorshDeserialize;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

/// Metaplex token metadata program.
const METADATA_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

/// Characters of the mint used as a symbol when no metadata account exists.
const FALLBACK_SYMBOL_LEN: usize = 6;

/// Read access to transaction history on the ledger.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// List signatures involving `address`, newest first. `before` pages further back.
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        commitment: ConfirmationLevel,
        before: Option<String>,
    ) -> Result<Vec<SignatureInfo>>;

    /// Fetch the raw `getTransaction` result (JSON encoding). `None` when the node has no value.
    async fn get_transaction(
        &self,
        signature: &str,
        commitment: ConfirmationLevel,
        max_supported_transaction_version: u8,
    ) -> Result<Option<Value>>;
}

/// Best-effort token metadata lookup.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn resolve_token_info(&self, mint: &str) -> Result<TokenInfo>;
}

impl From<ConfirmationLevel> for CommitmentConfig {
    fn from(level: ConfirmationLevel) -> Self {
        match level {
            ConfirmationLevel::Processed => CommitmentConfig::processed(),
            ConfirmationLevel::Confirmed => CommitmentConfig::confirmed(),
            ConfirmationLevel::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// History methods reject `processed`; the closest accepted level is `confirmed`.
fn history_commitment(level: ConfirmationLevel) -> CommitmentConfig {
    match level {
        ConfirmationLevel::Processed => {
            debug!("processed commitment not supported for history queries, using confirmed");
            CommitmentConfig::confirmed()
        }
        other => other.into(),
    }
}

/// `LedgerRpc` over a Solana JSON-RPC node.
pub struct SolanaLedgerRpc {
    client: Arc<RpcClient>,
}

impl SolanaLedgerRpc {
    pub fn new(endpoint: &str, timeout: Duration, commitment: ConfirmationLevel) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            endpoint.to_string(),
            timeout,
            commitment.into(),
        );
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedgerRpc {
    #[instrument(skip(self), fields(address = %address))]
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        commitment: ConfirmationLevel,
        before: Option<String>,
    ) -> Result<Vec<SignatureInfo>> {
        let pubkey = Pubkey::from_str(address).context("Invalid watched address")?;
        let before = before
            .map(|sig| Signature::from_str(&sig))
            .transpose()
            .context("Invalid 'before' signature")?;

        let statuses = self
            .client
            .get_signatures_for_address_with_config(
                &pubkey,
                GetConfirmedSignaturesForAddress2Config {
                    before,
                    until: None,
                    limit: Some(limit),
                    commitment: Some(history_commitment(commitment)),
                },
            )
            .await
            .context("getSignaturesForAddress failed")?;

        debug!("Listed {} signatures", statuses.len());

        Ok(statuses
            .into_iter()
            .map(|status| SignatureInfo {
                signature: status.signature,
                slot: status.slot,
                err: status.err.map(|err| err.to_string()),
                block_time: status.block_time,
            })
            .collect())
    }

    #[instrument(skip(self), fields(signature = %signature))]
    async fn get_transaction(
        &self,
        signature: &str,
        commitment: ConfirmationLevel,
        max_supported_transaction_version: u8,
    ) -> Result<Option<Value>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(history_commitment(commitment)),
            max_supported_transaction_version: Some(max_supported_transaction_version),
        };

        let result: Option<Value> = self
            .client
            .send(RpcRequest::GetTransaction, json!([signature, config]))
            .await
            .context("getTransaction failed")?;

        Ok(result)
    }
}

/// `TokenMetadataSource` reading the mint and its Metaplex metadata account.
pub struct SolanaTokenMetadata {
    client: Arc<RpcClient>,
    throttle: Arc<RequestThrottle>,
    commitment: CommitmentConfig,
}

impl SolanaTokenMetadata {
    pub fn new(client: Arc<RpcClient>, throttle: Arc<RequestThrottle>, commitment: ConfirmationLevel) -> Self {
        Self {
            client,
            throttle,
            commitment: commitment.into(),
        }
    }

    /// Throttled account read; the outcome counts toward the throttle's error rate.
    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        self.throttle.acquire().await;
        match self.client.get_account_with_commitment(address, self.commitment).await {
            Ok(response) => {
                self.throttle.record_success();
                Ok(response.value)
            }
            Err(e) => {
                self.throttle.record_failure();
                Err(e.into())
            }
        }
    }

    fn metadata_address(mint: &Pubkey) -> Pubkey {
        let (address, _bump) = Pubkey::find_program_address(
            &[b"metadata", METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
            &METADATA_PROGRAM_ID,
        );
        address
    }
}

#[async_trait]
impl TokenMetadataSource for SolanaTokenMetadata {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn resolve_token_info(&self, mint: &str) -> Result<TokenInfo> {
        let mint_key = Pubkey::from_str(mint).context("Invalid mint address")?;

        self.fetch_account(&mint_key)
            .await
            .context("Failed to fetch mint account")?
            .context("Mint account does not exist")?;

        let metadata = self
            .fetch_account(&Self::metadata_address(&mint_key))
            .await
            .context("Failed to fetch metadata account")?;

        let symbol = metadata
            .and_then(|account| decode_metadata_symbol(&account.data))
            .unwrap_or_else(|| fallback_symbol(mint));

        debug!("Resolved symbol {}", symbol);
        Ok(TokenInfo {
            mint: mint.to_string(),
            symbol,
        })
    }
}

fn fallback_symbol(mint: &str) -> String {
    mint.chars().take(FALLBACK_SYMBOL_LEN).collect()
}

/// Leading fields of a Metaplex metadata account; the rest of the account is not read.
#[derive(Debug, BorshDeserialize)]
struct MetadataPrefix {
    _key: u8,
    _update_authority: Pubkey,
    _mint: Pubkey,
    _name: String,
    symbol: String,
}

/// Read the symbol out of a Metaplex metadata account. Strings are NUL padded.
pub fn decode_metadata_symbol(data: &[u8]) -> Option<String> {
    let prefix = MetadataPrefix::deserialize(&mut &data[..]).ok()?;

    let symbol = prefix.symbol.trim_matches(char::from(0)).trim().to_string();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borsh_string(value: &str, padded_len: usize) -> Vec<u8> {
        let mut bytes = value.as_bytes().to_vec();
        bytes.resize(padded_len.max(bytes.len()), 0);
        let mut out = (bytes.len() as u32).to_le_bytes().to_vec();
        out.extend(bytes);
        out
    }

    fn metadata_account(name: &str, symbol: &str) -> Vec<u8> {
        let mut data = vec![4u8];
        data.extend([1u8; 32]);
        data.extend([2u8; 32]);
        data.extend(borsh_string(name, 32));
        data.extend(borsh_string(symbol, 10));
        data.extend(borsh_string("https://example.com/meta.json", 200));
        data
    }

    #[test]
    fn test_decode_metadata_symbol() {
        let data = metadata_account("Bonk", "BONK");
        assert_eq!(decode_metadata_symbol(&data), Some("BONK".to_string()));
    }

    #[test]
    fn test_decode_metadata_symbol_rejects_truncated_data() {
        let data = metadata_account("Bonk", "BONK");
        assert_eq!(decode_metadata_symbol(&data[..80]), None);
        assert_eq!(decode_metadata_symbol(&[]), None);
    }

    #[test]
    fn test_decode_metadata_symbol_blank_symbol() {
        let data = metadata_account("Nameless", "");
        assert_eq!(decode_metadata_symbol(&data), None);
    }

    #[test]
    fn test_decode_metadata_symbol_rejects_invalid_utf8() {
        let mut data = vec![4u8];
        data.extend([1u8; 32]);
        data.extend([2u8; 32]);
        data.extend(borsh_string("Bonk", 32));
        data.extend(3u32.to_le_bytes());
        data.extend([0xff, 0xfe, 0xfd]);
        assert_eq!(decode_metadata_symbol(&data), None);
    }

    #[test]
    fn test_fallback_symbol_uses_mint_prefix() {
        assert_eq!(fallback_symbol("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263"), "DezXAZ");
    }

    #[tokio::test]
    async fn test_metadata_lookup_failure_counts_against_throttle() {
        let client = Arc::new(RpcClient::new_with_timeout(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(2),
        ));
        let throttle = Arc::new(RequestThrottle::new(100));
        let source = SolanaTokenMetadata::new(client, throttle.clone(), ConfirmationLevel::Confirmed);

        let result = source
            .resolve_token_info("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263")
            .await;

        assert!(result.is_err());
        let stats = throttle.stats();
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.error_rate, 1.0);
    }

    #[test]
    fn test_history_commitment_upgrades_processed() {
        assert_eq!(
            history_commitment(ConfirmationLevel::Processed),
            CommitmentConfig::confirmed()
        );
        assert_eq!(
            history_commitment(ConfirmationLevel::Finalized),
            CommitmentConfig::finalized()
        );
    }
}
