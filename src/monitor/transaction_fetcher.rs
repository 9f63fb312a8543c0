//! TransactionFetcher - resolves a signature to transaction detail
//!
//! Wraps `LedgerRpc::get_transaction`, parses the JSON payload and classifies
//! failures into `RpcUnavailable`, `NotFound` and `MalformedResponse`.

use crate::monitor::config::ConfirmationLevel;
use crate::monitor::error::MonitorError;
use crate::monitor::rate_limit::RequestThrottle;
use crate::monitor::rpc::LedgerRpc;
use crate::types::{TokenBalanceEntry, TransactionDetail};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    slot: u64,
    block_time: Option<i64>,
    meta: Option<WireMeta>,
    transaction: WireTransactionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMeta {
    err: Option<Value>,
    #[serde(default)]
    pre_token_balances: Option<Vec<WireTokenBalance>>,
    #[serde(default)]
    post_token_balances: Option<Vec<WireTokenBalance>>,
    #[serde(default)]
    loaded_addresses: Option<WireLoadedAddresses>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTokenBalance {
    account_index: usize,
    mint: String,
    ui_token_amount: WireUiTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUiTokenAmount {
    ui_amount: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireLoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireTransactionBody {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    account_keys: Vec<WireAccountKey>,
}

/// `json` encoding lists plain keys, `jsonParsed` lists objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireAccountKey {
    Plain(String),
    Parsed { pubkey: String },
}

impl WireAccountKey {
    fn into_address(self) -> String {
        match self {
            WireAccountKey::Plain(key) => key,
            WireAccountKey::Parsed { pubkey } => pubkey,
        }
    }
}

impl From<WireTokenBalance> for TokenBalanceEntry {
    fn from(balance: WireTokenBalance) -> Self {
        TokenBalanceEntry {
            account_index: balance.account_index,
            mint: balance.mint,
            ui_amount: balance.ui_token_amount.ui_amount,
        }
    }
}

/// Parse a `getTransaction` result into a `TransactionDetail`.
pub fn parse_transaction(signature: &str, payload: Value) -> Result<TransactionDetail, serde_json::Error> {
    let wire: WireTransaction = serde_json::from_value(payload)?;

    let mut account_keys: Vec<String> = wire
        .transaction
        .message
        .account_keys
        .into_iter()
        .map(WireAccountKey::into_address)
        .collect();

    let (err, pre_token_balances, post_token_balances) = match wire.meta {
        Some(meta) => {
            if let Some(loaded) = meta.loaded_addresses {
                account_keys.extend(loaded.writable);
                account_keys.extend(loaded.readonly);
            }
            (
                meta.err.filter(|err| !err.is_null()).map(|err| err.to_string()),
                meta.pre_token_balances
                    .unwrap_or_default()
                    .into_iter()
                    .map(TokenBalanceEntry::from)
                    .collect(),
                meta.post_token_balances
                    .unwrap_or_default()
                    .into_iter()
                    .map(TokenBalanceEntry::from)
                    .collect(),
            )
        }
        None => (None, Vec::new(), Vec::new()),
    };

    Ok(TransactionDetail {
        signature: signature.to_string(),
        slot: wire.slot,
        block_time: wire.block_time,
        err,
        account_keys,
        pre_token_balances,
        post_token_balances,
    })
}

/// Fetches and parses transactions through the ledger RPC.
#[derive(Clone)]
pub struct TransactionFetcher {
    rpc: Arc<dyn LedgerRpc>,
    throttle: Arc<RequestThrottle>,
    commitment: ConfirmationLevel,
    max_supported_transaction_version: u8,
}

impl TransactionFetcher {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        throttle: Arc<RequestThrottle>,
        commitment: ConfirmationLevel,
        max_supported_transaction_version: u8,
    ) -> Self {
        Self {
            rpc,
            throttle,
            commitment,
            max_supported_transaction_version,
        }
    }

    /// Fetch the transaction detail for `signature`.
    #[instrument(skip(self))]
    pub async fn fetch(&self, signature: &str) -> Result<TransactionDetail, MonitorError> {
        self.throttle.acquire().await;

        let payload = match self
            .rpc
            .get_transaction(signature, self.commitment, self.max_supported_transaction_version)
            .await
        {
            Ok(payload) => {
                self.throttle.record_success();
                payload
            }
            Err(source) => {
                self.throttle.record_failure();
                return Err(MonitorError::RpcUnavailable {
                    operation: "getTransaction",
                    source,
                });
            }
        };

        let payload = match payload {
            Some(payload) if !payload.is_null() => payload,
            _ => {
                return Err(MonitorError::NotFound {
                    signature: signature.to_string(),
                })
            }
        };

        let detail = parse_transaction(signature, payload).map_err(|e| MonitorError::MalformedResponse {
            signature: signature.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            slot = detail.slot,
            pre = detail.pre_token_balances.len(),
            post = detail.post_token_balances.len(),
            "Fetched transaction"
        );
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::rpc::MockLedgerRpc;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "slot": 250_000_000u64,
            "blockTime": 1_700_000_000i64,
            "meta": {
                "err": null,
                "fee": 5000,
                "preTokenBalances": [
                    {"accountIndex": 1, "mint": "M1", "owner": "o", "uiTokenAmount": {"amount": "5000", "decimals": 3, "uiAmount": 5.0, "uiAmountString": "5"}}
                ],
                "postTokenBalances": [
                    {"accountIndex": 1, "mint": "M1", "owner": "o", "uiTokenAmount": {"amount": "8000", "decimals": 3, "uiAmount": 8.0, "uiAmountString": "8"}},
                    {"accountIndex": 3, "mint": "M1", "owner": "o", "uiTokenAmount": {"amount": "0", "decimals": 3, "uiAmount": null, "uiAmountString": "0"}}
                ],
                "loadedAddresses": {"writable": ["lookupW"], "readonly": ["lookupR"]}
            },
            "transaction": {
                "signatures": ["sig1"],
                "message": {"accountKeys": ["wallet", "counterparty"], "instructions": []}
            },
            "version": 0
        })
    }

    fn fetcher(rpc: MockLedgerRpc) -> TransactionFetcher {
        TransactionFetcher::new(
            Arc::new(rpc),
            Arc::new(RequestThrottle::new(1000)),
            ConfirmationLevel::Confirmed,
            0,
        )
    }

    #[test]
    fn test_parse_transaction_appends_loaded_addresses() {
        let detail = parse_transaction("sig1", sample_payload()).unwrap();
        assert_eq!(
            detail.account_keys,
            vec!["wallet", "counterparty", "lookupW", "lookupR"]
        );
        assert_eq!(detail.slot, 250_000_000);
        assert_eq!(detail.block_time, Some(1_700_000_000));
        assert!(detail.err.is_none());
        assert_eq!(detail.pre_token_balances[0].ui_amount, Some(5.0));
        assert_eq!(detail.post_token_balances[1].ui_amount, None);
    }

    #[test]
    fn test_parse_transaction_keeps_error_and_parsed_keys() {
        let payload = json!({
            "slot": 1,
            "blockTime": null,
            "meta": {"err": {"InstructionError": [0, {"Custom": 1}]}, "preTokenBalances": null, "postTokenBalances": null},
            "transaction": {"message": {"accountKeys": [{"pubkey": "wallet", "signer": true, "writable": true}]}}
        });

        let detail = parse_transaction("sig", payload).unwrap();
        assert_eq!(detail.account_keys, vec!["wallet"]);
        assert!(detail.err.unwrap().contains("InstructionError"));
        assert!(detail.pre_token_balances.is_empty());
    }

    #[test]
    fn test_parse_transaction_without_meta() {
        let payload = json!({
            "slot": 7,
            "meta": null,
            "transaction": {"message": {"accountKeys": ["wallet"]}}
        });
        let detail = parse_transaction("sig", payload).unwrap();
        assert!(detail.pre_token_balances.is_empty());
        assert!(detail.post_token_balances.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_get_transaction()
            .withf(|sig, level, version| sig == "sig1" && *level == ConfirmationLevel::Confirmed && *version == 0)
            .times(1)
            .returning(|_, _, _| Ok(Some(sample_payload())));

        let detail = fetcher(rpc).fetch("sig1").await.unwrap();
        assert_eq!(detail.signature, "sig1");
        assert_eq!(detail.post_token_balances.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_null_is_not_found() {
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_get_transaction().returning(|_, _, _| Ok(None));

        let err = fetcher(rpc).fetch("sig1").await.unwrap_err();
        assert!(matches!(err, MonitorError::NotFound { ref signature } if signature == "sig1"));
    }

    #[tokio::test]
    async fn test_fetch_transport_error_is_unavailable() {
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_get_transaction()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));

        let err = fetcher(rpc).fetch("sig1").await.unwrap_err();
        assert!(matches!(err, MonitorError::RpcUnavailable { operation: "getTransaction", .. }));
    }

    #[tokio::test]
    async fn test_fetch_garbage_is_malformed() {
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_get_transaction()
            .returning(|_, _, _| Ok(Some(json!({"slot": "not-a-number"}))));

        let err = fetcher(rpc).fetch("sig1").await.unwrap_err();
        assert!(matches!(err, MonitorError::MalformedResponse { .. }));
        assert!(!err.is_retryable());
    }
}
