//! BalanceDiffer - derives transfer events from pre/post token balance snapshots

use crate::types::{TokenBalanceEntry, TransactionDetail, TransferEvent, TransferKind};
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Turns a transaction's token balance snapshots into transfer events.
///
/// With `include_self = false` the watched address's own account row is skipped
/// and changes are read from the other accounts of the transaction. That matches
/// the behavior this monitor has always had; set `include_self` to also diff the
/// wallet's own rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceDiffer {
    include_self: bool,
}

impl BalanceDiffer {
    pub fn new(include_self: bool) -> Self {
        Self { include_self }
    }

    pub fn include_self(&self) -> bool {
        self.include_self
    }

    /// Compute transfer events for `tx`, in ascending account index order.
    ///
    /// If a non-finite amount turns up mid-scan the events collected so far are returned.
    pub fn diff(&self, tx: &TransactionDetail, watched_address: &str) -> Vec<TransferEvent> {
        let mut events = Vec::new();

        if let Some(err) = &tx.err {
            debug!(signature = %tx.signature, %err, "Skipping failed transaction");
            return events;
        }

        if tx.pre_token_balances.is_empty() && tx.post_token_balances.is_empty() {
            return events;
        }

        let pre_by_index = index_balances(tx, &tx.pre_token_balances, "pre");
        let post_by_index = index_balances(tx, &tx.post_token_balances, "post");

        // Mint of the first pre-balance row; without one the mint cannot be told apart
        let mint = tx.pre_token_balances.first().map(|entry| entry.mint.as_str());

        for (idx, account) in tx.account_keys.iter().enumerate() {
            if !self.include_self && account == watched_address {
                continue;
            }

            let pre = pre_by_index.get(&idx).copied().unwrap_or(0.0);
            let post = post_by_index.get(&idx).copied().unwrap_or(0.0);

            if !pre.is_finite() || !post.is_finite() {
                error!(
                    signature = %tx.signature,
                    account_index = idx,
                    pre,
                    post,
                    "Invalid token amount, returning {} event(s) collected so far",
                    events.len()
                );
                return events;
            }

            if pre == post {
                continue;
            }

            let Some(mint) = mint else {
                debug!(
                    signature = %tx.signature,
                    account_index = idx,
                    "Balance changed but no pre-balance entry names a mint"
                );
                continue;
            };

            events.push(TransferEvent {
                signature: tx.signature.clone(),
                watched_address: watched_address.to_string(),
                account: account.clone(),
                mint: mint.to_string(),
                kind: if post > pre { TransferKind::Buy } else { TransferKind::Sell },
                amount: (post - pre).abs(),
                timestamp: tx.block_time,
                symbol: None,
            });
        }

        events
    }
}

fn index_balances(tx: &TransactionDetail, entries: &[TokenBalanceEntry], side: &str) -> HashMap<usize, f64> {
    let mut by_index = HashMap::with_capacity(entries.len());

    for entry in entries {
        if entry.account_index >= tx.account_keys.len() {
            warn!(
                signature = %tx.signature,
                side,
                account_index = entry.account_index,
                account_keys = tx.account_keys.len(),
                "Token balance points past the account keys"
            );
            continue;
        }
        if by_index.contains_key(&entry.account_index) {
            warn!(
                signature = %tx.signature,
                side,
                account_index = entry.account_index,
                "Duplicate token balance entry, keeping the first"
            );
            continue;
        }
        by_index.insert(entry.account_index, entry.ui_amount.unwrap_or(0.0));
    }

    by_index
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "wallet";

    fn balance(account_index: usize, mint: &str, ui_amount: Option<f64>) -> TokenBalanceEntry {
        TokenBalanceEntry {
            account_index,
            mint: mint.to_string(),
            ui_amount,
        }
    }

    fn tx(pre: Vec<TokenBalanceEntry>, post: Vec<TokenBalanceEntry>) -> TransactionDetail {
        TransactionDetail {
            signature: "sig".to_string(),
            slot: 100,
            block_time: Some(1_700_000_000),
            err: None,
            account_keys: vec![
                WALLET.to_string(),
                "counterparty".to_string(),
                "pool".to_string(),
            ],
            pre_token_balances: pre,
            post_token_balances: post,
        }
    }

    #[test]
    fn test_single_buy_on_counterparty() {
        let detail = tx(
            vec![balance(1, "M1", Some(5.0))],
            vec![balance(1, "M1", Some(8.0))],
        );

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].mint, "M1");
        assert_eq!(events[0].kind, TransferKind::Buy);
        assert_eq!(events[0].amount, 3.0);
        assert_eq!(events[0].timestamp, Some(1_700_000_000));
        assert_eq!(events[0].account, "counterparty");
        assert!(events[0].symbol.is_none());
    }

    #[test]
    fn test_failed_transaction_yields_nothing() {
        let mut detail = tx(
            vec![balance(1, "M1", Some(5.0))],
            vec![balance(1, "M1", Some(8.0))],
        );
        detail.err = Some("InstructionError(0, Custom(1))".to_string());

        assert!(BalanceDiffer::default().diff(&detail, WALLET).is_empty());
    }

    #[test]
    fn test_unchanged_balances_yield_nothing() {
        let detail = tx(
            vec![balance(1, "M1", Some(5.0)), balance(2, "M1", Some(1.0))],
            vec![balance(1, "M1", Some(5.0)), balance(2, "M1", Some(1.0))],
        );

        assert!(BalanceDiffer::default().diff(&detail, WALLET).is_empty());
    }

    #[test]
    fn test_empty_snapshots_yield_nothing() {
        assert!(BalanceDiffer::default().diff(&tx(vec![], vec![]), WALLET).is_empty());
    }

    #[test]
    fn test_sell_and_missing_post_entry() {
        let detail = tx(vec![balance(2, "M1", Some(4.5))], vec![]);

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransferKind::Sell);
        assert_eq!(events[0].amount, 4.5);
    }

    #[test]
    fn test_null_ui_amount_is_zero() {
        let detail = tx(
            vec![balance(1, "M1", None)],
            vec![balance(1, "M1", Some(2.0))],
        );

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        assert_eq!(events[0].kind, TransferKind::Buy);
        assert_eq!(events[0].amount, 2.0);
    }

    #[test]
    fn test_watched_row_skipped_unless_included() {
        let detail = tx(
            vec![balance(0, "M1", Some(10.0)), balance(1, "M1", Some(0.0))],
            vec![balance(0, "M1", Some(7.0)), balance(1, "M1", Some(3.0))],
        );

        let counterparty_only = BalanceDiffer::new(false).diff(&detail, WALLET);
        assert_eq!(counterparty_only.len(), 1);
        assert_eq!(counterparty_only[0].account, "counterparty");

        let all = BalanceDiffer::new(true).diff(&detail, WALLET);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].account, WALLET);
        assert_eq!(all[0].kind, TransferKind::Sell);
        assert_eq!(all[1].kind, TransferKind::Buy);
    }

    #[test]
    fn test_mint_comes_from_first_pre_entry() {
        let detail = tx(
            vec![balance(1, "M1", Some(1.0)), balance(2, "M2", Some(1.0))],
            vec![balance(1, "M1", Some(2.0)), balance(2, "M2", Some(5.0))],
        );

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.mint == "M1"));
    }

    #[test]
    fn test_no_pre_entries_means_no_mint() {
        let detail = tx(vec![], vec![balance(1, "M1", Some(2.0))]);
        assert!(BalanceDiffer::default().diff(&detail, WALLET).is_empty());
    }

    #[test]
    fn test_events_in_ascending_index_order() {
        let detail = tx(
            vec![balance(2, "M1", Some(9.0)), balance(1, "M1", Some(1.0))],
            vec![balance(2, "M1", Some(1.0)), balance(1, "M1", Some(9.0))],
        );

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        let accounts: Vec<&str> = events.iter().map(|event| event.account.as_str()).collect();
        assert_eq!(accounts, vec!["counterparty", "pool"]);
    }

    #[test]
    fn test_invalid_amount_returns_partial_result() {
        let detail = tx(
            vec![balance(1, "M1", Some(1.0)), balance(2, "M1", Some(f64::NAN))],
            vec![balance(1, "M1", Some(2.0)), balance(2, "M1", Some(3.0))],
        );

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].account, "counterparty");
    }

    #[test]
    fn test_out_of_range_and_duplicate_entries_are_ignored() {
        let detail = tx(
            vec![
                balance(1, "M1", Some(1.0)),
                balance(1, "M1", Some(50.0)),
                balance(9, "M1", Some(1.0)),
            ],
            vec![balance(1, "M1", Some(4.0))],
        );

        let events = BalanceDiffer::default().diff(&detail, WALLET);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, 3.0);
    }
}
