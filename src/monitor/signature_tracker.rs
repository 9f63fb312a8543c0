//! SignatureTracker - remembers the last processed signature per watched address
//!
//! The ledger lists signatures newest-first. The tracker cuts each listing at the
//! last processed signature and hands back what is left in chronological order.
//! State only moves when `advance` is called, which the scheduler does after a
//! transaction's events were emitted, so a crash re-delivers instead of losing.

use crate::types::{Address, SignatureInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-address progress marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Newest signature whose events were all emitted
    pub last_processed_signature: Option<String>,
    /// Slot of that signature; the tracker never moves to a lower one
    pub last_processed_slot: Option<u64>,
}

impl TrackerState {
    pub fn new(signature: impl Into<String>, slot: u64) -> Self {
        Self {
            last_processed_signature: Some(signature.into()),
            last_processed_slot: Some(slot),
        }
    }
}

/// Tracks which signatures have already been processed for each address.
#[derive(Debug, Default)]
pub struct SignatureTracker {
    states: HashMap<Address, TrackerState>,
}

impl SignatureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore state loaded from a tracker store.
    pub fn seed(&mut self, address: &str, state: TrackerState) {
        debug!(address, signature = ?state.last_processed_signature, "Seeded tracker state");
        self.states.insert(address.to_string(), state);
    }

    pub fn state(&self, address: &str) -> Option<&TrackerState> {
        self.states.get(address)
    }

    pub fn last_processed(&self, address: &str) -> Option<&str> {
        self.states
            .get(address)
            .and_then(|state| state.last_processed_signature.as_deref())
    }

    /// Return the signatures newer than the last processed one, oldest first.
    ///
    /// When the last processed signature is not in the listing (first run, or more
    /// transactions happened than one page holds) the whole listing is unseen.
    pub fn filter_unseen(&self, address: &str, newest_first: &[SignatureInfo]) -> Vec<SignatureInfo> {
        let last = self.last_processed(address);

        let mut unseen: Vec<SignatureInfo> = newest_first
            .iter()
            .take_while(|info| Some(info.signature.as_str()) != last)
            .cloned()
            .collect();
        unseen.reverse();
        unseen
    }

    /// True when a full page was listed and none of it reaches the last processed signature.
    pub fn is_gap_overrun(&self, address: &str, newest_first: &[SignatureInfo], page_size: usize) -> bool {
        let Some(last) = self.last_processed(address) else {
            return false;
        };

        newest_first.len() >= page_size && !newest_first.iter().any(|info| info.signature == last)
    }

    /// Whether the listing contains the last processed signature.
    pub fn reaches_last_processed(&self, address: &str, newest_first: &[SignatureInfo]) -> bool {
        match self.last_processed(address) {
            Some(last) => newest_first.iter().any(|info| info.signature == last),
            None => false,
        }
    }

    /// Mark `info` as processed. Returns false when it would move the tracker backwards.
    pub fn advance(&mut self, address: &str, info: &SignatureInfo) -> bool {
        let state = self.states.entry(address.to_string()).or_default();

        if let Some(current_slot) = state.last_processed_slot {
            if info.slot < current_slot {
                warn!(
                    address,
                    signature = %info.signature,
                    slot = info.slot,
                    current_slot,
                    "Refusing to move tracker to an older signature"
                );
                return false;
            }
        }

        state.last_processed_signature = Some(info.signature.clone());
        state.last_processed_slot = Some(info.slot);
        true
    }
}
