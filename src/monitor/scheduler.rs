//! AddressMonitor - the per-address poll loop
//!
//! Each watched address gets its own `AddressMonitor`. A tick lists recent
//! signatures, filters out the ones already processed, then fetches, diffs,
//! enriches and emits each new transaction oldest-first. The tracker moves past
//! a signature only once all of its events were handed to the sink.
//!
//! Errors never leave the loop: a failed tick is logged and followed by a
//! cooldown that grows with consecutive failures. Only the cancellation token
//! stops the loop.

use crate::monitor::balance_differ::BalanceDiffer;
use crate::monitor::config::{GapPolicy, MonitorConfig};
use crate::monitor::error::MonitorError;
use crate::monitor::event_sink::EventSink;
use crate::monitor::rate_limit::RequestThrottle;
use crate::monitor::rpc::{LedgerRpc, TokenMetadataSource};
use crate::monitor::signature_tracker::SignatureTracker;
use crate::monitor::token_info::TokenInfoResolver;
use crate::monitor::tracker_store::TrackerStore;
use crate::monitor::transaction_fetcher::TransactionFetcher;
use crate::types::{Address, SignatureInfo};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Where an address loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Between ticks, about to list signatures
    Idle,
    /// Waiting on the signature listing (and backfill pages)
    FetchingSignatures,
    /// Cutting the listing at the last processed signature
    Filtering,
    /// Fetching, diffing and emitting unseen transactions
    Processing,
    /// Waiting out the poll, idle or error interval
    Sleeping,
    /// Cancelled; terminal
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "IDLE",
            MonitorState::FetchingSignatures => "FETCHING_SIGNATURES",
            MonitorState::Filtering => "FILTERING",
            MonitorState::Processing => "PROCESSING",
            MonitorState::Sleeping => "SLEEPING",
            MonitorState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Signatures returned by the listing (all pages)
    pub listed: usize,
    /// Signatures that were new
    pub unseen: usize,
    /// Signatures fully processed and committed
    pub processed: usize,
    /// Malformed transactions skipped and committed
    pub skipped: usize,
    /// Events handed to the sink
    pub events_emitted: usize,
    /// A signature was not visible yet; the rest of the batch waits for the next tick
    pub deferred: bool,
    /// The listing did not reach the last processed signature
    pub gap_overrun: bool,
    /// Cancellation interrupted the batch
    pub cancelled: bool,
}

/// Shared pieces every address loop is built from.
#[derive(Clone)]
pub struct MonitorContext {
    pub config: Arc<MonitorConfig>,
    pub rpc: Arc<dyn LedgerRpc>,
    pub resolver: TokenInfoResolver,
    pub sink: Arc<dyn EventSink>,
    pub store: Arc<dyn TrackerStore>,
    pub throttle: Arc<RequestThrottle>,
    pub cancel: CancellationToken,
}

impl MonitorContext {
    /// Build a context, creating the token cache from the configured capacity.
    pub fn new(
        config: Arc<MonitorConfig>,
        rpc: Arc<dyn LedgerRpc>,
        metadata: Arc<dyn TokenMetadataSource>,
        sink: Arc<dyn EventSink>,
        store: Arc<dyn TrackerStore>,
        throttle: Arc<RequestThrottle>,
        cancel: CancellationToken,
    ) -> Self {
        let resolver = TokenInfoResolver::new(metadata, config.token_cache_capacity);
        Self {
            config,
            rpc,
            resolver,
            sink,
            store,
            throttle,
            cancel,
        }
    }
}

/// Poll loop for one watched address.
pub struct AddressMonitor {
    address: Address,
    config: Arc<MonitorConfig>,
    rpc: Arc<dyn LedgerRpc>,
    fetcher: TransactionFetcher,
    differ: BalanceDiffer,
    resolver: TokenInfoResolver,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn TrackerStore>,
    throttle: Arc<RequestThrottle>,
    tracker: SignatureTracker,
    state: MonitorState,
    consecutive_failures: u32,
    /// Ticks each pending signature came back not found
    not_found_attempts: HashMap<String, u32>,
    cancel: CancellationToken,
}

impl AddressMonitor {
    pub fn new(address: Address, context: MonitorContext) -> Self {
        let config = context.config;
        let fetcher = TransactionFetcher::new(
            context.rpc.clone(),
            context.throttle.clone(),
            config.confirmation_level,
            config.max_supported_transaction_version,
        );

        Self {
            address,
            differ: BalanceDiffer::new(config.include_self),
            rpc: context.rpc,
            fetcher,
            resolver: context.resolver,
            sink: context.sink,
            store: context.store,
            throttle: context.throttle,
            tracker: SignatureTracker::new(),
            state: MonitorState::Idle,
            consecutive_failures: 0,
            not_found_attempts: HashMap::new(),
            cancel: context.cancel,
            config,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn tracker(&self) -> &SignatureTracker {
        &self.tracker
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!(address = %self.address, from = %self.state, to = %next, "State change");
            self.state = next;
        }
    }

    /// Seed the tracker from the store.
    pub async fn restore(&mut self) -> anyhow::Result<()> {
        if let Some(state) = self.store.load(&self.address).await? {
            info!(
                address = %self.address,
                signature = ?state.last_processed_signature,
                "Resuming after last processed signature"
            );
            self.tracker.seed(&self.address, state);
        }
        Ok(())
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!(address = %self.address, "Started monitoring wallet");

        if let Err(e) = self.restore().await {
            warn!(address = %self.address, "Could not restore tracker state, starting fresh: {:#}", e);
        }

        let cancel = self.cancel.clone();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.step() => next,
            };
            let Some(delay) = next else {
                break;
            };

            self.transition(MonitorState::Sleeping);
            if !self.pause(delay).await {
                break;
            }
            self.transition(MonitorState::Idle);
        }

        self.transition(MonitorState::Stopped);
        info!(address = %self.address, "Stopped monitoring wallet");
    }

    /// Run one tick and absorb its outcome.
    ///
    /// Returns how long to sleep before the next tick, or `None` when the tick
    /// was cut short by cancellation. A failed tick never ends the loop.
    pub async fn step(&mut self) -> Option<Duration> {
        match self.tick().await {
            Ok(report) => {
                self.consecutive_failures = 0;
                if report.cancelled {
                    return None;
                }
                if report.listed == 0 {
                    Some(self.config.idle_interval())
                } else {
                    Some(self.config.poll_interval())
                }
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let delay = self.error_cooldown();
                error!(
                    address = %self.address,
                    failures = self.consecutive_failures,
                    cooldown_ms = delay.as_millis() as u64,
                    "Error in monitoring loop: {}",
                    e
                );
                Some(delay)
            }
        }
    }

    /// Failed ticks since the last good one.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// One pass: list, filter, then process new signatures oldest-first.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn tick(&mut self) -> Result<TickReport, MonitorError> {
        let mut report = TickReport::default();
        let page_size = self.config.signature_page_size;

        self.transition(MonitorState::FetchingSignatures);
        let mut listing = self.list_signatures(None).await?;
        report.listed = listing.len();

        if listing.is_empty() {
            info!("get_signatures_for_address returned no transactions");
            self.transition(MonitorState::Idle);
            return Ok(report);
        }

        self.transition(MonitorState::Filtering);
        if self.tracker.is_gap_overrun(&self.address, &listing, page_size) {
            report.gap_overrun = true;
            let pages = match self.config.gap_policy {
                GapPolicy::Warn => 1,
                GapPolicy::Backfill => self.backfill(&mut listing).await?,
            };
            report.listed = listing.len();

            if !self.tracker.reaches_last_processed(&self.address, &listing) {
                let err = MonitorError::GapOverrun {
                    address: self.address.clone(),
                    last_processed: self.tracker.last_processed(&self.address).unwrap_or_default().to_string(),
                    page_size,
                    pages,
                };
                warn!(error = %err, "Data completeness warning");
            }
        }

        let unseen = self.tracker.filter_unseen(&self.address, &listing);
        report.unseen = unseen.len();
        debug!("{} of {} listed signatures are new", unseen.len(), listing.len());

        self.transition(MonitorState::Processing);
        for info in unseen {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.process_signature(&info).await {
                Ok(emitted) => {
                    self.not_found_attempts.remove(&info.signature);
                    report.processed += 1;
                    report.events_emitted += emitted;
                }
                Err(err @ MonitorError::NotFound { .. }) => {
                    let attempts = self.not_found_attempts.entry(info.signature.clone()).or_insert(0);
                    *attempts += 1;
                    let attempts = *attempts;

                    if attempts < self.config.max_not_found_retries {
                        info!(signature = %info.signature, attempts, "Transaction not visible yet, retrying next tick");
                        report.deferred = true;
                        break;
                    }

                    warn!(error = %err, attempts, "Transaction never became visible, skipping");
                    self.not_found_attempts.remove(&info.signature);
                    self.commit(&info).await;
                    report.skipped += 1;
                }
                Err(err @ MonitorError::MalformedResponse { .. }) => {
                    warn!(error = %err, "Skipping transaction");
                    self.commit(&info).await;
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }

            if !self.pause(self.config.per_transaction_delay()).await {
                report.cancelled = true;
                break;
            }
        }

        Ok(report)
    }

    /// Fetch, diff, enrich and emit one signature, then commit it.
    async fn process_signature(&mut self, info: &SignatureInfo) -> Result<usize, MonitorError> {
        if let Some(err) = &info.err {
            debug!(signature = %info.signature, %err, "Transaction failed on-chain, nothing to diff");
            self.commit(info).await;
            return Ok(0);
        }

        let detail = self.fetcher.fetch(&info.signature).await?;
        let events = self.differ.diff(&detail, &self.address);
        let emitted = events.len();

        for event in events {
            let token = self.resolver.resolve(&event.mint).await;
            self.sink.emit(event.with_token_info(token)).await;
        }

        if emitted > 0 {
            info!(signature = %info.signature, "transfers: {}", emitted);
        }

        self.commit(info).await;
        Ok(emitted)
    }

    async fn commit(&mut self, info: &SignatureInfo) {
        if !self.tracker.advance(&self.address, info) {
            return;
        }

        let Some(state) = self.tracker.state(&self.address).cloned() else {
            return;
        };
        if let Err(e) = self.store.save(&self.address, &state).await {
            warn!(address = %self.address, signature = %info.signature, "Failed to persist tracker state: {:#}", e);
        }
    }

    /// List one page of signatures, retrying transport failures with backoff.
    async fn list_signatures(&self, before: Option<String>) -> Result<Vec<SignatureInfo>, MonitorError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.rpc_retry_base_ms.max(1))
            .max_delay(self.config.max_error_cooldown())
            .map(jitter)
            .take(self.config.rpc_retry_attempts);

        Retry::spawn(strategy, || self.list_signatures_once(before.clone()))
            .await
            .map_err(|source| MonitorError::RpcUnavailable {
                operation: "getSignaturesForAddress",
                source,
            })
    }

    async fn list_signatures_once(&self, before: Option<String>) -> anyhow::Result<Vec<SignatureInfo>> {
        self.throttle.acquire().await;

        let result = self
            .rpc
            .get_signatures_for_address(
                &self.address,
                self.config.signature_page_size,
                self.config.confirmation_level,
                before,
            )
            .await;

        match &result {
            Ok(_) => self.throttle.record_success(),
            Err(e) => {
                self.throttle.record_failure();
                debug!(address = %self.address, "Signature listing failed: {:#}", e);
            }
        }
        result
    }

    /// Page older signatures onto `listing` until the tracked signature shows up.
    /// Returns how many pages the listing now spans.
    async fn backfill(&mut self, listing: &mut Vec<SignatureInfo>) -> Result<usize, MonitorError> {
        let page_size = self.config.signature_page_size;
        let mut pages = 1;

        while pages <= self.config.backfill_max_pages {
            if self.tracker.reaches_last_processed(&self.address, listing) {
                break;
            }
            let Some(oldest) = listing.last().map(|info| info.signature.clone()) else {
                break;
            };

            let older = self.list_signatures(Some(oldest)).await?;
            let exhausted = older.len() < page_size;
            debug!(page = pages + 1, count = older.len(), "Backfilled signature page");
            listing.extend(older);
            pages += 1;

            if exhausted {
                break;
            }
        }

        Ok(pages)
    }

    /// Cooldown after the current run of failed ticks, with up to 25% jitter.
    fn error_cooldown(&self) -> Duration {
        let base = backoff_delay(
            self.consecutive_failures,
            self.config.error_cooldown(),
            self.config.max_error_cooldown(),
        );
        let jitter_ms = (base.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Sleep for `duration` unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Exponential backoff: `base * 2^(failures - 1)`, capped at `max`.
pub fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (failures - 1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}
