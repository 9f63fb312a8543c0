//! WalletMonitor - runs one poll loop per watched address
//!
//! The address loops share the RPC client, the request throttle and the token
//! info cache. They run as tasks in one `JoinSet` and stop together when the
//! cancellation token fires.

use crate::monitor::config::MonitorConfig;
use crate::monitor::error::ConfigError;
use crate::monitor::event_sink::EventSink;
use crate::monitor::rate_limit::RequestThrottle;
use crate::monitor::rpc::{LedgerRpc, SolanaLedgerRpc, SolanaTokenMetadata, TokenMetadataSource};
use crate::monitor::scheduler::{AddressMonitor, MonitorContext};
use crate::monitor::tracker_store::{MemoryTrackerStore, SqliteTrackerStore, TrackerStore};
use crate::types::Address;
use anyhow::Result;
use nonempty::NonEmpty;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct WalletMonitor {
    config: Arc<MonitorConfig>,
    addresses: NonEmpty<Address>,
    rpc: Arc<dyn LedgerRpc>,
    metadata: Arc<dyn TokenMetadataSource>,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn TrackerStore>,
    throttle: Arc<RequestThrottle>,
}

impl WalletMonitor {
    /// Validate `config` and assemble a monitor from explicit collaborators.
    pub fn new(
        config: MonitorConfig,
        rpc: Arc<dyn LedgerRpc>,
        metadata: Arc<dyn TokenMetadataSource>,
        sink: Arc<dyn EventSink>,
        store: Arc<dyn TrackerStore>,
    ) -> Result<Self, ConfigError> {
        let addresses = config.validate()?;
        let throttle = Arc::new(RequestThrottle::new(config.rate_limit_requests_per_second));
        Ok(Self {
            config: Arc::new(config),
            addresses,
            rpc,
            metadata,
            sink,
            store,
            throttle,
        })
    }

    /// Build a monitor against the configured Solana RPC node.
    pub async fn connect(config: MonitorConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let addresses = config.validate()?;

        let ledger = SolanaLedgerRpc::new(
            &config.rpc_endpoint_url,
            config.rpc_timeout(),
            config.confirmation_level,
        );
        let throttle = Arc::new(RequestThrottle::new(config.rate_limit_requests_per_second));
        let metadata = Arc::new(SolanaTokenMetadata::new(
            ledger.client(),
            throttle.clone(),
            config.confirmation_level,
        ));

        let store: Arc<dyn TrackerStore> = match &config.tracker_db_path {
            Some(path) => SqliteTrackerStore::open(path).await? as Arc<dyn TrackerStore>,
            None => Arc::new(MemoryTrackerStore::new()),
        };

        info!(
            endpoint = %config.rpc_endpoint_url,
            addresses = addresses.len(),
            commitment = ?config.confirmation_level,
            "Connected wallet monitor"
        );

        Ok(Self {
            config: Arc::new(config),
            addresses,
            rpc: Arc::new(ledger),
            metadata,
            sink,
            store,
            throttle,
        })
    }

    pub fn addresses(&self) -> &NonEmpty<Address> {
        &self.addresses
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run every address loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.include_self {
            warn!("include_self is off: balance changes of the watched wallets' own key are not reported");
        }

        let context = MonitorContext::new(
            self.config.clone(),
            self.rpc.clone(),
            self.metadata.clone(),
            self.sink.clone(),
            self.store.clone(),
            self.throttle.clone(),
            cancel.clone(),
        );

        let mut tasks = JoinSet::new();
        for address in self.addresses.iter() {
            let monitor = AddressMonitor::new(address.clone(), context.clone());
            tasks.spawn(monitor.run());
        }
        info!("Monitoring {} wallet(s)", self.addresses.len());

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Address monitor panicked: {}", e);
                    cancel.cancel();
                }
            }
        }

        let stats = self.throttle.stats();
        info!(
            current_quota = stats.current_quota,
            samples = stats.samples,
            "Wallet monitor stopped"
        );
    }
}
