//! TokenInfoResolver - cached, best-effort mint -> symbol lookup

use crate::monitor::error::MonitorError;
use crate::monitor::rpc::TokenMetadataSource;
use crate::types::TokenInfo;
use moka::future::Cache;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves token metadata through a bounded cache.
///
/// Lookup failures resolve to `UNKNOWN` and are cached like successes, so a
/// broken mint is queried once per cache lifetime. Clones share the cache.
#[derive(Clone)]
pub struct TokenInfoResolver {
    source: Arc<dyn TokenMetadataSource>,
    cache: Cache<String, TokenInfo>,
}

impl TokenInfoResolver {
    pub fn new(source: Arc<dyn TokenMetadataSource>, max_entries: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_entries.max(1)).build();
        Self { source, cache }
    }

    /// Resolve `mint`. Never fails.
    pub async fn resolve(&self, mint: &str) -> TokenInfo {
        let source = self.source.clone();
        let key = mint.to_string();

        self.cache
            .get_with(key.clone(), async move {
                match source.resolve_token_info(&key).await {
                    Ok(info) => {
                        debug!(mint = %key, symbol = %info.symbol, "Resolved token info");
                        info
                    }
                    Err(e) => {
                        let err = MonitorError::MetadataLookupFailed {
                            mint: key.clone(),
                            source: e,
                        };
                        warn!(error = %err, "Using UNKNOWN symbol");
                        TokenInfo::unknown(&key)
                    }
                }
            })
            .await
    }

    /// Cached value for `mint`, without querying the source.
    pub async fn cached(&self, mint: &str) -> Option<TokenInfo> {
        self.cache.get(mint).await
    }
}
