use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::MetadataError;
use super::retriever::{ConfigurationRetriever, DocumentRetriever};

pub const DEFAULT_AUTOMATIC_REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
pub const MINIMUM_AUTOMATIC_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MINIMUM_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

struct CacheState<T> {
    current: Option<Arc<T>>,
    /// Authoritative "do not refetch before" marker, advanced on success by
    /// the automatic interval and on failure by the shorter of the two
    /// intervals so a retry happens sooner without hot-looping.
    sync_after: Instant,
    last_refresh: Instant,
    automatic_refresh_interval: Duration,
    refresh_interval: Duration,
}

/// Caches one remotely fetched configuration document and refreshes it
/// lazily, on caller demand, with a double-checked critical section.
///
/// At most one retrieval is in flight per manager. Callers that find fresh
/// data take the fast path without suspending; callers that queue for the
/// refresh lock re-check freshness after acquiring it. A retrieval failure
/// is absorbed as long as a previously fetched document exists: the stale
/// document keeps being served while retries happen on an accelerated
/// schedule.
pub struct ConfigurationManager<T> {
    metadata_address: String,
    documents: Arc<dyn DocumentRetriever>,
    retriever: Arc<dyn ConfigurationRetriever<T>>,
    state: RwLock<CacheState<T>>,
    refresh_lock: Mutex<()>,
}

impl<T: Send + Sync + 'static> ConfigurationManager<T> {
    pub fn new(
        metadata_address: impl Into<String>,
        documents: Arc<dyn DocumentRetriever>,
        retriever: Arc<dyn ConfigurationRetriever<T>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            metadata_address: metadata_address.into(),
            documents,
            retriever,
            state: RwLock::new(CacheState {
                current: None,
                sync_after: now,
                last_refresh: now,
                automatic_refresh_interval: DEFAULT_AUTOMATIC_REFRESH_INTERVAL,
                refresh_interval: DEFAULT_REFRESH_INTERVAL,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Override the refresh policy at construction. Values below the
    /// supported minimums are clamped.
    pub fn with_intervals(
        mut self,
        automatic_refresh_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        let state = self.state.get_mut();
        state.automatic_refresh_interval =
            automatic_refresh_interval.max(MINIMUM_AUTOMATIC_REFRESH_INTERVAL);
        state.refresh_interval = refresh_interval.max(MINIMUM_REFRESH_INTERVAL);
        self
    }

    pub fn metadata_address(&self) -> &str {
        &self.metadata_address
    }

    /// The currently cached configuration, without triggering a refresh.
    pub async fn current_configuration(&self) -> Option<Arc<T>> {
        self.state.read().await.current.clone()
    }

    pub async fn automatic_refresh_interval(&self) -> Duration {
        self.state.read().await.automatic_refresh_interval
    }

    pub async fn refresh_interval(&self) -> Duration {
        self.state.read().await.refresh_interval
    }

    pub async fn set_automatic_refresh_interval(&self, interval: Duration) {
        self.state.write().await.automatic_refresh_interval =
            interval.max(MINIMUM_AUTOMATIC_REFRESH_INTERVAL);
    }

    pub async fn set_refresh_interval(&self, interval: Duration) {
        self.state.write().await.refresh_interval = interval.max(MINIMUM_REFRESH_INTERVAL);
    }

    /// Get the current trust configuration, fetching or refreshing it when
    /// due.
    ///
    /// `cancellation` aborts only this caller's wait for the refresh lock;
    /// an in-flight retrieval is shared with every queued caller and is
    /// never aborted by one caller's signal.
    pub async fn get_configuration(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Arc<T>, MetadataError> {
        {
            let state = self.state.read().await;
            if let Some(current) = &state.current
                && Instant::now() < state.sync_after
            {
                return Ok(Arc::clone(current));
            }
        }

        let _guard = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(MetadataError::Cancelled),
            guard = self.refresh_lock.lock() => guard,
        };

        // A queued caller may find the refresh already done by the caller
        // that held the lock before it.
        {
            let state = self.state.read().await;
            if let Some(current) = &state.current
                && Instant::now() < state.sync_after
            {
                return Ok(Arc::clone(current));
            }
        }

        let outcome = self
            .retriever
            .retrieve(&self.metadata_address, self.documents.as_ref())
            .await;

        let now = Instant::now();
        let mut state = self.state.write().await;
        match outcome {
            Ok(configuration) => {
                let configuration = Arc::new(configuration);
                state.current = Some(Arc::clone(&configuration));
                state.last_refresh = now;
                state.sync_after = now + state.automatic_refresh_interval;
                info!(address = %self.metadata_address, "trust configuration refreshed");
                Ok(configuration)
            }
            Err(error) => {
                let retry_after = state.automatic_refresh_interval.min(state.refresh_interval);
                state.sync_after = now + retry_after;
                match &state.current {
                    Some(current) => {
                        warn!(
                            address = %self.metadata_address,
                            error = %error,
                            retry_secs = retry_after.as_secs(),
                            "trust configuration refresh failed, serving cached configuration"
                        );
                        Ok(Arc::clone(current))
                    }
                    None => Err(MetadataError::NoConfiguration {
                        address: self.metadata_address.clone(),
                        reason: error.to_string(),
                    }),
                }
            }
        }
    }

    /// Bring the next refresh forward to now, unless a refresh happened
    /// within the last `refresh_interval`. Lets validation failures against
    /// current keys force an early refetch without enabling refresh storms.
    pub async fn request_refresh(&self) {
        let mut state = self.state.write().await;
        let now = Instant::now();
        if now >= state.last_refresh + state.refresh_interval {
            state.sync_after = now;
            state.last_refresh = now;
            debug!(address = %self.metadata_address, "early trust configuration refresh requested");
        }
    }
}
