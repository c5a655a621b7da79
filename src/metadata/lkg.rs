use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::MetadataError;
use super::manager::ConfigurationManager;

/// A configuration document that can carry the last-known-good mark.
pub trait TrustConfiguration: Clone + Send + Sync + 'static {
    fn mark_last_known_good(&mut self);
    fn is_last_known_good(&self) -> bool;
}

/// Overlay over [`ConfigurationManager`] that keeps a separately promoted
/// "known safe" copy of the configuration.
///
/// Freshness is not trust: the promoted copy is populated only by an
/// explicit [`set_lkg`](Self::set_lkg) call, made by a caller after the
/// configuration actually validated a token. A fetch, successful or not,
/// never touches it. The `use_lkg` and `use_current_config` flags, both off
/// by default, let a caller route reads to the promoted copy or to the
/// cached value when fresh fetches or fresh keys are misbehaving.
pub struct LkgConfigurationManager<T: TrustConfiguration> {
    inner: ConfigurationManager<T>,
    lkg: RwLock<Option<Arc<T>>>,
    use_lkg: AtomicBool,
    use_current: AtomicBool,
}

impl<T: TrustConfiguration> LkgConfigurationManager<T> {
    pub fn new(inner: ConfigurationManager<T>) -> Self {
        Self {
            inner,
            lkg: RwLock::new(None),
            use_lkg: AtomicBool::new(false),
            use_current: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &ConfigurationManager<T> {
        &self.inner
    }

    pub async fn get_configuration(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Arc<T>, MetadataError> {
        if self.use_lkg.load(Ordering::Acquire) {
            return self.lkg.read().await.clone().ok_or_else(|| {
                MetadataError::NoConfiguration {
                    address: self.inner.metadata_address().to_string(),
                    reason: "last-known-good configuration requested but never promoted"
                        .to_string(),
                }
            });
        }
        if self.use_current.load(Ordering::Acquire)
            && let Some(current) = self.inner.current_configuration().await
        {
            return Ok(current);
        }
        self.inner.get_configuration(cancellation).await
    }

    /// Promote the most recently fetched configuration to last-known-good.
    /// This is the only way the promoted copy is populated, and the caller
    /// is expected to invoke it only after the configuration validated a
    /// token successfully.
    pub async fn set_lkg(&self) -> Result<(), MetadataError> {
        let Some(current) = self.inner.current_configuration().await else {
            return Err(MetadataError::NoConfiguration {
                address: self.inner.metadata_address().to_string(),
                reason: "no configuration has been fetched to promote".to_string(),
            });
        };
        let mut promoted = (*current).clone();
        promoted.mark_last_known_good();
        *self.lkg.write().await = Some(Arc::new(promoted));
        info!(address = %self.inner.metadata_address(), "configuration promoted to last-known-good");
        Ok(())
    }

    pub async fn lkg_configuration(&self) -> Option<Arc<T>> {
        self.lkg.read().await.clone()
    }

    pub async fn current_configuration(&self) -> Option<Arc<T>> {
        self.inner.current_configuration().await
    }

    pub fn use_lkg(&self) -> bool {
        self.use_lkg.load(Ordering::Acquire)
    }

    pub fn set_use_lkg(&self, enabled: bool) {
        self.use_lkg.store(enabled, Ordering::Release);
        debug!(enabled, "use_lkg flag changed");
    }

    pub fn use_current_config(&self) -> bool {
        self.use_current.load(Ordering::Acquire)
    }

    pub fn set_use_current_config(&self, enabled: bool) {
        self.use_current.store(enabled, Ordering::Release);
        debug!(enabled, "use_current_config flag changed");
    }

    pub async fn request_refresh(&self) {
        self.inner.request_refresh().await;
    }
}
