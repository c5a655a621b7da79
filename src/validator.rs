use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dsig;
use crate::metadata::{IssuerMetadata, LkgConfigurationManager, MetadataError};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("token signature rejected: {0}")]
    Signature(#[from] dsig::Error),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Validates incoming tokens against the currently trusted signing keys.
///
/// Each validation asks the configuration manager for the active trust
/// configuration, then drives the signature layer. A signature that fails
/// against the current keys requests an early metadata refresh, since a key
/// rollover at the issuer looks exactly like this; promotion of a
/// configuration to last-known-good stays an explicit, separate call.
pub struct TokenValidator {
    metadata: Arc<LkgConfigurationManager<IssuerMetadata>>,
}

impl TokenValidator {
    pub fn new(metadata: Arc<LkgConfigurationManager<IssuerMetadata>>) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &Arc<LkgConfigurationManager<IssuerMetadata>> {
        &self.metadata
    }

    /// Validate the signature on `token_xml`. On success the configuration
    /// that vouched for it is returned, so the caller can decide whether to
    /// promote it via [`promote_last_known_good`](Self::promote_last_known_good).
    pub async fn validate(
        &self,
        token_xml: &str,
        cancellation: &CancellationToken,
    ) -> Result<Arc<IssuerMetadata>, ValidationError> {
        let configuration = self.metadata.get_configuration(cancellation).await?;
        let keys = configuration.verification_keys()?;

        match dsig::verify_token(token_xml, &keys) {
            Ok(()) => {
                debug!(entity_id = %configuration.entity_id, "token signature accepted");
                Ok(configuration)
            }
            Err(error) => {
                if matches!(error, dsig::Error::Verification(_)) {
                    warn!(
                        entity_id = %configuration.entity_id,
                        error = %error,
                        thumbprints = ?configuration.key_thumbprints().unwrap_or_default(),
                        "token rejected against current keys, requesting early metadata refresh"
                    );
                    self.metadata.request_refresh().await;
                }
                Err(error.into())
            }
        }
    }

    /// Mark the currently cached configuration as last-known-good. Callers
    /// invoke this after a validation they trust succeeded.
    pub async fn promote_last_known_good(&self) -> Result<(), MetadataError> {
        self.metadata.set_lkg().await
    }
}
