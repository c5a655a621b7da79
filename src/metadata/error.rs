use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// No configuration is available at all: the retrieval failed and there
    /// is no cached document to fall back to. Fatal to the caller.
    #[error("no trust configuration available from '{address}': {reason}")]
    NoConfiguration { address: String, reason: String },

    /// A retrieval attempt failed. Absorbed by the cache manager whenever a
    /// previously fetched configuration can still be served.
    #[error("failed to retrieve trust configuration from '{address}': {reason}")]
    Retrieval { address: String, reason: String },

    /// The fetched document could not be understood as a configuration.
    #[error("metadata document rejected: {0}")]
    Parse(String),

    /// The caller's cancellation signal fired while waiting. Shared cache
    /// state is never affected.
    #[error("configuration retrieval was cancelled")]
    Cancelled,
}
