use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

use super::error::MetadataError;

/// Fetches the raw bytes of a metadata document from an address.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError>;
}

/// Turns a metadata address plus a document retriever into a typed
/// configuration document.
#[async_trait]
pub trait ConfigurationRetriever<T>: Send + Sync {
    async fn retrieve(
        &self,
        address: &str,
        documents: &dyn DocumentRetriever,
    ) -> Result<T, MetadataError>;
}

/// Default retriever: an outbound HTTP request with an explicit timeout.
pub struct HttpDocumentRetriever {
    client: Client,
}

impl HttpDocumentRetriever {
    /// Returns an error if the HTTP client cannot be initialized
    pub fn new() -> Result<Self, MetadataError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Returns an error if the HTTP client cannot be initialized
    pub fn with_timeout(timeout: Duration) -> Result<Self, MetadataError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            MetadataError::Retrieval {
                address: String::new(),
                reason: format!("HTTP client initialization failed: {e}"),
            }
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentRetriever for HttpDocumentRetriever {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError> {
        let response = self.client.get(address).send().await.map_err(|e| {
            MetadataError::Retrieval {
                address: address.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Retrieval {
                address: address.to_string(),
                reason: format!("HTTP status {status}"),
            });
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| MetadataError::Retrieval {
                address: address.to_string(),
                reason: format!("failed to read response body: {e}"),
            })
    }
}

/// Reads the metadata document from disk, for air-gapped deployments and
/// tests. The configured path wins over the manager's address when set.
pub struct FileDocumentRetriever {
    path: Option<PathBuf>,
}

impl FileDocumentRetriever {
    pub fn new() -> Self {
        Self { path: None }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl Default for FileDocumentRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentRetriever for FileDocumentRetriever {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(address));
        tokio::fs::read(&path)
            .await
            .map_err(|e| MetadataError::Retrieval {
                address: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Serves a fixed document regardless of address.
pub struct StaticDocumentRetriever {
    document: Vec<u8>,
}

impl StaticDocumentRetriever {
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            document: document.into(),
        }
    }
}

#[async_trait]
impl DocumentRetriever for StaticDocumentRetriever {
    async fn fetch(&self, _address: &str) -> Result<Vec<u8>, MetadataError> {
        Ok(self.document.clone())
    }
}
