use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::{HashAlg, rsa::RsaPublicKey};
use crate::metadata::TrustConfiguration;
use crate::metadata::error::MetadataError;
use crate::metadata::retriever::{ConfigurationRetriever, DocumentRetriever};

/// Trust configuration for one token issuer: the entity id plus the signing
/// certificates published in its federation metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerMetadata {
    #[serde(rename = "@entityID")]
    pub entity_id: String,

    #[serde(rename = "@validUntil", skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    #[serde(rename = "KeyDescriptor", default)]
    pub key_descriptors: Vec<KeyDescriptor>,

    #[serde(skip)]
    last_known_good: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDescriptor {
    #[serde(rename = "@use", skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    #[serde(rename = "KeyInfo")]
    pub key_info: KeyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "X509Data")]
    pub x509_data: X509Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X509Data {
    #[serde(rename = "X509Certificate", default)]
    pub certificates: Vec<String>,
}

impl IssuerMetadata {
    pub fn parse(xml: &str) -> Result<Self, MetadataError> {
        quick_xml::de::from_str(xml).map_err(|e| MetadataError::Parse(e.to_string()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|valid_until| now > valid_until)
    }

    /// DER bytes of every certificate usable for signature verification:
    /// descriptors marked `use="signing"` or carrying no use at all.
    pub fn signing_certificates(&self) -> Result<Vec<Vec<u8>>, MetadataError> {
        let mut certificates = Vec::new();
        for descriptor in &self.key_descriptors {
            if let Some(usage) = &descriptor.usage
                && usage != "signing"
            {
                continue;
            }
            for encoded in &descriptor.key_info.x509_data.certificates {
                let compact: String = encoded.split_whitespace().collect();
                let der = BASE64.decode(compact).map_err(|e| {
                    MetadataError::Parse(format!("invalid X509Certificate encoding: {e}"))
                })?;
                certificates.push(der);
            }
        }
        Ok(certificates)
    }

    /// Public keys extracted from the signing certificates. Certificates
    /// whose key cannot be used are skipped; a document yielding no usable
    /// key at all is an error.
    pub fn verification_keys(&self) -> Result<Vec<RsaPublicKey>, MetadataError> {
        let mut keys = Vec::new();
        for der in self.signing_certificates()? {
            match RsaPublicKey::from_certificate_der(&der) {
                Ok(key) => keys.push(key),
                Err(error) => {
                    warn!(entity_id = %self.entity_id, error = %error, "skipping signing certificate with unusable key");
                }
            }
        }
        if keys.is_empty() {
            return Err(MetadataError::Parse(format!(
                "metadata for '{}' contains no usable signing key",
                self.entity_id
            )));
        }
        Ok(keys)
    }

    /// SHA-1 thumbprints of the signing certificates, for log correlation.
    pub fn key_thumbprints(&self) -> Result<Vec<String>, MetadataError> {
        self.signing_certificates()?
            .iter()
            .map(|der| {
                HashAlg::Sha1
                    .hash(der)
                    .map(hex::encode)
                    .map_err(|e| MetadataError::Parse(e.to_string()))
            })
            .collect()
    }
}

impl TrustConfiguration for IssuerMetadata {
    fn mark_last_known_good(&mut self) {
        self.last_known_good = true;
    }

    fn is_last_known_good(&self) -> bool {
        self.last_known_good
    }
}

/// Retrieval strategy producing [`IssuerMetadata`] from a fetched document.
pub struct IssuerMetadataRetriever;

#[async_trait]
impl ConfigurationRetriever<IssuerMetadata> for IssuerMetadataRetriever {
    async fn retrieve(
        &self,
        address: &str,
        documents: &dyn DocumentRetriever,
    ) -> Result<IssuerMetadata, MetadataError> {
        let bytes = documents.fetch(address).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| MetadataError::Parse(format!("metadata document is not UTF-8: {e}")))?;
        let metadata = IssuerMetadata::parse(&text)?;

        if metadata.entity_id.is_empty() {
            return Err(MetadataError::Parse(
                "metadata document has an empty entityID".to_string(),
            ));
        }
        if metadata.signing_certificates()?.is_empty() {
            return Err(MetadataError::Parse(format!(
                "metadata for '{}' declares no signing certificate",
                metadata.entity_id
            )));
        }
        Ok(metadata)
    }
}
