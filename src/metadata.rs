pub mod document;
mod error;
pub mod lkg;
pub mod manager;
pub mod retriever;

pub use document::{IssuerMetadata, IssuerMetadataRetriever};
pub use error::MetadataError;
pub use lkg::{LkgConfigurationManager, TrustConfiguration};
pub use manager::ConfigurationManager;
pub use retriever::{
    ConfigurationRetriever, DocumentRetriever, FileDocumentRetriever, HttpDocumentRetriever,
    StaticDocumentRetriever,
};
