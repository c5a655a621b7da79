#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed signature structure. Fatal to the current operation and
    /// never retried.
    #[error("malformed signature structure: {0}")]
    Structural(String),

    /// Unrecognized canonicalization, digest or signature algorithm. Never
    /// silently substituted.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Digest or signature mismatch. Fatal to the acceptance decision.
    #[error("signature verification failed: {0}")]
    Verification(String),

    #[error("XML processing error: {0}")]
    Xml(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::Error),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Utf8(err.utf8_error())
    }
}
