pub mod c14n;
mod error;
mod extract;
pub mod reference;
pub mod signed_info;
pub mod signer;
pub mod verifier;

pub use error::Error;
pub use reference::{DigestAlgorithm, Reference};
pub use signed_info::{CanonicalizationKind, SignedInfo};
pub use signer::sign_token;
pub use verifier::verify_token;

pub type Result<T> = std::result::Result<T, Error>;

// Algorithm URIs per XML-DSig and Exclusive C14N
pub mod algorithms {
    // Digest algorithms
    pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
    pub const SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
    pub const SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

    // Signature algorithms
    pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
    pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

    // Canonicalization algorithms
    pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
    pub const EXCLUSIVE_C14N_WITH_COMMENTS: &str =
        "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
}

// Namespaces
pub mod ns {
    pub const DS: &str = "http://www.w3.org/2000/09/xmldsig#";
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
}
