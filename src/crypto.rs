mod digest;
mod errors;
pub mod rsa;

pub use digest::{DigestContext, HashAlg};
pub use errors::Error;

pub type CryptoResult<T> = Result<T, Error>;
