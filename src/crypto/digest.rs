use openssl::hash::{Hasher, MessageDigest};

use crate::crypto::CryptoResult;

/// Hash algorithms supported for digest and signature operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// SHA-1, retained for certificate thumbprints only
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlg {
    /// Hash the given data in one shot
    pub fn hash(self, data: impl AsRef<[u8]>) -> CryptoResult<Vec<u8>> {
        let mut context = DigestContext::new(self)?;
        context.update(data.as_ref())?;
        context.finish()
    }

    /// Get the output size in bytes
    pub fn output_size(self) -> usize {
        match self {
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }
}

impl From<HashAlg> for MessageDigest {
    fn from(alg: HashAlg) -> Self {
        match alg {
            HashAlg::Sha1 => MessageDigest::sha1(),
            HashAlg::Sha256 => MessageDigest::sha256(),
            HashAlg::Sha384 => MessageDigest::sha384(),
            HashAlg::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// Incremental digest accumulator. Callers stream data in with `update`
/// and close the accumulator with `finish`.
pub struct DigestContext {
    hasher: Hasher,
    algorithm: HashAlg,
}

impl DigestContext {
    pub fn new(algorithm: HashAlg) -> CryptoResult<Self> {
        Ok(Self {
            hasher: Hasher::new(algorithm.into())?,
            algorithm,
        })
    }

    pub fn algorithm(&self) -> HashAlg {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) -> CryptoResult<()> {
        self.hasher.update(data)?;
        Ok(())
    }

    pub fn finish(&mut self) -> CryptoResult<Vec<u8>> {
        Ok(self.hasher.finish()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"attest to these bytes";

        let mut context = DigestContext::new(HashAlg::Sha256).unwrap();
        context.update(&data[..8]).unwrap();
        context.update(&data[8..]).unwrap();
        let incremental = context.finish().unwrap();

        let one_shot = HashAlg::Sha256.hash(data).unwrap();
        assert_eq!(incremental, one_shot);
        assert_eq!(incremental.len(), HashAlg::Sha256.output_size());
    }

    #[test]
    fn known_sha256_vector() {
        let digest = HashAlg::Sha256.hash(b"abc").unwrap();
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
