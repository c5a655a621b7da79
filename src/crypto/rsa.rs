use openssl::pkey::{Id, PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;

use crate::crypto::errors::Error;
use crate::crypto::{CryptoResult, HashAlg};

/// An RSA public key used for signature verification
#[derive(Debug, Clone)]
pub struct RsaPublicKey {
    key: PKey<Public>,
}

impl RsaPublicKey {
    /// Parse a DER-encoded SubjectPublicKeyInfo structure
    pub fn from_spki_der(der: &[u8]) -> CryptoResult<Self> {
        let key = PKey::public_key_from_der(der)?;
        Self::from_pkey(key)
    }

    /// Extract the subject public key from a DER-encoded X.509 certificate
    pub fn from_certificate_der(der: &[u8]) -> CryptoResult<Self> {
        let certificate = X509::from_der(der)?;
        Self::from_pkey(certificate.public_key()?)
    }

    fn from_pkey(key: PKey<Public>) -> CryptoResult<Self> {
        if key.id() != Id::RSA {
            return Err(Error::Invalid("public key is not an RSA key".into()));
        }
        Ok(Self { key })
    }

    /// Key size in bits
    pub fn bits(&self) -> u32 {
        self.key.bits()
    }
}

/// An RSA private key used for signing
#[derive(Clone)]
pub struct RsaPrivateKey {
    key: PKey<Private>,
}

impl RsaPrivateKey {
    /// Generate a fresh key pair with the given modulus size
    pub fn generate(bits: u32) -> CryptoResult<Self> {
        let rsa = Rsa::generate(bits)?;
        Ok(Self {
            key: PKey::from_rsa(rsa)?,
        })
    }

    /// Parse a DER-encoded private key
    pub fn from_der(der: &[u8]) -> CryptoResult<Self> {
        let key = PKey::private_key_from_der(der)?;
        if key.id() != Id::RSA {
            return Err(Error::Invalid("private key is not an RSA key".into()));
        }
        Ok(Self { key })
    }

    /// The corresponding public key
    pub fn public_key(&self) -> CryptoResult<RsaPublicKey> {
        RsaPublicKey::from_spki_der(&self.key.public_key_to_der()?)
    }
}

/// Sign `data` with RSA PKCS#1 v1.5 over the given hash
pub fn sign(key: &RsaPrivateKey, data: &[u8], hash: HashAlg) -> CryptoResult<Vec<u8>> {
    let mut signer = Signer::new(hash.into(), &key.key)?;
    Ok(signer.sign_oneshot_to_vec(data)?)
}

/// Verify an RSA PKCS#1 v1.5 signature over `data`
pub fn verify(
    key: &RsaPublicKey,
    data: &[u8],
    signature: &[u8],
    hash: HashAlg,
) -> CryptoResult<bool> {
    let mut verifier = Verifier::new(hash.into(), &key.key)?;
    Ok(verifier.verify_oneshot(signature, data)?)
}
