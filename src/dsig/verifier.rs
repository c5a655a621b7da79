use crate::crypto::{HashAlg, rsa, rsa::RsaPublicKey};
use crate::dsig::signed_info::{SignedInfo, decode_base64};
use crate::dsig::{Error, Result, algorithms, extract};

/// Verify the XML signature carried by `token_xml` against the trusted
/// signing keys.
///
/// The reference digest is checked first and gates everything else: a
/// missing or unverified reference fails the token outright, it is never
/// skipped. The signature itself is then checked over the canonical
/// `SignedInfo` bytes against each key until one verifies.
pub fn verify_token(token_xml: &str, keys: &[RsaPublicKey]) -> Result<()> {
    if keys.is_empty() {
        return Err(Error::Verification(
            "no trusted signing keys available".to_string(),
        ));
    }

    let mut signed_info = SignedInfo::read_from(token_xml)?;

    let signature_value = decode_base64(&extract::text_of(token_xml, "SignatureValue")?)
        .map_err(|e| Error::Structural(format!("invalid SignatureValue: {e}")))?;

    // Resolve and verify the single reference
    let reference_uri = signed_info.reference().uri().to_string();
    let target_id = reference_uri.strip_prefix('#').ok_or_else(|| {
        Error::Structural(format!(
            "reference URI '{reference_uri}' is not a same-document id reference"
        ))
    })?;
    let target = extract::by_id(token_xml, target_id)?;
    signed_info
        .reference_mut()
        .verify_digest(target.slice(token_xml), &target.namespaces)?;
    signed_info.ensure_reference_verified()?;

    let hash = match signed_info.signature_algorithm() {
        algorithms::RSA_SHA256 => HashAlg::Sha256,
        algorithms::RSA_SHA384 => HashAlg::Sha384,
        algorithms::RSA_SHA512 => HashAlg::Sha512,
        other => {
            return Err(Error::UnsupportedAlgorithm(format!(
                "signature algorithm '{other}'"
            )));
        }
    };

    let canonical = signed_info.canonical_bytes()?;
    for key in keys {
        if rsa::verify(key, &canonical, &signature_value, hash)? {
            return Ok(());
        }
    }
    Err(Error::Verification(
        "signature does not verify against any trusted key".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa::RsaPrivateKey;
    use crate::dsig::sign_token;

    fn key_pair() -> (RsaPrivateKey, RsaPublicKey) {
        let key = RsaPrivateKey::generate(2048).unwrap();
        let public = key.public_key().unwrap();
        (key, public)
    }

    #[test]
    fn accepts_a_freshly_signed_token() {
        let (key, public) = key_pair();
        let signed = sign_token(
            "<Token><Claims>alice@example.test</Claims></Token>",
            "Claims",
            &key,
        )
        .unwrap();

        verify_token(&signed, &[public]).unwrap();
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let (key, public) = key_pair();
        let signed = sign_token(
            "<Token><Claims>alice@example.test</Claims></Token>",
            "Claims",
            &key,
        )
        .unwrap();

        let tampered = signed.replace("alice@example.test", "mallory@example.test");
        let err = verify_token(&tampered, &[public]).unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[test]
    fn rejects_an_untrusted_signer() {
        let (key, _) = key_pair();
        let (_, other_public) = key_pair();
        let signed =
            sign_token("<Token><Claims>subject</Claims></Token>", "Claims", &key).unwrap();

        let err = verify_token(&signed, &[other_public]).unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[test]
    fn rejects_with_no_trusted_keys() {
        let (key, _) = key_pair();
        let signed =
            sign_token("<Token><Claims>subject</Claims></Token>", "Claims", &key).unwrap();

        let err = verify_token(&signed, &[]).unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[test]
    fn a_second_reference_never_reaches_digest_checks() {
        let (key, public) = key_pair();
        let signed =
            sign_token("<Token><Claims>subject</Claims></Token>", "Claims", &key).unwrap();

        // Duplicate the Reference element inside SignedInfo
        let reference_start = signed.find("<ds:Reference").unwrap();
        let reference_end = signed.find("</ds:Reference>").unwrap() + "</ds:Reference>".len();
        let reference = &signed[reference_start..reference_end];
        let wrapped = signed.replacen(reference, &format!("{reference}{reference}"), 1);

        let err = verify_token(&wrapped, &[public]).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }
}
