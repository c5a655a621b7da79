use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use quick_xml::{Reader, Writer};
use quick_xml::events::Event;

use crate::crypto::{DigestContext, HashAlg, rsa, rsa::RsaPrivateKey};
use crate::dsig::reference::{DigestAlgorithm, Reference};
use crate::dsig::signed_info::{CanonicalizationKind, SignedInfo};
use crate::dsig::{Error, Result, algorithms, c14n, extract, ns};

/// Sign the first element named `target` inside `token_xml` and return the
/// document with a `ds:Signature` appended as the last child of the root.
///
/// The target must not be the document root itself: the signature is
/// inserted next to it, and content signed over cannot change afterwards.
pub fn sign_token(token_xml: &str, target: &str, key: &RsaPrivateKey) -> Result<String> {
    let (prepared, target_id) = ensure_id_attribute(token_xml, target)?;

    // Digest the referenced payload in its canonical form
    let span = extract::by_id(&prepared, &target_id)?;
    let canonical = c14n::produce(span.slice(&prepared), false, &[], &span.namespaces)?;
    let mut digest = DigestContext::new(HashAlg::Sha256)?;
    digest.update(&canonical)?;
    let digest_value = digest.finish()?;

    let signed_info = SignedInfo::for_signing(
        None,
        CanonicalizationKind::Exclusive,
        algorithms::RSA_SHA256,
        Reference::new(format!("#{target_id}"), DigestAlgorithm::Sha256, digest_value),
    );

    // Sign the canonical form of the SignedInfo block itself
    let signature_value = rsa::sign(key, &signed_info.canonical_bytes()?, HashAlg::Sha256)?;

    let signature = format!(
        r#"<ds:Signature xmlns:ds="{}">{}<ds:SignatureValue>{}</ds:SignatureValue></ds:Signature>"#,
        ns::DS,
        signed_info.to_xml()?,
        BASE64.encode(&signature_value),
    );

    insert_before_root_close(&prepared, &signature)
}

/// Make sure the first element named `target` carries an id attribute,
/// generating one when absent. Returns the (possibly rewritten) document and
/// the id in effect.
fn ensure_id_attribute(xml: &str, target: &str) -> Result<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut writer = Writer::new(Vec::new());
    let mut found: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if found.is_none() && e.name().local_name().as_ref() == target.as_bytes() => {
                let existing = e
                    .attributes()
                    .filter_map(|a| a.ok())
                    .find(|attr| matches!(attr.key.local_name().as_ref(), b"Id" | b"ID"))
                    .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()));

                match existing {
                    Some(id) => {
                        found = Some(id);
                        writer.write_event(Event::Start(e.to_owned()))?;
                    }
                    None => {
                        let id = format!("signed-{}", uuid::Uuid::new_v4());
                        let mut element = e.to_owned();
                        element.push_attribute(("Id", id.as_str()));
                        found = Some(id);
                        writer.write_event(Event::Start(element))?;
                    }
                }
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    let id = found
        .ok_or_else(|| Error::Structural(format!("element '{target}' not found in token")))?;
    Ok((String::from_utf8(writer.into_inner())?, id))
}

/// Insert an XML fragment immediately before the root element's end tag.
fn insert_before_root_close(xml: &str, fragment: &str) -> Result<String> {
    let position = xml
        .rfind("</")
        .ok_or_else(|| Error::Structural("token has no closing root element".to_string()))?;
    let mut out = String::with_capacity(xml.len() + fragment.len());
    out.push_str(&xml[..position]);
    out.push_str(fragment);
    out.push_str(&xml[position..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_an_id_when_absent() {
        let (doc, id) = ensure_id_attribute("<Token><Claims>x</Claims></Token>", "Claims").unwrap();
        assert!(id.starts_with("signed-"));
        assert!(doc.contains(&format!(r#"<Claims Id="{id}">"#)));
    }

    #[test]
    fn reuses_an_existing_id() {
        let (doc, id) =
            ensure_id_attribute(r#"<Token><Claims Id="c-9">x</Claims></Token>"#, "Claims").unwrap();
        assert_eq!(id, "c-9");
        assert_eq!(doc, r#"<Token><Claims Id="c-9">x</Claims></Token>"#);
    }

    #[test]
    fn missing_target_is_structural() {
        let err = ensure_id_attribute("<Token/>", "Claims").unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn signature_lands_inside_the_root() {
        let key = RsaPrivateKey::generate(2048).unwrap();
        let signed = sign_token("<Token><Claims>subject</Claims></Token>", "Claims", &key).unwrap();

        assert!(signed.contains("<ds:Signature"));
        assert!(signed.trim_end().ends_with("</Token>"));
        let signature_at = signed.find("<ds:Signature").unwrap();
        let claims_end = signed.find("</Claims>").unwrap();
        assert!(claims_end < signature_at);
    }
}
