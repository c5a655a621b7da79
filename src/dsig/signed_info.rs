use quick_xml::{Reader, Writer};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;

use crate::crypto::DigestContext;
use crate::dsig::reference::{DigestAlgorithm, Reference};
use crate::dsig::{Error, Result, algorithms, c14n, extract, ns};

/// The two canonicalization methods a `SignedInfo` may declare. Every other
/// algorithm URI is rejected at assignment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalizationKind {
    Exclusive,
    ExclusiveWithComments,
}

impl CanonicalizationKind {
    pub fn uri(self) -> &'static str {
        match self {
            CanonicalizationKind::Exclusive => algorithms::EXCLUSIVE_C14N,
            CanonicalizationKind::ExclusiveWithComments => {
                algorithms::EXCLUSIVE_C14N_WITH_COMMENTS
            }
        }
    }

    pub fn with_comments(self) -> bool {
        matches!(self, CanonicalizationKind::ExclusiveWithComments)
    }
}

impl TryFrom<&str> for CanonicalizationKind {
    type Error = Error;

    fn try_from(uri: &str) -> Result<Self> {
        match uri {
            algorithms::EXCLUSIVE_C14N => Ok(CanonicalizationKind::Exclusive),
            algorithms::EXCLUSIVE_C14N_WITH_COMMENTS => {
                Ok(CanonicalizationKind::ExclusiveWithComments)
            }
            other => Err(Error::UnsupportedAlgorithm(format!(
                "canonicalization method '{other}'"
            ))),
        }
    }
}

/// The `SignedInfo` record: the declared canonicalization and signature
/// methods plus exactly one `Reference`. On the read path the element's wire
/// bytes are captured verbatim, so canonical output is computed over exactly
/// what was signed.
#[derive(Debug, Clone)]
pub struct SignedInfo {
    id: Option<String>,
    canonicalization: CanonicalizationKind,
    signature_algorithm: String,
    reference: Reference,
    raw_xml: String,
    precanonicalized: Option<Vec<u8>>,
    inclusive_prefixes: Vec<String>,
    prefix_context: BTreeMap<String, String>,
}

impl SignedInfo {
    /// Build a record for the signing path. The wire form is produced later
    /// by [`SignedInfo::write_to`].
    pub fn for_signing(
        id: Option<String>,
        canonicalization: CanonicalizationKind,
        signature_algorithm: impl Into<String>,
        reference: Reference,
    ) -> Self {
        Self {
            id,
            canonicalization,
            signature_algorithm: signature_algorithm.into(),
            reference,
            raw_xml: String::new(),
            precanonicalized: None,
            inclusive_prefixes: Vec::new(),
            prefix_context: BTreeMap::new(),
        }
    }

    /// Parse the first `SignedInfo` element of `xml`.
    ///
    /// The element's byte span is captured verbatim together with the
    /// namespace bindings in scope around it, and a fast-path canonical form
    /// is computed eagerly. When the canonicalization method declares
    /// inclusive prefixes the fast path is discarded: it was produced
    /// without the extra namespace declarations the final digest must
    /// include, so later digesting re-canonicalizes from the raw buffer.
    pub fn read_from(xml: &str) -> Result<Self> {
        let span = extract::by_local_name(xml, "SignedInfo")
            .map_err(|_| Error::Structural("no SignedInfo element found".to_string()))?;
        let raw_xml = span.slice(xml).to_string();
        let prefix_context = span.namespaces;

        let parsed = parse_fields(&raw_xml)?;

        let mut record = Self {
            id: parsed.id,
            canonicalization: parsed.canonicalization,
            signature_algorithm: parsed.signature_algorithm,
            reference: parsed.reference,
            raw_xml,
            precanonicalized: None,
            inclusive_prefixes: parsed.inclusive_prefixes,
            prefix_context,
        };

        if record.inclusive_prefixes.is_empty() {
            record.precanonicalized = Some(c14n::produce(
                &record.raw_xml,
                record.canonicalization.with_comments(),
                &[],
                &record.prefix_context,
            )?);
        }
        Ok(record)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn canonicalization(&self) -> CanonicalizationKind {
        self.canonicalization
    }

    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn reference_mut(&mut self) -> &mut Reference {
        &mut self.reference
    }

    /// Canonical byte form of this record: the fast-path buffer when one was
    /// kept, otherwise a fresh canonicalization of the captured wire bytes
    /// (or, on the signing path, of the serialized record) with the
    /// inclusive prefixes resolved through the captured context.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        if let Some(precanonicalized) = &self.precanonicalized {
            return Ok(precanonicalized.clone());
        }
        let source: Cow<'_, str> = if self.raw_xml.is_empty() {
            Cow::Owned(self.to_xml()?)
        } else {
            Cow::Borrowed(self.raw_xml.as_str())
        };
        c14n::produce(
            &source,
            self.canonicalization.with_comments(),
            &self.inclusive_prefixes,
            &self.prefix_context,
        )
    }

    /// Stream the canonical byte form into the supplied digest accumulator
    /// and finalize it. This hash covers the `SignedInfo` element itself,
    /// separate from the reference digest over the signed payload.
    pub fn compute_hash(&self, digest: &mut DigestContext) -> Result<Vec<u8>> {
        let canonical = self.canonical_bytes()?;
        for chunk in canonical.chunks(4096) {
            digest.update(chunk)?;
        }
        Ok(digest.finish()?)
    }

    /// Refuse to proceed with signature acceptance unless the owned
    /// reference passed an explicit digest comparison.
    pub fn ensure_reference_verified(&self) -> Result<()> {
        if !self.reference.is_verified() {
            return Err(Error::Verification(format!(
                "reference '{}' has not been verified",
                self.reference.uri()
            )));
        }
        Ok(())
    }

    /// Emit the wire form. Element order is fixed: `CanonicalizationMethod`,
    /// `SignatureMethod`, then the `Reference`; compliant readers depend on
    /// the structural position of each child.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut root = BytesStart::new("ds:SignedInfo");
        root.push_attribute(("xmlns:ds", ns::DS));
        if let Some(id) = &self.id {
            root.push_attribute(("Id", id.as_str()));
        }
        writer.write_event(Event::Start(root))?;

        let mut method = BytesStart::new("ds:CanonicalizationMethod");
        method.push_attribute(("Algorithm", self.canonicalization.uri()));
        if self.inclusive_prefixes.is_empty() {
            writer.write_event(Event::Empty(method))?;
        } else {
            writer.write_event(Event::Start(method))?;
            let mut inclusive = BytesStart::new("ec:InclusiveNamespaces");
            inclusive.push_attribute(("xmlns:ec", algorithms::EXCLUSIVE_C14N));
            inclusive.push_attribute(("PrefixList", self.inclusive_prefixes.join(" ").as_str()));
            writer.write_event(Event::Empty(inclusive))?;
            writer.write_event(Event::End(BytesEnd::new("ds:CanonicalizationMethod")))?;
        }

        let mut signature_method = BytesStart::new("ds:SignatureMethod");
        signature_method.push_attribute(("Algorithm", self.signature_algorithm.as_str()));
        writer.write_event(Event::Empty(signature_method))?;

        self.reference.write_to(writer)?;

        writer.write_event(Event::End(BytesEnd::new("ds:SignedInfo")))?;
        Ok(())
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        Ok(String::from_utf8(writer.into_inner())?)
    }
}

struct ParsedFields {
    id: Option<String>,
    canonicalization: CanonicalizationKind,
    signature_algorithm: String,
    reference: Reference,
    inclusive_prefixes: Vec<String>,
}

fn parse_fields(raw: &str) -> Result<ParsedFields> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = true;

    let mut depth = 0usize;
    let mut id = None;
    let mut canonicalization: Option<CanonicalizationKind> = None;
    let mut signature_algorithm: Option<String> = None;
    let mut inclusive_prefixes: Vec<String> = Vec::new();

    let mut in_canonicalization_method = false;
    let mut in_reference = false;
    let mut in_digest_value = false;
    let mut reference: Option<Reference> = None;
    let mut reference_uri: Option<String> = None;
    let mut reference_digest: Option<DigestAlgorithm> = None;
    let mut reference_prefixes: Vec<String> = Vec::new();
    let mut digest_value_b64 = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let local = name.local_name();
                match (depth, local.as_ref()) {
                    (0, b"SignedInfo") => {
                        id = attribute(&e, "Id")?;
                    }
                    (0, other) => {
                        return Err(Error::Structural(format!(
                            "expected SignedInfo element, found '{}'",
                            String::from_utf8_lossy(other)
                        )));
                    }
                    (1, b"CanonicalizationMethod") => {
                        in_canonicalization_method = true;
                        let algorithm = required_attribute(&e, "Algorithm")?;
                        canonicalization = Some(CanonicalizationKind::try_from(algorithm.as_str())?);
                    }
                    (1, b"SignatureMethod") => {
                        signature_algorithm = Some(required_attribute(&e, "Algorithm")?);
                    }
                    (1, b"Reference") => {
                        // A second Reference makes the signed content
                        // ambiguous (signature wrapping), so it is a hard
                        // structural error before any digest is computed.
                        if reference.is_some() {
                            return Err(Error::Structural(
                                "multiple Reference elements in SignedInfo".to_string(),
                            ));
                        }
                        in_reference = true;
                        reference_uri = Some(required_attribute(&e, "URI")?);
                    }
                    (1, other) => {
                        return Err(Error::Structural(format!(
                            "unexpected element '{}' in SignedInfo",
                            String::from_utf8_lossy(other)
                        )));
                    }
                    (_, b"InclusiveNamespaces") if in_canonicalization_method => {
                        inclusive_prefixes = prefix_list(&e)?;
                    }
                    (_, b"InclusiveNamespaces") if in_reference => {
                        reference_prefixes = prefix_list(&e)?;
                    }
                    (_, b"Transform") if in_reference => {
                        let algorithm = required_attribute(&e, "Algorithm")?;
                        if algorithm != algorithms::EXCLUSIVE_C14N {
                            return Err(Error::UnsupportedAlgorithm(format!(
                                "reference transform '{algorithm}'"
                            )));
                        }
                    }
                    (_, b"DigestMethod") if in_reference => {
                        let algorithm = required_attribute(&e, "Algorithm")?;
                        reference_digest = Some(DigestAlgorithm::try_from(algorithm.as_str())?);
                    }
                    (_, b"DigestValue") if in_reference => {
                        in_digest_value = true;
                    }
                    _ => {}
                }
                depth += 1;
            }
            Event::End(e) => {
                depth -= 1;
                match e.name().local_name().as_ref() {
                    b"CanonicalizationMethod" => in_canonicalization_method = false,
                    b"DigestValue" => in_digest_value = false,
                    b"Reference" => {
                        let uri = reference_uri.take().ok_or_else(|| {
                            Error::Structural("Reference missing URI attribute".to_string())
                        })?;
                        let digest_algorithm = reference_digest.take().ok_or_else(|| {
                            Error::Structural("Reference missing DigestMethod".to_string())
                        })?;
                        let digest_value =
                            decode_base64(&digest_value_b64).map_err(|e| {
                                Error::Structural(format!("invalid DigestValue: {e}"))
                            })?;
                        reference = Some(
                            Reference::new(uri, digest_algorithm, digest_value)
                                .with_inclusive_prefixes(std::mem::take(&mut reference_prefixes)),
                        );
                        in_reference = false;
                        digest_value_b64.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if in_digest_value {
                    digest_value_b64
                        .push_str(&e.xml_content().map_err(|e| Error::Xml(e.to_string()))?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(ParsedFields {
        id,
        canonicalization: canonicalization.ok_or_else(|| {
            Error::Structural("SignedInfo missing CanonicalizationMethod".to_string())
        })?,
        signature_algorithm: signature_algorithm.ok_or_else(|| {
            Error::Structural("SignedInfo missing SignatureMethod".to_string())
        })?,
        reference: reference.ok_or_else(|| {
            Error::Structural("SignedInfo missing mandatory Reference".to_string())
        })?,
        inclusive_prefixes,
    })
}

fn prefix_list(e: &BytesStart) -> Result<Vec<String>> {
    Ok(required_attribute(e, "PrefixList")?
        .split_whitespace()
        .map(str::to_string)
        .collect())
}

pub(crate) fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    let compact: String = encoded.split_whitespace().collect();
    BASE64.decode(compact)
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_attribute(e: &BytesStart, name: &str) -> Result<String> {
    attribute(e, name)?.ok_or_else(|| {
        Error::Structural(format!(
            "element '{}' missing {name} attribute",
            String::from_utf8_lossy(e.name().as_ref())
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HashAlg;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

    const DIGEST_B64: &str = "ZOyIygCyaOW6GjVnihtTFtIS9PNmskdyMlNKiuyjfzw=";

    fn sample(canonicalization: &str, extra_reference: bool) -> String {
        let reference = format!(
            r##"<ds:Reference URI="#payload"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue>{DIGEST_B64}</ds:DigestValue></ds:Reference>"##
        );
        let second = if extra_reference { reference.clone() } else { String::new() };
        format!(
            r#"<Doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Signature><ds:SignedInfo Id="si-1"><ds:CanonicalizationMethod Algorithm="{canonicalization}"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/>{reference}{second}</ds:SignedInfo></ds:Signature></Doc>"#
        )
    }

    #[test]
    fn parses_wire_form() {
        let xml = sample(algorithms::EXCLUSIVE_C14N, false);
        let record = SignedInfo::read_from(&xml).unwrap();

        assert_eq!(record.id(), Some("si-1"));
        assert_eq!(record.canonicalization(), CanonicalizationKind::Exclusive);
        assert_eq!(record.signature_algorithm(), algorithms::RSA_SHA256);
        assert_eq!(record.reference().uri(), "#payload");
        assert_eq!(
            record.reference().digest_algorithm(),
            DigestAlgorithm::Sha256
        );
        assert!(!record.reference().is_verified());
        // The captured buffer is the wire bytes, untouched
        assert!(record.raw_xml.starts_with(r#"<ds:SignedInfo Id="si-1">"#));
        // The ds binding came from the enclosing document
        assert_eq!(
            record.prefix_context.get("ds").map(String::as_str),
            Some(ns::DS)
        );
    }

    #[test]
    fn second_reference_is_rejected() {
        let xml = sample(algorithms::EXCLUSIVE_C14N, true);
        let err = SignedInfo::read_from(&xml).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn unsupported_canonicalization_uri_is_rejected_at_parse() {
        let xml = sample("http://www.w3.org/TR/2001/REC-xml-c14n-20010315", false);
        let err = SignedInfo::read_from(&xml).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn missing_reference_is_structural() {
        let xml = r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/></ds:SignedInfo>"#;
        let err = SignedInfo::read_from(xml).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn fast_path_is_kept_without_inclusive_prefixes() {
        let record = SignedInfo::read_from(&sample(algorithms::EXCLUSIVE_C14N, false)).unwrap();
        assert!(record.precanonicalized.is_some());
    }

    #[test]
    fn inclusive_prefixes_discard_fast_path() {
        let xml = format!(
            r##"<Doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:tok="http://tok.example"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="{}"><ec:InclusiveNamespaces xmlns:ec="{}" PrefixList="tok"/></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm="{}"/><ds:Reference URI="#p"><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{DIGEST_B64}</ds:DigestValue></ds:Reference></ds:SignedInfo></Doc>"##,
            algorithms::EXCLUSIVE_C14N,
            algorithms::EXCLUSIVE_C14N,
            algorithms::RSA_SHA256,
            algorithms::SHA256,
        );
        let record = SignedInfo::read_from(&xml).unwrap();
        assert!(record.precanonicalized.is_none());
        assert_eq!(record.inclusive_prefixes, vec!["tok".to_string()]);

        // Re-canonicalization pins the requested prefix from the captured
        // context even though nothing inside SignedInfo utilizes it
        let canonical = String::from_utf8(record.canonical_bytes().unwrap()).unwrap();
        assert!(canonical.contains(r#"xmlns:tok="http://tok.example""#));
    }

    #[test]
    fn hashing_twice_is_deterministic() {
        let record = SignedInfo::read_from(&sample(algorithms::EXCLUSIVE_C14N, false)).unwrap();

        let mut first_ctx = DigestContext::new(HashAlg::Sha256).unwrap();
        let first = record.compute_hash(&mut first_ctx).unwrap();
        let mut second_ctx = DigestContext::new(HashAlg::Sha256).unwrap();
        let second = record.compute_hash(&mut second_ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), HashAlg::Sha256.output_size());
    }

    #[test]
    fn unverified_reference_blocks_acceptance() {
        let record = SignedInfo::read_from(&sample(algorithms::EXCLUSIVE_C14N, false)).unwrap();
        let err = record.ensure_reference_verified().unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[test]
    fn write_to_emits_fixed_order() {
        let digest = BASE64.decode(DIGEST_B64).unwrap();
        let record = SignedInfo::for_signing(
            Some("si-out".to_string()),
            CanonicalizationKind::Exclusive,
            algorithms::RSA_SHA256,
            Reference::new("#payload", DigestAlgorithm::Sha256, digest),
        );

        let xml = record.to_xml().unwrap();
        let canonicalization = xml.find("ds:CanonicalizationMethod").unwrap();
        let signature_method = xml.find("ds:SignatureMethod").unwrap();
        let reference = xml.find("ds:Reference").unwrap();
        assert!(canonicalization < signature_method);
        assert!(signature_method < reference);
        assert!(xml.contains(r#"Id="si-out""#));
        assert!(xml.contains(r#"<ds:DigestValue>"#));
    }

    #[test]
    fn round_trip_preserves_canonical_form() {
        let digest = BASE64.decode(DIGEST_B64).unwrap();
        let record = SignedInfo::for_signing(
            None,
            CanonicalizationKind::Exclusive,
            algorithms::RSA_SHA256,
            Reference::new("#payload", DigestAlgorithm::Sha256, digest),
        );
        let built_canonical = record.canonical_bytes().unwrap();

        let wrapped = format!(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{}</ds:Signature>"#,
            record.to_xml().unwrap()
        );
        let reread = SignedInfo::read_from(&wrapped).unwrap();
        assert_eq!(reread.canonical_bytes().unwrap(), built_canonical);
    }
}
