use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::collections::BTreeMap;
use std::io::Write;

use crate::crypto::{DigestContext, HashAlg};
use crate::dsig::{Error, Result, algorithms, c14n};

/// Digest algorithms accepted inside a `Reference`. Anything else is
/// rejected when the algorithm URI is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn uri(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => algorithms::SHA256,
            DigestAlgorithm::Sha384 => algorithms::SHA384,
            DigestAlgorithm::Sha512 => algorithms::SHA512,
        }
    }

    pub fn hash_alg(self) -> HashAlg {
        match self {
            DigestAlgorithm::Sha256 => HashAlg::Sha256,
            DigestAlgorithm::Sha384 => HashAlg::Sha384,
            DigestAlgorithm::Sha512 => HashAlg::Sha512,
        }
    }
}

impl TryFrom<&str> for DigestAlgorithm {
    type Error = Error;

    fn try_from(uri: &str) -> Result<Self> {
        match uri {
            algorithms::SHA256 => Ok(DigestAlgorithm::Sha256),
            algorithms::SHA384 => Ok(DigestAlgorithm::Sha384),
            algorithms::SHA512 => Ok(DigestAlgorithm::Sha512),
            other => Err(Error::UnsupportedAlgorithm(format!(
                "digest method '{other}'"
            ))),
        }
    }
}

/// A pointer to signed content plus the digest asserted over its canonical
/// form. `verified` is only ever set by an explicit, successful digest
/// comparison.
#[derive(Debug, Clone)]
pub struct Reference {
    uri: String,
    digest_algorithm: DigestAlgorithm,
    digest_value: Vec<u8>,
    inclusive_prefixes: Vec<String>,
    verified: bool,
}

impl Reference {
    pub fn new(
        uri: impl Into<String>,
        digest_algorithm: DigestAlgorithm,
        digest_value: Vec<u8>,
    ) -> Self {
        Self {
            uri: uri.into(),
            digest_algorithm,
            digest_value,
            inclusive_prefixes: Vec::new(),
            verified: false,
        }
    }

    pub(crate) fn with_inclusive_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Compute the digest of the referenced content in its canonical form
    /// and compare it byte-for-byte against the declared digest value. Only
    /// an exact match marks the reference verified.
    pub fn verify_digest(
        &mut self,
        referenced_xml: &str,
        namespace_lookup: &BTreeMap<String, String>,
    ) -> Result<()> {
        let computed = self.compute_digest(referenced_xml, namespace_lookup)?;
        if computed != self.digest_value {
            return Err(Error::Verification(format!(
                "digest mismatch for reference '{}'",
                self.uri
            )));
        }
        self.verified = true;
        Ok(())
    }

    /// Digest of the referenced content's canonical byte form.
    pub fn compute_digest(
        &self,
        referenced_xml: &str,
        namespace_lookup: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>> {
        let canonical = c14n::produce(
            referenced_xml,
            false,
            &self.inclusive_prefixes,
            namespace_lookup,
        )?;
        let mut digest = DigestContext::new(self.digest_algorithm.hash_alg())?;
        digest.update(&canonical)?;
        Ok(digest.finish()?)
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut reference = BytesStart::new("ds:Reference");
        reference.push_attribute(("URI", self.uri.as_str()));
        writer.write_event(Event::Start(reference))?;

        writer.write_event(Event::Start(BytesStart::new("ds:Transforms")))?;
        let mut transform = BytesStart::new("ds:Transform");
        transform.push_attribute(("Algorithm", algorithms::EXCLUSIVE_C14N));
        if self.inclusive_prefixes.is_empty() {
            writer.write_event(Event::Empty(transform))?;
        } else {
            writer.write_event(Event::Start(transform))?;
            let mut inclusive = BytesStart::new("ec:InclusiveNamespaces");
            inclusive.push_attribute(("xmlns:ec", algorithms::EXCLUSIVE_C14N));
            inclusive.push_attribute(("PrefixList", self.inclusive_prefixes.join(" ").as_str()));
            writer.write_event(Event::Empty(inclusive))?;
            writer.write_event(Event::End(BytesEnd::new("ds:Transform")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("ds:Transforms")))?;

        let mut digest_method = BytesStart::new("ds:DigestMethod");
        digest_method.push_attribute(("Algorithm", self.digest_algorithm.uri()));
        writer.write_event(Event::Empty(digest_method))?;

        writer.write_event(Event::Start(BytesStart::new("ds:DigestValue")))?;
        writer.write_event(Event::Text(BytesText::new(&BASE64.encode(&self.digest_value))))?;
        writer.write_event(Event::End(BytesEnd::new("ds:DigestValue")))?;

        writer.write_event(Event::End(BytesEnd::new("ds:Reference")))?;
        Ok(())
    }
}
