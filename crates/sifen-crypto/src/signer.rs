//! # Enveloped XML-DSig — Signing and Verification
//!
//! Applies the enveloped signature profile the tax authority validates:
//! SHA-256 digest over the exclusive canonical form of the document, RSA
//! PKCS#1 v1.5 signature over the canonical `SignedInfo`, and the
//! `Signature` element placed as the last child of the document root. The
//! root element's `Id` attribute anchors the signature reference.
//!
//! Verification is a single check: the `Signature` subtree is stripped, the
//! remainder re-canonicalized, `SignedInfo` rebuilt from the recomputed
//! digest, and the signature value checked against it with the certificate
//! embedded in `KeyInfo`. A tampered body changes the digest, which changes
//! `SignedInfo`, which fails the signature check, so digest and signature
//! mismatches are indistinguishable by construction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

use sifen_core::Timestamp;

use crate::canonical::{C14nConfig, C14nError, CanonicalXml};
use crate::certificate::{CertificateError, SigningCertificate};

const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const ALG_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Error signing or verifying a document.
#[derive(Error, Debug)]
pub enum SignerError {
    /// Canonicalization of the document or `SignedInfo` failed.
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] C14nError),

    /// The signing certificate rejected the operation.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The document root carries no `Id` attribute to anchor the reference.
    #[error("document root has no Id attribute")]
    MissingId,

    /// The document structure does not match the enveloped profile.
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// A document with its enveloped signature applied.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    xml: String,
    reference_uri: String,
    digest_b64: String,
    signature_b64: String,
}

impl SignedDocument {
    /// The full document XML with the `Signature` element embedded.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// The signature reference URI, `#` plus the root `Id`.
    pub fn reference_uri(&self) -> &str {
        &self.reference_uri
    }

    /// Base64 SHA-256 digest of the canonical unsigned document.
    pub fn digest_b64(&self) -> &str {
        &self.digest_b64
    }

    /// Base64 RSA signature over the canonical `SignedInfo`.
    pub fn signature_b64(&self) -> &str {
        &self.signature_b64
    }
}

/// Signs and verifies documents under one canonicalization profile.
///
/// Sign and verify must share the profile; a signer constructed with a
/// different [`C14nConfig`] than the one used at signing time will reject
/// valid signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlSigner {
    config: C14nConfig,
}

impl XmlSigner {
    pub fn new(config: C14nConfig) -> Self {
        Self { config }
    }

    /// Sign a document, returning it with the `Signature` element appended
    /// as the last child of the root.
    ///
    /// # Errors
    ///
    /// - [`SignerError::MissingId`] if the root has no `Id` attribute.
    /// - [`SignerError::Certificate`] if the certificate is not vigent.
    pub fn sign(
        &self,
        xml: &str,
        cert: &SigningCertificate,
        as_of: Timestamp,
    ) -> Result<SignedDocument, SignerError> {
        let (root_name, root_id) = root_element(xml)?;
        let root_id = root_id.ok_or(SignerError::MissingId)?;
        let reference_uri = format!("#{root_id}");

        let canonical = CanonicalXml::canonicalize(xml, self.config)?;
        let digest_b64 = BASE64.encode(Sha256::digest(canonical.as_bytes()));

        let signed_info = signed_info_xml(&reference_uri, &digest_b64);
        let canonical_si = CanonicalXml::canonicalize(&signed_info, self.config)?;
        let signature_bytes = cert.with_signing_key(as_of, |key| {
            SigningKey::<Sha256>::new(key.clone())
                .sign(canonical_si.as_bytes())
                .to_vec()
        })?;
        let signature_b64 = BASE64.encode(&signature_bytes);
        let cert_b64 = BASE64.encode(cert.cert_der());

        let signature_element = format!(
            "<Signature xmlns=\"{DSIG_NS}\">{signed_info}\
             <SignatureValue>{signature_b64}</SignatureValue>\
             <KeyInfo><X509Data><X509Certificate>{cert_b64}</X509Certificate>\
             </X509Data></KeyInfo></Signature>"
        );

        // The signature becomes the last child of the root element.
        let close_tag = format!("</{root_name}>");
        let insert_at = xml.rfind(&close_tag).ok_or_else(|| {
            SignerError::Malformed(format!("root element <{root_name}> has no closing tag"))
        })?;
        let mut signed_xml = String::with_capacity(xml.len() + signature_element.len());
        signed_xml.push_str(&xml[..insert_at]);
        signed_xml.push_str(&signature_element);
        signed_xml.push_str(&xml[insert_at..]);

        Ok(SignedDocument {
            xml: signed_xml,
            reference_uri,
            digest_b64,
            signature_b64,
        })
    }

    /// Check an enveloped signature against the certificate embedded in its
    /// `KeyInfo`.
    ///
    /// Total: any input that is not a correctly signed document — tampered,
    /// unsigned, structurally broken, or not XML at all — verifies as
    /// `false`. Verification never fails with an error.
    pub fn verify(&self, signed_xml: &str) -> bool {
        self.check_signature(signed_xml).unwrap_or(false)
    }

    fn check_signature(&self, signed_xml: &str) -> Result<bool, SignerError> {
        let (_, root_id) = root_element(signed_xml)?;
        let root_id = root_id.ok_or(SignerError::MissingId)?;

        let extracted = extract_signature_parts(signed_xml)?;
        let signature_bytes = match BASE64.decode(extracted.signature_b64.trim()) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        let cert_der = match BASE64.decode(extracted.certificate_b64.trim()) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };

        let stripped = strip_signature(signed_xml)?;
        let canonical = CanonicalXml::canonicalize(&stripped, self.config)?;
        let digest_b64 = BASE64.encode(Sha256::digest(canonical.as_bytes()));

        let signed_info = signed_info_xml(&format!("#{root_id}"), &digest_b64);
        let canonical_si = CanonicalXml::canonicalize(&signed_info, self.config)?;

        let Ok((_, cert)) = X509Certificate::from_der(&cert_der) else {
            return Ok(false);
        };
        let Ok(public_key) = RsaPublicKey::from_public_key_der(cert.public_key().raw) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
            return Ok(false);
        };
        Ok(VerifyingKey::<Sha256>::new(public_key)
            .verify(canonical_si.as_bytes(), &signature)
            .is_ok())
    }
}

/// Canonical-form `SignedInfo`: attributes already sorted, no self-closing
/// tags, so signing and verification rebuild byte-identical input.
fn signed_info_xml(reference_uri: &str, digest_b64: &str) -> String {
    format!(
        "<SignedInfo xmlns=\"{DSIG_NS}\">\
         <CanonicalizationMethod Algorithm=\"{ALG_C14N}\"></CanonicalizationMethod>\
         <SignatureMethod Algorithm=\"{ALG_RSA_SHA256}\"></SignatureMethod>\
         <Reference URI=\"{reference_uri}\">\
         <Transforms>\
         <Transform Algorithm=\"{ALG_ENVELOPED}\"></Transform>\
         <Transform Algorithm=\"{ALG_C14N}\"></Transform>\
         </Transforms>\
         <DigestMethod Algorithm=\"{ALG_SHA256}\"></DigestMethod>\
         <DigestValue>{digest_b64}</DigestValue>\
         </Reference></SignedInfo>"
    )
}

/// Root element qualified name and its `Id` attribute, if present.
fn root_element(xml: &str) -> Result<(String, Option<String>), SignerError> {
    let mut reader = Reader::from_str(xml);
    loop {
        let event = reader
            .read_event()
            .map_err(|e| SignerError::Malformed(e.to_string()))?;
        match event {
            Event::Start(start) | Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut id = None;
                for attr in start.attributes() {
                    let attr = attr.map_err(|e| SignerError::Malformed(e.to_string()))?;
                    if local_name(attr.key.as_ref()) == b"Id" {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| SignerError::Malformed(e.to_string()))?;
                        id = Some(value.into_owned());
                        break;
                    }
                }
                return Ok((name, id));
            }
            Event::Eof => {
                return Err(SignerError::Malformed("document has no root element".into()))
            }
            _ => {}
        }
    }
}

struct SignatureParts {
    signature_b64: String,
    certificate_b64: String,
}

/// Pull `SignatureValue` and `X509Certificate` text out of the first
/// `Signature` subtree.
fn extract_signature_parts(xml: &str) -> Result<SignatureParts, SignerError> {
    let mut reader = Reader::from_str(xml);
    let mut in_signature = false;
    let mut current: Option<&'static str> = None;
    let mut signature_b64 = None;
    let mut certificate_b64 = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SignerError::Malformed(e.to_string()))?;
        match event {
            Event::Eof => break,
            Event::Start(start) => match local_name(start.name().as_ref()) {
                b"Signature" => in_signature = true,
                b"SignatureValue" if in_signature => current = Some("sig"),
                b"X509Certificate" if in_signature => current = Some("cert"),
                _ => {}
            },
            Event::End(end) => match local_name(end.name().as_ref()) {
                b"Signature" => in_signature = false,
                b"SignatureValue" | b"X509Certificate" => current = None,
                _ => {}
            },
            Event::Text(text) => {
                if let Some(slot) = current {
                    let value = text
                        .unescape()
                        .map_err(|e| SignerError::Malformed(e.to_string()))?
                        .into_owned();
                    match slot {
                        "sig" => signature_b64 = Some(value),
                        _ => certificate_b64 = Some(value),
                    }
                }
            }
            _ => {}
        }
    }

    match (signature_b64, certificate_b64) {
        (Some(signature_b64), Some(certificate_b64)) => Ok(SignatureParts {
            signature_b64,
            certificate_b64,
        }),
        _ => Err(SignerError::Malformed(
            "document carries no enveloped signature".into(),
        )),
    }
}

/// The document with every `Signature` subtree removed.
fn strip_signature(xml: &str) -> Result<String, SignerError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut signature_depth = 0u32;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SignerError::Malformed(e.to_string()))?;
        match event {
            Event::Eof => break,
            Event::Start(ref start) if local_name(start.name().as_ref()) == b"Signature" => {
                signature_depth += 1;
            }
            Event::Start(_) if signature_depth > 0 => signature_depth += 1,
            Event::End(_) if signature_depth > 0 => signature_depth -= 1,
            _ if signature_depth > 0 => {}
            event => {
                writer
                    .write_event(event)
                    .map_err(|e| SignerError::Malformed(e.to_string()))?;
            }
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| SignerError::Malformed(format!("non-UTF-8 output: {e}")))
}

/// Strip any namespace prefix from a qualified name.
fn local_name(qname: &[u8]) -> &[u8] {
    match qname.iter().rposition(|&b| b == b':') {
        Some(i) => &qname[i + 1..],
        None => qname,
    }
}
