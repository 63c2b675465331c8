//! # Certificate Store — PKCS#12 Loading and Lifecycle Validation
//!
//! Loads the taxpayer's signing certificate from a PKCS#12 archive, checks
//! its vigency, verifies the issuing authority against an allowlist, and
//! extracts the taxpayer registration embedded in the certificate.
//!
//! ## Key handling
//!
//! The decrypted private key is held as PKCS#8 bytes inside a `Zeroizing`
//! buffer and parsed into an `RsaPrivateKey` only for the duration of one
//! signing operation via [`SigningCertificate::with_signing_key()`], which
//! re-checks vigency on every call. The parsed key zeroizes on drop. No
//! type in this module implements `Serialize`, and `Debug` output redacts
//! the key material.
//!
//! ## Taxpayer identifier location
//!
//! Natural-person certificates carry the RUC in a subject-alternative-name
//! entry; legal-entity certificates carry it in the subject `serialNumber`
//! attribute. Extraction tries the locations in that order and fails with
//! [`CertificateError::TaxpayerIdNotFound`] if neither yields a value
//! matching the RUC digit pattern.

use std::fmt;
use std::path::Path;

use p12::PFX;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::der_parser::oid;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use sifen_core::{Ruc, TaxpayerType, Timestamp};

/// Minimum accepted RSA modulus size in bits.
const MIN_RSA_BITS: usize = 2048;

/// Error loading or using a signing certificate.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// The archive could not be read from disk.
    #[error("cannot read certificate archive: {0}")]
    Io(#[from] std::io::Error),

    /// The archive or certificate structure could not be parsed.
    #[error("malformed certificate archive: {0}")]
    Malformed(String),

    /// The passphrase does not match the archive's MAC.
    #[error("invalid passphrase for certificate archive")]
    InvalidPassphrase,

    /// The private key is not RSA, or the modulus is too small.
    #[error("unsupported key algorithm: {detail}")]
    UnsupportedKeyAlgorithm {
        /// What was found instead of an acceptable RSA key.
        detail: String,
    },

    /// The issuing authority is not in the accepted-issuer allowlist.
    #[error("untrusted certificate issuer: {issuer}")]
    UntrustedIssuer {
        /// Issuer common name found on the certificate.
        issuer: String,
    },

    /// Neither SAN nor subject serialNumber yielded a RUC.
    #[error("taxpayer identifier not found in certificate")]
    TaxpayerIdNotFound,

    /// The certificate is outside its validity window.
    #[error("certificate not vigent at {as_of} (valid {not_before} to {not_after})")]
    NotVigent {
        /// Instant the operation was attempted.
        as_of: Timestamp,
        /// Start of the validity window.
        not_before: Timestamp,
        /// End of the validity window.
        not_after: Timestamp,
    },
}

/// Result of a vigency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vigency {
    /// Whether the certificate is inside its validity window.
    pub valid: bool,
    /// Whole days until `not_after`; negative once expired.
    pub days_until_expiry: i64,
}

/// A loaded signing certificate with its decrypted (but encapsulated) key.
///
/// Constructed only by [`CertificateStore::load()`]. Holds the DER-encoded
/// certificate, extracted metadata, and the PKCS#8 key bytes in a zeroizing
/// buffer.
pub struct SigningCertificate {
    cert_der: Vec<u8>,
    key_pkcs8: Zeroizing<Vec<u8>>,
    subject: String,
    issuer: String,
    serial: String,
    not_before: Timestamp,
    not_after: Timestamp,
    fingerprint: [u8; 32],
    taxpayer_id: Ruc,
    taxpayer_type: TaxpayerType,
}

impl SigningCertificate {
    /// DER-encoded certificate bytes (public material).
    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// Subject common name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer common name.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Certificate serial number as lowercase hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> Timestamp {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> Timestamp {
        self.not_after
    }

    /// SHA-256 fingerprint of the DER-encoded certificate.
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Fingerprint as a lowercase hex string.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// The RUC embedded in the certificate.
    pub fn taxpayer_id(&self) -> &Ruc {
        &self.taxpayer_id
    }

    /// Natural person (id found in SAN) or legal entity (subject serialNumber).
    pub fn taxpayer_type(&self) -> TaxpayerType {
        self.taxpayer_type
    }

    /// Vigency of the certificate at a given instant.
    pub fn check_vigency(&self, as_of: Timestamp) -> Vigency {
        Vigency {
            valid: self.not_before <= as_of && as_of <= self.not_after,
            days_until_expiry: self.not_after.since(as_of).num_days(),
        }
    }

    /// Run one signing operation with scoped access to the private key.
    ///
    /// Vigency is re-checked at `as_of` on every call; an expired or
    /// not-yet-valid certificate never reaches the closure. The parsed
    /// `RsaPrivateKey` lives only for the duration of the closure and
    /// zeroizes on drop.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::NotVigent`] outside the validity window.
    /// - [`CertificateError::UnsupportedKeyAlgorithm`] if the stored key
    ///   bytes no longer parse (corruption).
    pub fn with_signing_key<T>(
        &self,
        as_of: Timestamp,
        f: impl FnOnce(&RsaPrivateKey) -> T,
    ) -> Result<T, CertificateError> {
        if !self.check_vigency(as_of).valid {
            return Err(CertificateError::NotVigent {
                as_of,
                not_before: self.not_before,
                not_after: self.not_after,
            });
        }
        let key = RsaPrivateKey::from_pkcs8_der(&self.key_pkcs8).map_err(|e| {
            CertificateError::UnsupportedKeyAlgorithm {
                detail: format!("stored key no longer parses: {e}"),
            }
        })?;
        Ok(f(&key))
    }
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("taxpayer_id", &self.taxpayer_id)
            .field("key", &"<private>")
            .finish()
    }
}

/// Loads and validates signing certificates from PKCS#12 archives.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    accepted_issuers: Vec<String>,
}

impl CertificateStore {
    /// A store that accepts certificates issued by the given common names.
    pub fn new(accepted_issuers: Vec<String>) -> Self {
        Self { accepted_issuers }
    }

    /// A store preloaded with the authority-accredited certifier names.
    pub fn with_default_issuers() -> Self {
        Self::new(vec![
            "Documenta S.A.".to_string(),
            "eFirma S.A.".to_string(),
            "VIT S.A.".to_string(),
        ])
    }

    /// Load a signing certificate from a PKCS#12 archive on disk.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::InvalidPassphrase`] if the MAC check fails.
    /// - [`CertificateError::UnsupportedKeyAlgorithm`] for non-RSA keys or
    ///   RSA moduli below 2048 bits.
    /// - [`CertificateError::UntrustedIssuer`] if the issuer is not in the
    ///   allowlist.
    /// - [`CertificateError::TaxpayerIdNotFound`] if no RUC can be located.
    pub fn load(
        &self,
        path: &Path,
        passphrase: &str,
    ) -> Result<SigningCertificate, CertificateError> {
        let bytes = std::fs::read(path)?;
        let pfx = PFX::parse(&bytes)
            .map_err(|e| CertificateError::Malformed(format!("PKCS#12 parse failed: {e:?}")))?;
        if !pfx.verify_mac(passphrase) {
            return Err(CertificateError::InvalidPassphrase);
        }
        let key_der = pfx
            .key_bags(passphrase)
            .map_err(|e| CertificateError::Malformed(format!("key bag decode failed: {e:?}")))?
            .into_iter()
            .next()
            .ok_or_else(|| CertificateError::Malformed("archive contains no key".into()))?;
        let cert_der = pfx
            .cert_bags(passphrase)
            .map_err(|e| CertificateError::Malformed(format!("cert bag decode failed: {e:?}")))?
            .into_iter()
            .next()
            .ok_or_else(|| CertificateError::Malformed("archive contains no certificate".into()))?;
        self.assemble(cert_der, Zeroizing::new(key_der))
    }

    /// Build a `SigningCertificate` from raw DER material.
    ///
    /// Shared by [`CertificateStore::load()`] and in-memory construction in
    /// tests; applies the same key, issuer, and taxpayer-id validation.
    pub fn assemble(
        &self,
        cert_der: Vec<u8>,
        key_pkcs8: Zeroizing<Vec<u8>>,
    ) -> Result<SigningCertificate, CertificateError> {
        // Key must be RSA with an acceptable modulus; parse once to check,
        // then drop (the parse zeroizes on drop).
        {
            let key = RsaPrivateKey::from_pkcs8_der(&key_pkcs8).map_err(|e| {
                CertificateError::UnsupportedKeyAlgorithm {
                    detail: format!("not an RSA PKCS#8 key: {e}"),
                }
            })?;
            let bits = key.size() * 8;
            if bits < MIN_RSA_BITS {
                return Err(CertificateError::UnsupportedKeyAlgorithm {
                    detail: format!("RSA modulus is {bits} bits, minimum is {MIN_RSA_BITS}"),
                });
            }
        }

        let (_, cert) = X509Certificate::from_der(&cert_der)
            .map_err(|e| CertificateError::Malformed(format!("X.509 parse failed: {e}")))?;

        let issuer = common_name(cert.issuer()).unwrap_or_else(|| cert.issuer().to_string());
        if !self.accepted_issuers.iter().any(|a| a == &issuer) {
            return Err(CertificateError::UntrustedIssuer { issuer });
        }

        let subject = common_name(cert.subject()).unwrap_or_else(|| cert.subject().to_string());
        let serial = cert.raw_serial_as_string().replace(':', "").to_lowercase();
        let not_before = Timestamp::from_epoch_secs(cert.validity().not_before.timestamp())
            .map_err(|e| CertificateError::Malformed(format!("invalid notBefore: {e}")))?;
        let not_after = Timestamp::from_epoch_secs(cert.validity().not_after.timestamp())
            .map_err(|e| CertificateError::Malformed(format!("invalid notAfter: {e}")))?;

        let san_values = san_strings(&cert);
        let serial_number_attr = subject_serial_number(&cert);
        let (taxpayer_id, taxpayer_type) =
            find_taxpayer_id(&san_values, serial_number_attr.as_deref())
                .ok_or(CertificateError::TaxpayerIdNotFound)?;

        let fingerprint: [u8; 32] = Sha256::digest(&cert_der).into();

        Ok(SigningCertificate {
            cert_der,
            key_pkcs8,
            subject,
            issuer,
            serial,
            not_before,
            not_after,
            fingerprint,
            taxpayer_id,
            taxpayer_type,
        })
    }
}

/// First common-name attribute of an X.509 name, if any.
fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(|s| s.to_string())
}

/// All string-valued subject-alternative-name entries.
fn san_strings(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut values = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for gn in &san.value.general_names {
            match gn {
                GeneralName::RFC822Name(s)
                | GeneralName::DNSName(s)
                | GeneralName::URI(s) => values.push((*s).to_string()),
                GeneralName::OtherName(_, bytes) => {
                    values.push(String::from_utf8_lossy(bytes).into_owned());
                }
                _ => {}
            }
        }
    }
    values
}

/// The subject `serialNumber` attribute (OID 2.5.4.5), if present.
fn subject_serial_number(cert: &X509Certificate<'_>) -> Option<String> {
    let serial_oid = oid!(2.5.4 .5);
    cert.subject()
        .iter_attributes()
        .find(|attr| *attr.attr_type() == serial_oid)
        .and_then(|attr| attr.as_str().ok())
        .map(|s| s.to_string())
}

/// Locate a RUC in SAN values first, subject serialNumber second.
///
/// The location determines the taxpayer type: natural-person certificates
/// carry the id in a SAN entry, legal-entity certificates in serialNumber.
fn find_taxpayer_id(
    san_values: &[String],
    serial_number: Option<&str>,
) -> Option<(Ruc, TaxpayerType)> {
    for value in san_values {
        if let Some(ruc) = parse_ruc_token(value) {
            return Some((ruc, TaxpayerType::NaturalPerson));
        }
    }
    if let Some(serial) = serial_number {
        if let Some(ruc) = parse_ruc_token(serial) {
            return Some((ruc, TaxpayerType::LegalEntity));
        }
    }
    None
}

/// Scan a string for the first token matching the RUC pattern:
/// one to eight digits, a dash, and a single check digit. The base digits
/// are left-padded to the 8-digit CDC width.
fn parse_ruc_token(s: &str) -> Option<Ruc> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() && (i == 0 || !bytes[i - 1].is_ascii_digit()) {
            let start = i;
            let mut end = i;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            let width = end - start;
            if width <= 8
                && end < bytes.len()
                && bytes[end] == b'-'
                && end + 1 < bytes.len()
                && bytes[end + 1].is_ascii_digit()
                && (end + 2 == bytes.len() || !bytes[end + 2].is_ascii_digit())
            {
                let base = &s[start..end];
                let check = bytes[end + 1] - b'0';
                let padded = format!("{base:0>8}");
                if let Ok(ruc) = Ruc::new(&padded, check) {
                    return Some(ruc);
                }
            }
            i = end;
        } else {
            i += 1;
        }
    }
    None
}
