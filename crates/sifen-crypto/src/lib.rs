//! # sifen-crypto — Certificate and Signature Layer
//!
//! The cryptographic boundary of the transmission stack: loading the
//! taxpayer's PKCS#12 signing certificate, producing the exclusive
//! canonical form of document XML, and applying or checking the enveloped
//! XML digital signature the tax authority requires on every document.
//!
//! ## Invariant
//!
//! Digest bytes only ever come from [`CanonicalXml`]; private keys are only
//! reachable through [`SigningCertificate::with_signing_key()`], which
//! re-checks certificate vigency per operation. Neither the certificate nor
//! any signer type implements `Serialize`.

pub mod canonical;
pub mod certificate;
pub mod signer;

pub use canonical::{C14nConfig, C14nError, CanonicalXml};
pub use certificate::{CertificateError, CertificateStore, SigningCertificate, Vigency};
pub use signer::{SignedDocument, SignerError, XmlSigner};

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared key and certificate fixtures. RSA key generation is slow, so
    //! the 2048-bit test key is generated once per process.

    use std::sync::OnceLock;

    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::RsaPrivateKey;

    pub const TEST_ISSUER_CN: &str = "eFirma S.A. TEST";

    pub struct CertFixture {
        pub cert_der: Vec<u8>,
    }

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("RSA keygen")
        })
    }

    /// The shared test key as PKCS#8 DER.
    pub fn rsa_pkcs8_der() -> Vec<u8> {
        test_key()
            .to_pkcs8_der()
            .expect("PKCS#8 encode")
            .as_bytes()
            .to_vec()
    }

    /// A self-signed certificate over the shared test key.
    ///
    /// Issuer and subject CN are both [`TEST_ISSUER_CN`] (self-signed). When
    /// `san_ruc` is given, a SAN email entry embedding that RUC is added.
    pub fn signer_cert(san_ruc: Option<&str>) -> CertFixture {
        let pem = test_key()
            .to_pkcs8_pem(LineEnding::LF)
            .expect("PKCS#8 PEM encode");
        let key_pair = rcgen::KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
            .expect("rcgen key pair");

        let mut params = rcgen::CertificateParams::default();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, TEST_ISSUER_CN);
        if let Some(ruc) = san_ruc {
            let email = format!("{ruc}@efactura.gov.py");
            params.subject_alt_names.push(rcgen::SanType::Rfc822Name(
                rcgen::Ia5String::try_from(email).expect("IA5 email"),
            ));
        }
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(365);

        let cert = params.self_signed(&key_pair).expect("self-signed cert");
        CertFixture {
            cert_der: cert.der().as_ref().to_vec(),
        }
    }
}
