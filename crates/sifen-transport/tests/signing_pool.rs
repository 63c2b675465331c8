//! Batch signing fan-out: every document signed under the shared
//! certificate verifies, and vigency failures stay per-document.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

use sifen_core::{
    Cdc, CdcFacts, DocumentNumber, DocumentType, EmissionMode, Establishment, ExpeditionPoint,
    Ruc, SecurityCode, TaxpayerType, Timestamp,
};
use sifen_crypto::{CertificateStore, SigningCertificate, XmlSigner};
use sifen_transport::{BatchSigner, SystemClock, UnsignedDocument};

const ISSUER_CN: &str = "eFirma S.A. TEST";

fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("RSA keygen"))
}

fn loaded_cert() -> SigningCertificate {
    let pem = test_key().to_pkcs8_pem(LineEnding::LF).expect("PKCS#8 PEM");
    let key_pair = rcgen::KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
        .expect("rcgen key pair");

    let mut params = rcgen::CertificateParams::default();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, ISSUER_CN);
    params.subject_alt_names.push(rcgen::SanType::Rfc822Name(
        rcgen::Ia5String::try_from("80012345-7@efactura.gov.py".to_string()).unwrap(),
    ));
    params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(30);
    let cert = params.self_signed(&key_pair).expect("self-signed cert");

    let key_der = test_key()
        .to_pkcs8_der()
        .expect("PKCS#8 DER")
        .as_bytes()
        .to_vec();
    CertificateStore::new(vec![ISSUER_CN.to_string()])
        .assemble(cert.der().as_ref().to_vec(), Zeroizing::new(key_der))
        .expect("certificate assembly")
}

fn unsigned(n: u64) -> UnsignedDocument {
    let now = Timestamp::now();
    let facts = CdcFacts {
        ruc: Ruc::new("80012345", 7).unwrap(),
        document_type: DocumentType::Invoice,
        establishment: Establishment::new("001").unwrap(),
        expedition_point: ExpeditionPoint::new("002").unwrap(),
        document_number: DocumentNumber::new(&format!("{n:07}")).unwrap(),
        taxpayer_type: TaxpayerType::NaturalPerson,
        emission_date: now.date(),
        emission_mode: EmissionMode::Normal,
        security_code: SecurityCode::random(),
    };
    let cdc = Cdc::compute(&facts);
    UnsignedDocument {
        xml: format!(
            "<rDE Id=\"{}\"><dVerFor>150</dVerFor><gTimb><dNumTim>12345678</dNumTim></gTimb></rDE>",
            cdc.as_str()
        ),
        cdc,
        emitted_at: now,
    }
}

#[tokio::test]
async fn batch_signing_produces_verifiable_payloads() {
    let cert = Arc::new(Mutex::new(loaded_cert()));
    let signer = XmlSigner::default();
    let pool = BatchSigner::new(signer, cert, Arc::new(SystemClock));

    let docs: Vec<UnsignedDocument> = (1..=8).map(unsigned).collect();
    let expected: Vec<Cdc> = docs.iter().map(|d| d.cdc.clone()).collect();

    let results = pool.sign_all(docs).await;
    assert_eq!(results.len(), 8);
    for (i, (cdc, result)) in results.iter().enumerate() {
        assert_eq!(cdc, &expected[i], "results must keep input order");
        let payload = result.as_ref().expect("signing must succeed");
        assert!(payload.xml.contains("<Signature"));
        assert!(signer.verify(&payload.xml));
    }
}

#[tokio::test]
async fn single_document_signing_matches_the_pool() {
    let cert = Arc::new(Mutex::new(loaded_cert()));
    let signer = XmlSigner::default();
    let pool = BatchSigner::new(signer, cert, Arc::new(SystemClock));

    let doc = unsigned(42);
    let payload = pool.sign_one(&doc).expect("signing must succeed");
    assert_eq!(payload.cdc, doc.cdc);
    assert!(signer.verify(&payload.xml));
    // Tampering after signing must break verification.
    let tampered = payload.xml.replace("12345678", "12345679");
    assert!(!signer.verify(&tampered));
}
