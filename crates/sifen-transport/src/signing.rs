//! # Batch Signing Pool
//!
//! Signing is CPU-bound and independent per document, so batch signing
//! fans out across blocking tasks. The loaded certificate's key handle is
//! used by exactly one signing operation at a time: every task takes the
//! certificate mutex around its `sign` call.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use sifen_core::{Cdc, Timestamp};
use sifen_crypto::{SignerError, SigningCertificate, XmlSigner};

use crate::client::SignedPayload;
use crate::retry::Clock;

/// A schema-valid, unsigned document as handed over by document assembly.
#[derive(Debug, Clone)]
pub struct UnsignedDocument {
    pub cdc: Cdc,
    pub xml: String,
    pub emitted_at: Timestamp,
}

/// Fans batch signing out across blocking tasks.
pub struct BatchSigner {
    signer: XmlSigner,
    cert: Arc<Mutex<SigningCertificate>>,
    clock: Arc<dyn Clock>,
}

impl BatchSigner {
    pub fn new(
        signer: XmlSigner,
        cert: Arc<Mutex<SigningCertificate>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer,
            cert,
            clock,
        }
    }

    /// Sign one document on the current task.
    pub fn sign_one(&self, doc: &UnsignedDocument) -> Result<SignedPayload, SignerError> {
        let now = self.clock.now();
        let signed = {
            let cert = self.cert.lock();
            self.signer.sign(&doc.xml, &cert, now)?
        };
        Ok(SignedPayload::new(
            doc.cdc.clone(),
            signed.xml().to_string(),
            doc.emitted_at,
            now,
        ))
    }

    /// Sign a batch concurrently. Results come back in input order, one per
    /// document, so a single vigency failure does not sink the batch.
    pub async fn sign_all(
        &self,
        docs: Vec<UnsignedDocument>,
    ) -> Vec<(Cdc, Result<SignedPayload, SignerError>)> {
        let mut tasks = JoinSet::new();
        let count = docs.len();
        for (index, doc) in docs.into_iter().enumerate() {
            let signer = self.signer;
            let cert = Arc::clone(&self.cert);
            let now = self.clock.now();
            tasks.spawn_blocking(move || {
                let result = {
                    let cert = cert.lock();
                    signer.sign(&doc.xml, &cert, now)
                };
                let result = result.map(|signed| {
                    SignedPayload::new(doc.cdc.clone(), signed.xml().to_string(), doc.emitted_at, now)
                });
                (index, doc.cdc, result)
            });
        }

        let mut slots: Vec<Option<(Cdc, Result<SignedPayload, SignerError>)>> =
            (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, cdc, result)) = joined {
                slots[index] = Some((cdc, result));
            }
        }
        slots.into_iter().flatten().collect()
    }
}
