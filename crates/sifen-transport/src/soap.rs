//! # SOAP Envelope Codec
//!
//! Builds request envelopes and parses response envelopes for the
//! authority's web services. Requests declare UTF-8 with no byte-order
//! mark; the embedded document payload is already-signed XML and passes
//! through byte-for-byte, never re-escaped.
//!
//! ## Size ceilings
//!
//! The authority enforces 1000 KB on single-document and event exchanges
//! and 10 000 KB on batch exchanges. Both are checked here, on the full
//! envelope, before anything reaches the wire.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::config::{BATCH_PAYLOAD_LIMIT_KB, SINGLE_PAYLOAD_LIMIT_KB};

const SOAP_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const SIFEN_NS: &str = "http://ekuatia.set.gov.py/sifen/xsd";

/// Envelope construction or parsing failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SoapError {
    /// The envelope exceeds the ceiling for its exchange kind.
    #[error("payload is {actual_kb} KB, ceiling is {limit_kb} KB")]
    PayloadTooLarge { actual_kb: usize, limit_kb: usize },

    /// The response is not well-formed XML.
    #[error("malformed response envelope: {0}")]
    Malformed(String),

    /// A required element is absent from the response.
    #[error("response is missing element <{0}>")]
    MissingElement(&'static str),

    /// A numeric field did not parse.
    #[error("element <{element}> holds non-numeric value {value:?}")]
    NonNumeric {
        element: &'static str,
        value: String,
    },
}

/// Which ceiling applies to an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Single-document submit, event submit, and queries.
    Single,
    /// Batch submit.
    Batch,
}

impl ExchangeKind {
    fn limit_kb(self) -> usize {
        match self {
            ExchangeKind::Single => SINGLE_PAYLOAD_LIMIT_KB,
            ExchangeKind::Batch => BATCH_PAYLOAD_LIMIT_KB,
        }
    }
}

/// Wrap an operation body in a SOAP envelope and enforce the ceiling.
///
/// `body` is trusted XML (a signed document or a query fragment) and is
/// embedded verbatim.
pub fn build_envelope(
    operation: &str,
    request_id: u64,
    body: &str,
    kind: ExchangeKind,
) -> Result<String, SoapError> {
    let envelope = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <env:Envelope xmlns:env=\"{SOAP_NS}\"><env:Header></env:Header><env:Body>\
         <{operation} xmlns=\"{SIFEN_NS}\"><dId>{request_id}</dId>{body}</{operation}>\
         </env:Body></env:Envelope>"
    );
    let limit_kb = kind.limit_kb();
    let actual_kb = envelope.len().div_ceil(1024);
    if actual_kb > limit_kb {
        return Err(SoapError::PayloadTooLarge {
            actual_kb,
            limit_kb,
        });
    }
    Ok(envelope)
}

/// Text content of the first element whose local name matches, scanning
/// the whole envelope. Only text directly inside the matched element
/// counts; text inside its children does not.
pub fn text_of(xml: &str, local: &str) -> Result<Option<String>, SoapError> {
    let mut reader = Reader::from_str(xml);
    // None until the element is found, then nesting depth below it.
    let mut depth: Option<u32> = None;
    loop {
        match reader
            .read_event()
            .map_err(|e| SoapError::Malformed(e.to_string()))?
        {
            Event::Eof => return Ok(None),
            Event::Start(start) => match depth {
                None if local_name(start.name().as_ref()) == local.as_bytes() => {
                    depth = Some(0);
                }
                Some(d) => depth = Some(d + 1),
                None => {}
            },
            Event::Text(text) if depth == Some(0) => {
                let value = text
                    .unescape()
                    .map_err(|e| SoapError::Malformed(e.to_string()))?;
                return Ok(Some(value.into_owned()));
            }
            Event::End(_) => match depth {
                Some(0) => return Ok(Some(String::new())),
                Some(d) => depth = Some(d - 1),
                None => {}
            },
            _ => {}
        }
    }
}

fn required(xml: &str, local: &'static str) -> Result<String, SoapError> {
    text_of(xml, local)?.ok_or(SoapError::MissingElement(local))
}

fn required_code(xml: &str, local: &'static str) -> Result<u16, SoapError> {
    let value = required(xml, local)?;
    value
        .trim()
        .parse()
        .map_err(|_| SoapError::NonNumeric {
            element: local,
            value,
        })
}

/// Authority verdict on a single document or event submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub code: u16,
    pub message: String,
    /// Transaction number assigned on approval; empty on rejection.
    pub transaction_id: String,
}

impl SubmitResponse {
    /// Parse from a `rRetEnviDe`-style response envelope.
    pub fn from_xml(xml: &str) -> Result<Self, SoapError> {
        Ok(Self {
            code: required_code(xml, "dCodRes")?,
            message: text_of(xml, "dMsgRes")?.unwrap_or_default(),
            transaction_id: text_of(xml, "dProtAut")?.unwrap_or_default(),
        })
    }
}

/// Acknowledgement of batch acceptance (not completion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAcceptResponse {
    pub batch_id: String,
}

impl BatchAcceptResponse {
    pub fn from_xml(xml: &str) -> Result<Self, SoapError> {
        Ok(Self {
            batch_id: required(xml, "dProtConsLote")?,
        })
    }
}

/// Processing phase reported by a batch query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Queued,
    Processing,
    Done,
}

/// One document's verdict inside a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub cdc: String,
    pub code: u16,
    pub message: String,
    pub transaction_id: String,
}

/// Full batch query response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatusResponse {
    pub phase: BatchPhase,
    /// Per-document verdicts; populated only once the phase is `Done`.
    pub items: Vec<BatchItem>,
}

impl BatchStatusResponse {
    pub fn from_xml(xml: &str) -> Result<Self, SoapError> {
        let phase = match required(xml, "dEstRes")?.trim() {
            "En cola" => BatchPhase::Queued,
            "En procesamiento" => BatchPhase::Processing,
            "Procesado" => BatchPhase::Done,
            other => {
                return Err(SoapError::Malformed(format!(
                    "unknown batch phase {other:?}"
                )))
            }
        };
        Ok(Self {
            phase,
            items: parse_batch_items(xml)?,
        })
    }
}

/// Collect the `gResProc` blocks of a batch response.
fn parse_batch_items(xml: &str) -> Result<Vec<BatchItem>, SoapError> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<BatchItem> = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| SoapError::Malformed(e.to_string()))?
        {
            Event::Eof => break,
            Event::Start(start) => match local_name(start.name().as_ref()) {
                b"gResProc" => {
                    current = Some(BatchItem {
                        cdc: String::new(),
                        code: 0,
                        message: String::new(),
                        transaction_id: String::new(),
                    });
                }
                b"id" if current.is_some() => field = Some("id"),
                b"dCodRes" if current.is_some() => field = Some("code"),
                b"dMsgRes" if current.is_some() => field = Some("msg"),
                b"dProtAut" if current.is_some() => field = Some("prot"),
                _ => {}
            },
            Event::Text(text) => {
                if let (Some(item), Some(slot)) = (current.as_mut(), field) {
                    let value = text
                        .unescape()
                        .map_err(|e| SoapError::Malformed(e.to_string()))?
                        .into_owned();
                    match slot {
                        "id" => item.cdc = value,
                        "code" => {
                            item.code = value.trim().parse().map_err(|_| {
                                SoapError::NonNumeric {
                                    element: "dCodRes",
                                    value,
                                }
                            })?;
                        }
                        "msg" => item.message = value,
                        _ => item.transaction_id = value,
                    }
                }
            }
            Event::End(end) => match local_name(end.name().as_ref()) {
                b"gResProc" => {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
                _ => field = None,
            },
            _ => {}
        }
    }
    Ok(items)
}

/// Authority's view of one document, from a document query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentQueryResponse {
    pub code: u16,
    pub message: String,
    pub transaction_id: String,
    /// Whether the authority has any record of the control code.
    pub found: bool,
}

impl DocumentQueryResponse {
    pub fn from_xml(xml: &str) -> Result<Self, SoapError> {
        let code = required_code(xml, "dCodRes")?;
        Ok(Self {
            code,
            message: text_of(xml, "dMsgRes")?.unwrap_or_default(),
            transaction_id: text_of(xml, "dProtAut")?.unwrap_or_default(),
            // 0420-range on a query means "no record of this CDC".
            found: !(420..=429).contains(&code),
        })
    }
}

/// Registration data from a taxpayer query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxpayerQueryResponse {
    pub code: u16,
    pub exists: bool,
    pub name: String,
    pub is_electronic_issuer: bool,
}

impl TaxpayerQueryResponse {
    pub fn from_xml(xml: &str) -> Result<Self, SoapError> {
        Ok(Self {
            code: required_code(xml, "dCodRes")?,
            exists: text_of(xml, "dRUCFactElec")?.is_some()
                || text_of(xml, "dRazCons")?.is_some(),
            name: text_of(xml, "dRazCons")?.unwrap_or_default(),
            is_electronic_issuer: text_of(xml, "dRUCFactElec")?.as_deref() == Some("S"),
        })
    }
}

fn local_name(qname: &[u8]) -> &[u8] {
    match qname.iter().rposition(|&b| b == b':') {
        Some(i) => &qname[i + 1..],
        None => qname,
    }
}
