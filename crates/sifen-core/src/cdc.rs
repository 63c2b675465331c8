//! # CDC Control-Code Codec
//!
//! Computes and validates the 44-digit CDC — the checksum-protected
//! identifier that names every electronic document. The CDC is a structured
//! key: 43 digits of business facts in a fixed segment layout, closed by a
//! weighted mod-11 check digit.
//!
//! ## Segment layout
//!
//! ```text
//! offset  width  segment
//!      0      8  issuer RUC (base digits)
//!      8      1  RUC check digit
//!      9      2  document type
//!     11      3  establishment
//!     14      3  expedition point
//!     17      7  document number
//!     24      1  taxpayer type
//!     25      8  emission date (YYYYMMDD)
//!     33      1  emission mode
//!     34      9  security code
//!     43      1  mod-11 check digit
//! ```
//!
//! ## Invariant
//!
//! `Cdc` has a private inner field. The only constructors are
//! [`Cdc::compute()`] over validated facts and [`Cdc::parse()`], which
//! re-verifies the check digit. Holding a `Cdc` means the check digit is
//! known to validate — no downstream re-checking.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CdcError;
use crate::identity::{
    DocumentNumber, DocumentType, EmissionMode, Establishment, ExpeditionPoint, Ruc, SecurityCode,
    TaxpayerType,
};

/// Total length of a control code in ASCII digits.
pub const CDC_LEN: usize = 44;

/// The business facts a control code encodes.
///
/// Every field is a validated newtype, so a `CdcFacts` value is well-formed
/// by construction and [`Cdc::compute()`] cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcFacts {
    /// Issuer taxpayer registration (8 digits + check digit).
    pub ruc: Ruc,
    /// Kind of electronic document.
    pub document_type: DocumentType,
    /// Issuing branch.
    pub establishment: Establishment,
    /// Issuing terminal.
    pub expedition_point: ExpeditionPoint,
    /// Sequential number within the expedition point.
    pub document_number: DocumentNumber,
    /// Natural person or legal entity.
    pub taxpayer_type: TaxpayerType,
    /// Emission date (UTC calendar date).
    pub emission_date: NaiveDate,
    /// Normal or contingency emission.
    pub emission_mode: EmissionMode,
    /// Random 9-digit security code.
    pub security_code: SecurityCode,
}

impl CdcFacts {
    /// Concatenate the 43 fact digits in segment order.
    fn digit_string(&self) -> String {
        let mut s = String::with_capacity(CDC_LEN - 1);
        s.push_str(self.ruc.digits());
        s.push((b'0' + self.ruc.check_digit()) as char);
        s.push_str(self.document_type.code());
        s.push_str(self.establishment.as_str());
        s.push_str(self.expedition_point.as_str());
        s.push_str(self.document_number.as_str());
        s.push(self.taxpayer_type.digit());
        s.push_str(&self.emission_date.format("%Y%m%d").to_string());
        s.push(self.emission_mode.digit());
        s.push_str(self.security_code.as_str());
        s
    }
}

/// A validated 44-digit CDC control code.
///
/// Serializes as its digit string. Deserialization re-runs [`Cdc::parse()`],
/// so a `Cdc` that arrived over the wire is as trustworthy as one computed
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cdc(String);

impl Cdc {
    /// Compute the control code for a set of facts.
    ///
    /// Infallible: every `CdcFacts` field is validated at construction, so
    /// the 43-digit fact string is well-formed by the time it reaches the
    /// mod-11 digest.
    pub fn compute(facts: &CdcFacts) -> Self {
        let mut digits = facts.digit_string();
        let check = mod11_check_digit(digits.as_bytes());
        digits.push((b'0' + check) as char);
        Self(digits)
    }

    /// Parse and validate a candidate control code.
    ///
    /// # Errors
    ///
    /// - [`CdcError::MalformedCode`] if the candidate is not exactly 44
    ///   ASCII digits.
    /// - [`CdcError::CheckDigitMismatch`] if the 44th digit does not match
    ///   the mod-11 digest of the first 43.
    pub fn parse(candidate: &str) -> Result<Self, CdcError> {
        if candidate.len() != CDC_LEN || !candidate.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CdcError::MalformedCode {
                len: candidate.len(),
            });
        }
        let (facts, check) = candidate.split_at(CDC_LEN - 1);
        let expected = mod11_check_digit(facts.as_bytes());
        let found = check.as_bytes()[0] - b'0';
        if found != expected {
            return Err(CdcError::CheckDigitMismatch { expected, found });
        }
        Ok(Self(candidate.to_string()))
    }

    /// Whether a candidate string is a valid control code.
    pub fn is_valid(candidate: &str) -> bool {
        Self::parse(candidate).is_ok()
    }

    /// The full 44-digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The issuer RUC base digits embedded in the code.
    pub fn ruc_digits(&self) -> &str {
        &self.0[0..8]
    }

    /// The two-digit document-type code embedded in the code.
    pub fn document_type_code(&self) -> &str {
        &self.0[9..11]
    }

    /// The establishment segment.
    pub fn establishment(&self) -> &str {
        &self.0[11..14]
    }

    /// The expedition-point segment.
    pub fn expedition_point(&self) -> &str {
        &self.0[14..17]
    }

    /// The document-number segment.
    pub fn document_number(&self) -> &str {
        &self.0[17..24]
    }

    /// The emission-date segment (YYYYMMDD).
    pub fn emission_date(&self) -> &str {
        &self.0[25..33]
    }

    /// The emission-mode digit.
    pub fn emission_mode_digit(&self) -> char {
        self.0.as_bytes()[33] as char
    }

    /// The mod-11 check digit.
    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[CDC_LEN - 1] - b'0'
    }

    /// Whether this code's embedded facts match `facts` exactly.
    ///
    /// The document invariant: the control code printed on a document must
    /// agree with the payload it names. A mismatch means the code and the
    /// payload were assembled from different facts.
    pub fn matches(&self, facts: &CdcFacts) -> bool {
        self.0[..CDC_LEN - 1] == facts.digit_string()
    }
}

impl std::fmt::Display for Cdc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Cdc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Cdc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cdc::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Weighted mod-11 check digit over an ASCII digit string.
///
/// Weights cycle 2..7 starting from the **rightmost** digit. The check digit
/// is `11 - (sum mod 11)`, mapped to 0 when the subtraction yields 10 or 11.
fn mod11_check_digit(digits: &[u8]) -> u8 {
    let mut weight: u32 = 2;
    let mut sum: u32 = 0;
    for b in digits.iter().rev() {
        sum += u32::from(b - b'0') * weight;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }
    let check = 11 - (sum % 11);
    if check >= 10 {
        0
    } else {
        check as u8
    }
}
