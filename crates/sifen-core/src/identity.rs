//! # Document-Fact Identity Newtypes
//!
//! Newtype wrappers for the fixed-width digit fields that make up a CDC
//! control code. These prevent accidental field confusion — you cannot pass
//! an `Establishment` where an `ExpeditionPoint` is expected, even though
//! both are three digits on the wire.
//!
//! ## Invariant
//!
//! Every constructor validates width and digit content. A value of any of
//! these types is well-formed by construction; the CDC codec concatenates
//! them without re-checking.

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Validate that `value` is exactly `width` ASCII digits.
fn validate_digits(
    field: &'static str,
    width: usize,
    value: &str,
) -> Result<(), IdentityError> {
    if value.len() != width || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdentityError::MalformedDigits {
            field,
            width,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Taxpayer registration number (RUC): 8 base digits plus a check digit.
///
/// The base digits and the check digit are stored separately because the
/// CDC layout places them in distinct segments. Shorter registration numbers
/// are left-padded with zeros by the issuing layer before they reach here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ruc {
    digits: String,
    check_digit: u8,
}

impl Ruc {
    /// Construct a RUC from its 8 base digits and check digit.
    pub fn new(digits: &str, check_digit: u8) -> Result<Self, IdentityError> {
        validate_digits("ruc", 8, digits)?;
        if check_digit > 9 {
            return Err(IdentityError::MalformedDigits {
                field: "ruc check digit",
                width: 1,
                value: check_digit.to_string(),
            });
        }
        Ok(Self {
            digits: digits.to_string(),
            check_digit,
        })
    }

    /// The 8 base digits.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// The check digit (0–9).
    pub fn check_digit(&self) -> u8 {
        self.check_digit
    }
}

impl std::fmt::Display for Ruc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.digits, self.check_digit)
    }
}

/// The kind of electronic document being transmitted.
///
/// Codes follow the authority's two-digit document-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Electronic invoice (code 01).
    Invoice,
    /// Self-billed invoice issued by the buyer (code 04).
    SelfBilledInvoice,
    /// Credit note (code 05).
    CreditNote,
    /// Debit note (code 06).
    DebitNote,
    /// Dispatch note accompanying goods in transit (code 07).
    DispatchNote,
}

impl DocumentType {
    /// The two-digit wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invoice => "01",
            Self::SelfBilledInvoice => "04",
            Self::CreditNote => "05",
            Self::DebitNote => "06",
            Self::DispatchNote => "07",
        }
    }

    /// Parse a two-digit wire code.
    pub fn from_code(code: &str) -> Result<Self, IdentityError> {
        match code {
            "01" => Ok(Self::Invoice),
            "04" => Ok(Self::SelfBilledInvoice),
            "05" => Ok(Self::CreditNote),
            "06" => Ok(Self::DebitNote),
            "07" => Ok(Self::DispatchNote),
            other => Err(IdentityError::UnknownDocumentType(other.to_string())),
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invoice => "INVOICE",
            Self::SelfBilledInvoice => "SELF_BILLED_INVOICE",
            Self::CreditNote => "CREDIT_NOTE",
            Self::DebitNote => "DEBIT_NOTE",
            Self::DispatchNote => "DISPATCH_NOTE",
        };
        f.write_str(s)
    }
}

/// How the document was emitted: online or under contingency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmissionMode {
    /// Normal emission while the authority's service is reachable (digit 1).
    Normal,
    /// Contingency emission during an outage, transmitted later (digit 2).
    Contingency,
}

impl EmissionMode {
    /// The single-digit wire code.
    pub fn digit(&self) -> char {
        match self {
            Self::Normal => '1',
            Self::Contingency => '2',
        }
    }

    /// Parse a single-digit wire code.
    pub fn from_digit(digit: char) -> Result<Self, IdentityError> {
        match digit {
            '1' => Ok(Self::Normal),
            '2' => Ok(Self::Contingency),
            other => Err(IdentityError::UnknownEmissionMode(other.to_string())),
        }
    }
}

/// Whether the issuer is a natural person or a legal entity.
///
/// One digit of the CDC, and the discriminator for where the taxpayer id
/// lives inside the signing certificate (subject-alternative-name for
/// natural persons, subject serialNumber for legal entities).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxpayerType {
    /// Natural person (digit 1).
    NaturalPerson,
    /// Legal entity (digit 2).
    LegalEntity,
}

impl TaxpayerType {
    /// The single-digit wire code.
    pub fn digit(&self) -> char {
        match self {
            Self::NaturalPerson => '1',
            Self::LegalEntity => '2',
        }
    }

    /// Parse a single-digit wire code.
    pub fn from_digit(digit: char) -> Result<Self, IdentityError> {
        match digit {
            '1' => Ok(Self::NaturalPerson),
            '2' => Ok(Self::LegalEntity),
            other => Err(IdentityError::UnknownTaxpayerType(other.to_string())),
        }
    }
}

/// Establishment code: 3 digits identifying the issuing branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Establishment(String);

impl Establishment {
    /// Construct from exactly 3 digits.
    pub fn new(digits: &str) -> Result<Self, IdentityError> {
        validate_digits("establishment", 3, digits)?;
        Ok(Self(digits.to_string()))
    }

    /// The 3-digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Expedition point: 3 digits identifying the issuing terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpeditionPoint(String);

impl ExpeditionPoint {
    /// Construct from exactly 3 digits.
    pub fn new(digits: &str) -> Result<Self, IdentityError> {
        validate_digits("expedition point", 3, digits)?;
        Ok(Self(digits.to_string()))
    }

    /// The 3-digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sequential document number: 7 digits within an expedition point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentNumber(String);

impl DocumentNumber {
    /// Construct from exactly 7 digits.
    pub fn new(digits: &str) -> Result<Self, IdentityError> {
        validate_digits("document number", 7, digits)?;
        Ok(Self(digits.to_string()))
    }

    /// The 7-digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Random 9-digit security code embedded in the CDC.
///
/// The code exists so a CDC cannot be predicted from public facts alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityCode(String);

impl SecurityCode {
    /// Construct from exactly 9 digits.
    pub fn new(digits: &str) -> Result<Self, IdentityError> {
        validate_digits("security code", 9, digits)?;
        Ok(Self(digits.to_string()))
    }

    /// Generate a fresh random security code.
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let n: u32 = rng.gen_range(0..1_000_000_000);
        Self(format!("{n:09}"))
    }

    /// The 9-digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
