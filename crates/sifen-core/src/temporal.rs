//! # Temporal Types — UTC-Only Timestamps
//!
//! Defines `Timestamp`, a UTC-only timestamp type with seconds precision.
//! Every instant in the transmission pipeline — emission, signature,
//! transmission, approval — is a `Timestamp`, so plazo window arithmetic
//! never has to reason about offsets or sub-second jitter.
//!
//! ## Invariant
//!
//! Timestamps must be UTC with Z suffix. A local offset would shift a
//! document across a plazo boundary depending on where it was parsed, so
//! non-UTC inputs are **rejected at construction** on the strict path; a
//! lenient parser exists for ingesting authority responses, which always
//! normalizes to UTC.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SifenError;

/// A UTC-only timestamp, truncated to seconds precision.
///
/// # Construction
///
/// - [`Timestamp::now()`] — current UTC time, truncated.
/// - [`Timestamp::from_utc()`] — from a `DateTime<Utc>`, truncating sub-seconds.
/// - [`Timestamp::parse()`] — from an ISO8601 string, rejecting non-UTC offsets.
/// - [`Timestamp::parse_lenient()`] — converts any offset to UTC (authority
///   responses only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp from the current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse a timestamp from an RFC 3339 / ISO8601 string.
    ///
    /// **Rejects non-UTC inputs.** Only the `Z` suffix is accepted — even
    /// `+00:00`, which is semantically equivalent, is rejected so that a
    /// timestamp has exactly one textual form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid RFC 3339 or uses a
    /// non-Z offset.
    pub fn parse(s: &str) -> Result<Self, SifenError> {
        if !s.ends_with('Z') {
            return Err(SifenError::Temporal(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| SifenError::Temporal(format!("invalid RFC 3339 timestamp {s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Parse a timestamp from an RFC 3339 string, accepting any offset and
    /// converting to UTC.
    ///
    /// Authority responses occasionally carry the service's local offset;
    /// this parser normalizes them. Everything produced locally should use
    /// [`Timestamp::parse()`] instead.
    pub fn parse_lenient(s: &str) -> Result<Self, SifenError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| SifenError::Temporal(format!("invalid RFC 3339 timestamp {s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Create a timestamp from a Unix epoch timestamp (seconds).
    pub fn from_epoch_secs(secs: i64) -> Result<Self, SifenError> {
        let dt = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| SifenError::Temporal(format!("invalid Unix timestamp: {secs}")))?;
        Ok(Self(dt))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the Unix epoch timestamp in seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// The UTC calendar date of this instant.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// Signed duration from `earlier` to `self`.
    ///
    /// Negative when `self` precedes `earlier` — plazo classification relies
    /// on the sign to detect clock skew.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        self.0 - earlier.0
    }

    /// This instant shifted forward by a number of hours.
    ///
    /// Saturates at the representable range rather than panicking; the plazo
    /// windows in this system are all well inside it.
    pub fn plus_hours(&self, hours: i64) -> Self {
        match self.0.checked_add_signed(Duration::hours(hours)) {
            Some(dt) => Self(dt),
            None => *self,
        }
    }

    /// This instant shifted forward by a number of seconds, saturating like
    /// [`Timestamp::plus_hours()`].
    pub fn plus_secs(&self, secs: i64) -> Self {
        match self.0.checked_add_signed(Duration::seconds(secs)) {
            Some(dt) => Self(dt),
            None => *self,
        }
    }

    /// Render as ISO8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

/// Truncate a `DateTime<Utc>` to seconds precision (discard nanoseconds).
fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
