//! # Time-Window Classification
//!
//! The transmission plazo rules. Every document is classified against three
//! instants: when it was emitted, when it was signed, and when transmission
//! is attempted. The authority accepts a document normally within 72 hours
//! of signature, extemporaneously (with a sanction flag) up to 720 hours,
//! and not at all beyond that.
//!
//! ## Invariant
//!
//! [`classify()`] is pure and total: any triple of timestamps maps to
//! exactly one [`WindowClass`], and the function never fails. All window
//! boundaries are inclusive, so a transmission at exactly 72 hours after
//! signature still classifies as normal.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use sifen_core::Timestamp;

/// Hours after signature within which transmission is normal.
pub const NORMAL_SIGNATURE_HOURS: i64 = 72;

/// Hours of emission-to-transmission drift tolerated for normal framing.
pub const NORMAL_EMISSION_HOURS: i64 = 120;

/// Hours after signature and emission within which transmission is still
/// accepted extemporaneously.
pub const EXTEMPORANEOUS_HOURS: i64 = 720;

/// Why a transmission attempt falls outside every acceptance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Transmission timestamp precedes the signature timestamp.
    ClockSkew,
    /// The extemporaneous window has closed.
    WindowExpired,
}

/// Classification of one transmission attempt against the plazo windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowClass {
    /// Within 72h of signature and 120h of emission.
    Normal,
    /// Accepted late; the authority flags it for sanction bookkeeping.
    Extemporaneous,
    /// Outside every window; transmission must not be attempted.
    Rejected(RejectReason),
}

impl WindowClass {
    /// Whether this classification permits a transmission attempt.
    pub fn permits_transmission(self) -> bool {
        !matches!(self, WindowClass::Rejected(_))
    }
}

/// Classify a transmission attempt. Rules apply in order: clock skew,
/// normal framing, extemporaneous framing, rejection.
pub fn classify(
    emission: Timestamp,
    signature: Timestamp,
    transmission: Timestamp,
) -> WindowClass {
    let since_signature = transmission.since(signature);
    if since_signature < Duration::zero() {
        return WindowClass::Rejected(RejectReason::ClockSkew);
    }
    let emission_drift = transmission.since(emission).abs();

    if since_signature <= Duration::hours(NORMAL_SIGNATURE_HOURS)
        && emission_drift <= Duration::hours(NORMAL_EMISSION_HOURS)
    {
        WindowClass::Normal
    } else if since_signature <= Duration::hours(EXTEMPORANEOUS_HOURS)
        && emission_drift <= Duration::hours(EXTEMPORANEOUS_HOURS)
    {
        WindowClass::Extemporaneous
    } else {
        WindowClass::Rejected(RejectReason::WindowExpired)
    }
}

/// Time remaining before the extemporaneous window closes, or `None` once
/// it already has. Retry scheduling uses this to stop before an attempt
/// would land outside every window.
pub fn remaining(signature: Timestamp, now: Timestamp) -> Option<Duration> {
    let deadline = signature.plus_hours(EXTEMPORANEOUS_HOURS);
    let left = deadline.since(now);
    if left < Duration::zero() {
        None
    } else {
        Some(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(epoch: i64) -> Timestamp {
        Timestamp::from_epoch_secs(epoch).unwrap()
    }

    const T: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    // -- scenario classifications -----------------------------------------------

    #[test]
    fn prompt_transmission_is_normal() {
        let class = classify(ts(T), ts(T + HOUR), ts(T + 50 * HOUR));
        assert_eq!(class, WindowClass::Normal);
    }

    #[test]
    fn late_transmission_is_extemporaneous() {
        let class = classify(ts(T), ts(T + HOUR), ts(T + 100 * HOUR));
        assert_eq!(class, WindowClass::Extemporaneous);
    }

    #[test]
    fn very_late_transmission_is_rejected_regardless_of_signature() {
        for sig_offset in [HOUR, 100 * HOUR, 700 * HOUR] {
            let class = classify(ts(T), ts(T + sig_offset), ts(T + 800 * HOUR));
            assert_eq!(class, WindowClass::Rejected(RejectReason::WindowExpired));
        }
    }

    #[test]
    fn transmission_before_signature_is_clock_skew() {
        let class = classify(ts(T), ts(T + 2 * HOUR), ts(T + HOUR));
        assert_eq!(class, WindowClass::Rejected(RejectReason::ClockSkew));
    }

    // -- boundaries (inclusive) -------------------------------------------------

    #[test]
    fn exactly_72h_after_signature_is_normal() {
        let class = classify(ts(T), ts(T), ts(T + 72 * HOUR));
        assert_eq!(class, WindowClass::Normal);
    }

    #[test]
    fn one_second_past_72h_is_extemporaneous() {
        let class = classify(ts(T), ts(T), ts(T + 72 * HOUR + 1));
        assert_eq!(class, WindowClass::Extemporaneous);
    }

    #[test]
    fn exactly_120h_emission_drift_is_normal() {
        // Signature late enough that only the emission bound is in play.
        let class = classify(ts(T), ts(T + 60 * HOUR), ts(T + 120 * HOUR));
        assert_eq!(class, WindowClass::Normal);
    }

    #[test]
    fn exactly_720h_is_extemporaneous() {
        let class = classify(ts(T), ts(T), ts(T + 720 * HOUR));
        assert_eq!(class, WindowClass::Extemporaneous);
    }

    #[test]
    fn one_second_past_720h_is_rejected() {
        let class = classify(ts(T), ts(T), ts(T + 720 * HOUR + 1));
        assert_eq!(class, WindowClass::Rejected(RejectReason::WindowExpired));
    }

    #[test]
    fn emission_after_transmission_counts_as_absolute_drift() {
        // Emission clock ahead of the transmitter: within 120h of drift the
        // attempt still frames as normal.
        let class = classify(ts(T + 10 * HOUR), ts(T), ts(T + HOUR));
        assert_eq!(class, WindowClass::Normal);
    }

    // -- remaining --------------------------------------------------------------

    #[test]
    fn remaining_counts_down_to_window_close() {
        let left = remaining(ts(T), ts(T + 719 * HOUR)).unwrap();
        assert_eq!(left, Duration::hours(1));
    }

    #[test]
    fn remaining_is_none_after_expiry() {
        assert!(remaining(ts(T), ts(T + 721 * HOUR)).is_none());
    }

    #[test]
    fn remaining_at_exact_deadline_is_zero() {
        let left = remaining(ts(T), ts(T + 720 * HOUR)).unwrap();
        assert_eq!(left, Duration::zero());
    }

    // -- totality ---------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_classify_is_total(
            emission in 0i64..4_000_000_000,
            signature in 0i64..4_000_000_000,
            transmission in 0i64..4_000_000_000,
        ) {
            let class = classify(ts(emission), ts(signature), ts(transmission));
            // Exactly one variant, and rejection always carries a reason.
            match class {
                WindowClass::Normal | WindowClass::Extemporaneous => {
                    prop_assert!(class.permits_transmission());
                }
                WindowClass::Rejected(reason) => {
                    prop_assert!(matches!(
                        reason,
                        RejectReason::ClockSkew | RejectReason::WindowExpired
                    ));
                }
            }
        }

        #[test]
        fn prop_normal_implies_extemporaneous_bounds(
            sig_offset in 0i64..300_000,
            tx_offset in 0i64..600_000,
        ) {
            let emission = ts(T);
            let signature = ts(T + sig_offset);
            let transmission = ts(T + sig_offset + tx_offset);
            if classify(emission, signature, transmission) == WindowClass::Normal {
                // Anything normal would also satisfy the looser window.
                prop_assert!(tx_offset <= 72 * HOUR);
                prop_assert!((sig_offset + tx_offset) <= 120 * HOUR);
            }
        }
    }
}
