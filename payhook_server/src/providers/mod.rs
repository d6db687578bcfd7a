//! Provider adapters.
//!
//! Each provider module does two things, always in this order:
//! 1. **Verify** the request against the raw body bytes (signature or nonce).
//! 2. **Parse** the payload into a normalized engine event.
//!
//! Parsing never happens before verification succeeds.

pub mod paygate;
pub mod psifi;
pub mod stripe;

use thiserror::Error;

/// Maximum allowed skew, in seconds, between a signed timestamp and server time.
pub const REPLAY_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    #[error("Required signature headers are missing.")]
    MissingHeaders,
    #[error("Signature header is malformed. {0}")]
    MalformedHeader(String),
    #[error("Signature timestamp is outside the replay window.")]
    StaleTimestamp,
    #[error("Signature does not match the request body.")]
    InvalidSignature,
    #[error("Callback nonce does not match.")]
    InvalidNonce,
}

/// Rejects timestamps more than [`REPLAY_WINDOW_SECS`] away from `now`, in either direction.
pub(crate) fn check_replay_window(timestamp: i64, now: i64) -> Result<(), VerifyError> {
    if (now - timestamp).abs() > REPLAY_WINDOW_SECS {
        return Err(VerifyError::StaleTimestamp);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn replay_window_is_inclusive_on_both_sides() {
        check_replay_window(1_000_000, 1_000_000).unwrap();
        check_replay_window(1_000_000 - 300, 1_000_000).unwrap();
        check_replay_window(1_000_000 + 300, 1_000_000).unwrap();
        assert!(matches!(check_replay_window(1_000_000 - 301, 1_000_000), Err(VerifyError::StaleTimestamp)));
        assert!(matches!(check_replay_window(1_000_000 + 301, 1_000_000), Err(VerifyError::StaleTimestamp)));
    }
}
