//! Small crypto helpers shared by the provider verifiers.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::providers::VerifyError;

type HmacSha256 = Hmac<Sha256>;

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<HmacSha256, VerifyError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| VerifyError::MalformedHeader(format!("Invalid HMAC key. {e}")))?;
    mac.update(data);
    Ok(mac)
}

/// Hex-encoded HMAC-SHA256 digest of `data` under `key`.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> Result<String, VerifyError> {
    let mac = hmac_sha256(key, data)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Base64-encoded HMAC-SHA256 digest of `data` under `key`.
pub fn hmac_sha256_base64(key: &[u8], data: &[u8]) -> Result<String, VerifyError> {
    let mac = hmac_sha256(key, data)?;
    Ok(base64::encode(mac.finalize().into_bytes()))
}

/// Verifies `signature` against the HMAC-SHA256 of `data` in constant time.
pub fn verify_hmac(key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
    let mac = hmac_sha256(key, data)?;
    mac.verify_slice(signature).map_err(|_| VerifyError::InvalidSignature)
}

/// Constant-time equality for short, same-length tokens (e.g. truncated nonces).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
