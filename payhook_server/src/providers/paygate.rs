//! PayGate365 callback adapter.
//!
//! PayGate365 calls back with a GET whose `nonce` query parameter is a stateless HMAC of the order id. There is no
//! timestamp, so there is no replay guard here; the idempotency gate in the engine absorbs replayed callbacks.
//! The reported `value_coin` amount is client-visible and manipulable, which is why events from this provider carry
//! the underpayment check flag.

use std::str::FromStr;

use log::*;
use payhook_common::Money;
use payhook_engine::events::{PaymentEvent, PaymentProvider};
use serde::Deserialize;

use crate::{
    helpers::{constant_time_eq, hmac_sha256_hex},
    providers::VerifyError,
};

/// The nonce is a hex HMAC truncated to this many characters.
pub const NONCE_LEN: usize = 32;

/// Recomputes the callback nonce for an order id. The same derivation runs on the payment-link side, so no nonce
/// state is stored anywhere.
pub fn derive_nonce(order_id: &str, secret: &str) -> Result<String, VerifyError> {
    let mut digest = hmac_sha256_hex(secret.as_bytes(), order_id.as_bytes())?;
    digest.truncate(NONCE_LEN);
    Ok(digest)
}

pub fn verify_nonce(order_id: &str, nonce: &str, secret: &str) -> Result<(), VerifyError> {
    let expected = derive_nonce(order_id, secret)?;
    if !constant_time_eq(expected.as_bytes(), nonce.as_bytes()) {
        return Err(VerifyError::InvalidNonce);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackParams {
    pub order_id: String,
    pub nonce: String,
    #[serde(default)]
    pub txid_out: Option<String>,
    #[serde(default)]
    pub value_coin: Option<String>,
}

/// Builds a success event from verified callback parameters. `value_coin` is a decimal major-unit string; an absent
/// or unparseable value counts as zero paid, which the threshold check then rejects.
pub fn normalize(params: &CallbackParams) -> PaymentEvent {
    let paid = params
        .value_coin
        .as_deref()
        .and_then(|v| Money::from_str(v).ok())
        .unwrap_or_default();
    debug!("💰️ PayGate365 callback for order {}: paid {paid}, txid {:?}", params.order_id, params.txid_out);
    let mut event = PaymentEvent::success(PaymentProvider::PayGate365, params.order_id.as_str().into())
        .with_paid_amount(paid);
    if let Some(txid) = &params.txid_out {
        event = event.with_transaction_id(txid.clone());
    }
    event.check_underpayment = true;
    event
}
