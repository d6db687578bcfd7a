//! PsiFi webhook adapter.
//!
//! PsiFi delivers through Svix: the signature covers `"{msg_id}.{timestamp}.{raw_body}"` under the base64 key
//! embedded in the `whsec_`-prefixed secret, and the `svix-signature` header may carry several space-separated
//! `v1,<base64>` entries of which any single match is sufficient.

use chrono::{DateTime, Utc};
use log::*;
use payhook_common::Money;
use payhook_engine::{
    db_types::OrderId,
    events::{PaymentEvent, PaymentOutcome, PaymentProvider},
};
use regex::Regex;
use serde::Deserialize;

use crate::{
    helpers::verify_hmac,
    providers::{check_replay_window, VerifyError},
};

const TERMINAL_SUCCESS: [&str; 2] = ["complete", "completed"];
const TERMINAL_FAILURE: [&str; 4] = ["failed", "cancelled", "expired", "refunded"];

/// Checks the three Svix headers against the raw request body.
pub fn verify_signature(
    raw_body: &[u8],
    msg_id: &str,
    timestamp: &str,
    signatures: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), VerifyError> {
    let ts = timestamp
        .parse::<i64>()
        .map_err(|e| VerifyError::MalformedHeader(format!("Invalid svix-timestamp header. {e}")))?;
    check_replay_window(ts, now.timestamp())?;
    let encoded_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let key = base64::decode(encoded_key)
        .map_err(|_| VerifyError::MalformedHeader("Webhook secret is not valid base64".into()))?;
    let mut signed_payload = Vec::with_capacity(msg_id.len() + timestamp.len() + 2 + raw_body.len());
    signed_payload.extend_from_slice(msg_id.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(timestamp.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(raw_body);
    for entry in signatures.split(' ') {
        if let Some(("v1", sig)) = entry.split_once(',') {
            let Ok(sig) = base64::decode(sig) else { continue };
            if verify_hmac(&key, &signed_payload, &sig).is_ok() {
                return Ok(());
            }
        }
    }
    Err(VerifyError::InvalidSignature)
}

#[derive(Debug, Deserialize)]
struct PsiFiPayload {
    #[serde(default)]
    event: Option<String>,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    order: Option<PsiFiOrder>,
    #[serde(default)]
    metadata: Option<PsiFiMetadata>,
}

#[derive(Debug, Deserialize)]
struct PsiFiOrder {
    #[serde(default, rename = "externalId")]
    external_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    /// Minor units (cents).
    #[serde(default, rename = "totalAmount")]
    total_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PsiFiMetadata {
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
}

/// Pulls the order UUID out of an external id like `550e8400-...-440000-pl-1700000000`. Ids that don't start with a
/// UUID are passed through unchanged.
fn extract_order_uuid(raw: &str) -> String {
    let re = Regex::new(r"(?i)^([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})").unwrap();
    match re.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    }
}

/// Parses a verified PsiFi payload into a normalized payment event.
///
/// `Ok(None)` means the event carries no resolvable order id and must be acknowledged as skipped.
pub fn parse_event(raw_body: &[u8]) -> Result<Option<PaymentEvent>, serde_json::Error> {
    let payload: PsiFiPayload = serde_json::from_slice(raw_body)?;
    let event_type = payload.event.or(payload.event_type).unwrap_or_default();
    let transaction_id = payload.order_id.or(payload.transaction_id).or(payload.id);
    let status = payload
        .status
        .or_else(|| payload.order.as_ref().and_then(|o| o.status.clone()))
        .unwrap_or_default()
        .to_lowercase();
    let raw_external_id = payload
        .order
        .as_ref()
        .and_then(|o| o.external_id.clone())
        .or(payload.external_id)
        .or_else(|| payload.metadata.as_ref().and_then(|m| m.external_id.clone()));
    let order_id = raw_external_id
        .map(|raw| extract_order_uuid(&raw))
        .or_else(|| payload.metadata.as_ref().and_then(|m| m.order_id.clone()));
    debug!("💰️ PsiFi event: {event_type}, status: {status}, order: {order_id:?}, txid: {transaction_id:?}");
    let Some(order_id) = order_id else {
        warn!("💰️ No order id found in PsiFi event, skipping");
        return Ok(None);
    };

    let outcome = if TERMINAL_SUCCESS.contains(&status.as_str()) {
        PaymentOutcome::Success
    } else if TERMINAL_FAILURE.contains(&status.as_str()) {
        PaymentOutcome::Failure(status)
    } else {
        PaymentOutcome::Intermediate(status)
    };
    let paid_amount = payload.order.as_ref().and_then(|o| o.total_amount).map(Money::from_cents);
    let mut event = PaymentEvent {
        provider: PaymentProvider::PsiFi,
        order_id: OrderId::from(order_id),
        outcome,
        transaction_id,
        paid_amount,
        check_underpayment: false,
    };
    if !matches!(event.outcome, PaymentOutcome::Success) {
        // Only a completed payment reports a trustworthy amount.
        event.paid_amount = None;
    }
    Ok(Some(event))
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::helpers::hmac_sha256_base64;

    const SECRET: &str = "whsec_dGVzdC1zZWNyZXQtYnl0ZXM=";

    fn sign(body: &str, msg_id: &str, ts: i64) -> String {
        let key = base64::decode(SECRET.strip_prefix("whsec_").unwrap()).unwrap();
        let payload = format!("{msg_id}.{ts}.{body}");
        format!("v1,{}", hmac_sha256_base64(&key, payload.as_bytes()).unwrap())
    }

    #[test]
    fn valid_signature_passes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let body = r#"{"status":"complete"}"#;
        let header = sign(body, "msg_1", now.timestamp());
        verify_signature(body.as_bytes(), "msg_1", &now.timestamp().to_string(), &header, SECRET, now).unwrap();
    }

    #[test]
    fn any_matching_entry_in_the_list_passes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let body = r#"{"status":"complete"}"#;
        let good = sign(body, "msg_1", now.timestamp());
        let header = format!("v1,AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA= {good} v2,ignored");
        verify_signature(body.as_bytes(), "msg_1", &now.timestamp().to_string(), &header, SECRET, now).unwrap();
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let header = sign(r#"{"status":"complete"}"#, "msg_1", now.timestamp());
        let err = verify_signature(
            br#"{"status":"refunded"}"#,
            "msg_1",
            &now.timestamp().to_string(),
            &header,
            SECRET,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignature));
    }

    #[test]
    fn replayed_timestamp_is_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ts = now.timestamp() - 301;
        let body = r#"{"status":"complete"}"#;
        let header = sign(body, "msg_1", ts);
        let err =
            verify_signature(body.as_bytes(), "msg_1", &ts.to_string(), &header, SECRET, now).unwrap_err();
        assert!(matches!(err, VerifyError::StaleTimestamp));
    }

    #[test]
    fn uuid_is_extracted_from_suffixed_external_id() {
        let raw = "550e8400-e29b-41d4-a716-446655440000-pl-1700000000";
        assert_eq!(extract_order_uuid(raw), "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(extract_order_uuid("plain-id"), "plain-id");
    }

    #[test]
    fn total_amount_cents_become_major_units() {
        let body = r#"{
            "event": "payment.updated",
            "id": "txn_77",
            "order": { "externalId": "550e8400-e29b-41d4-a716-446655440000-cs-1700000001", "status": "Completed", "totalAmount": 4999 }
        }"#;
        let event = parse_event(body.as_bytes()).unwrap().unwrap();
        assert_eq!(event.order_id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(event.outcome, PaymentOutcome::Success);
        assert_eq!(event.paid_amount, Some(Money::from_cents(4999)));
        assert_eq!(event.paid_amount.unwrap().to_string(), "$49.99");
        assert_eq!(event.transaction_id.as_deref(), Some("txn_77"));
    }

    #[test]
    fn terminal_failure_statuses_map_to_failure() {
        for status in ["failed", "cancelled", "expired", "refunded"] {
            let body = format!(r#"{{"status":"{status}","metadata":{{"order_id":"ord-1"}}}}"#);
            let event = parse_event(body.as_bytes()).unwrap().unwrap();
            assert_eq!(event.outcome, PaymentOutcome::Failure(status.to_string()));
            assert!(event.paid_amount.is_none());
        }
    }

    #[test]
    fn unknown_status_is_intermediate() {
        let body = r#"{"status":"PendingPayment","metadata":{"order_id":"ord-1"}}"#;
        let event = parse_event(body.as_bytes()).unwrap().unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Intermediate("pendingpayment".into()));
    }

    #[test]
    fn event_without_order_id_is_skipped() {
        let body = r#"{"event":"payment.updated","status":"complete","id":"txn_1"}"#;
        assert!(parse_event(body.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn metadata_order_id_is_the_fallback() {
        let body = r#"{"status":"complete","metadata":{"order_id":"ord-42"}}"#;
        let event = parse_event(body.as_bytes()).unwrap().unwrap();
        assert_eq!(event.order_id.as_str(), "ord-42");
    }
}
