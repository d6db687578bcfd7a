//! Stripe webhook adapter.
//!
//! Verifies the `stripe-signature` header (`t=<unix>,v1=<hex>` over `"{t}.{raw_body}"`) and normalizes the
//! subscription lifecycle events into [`SubscriptionEvent`]s. Unhandled event types, non-subscription checkouts and
//! sessions without an `org_id` all parse to `None` so the route can acknowledge them without touching the database.

use chrono::{DateTime, Utc};
use log::*;
use payhook_common::Money;
use payhook_engine::{
    db_types::{NewSubscription, SubscriptionStatus},
    events::{SubscriptionAction, SubscriptionEvent},
};
use serde::Deserialize;

use crate::{
    helpers::verify_hmac,
    providers::{check_replay_window, VerifyError},
};

/// Checks the `stripe-signature` header against the raw request body.
pub fn verify_signature(raw_body: &[u8], sig_header: &str, secret: &str, now: DateTime<Utc>) -> Result<(), VerifyError> {
    let mut timestamp = None;
    let mut v1 = None;
    for part in sig_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", val)) => timestamp = Some(val),
            Some(("v1", val)) => v1 = Some(val),
            _ => {},
        }
    }
    let (timestamp, v1) = match (timestamp, v1) {
        (Some(t), Some(v)) => (t, v),
        _ => return Err(VerifyError::MalformedHeader("Expected t= and v1= elements".into())),
    };
    let ts = timestamp
        .parse::<i64>()
        .map_err(|e| VerifyError::MalformedHeader(format!("Invalid timestamp in signature header. {e}")))?;
    check_replay_window(ts, now.timestamp())?;
    let signature = hex::decode(v1).map_err(|_| VerifyError::InvalidSignature)?;
    let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + raw_body.len());
    signed_payload.extend_from_slice(timestamp.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(raw_body);
    verify_hmac(secret.as_bytes(), &signed_payload, &signature)
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: SessionMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct SessionMetadata {
    #[serde(default)]
    org_id: Option<String>,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    billing_period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    current_period_start: Option<i64>,
    #[serde(default)]
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    amount_paid: Option<i64>,
    #[serde(default)]
    amount_due: Option<i64>,
}

fn subscription_status(raw: &str) -> SubscriptionStatus {
    match raw {
        "active" => SubscriptionStatus::Active,
        "past_due" => SubscriptionStatus::PastDue,
        "trialing" => SubscriptionStatus::Trialing,
        _ => SubscriptionStatus::Canceled,
    }
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Parses a verified Stripe payload into a normalized subscription event.
///
/// `Ok(None)` means the event is valid JSON but does not need processing.
pub fn parse_event(raw_body: &[u8]) -> Result<Option<SubscriptionEvent>, serde_json::Error> {
    let event: StripeEvent = serde_json::from_slice(raw_body)?;
    debug!("🧾️ Stripe event {} ({})", event.event_type, event.id);
    let action = match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSession = serde_json::from_value(event.data.object)?;
            if session.mode.as_deref() != Some("subscription") {
                debug!("🧾️ Ignoring non-subscription checkout session");
                return Ok(None);
            }
            let org_id = match session.metadata.org_id {
                Some(id) => id,
                None => {
                    warn!("🧾️ No org_id in checkout session metadata. Event {} skipped.", event.id);
                    return Ok(None);
                },
            };
            let subscription = NewSubscription {
                org_id,
                plan_id: session.metadata.plan_id,
                billing_period: session.metadata.billing_period.unwrap_or_else(|| "monthly".into()),
                stripe_customer_id: session.customer,
                stripe_subscription_id: session.subscription,
                current_period_start: timestamp(session.created).or_else(|| Some(Utc::now())),
            };
            SubscriptionAction::CheckoutCompleted { subscription, amount: session.amount_total.map(Money::from_cents) }
        },
        "customer.subscription.updated" => {
            let sub: SubscriptionObject = serde_json::from_value(event.data.object)?;
            SubscriptionAction::StatusChanged {
                stripe_subscription_id: sub.id,
                status: subscription_status(sub.status.as_deref().unwrap_or_default()),
                cancel_at_period_end: sub.cancel_at_period_end,
                current_period_start: timestamp(sub.current_period_start),
                current_period_end: timestamp(sub.current_period_end),
            }
        },
        "customer.subscription.deleted" => {
            let sub: SubscriptionObject = serde_json::from_value(event.data.object)?;
            SubscriptionAction::Canceled { stripe_subscription_id: sub.id }
        },
        "invoice.payment_succeeded" => {
            let invoice: Invoice = serde_json::from_value(event.data.object)?;
            match invoice.subscription {
                Some(id) => {
                    SubscriptionAction::InvoicePaid { stripe_subscription_id: id, amount: invoice.amount_paid.map(Money::from_cents) }
                },
                None => return Ok(None),
            }
        },
        "invoice.payment_failed" => {
            let invoice: Invoice = serde_json::from_value(event.data.object)?;
            match invoice.subscription {
                Some(id) => SubscriptionAction::InvoicePaymentFailed {
                    stripe_subscription_id: id,
                    amount_due: invoice.amount_due.map(Money::from_cents),
                },
                None => return Ok(None),
            }
        },
        other => {
            info!("🧾️ Unhandled Stripe event type: {other}");
            return Ok(None);
        },
    };
    Ok(Some(SubscriptionEvent { external_event_id: event.id, event_type: event.event_type, action }))
}
