use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use payhook_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct ConversionError(String);

//--------------------------------------    PaymentStatus     ---------------------------------------------------------
/// The payment lifecycle of an order. Transitions are monotonic towards `Paid`: once an order is paid, no webhook
/// delivery may downgrade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// The order exists but no successful payment has been recorded.
    Unpaid,
    /// A provider has confirmed payment in full. Terminal.
    Paid,
    /// A recurring payment attempt failed and the account is in arrears.
    PastDue,
    /// The payment failed. Terminal.
    Failed,
    /// The order was cancelled. Terminal.
    Cancelled,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Unpaid => write!(f, "Unpaid"),
            PaymentStatus::Paid => write!(f, "Paid"),
            PaymentStatus::PastDue => write!(f, "PastDue"),
            PaymentStatus::Failed => write!(f, "Failed"),
            PaymentStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unpaid" => Ok(Self::Unpaid),
            "Paid" => Ok(Self::Paid),
            "PastDue" => Ok(Self::PastDue),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment status: {value}. But this conversion cannot fail. Defaulting to Unpaid");
            PaymentStatus::Unpaid
        })
    }
}

//--------------------------------------   CommissionStatus   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum CommissionStatus {
    /// Commission is owed but has not been computed yet.
    Pending,
    /// The commission procedure has run for this order.
    Processed,
}

impl Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommissionStatus::Pending => write!(f, "Pending"),
            CommissionStatus::Processed => write!(f, "Processed"),
        }
    }
}

impl From<String> for CommissionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Processed" => Self::Processed,
            _ => Self::Pending,
        }
    }
}

//--------------------------------------        OrderId        ---------------------------------------------------------
/// An opaque order identifier. The checkout layer assigns UUIDs, but the engine treats the id as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix (around 8 bytes, clamped to a character boundary), used in operator-facing notification
    /// messages.
    pub fn short(&self) -> &str {
        let mut end = self.0.len().min(8);
        while !self.0.is_char_boundary(end) {
            end -= 1;
        }
        &self.0[..end]
    }
}

//--------------------------------------        Order       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: Option<String>,
    /// The total the customer is expected to pay.
    pub total_amount: Money,
    pub amount_paid: Option<Money>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    /// Provider-reported status string, stored verbatim (lowercased) for audit.
    pub provider_status: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub commission_amount: Money,
    pub commission_status: CommissionStatus,
    /// Catch-all audit trail. Rejected and below-threshold events append diagnostics here.
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: Option<String>,
    pub total_amount: Money,
    pub commission_amount: Money,
}

impl NewOrder {
    pub fn new(id: OrderId, total_amount: Money) -> Self {
        Self { id, customer_id: None, total_amount, commission_amount: Money::default() }
    }

    pub fn with_commission(mut self, amount: Money) -> Self {
        self.commission_amount = amount;
        self
    }

    pub fn with_customer_id<S: Into<String>>(mut self, customer_id: S) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
}

//--------------------------------------  SubscriptionStatus  ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Trialing,
    Canceled,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "Active"),
            SubscriptionStatus::PastDue => write!(f, "PastDue"),
            SubscriptionStatus::Trialing => write!(f, "Trialing"),
            SubscriptionStatus::Canceled => write!(f, "Canceled"),
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Active" => Self::Active,
            "PastDue" => Self::PastDue,
            "Trialing" => Self::Trialing,
            _ => Self::Canceled,
        }
    }
}

//--------------------------------------     Subscription     ---------------------------------------------------------
/// A tenant's billing subscription. At most one live subscription per tenant: rows are keyed unique on `org_id`
/// and upserted on checkout completion.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub org_id: String,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub billing_period: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub org_id: String,
    pub plan_id: Option<String>,
    pub billing_period: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
}

//--------------------------------------    BillingEvent      ---------------------------------------------------------
/// One row per processed billing webhook event. Append-only; the unique constraint on `external_event_id` is what
/// makes duplicate provider deliveries detectable.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: i64,
    pub org_id: Option<String>,
    pub event_type: String,
    pub external_event_id: String,
    pub amount: Option<Money>,
    pub object_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBillingEvent {
    pub org_id: Option<String>,
    pub event_type: String,
    pub external_event_id: String,
    pub amount: Option<Money>,
    pub object_id: Option<String>,
}

//--------------------------------------      Outbox          ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OutboxKind {
    /// Run the commission procedure for the order, then notify the partner.
    Commission,
    /// Send the operator an SMS summary of the payment.
    OperatorSms,
}

impl Display for OutboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxKind::Commission => write!(f, "Commission"),
            OutboxKind::OperatorSms => write!(f, "OperatorSms"),
        }
    }
}

impl From<String> for OutboxKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Commission" => Self::Commission,
            _ => Self::OperatorSms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "Pending"),
            OutboxStatus::Sent => write!(f, "Sent"),
            OutboxStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl From<String> for OutboxStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Sent" => Self::Sent,
            "Failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A durable record of a side effect owed for a paid order. Enqueued in the same transaction as the paid
/// transition and drained by the dispatch worker.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub order_id: OrderId,
    pub kind: OutboxKind,
    /// JSON payload with whatever the dispatcher needs to act without re-reading the order.
    pub payload: String,
    pub status: OutboxStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod test {
    use super::OrderId;

    #[test]
    fn short_prefix_respects_char_boundaries() {
        let id = OrderId::from("abcdef012345".to_string());
        assert_eq!(id.short(), "abcdef01");
        let id = OrderId::from("ab".to_string());
        assert_eq!(id.short(), "ab");
        // A multi-byte character straddling the 8-byte mark must not split.
        let id = OrderId::from("abcdefgé2345".to_string());
        assert_eq!(id.short(), "abcdefg");
    }
}
