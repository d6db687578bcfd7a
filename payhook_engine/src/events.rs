//! Normalized provider events
//!
//! The webhook handlers verify and parse each provider's payload, then reduce it to the types in this module.
//! Everything downstream of the HTTP boundary (the idempotency gate, state transitions and the outbox) only ever
//! sees these normalized shapes, so the three provider integrations share a single reconciliation pipeline.

use chrono::{DateTime, Utc};
use payhook_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{NewSubscription, Order, OrderId, SubscriptionStatus};

//--------------------------------------   PaymentProvider    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentProvider {
    Stripe,
    PsiFi,
    PayGate365,
}

impl PaymentProvider {
    /// The free-text `payment_method` value recorded on orders paid through this provider.
    pub fn method_name(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::PsiFi => "psifi",
            PaymentProvider::PayGate365 => "paygate365",
        }
    }
}

//--------------------------------------    PaymentEvent      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    /// The provider reports payment in full.
    Success,
    /// A terminal negative status (`failed`, `cancelled`, `expired`, `refunded`).
    Failure(String),
    /// A non-terminal status update (`pendingpayment`, `inprogress`, ...).
    Intermediate(String),
}

/// A provider-agnostic payment notification for a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub provider: PaymentProvider,
    pub order_id: OrderId,
    pub outcome: PaymentOutcome,
    pub transaction_id: Option<String>,
    /// Major-unit amount the provider says was paid. Minor-unit payloads are converted before this point.
    pub paid_amount: Option<Money>,
    /// Set by providers whose client side can manipulate the reported amount. When true, a success event is only
    /// accepted if the paid amount reaches the underpayment threshold.
    pub check_underpayment: bool,
}

impl PaymentEvent {
    pub fn success(provider: PaymentProvider, order_id: OrderId) -> Self {
        Self { provider, order_id, outcome: PaymentOutcome::Success, transaction_id: None, paid_amount: None, check_underpayment: false }
    }

    pub fn with_transaction_id<S: Into<String>>(mut self, txid: S) -> Self {
        self.transaction_id = Some(txid.into());
        self
    }

    pub fn with_paid_amount(mut self, amount: Money) -> Self {
        self.paid_amount = Some(amount);
        self
    }
}

/// The outcome of pushing a [`PaymentEvent`] through the idempotency gate and state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaymentEventResult {
    /// The order transitioned to paid for the first time. Side effects have been enqueued.
    MarkedPaid(Order),
    /// Duplicate delivery of a success event. No writes were performed.
    AlreadyPaid,
    /// The referenced order does not exist. Acknowledged and ignored.
    OrderNotFound,
    /// The paid amount fell short of the underpayment threshold. A diagnostic note was written to the order.
    BelowThreshold { paid: Money, expected: Money },
    /// A terminal-negative provider status was recorded. `payment_status` was left untouched.
    MarkedFailed { status: String },
    /// An intermediate provider status was recorded.
    StatusUpdated { status: String },
}

//--------------------------------------  SubscriptionEvent   ---------------------------------------------------------
/// A Stripe subscription lifecycle notification, correlated by the provider's event id for dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub external_event_id: String,
    pub event_type: String,
    pub action: SubscriptionAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubscriptionAction {
    /// A checkout session completed: create or replace the tenant's subscription.
    CheckoutCompleted { subscription: NewSubscription, amount: Option<Money> },
    /// The provider changed the subscription's status or billing period.
    StatusChanged {
        stripe_subscription_id: String,
        status: SubscriptionStatus,
        cancel_at_period_end: bool,
        current_period_start: Option<DateTime<Utc>>,
        current_period_end: Option<DateTime<Utc>>,
    },
    /// The subscription was deleted upstream.
    Canceled { stripe_subscription_id: String },
    /// A recurring invoice was paid; the subscription returns to active.
    InvoicePaid { stripe_subscription_id: String, amount: Option<Money> },
    /// A recurring invoice failed; the subscription is past due.
    InvoicePaymentFailed { stripe_subscription_id: String, amount_due: Option<Money> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubscriptionEventResult {
    /// The event was applied and logged to the billing audit trail.
    Applied { org_id: String },
    /// The provider re-delivered an event we have already processed. No writes were performed.
    Duplicate,
    /// The referenced subscription is unknown. Acknowledged and ignored.
    SubscriptionNotFound,
}

//--------------------------------------   Outbox payloads    ---------------------------------------------------------
/// Payload attached to outbox rows so the dispatcher can act without re-reading the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaidOrderSummary {
    pub order_id: OrderId,
    pub paid_amount: Option<Money>,
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub commission_amount: Money,
}

impl PaidOrderSummary {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            paid_amount: order.amount_paid,
            transaction_id: order.provider_transaction_id.clone(),
            payment_method: order.payment_method.clone().unwrap_or_default(),
            commission_amount: order.commission_amount,
        }
    }
}
