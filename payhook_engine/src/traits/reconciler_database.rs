use payhook_common::Money;
use thiserror::Error;

use crate::{
    db_types::{NewOrder, Order, OrderId, OutboxEntry, Subscription},
    events::{PaymentEvent, PaymentEventResult, SubscriptionEvent, SubscriptionEventResult},
};

/// The minimum fraction of an order's total that a success event must report before the order is marked paid, for
/// providers flagged with `check_underpayment`. A single hardcoded ratio taken from the PayGate365 plugin source,
/// not a configurable tolerance.
pub const UNDERPAYMENT_THRESHOLD_PERCENT: i64 = 60;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Could not deserialize outbox payload: {0}")]
    InvalidOutboxPayload(String),
}

impl From<sqlx::Error> for ReconcilerError {
    fn from(e: sqlx::Error) -> Self {
        ReconcilerError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for ReconcilerError {
    fn from(e: serde_json::Error) -> Self {
        ReconcilerError::InvalidOutboxPayload(e.to_string())
    }
}

/// This trait defines the behaviour of storage backends supporting the payhook engine.
///
/// This behaviour includes:
/// * Applying normalized payment events to orders with an atomic idempotency gate.
/// * Applying subscription lifecycle events with per-event dedup.
/// * Enqueuing and draining the durable side-effect outbox.
#[allow(async_fn_in_trait)]
pub trait ReconcilerDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new order. This call is idempotent: if an order with the same id already exists, it is returned
    /// unchanged and the second element is `false`.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), ReconcilerError>;

    /// Fetches the order with the given id, if it exists.
    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, ReconcilerError>;

    /// Applies a payment event in a single atomic transaction.
    ///
    /// For a success event this performs, atomically:
    /// * the idempotency gate (a conditional update that only fires while the order is not yet paid, so two
    ///   concurrent duplicate deliveries cannot both transition the order),
    /// * the underpayment threshold check when the event demands it,
    /// * the paid transition itself (`payment_status`, `payment_date`, `amount_paid`, `payment_method`,
    ///   provider status and transaction id),
    /// * outbox inserts for the side effects owed.
    ///
    /// Failure and intermediate events only touch the provider status fields and never downgrade
    /// `payment_status`.
    async fn apply_payment_event(&self, event: &PaymentEvent) -> Result<PaymentEventResult, ReconcilerError>;

    /// Applies a subscription lifecycle event in a single atomic transaction. The billing audit row is inserted
    /// in the same transaction; its unique constraint on the external event id is what detects duplicate
    /// deliveries.
    async fn apply_subscription_event(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<SubscriptionEventResult, ReconcilerError>;

    /// Fetches a tenant's subscription, if any.
    async fn fetch_subscription_for_org(&self, org_id: &str) -> Result<Option<Subscription>, ReconcilerError>;

    /// Runs the commission procedure for an order: flips `commission_status` from `Pending` to `Processed` and
    /// returns the commission amount. Returns `None` when there is nothing to process (no commission on the
    /// order, or it has already been processed). This is what makes commission computation at-most-once even if
    /// an outbox row were somehow dispatched twice.
    async fn process_commission(&self, order_id: &OrderId) -> Result<Option<Money>, ReconcilerError>;

    /// Fetches up to `limit` pending outbox entries, oldest first.
    async fn next_outbox_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, ReconcilerError>;

    /// Marks an outbox entry as dispatched.
    async fn mark_outbox_sent(&self, id: i64) -> Result<(), ReconcilerError>;

    /// Marks an outbox entry as failed, recording the error text for out-of-band inspection. Failed entries are
    /// not retried by the dispatch worker.
    async fn mark_outbox_failed(&self, id: i64, error: &str) -> Result<(), ReconcilerError>;

    /// All outbox entries for an order, oldest first.
    async fn fetch_outbox_for_order(&self, order_id: &OrderId) -> Result<Vec<OutboxEntry>, ReconcilerError>;

    /// Closes the connection pool.
    async fn close(&mut self) -> Result<(), ReconcilerError>;
}
