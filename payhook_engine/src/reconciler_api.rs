use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{NewOrder, Order, OrderId},
    events::{PaymentEvent, PaymentEventResult, SubscriptionEvent, SubscriptionEventResult},
    traits::{ReconcilerDatabase, ReconcilerError},
};

/// `ReconcilerApi` is the primary API for applying normalized provider events to the order and subscription
/// records. Webhook handlers hold one of these (generic over the storage backend) and never touch the database
/// directly.
pub struct ReconcilerApi<B> {
    db: B,
}

impl<B> Debug for ReconcilerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconcilerApi")
    }
}

impl<B> ReconcilerApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> ReconcilerApi<B>
where B: ReconcilerDatabase
{
    /// Registers a new order ahead of payment. Idempotent: re-submitting an existing order id is a no-op.
    pub async fn register_order(&self, order: NewOrder) -> Result<(Order, bool), ReconcilerError> {
        let (order, inserted) = self.db.insert_order(order).await?;
        if inserted {
            debug!("🔄️📦️ Order {} registered, awaiting payment", order.id);
        } else {
            info!("🔄️📦️ Order {} already exists. Nothing to do.", order.id);
        }
        Ok((order, inserted))
    }

    pub async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, ReconcilerError> {
        self.db.fetch_order(id).await
    }

    /// Pushes a payment notification through the idempotency gate and state transition, logging the outcome.
    /// Duplicate deliveries, unknown orders and below-threshold payments all come back as distinct results so
    /// that the HTTP layer can acknowledge them without treating them as errors.
    pub async fn process_payment_event(&self, event: PaymentEvent) -> Result<PaymentEventResult, ReconcilerError> {
        let order_id = event.order_id.clone();
        let result = self.db.apply_payment_event(&event).await?;
        match &result {
            PaymentEventResult::MarkedPaid(order) => {
                info!(
                    "🔄️💰️ Order {order_id} marked as PAID. Amount: {}, TXID: {}",
                    order.amount_paid.map(|a| a.to_string()).unwrap_or_else(|| "unreported".to_string()),
                    order.provider_transaction_id.as_deref().unwrap_or("none")
                );
            },
            PaymentEventResult::AlreadyPaid => {
                info!("🔄️💰️ Order {order_id} already paid, skipping");
            },
            PaymentEventResult::OrderNotFound => {
                warn!("🔄️💰️ Order not found: {order_id}");
            },
            PaymentEventResult::BelowThreshold { paid, expected } => {
                warn!("🔄️💰️ Payment below threshold for {order_id}: paid={paid}, expected={expected}");
            },
            PaymentEventResult::MarkedFailed { status } => {
                info!("🔄️💰️ Order {order_id} marked as {status}");
            },
            PaymentEventResult::StatusUpdated { status } => {
                debug!("🔄️💰️ Order {order_id} status updated to {status}");
            },
        }
        Ok(result)
    }

    /// Applies a subscription lifecycle event, relying on the billing audit log for dedup.
    pub async fn process_subscription_event(
        &self,
        event: SubscriptionEvent,
    ) -> Result<SubscriptionEventResult, ReconcilerError> {
        let event_id = event.external_event_id.clone();
        let event_type = event.event_type.clone();
        let result = self.db.apply_subscription_event(&event).await?;
        match &result {
            SubscriptionEventResult::Applied { org_id } => {
                info!("🔄️🧾️ Event {event_type} [{event_id}] applied for org {org_id}");
            },
            SubscriptionEventResult::Duplicate => {
                info!("🔄️🧾️ Duplicate event [{event_id}], skipping");
            },
            SubscriptionEventResult::SubscriptionNotFound => {
                warn!("🔄️🧾️ Event {event_type} [{event_id}] references an unknown subscription");
            },
        }
        Ok(result)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
