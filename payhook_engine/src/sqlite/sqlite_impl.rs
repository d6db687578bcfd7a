//! `SqliteDatabase` is a concrete implementation of a payhook engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the traits defined in the [`crate::traits`]
//! module. The interesting work happens inside transactions: the paid transition and its outbox inserts commit or
//! roll back together, and the billing audit insert is the duplicate detector for subscription events.
//!
//! Every write path, single-statement updates included, goes through an explicit `begin`/`commit` pair. A write
//! must be committed and visible to the rest of the pool before its call returns.
use std::fmt::Debug;

use log::*;
use payhook_common::Money;
use sqlx::SqlitePool;

use super::db::{billing_events, new_pool, orders, outbox, subscriptions};
use crate::{
    db_types::{
        CommissionStatus,
        NewBillingEvent,
        NewOrder,
        Order,
        OrderId,
        OutboxEntry,
        OutboxKind,
        PaymentStatus,
        Subscription,
        SubscriptionStatus,
    },
    events::{
        PaidOrderSummary,
        PaymentEvent,
        PaymentEventResult,
        PaymentOutcome,
        SubscriptionAction,
        SubscriptionEvent,
        SubscriptionEventResult,
    },
    traits::{ReconcilerDatabase, ReconcilerError, UNDERPAYMENT_THRESHOLD_PERCENT},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, ReconcilerError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn apply_success_event(&self, event: &PaymentEvent) -> Result<PaymentEventResult, ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        let order = match orders::fetch_order_by_id(&event.order_id, &mut tx).await? {
            Some(o) => o,
            None => return Ok(PaymentEventResult::OrderNotFound),
        };
        if order.payment_status == PaymentStatus::Paid {
            return Ok(PaymentEventResult::AlreadyPaid);
        }
        if event.check_underpayment {
            let paid = event.paid_amount.unwrap_or_default();
            let expected = order.total_amount;
            if paid < expected.percent(UNDERPAYMENT_THRESHOLD_PERCENT) {
                orders::record_underpayment(&event.order_id, paid, expected, event.transaction_id.as_deref(), &mut tx)
                    .await?;
                tx.commit().await?;
                warn!("🗃️ Order {} rejected: paid {paid} is below threshold of expected {expected}", event.order_id);
                return Ok(PaymentEventResult::BelowThreshold { paid, expected });
            }
        }
        let updated = orders::mark_paid_if_unpaid(
            &event.order_id,
            event.provider.method_name(),
            event.paid_amount,
            event.transaction_id.as_deref(),
            &mut tx,
        )
        .await?;
        let order = match updated {
            Some(o) => o,
            // Lost the race against a concurrent duplicate delivery; its transaction owns the transition.
            None => return Ok(PaymentEventResult::AlreadyPaid),
        };
        let payload = serde_json::to_string(&PaidOrderSummary::from_order(&order))?;
        if order.commission_amount.is_positive() && order.commission_status == CommissionStatus::Pending {
            outbox::enqueue(&order.id, OutboxKind::Commission, &payload, &mut tx).await?;
        }
        outbox::enqueue(&order.id, OutboxKind::OperatorSms, &payload, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {} marked as paid via {}", order.id, event.provider.method_name());
        Ok(PaymentEventResult::MarkedPaid(order))
    }
}

impl ReconcilerDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        let result = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_id(id, &mut conn).await?;
        Ok(order)
    }

    async fn apply_payment_event(&self, event: &PaymentEvent) -> Result<PaymentEventResult, ReconcilerError> {
        match &event.outcome {
            PaymentOutcome::Success => self.apply_success_event(event).await,
            PaymentOutcome::Failure(status) => {
                let mut tx = self.pool.begin().await?;
                let updated =
                    orders::record_provider_status(&event.order_id, status, event.transaction_id.as_deref(), &mut tx)
                        .await?;
                tx.commit().await?;
                match updated {
                    Some(_) => Ok(PaymentEventResult::MarkedFailed { status: status.clone() }),
                    None => Ok(PaymentEventResult::OrderNotFound),
                }
            },
            PaymentOutcome::Intermediate(status) => {
                let mut tx = self.pool.begin().await?;
                let updated =
                    orders::record_provider_status(&event.order_id, status, event.transaction_id.as_deref(), &mut tx)
                        .await?;
                tx.commit().await?;
                match updated {
                    Some(_) => Ok(PaymentEventResult::StatusUpdated { status: status.clone() }),
                    None => Ok(PaymentEventResult::OrderNotFound),
                }
            },
        }
    }

    async fn apply_subscription_event(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<SubscriptionEventResult, ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        let result = match &event.action {
            SubscriptionAction::CheckoutCompleted { subscription, amount } => {
                let org_id = subscription.org_id.clone();
                let audit = NewBillingEvent {
                    org_id: Some(org_id.clone()),
                    event_type: event.event_type.clone(),
                    external_event_id: event.external_event_id.clone(),
                    amount: *amount,
                    object_id: subscription.stripe_subscription_id.clone(),
                };
                if billing_events::insert_billing_event(audit, &mut tx).await?.is_none() {
                    return Ok(SubscriptionEventResult::Duplicate);
                }
                subscriptions::upsert_for_org(subscription.clone(), &mut tx).await?;
                info!("🗃️ Subscription created for org {org_id}");
                SubscriptionEventResult::Applied { org_id }
            },
            SubscriptionAction::StatusChanged {
                stripe_subscription_id,
                status,
                cancel_at_period_end,
                current_period_start,
                current_period_end,
            } => {
                let sub = match subscriptions::fetch_by_stripe_subscription_id(stripe_subscription_id, &mut tx).await?
                {
                    Some(s) => s,
                    None => return Ok(SubscriptionEventResult::SubscriptionNotFound),
                };
                let audit = NewBillingEvent {
                    org_id: Some(sub.org_id.clone()),
                    event_type: event.event_type.clone(),
                    external_event_id: event.external_event_id.clone(),
                    amount: None,
                    object_id: Some(stripe_subscription_id.clone()),
                };
                if billing_events::insert_billing_event(audit, &mut tx).await?.is_none() {
                    return Ok(SubscriptionEventResult::Duplicate);
                }
                subscriptions::update_status_by_stripe_id(
                    stripe_subscription_id,
                    *status,
                    Some(*cancel_at_period_end),
                    *current_period_start,
                    *current_period_end,
                    &mut tx,
                )
                .await?;
                info!("🗃️ Subscription updated for org {}: {status}", sub.org_id);
                SubscriptionEventResult::Applied { org_id: sub.org_id }
            },
            SubscriptionAction::Canceled { stripe_subscription_id } => {
                self.transition_subscription(
                    &mut tx,
                    event,
                    stripe_subscription_id,
                    SubscriptionStatus::Canceled,
                    None,
                )
                .await?
            },
            SubscriptionAction::InvoicePaid { stripe_subscription_id, amount } => {
                self.transition_subscription(&mut tx, event, stripe_subscription_id, SubscriptionStatus::Active, *amount)
                    .await?
            },
            SubscriptionAction::InvoicePaymentFailed { stripe_subscription_id, amount_due } => {
                self.transition_subscription(
                    &mut tx,
                    event,
                    stripe_subscription_id,
                    SubscriptionStatus::PastDue,
                    *amount_due,
                )
                .await?
            },
        };
        if matches!(result, SubscriptionEventResult::Applied { .. }) {
            tx.commit().await?;
        }
        Ok(result)
    }

    async fn fetch_subscription_for_org(&self, org_id: &str) -> Result<Option<Subscription>, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        let sub = subscriptions::fetch_by_org(org_id, &mut conn).await?;
        Ok(sub)
    }

    async fn process_commission(&self, order_id: &OrderId) -> Result<Option<Money>, ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        let updated = orders::process_commission(order_id, &mut tx).await?;
        tx.commit().await?;
        Ok(updated.map(|o| o.commission_amount))
    }

    async fn next_outbox_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        let entries = outbox::fetch_pending(limit, &mut conn).await?;
        Ok(entries)
    }

    async fn mark_outbox_sent(&self, id: i64) -> Result<(), ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        outbox::mark_sent(id, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_outbox_failed(&self, id: i64, error: &str) -> Result<(), ReconcilerError> {
        let mut tx = self.pool.begin().await?;
        outbox::mark_failed(id, error, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_outbox_for_order(&self, order_id: &OrderId) -> Result<Vec<OutboxEntry>, ReconcilerError> {
        let mut conn = self.pool.acquire().await?;
        let entries = outbox::fetch_for_order(order_id, &mut conn).await?;
        Ok(entries)
    }

    async fn close(&mut self) -> Result<(), ReconcilerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteDatabase {
    async fn transition_subscription(
        &self,
        tx: &mut sqlx::SqliteConnection,
        event: &SubscriptionEvent,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
        amount: Option<Money>,
    ) -> Result<SubscriptionEventResult, ReconcilerError> {
        let sub = match subscriptions::fetch_by_stripe_subscription_id(stripe_subscription_id, tx).await? {
            Some(s) => s,
            None => return Ok(SubscriptionEventResult::SubscriptionNotFound),
        };
        let audit = NewBillingEvent {
            org_id: Some(sub.org_id.clone()),
            event_type: event.event_type.clone(),
            external_event_id: event.external_event_id.clone(),
            amount,
            object_id: Some(stripe_subscription_id.to_string()),
        };
        if billing_events::insert_billing_event(audit, tx).await?.is_none() {
            return Ok(SubscriptionEventResult::Duplicate);
        }
        subscriptions::update_status_by_stripe_id(stripe_subscription_id, status, None, None, None, tx).await?;
        info!("🗃️ Subscription for org {} transitioned to {status}", sub.org_id);
        Ok(SubscriptionEventResult::Applied { org_id: sub.org_id })
    }
}
