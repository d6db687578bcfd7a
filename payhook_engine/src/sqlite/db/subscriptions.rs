use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewSubscription, Subscription, SubscriptionStatus},
    traits::ReconcilerError,
};

/// Creates or replaces a tenant's subscription. Keyed on `org_id`, so a tenant that checks out twice ends up with
/// one row reflecting the latest checkout.
pub async fn upsert_for_org(
    sub: NewSubscription,
    conn: &mut SqliteConnection,
) -> Result<Subscription, ReconcilerError> {
    let sub = sqlx::query_as(
        r#"
            INSERT INTO subscriptions (
                org_id, plan_id, status, billing_period, stripe_customer_id, stripe_subscription_id,
                current_period_start
            ) VALUES ($1, $2, 'Active', $3, $4, $5, $6)
            ON CONFLICT (org_id) DO UPDATE SET
                plan_id = excluded.plan_id,
                status = 'Active',
                billing_period = excluded.billing_period,
                stripe_customer_id = excluded.stripe_customer_id,
                stripe_subscription_id = excluded.stripe_subscription_id,
                current_period_start = excluded.current_period_start,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
    )
    .bind(sub.org_id)
    .bind(sub.plan_id)
    .bind(sub.billing_period)
    .bind(sub.stripe_customer_id)
    .bind(sub.stripe_subscription_id)
    .bind(sub.current_period_start)
    .fetch_one(conn)
    .await?;
    Ok(sub)
}

pub async fn fetch_by_stripe_subscription_id(
    stripe_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, sqlx::Error> {
    let sub = sqlx::query_as("SELECT * FROM subscriptions WHERE stripe_subscription_id = $1")
        .bind(stripe_id)
        .fetch_optional(conn)
        .await?;
    Ok(sub)
}

pub async fn fetch_by_org(org_id: &str, conn: &mut SqliteConnection) -> Result<Option<Subscription>, sqlx::Error> {
    let sub =
        sqlx::query_as("SELECT * FROM subscriptions WHERE org_id = $1").bind(org_id).fetch_optional(conn).await?;
    Ok(sub)
}

/// Updates the status (and optionally the billing period window) of the subscription correlated by the provider's
/// subscription id.
pub async fn update_status_by_stripe_id(
    stripe_id: &str,
    status: SubscriptionStatus,
    cancel_at_period_end: Option<bool>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, ReconcilerError> {
    trace!("📝️ Updating subscription [{stripe_id}] to {status}");
    let sub: Option<Subscription> = sqlx::query_as(
        r#"
            UPDATE subscriptions SET
                status = $2,
                cancel_at_period_end = COALESCE($3, cancel_at_period_end),
                current_period_start = COALESCE($4, current_period_start),
                current_period_end = COALESCE($5, current_period_end),
                updated_at = CURRENT_TIMESTAMP
            WHERE stripe_subscription_id = $1
            RETURNING *;
        "#,
    )
    .bind(stripe_id)
    .bind(status.to_string())
    .bind(cancel_at_period_end)
    .bind(current_period_start)
    .bind(current_period_end)
    .fetch_optional(conn)
    .await?;
    Ok(sub)
}
