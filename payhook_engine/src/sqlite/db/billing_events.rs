use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{BillingEvent, NewBillingEvent},
    traits::ReconcilerError,
};

/// Appends a billing audit row. Returns `None` when the external event id has been seen before: the unique
/// constraint doubles as the duplicate-delivery detector, so callers should insert before applying the event's
/// effects within the same transaction.
pub async fn insert_billing_event(
    event: NewBillingEvent,
    conn: &mut SqliteConnection,
) -> Result<Option<BillingEvent>, ReconcilerError> {
    let result = sqlx::query_as(
        r#"
            INSERT INTO billing_events (org_id, event_type, external_event_id, amount, object_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(event.org_id)
    .bind(event.event_type)
    .bind(event.external_event_id.clone())
    .bind(event.amount)
    .bind(event.object_id)
    .fetch_one(conn)
    .await;
    match result {
        Ok(row) => Ok(Some(row)),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            debug!("📝️ Billing event [{}] already recorded", event.external_event_id);
            Ok(None)
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_events_for_org(
    org_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<BillingEvent>, sqlx::Error> {
    let events = sqlx::query_as("SELECT * FROM billing_events WHERE org_id = $1 ORDER BY id ASC")
        .bind(org_id)
        .fetch_all(conn)
        .await?;
    Ok(events)
}
