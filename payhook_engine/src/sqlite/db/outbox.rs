use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{OrderId, OutboxEntry, OutboxKind},
    traits::ReconcilerError,
};

/// Enqueues a side effect. Call inside the transaction that makes the effect owed, so a crash cannot separate the
/// state change from its pending notification.
pub async fn enqueue(
    order_id: &OrderId,
    kind: OutboxKind,
    payload: &str,
    conn: &mut SqliteConnection,
) -> Result<OutboxEntry, ReconcilerError> {
    let entry = sqlx::query_as(
        r#"
            INSERT INTO outbox (order_id, kind, payload) VALUES ($1, $2, $3)
            RETURNING *;
        "#,
    )
    .bind(order_id.as_str())
    .bind(kind.to_string())
    .bind(payload)
    .fetch_one(conn)
    .await?;
    trace!("📬️ Enqueued {kind} entry for order {order_id}");
    Ok(entry)
}

pub async fn fetch_pending(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<OutboxEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM outbox WHERE status = 'Pending' ORDER BY id ASC LIMIT $1")
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

pub async fn mark_sent(id: i64, conn: &mut SqliteConnection) -> Result<(), ReconcilerError> {
    sqlx::query("UPDATE outbox SET status = 'Sent', sent_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn mark_failed(id: i64, error: &str, conn: &mut SqliteConnection) -> Result<(), ReconcilerError> {
    sqlx::query("UPDATE outbox SET status = 'Failed', error = $2 WHERE id = $1")
        .bind(id)
        .bind(error)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<OutboxEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM outbox WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(entries)
}
