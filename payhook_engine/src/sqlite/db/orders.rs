use log::debug;
use payhook_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, Order, OrderId},
    traits::ReconcilerError,
};

/// Inserts the order into the database, returning `false` in the second parameter if the order already exists.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), ReconcilerError> {
    let inserted = match fetch_order_by_id(&order.id, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Order [{}] inserted", order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, ReconcilerError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (id, customer_id, total_amount, commission_amount)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(order.id)
    .bind(order.customer_id)
    .bind(order.total_amount)
    .bind(order.commission_amount)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_id(id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// The atomic idempotency gate and paid transition in one statement.
///
/// The `payment_status <> 'Paid'` predicate is load-bearing: two near-simultaneous duplicate deliveries cannot
/// both transition the order, because whichever update commits second matches zero rows. Returns `None` when the
/// order was already paid (or does not exist; callers distinguish the two with a prior fetch inside the same
/// transaction).
pub async fn mark_paid_if_unpaid(
    id: &OrderId,
    method: &str,
    paid_amount: Option<Money>,
    transaction_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, ReconcilerError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                payment_status = 'Paid',
                payment_method = $2,
                payment_date = CURRENT_TIMESTAMP,
                amount_paid = COALESCE($3, amount_paid),
                provider_status = 'complete',
                provider_transaction_id = COALESCE($4, provider_transaction_id),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND payment_status <> 'Paid'
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .bind(method)
    .bind(paid_amount)
    .bind(transaction_id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Records a provider status string (and transaction id, when reported) without touching `payment_status`.
/// Used for both terminal-negative and intermediate provider statuses.
pub async fn record_provider_status(
    id: &OrderId,
    status: &str,
    transaction_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, ReconcilerError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                provider_status = $2,
                provider_transaction_id = COALESCE($3, provider_transaction_id),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .bind(status)
    .bind(transaction_id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Marks the provider status as failed and appends an underpayment diagnostic to the order's audit notes.
pub async fn record_underpayment(
    id: &OrderId,
    paid: Money,
    expected: Money,
    transaction_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, ReconcilerError> {
    let note = format!(
        "Payment below {}% threshold. Paid: {paid}, Expected: {expected}. TXID: {}",
        crate::traits::UNDERPAYMENT_THRESHOLD_PERCENT,
        transaction_id.unwrap_or("none")
    );
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                provider_status = 'failed',
                notes = COALESCE(notes || char(10), '') || $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .bind(note)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Flips `commission_status` from `Pending` to `Processed`. The conditional predicate makes the procedure
/// at-most-once per order. Returns the updated order, or `None` when there was nothing to process.
pub async fn process_commission(
    id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, ReconcilerError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                commission_status = 'Processed',
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND commission_status = 'Pending' AND commission_amount > 0
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}
