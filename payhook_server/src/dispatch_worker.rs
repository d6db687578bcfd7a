//! Outbox dispatch worker.
//!
//! The paid transition enqueues its side effects as outbox rows inside the same database transaction that marks the
//! order paid. This worker drains those rows on an interval, strictly best-effort: a row is dispatched once and
//! marked `Sent` or `Failed`, never retried. The webhook response path never waits on anything in this module.

use log::*;
use payhook_common::{Money, Secret};
use payhook_engine::{
    db_types::{OutboxEntry, OutboxKind},
    events::PaidOrderSummary,
    traits::{ReconcilerDatabase, ReconcilerError},
    SqliteDatabase,
};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::NotifyConfig;

/// Maximum outbox rows claimed per tick.
const BATCH_SIZE: i64 = 20;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification request failed. {0}")]
    RequestFailed(String),
    #[error("Notification endpoint returned {0}")]
    ErrorResponse(u16),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::RequestFailed(e.to_string())
    }
}

/// The outbound side of the dispatcher. Split out as a trait so tests can record notifications
/// instead of making HTTP calls.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// Tells the partner system that a commission has been processed for this sale.
    async fn notify_partner(&self, summary: &PaidOrderSummary, commission: Money) -> Result<(), NotifyError>;
    /// Sends the operator a payment summary SMS.
    async fn send_operator_sms(&self, summary: &PaidOrderSummary) -> Result<(), NotifyError>;
}

/// Production [`Notifier`] backed by reqwest: a textbelt-style SMS gateway for the operator, and an optional JSON
/// POST to the partner system.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    sms_url: String,
    sms_api_key: Option<Secret<String>>,
    operator_phone: Option<String>,
    partner_notify_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            sms_url: config.sms_url.clone(),
            sms_api_key: config.sms_api_key.clone(),
            operator_phone: config.operator_phone.clone(),
            partner_notify_url: config.partner_notify_url.clone(),
        }
    }
}

impl Notifier for HttpNotifier {
    async fn notify_partner(&self, summary: &PaidOrderSummary, commission: Money) -> Result<(), NotifyError> {
        let Some(url) = &self.partner_notify_url else {
            debug!("📬️ No partner notify URL configured, skipping notification for order {}", summary.order_id);
            return Ok(());
        };
        let body = json!({ "sale_id": summary.order_id.as_str(), "commission": commission.to_string() });
        let response = self.client.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::ErrorResponse(response.status().as_u16()));
        }
        Ok(())
    }

    async fn send_operator_sms(&self, summary: &PaidOrderSummary) -> Result<(), NotifyError> {
        let (Some(key), Some(phone)) = (&self.sms_api_key, &self.operator_phone) else {
            debug!("📬️ SMS gateway not configured, skipping operator notification");
            return Ok(());
        };
        let amount = summary.paid_amount.map(|a| a.to_string()).unwrap_or_else(|| "unreported".to_string());
        let message = format!(
            "{} payment received! Order #{} - {amount}. TXID: {}",
            summary.payment_method,
            summary.order_id.short(),
            summary.transaction_id.as_deref().unwrap_or("pending")
        );
        let body = json!({ "phone": phone, "message": message, "key": key.reveal() });
        let response = self.client.post(&self.sms_url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::ErrorResponse(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Starts the dispatch worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_dispatch_worker(db: SqliteDatabase, notifier: HttpNotifier, poll_interval: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = poll_interval.to_std().unwrap_or(std::time::Duration::from_secs(10));
        let mut timer = tokio::time::interval(period);
        info!("📬️ Outbox dispatch worker started (poll every {period:?})");
        loop {
            timer.tick().await;
            match drain_outbox(&db, &notifier).await {
                Ok(0) => trace!("📬️ Outbox is empty"),
                Ok(n) => info!("📬️ Dispatched {n} outbox entries"),
                Err(e) => error!("📬️ Error draining outbox: {e}"),
            }
        }
    })
}

/// Claims one batch of pending outbox rows and dispatches each, marking it `Sent` or `Failed`.
pub async fn drain_outbox<B, N>(db: &B, notifier: &N) -> Result<usize, ReconcilerError>
where
    B: ReconcilerDatabase,
    N: Notifier,
{
    let batch = db.next_outbox_batch(BATCH_SIZE).await?;
    let count = batch.len();
    for entry in batch {
        match dispatch_entry(db, notifier, &entry).await {
            Ok(()) => db.mark_outbox_sent(entry.id).await?,
            Err(e) => {
                warn!("📬️ Dispatch of {} entry {} for order {} failed: {e}", entry.kind, entry.id, entry.order_id);
                db.mark_outbox_failed(entry.id, &e.to_string()).await?;
            },
        }
    }
    Ok(count)
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("{0}")]
    Payload(String),
    #[error("{0}")]
    Database(String),
    #[error("{0}")]
    Notify(#[from] NotifyError),
}

async fn dispatch_entry<B, N>(db: &B, notifier: &N, entry: &OutboxEntry) -> Result<(), DispatchError>
where
    B: ReconcilerDatabase,
    N: Notifier,
{
    let summary: PaidOrderSummary =
        serde_json::from_str(&entry.payload).map_err(|e| DispatchError::Payload(e.to_string()))?;
    match entry.kind {
        OutboxKind::Commission => {
            let processed = db
                .process_commission(&entry.order_id)
                .await
                .map_err(|e| DispatchError::Database(e.to_string()))?;
            match processed {
                Some(amount) => {
                    info!("📬️ Commission of {amount} processed for order {}", entry.order_id);
                    // Partner notification is fire-and-forget. A failed POST is logged but the commission has
                    // already been processed, so the entry still counts as dispatched.
                    if let Err(e) = notifier.notify_partner(&summary, amount).await {
                        warn!("📬️ Partner notification for order {} failed: {e}", entry.order_id);
                    }
                },
                None => debug!("📬️ No commission to process for order {}", entry.order_id),
            }
            Ok(())
        },
        OutboxKind::OperatorSms => {
            notifier.send_operator_sms(&summary).await?;
            Ok(())
        },
    }
}
