use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::stock::PartKey;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Bounded channel with its sender already wrapped
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends after a commit. The write already happened, so a closed channel
    /// is logged and otherwise ignored.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            counter!("stock.events.dropped", 1);
            warn!(error = %e, "stock event dropped");
        }
    }
}

/// Stock movements and maintenance runs, emitted once their writes committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StockReceived {
        transaction_id: Uuid,
        key: PartKey,
        quantity: i64,
    },
    StockIssued {
        key: PartKey,
        quantity: i64,
        issuance_ids: Vec<Uuid>,
        lots_drawn: usize,
    },
    TransactionUpdated {
        transaction_id: Uuid,
        key: PartKey,
    },
    TransactionDeleted {
        transaction_id: Uuid,
        key: PartKey,
        deleted_count: usize,
        refunded: i64,
    },
    BackupCompleted {
        path: String,
        exported_at: DateTime<Utc>,
        transaction_count: usize,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StockReceived { .. } => "stock_received",
            Event::StockIssued { .. } => "stock_issued",
            Event::TransactionUpdated { .. } => "transaction_updated",
            Event::TransactionDeleted { .. } => "transaction_deleted",
            Event::BackupCompleted { .. } => "backup_completed",
        }
    }
}

/// Drains the channel until every sender is gone; returns how many events it saw.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> u64 {
    info!("Starting event processing loop");
    let mut processed = 0u64;

    while let Some(event) = rx.recv().await {
        processed += 1;
        counter!("stock.events.processed", 1, "event" => event.name());

        match &event {
            Event::StockReceived {
                transaction_id,
                key,
                quantity,
            } => {
                info!(%transaction_id, part = %key, quantity, "stock received");
            }
            Event::StockIssued {
                key,
                quantity,
                issuance_ids,
                lots_drawn,
            } => {
                info!(
                    part = %key,
                    quantity,
                    lots_drawn,
                    records = issuance_ids.len(),
                    "stock issued"
                );
            }
            Event::TransactionUpdated {
                transaction_id,
                key,
            } => {
                info!(%transaction_id, part = %key, "stock transaction updated");
            }
            Event::TransactionDeleted {
                transaction_id,
                key,
                deleted_count,
                refunded,
            } => {
                if *deleted_count > 1 {
                    warn!(
                        %transaction_id,
                        part = %key,
                        deleted_count,
                        "receipt removal cascaded to issuances"
                    );
                } else {
                    info!(%transaction_id, part = %key, refunded, "stock transaction deleted");
                }
            }
            Event::BackupCompleted {
                path,
                exported_at,
                transaction_count,
            } => {
                info!(%path, %exported_at, transaction_count, "stock backup written");
            }
        }
    }

    warn!("Event processing loop has ended");
    processed
}
