use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::group_key::{group_key, PartKey};
use super::StockError;
use crate::entities::stock_transaction::{self, TransactionKind};

/// Part fields carried on every record; only the first two take part in grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartInfo {
    pub myob_number: String,
    pub part_number: String,
    pub model: Option<String>,
    pub part_name: Option<String>,
    pub revision: Option<String>,
}

/// One received batch. `drawn` is the running total issued against this lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub quantity: i64,
    pub drawn: i64,
    pub received_date: DateTime<Utc>,
    pub po_number: Option<String>,
    pub supplier: Option<String>,
}

impl Receipt {
    /// Capacity still available for allocation; negative only on corrupt rows
    pub fn remaining(&self) -> i64 {
        self.quantity - self.drawn
    }
}

/// One draw against a single lot, written for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub quantity: i64,
    pub issue_date: DateTime<Utc>,
    pub invoice_number: Option<String>,
    pub customer: Option<String>,
    pub withdrawal_number: Option<String>,
    pub event: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// Inherited from the lot unless overridden by the request
    pub supplier: Option<String>,
    pub po_number: Option<String>,
    pub lot_received_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Movement {
    Receipt(Receipt),
    Issuance(Issuance),
}

impl Movement {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Movement::Receipt(_) => TransactionKind::Receipt,
            Movement::Issuance(_) => TransactionKind::Issuance,
        }
    }

    /// Date the movement took effect: receipt date or issue date
    pub fn effective_date(&self) -> DateTime<Utc> {
        match self {
            Movement::Receipt(r) => r.received_date,
            Movement::Issuance(i) => i.issue_date,
        }
    }
}

/// A log row after its kind has been checked against its quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub id: Uuid,
    pub part: PartInfo,
    pub movement: Movement,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockTransaction {
    pub fn key(&self) -> PartKey {
        group_key(&self.part)
    }

    pub fn as_receipt(&self) -> Option<&Receipt> {
        match &self.movement {
            Movement::Receipt(r) => Some(r),
            Movement::Issuance(_) => None,
        }
    }

    pub fn as_issuance(&self) -> Option<&Issuance> {
        match &self.movement {
            Movement::Issuance(i) => Some(i),
            Movement::Receipt(_) => None,
        }
    }
}

impl TryFrom<stock_transaction::Model> for StockTransaction {
    type Error = StockError;

    fn try_from(row: stock_transaction::Model) -> Result<Self, Self::Error> {
        let kind: TransactionKind = row
            .kind
            .parse()
            .map_err(|e| StockError::InvalidRecord(row.id, e))?;

        let movement = match kind {
            TransactionKind::Receipt => {
                if row.received_qty <= 0 {
                    return Err(StockError::InvalidRecord(
                        row.id,
                        format!("receipt with received_qty {}", row.received_qty),
                    ));
                }
                if row.issued_qty < 0 {
                    return Err(StockError::InvalidRecord(
                        row.id,
                        format!("receipt with negative draw counter {}", row.issued_qty),
                    ));
                }
                let received_date = row.received_date.ok_or_else(|| {
                    StockError::InvalidRecord(row.id, "receipt without received_date".into())
                })?;
                Movement::Receipt(Receipt {
                    quantity: row.received_qty,
                    drawn: row.issued_qty,
                    received_date,
                    po_number: row.po_number,
                    supplier: row.supplier,
                })
            }
            TransactionKind::Issuance => {
                if row.received_qty != 0 || row.issued_qty <= 0 {
                    return Err(StockError::InvalidRecord(
                        row.id,
                        format!(
                            "issuance with received_qty {} and issued_qty {}",
                            row.received_qty, row.issued_qty
                        ),
                    ));
                }
                let issue_date = row.issue_date.ok_or_else(|| {
                    StockError::InvalidRecord(row.id, "issuance without issue_date".into())
                })?;
                Movement::Issuance(Issuance {
                    quantity: row.issued_qty,
                    issue_date,
                    invoice_number: row.invoice_number,
                    customer: row.customer,
                    withdrawal_number: row.withdrawal_number,
                    event: row.event,
                    due_date: row.due_date,
                    supplier: row.supplier,
                    po_number: row.po_number,
                    lot_received_date: row.received_date,
                })
            }
        };

        Ok(StockTransaction {
            id: row.id,
            part: PartInfo {
                myob_number: row.myob_number,
                part_number: row.part_number,
                model: row.model,
                part_name: row.part_name,
                revision: row.revision,
            },
            movement,
            remarks: row.remarks,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Checked conversion of a whole scan; the first bad row aborts.
pub fn from_rows(rows: Vec<stock_transaction::Model>) -> Result<Vec<StockTransaction>, StockError> {
    rows.into_iter().map(StockTransaction::try_from).collect()
}
