use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::transaction,
    entities::stock_transaction::{Model as StockTransactionModel, TransactionKind},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{
        NewStockTransaction, RecordUpdate, SortField, StockTransactionRepository,
        TransactionFilter,
    },
    stock::{
        aggregate, allocate, build_ledger, build_ledgers, compute_balance, from_rows,
        plan_reversal, verify_group, BalanceSummary, GroupCheck, Issuance, Ledger, Movement,
        PartInfo, PartKey, PartSummary, Receipt, ReversalPlan, StockError, StockTransaction,
    },
};

const DEFAULT_EDIT_WINDOW_HOURS: i64 = 24;

// Quantity fields accept 1..=1_000_000_000 so group sums stay far inside i64.

/// Creates one receipt lot
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReceiveRequest {
    #[validate(length(min = 1, max = 64))]
    pub myob_number: String,
    #[validate(length(min = 1, max = 64))]
    pub part_number: String,
    #[validate(length(max = 128))]
    pub model: Option<String>,
    #[validate(length(max = 255))]
    pub part_name: Option<String>,
    #[validate(length(max = 32))]
    pub revision: Option<String>,
    #[validate(range(min = 1, max = 1_000_000_000))]
    pub quantity: i64,
    /// Defaults to the time of the request
    pub received_date: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub po_number: Option<String>,
    #[validate(length(max = 255))]
    pub supplier: Option<String>,
    #[validate(length(max = 2000))]
    pub remarks: Option<String>,
}

/// Draws `quantity` of one part across its lots, oldest first
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct IssueRequest {
    #[validate(length(min = 1, max = 64))]
    pub myob_number: String,
    #[validate(length(min = 1, max = 64))]
    pub part_number: String,
    #[validate(range(min = 1, max = 1_000_000_000))]
    pub quantity: i64,
    /// Defaults to the time of the request
    pub issue_date: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub invoice_number: Option<String>,
    #[validate(length(max = 255))]
    pub customer: Option<String>,
    #[validate(length(max = 64))]
    pub withdrawal_number: Option<String>,
    #[validate(length(max = 255))]
    pub event: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// Overrides the supplier inherited from each lot
    #[validate(length(max = 255))]
    pub supplier: Option<String>,
    #[validate(length(max = 2000))]
    pub remarks: Option<String>,
}

/// In-place edit of a recent transaction. Part identity, kind and issued
/// quantity are accepted only when they restate the stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct TransactionPatch {
    pub myob_number: Option<String>,
    pub part_number: Option<String>,
    pub kind: Option<TransactionKind>,
    #[validate(length(max = 128))]
    pub model: Option<String>,
    #[validate(length(max = 255))]
    pub part_name: Option<String>,
    #[validate(length(max = 32))]
    pub revision: Option<String>,
    #[validate(length(max = 2000))]
    pub remarks: Option<String>,
    #[validate(range(min = 1, max = 1_000_000_000))]
    pub quantity: Option<i64>,
    pub received_date: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub po_number: Option<String>,
    #[validate(length(max = 255))]
    pub supplier: Option<String>,
    pub issue_date: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub invoice_number: Option<String>,
    #[validate(length(max = 255))]
    pub customer: Option<String>,
    #[validate(length(max = 64))]
    pub withdrawal_number: Option<String>,
    #[validate(length(max = 255))]
    pub event: Option<String>,
    pub due_date: Option<NaiveDate>,
}

/// Query side of `list_transactions`. Identifiers are compared after
/// normalization, so any spelling of a part matches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub myob_number: Option<String>,
    pub part_number: Option<String>,
    pub kind: Option<TransactionKind>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: SortField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_count: usize,
    pub deleted_ids: Vec<Uuid>,
    /// Quantity handed back to lot counters
    pub refunded: i64,
}

type PartLocks = Arc<DashMap<PartKey, Arc<Mutex<()>>>>;

/// Holds one part's mutex. On drop the map entry is removed once no other
/// task holds or waits on it, so the map only tracks parts in use.
struct PartGuard {
    locks: PartLocks,
    key: PartKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PartGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // entries are cloned under the shard lock, so a count of 1 means idle
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

async fn lock_part(locks: &PartLocks, key: &PartKey) -> PartGuard {
    let lock = locks
        .entry(key.clone())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    PartGuard {
        locks: locks.clone(),
        key: key.clone(),
        guard: Some(lock.lock_owned().await),
    }
}

/// Stock operations over the transaction log. Mutations on one part are
/// serialized and each runs inside a single database transaction.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    locks: PartLocks,
    edit_window: Duration,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self {
            db,
            event_sender,
            locks: Arc::new(DashMap::new()),
            edit_window: Duration::hours(DEFAULT_EDIT_WINDOW_HOURS),
        }
    }

    pub fn with_edit_window(mut self, edit_window: Duration) -> Self {
        self.edit_window = edit_window;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn lock_part(&self, key: &PartKey) -> PartGuard {
        lock_part(&self.locks, key).await
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.publish(event).await;
        }
    }

    /// Checked records of one part, in creation order
    async fn load_group<C: ConnectionTrait>(
        repo: &StockTransactionRepository<'_, C>,
        key: &PartKey,
    ) -> Result<Vec<StockTransaction>, ServiceError> {
        let rows: Vec<StockTransactionModel> = repo
            .find_all(&TransactionFilter::default(), SortField::CreatedAt)
            .await?
            .into_iter()
            .filter(|row| &PartKey::new(&row.myob_number, &row.part_number) == key)
            .collect();
        Ok(from_rows(rows)?)
    }

    async fn load_all(&self) -> Result<Vec<StockTransaction>, ServiceError> {
        let rows = StockTransactionRepository::new(&*self.db)
            .find_all(&TransactionFilter::default(), SortField::CreatedAt)
            .await?;
        Ok(from_rows(rows)?)
    }

    /// Records a received lot
    #[instrument(skip(self, request), fields(myob = %request.myob_number, part = %request.part_number, quantity = request.quantity))]
    pub async fn receive(&self, request: ReceiveRequest) -> Result<StockTransaction, ServiceError> {
        request.validate()?;
        let key = complete_key(&request.myob_number, &request.part_number)?;

        let _guard = self.lock_part(&key).await;

        let uow = transaction::begin(&self.db, "stock.receive").await?;
        let row = StockTransactionRepository::new(uow.txn())
            .create(NewStockTransaction {
                part: PartInfo {
                    myob_number: request.myob_number,
                    part_number: request.part_number,
                    model: request.model,
                    part_name: request.part_name,
                    revision: request.revision,
                },
                movement: Movement::Receipt(Receipt {
                    quantity: request.quantity,
                    drawn: 0,
                    received_date: request.received_date.unwrap_or_else(Utc::now),
                    po_number: request.po_number,
                    supplier: request.supplier,
                }),
                remarks: request.remarks,
            })
            .await?;
        uow.commit().await?;

        let received = StockTransaction::try_from(row)?;
        counter!("stock.receive.count", 1);
        info!(transaction_id = %received.id, part = %key, "receipt recorded");
        self.emit(Event::StockReceived {
            transaction_id: received.id,
            key,
            quantity: request.quantity,
        })
        .await;

        Ok(received)
    }

    /// Allocates an issue across the part's lots and writes one issuance
    /// record per lot drawn from, together with the lots' new counters.
    #[instrument(skip(self, request), fields(myob = %request.myob_number, part = %request.part_number, quantity = request.quantity))]
    pub async fn issue(&self, request: IssueRequest) -> Result<Vec<StockTransaction>, ServiceError> {
        request.validate()?;
        let key = complete_key(&request.myob_number, &request.part_number)?;

        let _guard = self.lock_part(&key).await;

        let uow = transaction::begin(&self.db, "stock.issue").await?;
        let repo = StockTransactionRepository::new(uow.txn());
        let records = Self::load_group(&repo, &key).await?;

        let plan = allocate(&records, &key, request.quantity).map_err(|err| {
            if let StockError::InsufficientStock { available, .. } = &err {
                counter!("stock.issue.insufficient", 1);
                warn!(part = %key, requested = request.quantity, available, "issue rejected");
            }
            ServiceError::from(err)
        })?;

        let issue_date = request.issue_date.unwrap_or_else(Utc::now);
        let mut issued = Vec::with_capacity(plan.draws.len());

        for draw in &plan.draws {
            let (lot_tx, lot) = records
                .iter()
                .find(|tx| tx.id == draw.lot_id)
                .and_then(|tx| tx.as_receipt().map(|lot| (tx, lot)))
                .ok_or_else(|| {
                    ServiceError::InternalError(format!("planned lot {} vanished", draw.lot_id))
                })?;

            repo.update(draw.lot_id, RecordUpdate::drawn(draw.drawn_after()))
                .await?;

            let row = repo
                .create(NewStockTransaction {
                    part: lot_tx.part.clone(),
                    movement: Movement::Issuance(Issuance {
                        quantity: draw.quantity,
                        issue_date,
                        invoice_number: request.invoice_number.clone(),
                        customer: request.customer.clone(),
                        withdrawal_number: request.withdrawal_number.clone(),
                        event: request.event.clone(),
                        due_date: request.due_date,
                        supplier: request.supplier.clone().or_else(|| lot.supplier.clone()),
                        po_number: lot.po_number.clone(),
                        lot_received_date: Some(lot.received_date),
                    }),
                    remarks: request.remarks.clone(),
                })
                .await?;
            issued.push(StockTransaction::try_from(row)?);
        }

        uow.commit().await?;

        counter!("stock.issue.count", 1);
        counter!("stock.issue.lots_drawn", plan.draws.len() as u64);
        info!(part = %key, quantity = plan.total(), lots = plan.draws.len(), "stock issued");
        self.emit(Event::StockIssued {
            key,
            quantity: plan.total(),
            issuance_ids: issued.iter().map(|tx| tx.id).collect(),
            lots_drawn: plan.draws.len(),
        })
        .await;

        Ok(issued)
    }

    /// Fast-fail guard for callers about to issue. The allocation inside
    /// [`StockService::issue`] stays the authoritative check.
    pub async fn check_issue(
        &self,
        key: &PartKey,
        quantity: i64,
    ) -> Result<BalanceSummary, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        let summary = self.get_balance(key).await?;
        if quantity > summary.balance {
            return Err(ServiceError::ValidationError(format!(
                "requested {} of {} exceeds balance {}",
                quantity, key, summary.balance
            )));
        }
        Ok(summary)
    }

    pub async fn get_balance(&self, key: &PartKey) -> Result<BalanceSummary, ServiceError> {
        let repo = StockTransactionRepository::new(&*self.db);
        let records = Self::load_group(&repo, key).await?;
        Ok(compute_balance(&records, key))
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<StockTransaction, ServiceError> {
        let row = StockTransactionRepository::new(&*self.db)
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::transaction_not_found(id))?;
        Ok(StockTransaction::try_from(row)?)
    }

    pub async fn list_transactions(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<StockTransaction>, ServiceError> {
        let rows = StockTransactionRepository::new(&*self.db)
            .find_all(
                &TransactionFilter {
                    kind: filter.kind,
                    created_from: filter.created_from,
                    created_to: filter.created_to,
                },
                filter.sort,
            )
            .await?;

        let myob = filter.myob_number.as_deref().map(crate::stock::normalize_identifier);
        let part = filter.part_number.as_deref().map(crate::stock::normalize_identifier);

        let matching = rows
            .into_iter()
            .filter(|row| {
                let key = PartKey::new(&row.myob_number, &row.part_number);
                myob.as_deref().map_or(true, |m| key.myob() == m)
                    && part.as_deref().map_or(true, |p| key.part() == p)
            })
            .collect();
        Ok(from_rows(matching)?)
    }

    pub async fn update_transaction(
        &self,
        id: Uuid,
        patch: TransactionPatch,
    ) -> Result<StockTransaction, ServiceError> {
        self.update_transaction_at(id, patch, Utc::now()).await
    }

    /// Applies `patch` as if the edit happened at `now`
    #[instrument(skip(self, patch))]
    pub async fn update_transaction_at(
        &self,
        id: Uuid,
        patch: TransactionPatch,
        now: DateTime<Utc>,
    ) -> Result<StockTransaction, ServiceError> {
        patch.validate()?;
        let key = self.get_transaction(id).await?.key();

        let _guard = self.lock_part(&key).await;

        let uow = transaction::begin(&self.db, "stock.update").await?;
        let repo = StockTransactionRepository::new(uow.txn());
        let current = repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::transaction_not_found(id))
            .and_then(|row| Ok(StockTransaction::try_from(row)?))?;

        if now - current.created_at > self.edit_window {
            return Err(ServiceError::InvalidOperation(format!(
                "transaction {} is past its {}h edit window",
                id,
                self.edit_window.num_hours()
            )));
        }

        let update = plan_update(&current, patch)?;
        let row = repo.update(id, update).await?;
        uow.commit().await?;

        counter!("stock.update.count", 1);
        self.emit(Event::TransactionUpdated {
            transaction_id: id,
            key,
        })
        .await;
        Ok(StockTransaction::try_from(row)?)
    }

    /// Deletes a transaction together with its compensating writes: lot
    /// refunds for an issuance, the group's issuances for a receipt.
    #[instrument(skip(self))]
    pub async fn delete_transaction(&self, id: Uuid) -> Result<DeleteOutcome, ServiceError> {
        let key = self.get_transaction(id).await?.key();

        let _guard = self.lock_part(&key).await;

        let uow = transaction::begin(&self.db, "stock.delete").await?;
        let repo = StockTransactionRepository::new(uow.txn());
        let records = Self::load_group(&repo, &key).await?;
        let plan = plan_reversal(&records, id)?;

        for (lot_id, drawn) in plan.counter_updates() {
            repo.update(lot_id, RecordUpdate::drawn(drawn)).await?;
        }
        let deleted_ids = plan.deleted_ids();
        for deleted in &deleted_ids {
            repo.delete(*deleted).await?;
        }
        uow.commit().await?;

        let refunded = match &plan {
            ReversalPlan::Issuance {
                quantity,
                unreturned,
                ..
            } => {
                if *unreturned > 0 {
                    warn!(transaction_id = %id, unreturned, "issuance had no lot to return to");
                }
                quantity - unreturned
            }
            ReversalPlan::Receipt { cascaded, .. } => {
                counter!("stock.delete.cascade", cascaded.len() as u64);
                0
            }
        };
        counter!("stock.delete.count", 1);

        let outcome = DeleteOutcome {
            deleted_count: plan.deleted_count(),
            deleted_ids,
            refunded,
        };
        info!(transaction_id = %id, part = %key, deleted = outcome.deleted_count, refunded, "transaction deleted");
        self.emit(Event::TransactionDeleted {
            transaction_id: id,
            key,
            deleted_count: outcome.deleted_count,
            refunded,
        })
        .await;
        Ok(outcome)
    }

    /// Every record, checked, in creation order
    pub async fn snapshot(&self) -> Result<Vec<StockTransaction>, ServiceError> {
        self.load_all().await
    }

    pub async fn export_summary(&self) -> Result<BTreeMap<PartKey, PartSummary>, ServiceError> {
        Ok(aggregate(&self.load_all().await?))
    }

    pub async fn export_ledger(&self, key: &PartKey) -> Result<Ledger, ServiceError> {
        let repo = StockTransactionRepository::new(&*self.db);
        Ok(build_ledger(&Self::load_group(&repo, key).await?, key))
    }

    pub async fn export_ledgers(&self) -> Result<BTreeMap<PartKey, Ledger>, ServiceError> {
        Ok(build_ledgers(&self.load_all().await?))
    }

    pub async fn verify(&self, key: &PartKey) -> Result<GroupCheck, ServiceError> {
        let repo = StockTransactionRepository::new(&*self.db);
        Ok(verify_group(&Self::load_group(&repo, key).await?, key))
    }

    /// Checks every part present in the log
    pub async fn verify_all(&self) -> Result<Vec<GroupCheck>, ServiceError> {
        let records = self.load_all().await?;
        let mut keys: Vec<PartKey> = records.iter().map(StockTransaction::key).collect();
        keys.sort();
        keys.dedup();
        Ok(keys
            .iter()
            .map(|key| verify_group(&records, key))
            .collect())
    }
}

fn complete_key(myob_number: &str, part_number: &str) -> Result<PartKey, ServiceError> {
    let key = PartKey::new(myob_number, part_number);
    if key.is_complete() {
        Ok(key)
    } else {
        Err(StockError::IncompleteKey.into())
    }
}

fn immutable(field: &str) -> ServiceError {
    ServiceError::InvalidOperation(format!("{} cannot be changed after creation", field))
}

fn not_applicable(field: &str, kind: TransactionKind) -> ServiceError {
    ServiceError::InvalidOperation(format!("{} does not apply to a {} record", field, kind))
}

/// Turns a user patch into column updates, rejecting edits the record's
/// kind does not allow.
fn plan_update(
    current: &StockTransaction,
    patch: TransactionPatch,
) -> Result<RecordUpdate, ServiceError> {
    let kind = current.movement.kind();

    if matches!(&patch.myob_number, Some(v) if *v != current.part.myob_number) {
        return Err(immutable("myob_number"));
    }
    if matches!(&patch.part_number, Some(v) if *v != current.part.part_number) {
        return Err(immutable("part_number"));
    }
    if matches!(patch.kind, Some(k) if k != kind) {
        return Err(immutable("kind"));
    }

    let mut update = RecordUpdate {
        model: patch.model,
        part_name: patch.part_name,
        revision: patch.revision,
        remarks: patch.remarks,
        po_number: patch.po_number,
        supplier: patch.supplier,
        ..Default::default()
    };

    match &current.movement {
        Movement::Receipt(lot) => {
            for (field, set) in [
                ("issue_date", patch.issue_date.is_some()),
                ("invoice_number", patch.invoice_number.is_some()),
                ("customer", patch.customer.is_some()),
                ("withdrawal_number", patch.withdrawal_number.is_some()),
                ("event", patch.event.is_some()),
                ("due_date", patch.due_date.is_some()),
            ] {
                if set {
                    return Err(not_applicable(field, kind));
                }
            }
            if let Some(quantity) = patch.quantity {
                if quantity < lot.drawn {
                    return Err(ServiceError::InvalidOperation(format!(
                        "lot quantity {} is below the {} already drawn from it",
                        quantity, lot.drawn
                    )));
                }
                update.received_qty = Some(quantity);
            }
            update.received_date = patch.received_date;
        }
        Movement::Issuance(draw) => {
            if matches!(patch.quantity, Some(q) if q != draw.quantity) {
                return Err(immutable("issued quantity"));
            }
            if patch.received_date.is_some() {
                return Err(not_applicable("received_date", kind));
            }
            update.issue_date = patch.issue_date;
            update.invoice_number = patch.invoice_number;
            update.customer = patch.customer;
            update.withdrawal_number = patch.withdrawal_number;
            update.event = patch.event;
            update.due_date = patch.due_date;
        }
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::testing::{issuance, receipt};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn idle_part_locks_are_dropped_from_the_map() {
        let locks: PartLocks = Arc::new(DashMap::new());
        let key = PartKey::new("HR050057", "41201");

        let first = lock_part(&locks, &key).await;
        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move { lock_part(&locks, &key).await })
        };
        while Arc::strong_count(&locks.get(&key).unwrap()) < 3 {
            tokio::task::yield_now().await;
        }

        drop(first);
        let second = waiter.await.unwrap();
        assert_eq!(locks.len(), 1);

        drop(second);
        assert!(locks.is_empty());
    }

    #[test]
    fn receipt_patch_maps_lot_fields() {
        let lot = receipt("M1", "P1", 10, 4, (2024, 1, 1));
        let update = plan_update(
            &lot,
            TransactionPatch {
                quantity: Some(12),
                supplier: Some("Osaka Tooling".into()),
                myob_number: Some("M1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(update.received_qty, Some(12));
        assert_eq!(update.supplier.as_deref(), Some("Osaka Tooling"));
        assert_eq!(update.issued_qty, None);
    }

    #[test]
    fn lot_cannot_shrink_below_its_draws() {
        let lot = receipt("M1", "P1", 10, 4, (2024, 1, 1));
        let patch = TransactionPatch {
            quantity: Some(3),
            ..Default::default()
        };
        assert_matches!(plan_update(&lot, patch), Err(ServiceError::InvalidOperation(_)));
    }

    #[test]
    fn identity_and_issued_quantity_are_fixed() {
        let draw = issuance("M1", "P1", 6, (2024, 1, 2));
        for patch in [
            TransactionPatch {
                part_number: Some("P2".into()),
                ..Default::default()
            },
            TransactionPatch {
                kind: Some(TransactionKind::Receipt),
                ..Default::default()
            },
            TransactionPatch {
                quantity: Some(7),
                ..Default::default()
            },
            TransactionPatch {
                received_date: Some(Utc::now()),
                ..Default::default()
            },
        ] {
            assert_matches!(plan_update(&draw, patch), Err(ServiceError::InvalidOperation(_)));
        }
    }

    #[test]
    fn issuance_fields_are_rejected_on_receipts() {
        let lot = receipt("M1", "P1", 10, 0, (2024, 1, 1));
        let patch = TransactionPatch {
            invoice_number: Some("INV-9".into()),
            ..Default::default()
        };
        assert_matches!(plan_update(&lot, patch), Err(ServiceError::InvalidOperation(_)));
    }

    #[test]
    fn blank_identifiers_are_incomplete() {
        assert_matches!(complete_key("—", "41201"), Err(ServiceError::ValidationError(_)));
        assert!(complete_key("HR050057", "41201").is_ok());
    }
}
