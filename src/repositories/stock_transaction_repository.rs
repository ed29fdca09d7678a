use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::stock_transaction::{
    ActiveModel as StockTransactionActiveModel, Column, Entity as StockTransactionEntity,
    Model as StockTransactionModel, TransactionKind,
};
use crate::errors::ServiceError;
use crate::stock::{Movement, PartInfo};

/// Column the scan is ordered by, ascending. Ties always fall back to
/// creation time and then id, so results never depend on insertion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    ReceivedDate,
    IssueDate,
}

impl SortField {
    fn column(&self) -> Column {
        match self {
            SortField::CreatedAt => Column::CreatedAt,
            SortField::ReceivedDate => Column::ReceivedDate,
            SortField::IssueDate => Column::IssueDate,
        }
    }
}

/// Store-side filter. Part matching is not done here: identifiers are only
/// comparable after normalization, which happens on the domain side.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    fn condition(&self) -> Condition {
        let mut cond = Condition::all();
        if let Some(kind) = self.kind {
            cond = cond.add(Column::Kind.eq(kind.as_str()));
        }
        if let Some(from) = self.created_from {
            cond = cond.add(Column::CreatedAt.gte(from));
        }
        if let Some(to) = self.created_to {
            cond = cond.add(Column::CreatedAt.lt(to));
        }
        cond
    }
}

/// A record about to be written; id and timestamps are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewStockTransaction {
    pub part: PartInfo,
    pub movement: Movement,
    pub remarks: Option<String>,
}

impl NewStockTransaction {
    fn into_active_model(self) -> StockTransactionActiveModel {
        let mut model = StockTransactionActiveModel {
            kind: Set(self.movement.kind().as_str().to_string()),
            myob_number: Set(self.part.myob_number),
            part_number: Set(self.part.part_number),
            model: Set(self.part.model),
            part_name: Set(self.part.part_name),
            revision: Set(self.part.revision),
            remarks: Set(self.remarks),
            ..Default::default()
        };

        match self.movement {
            Movement::Receipt(lot) => {
                model.received_qty = Set(lot.quantity);
                model.issued_qty = Set(lot.drawn);
                model.received_date = Set(Some(lot.received_date));
                model.po_number = Set(lot.po_number);
                model.supplier = Set(lot.supplier);
                model.issue_date = Set(None);
                model.invoice_number = Set(None);
                model.customer = Set(None);
                model.withdrawal_number = Set(None);
                model.event = Set(None);
                model.due_date = Set(None);
            }
            Movement::Issuance(draw) => {
                model.received_qty = Set(0);
                model.issued_qty = Set(draw.quantity);
                model.received_date = Set(draw.lot_received_date);
                model.po_number = Set(draw.po_number);
                model.supplier = Set(draw.supplier);
                model.issue_date = Set(Some(draw.issue_date));
                model.invoice_number = Set(draw.invoice_number);
                model.customer = Set(draw.customer);
                model.withdrawal_number = Set(draw.withdrawal_number);
                model.event = Set(draw.event);
                model.due_date = Set(draw.due_date);
            }
        }
        model
    }
}

/// Column-level partial update. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub model: Option<String>,
    pub part_name: Option<String>,
    pub revision: Option<String>,
    pub received_qty: Option<i64>,
    pub received_date: Option<DateTime<Utc>>,
    pub po_number: Option<String>,
    pub supplier: Option<String>,
    /// Issued quantity on issuances, draw counter on receipts
    pub issued_qty: Option<i64>,
    pub issue_date: Option<DateTime<Utc>>,
    pub invoice_number: Option<String>,
    pub customer: Option<String>,
    pub withdrawal_number: Option<String>,
    pub event: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

impl RecordUpdate {
    pub fn drawn(counter: i64) -> Self {
        Self {
            issued_qty: Some(counter),
            ..Default::default()
        }
    }

    fn apply(self, active: &mut StockTransactionActiveModel) {
        if let Some(v) = self.model {
            active.model = Set(Some(v));
        }
        if let Some(v) = self.part_name {
            active.part_name = Set(Some(v));
        }
        if let Some(v) = self.revision {
            active.revision = Set(Some(v));
        }
        if let Some(v) = self.received_qty {
            active.received_qty = Set(v);
        }
        if let Some(v) = self.received_date {
            active.received_date = Set(Some(v));
        }
        if let Some(v) = self.po_number {
            active.po_number = Set(Some(v));
        }
        if let Some(v) = self.supplier {
            active.supplier = Set(Some(v));
        }
        if let Some(v) = self.issued_qty {
            active.issued_qty = Set(v);
        }
        if let Some(v) = self.issue_date {
            active.issue_date = Set(Some(v));
        }
        if let Some(v) = self.invoice_number {
            active.invoice_number = Set(Some(v));
        }
        if let Some(v) = self.customer {
            active.customer = Set(Some(v));
        }
        if let Some(v) = self.withdrawal_number {
            active.withdrawal_number = Set(Some(v));
        }
        if let Some(v) = self.event {
            active.event = Set(Some(v));
        }
        if let Some(v) = self.due_date {
            active.due_date = Set(Some(v));
        }
        if let Some(v) = self.remarks {
            active.remarks = Set(Some(v));
        }
    }
}

/// Transaction log store over any connection: the pool for reads, an open
/// database transaction for the writes of one stock operation.
#[derive(Debug)]
pub struct StockTransactionRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> StockTransactionRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Full or filtered scan in ascending `sort` order
    pub async fn find_all(
        &self,
        filter: &TransactionFilter,
        sort: SortField,
    ) -> Result<Vec<StockTransactionModel>, ServiceError> {
        let mut query = StockTransactionEntity::find().filter(filter.condition());
        if sort != SortField::CreatedAt {
            query = query.order_by_asc(sort.column());
        }
        query
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<StockTransactionModel>, ServiceError> {
        StockTransactionEntity::find_by_id(id)
            .one(self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn create(
        &self,
        record: NewStockTransaction,
    ) -> Result<StockTransactionModel, ServiceError> {
        record
            .into_active_model()
            .insert(self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Merges `update` into the stored row and bumps `updated_at`
    pub async fn update(
        &self,
        id: Uuid,
        update: RecordUpdate,
    ) -> Result<StockTransactionModel, ServiceError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::transaction_not_found(id))?;

        let mut active_model: StockTransactionActiveModel = existing.into();
        update.apply(&mut active_model);

        active_model
            .update(self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = StockTransactionEntity::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::transaction_not_found(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::stock::{Issuance, Receipt};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use sea_orm::DatabaseConnection;

    async fn db() -> DatabaseConnection {
        let db = establish_connection_with_config(&DbConfig::in_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        db
    }

    fn part() -> PartInfo {
        PartInfo {
            myob_number: "HR050057".into(),
            part_number: "41201-KTJ-EM00".into(),
            ..PartInfo::default()
        }
    }

    fn lot(qty: i64, day: u32) -> NewStockTransaction {
        NewStockTransaction {
            part: part(),
            movement: Movement::Receipt(Receipt {
                quantity: qty,
                drawn: 0,
                received_date: Utc.with_ymd_and_hms(2024, 7, day, 0, 0, 0).unwrap(),
                po_number: Some("PO-7".into()),
                supplier: Some("Kyoto Metal".into()),
            }),
            remarks: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_identity_and_timestamps() {
        let db = db().await;
        let repo = StockTransactionRepository::new(&db);
        let row = repo.create(lot(150, 15)).await.unwrap();

        assert_eq!(row.kind, "receipt");
        assert_eq!(row.received_qty, 150);
        assert_eq!(row.issued_qty, 0);
        assert!(row.updated_at >= row.created_at);
        assert_eq!(repo.find_by_id(row.id).await.unwrap(), Some(row));
    }

    #[tokio::test]
    async fn find_all_sorts_by_requested_column() {
        let db = db().await;
        let repo = StockTransactionRepository::new(&db);
        let late = repo.create(lot(10, 20)).await.unwrap();
        let early = repo.create(lot(10, 1)).await.unwrap();
        repo.create(NewStockTransaction {
            part: part(),
            movement: Movement::Issuance(Issuance {
                quantity: 3,
                issue_date: Utc::now(),
                invoice_number: Some("INV-1".into()),
                customer: None,
                withdrawal_number: None,
                event: None,
                due_date: None,
                supplier: None,
                po_number: None,
                lot_received_date: None,
            }),
            remarks: None,
        })
        .await
        .unwrap();

        let receipts = repo
            .find_all(
                &TransactionFilter {
                    kind: Some(TransactionKind::Receipt),
                    ..Default::default()
                },
                SortField::ReceivedDate,
            )
            .await
            .unwrap();
        let ids: Vec<_> = receipts.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let everything = repo
            .find_all(&TransactionFilter::default(), SortField::CreatedAt)
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn update_merges_only_given_columns() {
        let db = db().await;
        let repo = StockTransactionRepository::new(&db);
        let row = repo.create(lot(150, 15)).await.unwrap();

        let updated = repo.update(row.id, RecordUpdate::drawn(40)).await.unwrap();
        assert_eq!(updated.issued_qty, 40);
        assert_eq!(updated.received_qty, 150);
        assert_eq!(updated.supplier.as_deref(), Some("Kyoto Metal"));
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let db = db().await;
        let repo = StockTransactionRepository::new(&db);
        let id = Uuid::new_v4();
        assert_matches!(repo.delete(id).await, Err(ServiceError::NotFound(_)));
        assert_matches!(
            repo.update(id, RecordUpdate::default()).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
