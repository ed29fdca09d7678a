/*!
 * Transaction Helper Utilities
 *
 * Every stock mutation runs between `begin` and `commit`. Dropping the
 * transaction without committing rolls it back, so an early `?` return leaves
 * the store untouched.
 */

use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::time::Instant;
use tracing::debug;

use crate::errors::ServiceError;

/// An open transaction tagged with the operation it belongs to
pub struct UnitOfWork {
    txn: DatabaseTransaction,
    operation: &'static str,
    started: Instant,
}

impl UnitOfWork {
    pub fn txn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits every write made through [`UnitOfWork::txn`]
    pub async fn commit(self) -> Result<(), ServiceError> {
        self.txn.commit().await.map_err(ServiceError::db_error)?;
        let elapsed = self.started.elapsed();
        histogram!("factory_stock_db.transaction.duration", elapsed, "operation" => self.operation);
        counter!("factory_stock_db.transaction.committed", 1, "operation" => self.operation);
        debug!(operation = self.operation, "transaction committed in {:?}", elapsed);
        Ok(())
    }
}

/// Starts a transaction for `operation`
pub async fn begin(
    db: &DatabaseConnection,
    operation: &'static str,
) -> Result<UnitOfWork, ServiceError> {
    let txn = db.begin().await.map_err(ServiceError::db_error)?;
    counter!("factory_stock_db.transaction.started", 1, "operation" => operation);
    debug!(operation, "transaction started");
    Ok(UnitOfWork {
        txn,
        operation,
        started: Instant::now(),
    })
}
