//! Stock-control core: part identity, balances, FIFO allocation, reversal
//! planning and export aggregation.
//!
//! Everything here is a pure function over a slice of [`StockTransaction`]s.
//! Persistence, locking and transactions live in [`crate::services::stock`].

pub mod allocator;
pub mod balance;
pub mod group_key;
pub mod ledger;
pub mod reversal;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;
use uuid::Uuid;

pub use allocator::{allocate, open_lots, AllocationPlan, LotDraw};
pub use balance::{compute_balance, verify_group, BalanceSummary, GroupCheck};
pub use group_key::{group_key, normalize_identifier, PartKey};
pub use ledger::{
    aggregate, build_ledger, build_ledgers, Direction, Ledger, LedgerEntry, LedgerIter,
    PartSummary,
};
pub use reversal::{plan_reversal, LotRefund, ReversalPlan};
pub use types::{from_rows, Issuance, Movement, PartInfo, Receipt, StockTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error("insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: PartKey,
        requested: i64,
        available: i64,
    },

    #[error("stock transaction {0} not found")]
    NotFound(Uuid),

    #[error("stock transaction {0} is malformed: {1}")]
    InvalidRecord(Uuid, String),

    #[error("MYOB number and part number must both contain at least one letter or digit")]
    IncompleteKey,
}
