use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::group_key::PartKey;
use super::types::{Movement, StockTransaction};

/// Totals for one logical part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub total_received: i64,
    pub total_issued: i64,
    pub balance: i64,
}

impl BalanceSummary {
    pub(crate) fn add(&mut self, movement: &Movement) {
        match movement {
            Movement::Receipt(lot) if lot.quantity > 0 => self.total_received += lot.quantity,
            Movement::Issuance(draw) if draw.quantity > 0 => self.total_issued += draw.quantity,
            _ => {}
        }
        self.balance = self.total_received - self.total_issued;
    }
}

/// Sums received and issued quantities over the records resolving to `key`.
///
/// Issued quantity comes from issuance records only; a lot's draw counter
/// mirrors those same records and is not added a second time.
pub fn compute_balance(records: &[StockTransaction], key: &PartKey) -> BalanceSummary {
    records
        .iter()
        .filter(|tx| &tx.key() == key)
        .fold(BalanceSummary::default(), |mut acc, tx| {
            acc.add(&tx.movement);
            acc
        })
}

/// Outcome of cross-checking lot counters against issuance records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheck {
    pub key: PartKey,
    pub summary: BalanceSummary,
    /// Sum of every lot's draw counter
    pub drawn_on_lots: i64,
    /// Sum of every lot's remaining capacity, clamped at zero per lot
    pub allocatable: i64,
    /// Lots whose counter is negative or exceeds their size
    pub overdrawn_lots: Vec<Uuid>,
}

impl GroupCheck {
    pub fn is_consistent(&self) -> bool {
        self.overdrawn_lots.is_empty()
            && self.drawn_on_lots == self.summary.total_issued
            && self.allocatable == self.summary.balance
    }
}

pub fn verify_group(records: &[StockTransaction], key: &PartKey) -> GroupCheck {
    let mut check = GroupCheck {
        key: key.clone(),
        summary: BalanceSummary::default(),
        drawn_on_lots: 0,
        allocatable: 0,
        overdrawn_lots: Vec::new(),
    };

    for tx in records.iter().filter(|tx| &tx.key() == key) {
        check.summary.add(&tx.movement);
        if let Movement::Receipt(lot) = &tx.movement {
            check.drawn_on_lots += lot.drawn;
            check.allocatable += lot.remaining().max(0);
            if lot.drawn < 0 || lot.drawn > lot.quantity {
                check.overdrawn_lots.push(tx.id);
            }
        }
    }

    check
}
