//! Planning the compensating writes for a deletion.
//!
//! Deleting an issuance hands its quantity back to the group's lots, oldest
//! first. Deleting a receipt removes every issuance of the group with it and
//! zeroes the counters of the lots that survive, since no draw records remain
//! to back them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::allocator::fifo_order;
use super::group_key::PartKey;
use super::types::{Movement, StockTransaction};
use super::StockError;

/// Counter change on one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRefund {
    pub lot_id: Uuid,
    pub returned: i64,
    pub drawn_after: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum ReversalPlan {
    Issuance {
        key: PartKey,
        issuance_id: Uuid,
        quantity: i64,
        refunds: Vec<LotRefund>,
        /// Quantity no lot counter could absorb
        unreturned: i64,
    },
    Receipt {
        key: PartKey,
        receipt_id: Uuid,
        cascaded: Vec<Uuid>,
        /// Surviving lots whose counter goes back to zero
        reset_lots: Vec<Uuid>,
    },
}

impl ReversalPlan {
    pub fn key(&self) -> &PartKey {
        match self {
            ReversalPlan::Issuance { key, .. } | ReversalPlan::Receipt { key, .. } => key,
        }
    }

    /// Every record this plan removes, the target last
    pub fn deleted_ids(&self) -> Vec<Uuid> {
        match self {
            ReversalPlan::Issuance { issuance_id, .. } => vec![*issuance_id],
            ReversalPlan::Receipt {
                receipt_id,
                cascaded,
                ..
            } => cascaded
                .iter()
                .copied()
                .chain(std::iter::once(*receipt_id))
                .collect(),
        }
    }

    pub fn deleted_count(&self) -> usize {
        match self {
            ReversalPlan::Issuance { .. } => 1,
            ReversalPlan::Receipt { cascaded, .. } => cascaded.len() + 1,
        }
    }

    /// `(lot, new counter)` updates to persist before the deletions
    pub fn counter_updates(&self) -> Vec<(Uuid, i64)> {
        match self {
            ReversalPlan::Issuance { refunds, .. } => {
                refunds.iter().map(|r| (r.lot_id, r.drawn_after)).collect()
            }
            ReversalPlan::Receipt { reset_lots, .. } => {
                reset_lots.iter().map(|id| (*id, 0)).collect()
            }
        }
    }
}

/// Builds the reversal for deleting `target_id` out of the full record set.
pub fn plan_reversal(
    records: &[StockTransaction],
    target_id: Uuid,
) -> Result<ReversalPlan, StockError> {
    let target = records
        .iter()
        .find(|tx| tx.id == target_id)
        .ok_or(StockError::NotFound(target_id))?;
    let key = target.key();

    match &target.movement {
        Movement::Issuance(draw) => Ok(plan_issuance_reversal(
            records, target_id, key, draw.quantity,
        )),
        Movement::Receipt(_) => Ok(plan_receipt_removal(records, target_id, key)),
    }
}

fn plan_issuance_reversal(
    records: &[StockTransaction],
    issuance_id: Uuid,
    key: PartKey,
    quantity: i64,
) -> ReversalPlan {
    let mut lots: Vec<_> = records
        .iter()
        .filter(|tx| tx.id != issuance_id && tx.key() == key)
        .filter_map(|tx| tx.as_receipt().map(|lot| (tx, lot)))
        .collect();
    lots.sort_by(fifo_order);

    let mut remaining = quantity;
    let mut refunds = Vec::new();
    for (tx, lot) in lots {
        if remaining <= 0 {
            break;
        }
        if lot.drawn <= 0 {
            continue;
        }
        let returned = remaining.min(lot.drawn);
        refunds.push(LotRefund {
            lot_id: tx.id,
            returned,
            drawn_after: lot.drawn - returned,
        });
        remaining -= returned;
    }

    ReversalPlan::Issuance {
        key,
        issuance_id,
        quantity,
        refunds,
        unreturned: remaining,
    }
}

fn plan_receipt_removal(
    records: &[StockTransaction],
    receipt_id: Uuid,
    key: PartKey,
) -> ReversalPlan {
    let mut cascaded = Vec::new();
    let mut reset_lots = Vec::new();

    for tx in records.iter().filter(|tx| tx.id != receipt_id && tx.key() == key) {
        match &tx.movement {
            Movement::Issuance(_) => cascaded.push(tx.id),
            Movement::Receipt(lot) if lot.drawn != 0 => reset_lots.push(tx.id),
            Movement::Receipt(_) => {}
        }
    }

    ReversalPlan::Receipt {
        key,
        receipt_id,
        cascaded,
        reset_lots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::testing::{issuance, receipt};
    use assert_matches::assert_matches;

    #[test]
    fn issuance_refund_goes_oldest_lot_first() {
        let records = vec![
            receipt("HR050057", "41201-KTJ-EM00", 200, 30, (2024, 8, 10)),
            receipt("HR050057", "41201-KTJ-EM00", 150, 150, (2024, 7, 15)),
            issuance("HR050057", "41201-KTJ-EM00", 180, (2024, 8, 20)),
        ];
        let plan = plan_reversal(&records, records[2].id).unwrap();

        assert_matches!(
            &plan,
            ReversalPlan::Issuance { refunds, unreturned: 0, quantity: 180, .. } => {
                assert_eq!(refunds.len(), 2);
                assert_eq!(refunds[0].lot_id, records[1].id);
                assert_eq!(refunds[0].returned, 150);
                assert_eq!(refunds[0].drawn_after, 0);
                assert_eq!(refunds[1].lot_id, records[0].id);
                assert_eq!(refunds[1].returned, 30);
                assert_eq!(refunds[1].drawn_after, 0);
            }
        );
        assert_eq!(plan.deleted_ids(), vec![records[2].id]);
    }

    #[test]
    fn refund_skips_lots_with_nothing_drawn() {
        let records = vec![
            receipt("M1", "P1", 10, 0, (2024, 1, 1)),
            receipt("M1", "P1", 10, 4, (2024, 1, 2)),
            issuance("M1", "P1", 4, (2024, 1, 3)),
        ];
        let plan = plan_reversal(&records, records[2].id).unwrap();
        assert_eq!(plan.counter_updates(), vec![(records[1].id, 0)]);
    }

    #[test]
    fn issuance_without_lots_is_deleted_outright() {
        let records = vec![issuance("M1", "P1", 4, (2024, 1, 3))];
        let plan = plan_reversal(&records, records[0].id).unwrap();
        assert_matches!(
            plan,
            ReversalPlan::Issuance { ref refunds, unreturned: 4, .. } if refunds.is_empty()
        );
        assert_eq!(plan.deleted_count(), 1);
    }

    #[test]
    fn receipt_removal_cascades_across_the_group() {
        let records = vec![
            receipt("M1", "P1", 10, 10, (2024, 1, 1)),
            receipt("M1", "P-1", 10, 3, (2024, 1, 2)),
            issuance("M1", "P1", 6, (2024, 1, 3)),
            issuance("m1", "p1", 7, (2024, 1, 4)),
            issuance("M2", "P1", 1, (2024, 1, 4)),
        ];
        let plan = plan_reversal(&records, records[0].id).unwrap();

        assert_eq!(plan.deleted_count(), 3);
        assert_eq!(
            plan.deleted_ids(),
            vec![records[2].id, records[3].id, records[0].id]
        );
        assert_eq!(plan.counter_updates(), vec![(records[1].id, 0)]);
    }

    #[test]
    fn unknown_target_is_not_found() {
        let missing = Uuid::new_v4();
        assert_matches!(plan_reversal(&[], missing), Err(StockError::NotFound(id)) if id == missing);
    }
}
