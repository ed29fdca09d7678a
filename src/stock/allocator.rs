//! FIFO allocation of an issue request across receipt lots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use super::group_key::PartKey;
use super::types::{Receipt, StockTransaction};
use super::StockError;

/// One step of a plan: take `quantity` from lot `lot_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: Uuid,
    pub quantity: i64,
    /// Lot counter before this draw
    pub drawn_before: i64,
    pub received_date: DateTime<Utc>,
}

impl LotDraw {
    pub fn drawn_after(&self) -> i64 {
        self.drawn_before + self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub key: PartKey,
    pub requested: i64,
    pub draws: Vec<LotDraw>,
}

impl AllocationPlan {
    pub fn total(&self) -> i64 {
        self.draws.iter().map(|d| d.quantity).sum()
    }
}

/// Receipt lots of `key` that still have capacity, oldest received first.
///
/// Ties on the receipt date fall back to creation time, then id, so the order
/// never depends on how the store happened to return the rows.
pub fn open_lots<'a>(
    records: &'a [StockTransaction],
    key: &PartKey,
) -> Vec<(&'a StockTransaction, &'a Receipt)> {
    let mut lots: Vec<_> = records
        .iter()
        .filter_map(|tx| tx.as_receipt().map(|lot| (tx, lot)))
        .filter(|(tx, lot)| lot.remaining() > 0 && &tx.key() == key)
        .collect();
    lots.sort_by(fifo_order);
    lots
}

/// Oldest receipt date first, then creation time, then id.
pub(crate) fn fifo_order(
    (a, lot_a): &(&StockTransaction, &Receipt),
    (b, lot_b): &(&StockTransaction, &Receipt),
) -> Ordering {
    lot_a
        .received_date
        .cmp(&lot_b.received_date)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Splits `requested` over the open lots of `key`, oldest first.
///
/// A request the lots cannot cover in full fails with
/// [`StockError::InsufficientStock`]; a partial plan is never returned.
pub fn allocate(
    records: &[StockTransaction],
    key: &PartKey,
    requested: i64,
) -> Result<AllocationPlan, StockError> {
    if requested <= 0 {
        return Err(StockError::InvalidQuantity(requested));
    }

    let mut remaining = requested;
    let mut draws = Vec::new();

    for (tx, lot) in open_lots(records, key) {
        if remaining <= 0 {
            break;
        }
        let take = lot.remaining().min(remaining);
        draws.push(LotDraw {
            lot_id: tx.id,
            quantity: take,
            drawn_before: lot.drawn,
            received_date: lot.received_date,
        });
        remaining -= take;
    }

    if remaining > 0 {
        return Err(StockError::InsufficientStock {
            key: key.clone(),
            requested,
            available: requested - remaining,
        });
    }

    Ok(AllocationPlan {
        key: key.clone(),
        requested,
        draws,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::testing::{issuance, receipt};
    use assert_matches::assert_matches;

    fn three_lots() -> Vec<StockTransaction> {
        vec![
            receipt("M1", "P1", 10, 0, (2024, 3, 1)),
            receipt("M1", "P1", 10, 0, (2024, 1, 1)),
            receipt("M1", "P1", 10, 0, (2024, 2, 1)),
        ]
    }

    #[test]
    fn draws_oldest_lots_first() {
        let records = three_lots();
        let key = PartKey::new("M1", "P1");
        let plan = allocate(&records, &key, 15).unwrap();

        assert_eq!(plan.draws.len(), 2);
        assert_eq!(plan.draws[0].lot_id, records[1].id);
        assert_eq!(plan.draws[0].quantity, 10);
        assert_eq!(plan.draws[1].lot_id, records[2].id);
        assert_eq!(plan.draws[1].quantity, 5);
        assert_eq!(plan.total(), 15);
    }

    #[test]
    fn scenario_across_two_receipts() {
        let records = vec![
            receipt("HR050057", "41201-KTJ-EM00", 150, 0, (2024, 7, 15)),
            receipt("HR050057", "41201 KTJ EM00", 200, 0, (2024, 8, 10)),
        ];
        let key = PartKey::new("HR050057", "41201-KTJ-EM00");
        let plan = allocate(&records, &key, 180).unwrap();

        let taken: Vec<_> = plan.draws.iter().map(|d| (d.lot_id, d.quantity)).collect();
        assert_eq!(taken, vec![(records[0].id, 150), (records[1].id, 30)]);
        assert_eq!(plan.draws[0].drawn_after(), 150);
        assert_eq!(plan.draws[1].drawn_after(), 30);
    }

    #[test]
    fn partly_drawn_lots_offer_their_remainder() {
        let records = vec![
            receipt("M1", "P1", 10, 7, (2024, 1, 1)),
            receipt("M1", "P1", 10, 10, (2024, 1, 2)),
            receipt("M1", "P1", 10, 0, (2024, 1, 3)),
            issuance("M1", "P1", 17, (2024, 1, 4)),
        ];
        let key = PartKey::new("M1", "P1");
        let plan = allocate(&records, &key, 5).unwrap();

        assert_eq!(plan.draws[0].lot_id, records[0].id);
        assert_eq!(plan.draws[0].quantity, 3);
        assert_eq!(plan.draws[0].drawn_before, 7);
        assert_eq!(plan.draws[1].lot_id, records[2].id);
        assert_eq!(plan.draws[1].quantity, 2);
    }

    #[test]
    fn shortfall_is_an_error_not_a_partial_plan() {
        let records = three_lots();
        let key = PartKey::new("M1", "P1");
        assert_matches!(
            allocate(&records, &key, 31),
            Err(StockError::InsufficientStock { requested: 31, available: 30, .. })
        );
    }

    #[test]
    fn non_positive_requests_are_rejected() {
        let key = PartKey::new("M1", "P1");
        assert_matches!(allocate(&[], &key, 0), Err(StockError::InvalidQuantity(0)));
        assert_matches!(allocate(&[], &key, -3), Err(StockError::InvalidQuantity(-3)));
    }

    #[test]
    fn same_day_lots_follow_creation_order() {
        let records = vec![
            receipt("M1", "P1", 5, 0, (2024, 1, 1)),
            receipt("M1", "P1", 5, 0, (2024, 1, 1)),
        ];
        let key = PartKey::new("M1", "P1");
        let plan = allocate(&records, &key, 6).unwrap();
        assert_eq!(plan.draws[0].lot_id, records[0].id);
        assert_eq!(plan.draws[0].quantity, 5);
        assert_eq!(plan.draws[1].lot_id, records[1].id);
    }
}
