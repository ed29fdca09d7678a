//! Record builders shared by the core's unit tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use super::types::{Issuance, Movement, PartInfo, Receipt, StockTransaction};

static CREATED: AtomicI64 = AtomicI64::new(0);

/// Midnight UTC of `(year, month, day)`
pub fn day((y, m, d): (i32, u32, u32)) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Strictly increasing creation stamps, so same-day records keep build order
fn next_created() -> DateTime<Utc> {
    let tick = CREATED.fetch_add(1, Ordering::SeqCst);
    day((2020, 1, 1)) + Duration::seconds(tick)
}

fn record(myob: &str, part: &str, movement: Movement) -> StockTransaction {
    let created_at = next_created();
    StockTransaction {
        id: Uuid::new_v4(),
        part: PartInfo {
            myob_number: myob.into(),
            part_number: part.into(),
            ..PartInfo::default()
        },
        movement,
        remarks: None,
        created_at,
        updated_at: created_at,
    }
}

pub fn receipt(
    myob: &str,
    part: &str,
    quantity: i64,
    drawn: i64,
    date: (i32, u32, u32),
) -> StockTransaction {
    record(
        myob,
        part,
        Movement::Receipt(Receipt {
            quantity,
            drawn,
            received_date: day(date),
            po_number: None,
            supplier: None,
        }),
    )
}

pub fn issuance(myob: &str, part: &str, quantity: i64, date: (i32, u32, u32)) -> StockTransaction {
    record(
        myob,
        part,
        Movement::Issuance(Issuance {
            quantity,
            issue_date: day(date),
            invoice_number: None,
            customer: None,
            withdrawal_number: None,
            event: None,
            due_date: None,
            supplier: None,
            po_number: None,
            lot_received_date: None,
        }),
    )
}
