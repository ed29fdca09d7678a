//! Export aggregation: per-part summaries and running-balance ledgers.
//!
//! Output depends on the record set only. Entries are ordered by movement date,
//! receipts before issuances on the same instant, then creation time and id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::balance::BalanceSummary;
use super::group_key::PartKey;
use super::types::{Movement, PartInfo, StockTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSummary {
    pub key: PartKey,
    /// Descriptive fields of the most recently created record of the part
    pub part: PartInfo,
    pub total_received: i64,
    pub total_issued: i64,
    pub balance: i64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub transaction_id: Uuid,
    pub date: DateTime<Utc>,
    pub direction: Direction,
    pub quantity: i64,
    pub running_balance: i64,
    /// Supplier on receipts, customer on issuances
    pub counterparty: Option<String>,
    /// PO number on receipts, invoice number on issuances
    pub reference: Option<String>,
    pub remarks: Option<String>,
}

/// One part's movements in ledger order, before running balances are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Posting {
    transaction_id: Uuid,
    created_at: DateTime<Utc>,
    date: DateTime<Utc>,
    direction: Direction,
    quantity: i64,
    counterparty: Option<String>,
    reference: Option<String>,
    remarks: Option<String>,
}

impl Posting {
    fn from_transaction(tx: &StockTransaction) -> Option<Self> {
        let (direction, quantity, date, counterparty, reference) = match &tx.movement {
            Movement::Receipt(lot) if lot.quantity > 0 => (
                Direction::In,
                lot.quantity,
                lot.received_date,
                lot.supplier.clone(),
                lot.po_number.clone(),
            ),
            Movement::Issuance(draw) if draw.quantity > 0 => (
                Direction::Out,
                draw.quantity,
                draw.issue_date,
                draw.customer.clone(),
                draw.invoice_number.clone(),
            ),
            _ => return None,
        };
        Some(Self {
            transaction_id: tx.id,
            created_at: tx.created_at,
            date,
            direction,
            quantity,
            counterparty,
            reference,
            remarks: tx.remarks.clone(),
        })
    }

    fn sort_key(&self) -> (DateTime<Utc>, Direction, DateTime<Utc>, Uuid) {
        (self.date, self.direction, self.created_at, self.transaction_id)
    }
}

/// Ordered movements of one part. Iterating computes running balances on the
/// fly and can be repeated any number of times with identical results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    key: PartKey,
    postings: Vec<Posting>,
}

impl Ledger {
    fn new(key: PartKey, mut postings: Vec<Posting>) -> Self {
        postings.sort_by_key(Posting::sort_key);
        Self { key, postings }
    }

    pub fn key(&self) -> &PartKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> LedgerIter<'_> {
        LedgerIter {
            postings: self.postings.iter(),
            running: 0,
        }
    }

    /// Balance after the last entry
    pub fn closing_balance(&self) -> i64 {
        self.iter().last().map_or(0, |e| e.running_balance)
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = LedgerEntry;
    type IntoIter = LedgerIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct LedgerIter<'a> {
    postings: std::slice::Iter<'a, Posting>,
    running: i64,
}

impl Iterator for LedgerIter<'_> {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let posting = self.postings.next()?;
        match posting.direction {
            Direction::In => self.running += posting.quantity,
            Direction::Out => self.running -= posting.quantity,
        }
        Some(LedgerEntry {
            transaction_id: posting.transaction_id,
            date: posting.date,
            direction: posting.direction,
            quantity: posting.quantity,
            running_balance: self.running,
            counterparty: posting.counterparty.clone(),
            reference: posting.reference.clone(),
            remarks: posting.remarks.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.postings.size_hint()
    }
}

/// Ledger of a single part.
pub fn build_ledger(records: &[StockTransaction], key: &PartKey) -> Ledger {
    let postings = records
        .iter()
        .filter(|tx| &tx.key() == key)
        .filter_map(Posting::from_transaction)
        .collect();
    Ledger::new(key.clone(), postings)
}

/// Ledgers of every part, keyed and ordered by part key.
pub fn build_ledgers(records: &[StockTransaction]) -> BTreeMap<PartKey, Ledger> {
    let mut grouped: BTreeMap<PartKey, Vec<Posting>> = BTreeMap::new();
    for tx in records {
        if let Some(posting) = Posting::from_transaction(tx) {
            grouped.entry(tx.key()).or_default().push(posting);
        }
    }
    grouped
        .into_iter()
        .map(|(key, postings)| (key.clone(), Ledger::new(key, postings)))
        .collect()
}

/// Totals and last movement date for every part present in `records`.
pub fn aggregate(records: &[StockTransaction]) -> BTreeMap<PartKey, PartSummary> {
    let mut parts: BTreeMap<PartKey, (BalanceSummary, &StockTransaction, DateTime<Utc>)> =
        BTreeMap::new();

    for tx in records {
        let date = tx.movement.effective_date();
        let entry = parts
            .entry(tx.key())
            .or_insert_with(|| (BalanceSummary::default(), tx, date));
        entry.0.add(&tx.movement);
        if (tx.created_at, tx.id) > (entry.1.created_at, entry.1.id) {
            entry.1 = tx;
        }
        if date > entry.2 {
            entry.2 = date;
        }
    }

    parts
        .into_iter()
        .map(|(key, (summary, latest, last_activity))| {
            let part_summary = PartSummary {
                key: key.clone(),
                part: latest.part.clone(),
                total_received: summary.total_received,
                total_issued: summary.total_issued,
                balance: summary.balance,
                last_activity,
            };
            (key, part_summary)
        })
        .collect()
}
