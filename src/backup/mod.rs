//! Periodic stock backups.
//!
//! A backup is a directory `stock-backup-YYYYMMDDTHHMMSSZ/` holding the full
//! record snapshot, the per-part summary, the combined ledger and a manifest.
//! Everything except the manifest is a pure function of the transaction log.

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock::StockService;
use crate::stock::{aggregate, build_ledgers, Ledger, PartKey, PartSummary, StockTransaction};

pub const BACKUP_PREFIX: &str = "stock-backup-";
const PARTIAL_SUFFIX: &str = ".partial";

pub const TRANSACTIONS_FILE: &str = "transactions.json";
pub const SUMMARY_FILE: &str = "summary.csv";
pub const LEDGER_FILE: &str = "ledger.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    pub dir: PathBuf,
    pub interval: Duration,
    /// Backups kept after each run
    pub retain: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub directory: String,
    pub exported_at: DateTime<Utc>,
    pub transaction_count: usize,
    pub part_count: usize,
    pub ledger_entry_count: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    part_key: String,
    myob_number: &'a str,
    part_number: &'a str,
    model: Option<&'a str>,
    part_name: Option<&'a str>,
    revision: Option<&'a str>,
    total_received: i64,
    total_issued: i64,
    balance: i64,
    last_activity: String,
}

#[derive(Debug, Serialize)]
struct LedgerRow {
    part_key: String,
    date: String,
    direction: &'static str,
    quantity: i64,
    running_balance: i64,
    counterparty: Option<String>,
    reference: Option<String>,
    remarks: Option<String>,
    transaction_id: Uuid,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn backup_dir_name(now: DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, now.format("%Y%m%dT%H%M%SZ"))
}

fn write_summary(path: &Path, summary: &BTreeMap<PartKey, PartSummary>) -> Result<(), ServiceError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (key, part) in summary {
        writer.serialize(SummaryRow {
            part_key: key.to_string(),
            myob_number: &part.part.myob_number,
            part_number: &part.part.part_number,
            model: part.part.model.as_deref(),
            part_name: part.part.part_name.as_deref(),
            revision: part.part.revision.as_deref(),
            total_received: part.total_received,
            total_issued: part.total_issued,
            balance: part.balance,
            last_activity: timestamp(&part.last_activity),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the combined ledger; returns the number of entries written
fn write_ledger(path: &Path, ledgers: &BTreeMap<PartKey, Ledger>) -> Result<usize, ServiceError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut written = 0;
    for (key, ledger) in ledgers {
        for entry in ledger {
            writer.serialize(LedgerRow {
                part_key: key.to_string(),
                date: timestamp(&entry.date),
                direction: entry.direction.as_str(),
                quantity: entry.quantity,
                running_balance: entry.running_balance,
                counterparty: entry.counterparty,
                reference: entry.reference,
                remarks: entry.remarks,
                transaction_id: entry.transaction_id,
            })?;
            written += 1;
        }
    }
    writer.flush()?;
    Ok(written)
}

fn write_backup_files(
    dir: &Path,
    now: DateTime<Utc>,
    records: &[StockTransaction],
) -> Result<BackupManifest, ServiceError> {
    fs::create_dir_all(dir)?;
    let name = backup_dir_name(now);
    let target = dir.join(&name);
    if target.exists() {
        return Err(ServiceError::InvalidOperation(format!(
            "backup {} already exists",
            target.display()
        )));
    }

    let staging = dir.join(format!("{}{}", name, PARTIAL_SUFFIX));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir(&staging)?;

    let summary = aggregate(records);
    let ledgers = build_ledgers(records);

    let mut snapshot = BufWriter::new(fs::File::create(staging.join(TRANSACTIONS_FILE))?);
    serde_json::to_writer_pretty(&mut snapshot, records)?;
    snapshot.flush()?;
    write_summary(&staging.join(SUMMARY_FILE), &summary)?;
    let ledger_entry_count = write_ledger(&staging.join(LEDGER_FILE), &ledgers)?;

    let manifest = BackupManifest {
        directory: name,
        exported_at: now,
        transaction_count: records.len(),
        part_count: summary.len(),
        ledger_entry_count,
        files: vec![
            TRANSACTIONS_FILE.to_string(),
            SUMMARY_FILE.to_string(),
            LEDGER_FILE.to_string(),
        ],
    };
    fs::write(
        staging.join(MANIFEST_FILE),
        serde_json::to_vec_pretty(&manifest)?,
    )?;

    fs::rename(&staging, &target)?;
    Ok(manifest)
}

/// Snapshots the log and writes one backup directory under `dir`.
/// The directory appears only once every file in it is complete.
pub async fn write_backup(
    service: &StockService,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<BackupManifest, ServiceError> {
    let records = service.snapshot().await?;
    let dir = dir.to_path_buf();
    let manifest = tokio::task::spawn_blocking(move || write_backup_files(&dir, now, &records))
        .await
        .map_err(|e| ServiceError::InternalError(format!("backup task failed: {}", e)))??;

    counter!("stock.backup.count", 1);
    info!(
        directory = %manifest.directory,
        transactions = manifest.transaction_count,
        parts = manifest.part_count,
        "backup written"
    );
    Ok(manifest)
}

/// Keeps the newest `retain` backups under `dir`; returns what was removed
pub fn prune_backups(dir: &Path, retain: usize) -> Result<Vec<PathBuf>, ServiceError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(BACKUP_PREFIX) && !n.ends_with(PARTIAL_SUFFIX))
        })
        .collect();

    // names embed the timestamp, so lexical order is chronological
    backups.sort();
    backups.reverse();

    let stale = backups.split_off(retain.min(backups.len()));
    for path in &stale {
        fs::remove_dir_all(path)?;
    }
    if !stale.is_empty() {
        info!(removed = stale.len(), kept = backups.len(), "old backups pruned");
    }
    Ok(stale)
}

async fn run_once(
    service: &StockService,
    settings: &BackupSettings,
    events: Option<&EventSender>,
) -> Result<BackupManifest, ServiceError> {
    let manifest = write_backup(service, &settings.dir, Utc::now()).await?;
    prune_backups(&settings.dir, settings.retain)?;
    if let Some(sender) = events {
        sender
            .publish(Event::BackupCompleted {
                path: settings.dir.join(&manifest.directory).display().to_string(),
                exported_at: manifest.exported_at,
                transaction_count: manifest.transaction_count,
            })
            .await;
    }
    Ok(manifest)
}

/// Writes and prunes a backup every `settings.interval`. A failed run is
/// logged and the timer keeps going.
pub fn spawn_backup_scheduler(
    service: StockService,
    settings: BackupSettings,
    events: Option<EventSender>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            dir = %settings.dir.display(),
            interval_secs = settings.interval.as_secs(),
            retain = settings.retain,
            "backup scheduler started"
        );
        let start = tokio::time::Instant::now() + settings.interval;
        let mut ticker = tokio::time::interval_at(start, settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = run_once(&service, &settings, events.as_ref()).await {
                counter!("stock.backup.failed", 1);
                error!(error = %e, "scheduled backup failed");
            }
        }
    })
}
