use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use factory_stock_api::{
    backup,
    config::{self, AppConfig},
    db,
    services::StockService,
    stock::{GroupCheck, PartKey},
};
use serde::Serialize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Balance(args) => handle_balance(&context, args, cli.json).await?,
        Commands::Summary => handle_summary(&context, cli.json).await?,
        Commands::Ledger(args) => handle_ledger(&context, args, cli.json).await?,
        Commands::Backup(args) => handle_backup(&context, args, cli.json).await?,
        Commands::Verify(args) => handle_verify(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "stock-cli", about = "Operator tools for the factory stock log", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Received, issued and balance for one part
    Balance(PartArgs),
    /// Totals for every part
    Summary,
    /// Dated movements with running balance for one part
    Ledger(PartArgs),
    /// Write one backup now and prune old ones
    Backup(BackupArgs),
    /// Check lot counters against issuance records
    Verify(VerifyArgs),
}

#[derive(Args)]
struct PartArgs {
    #[arg(long, help = "MYOB item number")]
    myob: String,
    #[arg(long, help = "Manufacturer part number")]
    part: String,
}

impl PartArgs {
    fn key(&self) -> Result<PartKey> {
        let key = PartKey::new(&self.myob, &self.part);
        anyhow::ensure!(key.is_complete(), "both --myob and --part must be non-empty");
        Ok(key)
    }
}

#[derive(Args)]
struct BackupArgs {
    #[arg(long, help = "Backup directory; defaults to the configured one")]
    dir: Option<PathBuf>,
    #[arg(long, help = "Backups to keep; defaults to the configured count")]
    retain: Option<usize>,
}

#[derive(Args)]
struct VerifyArgs {
    #[arg(long, requires = "part", help = "Restrict to one MYOB item number")]
    myob: Option<String>,
    #[arg(long, requires = "myob", help = "Restrict to one part number")]
    part: Option<String>,
}

struct CliContext {
    config: AppConfig,
    stock: StockService,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }

        let stock = StockService::new(Arc::new(db_pool), None).with_edit_window(config.edit_window());
        Ok(Self { config, stock })
    }
}

async fn handle_balance(context: &CliContext, args: PartArgs, json: bool) -> Result<()> {
    let key = args.key()?;
    let summary = context
        .stock
        .get_balance(&key)
        .await
        .with_context(|| format!("failed to compute balance of {}", key))?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "{}: received {} • issued {} • balance {}",
            key, summary.total_received, summary.total_issued, summary.balance
        );
    }
    Ok(())
}

async fn handle_summary(context: &CliContext, json: bool) -> Result<()> {
    let summary = context
        .stock
        .export_summary()
        .await
        .context("failed to aggregate stock")?;

    if json {
        let parts: Vec<_> = summary.values().collect();
        print_json(&parts)?;
    } else if summary.is_empty() {
        println!("No stock transactions recorded");
    } else {
        for part in summary.values() {
            println!(
                "- {} {} • received {} • issued {} • balance {} • last activity {}",
                part.key,
                part.part.part_name.as_deref().unwrap_or("-"),
                part.total_received,
                part.total_issued,
                part.balance,
                part.last_activity.format("%Y-%m-%d")
            );
        }
    }
    Ok(())
}

async fn handle_ledger(context: &CliContext, args: PartArgs, json: bool) -> Result<()> {
    let key = args.key()?;
    let ledger = context
        .stock
        .export_ledger(&key)
        .await
        .with_context(|| format!("failed to build ledger of {}", key))?;

    if json {
        let entries: Vec<_> = ledger.iter().collect();
        print_json(&entries)?;
        return Ok(());
    }

    if ledger.is_empty() {
        println!("No movements for {}", key);
        return Ok(());
    }
    for entry in &ledger {
        println!(
            "{} {:<3} {:>8} {:>8}  {} {}",
            entry.date.format("%Y-%m-%d"),
            entry.direction.as_str(),
            entry.quantity,
            entry.running_balance,
            entry.counterparty.as_deref().unwrap_or("-"),
            entry.reference.as_deref().unwrap_or("")
        );
    }
    println!("Closing balance: {}", ledger.closing_balance());
    Ok(())
}

async fn handle_backup(context: &CliContext, args: BackupArgs, json: bool) -> Result<()> {
    let settings = context.config.backup_settings();
    let dir = args.dir.unwrap_or(settings.dir);
    let retain = args.retain.unwrap_or(settings.retain).max(1);

    let manifest = backup::write_backup(&context.stock, &dir, Utc::now())
        .await
        .context("failed to write backup")?;
    let removed = backup::prune_backups(&dir, retain).context("failed to prune backups")?;

    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            manifest: &'a backup::BackupManifest,
            pruned: Vec<String>,
        }
        print_json(&Output {
            manifest: &manifest,
            pruned: removed.iter().map(|p| p.display().to_string()).collect(),
        })?;
    } else {
        println!(
            "Wrote {} ({} transactions, {} parts)",
            dir.join(&manifest.directory).display(),
            manifest.transaction_count,
            manifest.part_count
        );
        for path in removed {
            println!("Pruned {}", path.display());
        }
    }
    Ok(())
}

async fn handle_verify(context: &CliContext, args: VerifyArgs, json: bool) -> Result<()> {
    let checks = match (args.myob, args.part) {
        (Some(myob), Some(part)) => {
            let key = PartArgs { myob, part }.key()?;
            vec![context.stock.verify(&key).await?]
        }
        _ => context.stock.verify_all().await?,
    };

    let failing: Vec<&GroupCheck> = checks.iter().filter(|c| !c.is_consistent()).collect();
    if json {
        print_json(&checks)?;
    } else {
        for check in &failing {
            println!(
                "! {} • issued {} • drawn on lots {} • allocatable {} • overdrawn lots {}",
                check.key,
                check.summary.total_issued,
                check.drawn_on_lots,
                check.allocatable,
                check.overdrawn_lots.len()
            );
        }
        println!(
            "{} part(s) checked, {} inconsistent",
            checks.len(),
            failing.len()
        );
    }

    anyhow::ensure!(failing.is_empty(), "{} part(s) failed verification", failing.len());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
