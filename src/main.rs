//! Kassenbuch CLI - ingest extracted receipt drafts and query spend history

use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use kassenbuch::config::{self, KassenbuchConfig};
use kassenbuch::ingest::{DuplicatePolicy, IngestCoordinator, IngestOutcome, IngestReport};
use kassenbuch::storage::ReceiptStore;
use kassenbuch::{draft, queries, ui};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "kassenbuch")]
#[command(version)]
#[command(about = "Grocery receipt ledger - from extracted receipt drafts to spend history")]
#[command(long_about = r#"
Kassenbuch persists receipt drafts (JSON produced by an external PDF/AI
extraction step) into a deduplicated relational spend history, and answers
questions about it.

Example usage:
  kassenbuch init
  kassenbuch ingest ./drafts
  kassenbuch report monthly
  kassenbuch report items --limit 10
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and an empty database
    Init {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Ingest a draft file or a directory of draft files
    Ingest {
        /// JSON file (object or array) or directory of *.json drafts
        path: PathBuf,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Replace receipts whose natural key is already stored instead of
        /// skipping them
        #[arg(long)]
        replace: bool,
    },

    /// Show store statistics
    Stats {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Spend-history reports
    Report {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        #[command(subcommand)]
        report: ReportKind,
    },
}

#[derive(Subcommand)]
enum ReportKind {
    /// Most frequently purchased items
    Items {
        /// Number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Spending by calendar month
    Monthly,

    /// Spending by market
    Markets,

    /// Most expensive receipts
    Top {
        /// Number of receipts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { database, force } => {
            let db_path = database.unwrap_or_else(config::default_database_path);
            let config_path = config::default_config_path();

            config::write_config(
                &config_path,
                &KassenbuchConfig {
                    database: Some(db_path.display().to_string()),
                    on_duplicate: None,
                },
                force,
            )?;
            config::ensure_db_dir(&db_path)?;
            ReceiptStore::open(&db_path)?;

            ui::success(&format!(
                "initialized {} and {}",
                config_path.display(),
                db_path.display()
            ));
        }

        Commands::Ingest {
            path,
            database,
            replace,
        } => {
            let config = config::load_config(None)?;
            let db_path = resolve_database(database, config.as_ref());
            let policy = if replace {
                DuplicatePolicy::Replace
            } else {
                config
                    .as_ref()
                    .map(KassenbuchConfig::duplicate_policy)
                    .transpose()?
                    .unwrap_or_default()
            };

            let drafts = draft::load_drafts(&path)?;
            if drafts.is_empty() {
                ui::warn(&format!("no drafts found under {}", path.display()));
                return Ok(());
            }

            tracing::info!(count = drafts.len(), database = %db_path.display(), "ingesting drafts");
            config::ensure_db_dir(&db_path)?;
            let store = ReceiptStore::open(&db_path)?;
            let mut coordinator = IngestCoordinator::new(store, policy);

            let bar = if console::Term::stdout().is_term() {
                ProgressBar::new(drafts.len() as u64)
            } else {
                ProgressBar::hidden()
            };
            let report = coordinator.ingest_batch_with(&drafts, |_, _| bar.inc(1));
            bar.finish_and_clear();

            print_report(&report);
            if report.rejected() > 0 {
                std::process::exit(1);
            }
        }

        Commands::Stats { database } => {
            let config = config::load_config(None)?;
            let db_path = resolve_database(database, config.as_ref());
            let store = ReceiptStore::open(&db_path)?;
            let stats = store.stats()?;

            ui::header(&format!("Store: {}", db_path.display()));
            println!(
                "{}",
                ui::metrics_table(&[
                    ("Markets", stats.markets.to_string()),
                    ("Receipts", stats.receipts.to_string()),
                    ("Items", stats.items.to_string()),
                    ("Tax rows", stats.tax_rows.to_string()),
                    ("Products", stats.products.to_string()),
                ])
            );
        }

        Commands::Report { database, report } => {
            let config = config::load_config(None)?;
            let db_path = resolve_database(database, config.as_ref());
            let store = ReceiptStore::open(&db_path)?;

            let table = match report {
                ReportKind::Items { limit } => ui::render(&queries::top_items(&store, limit)?),
                ReportKind::Monthly => ui::render(&queries::spending_by_month(&store)?),
                ReportKind::Markets => ui::render(&queries::spending_by_market(&store)?),
                ReportKind::Top { limit } => ui::render(&queries::top_receipts(&store, limit)?),
            };
            if table.is_empty() {
                ui::warn("no receipts stored yet");
            } else {
                println!("{}", table);
            }
        }
    }

    Ok(())
}

fn resolve_database(cli_path: Option<PathBuf>, config: Option<&KassenbuchConfig>) -> PathBuf {
    cli_path
        .or_else(|| config.and_then(|c| c.database.as_ref().map(PathBuf::from)))
        .unwrap_or_else(config::default_database_path)
}

fn print_report(report: &IngestReport) {
    for entry in &report.entries {
        match &entry.outcome {
            IngestOutcome::Inserted { receipt_id, .. } => {
                ui::success(&format!("{} -> receipt {}", entry.source, receipt_id));
            }
            IngestOutcome::Replaced { receipt_id, .. } => {
                ui::success(&format!("{} -> replaced receipt {}", entry.source, receipt_id));
            }
            IngestOutcome::Skipped { existing_id } => {
                println!(
                    "{}",
                    ui::dim(&format!(
                        "{} skipped, already stored as receipt {}",
                        entry.source, existing_id
                    ))
                );
            }
            IngestOutcome::Rejected { reason } => {
                ui::error(&format!("{} rejected: {}", entry.source, reason));
            }
        }
        for warning in entry.outcome.warnings() {
            ui::warn(&format!("  {}", warning));
        }
    }

    ui::section("Ingest summary");
    println!(
        "{}",
        ui::metrics_table(&[
            ("Drafts", report.entries.len().to_string()),
            ("Inserted", report.inserted().to_string()),
            ("Replaced", report.replaced().to_string()),
            ("Skipped", report.skipped().to_string()),
            ("Rejected", report.rejected().to_string()),
            ("Warnings", report.warning_count().to_string()),
        ])
    );
}
