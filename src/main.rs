use analyzer::Classifier;
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use configuration::{Config, LedgerBackend};
use core_types::{calendar::local_date, MetricKey};
use database::{connect, run_migrations, PgTable};
use engine::{inspect_baseline, run_daily, RunOrchestrator};
use ledger::{MemoryTable, TableTransport};
use std::sync::Arc;

/// The main entry point for the KPI harvester.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets usually live in .env; a missing file is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = configuration::load_config().context("Failed to load configuration")?;
    let _guard = configuration::init_tracing(&config.logging).context("Failed to initialise logging")?;

    match cli.command {
        Commands::Run(args) => {
            if let Some(days) = args.days {
                config.run.backfill_days = days;
                configuration::validate(&config)?;
            }
            if let Some(backend) = args.backend {
                config.ledger.backend = backend;
            }
            handle_run(&config, args.today).await
        }
        Commands::Schedule => handle_schedule(&config).await,
        Commands::Baseline(args) => handle_baseline(&config, args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Collects daily KPIs into a ledger and flags days that break from their history.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the backfill window once and exit.
    Run(RunArgs),
    /// Stay resident and run once a day at the configured local time.
    Schedule,
    /// Show the baseline of one metric for one date without writing anything.
    Baseline(BaselineArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Number of closed days to process, overriding `run.backfill_days`.
    #[arg(long)]
    days: Option<u32>,

    /// Treat this date as today (format: YYYY-MM-DD).
    #[arg(long)]
    today: Option<NaiveDate>,

    /// Ledger backend, overriding `ledger.backend`.
    #[arg(long, value_enum)]
    backend: Option<LedgerBackend>,
}

#[derive(Parser)]
struct BaselineArgs {
    /// The metric column, e.g. "bank_total_balance_eur".
    #[arg(long)]
    metric: String,

    /// The date to inspect (format: YYYY-MM-DD). Defaults to yesterday.
    #[arg(long)]
    date: Option<NaiveDate>,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_run(config: &Config, today: Option<NaiveDate>) -> anyhow::Result<()> {
    let transport = open_transport(config).await?;
    let orchestrator = RunOrchestrator::from_config(config, transport)?;
    let today = today.unwrap_or_else(|| local_date(Utc::now(), config.run.timezone));

    let summary = orchestrator.run(today).await.context("Run failed")?;
    println!("{}", summary.render_text());
    Ok(())
}

async fn handle_schedule(config: &Config) -> anyhow::Result<()> {
    let transport = open_transport(config).await?;
    let orchestrator = RunOrchestrator::from_config(config, transport)?;
    let run = &config.run;

    tokio::select! {
        _ = run_daily(&orchestrator, run.timezone, run.run_hour, run.run_minute) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested; scheduler stopped.");
        }
    }
    Ok(())
}

async fn handle_baseline(config: &Config, args: BaselineArgs) -> anyhow::Result<()> {
    let metric = MetricKey::new(args.metric)?;
    let date = match args.date {
        Some(date) => date,
        None => local_date(Utc::now(), config.run.timezone)
            .pred_opt()
            .context("No date before today")?,
    };

    let transport = open_transport(config).await?;
    let classifier = Classifier::from_config(&config.anomaly);
    let report = inspect_baseline(transport, &classifier, &metric, date).await?;

    println!("metric:    {}", report.metric);
    println!("date:      {}", report.date);
    println!("history:   {} entries", report.history_len);
    match report.baseline {
        Some(baseline) => println!("baseline:  {:.2}", baseline),
        None => println!("baseline:  none (fewer than {} observations)", config.anomaly.min_observations),
    }
    match (&report.recorded, &report.classification) {
        (Some(value), Some(outcome)) => println!("recorded:  {} -> {}", value, outcome.flag),
        _ => println!("recorded:  nothing for this date"),
    }
    Ok(())
}

/// Opens the configured ledger backend.
async fn open_transport(config: &Config) -> anyhow::Result<Arc<dyn TableTransport>> {
    match config.ledger.backend {
        LedgerBackend::Postgres => {
            let pool = connect().await.context("Failed to connect to the database")?;
            run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Ok(Arc::new(PgTable::new(pool, config.retry.policy())))
        }
        LedgerBackend::Memory => {
            tracing::warn!("Using the in-memory ledger; nothing is persisted.");
            Ok(Arc::new(MemoryTable::new()))
        }
    }
}
