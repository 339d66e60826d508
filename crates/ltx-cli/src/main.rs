use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ltx_batch::{ReconcileConfig, ReconcilePipeline};
use ltx_ingest::load_registration_snapshot;
use ltx_recon::ticket_ownership_defects;

#[derive(Debug, Parser)]
#[command(name = "ltx-cli")]
#[command(about = "LodgeTix reconciliation command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass over the configured exports.
    Reconcile,
    /// Print a markdown digest of recent reconciliation runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    /// Scan a registration snapshot for ticket-ownership defects.
    Audit {
        #[arg(long, default_value = "registrations.json")]
        snapshot: PathBuf,
    },
    /// Run the cron scheduler until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Reconcile) {
        Commands::Reconcile => {
            let summary = ltx_batch::run_reconcile_once_from_env().await?;
            println!(
                "reconcile complete: run_id={} exports={} payments={} certain={} review={} unmatched={} voided={} reports={}",
                summary.run_id,
                summary.enabled_exports,
                summary.payments_seen,
                summary.certain_matches,
                summary.needs_review,
                summary.unmatched,
                summary.voided_stored_matches,
                summary.reports_dir
            );
        }
        Commands::Report { runs } => {
            let markdown = ltx_batch::report_runs_markdown(runs, None)?;
            println!("{markdown}");
        }
        Commands::Audit { snapshot } => {
            audit_snapshot(&snapshot)?;
        }
        Commands::Schedule => {
            let pipeline = ReconcilePipeline::new(ReconcileConfig::from_env())?;
            let Some(scheduler) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler disabled; set LTX_SCHEDULER_ENABLED=1");
            };
            scheduler.start().await.context("starting scheduler")?;
            println!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}

fn audit_snapshot(path: &PathBuf) -> Result<()> {
    let snapshot = load_registration_snapshot(path)
        .with_context(|| format!("loading registration snapshot {}", path.display()))?;

    for reason in &snapshot.skipped {
        println!("skipped  {reason}");
    }

    let mut defective = 0usize;
    let mut total_defects = 0usize;
    for registration in &snapshot.records {
        let defects = ticket_ownership_defects(registration);
        if defects.is_empty() {
            continue;
        }
        defective += 1;
        total_defects += defects.len();
        for defect in defects {
            println!("{}  {:?}", registration.registration_id, defect);
        }
    }

    println!(
        "audit complete: {} registrations scanned, {} with defects, {} defects total",
        snapshot.records.len(),
        defective,
        total_defects
    );
    if total_defects > 0 {
        bail!("{total_defects} ticket-ownership defect(s) found");
    }
    Ok(())
}
