//! `ticketflow` -- runs the batch jobs against the configured store.
//!
//! - `ticketflow reminders` -- mail the CV reminder to every eligible user.
//! - `ticketflow tickets` -- assign ticket numbers to accepted users.
//! - `ticketflow export` -- write the partner CSV export.
//!
//! Configuration is read from the file named by `TICKETFLOW_CONFIG`
//! (default `ticketflow.toml`). Ctrl-C stops a run after the record in
//! flight.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ticketflow::cancellation::CancellationToken;
use ticketflow::config::TicketflowConfig;
use ticketflow::jobs::Jobs;
use ticketflow::pipeline::PipelineReport;

/// Environment variable selecting `json` log output.
const LOG_FORMAT_ENV: &str = "TICKETFLOW_LOG_FORMAT";

/// Ticketflow batch job runner.
#[derive(Parser)]
#[command(name = "ticketflow", about = "Ticketflow batch job runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Mail the upload-CV reminder.
    Reminders,

    /// Assign ticket numbers to accepted users without one.
    Tickets,

    /// Write the partner attribute export.
    Export,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn summarize(report: &PipelineReport) {
    info!(
        pipeline = %report.pipeline,
        run_id = %report.run_id,
        read = report.records_read,
        dropped = report.total_dropped(),
        degraded = report.degraded,
        committed = report.committed,
        failures = report.failures.len(),
        duration_ms = report.duration_ms,
        "Run finished"
    );
    for failure in &report.failures {
        warn!(
            stage = %failure.stage,
            user_id = %failure.user_id,
            class = ?failure.class,
            error = %failure.error,
            "Record failure"
        );
    }
    if report.cancelled {
        warn!("Run cancelled before the source was exhausted");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = TicketflowConfig::from_env().context("loading config")?;

    let cancel = Arc::new(CancellationToken::new());
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current record");
            on_signal.cancel("interrupted");
        }
    });

    let jobs = Jobs::from_config(config)
        .await
        .context("initialising jobs")?
        .with_cancellation(cancel);

    match cli.command {
        Commands::Reminders => {
            let report = jobs.run_reminders().await.context("reminder run failed")?;
            summarize(&report);
            println!("Sent {} emails", report.committed);
        }
        Commands::Tickets => {
            let tickets = jobs.run_tickets().await.context("ticket run failed")?;
            summarize(&tickets.report);
            info!(
                offset = tickets.offset,
                total = tickets.total_assigned,
                mail_failures = tickets.mail_failures,
                "Ticket numbering"
            );
            println!("Assigned {} tickets", tickets.newly_assigned);
        }
        Commands::Export => {
            let report = jobs.run_export().await.context("export failed")?;
            summarize(&report);
            println!(
                "Exported {} rows to {}",
                report.committed,
                jobs.config().export.output.display()
            );
        }
    }

    Ok(())
}
