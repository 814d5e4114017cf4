use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use legitrack_sync::{
    build_scheduler, describe_run, render_status_markdown, LegitrackRuntime, SessionRun, StoreBackend, UpdateError,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "legitrack")]
#[command(about = "Incremental legislative tracking")]
struct Cli {
    /// Keep everything in memory instead of Postgres; nothing is persisted.
    #[arg(long, global = true)]
    no_db: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Update one session.
    Update {
        #[arg(long = "session")]
        session_id: String,
        /// Ignore the cursor and refetch the full session.
        #[arg(long)]
        force: bool,
    },
    /// Update every enabled session that is due.
    UpdateAll {
        #[arg(long)]
        force: bool,
    },
    /// Drain one batch of the AI summarization queue.
    ProcessAi,
    Migrate,
    /// Run the cron scheduler until interrupted.
    Schedule,
    /// Print session cursors as markdown.
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let backend = if cli.no_db {
        StoreBackend::Memory
    } else {
        StoreBackend::Postgres
    };
    let runtime = LegitrackRuntime::from_env(backend).await?;

    match cli.command.unwrap_or(Commands::UpdateAll { force: false }) {
        Commands::Update { session_id, force } => {
            match runtime.updater.update_session_by_id(&session_id, force).await {
                Ok(summary) => {
                    let failed = !summary.is_completed();
                    println!("{}", describe_run(&SessionRun::Updated(summary)));
                    if failed {
                        return Ok(ExitCode::FAILURE);
                    }
                }
                Err(err @ UpdateError::ConcurrentUpdateConflict { .. }) => println!("{err}"),
                Err(err) => return Err(err.into()),
            }
        }
        Commands::UpdateAll { force } => {
            let runs = runtime.updater.update_all(force).await;
            let mut failed = false;
            for run in &runs {
                failed |= match run {
                    SessionRun::Updated(summary) => !summary.is_completed(),
                    SessionRun::Rejected { error, .. } => !error.is_conflict(),
                    SessionRun::NotDue { .. } => false,
                };
                println!("{}", describe_run(run));
            }
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::ProcessAi => {
            let summary = runtime.require_ai()?.process_pending().await?;
            println!(
                "ai queue: attempted={} summarized={} requeued={} abandoned={} superseded={}",
                summary.attempted, summary.summarized, summary.requeued, summary.abandoned, summary.superseded
            );
        }
        Commands::Migrate => {
            runtime.require_pg()?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let config = &runtime.config;
            let Some(mut sched) = build_scheduler(
                config.scheduler_enabled,
                &config.update_cron,
                &config.ai_cron,
                runtime.updater.clone(),
                runtime.ai.clone(),
                runtime.jobs.clone(),
            )
            .await?
            else {
                eprintln!("scheduler disabled; set LEGITRACK_SCHEDULER_ENABLED=true");
                return Ok(ExitCode::FAILURE);
            };
            sched.start().await.context("starting scheduler")?;
            info!(update_cron = %config.update_cron, ai_cron = %config.ai_cron, "scheduler running");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
            for job in runtime.jobs.list() {
                println!("{} {}: {}", job.started_at.to_rfc3339(), job.session_id, job.state.user_message());
            }
        }
        Commands::Status => {
            let rows = runtime.updater.session_status().await?;
            print!("{}", render_status_markdown(&rows));
        }
    }

    Ok(ExitCode::SUCCESS)
}
