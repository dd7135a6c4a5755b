//! PostDaemon - social posting scheduler
//!
//! CLI entry point for running the scheduler and inspecting its configuration.

use std::fs;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use eyre::{Context, Result};
use tracing::{info, warn};

use postdaemon::cli::{Cli, Command, OutputFormat, get_log_path};
use postdaemon::config::Config;
use postdaemon::queue::ShutdownReport;
use postdaemon::ratelimit::BucketStatus;
use postdaemon::scheduler::{CycleReport, DryRunJobs, PlatformOutcome, TaskKind, TaskScheduler};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    match cli.command {
        Some(Command::Run { once, format }) => cmd_run(config, once, format).await,
        Some(Command::Config) => cmd_config(&config),
        Some(Command::Kinds) => cmd_kinds(&config),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn build_scheduler(config: &Config) -> Result<TaskScheduler> {
    let jobs = Arc::new(DryRunJobs::new().with_delay(config.dry_run.delay()));
    TaskScheduler::new(config.scheduler.clone(), jobs).context("Failed to create scheduler")
}

async fn cmd_run(config: Config, once: bool, format: OutputFormat) -> Result<()> {
    let scheduler = build_scheduler(&config)?;
    let shutdown_timeout = config.scheduler.queue.shutdown_timeout();

    if once {
        let mut reports = Vec::new();
        for kind in TaskKind::ALL {
            reports.push(scheduler.run_cycle(kind).await?);
        }
        let shutdown = scheduler.shutdown(shutdown_timeout).await;
        let loops = scheduler.loop_status();
        let rate_limits = scheduler.tracker().snapshot();

        match format {
            OutputFormat::Json => {
                let summary = serde_json::json!({
                    "cycles": reports,
                    "loops": loops,
                    "rate_limits": rate_limits,
                    "shutdown": shutdown,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Text => {
                for report in &reports {
                    print_cycle(report);
                }
                print_rate_limits(&rate_limits);
                print_shutdown(&shutdown);
            }
        }
        return Ok(());
    }

    scheduler.start();
    println!(
        "{} Scheduler running with {} platform(s). Press Ctrl+C to stop.",
        "▶".green(),
        config.scheduler.platforms.enabled().len()
    );
    println!("Logs: {}", get_log_path().display().to_string().dimmed());

    wait_for_shutdown_signal().await?;

    info!("Scheduler shutting down...");
    let shutdown = scheduler.shutdown(shutdown_timeout).await;
    print_shutdown(&shutdown);
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

fn print_cycle(report: &CycleReport) {
    println!("{}", report.kind.to_string().bold());
    if report.is_skipped() {
        println!("  {}", "skipped: all platforms disabled".yellow());
    }
    for (platform, outcome) in &report.outcomes {
        match outcome {
            PlatformOutcome::Completed { task_id } => {
                println!("  {} {} {}", "✓".green(), platform, task_id.short().dimmed());
            }
            PlatformOutcome::Failed { task_id, error } => {
                println!("  {} {} {} {}", "✗".red(), platform, task_id.short().dimmed(), error);
            }
            PlatformOutcome::Cancelled { task_id } => {
                println!("  {} {} {} cancelled", "-".yellow(), platform, task_id.short().dimmed());
            }
            PlatformOutcome::Throttled { retry_after } => {
                println!("  {} {} throttled for {}s", "⏸".yellow(), platform, retry_after.as_secs());
            }
        }
    }
    println!("  next run in {}s", report.next_interval.as_secs().to_string().cyan());
}

fn print_rate_limits(buckets: &[BucketStatus]) {
    println!("{}", "Rate limits".bold());
    for bucket in buckets {
        println!(
            "  {:<8} {:<6} {}/{} used, resets in {}s",
            bucket.platform,
            bucket.class,
            bucket.used,
            bucket.limit,
            bucket.reset_in.as_secs()
        );
    }
}

fn print_shutdown(report: &ShutdownReport) {
    println!(
        "Shutdown: {} drained, {} cancelled, {} abandoned",
        report.drained.to_string().green(),
        report.cancelled_pending.to_string().yellow(),
        report.abandoned.to_string().red()
    );
}

fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn cmd_kinds(config: &Config) -> Result<()> {
    for kind in TaskKind::ALL {
        println!(
            "{:<20} every {:>6}s  priority {:<6}  class {}",
            kind.to_string().cyan(),
            config.scheduler.interval(kind).as_secs(),
            config.scheduler.priority(kind),
            kind.operation_class()
        );
    }
    Ok(())
}
