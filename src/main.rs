use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use httpcron::config::AppConfig;
use httpcron::model::{NewSchedule, NewTarget, RunQuery, ScheduleConfig, ScheduleSpec};
use httpcron::scheduler::{Scheduler, SystemClock};
use httpcron::storage::{open_pool, SqliteStore};

#[derive(Parser)]
#[command(
    name = "httpcron",
    about = "Restart-safe HTTP job scheduler with interval and window schedules",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (overrides HTTPCRON_CONFIG and /etc/httpcron/httpcron.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler + dispatcher)
    Serve {
        /// Bind address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Manage HTTP targets
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Manage schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show recent runs, newest first
    Runs {
        /// Only runs produced by this schedule
        #[arg(long)]
        schedule: Option<i64>,

        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Aggregate run statistics
    Metrics,
}

#[derive(Subcommand)]
enum TargetAction {
    /// Register a target
    Add {
        /// Absolute http(s) URL
        #[arg(long)]
        url: String,

        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,

        /// Request header as "Name: value" (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(long)]
        body: Option<String>,
    },

    /// List targets
    List,

    /// Remove a target that no schedule references
    Remove {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Fire a target every N seconds
    AddInterval {
        #[arg(long)]
        target: i64,

        /// Interval in seconds
        #[arg(long)]
        every: u64,
    },

    /// Fire a target every N seconds inside a time window
    AddWindow {
        #[arg(long)]
        target: i64,

        /// Interval in seconds
        #[arg(long)]
        every: u64,

        /// Window start, RFC 3339 (defaults to now)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Window end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,

        /// Stop after this many runs
        #[arg(long)]
        max_runs: Option<u32>,
    },

    /// List all schedules
    List,

    /// Pause a schedule
    Pause {
        #[arg(long)]
        id: i64,
    },

    /// Resume a paused schedule
    Resume {
        #[arg(long)]
        id: i64,
    },

    /// Remove a schedule (its runs are kept)
    Remove {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    httpcron::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "starting httpcron daemon");
            httpcron::serve(config).await?;
        }
        Commands::Target { action } => target_command(&control(&config)?, action)?,
        Commands::Schedule { action } => schedule_command(&control(&config)?, action)?,
        Commands::Runs { schedule, limit } => {
            let runs = control(&config)?.runs(&RunQuery {
                schedule_id: schedule,
                limit: Some(limit),
                ..RunQuery::default()
            })?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!(
                    "{:<6} | {:<8} | {:<24} | {:<7} | {:<6} | {:>8} | Error",
                    "ID", "Schedule", "Executed", "Outcome", "Status", "Latency"
                );
                println!("{:-<6}-|-{:-<8}-|-{:-<24}-|-{:-<7}-|-{:-<6}-|-{:-<8}-|-{:-<20}", "", "", "", "", "", "", "");
                for run in runs {
                    println!(
                        "{:<6} | {:<8} | {:<24} | {:<7} | {:<6} | {:>6}ms | {}",
                        run.id,
                        run.schedule_id,
                        run.executed_at.to_rfc3339(),
                        run.outcome.as_str(),
                        run.status_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                        run.latency_ms,
                        run.error_type.map(|t| t.as_str()).unwrap_or("")
                    );
                }
            }
        }
        Commands::Metrics => {
            let stats = control(&config)?.run_stats()?;
            println!("Total runs:      {}", stats.total_runs);
            println!("Successful:      {}", stats.success_runs);
            println!("Failed:          {}", stats.failed_runs);
            println!("Avg latency:     {:.2} ms", stats.avg_latency_ms);
            for (ty, count) in &stats.failures_by_type {
                println!("  {:<20} {}", ty.as_str(), count);
            }
        }
    }

    Ok(())
}

fn control(config: &AppConfig) -> Result<Scheduler> {
    let pool = open_pool(&config.storage.db_path)?;
    Ok(Scheduler::new(
        Arc::new(SqliteStore::new(pool)),
        Arc::new(SystemClock),
    ))
}

fn target_command(scheduler: &Scheduler, action: TargetAction) -> Result<()> {
    match action {
        TargetAction::Add {
            url,
            method,
            headers,
            body,
        } => {
            let mut header_map = BTreeMap::new();
            for raw in headers {
                let (name, value) = raw
                    .split_once(':')
                    .ok_or_else(|| anyhow!("header '{raw}' must look like 'Name: value'"))?;
                header_map.insert(name.trim().to_string(), value.trim().to_string());
            }
            let target = scheduler.create_target(NewTarget {
                url,
                method,
                headers: header_map,
                body_template: body,
            })?;
            println!("Target {} added ({} {}).", target.id, target.method, target.url);
        }
        TargetAction::List => {
            let targets = scheduler.list_targets()?;
            if targets.is_empty() {
                println!("No targets found.");
            } else {
                println!("{:<6} | {:<7} | URL", "ID", "Method");
                println!("{:-<6}-|-{:-<7}-|-{:-<40}", "", "", "");
                for t in targets {
                    println!("{:<6} | {:<7} | {}", t.id, t.method, t.url);
                }
            }
        }
        TargetAction::Remove { id } => {
            scheduler.delete_target(id)?;
            println!("Target {id} removed.");
        }
    }
    Ok(())
}

fn schedule_command(scheduler: &Scheduler, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::AddInterval { target, every } => {
            let schedule = scheduler.create_schedule(NewSchedule {
                target_id: target,
                schedule: ScheduleSpec::Interval {
                    interval_seconds: every,
                },
            })?;
            println!(
                "Schedule {} added, first run at {}.",
                schedule.id, schedule.next_run_at
            );
        }
        ScheduleAction::AddWindow {
            target,
            every,
            start,
            end,
            max_runs,
        } => {
            let schedule = scheduler.create_schedule(NewSchedule {
                target_id: target,
                schedule: ScheduleSpec::Window {
                    interval_seconds: every,
                    start_time: start,
                    end_time: end,
                    max_runs,
                },
            })?;
            println!(
                "Schedule {} added, first run at {}.",
                schedule.id, schedule.next_run_at
            );
        }
        ScheduleAction::List => {
            let schedules = scheduler.list_schedules()?;
            if schedules.is_empty() {
                println!("No schedules found.");
            } else {
                println!(
                    "{:<6} | {:<6} | {:<8} | {:<9} | {:<5} | {:<24} | Window",
                    "ID", "Target", "Type", "Status", "Runs", "Next run"
                );
                println!("{:-<6}-|-{:-<6}-|-{:-<8}-|-{:-<9}-|-{:-<5}-|-{:-<24}-|-{:-<20}", "", "", "", "", "", "", "");
                for s in schedules {
                    let window = match &s.config {
                        ScheduleConfig::Interval { .. } => String::new(),
                        ScheduleConfig::Window {
                            start_time,
                            end_time,
                            max_runs,
                            ..
                        } => format!(
                            "{} .. {}{}",
                            start_time.to_rfc3339(),
                            end_time.to_rfc3339(),
                            max_runs.map(|m| format!(" (max {m})")).unwrap_or_default()
                        ),
                    };
                    println!(
                        "{:<6} | {:<6} | {:<8} | {:<9} | {:<5} | {:<24} | {}",
                        s.id,
                        s.target_id,
                        format!("{}/{}s", s.config.kind(), s.config.interval_seconds()),
                        s.status.as_str(),
                        s.run_count,
                        s.next_run_at.to_rfc3339(),
                        window
                    );
                }
            }
        }
        ScheduleAction::Pause { id } => {
            scheduler.pause(id)?;
            println!("Schedule {id} paused.");
        }
        ScheduleAction::Resume { id } => {
            let schedule = scheduler.resume(id)?;
            println!("Schedule {id} resumed, next run at {}.", schedule.next_run_at);
        }
        ScheduleAction::Remove { id } => {
            scheduler.delete_schedule(id)?;
            println!("Schedule {id} removed.");
        }
    }
    Ok(())
}
