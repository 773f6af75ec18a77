//! Govern - milestone gates and planning generations from the command line
//!
//! Thin front end over `govern-core`:
//! - `init` creates or migrates the database
//! - `pass` records a gate decision and rolls the planning forward
//! - `planning` / `milestones` show the active generation of a portfolio entry

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use govern_core::governance::{DisabledBudgetTracking, ForecastStatus, OpenDirectory};
use govern_core::{paths, Database, GovernConfig, GovernanceService, InstanceLocks};

/// Govern - life-cycle milestone governance
#[derive(Parser)]
#[command(name = "govern")]
#[command(about = "Pass portfolio gates and inspect planning generations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./govern.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the config
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log to stderr instead of the log file
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database or bring its schema up to date
    Init,

    /// Pass a milestone instance
    Pass {
        /// Milestone instance id
        milestone_instance: i64,

        /// Status type id; the milestone's default status when omitted
        #[arg(short, long)]
        status: Option<i64>,

        /// Gate comments
        #[arg(short = 'm', long)]
        comments: Option<String>,
    },

    /// Show the active planning of a portfolio entry
    Planning { portfolio_entry: i64 },

    /// List planned milestones of a portfolio entry
    Milestones { portfolio_entry: i64 },
}

fn init_logging(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();
    match std::fs::File::create(log_dir.join("govern.log")) {
        Ok(log_file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .init(),
        // No log file: keep stderr quiet unless RUST_LOG asks for more
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = GovernConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    tracing::info!("Using database {}", config.database_path.display());

    let db = Database::with_busy_timeout(&config.database_path, config.busy_timeout())
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let service = GovernanceService::new(
        &db,
        Arc::new(InstanceLocks::new(config.lock_timeout())),
        Arc::new(DisabledBudgetTracking),
        Arc::new(OpenDirectory),
    );

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", config.database_path.display());
        }
        Commands::Pass {
            milestone_instance,
            status,
            comments,
        } => {
            let pass = match status {
                Some(status) => {
                    service.pass_milestone(milestone_instance, status, comments.as_deref())?
                }
                None => service.pass_milestone_with_default_status(milestone_instance)?,
            };

            if cli.json {
                return print_json(&pass);
            }
            println!(
                "Milestone instance {} passed ({:?})",
                pass.instance.id,
                pass.instance.state()
            );
            println!(
                "  Frozen planning {} (v{}), active planning {} (v{})",
                pass.frozen_planning.id,
                pass.frozen_planning.version,
                pass.active_planning.id,
                pass.active_planning.version
            );
            if let ForecastStatus::Failed(error) = &pass.forecast {
                eprintln!("  Budget forecast not recomputed: {}", error);
            }
        }
        Commands::Planning { portfolio_entry } => {
            let planning = service.get_active_planning(portfolio_entry)?;
            if cli.json {
                return print_json(&planning);
            }
            println!(
                "Planning {} v{} (created {})",
                planning.id,
                planning.version,
                planning.creation_date.format("%Y-%m-%d %H:%M")
            );
            println!(
                "  Resource plan: {}",
                planning
                    .resource_plan_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string())
            );
            println!(
                "  Budget: {}",
                planning
                    .budget_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string())
            );
        }
        Commands::Milestones { portfolio_entry } => {
            let milestones = service.get_planned_milestones(portfolio_entry)?;
            if cli.json {
                return print_json(&milestones);
            }
            if milestones.is_empty() {
                println!("No open milestones.");
            }
            for view in &milestones {
                let date = |d: Option<chrono::NaiveDate>| {
                    d.map_or_else(|| "-".to_string(), |d| d.to_string())
                };
                println!(
                    "  {:>3}.{:<2} {:<30} planned {:<10}  effective {}",
                    view.milestone.order,
                    view.milestone.sub_order,
                    view.milestone.name,
                    date(view.planned_date),
                    date(view.effective_date)
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_pass_arguments() {
        let cli = Cli::try_parse_from(["govern", "pass", "12", "--status", "3", "-m", "ok"])
            .expect("Failed to parse");
        match cli.command {
            Commands::Pass {
                milestone_instance,
                status,
                comments,
            } => {
                assert_eq!(milestone_instance, 12);
                assert_eq!(status, Some(3));
                assert_eq!(comments.as_deref(), Some("ok"));
            }
            _ => panic!("expected pass"),
        }
    }

    #[test]
    fn test_global_database_flag() {
        let cli = Cli::try_parse_from(["govern", "planning", "4", "--database", "/tmp/g.db"])
            .expect("Failed to parse");
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/g.db")));
        assert!(matches!(cli.command, Commands::Planning { portfolio_entry: 4 }));
    }
}
