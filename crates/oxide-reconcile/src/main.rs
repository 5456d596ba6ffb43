//! oxide-reconcile CLI
//!
//! Command-line tool for reconciling a database with a schema file.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_reconcile::prelude::*;

/// Snapshot-diffing schema reconciliation.
#[derive(Parser)]
#[command(name = "oxide-reconcile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Sqlite,
    Postgres,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the snapshot and hint tables.
    Init,

    /// Bring the database in line with a schema file.
    Reconcile {
        /// Desired schema (JSON).
        #[arg(short, long)]
        schema: PathBuf,

        /// Go back to the recorded snapshot instead.
        #[arg(long)]
        backward: bool,

        /// Accept every rename question.
        #[arg(long, conflicts_with = "assume_no")]
        assume_yes: bool,

        /// Decline every rename question.
        #[arg(long)]
        assume_no: bool,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the SQL a reconcile would run.
    Plan {
        /// Desired schema (JSON).
        #[arg(short, long)]
        schema: PathBuf,

        /// Dialect to render.
        #[arg(long, value_enum, default_value = "sqlite")]
        dialect: DialectArg,

        /// Go back to the recorded snapshot instead.
        #[arg(long)]
        backward: bool,
    },

    /// Print the latest recorded snapshot.
    ShowSnapshot,

    /// List rename hints.
    Hints {
        /// Include hints already consumed by a run.
        #[arg(long)]
        all: bool,
    },

    /// Record a column rename hint.
    Hint {
        /// Table holding the column.
        #[arg(long)]
        table: String,

        /// Old column name.
        #[arg(long)]
        from: String,

        /// New column name.
        #[arg(long)]
        to: String,
    },

    /// Import hints from a JSON hints file.
    ImportHints {
        /// Hints file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = SqliteConnectOptions::from_str(&cli.database)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let dry_run = matches!(cli.command, Commands::Reconcile { dry_run: true, .. });
    let mut reconciler = Reconciler::new(pool, SqliteDialect::new()).dry_run(dry_run);
    reconciler.init().await?;

    match cli.command {
        Commands::Init => {
            info!("Snapshot and hint tables are ready.");
        }

        Commands::Reconcile {
            schema,
            backward,
            assume_yes,
            assume_no,
            dry_run,
        } => {
            let desired = DesiredSchema::load(&schema)?;
            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            let direction = direction(backward);
            let changed = if assume_yes {
                reconciler
                    .reconcile(&desired, direction, &mut |_: &str| true)
                    .await?
            } else if assume_no {
                reconciler
                    .reconcile(&desired, direction, &mut Decline)
                    .await?
            } else {
                reconciler
                    .reconcile(&desired, direction, &mut TerminalPrompt)
                    .await?
            };

            if changed {
                info!("Schema reconciled.");
            } else if !dry_run {
                info!("No changes applied.");
            }
        }

        Commands::Plan {
            schema,
            dialect,
            backward,
        } => {
            let desired = DesiredSchema::load(&schema)?;
            let run = reconciler
                .prepare(&desired, direction(backward), &mut Decline)
                .await?;

            let Some(run) = run else {
                info!("Schema is up to date; nothing to plan.");
                return Ok(());
            };

            let steps = match dialect {
                DialectArg::Sqlite => run.steps(&SqliteDialect::new())?,
                DialectArg::Postgres => run.steps(&PostgresDialect::new())?,
            };
            for step in steps {
                println!("-- {}", step.description);
                for sql in step.sql {
                    println!("{sql};");
                }
            }
        }

        Commands::ShowSnapshot => match reconciler.latest_snapshot().await? {
            Some(record) => {
                println!(
                    "Snapshot taken {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!("{}", serde_json::to_string_pretty(&record.schema)?);
            }
            None => info!("No snapshot has been recorded yet."),
        },

        Commands::Hints { all } => {
            let hints = if all {
                reconciler.all_hints().await?
            } else {
                reconciler.active_hints().await?
            };

            if hints.is_empty() {
                info!("No hints.");
            } else {
                println!("{}", HintFile::to_json(&hints)?);
            }
        }

        Commands::Hint { table, from, to } => {
            reconciler.record_hint(table, from, to).await?;
        }

        Commands::ImportHints { file } => {
            let count = reconciler.import_hints(&file).await?;
            info!("Imported {} hint(s) from {}", count, file.display());
        }
    }

    Ok(())
}

fn direction(backward: bool) -> Direction {
    if backward {
        Direction::Backward
    } else {
        Direction::Forward
    }
}
