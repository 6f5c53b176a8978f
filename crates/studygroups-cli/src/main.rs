mod logging;
mod report;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use studygroups_config::{AppConfig, ConfigLoader, LogFormat};
use studygroups_db::{Runner, catalog, connection, source};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "studygroups")]
#[command(about = "StudyGroups database schema migrations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a config.yml or config.toml file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file to migrate
    #[arg(long, global = true, env = "STUDYGROUPS_DATABASE")]
    database: Option<PathBuf>,

    /// Load migrations from this directory instead of the built-in set
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply, revert and inspect schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply pending migrations in order
    Up {
        /// Stop after the migration with this version
        #[arg(long)]
        target: Option<u32>,

        /// Print the SQL that would run without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert the most recently applied migrations
    Down {
        /// Number of migrations to revert
        #[arg(default_value_t = 1, conflicts_with = "all")]
        steps: usize,

        /// Revert every applied migration
        #[arg(long)]
        all: bool,

        /// Print the SQL that would run without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert one migration by version; it must be the latest applied
    Revert { version: u32 },

    /// Show which migrations are applied
    Status,

    /// Clear a lock left behind by an interrupted run
    Unlock,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = load_config(&cli.global)?;
    logging::init(&config.log)?;

    let Commands::Migrate { action } = cli.command;
    let runner = load_runner(&config)?;
    let mut conn = open_database(&config)?;
    migrate(&runner, &mut conn, action)
}

fn load_config(args: &GlobalArgs) -> Result<AppConfig> {
    let mut config = ConfigLoader::load(args.config.as_deref()).context("failed to load config")?;
    apply_overrides(&mut config, args);
    Ok(config)
}

/// Command-line flags win over the config file and the environment.
fn apply_overrides(config: &mut AppConfig, args: &GlobalArgs) {
    if let Some(database) = &args.database {
        config.database.path = database.clone();
    }
    if let Some(dir) = &args.migrations_dir {
        config.migrations.directory = Some(dir.clone());
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }
}

fn load_runner(config: &AppConfig) -> Result<Runner> {
    let migrations = match &config.migrations.directory {
        Some(dir) => source::load_dir(dir)
            .with_context(|| format!("failed to load migrations from {}", dir.display()))?,
        None => catalog::migrations().context("built-in migrations are invalid")?,
    };
    debug!(count = migrations.len(), "migrations loaded");

    let runner = Runner::new(migrations)?;
    runner
        .validate()
        .context("migration definitions do not replay cleanly")?;
    Ok(runner)
}

fn open_database(config: &AppConfig) -> Result<Connection> {
    let path = &config.database.path;
    let timeout = Duration::from_millis(config.database.busy_timeout_ms);
    info!("using database {}", path.display());
    connection::open(path, timeout)
        .with_context(|| format!("failed to open database {}", path.display()))
}

fn migrate(runner: &Runner, conn: &mut Connection, action: MigrateAction) -> Result<()> {
    match action {
        MigrateAction::Up { target, dry_run } => {
            if dry_run {
                let steps = runner.plan_up(conn, target)?;
                println!("{}", report::plan(&steps));
            } else {
                let outcome = runner.up(conn, target)?;
                println!("{}", report::run(&outcome));
            }
        }
        MigrateAction::Down {
            steps,
            all,
            dry_run,
        } => {
            let steps = if all { usize::MAX } else { steps };
            if dry_run {
                let planned = runner.plan_down(conn, steps)?;
                println!("{}", report::plan(&planned));
            } else {
                let outcome = runner.down(conn, steps)?;
                println!("{}", report::run(&outcome));
            }
        }
        MigrateAction::Revert { version } => {
            let outcome = runner.revert(conn, version)?;
            println!("{}", report::run(&outcome));
        }
        MigrateAction::Status => {
            let status = runner.status(conn)?;
            println!("{}", report::status(&status));
        }
        MigrateAction::Unlock => {
            let released = runner.unlock(conn)?;
            println!("{}", report::unlocked(released.as_ref()));
        }
    }
    Ok(())
}
