//! oxide-script-migrate CLI
//!
//! Command-line tool for applying and rolling back SQL script migrations.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_script_migrate::bootstrap::CONFIG_ENV;
use oxide_script_migrate::prelude::*;

/// Versioned SQL script migrations.
#[derive(Parser)]
#[command(name = "oxide-script-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, env = CONFIG_ENV, default_value = "env.json")]
    config: PathBuf,

    /// Backend to migrate; also selects the configuration section.
    #[arg(short, long, value_enum, default_value_t = BackendKind::Sqlite)]
    backend: BackendKind,

    /// Migration folder (overrides the configuration file).
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Sqlite,
    #[cfg(feature = "mysql")]
    Mysql,
}

impl BackendKind {
    fn section(self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            #[cfg(feature = "mysql")]
            Self::Mysql => "MySQL",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations.
    Up {
        /// Number of migrations to apply (all if not specified).
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Roll back applied migrations.
    Down {
        /// Number of migrations to roll back.
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Roll back every applied migration.
        #[arg(long, conflicts_with = "count")]
        all: bool,
    },

    /// Show applied and pending migrations.
    Status,

    /// Roll back everything, then apply everything again.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
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

    // Anchor relative migration folders at the configuration file.
    if std::env::var_os(CONFIG_ENV).is_none() {
        std::env::set_var(CONFIG_ENV, std::path::absolute(&cli.config)?);
    }

    let mut config = BackendConfig::from_json_file(&cli.config, cli.backend.section())?;
    if let Some(dir) = cli.migrations_dir {
        config.migration_folder = dir;
    }

    match cli.backend {
        BackendKind::Sqlite => run::<SqliteEntity>(&config, cli.command).await,
        #[cfg(feature = "mysql")]
        BackendKind::Mysql => run::<MySqlEntity>(&config, cli.command).await,
    }
}

async fn run<E: Connect>(config: &BackendConfig, command: Commands) -> anyhow::Result<()> {
    let mut info = bootstrap::connect::<E>(config).await?;
    let result = execute(&mut info, command).await;
    info.close().await;
    result
}

async fn execute<E: Connect>(info: &mut Info<E>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Up { count } => {
            let steps = count.map_or(Steps::All, Steps::Count);
            let applied = info.up(steps).await?;
            if applied.is_empty() {
                info!("No pending migrations.");
            }
            for name in &applied {
                println!(" [+] {name}");
            }
        }

        Commands::Down { count, all } => {
            let steps = if all { Steps::All } else { Steps::Count(count) };
            let reverted = info.down(steps).await?;
            if reverted.is_empty() {
                info!("No migrations have been applied yet.");
            }
            for name in &reverted {
                println!(" [-] {name}");
            }
        }

        Commands::Status => {
            info.verify().await?;
            let applied = info.entity().records().await?;
            let pending = info.pending().await?;

            println!("\nMigrations in {}:", info.folder().display());
            println!("{:-<60}", "");
            for record in &applied {
                println!(
                    " [X] {} ({})",
                    record.name,
                    record.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            for name in &pending {
                println!(" [ ] {name}");
            }
            println!();
        }

        Commands::Reset => {
            let applied = info.reset().await?;
            info!(count = applied.len(), "Migrations reset.");
        }
    }

    Ok(())
}
