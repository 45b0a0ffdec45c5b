//! timetrack - datastore host and backup command line.

mod config;
mod db;
mod models;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::models::settings::SqliteSettings;
use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use timetrack_backup::scheduler::timing::next_run_after;
use timetrack_backup::utils::logger;
use timetrack_backup::{ArtifactSummary, BackupService, RetentionConfig, ScheduleTime};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep running and take scheduled backups until interrupted
    Run,
    /// Show scheduler and backup status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List backups, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Take a backup now
    Snapshot {
        /// Take an automatic backup and apply retention
        #[arg(long)]
        automatic: bool,
    },
    /// Replace the datastore with a backup (a safety backup is taken first)
    Restore { name: String },
    /// Delete backups by name
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Copy a backup to another location
    Download { name: String, dest: PathBuf },
    /// Copy the live datastore to a file
    Export { dest: PathBuf },
    /// Replace the live datastore with a file
    Import { src: PathBuf },
    /// Write every backup into a ZIP archive
    Pack { dest: PathBuf },
    /// Add backups from a ZIP archive, skipping names already present
    Unpack { src: PathBuf },
    /// Show or change the backup schedule and retention
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show {
        #[arg(long)]
        json: bool,
    },
    Set(ConfigSetArgs),
}

#[derive(Args, Debug, Default)]
struct ConfigSetArgs {
    /// Daily backup times, HH:MM (comma separated or repeated)
    #[arg(long, value_delimiter = ',', num_args = 1.., conflicts_with = "clear_times")]
    times: Option<Vec<ScheduleTime>>,

    /// Disable scheduled backups
    #[arg(long)]
    clear_times: bool,

    #[arg(long)]
    daily: Option<u32>,

    #[arg(long)]
    weekly: Option<u32>,

    #[arg(long)]
    monthly: Option<u32>,

    /// Day whose backup represents the week, 0 = Sunday .. 6 = Saturday
    #[arg(long)]
    weekly_day: Option<u32>,
}

impl ConfigSetArgs {
    fn apply(self, mut config: RetentionConfig) -> RetentionConfig {
        if self.clear_times {
            config.schedule_times.clear();
        }
        if let Some(times) = self.times {
            config.schedule_times = times;
        }
        if let Some(v) = self.daily {
            config.max_daily = v;
        }
        if let Some(v) = self.weekly {
            config.max_weekly = v;
        }
        if let Some(v) = self.monthly {
            config.max_monthly = v;
        }
        if let Some(v) = self.weekly_day {
            config.weekly_day = v;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;

    // Initialize logging
    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    logger::init(log_level)?;

    let db_path = config.db_path();
    let pool = create_pool(&db_path)?;
    migrate(&pool)?;

    let settings = Arc::new(SqliteSettings::new(pool));
    let service = Arc::new(BackupService::new(
        db_path,
        config.backup_dir(),
        settings,
    ));

    match cli.command {
        Command::Run => run(service).await,
        command => tokio::task::spawn_blocking(move || execute(&service, command)).await?,
    }
}

async fn run(service: Arc<BackupService>) -> Result<()> {
    tracing::info!(
        "Starting timetrack v{} (backups in {})",
        env!("CARGO_PKG_VERSION"),
        service.store().backup_dir().display()
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    service.start().await;
    match service.scheduler_status().next_run {
        Some(at) => tracing::info!("Next scheduled backup at {}", at.format("%Y-%m-%d %H:%M")),
        None => tracing::info!("No backup schedule configured"),
    }

    cancel.cancelled().await;

    tracing::info!("Shutting down...");
    service.stop();
    Ok(())
}

fn execute(service: &BackupService, command: Command) -> Result<()> {
    match command {
        Command::Run => anyhow::bail!("`run` cannot be executed as a one-shot command"),
        Command::Status { json } => print_status(service, json)?,
        Command::List { json } => print_list(&service.list_artifacts()?, json)?,
        Command::Snapshot { automatic } => {
            let name = if automatic {
                service.create_automatic()?
            } else {
                service.create_manual()?
            };
            println!("Created {name}");
        }
        Command::Restore { name } => {
            let result = service.restore(&name)?;
            println!("Restored {name}");
            match result.safety_artifact_name {
                Some(safety) => println!("Previous state saved as {safety}"),
                None => println!("No previous datastore to save"),
            }
        }
        Command::Delete { names } => {
            let deleted = service.delete_artifacts(&names);
            println!("Deleted {deleted} of {} backup(s)", names.len());
        }
        Command::Download { name, dest } => {
            service.download_artifact(&name, &dest)?;
            println!("Copied {name} to {}", dest.display());
        }
        Command::Export { dest } => {
            service.export_live(&dest)?;
            println!("Exported datastore to {}", dest.display());
        }
        Command::Import { src } => {
            service.import_live(&src)?;
            println!("Imported datastore from {}", src.display());
        }
        Command::Pack { dest } => {
            let count = service.pack_archive(&dest)?;
            println!("Packed {count} backup(s) into {}", dest.display());
        }
        Command::Unpack { src } => {
            let count = service.unpack_archive(&src)?;
            println!("Unpacked {count} backup(s) from {}", src.display());
        }
        Command::Config(ConfigCommand::Show { json }) => print_config(&service.get_config()?, json)?,
        Command::Config(ConfigCommand::Set(args)) => {
            let saved = service.set_config(args.apply(service.get_config()?))?;
            print_config(&saved, false)?;
        }
    }
    Ok(())
}

fn print_status(service: &BackupService, json: bool) -> Result<()> {
    let config = service.get_config()?;
    let next_run = next_run_after(&config.schedule_times, Local::now());
    let last_auto = service.last_auto_backup()?;
    let backups = service.list_artifacts()?.len();

    if json {
        let status = serde_json::json!({
            "datastore": service.store().live_path().display().to_string(),
            "backupDir": service.store().backup_dir().display().to_string(),
            "backups": backups,
            "lastAutoBackup": last_auto,
            "nextRun": next_run,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let format = |at: Option<chrono::DateTime<Local>>| {
        at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string())
    };
    println!("Datastore:    {}", service.store().live_path().display());
    println!("Backup dir:   {}", service.store().backup_dir().display());
    println!("Backups:      {backups}");
    println!("Last auto:    {}", format(last_auto));
    match next_run {
        Some(at) => println!("Next run:     {}", at.format("%Y-%m-%d %H:%M")),
        None => println!("Next run:     not scheduled"),
    }
    Ok(())
}

fn print_list(backups: &[ArtifactSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(backups)?);
        return Ok(());
    }
    if backups.is_empty() {
        println!("No backups");
        return Ok(());
    }
    for backup in backups {
        println!(
            "{:<40} {:<10} {}  {:>10}",
            backup.name,
            backup.kind.to_string(),
            backup.date.format("%Y-%m-%d %H:%M:%S"),
            format_size(backup.size)
        );
    }
    Ok(())
}

fn print_config(config: &RetentionConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    let times: Vec<String> = config.schedule_times.iter().map(|t| t.to_string()).collect();
    println!(
        "Schedule:     {}",
        if times.is_empty() { "off".to_string() } else { times.join(", ") }
    );
    println!("Keep daily:   {}", config.max_daily);
    println!("Keep weekly:  {}", config.max_weekly);
    println!("Keep monthly: {}", config.max_monthly);
    println!("Weekly day:   {}", weekday_name(config.weekly_day));
    Ok(())
}

fn weekday_name(day: u32) -> &'static str {
    match day {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        _ => "?",
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
