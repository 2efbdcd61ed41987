use cadence::store::{CallRecord, RecordStore, SqliteRecordStore};
use cadence::PeriodicUpdateManager;
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod config;
mod shell;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("cadence.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<SqliteRecordStore>> {
    let store = SqliteRecordStore::open_at(&config.storage.db_dir)
        .context(format!("Failed to open record store in {}", config.storage.db_dir.display()))?;
    Ok(Arc::new(store))
}

fn build_manager(config: &Config, store: Arc<SqliteRecordStore>) -> Result<PeriodicUpdateManager> {
    PeriodicUpdateManager::builder(store)
        .config(config.scheduler.clone())
        .on_runaway(Arc::new(|id: &str| {
            eprintln!("{} action {} is running away, throttled", "Warning:".yellow(), id);
        }))
        .build()
        .context("Failed to build scheduler")
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Run) => handle_run_command(config).await,
        Some(Commands::Exec { id }) => handle_exec_command(id, cli.is_verbose(), config).await,
        Some(Commands::Records { id }) => handle_records_command(id.as_deref(), config).await,
    }
}

async fn handle_run_command(config: &Config) -> Result<()> {
    if config.actions.is_empty() {
        println!("{}", "No actions configured, nothing to run".yellow());
        return Ok(());
    }

    let store = open_store(config)?;
    let manager = build_manager(config, store)?;
    for action in &config.actions {
        manager.register(&shell::shell_action(action), [shell::shell_spec(action)]);
        println!("{} {} every {}", "Scheduled:".green(), action.id, format_duration(action.interval_ms));
    }

    manager.start().await.context("Failed to start scheduler")?;
    println!("{}", "Running, press Ctrl-C to stop".cyan());

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    manager.shutdown();
    println!("{}", "Stopped".cyan());
    Ok(())
}

async fn handle_exec_command(id: &str, verbose: bool, config: &Config) -> Result<()> {
    info!("Executing action: {}", id);
    let action_config = config
        .action(id)
        .ok_or_else(|| eyre!("No action with id {} in config", id))?;

    let store = open_store(config)?;
    let manager = build_manager(config, store)?;
    // Loads the existing record so throttles and history carry over
    manager.start().await.context("Failed to start scheduler")?;

    let output = manager.execute_now(&shell::shell_action(action_config)).await;
    manager.shutdown();

    match output.code {
        Some(0) => println!("{} {}", "Succeeded:".green(), id),
        code => println!("{} {} (exit code {:?})", "Failed:".red(), id, code),
    }
    if verbose {
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }
    Ok(())
}

async fn handle_records_command(id: Option<&str>, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let records: Vec<CallRecord> = store
        .load_all()
        .await
        .context("Failed to load call records")?
        .into_iter()
        .filter(|record| id.is_none_or(|id| record.id == id))
        .collect();

    if records.is_empty() {
        println!("{}", "No call records".yellow());
        return Ok(());
    }

    for record in &records {
        let outcome = if record.was_success {
            "ok".green()
        } else {
            "failed".red()
        };
        println!("{} {} last run {}", record.id.bold(), outcome, format_timestamp(record.timestamp));
        if let Some(next) = record.next_timestamp_override {
            println!("  next run requested for {}", format_timestamp(next));
        }
        if let Some(throttled) = record.throttled_timestamp {
            println!("  {} until {}", "throttled".yellow(), format_timestamp(throttled));
        }
    }
    Ok(())
}

fn format_timestamp(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("{}ms", timestamp_ms))
}

fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0 => format!("{}ms", ms),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(500), "500ms");
        assert_eq!(format_duration(45_000), "45s");
        assert_eq!(format_duration(15 * 60_000), "15m");
        assert_eq!(format_duration(2 * 3_600_000), "2h");
    }

    #[test]
    fn test_format_timestamp_out_of_range() {
        assert_eq!(format_timestamp(u64::MAX), format!("{}ms", u64::MAX));
        assert!(!format_timestamp(0).ends_with("ms"));
    }
}
