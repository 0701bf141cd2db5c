//! ss - operator tool for stored simulation instances

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use simstate::cli::{Cli, Command, DataKind};
use simstate::config::Config;
use simstate::{
    StateBackend, StateMap, StateStore, compress_results, compress_series, compress_settings, decompress_results,
    decompress_series, decompress_settings,
};

type Store = StateStore<Box<dyn StateBackend>>;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre!("Failed to install subscriber: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    let config_path = cli.config.as_ref();
    match cli.command {
        Command::List => cmd_list(&open_store(config_path)?),
        Command::Show { id, raw } => cmd_show(&open_store(config_path)?, &id, raw),
        Command::Delete { id } => cmd_delete(&open_store(config_path)?, &id),
        Command::Ttl { id } => cmd_ttl(&open_store(config_path)?, &id),
        Command::Compress { input, kind } => cmd_convert(&input, kind, true),
        Command::Decompress { input, kind } => cmd_convert(&input, kind, false),
    }
}

fn open_store(config_path: Option<&PathBuf>) -> Result<Store> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    info!(backend = config.backend.kind(), compress = config.compress, "Loaded config");
    config.open_store().context("Failed to open state store")
}

fn cmd_list(store: &Store) -> Result<()> {
    debug!("cmd_list: called");
    let records = store.load_all().context("Failed to load instances")?;
    if records.is_empty() {
        println!("No instances stored ({})", store.backend().name());
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  step {}  {}",
            record.instance_id.cyan(),
            record.step.to_string().yellow(),
            record.checkpoint_time.to_rfc3339()
        );
    }
    println!("{} instance(s)", records.len());
    Ok(())
}

fn cmd_show(store: &Store, id: &str, raw: bool) -> Result<()> {
    debug!(%id, raw, "cmd_show: called");
    let record = if raw {
        store.backend().read(id).context("Failed to read instance")?
    } else {
        store.load_instance(id).context("Failed to load instance")?
    };
    let Some(record) = record else {
        return Err(eyre!("Instance not found: {}", id));
    };

    let json = serde_json::json!({
        "instance_id": record.instance_id,
        "step": record.step,
        "time": record.checkpoint_time.to_rfc3339(),
        "timeout": record.timeout,
        "state": record.state,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn cmd_delete(store: &Store, id: &str) -> Result<()> {
    debug!(%id, "cmd_delete: called");
    store.delete_instance(id).context("Failed to delete instance")?;
    println!("{} Deleted instance: {}", "✓".green(), id);
    Ok(())
}

fn cmd_ttl(store: &Store, id: &str) -> Result<()> {
    debug!(%id, "cmd_ttl: called");
    match store.remaining_ttl(id).context("Failed to query expiry")? {
        Some(secs) => println!("{} expires in {}s", id.cyan(), secs),
        None => println!("{} has no expiry ({})", id.cyan(), store.backend().name()),
    }
    Ok(())
}

fn cmd_convert(input: &str, kind: DataKind, compress: bool) -> Result<()> {
    debug!(%input, ?kind, compress, "cmd_convert: called");
    let text = read_input(input)?;
    let data: StateMap = serde_json::from_str(&text).context("Input is not a JSON object")?;

    let converted = match (kind, compress) {
        (DataKind::Settings, true) => compress_settings(&data)?,
        (DataKind::Settings, false) => decompress_settings(&data)?,
        (DataKind::Results, true) => compress_results(&data)?,
        (DataKind::Results, false) => decompress_results(&data)?,
        (DataKind::Series, true) => compress_series(&data),
        (DataKind::Series, false) => decompress_series(&data),
    };
    println!("{}", serde_json::to_string_pretty(&converted)?);
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("Failed to read stdin")?;
        return Ok(text);
    }
    let path = PathBuf::from(input);
    std::fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))
}
