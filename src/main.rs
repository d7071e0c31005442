mod api;
mod cli;
mod config;
mod db;
mod error;
mod goals;
mod progress;
mod scheduler;
mod stats;

use crate::cli::onboard::run_onboarding;
use crate::cli::{Cli, Commands, ConfigCommands, StatsCommands};
use crate::config::Config;
use crate::db::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            let _ = run_onboarding()?;
            Ok(())
        }
        Commands::Config { command } => handle_config_command(command),
        Commands::Status => handle_status(),
        Commands::Doctor => handle_doctor(),
        Commands::Service => {
            let config = load_config()?;
            run_service(config).await
        }
        Commands::Progress { goal_id, at } => handle_progress(goal_id, at),
        Commands::Stats { command } => handle_stats_command(command),
        Commands::Drain => handle_drain(),
        Commands::Rebuild { user, book } => handle_rebuild(user, book),
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            println!("Config saved: {key} = {value}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn handle_status() -> Result<()> {
    let config = load_config()?;
    let database = Database::open(&config.db_path)?;
    let (user_rows, book_rows) = database.stats_row_counts()?;

    println!("Shelfmark status");
    println!("- db_path: {}", config.db_path.display());
    println!("- api_port: {}", config.api_port);
    println!("- pending_events: {}", database.pending_event_count()?);
    println!(
        "- last_processed_at: {}",
        database
            .last_processed_at()?
            .map(|instant| instant.to_rfc3339())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("- user_stats_rows: {user_rows}");
    println!("- book_stats_rows: {book_rows}");

    Ok(())
}

fn handle_doctor() -> Result<()> {
    let config_path = Config::config_path()?;
    let mut issues = Vec::new();

    if config_path.exists() {
        println!("[OK] config.json found: {}", config_path.display());
    } else {
        println!("[WARN] config.json not found: {}", config_path.display());
        issues.push("config missing".to_string());
    }

    let config = load_or_default_config()?;

    match Database::open(&config.db_path) {
        Ok(database) => {
            println!("[OK] SQLite reachable: {}", config.db_path.display());
            let pending = database.pending_event_count()?;
            if pending > i64::try_from(config.dispatch_batch_size).unwrap_or(i64::MAX) {
                println!("[WARN] {pending} progress events waiting; is the service running?");
                issues.push("event backlog".to_string());
            } else {
                println!("[OK] pending progress events: {pending}");
            }
        }
        Err(error) => {
            println!("[WARN] SQLite check failed: {error}");
            issues.push("db unreachable".to_string());
        }
    }

    if let Err(error) = config.parse_rebuild_time() {
        println!("[WARN] invalid rebuild_time setting: {error}");
        issues.push("invalid rebuild_time".to_string());
    } else {
        println!("[OK] rebuild_time format valid: {} UTC", config.rebuild_time);
    }

    if is_port_open(config.api_port) {
        println!("[OK] API listening on port {}", config.api_port);
    } else {
        println!("[WARN] nothing listening on port {}", config.api_port);
        issues.push("api not running".to_string());
    }

    if issues.is_empty() {
        println!("doctor result: no issues");
    } else {
        println!("doctor result: {} warning(s)", issues.len());
    }

    Ok(())
}

fn handle_progress(goal_id: i64, at: Option<String>) -> Result<()> {
    let config = load_config()?;
    let at = parse_optional_instant(at)?;
    let database = Database::open(&config.db_path)?;

    let progress = goals::goal_progress(&database, goal_id, at)?;
    println!("{}", serde_json::to_string_pretty(&progress)?);

    Ok(())
}

fn handle_stats_command(command: StatsCommands) -> Result<()> {
    let config = load_config()?;
    let database = Database::open(&config.db_path)?;

    let rendered = match command {
        StatsCommands::User { id } => database
            .user_stats(&id)?
            .map(|stats| serde_json::to_string_pretty(&stats))
            .transpose()?
            .unwrap_or_else(|| format!("No stats for user {id}")),
        StatsCommands::Book { id } => database
            .book_stats(id)?
            .map(|stats| serde_json::to_string_pretty(&stats))
            .transpose()?
            .unwrap_or_else(|| format!("No stats for book {id}")),
    };
    println!("{rendered}");

    Ok(())
}

fn handle_drain() -> Result<()> {
    let config = load_config()?;
    let mut database = Database::open(&config.db_path)?;

    let summary = stats::dispatcher::drain_all(
        &mut database,
        config.dispatch_batch_size,
        &config.default_display_name,
    )?;
    println!(
        "Applied {} event(s), {} failed, {} still pending",
        summary.applied,
        summary.failed,
        database.pending_event_count()?
    );

    Ok(())
}

fn handle_rebuild(user: Option<String>, book: Option<i64>) -> Result<()> {
    let config = load_config()?;
    let mut database = Database::open(&config.db_path)?;
    let now = Utc::now();

    if user.is_none() && book.is_none() {
        let summary = stats::rebuild_all(&mut database, &config.default_display_name, now)?;
        println!("Rebuilt {} user(s) and {} book(s)", summary.users, summary.books);
        return Ok(());
    }

    if let Some(user_id) = user {
        let rebuilt = stats::recompute_user_stats(&mut database, &user_id, &config.default_display_name, now)?;
        println!("{}", serde_json::to_string_pretty(&rebuilt)?);
    }
    if let Some(book_id) = book {
        let rebuilt = stats::recompute_book_stats(&mut database, book_id, now)?;
        println!("{}", serde_json::to_string_pretty(&rebuilt)?);
    }

    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    config.ensure_bootstrap_files()?;
    let _ = Database::open(&config.db_path)?;

    let shared_config = Arc::new(config);
    let wake = Arc::new(Notify::new());

    let dispatcher_config = Arc::clone(&shared_config);
    let scheduler_config = Arc::clone(&shared_config);
    let scheduler_schedule_fallback = Arc::clone(&shared_config);
    let api_config = Arc::clone(&shared_config);

    info!("Shelfmark service started");

    tokio::select! {
        dispatcher_result = stats::dispatcher::run_event_dispatcher(dispatcher_config, Arc::clone(&wake)) => {
            dispatcher_result?;
        }
        scheduler_result = scheduler::run_daily_job("stats-rebuild", move || {
            let runtime = Config::load().unwrap_or_else(|_| (*scheduler_schedule_fallback).clone());
            Ok(runtime.rebuild_enabled.then_some(runtime.rebuild_time))
        }, move |date| {
            let config = Arc::clone(&scheduler_config);
            async move {
                let runtime = Config::load().unwrap_or_else(|_| (*config).clone());
                run_nightly_rebuild(&runtime, date)
            }
        }) => {
            scheduler_result?;
        }
        api_result = api::run_server(api_config, wake) => {
            api_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

fn run_nightly_rebuild(config: &Config, date: NaiveDate) -> Result<()> {
    let mut database = Database::open(&config.db_path)?;
    let summary = stats::rebuild_all(&mut database, &config.default_display_name, Utc::now())?;
    info!(
        date = %date,
        users = summary.users,
        books = summary.books,
        "nightly statistics rebuild finished"
    );

    Ok(())
}

fn parse_optional_instant(input: Option<String>) -> Result<DateTime<Utc>> {
    input
        .as_deref()
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|instant| instant.with_timezone(&Utc))
                .with_context(|| format!("Invalid timestamp: {raw}. Example: 2025-01-10T09:00:00Z"))
        })
        .transpose()?
        .map_or_else(|| Ok(Utc::now()), Ok)
}

fn load_or_default_config() -> Result<Config> {
    Config::load().or_else(|_| {
        let config = Config::default();
        config.ensure_bootstrap_files()?;
        config.save()?;
        Ok(config)
    })
}

fn load_config() -> Result<Config> {
    Config::load().with_context(|| "Config file not found. Run `shelfmark onboard` first.".to_string())
}

fn is_port_open(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, Duration::from_millis(250)).is_ok()
}
