// Command handler for the relay CLI

use crate::relay::cli::RelayCommand;
use crate::relay::config::RelayConfig;
use crate::relay::message::HistoryEntry;
use crate::relay::server::RelayServer;
use crate::relay::storage::{HistoryStore, SqliteHistoryStore};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Execute a relay command
pub async fn execute_command(command: RelayCommand) -> Result<()> {
    match command {
        RelayCommand::Serve { listen, data_dir } => handle_serve(listen, data_dir).await,
        RelayCommand::History {
            mission,
            data_dir,
            json,
        } => handle_history(data_dir, mission, json),
        RelayCommand::Missions { data_dir } => handle_missions(data_dir),
    }
}

fn open_store(data_dir: &Path) -> Result<SqliteHistoryStore> {
    SqliteHistoryStore::new(data_dir)
        .with_context(|| format!("Failed to open history store in {:?}", data_dir))
}

async fn handle_serve(listen: SocketAddr, data_dir: Option<PathBuf>) -> Result<()> {
    let config = RelayConfig::new(listen, data_dir);
    let store = Arc::new(open_store(&config.data_dir)?);

    let server = RelayServer::start(&config, store).await?;

    println!("✓ Mission relay running");
    println!("  WebSocket: ws://{}/?missionId=<id>  (header x-role: ICC|CLIENT|OPERATOR)", server.local_addr());
    println!("  Submit:    POST http://{}/send", server.local_addr());
    println!("  History:   {:?}", config.data_dir);

    println!("\nPress Ctrl+C to stop the relay");
    tokio::signal::ctrl_c().await?;

    println!("\nStopping relay...");
    server.shutdown()?;

    Ok(())
}

fn handle_history(data_dir: Option<PathBuf>, mission: String, json: bool) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(RelayConfig::default_data_dir);
    let store = open_store(&data_dir)?;

    let history = store
        .history(&mission)
        .with_context(|| format!("Failed to read history for mission {}", mission))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No messages for mission: {}", mission);
        return Ok(());
    }

    println!("Mission '{}' ({} messages):", mission, history.len());
    for entry in &history {
        println!("  {}", format_entry(entry));
    }

    Ok(())
}

fn handle_missions(data_dir: Option<PathBuf>) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(RelayConfig::default_data_dir);
    let store = open_store(&data_dir)?;

    let missions = store.missions().context("Failed to list missions")?;

    if missions.is_empty() {
        println!("No missions found");
        return Ok(());
    }

    println!("Missions ({}):", missions.len());
    for mission in missions {
        println!("  {}", mission);
    }

    Ok(())
}

fn format_entry(entry: &HistoryEntry) -> String {
    let body = match &entry.message {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    format!("[{}] {:<8} {}", entry.timestamp, entry.sender_role.as_str(), body)
}
