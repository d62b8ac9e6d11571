//! raidlog - Escape from Tarkov raid tracker
//!
//! Follows the game's log files and reports raid activity as it happens.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/raidlog/raidlog.db (~/.local/share/raidlog/raidlog.db)
//! - Logs: $XDG_STATE_HOME/raidlog/ (~/.local/state/raidlog/)
//! - Config: $XDG_CONFIG_HOME/raidlog/config.toml (~/.config/raidlog/config.toml)

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use raidlog_core::maps;
use raidlog_core::{
    load_profile, Config, Database, EventBus, LogMonitor, MonitorEvent, PersistenceBridge,
    RaidEvent, RaidInfo, RaidTracker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "raidlog")]
#[command(about = "Track Escape from Tarkov raids from the game's log files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the game logs and print raid events until Ctrl+C
    Watch {
        /// Game log folder (the one holding `log_*` session folders)
        #[arg(short, long)]
        log_folder: Option<PathBuf>,
    },

    /// Show recently completed raids
    History {
        /// Number of raids to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show the stored profile
    Profile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        raidlog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Watch { log_folder } => watch(config, Arc::new(db), log_folder).await,
        Command::History { limit } => history(&db, limit),
        Command::Profile => profile(&db),
    }
}

async fn watch(config: Config, db: Arc<Database>, log_folder: Option<PathBuf>) -> Result<()> {
    tracing::info!("raidlog watch starting");

    let bridge = Arc::new(PersistenceBridge::spawn(db.clone()));
    let events = EventBus::default();
    let tracker = Arc::new(RaidTracker::new(events.clone(), bridge.clone()));

    match load_profile(&db) {
        Ok(Some(profile)) => tracker.warm_profile(profile),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load stored profile"),
    }

    let mut rx = events.subscribe();
    let monitor = LogMonitor::new(tracker, config.monitor);

    if !monitor.start(log_folder.as_deref()) {
        // The error event is already queued
        if let Ok(MonitorEvent::Error(message)) = rx.try_recv() {
            bail!("failed to start monitoring: {}", message);
        }
        bail!("failed to start monitoring");
    }

    let files = monitor.current_files();
    if let Some(log_dir) = &files.log_dir {
        println!("Watching {}", log_dir.display());
    }
    println!(
        "Log file: {}",
        raidlog_core::logging::log_file_path().display()
    );
    println!("Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
        }
    }

    monitor.stop();
    bridge.shutdown().await;
    tracing::info!("raidlog watch shutting down");
    Ok(())
}

fn history(db: &Database, limit: usize) -> Result<()> {
    let records = db
        .list_raid_history(limit)
        .context("failed to read raid history")?;

    if records.is_empty() {
        println!("No raids recorded yet.");
        return Ok(());
    }

    for record in records {
        println!("{}", format_history_row(&record.raid));
    }
    Ok(())
}

fn profile(db: &Database) -> Result<()> {
    match load_profile(db).context("failed to read profile")? {
        Some(profile) => {
            println!("PMC:     {}", profile.pmc_id);
            println!("SCAV:    {}", profile.scav_id);
            println!(
                "Account: {}",
                profile.account_id.as_deref().unwrap_or("unknown")
            );
            println!("Updated: {}", local_time(profile.updated_at));
        }
        None => println!("No profile recorded yet."),
    }
    Ok(())
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn map_label(raid: &RaidInfo) -> &str {
    raid.map_key.as_deref().map_or("unknown map", maps::display_name)
}

fn format_event(event: &MonitorEvent) -> String {
    match event {
        MonitorEvent::ProfileChanged { profile, timestamp } => format!(
            "[{}] profile changed: PMC {} / SCAV {}",
            local_time(*timestamp),
            profile.pmc_id,
            profile.scav_id
        ),
        MonitorEvent::Raid(raid_event) => format_raid_event(raid_event),
        MonitorEvent::MonitoringStateChanged(true) => "monitoring started".to_string(),
        MonitorEvent::MonitoringStateChanged(false) => "monitoring stopped".to_string(),
        MonitorEvent::Error(message) => format!("error: {}", message),
    }
}

fn format_raid_event(event: &RaidEvent) -> String {
    let mut line = format!("[{}] {}", local_time(event.timestamp), event.kind);
    if let Some(raid) = &event.raid {
        line.push_str(&format!(
            " | {} {} {} ({})",
            map_label(raid),
            raid.raid_type,
            raid.game_mode,
            raid.state.as_str()
        ));
    }
    if let Some(message) = &event.message {
        line.push_str(&format!(" | {}", message));
    }
    line
}

fn format_history_row(raid: &RaidInfo) -> String {
    let duration = raid
        .duration()
        .map(|d| format!("{}m", d.num_minutes()))
        .unwrap_or_else(|| "-".to_string());
    let party = if raid.is_party() { "party" } else { "solo" };
    let mut row = format!(
        "{}  {:<18} {:<7} {:<4} {:>5}  {}",
        local_time(raid.created_at),
        map_label(raid),
        raid.raid_type.to_string(),
        raid.game_mode.to_string(),
        duration,
        party
    );
    if let Some(rtt) = raid.network.rtt_ms {
        row.push_str(&format!("  rtt {:.0}ms", rtt));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use raidlog_core::{RaidEventKind, RaidType};

    #[test]
    fn test_format_raid_event_with_raid() {
        let mut raid = RaidInfo::new(Utc::now());
        raid.map_key = Some("Streets".to_string());
        raid.raid_type = RaidType::Pmc;

        let event = RaidEvent::new(RaidEventKind::RaidStarted, Some(raid), Utc::now())
            .with_message("PMC raid");
        let line = format_event(&MonitorEvent::Raid(event));

        assert!(line.contains("raid_started"));
        assert!(line.contains("Streets of Tarkov"));
        assert!(line.ends_with("| PMC raid"));
    }

    #[test]
    fn test_format_history_row_duration() {
        let start = Utc::now();
        let mut raid = RaidInfo::new(start);
        raid.started_at = Some(start);
        raid.end(start + Duration::minutes(35));

        let row = format_history_row(&raid);
        assert!(row.contains("35m"));
        assert!(row.contains("unknown map"));
        assert!(row.ends_with("solo"));
    }
}
