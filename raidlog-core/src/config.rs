//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/raidlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/raidlog/` (~/.config/raidlog/)
//! - Data: `$XDG_DATA_HOME/raidlog/` (~/.local/share/raidlog/)
//! - State/Logs: `$XDG_STATE_HOME/raidlog/` (~/.local/state/raidlog/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Log monitoring configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Game log monitoring configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Override for the game's log root (the folder holding `log_*` subfolders)
    pub log_folder: Option<PathBuf>,

    /// Coalescing window for file change notifications, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on how much of the application log is scanned at startup
    /// to recover the last profile and session mode
    #[serde(default = "default_recovery_scan_bytes")]
    pub recovery_scan_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_folder: None,
            debounce_ms: default_debounce_ms(),
            recovery_scan_bytes: default_recovery_scan_bytes(),
        }
    }
}

impl MonitorConfig {
    /// Debounce window as a [`Duration`]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(Error::Config(
                "monitor.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.recovery_scan_bytes == 0 {
            return Err(Error::Config(
                "monitor.recovery_scan_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the log root: explicit override first, then the configured
    /// folder, then the platform default.
    pub fn resolve_log_root(&self, override_folder: Option<&Path>) -> Result<PathBuf> {
        let root = override_folder
            .map(Path::to_path_buf)
            .or_else(|| self.log_folder.clone())
            .or_else(default_game_log_root)
            .ok_or(Error::NoLogFolder)?;

        if !root.is_dir() {
            return Err(Error::LogFolderNotFound(root));
        }
        Ok(root)
    }
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_recovery_scan_bytes() -> u64 {
    8 * 1024 * 1024
}

/// Windows install locations of the game's log root, launcher first.
const WINDOWS_LOG_ROOTS: &[&str] = &[
    r"C:\Battlestate Games\Escape from Tarkov\Logs",
    r"C:\Program Files (x86)\Steam\steamapps\common\Escape from Tarkov\build\Logs",
];

/// Platform-conventional location of the game's log root.
///
/// Only native Windows installs have fixed locations; everywhere else the
/// folder must be configured.
pub fn default_game_log_root() -> Option<PathBuf> {
    if cfg!(windows) {
        first_existing(WINDOWS_LOG_ROOTS.iter().map(PathBuf::from))
    } else {
        None
    }
}

/// First candidate that is a directory, else the first candidate so the
/// caller can report it as missing.
fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = candidates.into_iter().collect();
    candidates
        .iter()
        .find(|path| path.is_dir())
        .or_else(|| candidates.first())
        .cloned()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.monitor.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/raidlog/config.toml` (~/.config/raidlog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("raidlog").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/raidlog/` (~/.local/share/raidlog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("raidlog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/raidlog/` (~/.local/state/raidlog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("raidlog")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/raidlog/raidlog.db` (~/.local/share/raidlog/raidlog.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("raidlog.db")
    }

    /// Returns today's log file path
    ///
    /// Files rotate daily: `$XDG_STATE_HOME/raidlog/raidlog.YYYY-MM-DD.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(format!(
            "raidlog.{}.log",
            chrono::Utc::now().format("%Y-%m-%d")
        ))
    }
}
