//! # raidlog-core
//!
//! Core library for raidlog - a raid tracker that follows Escape from Tarkov
//! log files.
//!
//! This library provides:
//! - Line patterns for the game's application and network logs
//! - Map identifier normalization
//! - An incremental reader for growing log files
//! - The raid state machine and its event stream
//! - A watcher that ties the game log folder to the state machine
//! - Profile and raid history storage with SQLite
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! log files ──► LogMonitor ──► LogTail ──► RaidTracker ──► EventBus ──► observers
//!                                               │
//!                                               └──► PersistenceBridge ──► Database
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use raidlog_core::{Config, Database, EventBus, LogMonitor, PersistenceBridge, RaidTracker};
//! use std::sync::Arc;
//!
//! # async fn run() -> raidlog_core::Result<()> {
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&Config::database_path())?);
//! db.migrate()?;
//!
//! let bridge = Arc::new(PersistenceBridge::spawn(db));
//! let tracker = Arc::new(RaidTracker::new(EventBus::default(), bridge));
//! let monitor = LogMonitor::new(tracker.clone(), config.monitor);
//!
//! let mut events = tracker.events().subscribe();
//! if monitor.start(None) {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, RaidHistoryRecord};
pub use error::{Error, Result};
pub use events::{EventBus, MonitorEvent, RaidEvent, RaidEventKind};
pub use monitor::{LogMonitor, MonitoredFiles};
pub use persist::{load_profile, NullSink, PersistenceBridge, RaidSink};
pub use tail::LogTail;
pub use tracker::{RaidTracker, TrackerState};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod maps;
pub mod monitor;
pub mod patterns;
pub mod persist;
pub mod tail;
pub mod tracker;
pub mod types;
