//! Database layer for raidlog
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Key/value settings (persisted profile)
//! - Append-only raid history

pub mod repo;
pub mod schema;

pub use repo::{Database, RaidHistoryRecord};
