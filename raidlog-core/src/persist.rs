//! Persistence bridge between the tracker and the store
//!
//! The tracker hands finished raids and profile changes to a [`RaidSink`].
//! [`PersistenceBridge`] is the production sink: it queues each write on an
//! unbounded channel and a single blocking worker applies them to the
//! [`Database`] in order. Queuing never blocks the parsing path, and a failed
//! write is logged and dropped.

use crate::db::Database;
use crate::types::{ProfileInfo, RaidInfo};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Settings key for the PMC profile id
pub const PMC_PROFILE_KEY: &str = "eft.pmcProfileId";
/// Settings key for the SCAV profile id
pub const SCAV_PROFILE_KEY: &str = "eft.scavProfileId";
/// Settings key for the account id
pub const ACCOUNT_ID_KEY: &str = "eft.accountId";

/// Receiver of tracker output that must outlive the process.
///
/// Implementations must return promptly; the tracker calls these from the
/// log processing path.
pub trait RaidSink: Send + Sync {
    /// The active profile changed.
    fn profile_changed(&self, profile: &ProfileInfo);

    /// A raid finished and belongs in history.
    fn raid_completed(&self, raid: &RaidInfo);
}

/// Sink that drops everything (no store configured).
#[derive(Debug, Default)]
pub struct NullSink;

impl RaidSink for NullSink {
    fn profile_changed(&self, _profile: &ProfileInfo) {}

    fn raid_completed(&self, _raid: &RaidInfo) {}
}

enum WriteRequest {
    Profile(ProfileInfo),
    Raid(Box<RaidInfo>),
}

/// Fire-and-forget writer in front of the database.
///
/// Shared with the tracker as an `Arc<dyn RaidSink>`; call
/// [`shutdown`](Self::shutdown) once before exit to flush queued writes.
pub struct PersistenceBridge {
    sender: Mutex<Option<mpsc::UnboundedSender<WriteRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceBridge {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(db: Arc<Database>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriteRequest>();

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(request) = receiver.blocking_recv() {
                match request {
                    WriteRequest::Profile(profile) => {
                        if let Err(e) = save_profile(&db, &profile) {
                            tracing::warn!(
                                pmc_id = %profile.pmc_id,
                                error = %e,
                                "Failed to persist profile"
                            );
                        }
                    }
                    WriteRequest::Raid(raid) => match db.insert_raid_history(&raid) {
                        Ok(record_id) => {
                            tracing::debug!(record_id = %record_id, "Raid saved to history");
                        }
                        Err(e) => {
                            tracing::warn!(
                                map = ?raid.map_key,
                                error = %e,
                                "Failed to persist raid history"
                            );
                        }
                    },
                }
            }
            tracing::debug!("Persistence worker stopped");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stop accepting writes and wait for queued ones to finish.
    ///
    /// Writes arriving afterwards are dropped with a warning.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().unwrap().take());
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Persistence worker panicked");
            }
        }
    }

    fn enqueue(&self, request: WriteRequest) {
        let sender = self.sender.lock().unwrap();
        let sent = sender
            .as_ref()
            .is_some_and(|sender| sender.send(request).is_ok());
        if !sent {
            tracing::warn!("Persistence worker is gone, dropping write");
        }
    }
}

impl RaidSink for PersistenceBridge {
    fn profile_changed(&self, profile: &ProfileInfo) {
        self.enqueue(WriteRequest::Profile(profile.clone()));
    }

    fn raid_completed(&self, raid: &RaidInfo) {
        self.enqueue(WriteRequest::Raid(Box::new(raid.clone())));
    }
}

fn save_profile(db: &Database, profile: &ProfileInfo) -> crate::error::Result<()> {
    db.set_setting(PMC_PROFILE_KEY, &profile.pmc_id)?;
    db.set_setting(SCAV_PROFILE_KEY, &profile.scav_id)?;
    match &profile.account_id {
        Some(account_id) => db.set_setting(ACCOUNT_ID_KEY, account_id)?,
        // Don't pair the new profile with the previous account
        None => db.delete_setting(ACCOUNT_ID_KEY)?,
    }
    Ok(())
}

/// Read the persisted profile, if one was saved.
pub fn load_profile(db: &Database) -> crate::error::Result<Option<ProfileInfo>> {
    let Some((pmc_id, updated_at)) = db.get_setting_with_time(PMC_PROFILE_KEY)? else {
        return Ok(None);
    };
    let account_id = db.get_setting(ACCOUNT_ID_KEY)?;
    Ok(Some(ProfileInfo::new(&pmc_id, account_id, updated_at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameMode, RaidState, RaidType};
    use chrono::Utc;

    fn test_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_bridge_persists_profile() {
        let db = test_db();
        let bridge = PersistenceBridge::spawn(db.clone());

        let profile = ProfileInfo::new("abc12a", Some("555".to_string()), Utc::now());
        bridge.profile_changed(&profile);
        bridge.shutdown().await;

        assert_eq!(db.get_setting(PMC_PROFILE_KEY).unwrap().as_deref(), Some("abc12a"));
        assert_eq!(db.get_setting(SCAV_PROFILE_KEY).unwrap().as_deref(), Some("abc12b"));
        assert_eq!(db.get_setting(ACCOUNT_ID_KEY).unwrap().as_deref(), Some("555"));

        let loaded = load_profile(&db).unwrap().unwrap();
        assert_eq!(loaded.pmc_id, "abc12a");
        assert_eq!(loaded.scav_id, "abc12b");
    }

    #[tokio::test]
    async fn test_profile_without_account_clears_old_account() {
        let db = test_db();
        let bridge = PersistenceBridge::spawn(db.clone());

        bridge.profile_changed(&ProfileInfo::new("abc12a", Some("555".to_string()), Utc::now()));
        bridge.profile_changed(&ProfileInfo::new("def34c", None, Utc::now()));
        bridge.shutdown().await;

        assert!(db.get_setting(ACCOUNT_ID_KEY).unwrap().is_none());
        let loaded = load_profile(&db).unwrap().unwrap();
        assert_eq!(loaded.pmc_id, "def34c");
        assert_eq!(loaded.account_id, None);
    }

    #[tokio::test]
    async fn test_bridge_appends_raids_in_order() {
        let db = test_db();
        let bridge = PersistenceBridge::spawn(db.clone());

        for map in ["Customs", "Woods"] {
            let mut raid = RaidInfo::new(Utc::now());
            raid.map_key = Some(map.to_string());
            raid.raid_type = RaidType::Pmc;
            raid.game_mode = GameMode::Pve;
            raid.end(Utc::now());
            bridge.raid_completed(&raid);
        }
        bridge.shutdown().await;

        let history = db.list_raid_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.raid.state == RaidState::Ended));
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        // No migrations: every write fails
        let db = Arc::new(Database::open_in_memory().unwrap());
        let bridge = PersistenceBridge::spawn(db.clone());

        bridge.profile_changed(&ProfileInfo::new("abc", None, Utc::now()));
        bridge.raid_completed(&RaidInfo::new(Utc::now()));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_writes_after_shutdown_are_dropped() {
        let db = test_db();
        let bridge = PersistenceBridge::spawn(db.clone());
        bridge.shutdown().await;

        bridge.raid_completed(&RaidInfo::new(Utc::now()));
        bridge.shutdown().await;
        assert!(db.list_raid_history(10).unwrap().is_empty());
    }

    #[test]
    fn test_load_profile_when_empty() {
        let db = test_db();
        assert!(load_profile(&db).unwrap().is_none());
    }
}
