//! Database repository layer
//!
//! Settings and raid history operations.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// A raid as stored in history.
#[derive(Debug, Clone, PartialEq)]
pub struct RaidHistoryRecord {
    /// Record id (UUID v4)
    pub id: String,
    /// The raid at the moment it ended
    pub raid: RaidInfo,
    /// When the record was written
    pub recorded_at: DateTime<Utc>,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Settings operations
    // ============================================

    /// Get a setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_setting_with_time(key)?.map(|(value, _)| value))
    }

    /// Get a setting value along with when it was last written
    pub fn get_setting_with_time(&self, key: &str) -> Result<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT value, updated_at FROM settings WHERE key = ?",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(value, updated_at)| {
            let updated_at = parse_time(&updated_at).unwrap_or_else(Utc::now);
            (value, updated_at)
        }))
    }

    /// Insert or overwrite a setting
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a setting. Missing keys are fine.
    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ============================================
    // Raid history operations
    // ============================================

    /// Append a finished raid to history. Returns the new record id.
    pub fn insert_raid_history(&self, raid: &RaidInfo) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let party = raid.party.as_ref().map(serde_json::to_string).transpose()?;
        let network = serde_json::to_string(&raid.network)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO raid_history (
                id, raid_id, map_name, map_key, raid_type, game_mode,
                server_address, session_id, short_id,
                is_party, party_leader, party,
                started_at, ended_at, created_at, recorded_at, network
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                id,
                raid.raid_id,
                raid.map_name,
                raid.map_key,
                raid.raid_type.as_str(),
                raid.game_mode.as_str(),
                raid.server_address,
                raid.session_id,
                raid.short_id,
                raid.is_party(),
                raid.party_leader(),
                party,
                raid.started_at.map(|t| t.to_rfc3339()),
                raid.ended_at.map(|t| t.to_rfc3339()),
                raid.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                network,
            ],
        )?;

        Ok(id)
    }

    /// Most recent raids first
    pub fn list_raid_history(&self, limit: usize) -> Result<Vec<RaidHistoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM raid_history
            ORDER BY created_at DESC, recorded_at DESC
            LIMIT ?
            "#,
        )?;

        let records = stmt
            .query_map([limit as i64], Self::row_to_raid_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Number of raids in history
    pub fn count_raid_history(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM raid_history", [], |r| r.get(0))
            .map_err(Error::from)
    }

    fn row_to_raid_record(row: &Row) -> rusqlite::Result<RaidHistoryRecord> {
        let raid_type_str: String = row.get("raid_type")?;
        let game_mode_str: String = row.get("game_mode")?;
        let party_str: Option<String> = row.get("party")?;
        let network_str: String = row.get("network")?;
        let started_at_str: Option<String> = row.get("started_at")?;
        let ended_at_str: Option<String> = row.get("ended_at")?;
        let created_at_str: String = row.get("created_at")?;
        let recorded_at_str: String = row.get("recorded_at")?;

        let raid = RaidInfo {
            raid_id: row.get("raid_id")?,
            raid_type: raid_type_str.parse().unwrap_or(RaidType::Unknown),
            game_mode: game_mode_str.parse().unwrap_or(GameMode::Unknown),
            map_name: row.get("map_name")?,
            map_key: row.get("map_key")?,
            server_address: row.get("server_address")?,
            session_id: row.get("session_id")?,
            short_id: row.get("short_id")?,
            party: party_str.and_then(|s| serde_json::from_str(&s).ok()),
            state: RaidState::Ended,
            started_at: started_at_str.as_deref().and_then(parse_time),
            ended_at: ended_at_str.as_deref().and_then(parse_time),
            created_at: parse_time(&created_at_str).unwrap_or_else(Utc::now),
            network: serde_json::from_str(&network_str).unwrap_or_default(),
        };

        Ok(RaidHistoryRecord {
            id: row.get("id")?,
            raid,
            recorded_at: parse_time(&recorded_at_str).unwrap_or_else(Utc::now),
        })
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn ended_raid(map: &str, created_at: DateTime<Utc>) -> RaidInfo {
        let mut raid = RaidInfo::new(created_at);
        raid.raid_id = Some("abc12a".to_string());
        raid.raid_type = RaidType::Pmc;
        raid.game_mode = GameMode::Pvp;
        raid.map_name = Some(map.to_lowercase());
        raid.map_key = Some(map.to_string());
        raid.server_address = Some("10.0.0.1:17000".to_string());
        raid.party = Some(PartyMarker::Group("leader1".to_string()));
        raid.started_at = Some(created_at + Duration::minutes(2));
        raid.network.rtt_ms = Some(48.5);
        raid.end(created_at + Duration::minutes(30));
        raid
    }

    #[test]
    fn test_settings_upsert() {
        let db = test_db();
        assert!(db.get_setting("eft.pmcProfileId").unwrap().is_none());

        db.set_setting("eft.pmcProfileId", "abc12a").unwrap();
        db.set_setting("eft.pmcProfileId", "abc12c").unwrap();

        assert_eq!(
            db.get_setting("eft.pmcProfileId").unwrap().as_deref(),
            Some("abc12c")
        );
        let (_, updated_at) = db.get_setting_with_time("eft.pmcProfileId").unwrap().unwrap();
        assert!(updated_at <= Utc::now());
    }

    #[test]
    fn test_delete_setting() {
        let db = test_db();
        db.set_setting("eft.accountId", "555").unwrap();

        db.delete_setting("eft.accountId").unwrap();
        db.delete_setting("eft.accountId").unwrap();
        assert!(db.get_setting("eft.accountId").unwrap().is_none());
    }

    #[test]
    fn test_raid_history_preserves_fields() {
        let db = test_db();
        let created = DateTime::parse_from_rfc3339("2024-01-15T18:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let raid = ended_raid("Customs", created);

        let id = db.insert_raid_history(&raid).unwrap();
        let history = db.list_raid_history(10).unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].raid, raid);
        assert_eq!(history[0].raid.duration(), Some(Duration::minutes(28)));
    }

    #[test]
    fn test_raid_history_newest_first_with_limit() {
        let db = test_db();
        let base = Utc::now() - Duration::hours(3);
        for (i, map) in ["Customs", "Woods", "Reserve"].iter().enumerate() {
            db.insert_raid_history(&ended_raid(map, base + Duration::hours(i as i64)))
                .unwrap();
        }

        let history = db.list_raid_history(2).unwrap();
        let maps: Vec<_> = history
            .iter()
            .map(|r| r.raid.map_key.clone().unwrap())
            .collect();
        assert_eq!(maps, vec!["Reserve", "Woods"]);
        assert_eq!(db.count_raid_history().unwrap(), 3);
    }

    #[test]
    fn test_solo_and_unknown_party_round_trip() {
        let db = test_db();
        let mut solo = RaidInfo::new(Utc::now());
        solo.party = Some(PartyMarker::Solo);
        solo.end(Utc::now());
        db.insert_raid_history(&solo).unwrap();

        let record = &db.list_raid_history(1).unwrap()[0];
        assert_eq!(record.raid.party, Some(PartyMarker::Solo));
        assert!(!record.raid.is_party());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("raidlog.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());
    }
}
