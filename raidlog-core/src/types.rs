//! Core domain types for raidlog
//!
//! These types describe what the tracker infers from the game's logs.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Profile** | The active game account; a PMC id plus its derived SCAV id |
//! | **Raid** | One play session, from matchmaking to disconnect |
//! | **PMC / SCAV** | The two playable roles; their profile ids differ in the last hex digit |
//! | **Map key** | Canonical map identifier after normalization (`Customs`, `Woods`, ...) |
//! | **Party marker** | The latest matchmaking-group signal seen before a raid exists |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Profile
// ============================================

/// Identity of the currently active game account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    /// PMC profile id (hex string)
    pub pmc_id: String,
    /// SCAV profile id, always derived from `pmc_id`
    pub scav_id: String,
    /// Account id, when the log line carried one
    pub account_id: Option<String>,
    /// When this identity was last observed
    pub updated_at: DateTime<Utc>,
}

impl ProfileInfo {
    /// Build a profile from a PMC id, deriving the SCAV id.
    pub fn new(pmc_id: &str, account_id: Option<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            pmc_id: pmc_id.to_string(),
            scav_id: derive_scav_id(pmc_id),
            account_id,
            updated_at,
        }
    }

    /// Which role a raid profile id belongs to.
    pub fn raid_type_for(&self, profile_id: &str) -> RaidType {
        if profile_id.eq_ignore_ascii_case(&self.pmc_id) {
            RaidType::Pmc
        } else if profile_id.eq_ignore_ascii_case(&self.scav_id) {
            RaidType::Scav
        } else {
            RaidType::Unknown
        }
    }
}

/// Derive the SCAV profile id from a PMC profile id.
///
/// The last character is read as a hex digit and incremented modulo 16; the
/// result is appended as a lowercase hex digit. An id whose last character is
/// not a hex digit is returned unchanged.
pub fn derive_scav_id(pmc_id: &str) -> String {
    let mut chars = pmc_id.chars();
    let Some(last) = chars.next_back() else {
        return String::new();
    };
    let Some(digit) = last.to_digit(16) else {
        return pmc_id.to_string();
    };

    let next = (digit + 1) % 16;
    let mut scav = chars.as_str().to_string();
    // next < 16, so from_digit always yields a char
    if let Some(c) = std::char::from_digit(next, 16) {
        scav.push(c);
    }
    scav
}

// ============================================
// Raid
// ============================================

/// Which role the player is raiding as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidType {
    Pmc,
    Scav,
    #[default]
    Unknown,
}

impl RaidType {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidType::Pmc => "pmc",
            RaidType::Scav => "scav",
            RaidType::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for RaidType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pmc" => Ok(RaidType::Pmc),
            "scav" => Ok(RaidType::Scav),
            "unknown" => Ok(RaidType::Unknown),
            _ => Err(format!("unknown raid type: {}", s)),
        }
    }
}

impl std::fmt::Display for RaidType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaidType::Pmc => write!(f, "PMC"),
            RaidType::Scav => write!(f, "SCAV"),
            RaidType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Session mode the client is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Pve,
    Pvp,
    #[default]
    Unknown,
}

impl GameMode {
    /// Map a session-mode token from the log (`pve`, `pvp`, `regular`).
    pub fn from_log_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "pve" => GameMode::Pve,
            "pvp" | "regular" => GameMode::Pvp,
            _ => GameMode::Unknown,
        }
    }

    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Pve => "pve",
            GameMode::Pvp => "pvp",
            GameMode::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pve" => Ok(GameMode::Pve),
            "pvp" => Ok(GameMode::Pvp),
            "unknown" => Ok(GameMode::Unknown),
            _ => Err(format!("unknown game mode: {}", s)),
        }
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameMode::Pve => write!(f, "PVE"),
            GameMode::Pvp => write!(f, "PVP"),
            GameMode::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Lifecycle of a raid record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidState {
    /// Matchmaking or loading; no game server connection yet
    Matching,
    /// Connecting to the game server
    Connecting,
    /// Connected and playing
    InRaid,
    /// Disconnected, extracted, or closed by a later session
    Ended,
}

impl RaidState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidState::Matching => "matching",
            RaidState::Connecting => "connecting",
            RaidState::InRaid => "in_raid",
            RaidState::Ended => "ended",
        }
    }
}

/// Matchmaking group signal captured before a raid exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "leader", rename_all = "snake_case")]
pub enum PartyMarker {
    /// Queued alone
    Solo,
    /// Queued in a group; carries the group leader's id
    Group(String),
}

impl PartyMarker {
    /// Interpret a captured group id; blank means solo.
    pub fn from_group_id(group_id: &str) -> Self {
        let trimmed = group_id.trim();
        if trimmed.is_empty() {
            PartyMarker::Solo
        } else {
            PartyMarker::Group(trimmed.to_string())
        }
    }
}

/// Last observed network quality of the raid connection.
///
/// Every field is overwritten by the latest statistics line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Round-trip time in milliseconds
    pub rtt_ms: Option<f64>,
    /// Packet loss percentage
    pub packet_loss: Option<f64>,
    /// Packets sent
    pub sent: Option<u64>,
    /// Packets received
    pub received: Option<u64>,
}

impl NetworkStats {
    pub fn is_empty(&self) -> bool {
        self.rtt_ms.is_none()
            && self.packet_loss.is_none()
            && self.sent.is_none()
            && self.received.is_none()
    }
}

/// One in-progress or just-concluded raid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidInfo {
    /// Raid/profile correlation id (profile id from session creation or
    /// raid id from a transit marker)
    pub raid_id: Option<String>,
    /// PMC / SCAV / Unknown
    pub raid_type: RaidType,
    /// Game mode at raid creation
    pub game_mode: GameMode,
    /// Map identifier exactly as the log reported it
    pub map_name: Option<String>,
    /// Normalized map key
    pub map_key: Option<String>,
    /// Game server address (`ip:port`)
    pub server_address: Option<String>,
    /// Server session id
    pub session_id: Option<String>,
    /// Short raid code shown in game
    pub short_id: Option<String>,
    /// Matchmaking group signal consumed at creation
    pub party: Option<PartyMarker>,
    /// Lifecycle state
    pub state: RaidState,
    /// When the client entered the connected state
    pub started_at: Option<DateTime<Utc>>,
    /// When the raid was observed ending
    pub ended_at: Option<DateTime<Utc>>,
    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// Latest network quality sample
    pub network: NetworkStats,
}

impl RaidInfo {
    /// A fresh raid in `Matching` state.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            raid_id: None,
            raid_type: RaidType::Unknown,
            game_mode: GameMode::Unknown,
            map_name: None,
            map_key: None,
            server_address: None,
            session_id: None,
            short_id: None,
            party: None,
            state: RaidState::Matching,
            started_at: None,
            ended_at: None,
            created_at,
            network: NetworkStats::default(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state == RaidState::Ended
    }

    /// Whether the player queued with a group.
    pub fn is_party(&self) -> bool {
        matches!(self.party, Some(PartyMarker::Group(_)))
    }

    /// Group leader id when queued with a group.
    pub fn party_leader(&self) -> Option<&str> {
        match &self.party {
            Some(PartyMarker::Group(leader)) => Some(leader),
            _ => None,
        }
    }

    /// Mark ended, keeping an earlier end time if one is already set.
    pub fn end(&mut self, at: DateTime<Utc>) {
        self.state = RaidState::Ended;
        if self.ended_at.is_none() {
            self.ended_at = Some(at);
        }
    }

    /// Time between connecting and ending, when both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

// ============================================
// Log files
// ============================================

/// Which of the two watched game logs a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// `application.log`: profile, matchmaking, map loading
    Application,
    /// `network-connection.log`: server connect/disconnect and statistics
    Network,
}

impl LogKind {
    pub const ALL: [LogKind; 2] = [LogKind::Application, LogKind::Network];

    /// Classify a file by name; `None` for files the tracker ignores.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if !lower.ends_with(".log") {
            return None;
        }
        if lower.contains("network-connection") {
            Some(LogKind::Network)
        } else if lower.contains("application") {
            Some(LogKind::Application)
        } else {
            None
        }
    }

    /// Glob pattern for this kind within a log folder
    pub fn glob_pattern(&self) -> &'static str {
        match self {
            LogKind::Application => "*application*.log",
            LogKind::Network => "*network-connection*.log",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Application => "application",
            LogKind::Network => "network",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_scav_id_increments_last_nibble() {
        assert_eq!(derive_scav_id("5f1a2b3c4d5e6f7a8b9c0d1a"), "5f1a2b3c4d5e6f7a8b9c0d1b");
        assert_eq!(derive_scav_id("5f1a2b3c4d5e6f7a8b9c0d19"), "5f1a2b3c4d5e6f7a8b9c0d1a");
    }

    #[test]
    fn test_derive_scav_id_wraps() {
        assert_eq!(derive_scav_id("abc12f"), "abc120");
        assert_eq!(derive_scav_id("ABC12F"), "ABC120");
    }

    #[test]
    fn test_derive_scav_id_degenerate() {
        assert_eq!(derive_scav_id(""), "");
        assert_eq!(derive_scav_id("xyz"), "xyz");
    }

    #[test]
    fn test_raid_type_for_profile() {
        let profile = ProfileInfo::new("abc123", None, Utc::now());
        assert_eq!(profile.scav_id, "abc124");
        assert_eq!(profile.raid_type_for("abc123"), RaidType::Pmc);
        assert_eq!(profile.raid_type_for("ABC124"), RaidType::Scav);
        assert_eq!(profile.raid_type_for("ffffff"), RaidType::Unknown);
    }

    #[test]
    fn test_game_mode_tokens() {
        assert_eq!(GameMode::from_log_token("Pve"), GameMode::Pve);
        assert_eq!(GameMode::from_log_token("PVP"), GameMode::Pvp);
        assert_eq!(GameMode::from_log_token("Regular"), GameMode::Pvp);
        assert_eq!(GameMode::from_log_token("arena"), GameMode::Unknown);
    }

    #[test]
    fn test_party_marker_from_group_id() {
        assert_eq!(PartyMarker::from_group_id(""), PartyMarker::Solo);
        assert_eq!(PartyMarker::from_group_id("  "), PartyMarker::Solo);
        assert_eq!(
            PartyMarker::from_group_id("67c1"),
            PartyMarker::Group("67c1".to_string())
        );
    }

    #[test]
    fn test_raid_end_keeps_first_end_time() {
        let t0 = Utc::now();
        let mut raid = RaidInfo::new(t0);
        raid.started_at = Some(t0);
        raid.end(t0 + Duration::minutes(30));
        raid.end(t0 + Duration::minutes(45));

        assert!(raid.is_ended());
        assert_eq!(raid.duration(), Some(Duration::minutes(30)));
    }

    #[test]
    fn test_log_kind_from_file_name() {
        assert_eq!(
            LogKind::from_file_name("2024.01.15_19-20-00_0.14.0.0 application_000.log"),
            Some(LogKind::Application)
        );
        assert_eq!(
            LogKind::from_file_name("2024.01.15_19-20-00_0.14.0.0 network-connection_000.log"),
            Some(LogKind::Network)
        );
        assert_eq!(LogKind::from_file_name("backend_000.log"), None);
        assert_eq!(LogKind::from_file_name("application.txt"), None);
    }
}
