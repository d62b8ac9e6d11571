//! Line patterns for the game's application and network logs
//!
//! Every rule is a compiled, case-insensitive regular expression with named
//! captures. Rules are independent: one line may produce several facts, and
//! nothing here touches tracker state. What a fact *means* is decided by
//! [`RaidTracker`](crate::tracker::RaidTracker).
//!
//! Free-text captures use bounded repetition, and the `regex` crate matches in
//! linear time, so hostile log content cannot cause runaway matching.
//!
//! ## Line shape
//!
//! ```text
//! 2024-01-15 19:23:45.123|0.14.0.2.28375|Info|application|SelectProfile ProfileId:5f1a... AccountId:1234567
//! 2024-01-15 19:31:02.877|0.14.0.2.28375|Info|network-connection|Enter to the 'Connected' state (address: 10.0.0.1:17000, ...)
//! ```

use crate::types::{GameMode, LogKind, NetworkStats, PartyMarker};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

/// A game server endpoint as printed in the network log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Fields of the `TRACE-NetworkGameCreate` line, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameCreated {
    pub profile_id: String,
    pub status: String,
    pub raid_mode: String,
    pub address: ServerAddress,
    pub location: String,
    pub session_id: String,
    pub game_mode: String,
    pub short_id: String,
}

/// Which network timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Messages,
    Connection,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Messages => write!(f, "messages"),
            TimeoutKind::Connection => write!(f, "connection"),
        }
    }
}

/// A typed fact extracted from one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogFact {
    /// `SelectProfile ProfileId:<hex> AccountId:<digits>`
    ProfileSelected {
        profile_id: String,
        account_id: Option<String>,
    },
    /// `Session mode: <token>`
    SessionMode { mode: GameMode, token: String },
    /// `Matching with group id: <id>` (blank id means solo)
    MatchingGroup { party: PartyMarker },
    /// Matchmaking aborted or cancelled
    MatchingCancelled,
    /// `TRACE-NetworkGameCreate` (primary raid start)
    GameCreated(GameCreated),
    /// Scene preset bundle load (fallback raid start)
    MapBundleLoaded { bundle: String },
    /// Transit controller marker (fallback raid start)
    TransitMarker {
        is_transit: bool,
        raid_id: String,
        count: u32,
        locations: String,
        /// First token of `locations`, the candidate map bundle
        map_bundle: Option<String>,
    },
    /// Transit controller end-of-raid marker
    TransitEnd {
        raid_id: String,
        count: u32,
        event_player: bool,
    },
    /// `Connect (address: ip:port)`
    Connect { address: ServerAddress },
    /// `Disconnect (address: ip:port)` or
    /// `Enter to the 'Disconnected' state (address: ip:port)`
    Disconnect { address: ServerAddress },
    /// `Enter to the 'Connected' state (address: ip:port ...)`
    Connected { address: ServerAddress },
    /// Periodic connection statistics
    NetworkStatistics {
        address: ServerAddress,
        stats: NetworkStats,
    },
    /// `Timeout: Messages|Connection timed out ... <n>ms (address: ...)`
    NetworkTimeout {
        kind: TimeoutKind,
        millis: u64,
        address: ServerAddress,
    },
    /// Client boot, which implies any open raid is over
    NewSession,
}

/// Result of running every rule over one line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// Leading timestamp, when the line has one
    pub timestamp: Option<DateTime<Utc>>,
    /// Facts in rule order
    pub facts: Vec<LogFact>,
}

/// The compiled rule set.
pub struct LogPatterns {
    timestamp: Regex,
    profile: Regex,
    session_mode: Regex,
    matching_group: Regex,
    matching_cancelled: Regex,
    game_create: Regex,
    map_bundle: Regex,
    transit_marker: Regex,
    transit_end: Regex,
    new_session: Regex,
    connect: Regex,
    disconnect: Regex,
    connected: Regex,
    statistics: Regex,
    timeout: Regex,
}

const IP: &str = r"(?P<ip>[0-9a-z.\-]{1,64}):(?P<port>\d{1,5})";

static PATTERNS: LazyLock<LogPatterns> = LazyLock::new(LogPatterns::compile);

/// Shared, compiled-once rule set.
pub fn patterns() -> &'static LogPatterns {
    &PATTERNS
}

fn rule(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern.replace("{IP}", IP)))
        .unwrap_or_else(|e| panic!("invalid built-in log pattern {:?}: {}", pattern, e))
}

impl LogPatterns {
    fn compile() -> Self {
        Self {
            timestamp: rule(r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d{1,7})?)"),
            profile: rule(
                r"SelectProfile\s+ProfileId:\s*(?P<profile>[0-9a-f]{1,64})(?:\s+AccountId:\s*(?P<account>\d{1,20}))?",
            ),
            session_mode: rule(r"Session mode:\s*(?P<mode>[a-z]{1,16})"),
            matching_group: rule(r"Matching with group id:[ \t]*(?P<group>[0-9a-z]{0,64})"),
            matching_cancelled: rule(r"Network game matching (?:aborted|cancelled)"),
            game_create: rule(concat!(
                r"TRACE-NetworkGameCreate profileStatus:\s*'Profileid:\s*(?P<profile>[0-9a-z]{1,64}),",
                r"\s*Status:\s*(?P<status>[^,']{1,32}),",
                r"\s*RaidMode:\s*(?P<raid_mode>[^,']{1,32}),",
                r"\s*Ip:\s*(?P<ip>[0-9a-z.\-]{1,64}),",
                r"\s*Port:\s*(?P<port>\d{1,5}),",
                r"\s*Location:\s*(?P<location>[^,'\s]{1,64}),",
                r"\s*Sid:\s*(?P<sid>[^,'\s]{1,128}),",
                r"\s*GameMode:\s*(?P<game_mode>[^,'\s]{1,32}),",
                r"\s*shortId:\s*(?P<short_id>[^,'\s]{1,32})'",
            )),
            map_bundle: rule(r"scene preset path:\s*maps/(?P<bundle>[a-z0-9_]{1,64})\.bundle"),
            transit_marker: rule(concat!(
                r"LocationTransitController:\s*isTransit:\s*(?P<flag>true|false),",
                r"\s*raidId:\s*(?P<raid>[0-9a-f]{1,64}),",
                r"\s*count:\s*(?P<count>\d{1,6}),",
                r"\s*locations:\s*(?P<locations>[^,\r\n]{1,256})",
            )),
            transit_end: rule(concat!(
                r"LocationTransitController:\s*transit end,",
                r"\s*raidId:\s*(?P<raid>[0-9a-f]{1,64}),",
                r"\s*count:\s*(?P<count>\d{1,6}),",
                r"\s*isEventPlayer:\s*(?P<event>true|false)",
            )),
            new_session: rule(r"Init:\s*pstrGameVersion"),
            connect: rule(r"\bConnect \(address:\s*{IP}"),
            disconnect: rule(
                r"(?:\bDisconnect|Enter to the 'Disconnected' state) \(address:\s*{IP}",
            ),
            connected: rule(r"Enter to the 'Connected' state \(address:\s*{IP}"),
            statistics: rule(concat!(
                r"Statistics \(address:\s*{IP},",
                r"\s*rtt:\s*(?P<rtt>\d{1,9}(?:\.\d{1,6})?),",
                r"\s*lose:\s*(?P<lose>\d{1,9}(?:\.\d{1,6})?),",
                r"\s*sent:\s*(?P<sent>\d{1,12}),",
                r"\s*received:\s*(?P<received>\d{1,12})",
            )),
            timeout: rule(
                r"Timeout:\s*(?P<kind>Messages|Connection) timed out after[^(\r\n]{0,128}?(?P<ms>\d{1,9})\s*ms\s*\(address:\s*{IP}",
            ),
        }
    }

    /// Parse the leading `YYYY-MM-DD HH:MM:SS.fff` timestamp.
    ///
    /// The game writes local wall time; the result is converted to UTC.
    pub fn timestamp(&self, line: &str) -> Option<DateTime<Utc>> {
        let caps = self.timestamp.captures(line)?;
        parse_log_timestamp(&caps["ts"])
    }

    /// Run both rule families over a line.
    pub fn parse(&self, line: &str) -> ParsedLine {
        let mut facts = self.match_application(line);
        facts.extend(self.match_network(line));
        ParsedLine {
            timestamp: self.timestamp(line),
            facts,
        }
    }

    /// Run only the rules that belong to one log kind.
    pub fn parse_kind(&self, kind: LogKind, line: &str) -> ParsedLine {
        let facts = match kind {
            LogKind::Application => self.match_application(line),
            LogKind::Network => self.match_network(line),
        };
        ParsedLine {
            timestamp: self.timestamp(line),
            facts,
        }
    }

    /// Rules for `application.log` lines.
    pub fn match_application(&self, line: &str) -> Vec<LogFact> {
        let mut facts = Vec::new();

        if let Some(caps) = self.profile.captures(line) {
            facts.push(LogFact::ProfileSelected {
                profile_id: caps["profile"].to_string(),
                account_id: caps.name("account").map(|m| m.as_str().to_string()),
            });
        }

        if let Some(caps) = self.session_mode.captures(line) {
            let token = caps["mode"].to_string();
            facts.push(LogFact::SessionMode {
                mode: GameMode::from_log_token(&token),
                token,
            });
        }

        if let Some(caps) = self.matching_group.captures(line) {
            facts.push(LogFact::MatchingGroup {
                party: PartyMarker::from_group_id(&caps["group"]),
            });
        }

        if self.matching_cancelled.is_match(line) {
            facts.push(LogFact::MatchingCancelled);
        }

        if let Some(caps) = self.game_create.captures(line) {
            if let Some(address) = address_from(&caps) {
                facts.push(LogFact::GameCreated(GameCreated {
                    profile_id: caps["profile"].to_string(),
                    status: caps["status"].trim().to_string(),
                    raid_mode: caps["raid_mode"].trim().to_string(),
                    address,
                    location: caps["location"].to_string(),
                    session_id: caps["sid"].to_string(),
                    game_mode: caps["game_mode"].to_string(),
                    short_id: caps["short_id"].to_string(),
                }));
            }
        }

        if let Some(caps) = self.map_bundle.captures(line) {
            facts.push(LogFact::MapBundleLoaded {
                bundle: strip_preset_suffix(&caps["bundle"]).to_string(),
            });
        }

        if let Some(caps) = self.transit_marker.captures(line) {
            let locations = caps["locations"].trim().to_string();
            facts.push(LogFact::TransitMarker {
                is_transit: caps["flag"].eq_ignore_ascii_case("true"),
                raid_id: caps["raid"].to_string(),
                count: caps["count"].parse().unwrap_or(0),
                map_bundle: first_location_token(&locations),
                locations,
            });
        }

        if let Some(caps) = self.transit_end.captures(line) {
            facts.push(LogFact::TransitEnd {
                raid_id: caps["raid"].to_string(),
                count: caps["count"].parse().unwrap_or(0),
                event_player: caps["event"].eq_ignore_ascii_case("true"),
            });
        }

        if self.new_session.is_match(line) {
            facts.push(LogFact::NewSession);
        }

        facts
    }

    /// Rules for `network-connection.log` lines.
    pub fn match_network(&self, line: &str) -> Vec<LogFact> {
        let mut facts = Vec::new();

        if let Some(address) = self.connect.captures(line).as_ref().and_then(address_from) {
            facts.push(LogFact::Connect { address });
        }

        if let Some(address) = self
            .disconnect
            .captures(line)
            .as_ref()
            .and_then(address_from)
        {
            facts.push(LogFact::Disconnect { address });
        }

        if let Some(address) = self.connected.captures(line).as_ref().and_then(address_from) {
            facts.push(LogFact::Connected { address });
        }

        if let Some(caps) = self.statistics.captures(line) {
            if let Some(address) = address_from(&caps) {
                facts.push(LogFact::NetworkStatistics {
                    address,
                    stats: NetworkStats {
                        rtt_ms: caps["rtt"].parse().ok(),
                        packet_loss: caps["lose"].parse().ok(),
                        sent: caps["sent"].parse().ok(),
                        received: caps["received"].parse().ok(),
                    },
                });
            }
        }

        if let Some(caps) = self.timeout.captures(line) {
            let kind = if caps["kind"].eq_ignore_ascii_case("messages") {
                TimeoutKind::Messages
            } else {
                TimeoutKind::Connection
            };
            if let (Some(address), Ok(millis)) = (address_from(&caps), caps["ms"].parse()) {
                facts.push(LogFact::NetworkTimeout {
                    kind,
                    millis,
                    address,
                });
            }
        }

        facts
    }
}

fn address_from(caps: &Captures<'_>) -> Option<ServerAddress> {
    Some(ServerAddress {
        ip: caps.name("ip")?.as_str().to_string(),
        port: caps.name("port")?.as_str().parse().ok()?,
    })
}

fn strip_preset_suffix(bundle: &str) -> &str {
    let lower = bundle.to_ascii_lowercase();
    if lower.ends_with("_preset") {
        &bundle[..bundle.len() - "_preset".len()]
    } else {
        bundle
    }
}

/// First token of a transit location string, split on space, hyphen, or `>`.
pub fn first_location_token(locations: &str) -> Option<String> {
    locations
        .split(|c: char| c.is_whitespace() || c == '-' || c == '>')
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Parse a log timestamp (`%Y-%m-%d %H:%M:%S%.f`, local time) into UTC.
pub fn parse_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    let utc = match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Skipped by a DST transition; treat the wall time as UTC
        None => Utc.from_utc_datetime(&naive),
    };
    Some(utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "2024-01-15 19:23:45.123|0.14.0.2.28375|Info|application|";
    const NET_PREFIX: &str = "2024-01-15 19:31:02.877|0.14.0.2.28375|Info|network-connection|";

    fn app(body: &str) -> Vec<LogFact> {
        patterns().match_application(&format!("{}{}", PREFIX, body))
    }

    fn net(body: &str) -> Vec<LogFact> {
        patterns().match_network(&format!("{}{}", NET_PREFIX, body))
    }

    fn addr(ip: &str, port: u16) -> ServerAddress {
        ServerAddress {
            ip: ip.to_string(),
            port,
        }
    }

    #[test]
    fn test_profile_selection() {
        let facts = app("SelectProfile ProfileId:5f1a2b3c4d5e6f7a8b9c0d1e AccountId:1234567");
        assert_eq!(
            facts,
            vec![LogFact::ProfileSelected {
                profile_id: "5f1a2b3c4d5e6f7a8b9c0d1e".to_string(),
                account_id: Some("1234567".to_string()),
            }]
        );
    }

    #[test]
    fn test_session_mode_tokens() {
        assert_eq!(
            app("Session mode: Pve"),
            vec![LogFact::SessionMode {
                mode: GameMode::Pve,
                token: "Pve".to_string()
            }]
        );
        assert!(matches!(
            app("session mode: Regular")[0],
            LogFact::SessionMode {
                mode: GameMode::Pvp,
                ..
            }
        ));
    }

    #[test]
    fn test_matching_group_solo_and_party() {
        assert_eq!(
            app("Matching with group id: "),
            vec![LogFact::MatchingGroup {
                party: PartyMarker::Solo
            }]
        );
        assert_eq!(
            app("Matching with group id: 67c1aa"),
            vec![LogFact::MatchingGroup {
                party: PartyMarker::Group("67c1aa".to_string())
            }]
        );
    }

    #[test]
    fn test_matching_cancelled_phrasings() {
        assert_eq!(
            app("Network game matching aborted"),
            vec![LogFact::MatchingCancelled]
        );
        assert_eq!(
            app("Network game matching cancelled"),
            vec![LogFact::MatchingCancelled]
        );
    }

    #[test]
    fn test_game_created() {
        let facts = app(
            "TRACE-NetworkGameCreate profileStatus: 'Profileid: abc123, Status: Busy, RaidMode: Online, Ip: 10.0.0.1, Port: 17000, Location: bigmap, Sid: 10.0.0.1-17000_15.01.24_19-24-00, GameMode: deathmatch, shortId: ABC123'",
        );
        assert_eq!(
            facts,
            vec![LogFact::GameCreated(GameCreated {
                profile_id: "abc123".to_string(),
                status: "Busy".to_string(),
                raid_mode: "Online".to_string(),
                address: addr("10.0.0.1", 17000),
                location: "bigmap".to_string(),
                session_id: "10.0.0.1-17000_15.01.24_19-24-00".to_string(),
                game_mode: "deathmatch".to_string(),
                short_id: "ABC123".to_string(),
            })]
        );
    }

    #[test]
    fn test_map_bundle_strips_preset() {
        assert_eq!(
            app("scene preset path:maps/woods_preset.bundle rcid:woods.ScenesPreset.asset"),
            vec![LogFact::MapBundleLoaded {
                bundle: "woods".to_string()
            }]
        );
        assert_eq!(
            app("scene preset path:maps/factory4_night.bundle"),
            vec![LogFact::MapBundleLoaded {
                bundle: "factory4_night".to_string()
            }]
        );
    }

    #[test]
    fn test_transit_marker() {
        let facts = app(
            "LocationTransitController: isTransit: true, raidId: 66a1bc, count: 1, locations: Woods-Customs>Reserve, extra",
        );
        assert_eq!(
            facts,
            vec![LogFact::TransitMarker {
                is_transit: true,
                raid_id: "66a1bc".to_string(),
                count: 1,
                locations: "Woods-Customs>Reserve".to_string(),
                map_bundle: Some("Woods".to_string()),
            }]
        );
    }

    #[test]
    fn test_transit_end() {
        assert_eq!(
            app("LocationTransitController: transit end, raidId: 66a1bc, count: 2, isEventPlayer: false"),
            vec![LogFact::TransitEnd {
                raid_id: "66a1bc".to_string(),
                count: 2,
                event_player: false,
            }]
        );
    }

    #[test]
    fn test_new_session_marker() {
        assert_eq!(
            app("Init: pstrGameVersion: 0.14.0.2.28375 pstrBackendUrl: https://prod.example"),
            vec![LogFact::NewSession]
        );
    }

    #[test]
    fn test_connect_is_not_disconnect() {
        assert_eq!(
            net("Connect (address: 10.0.0.1:17000)"),
            vec![LogFact::Connect {
                address: addr("10.0.0.1", 17000)
            }]
        );
        assert_eq!(
            net("Disconnect (address: 10.0.0.1:17000)"),
            vec![LogFact::Disconnect {
                address: addr("10.0.0.1", 17000)
            }]
        );
    }

    #[test]
    fn test_connected_state() {
        assert_eq!(
            net("Enter to the 'Connected' state (address: 10.0.0.1:17000, syn: True, asc: True)"),
            vec![LogFact::Connected {
                address: addr("10.0.0.1", 17000)
            }]
        );
    }

    #[test]
    fn test_disconnected_state() {
        assert_eq!(
            net("Enter to the 'Disconnected' state (address: 10.0.0.1:17000, reason: 0)"),
            vec![LogFact::Disconnect {
                address: addr("10.0.0.1", 17000)
            }]
        );
    }

    #[test]
    fn test_statistics() {
        let facts = net(
            "Statistics (address: 10.0.0.1:17000, rtt: 45.5, lose: 0.2, sent: 1000, received: 980)",
        );
        assert_eq!(
            facts,
            vec![LogFact::NetworkStatistics {
                address: addr("10.0.0.1", 17000),
                stats: NetworkStats {
                    rtt_ms: Some(45.5),
                    packet_loss: Some(0.2),
                    sent: Some(1000),
                    received: Some(980),
                },
            }]
        );
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(
            net("Timeout: Messages timed out after not receiving any message for 5000ms (address: 10.0.0.1:17000)"),
            vec![LogFact::NetworkTimeout {
                kind: TimeoutKind::Messages,
                millis: 5000,
                address: addr("10.0.0.1", 17000),
            }]
        );
        assert!(matches!(
            net("Timeout: Connection timed out after 30000 ms (address: 10.0.0.1:17000)")[0],
            LogFact::NetworkTimeout {
                kind: TimeoutKind::Connection,
                millis: 30000,
                ..
            }
        ));
    }

    #[test]
    fn test_noise_matches_nothing() {
        assert!(patterns().parse("").facts.is_empty());
        assert!(app("Loading bundle woods").is_empty());
        assert!(net("Send ping").is_empty());
    }

    #[test]
    fn test_long_transit_location_is_bounded() {
        let long = "x".repeat(100_000);
        let facts = app(&format!(
            "LocationTransitController: isTransit: true, raidId: ab, count: 1, locations: {}",
            long
        ));
        match &facts[0] {
            LogFact::TransitMarker { locations, .. } => assert_eq!(locations.len(), 256),
            other => panic!("unexpected fact {:?}", other),
        }
    }

    #[test]
    fn test_timestamp() {
        let ts = patterns().timestamp(&format!("{}Session mode: Pve", PREFIX));
        assert_eq!(ts, parse_log_timestamp("2024-01-15 19:23:45.123"));
        assert!(ts.is_some());
        assert!(patterns().timestamp("Session mode: Pve").is_none());
    }

    #[test]
    fn test_parse_kind_filters_rules() {
        let line = format!("{}Connect (address: 10.0.0.1:17000)", NET_PREFIX);
        assert!(patterns()
            .parse_kind(LogKind::Application, &line)
            .facts
            .is_empty());
        assert_eq!(patterns().parse_kind(LogKind::Network, &line).facts.len(), 1);
    }

    #[test]
    fn test_first_location_token() {
        assert_eq!(first_location_token("bigmap"), Some("bigmap".to_string()));
        assert_eq!(
            first_location_token("  Shoreline>Lighthouse"),
            Some("Shoreline".to_string())
        );
        assert_eq!(first_location_token(""), None);
    }
}
