//! Raid state machine
//!
//! Turns [`LogFact`]s into a single consistent view of the active profile,
//! session mode, and current raid.
//!
//! ## Raid lifecycle
//!
//! ```text
//!  (none) ──► Matching ──► Connecting ──► InRaid ──► Ended ──► (none)
//! ```
//!
//! ## Evidence precedence
//!
//! - **Primary** facts (`TRACE-NetworkGameCreate`, connected state,
//!   disconnect, transit end) always act, and may create or replace a raid.
//! - **Fallback** facts only create a raid when none is open:
//!   - a map bundle load creates one, or overwrites the map key of the open
//!     raid (it is authoritative about *which* map is loading);
//!   - a transit marker creates one, or only fills a blank raid id / map key;
//!   - a new-session marker closes a raid whose end was never seen.
//!
//! A raid leaves the current slot as soon as it ends. It is handed to the
//! [`RaidSink`] exactly once, on that transition. A raid cancelled during
//! matchmaking is discarded without being saved.
//!
//! ## Locking
//!
//! One mutex guards all state. Each fact is applied in one short critical
//! section; events and sink calls are dispatched after the lock is released.

use crate::events::{EventBus, MonitorEvent, RaidEvent, RaidEventKind};
use crate::maps;
use crate::patterns::{patterns, GameCreated, LogFact};
use crate::persist::RaidSink;
use crate::types::{GameMode, LogKind, PartyMarker, ProfileInfo, RaidInfo, RaidState, RaidType};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Everything the tracker knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    /// Active profile
    pub profile: Option<ProfileInfo>,
    /// Last reported session mode
    pub game_mode: GameMode,
    /// Open raid, if any
    pub current_raid: Option<RaidInfo>,
    /// Matchmaking signal waiting for a raid to be created
    pub pending_party: Option<PartyMarker>,
}

/// Side effects produced while the lock was held.
#[derive(Default)]
struct Effects {
    events: Vec<MonitorEvent>,
    saved_profile: Option<ProfileInfo>,
    completed_raid: Option<RaidInfo>,
}

impl Effects {
    fn raid(&mut self, event: RaidEvent) {
        self.events.push(MonitorEvent::Raid(event));
    }
}

/// The raid state machine service.
///
/// Construct once and share behind an [`Arc`]; every method takes `&self`.
pub struct RaidTracker {
    state: Mutex<TrackerState>,
    events: EventBus,
    sink: Arc<dyn RaidSink>,
}

impl RaidTracker {
    pub fn new(events: EventBus, sink: Arc<dyn RaidSink>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            events,
            sink,
        }
    }

    /// Event publisher used by this tracker.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> TrackerState {
        self.state.lock().unwrap().clone()
    }

    pub fn profile(&self) -> Option<ProfileInfo> {
        self.state.lock().unwrap().profile.clone()
    }

    pub fn game_mode(&self) -> GameMode {
        self.state.lock().unwrap().game_mode
    }

    pub fn current_raid(&self) -> Option<RaidInfo> {
        self.state.lock().unwrap().current_raid.clone()
    }

    /// Seed the profile from storage without emitting or re-saving it.
    ///
    /// Ignored once a profile has been observed in the logs.
    pub fn warm_profile(&self, profile: ProfileInfo) {
        let mut state = self.state.lock().unwrap();
        if state.profile.is_none() {
            tracing::debug!(pmc_id = %profile.pmc_id, "Restored stored profile");
            state.profile = Some(profile);
        }
    }

    /// Apply profile and session mode recovered from log history.
    ///
    /// Only identity and mode are restored; no raid is created.
    pub fn restore_session(
        &self,
        profile: Option<(String, Option<String>)>,
        game_mode: Option<GameMode>,
        at: DateTime<Utc>,
    ) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().unwrap();
            if let Some((profile_id, account_id)) = profile {
                select_profile(&mut state, &profile_id, account_id, at, &mut effects);
            }
            if let Some(mode) = game_mode {
                state.game_mode = mode;
            }
        }
        // Recovery is silent apart from an actual identity change
        effects
            .events
            .retain(|e| matches!(e, MonitorEvent::ProfileChanged { .. }));
        self.dispatch(effects);
    }

    /// Parse and apply one `application.log` line.
    pub fn process_application_line(&self, line: &str) {
        self.process_line(LogKind::Application, line);
    }

    /// Parse and apply one `network-connection.log` line.
    pub fn process_network_line(&self, line: &str) {
        self.process_line(LogKind::Network, line);
    }

    /// Parse a line with the rules for its log kind and apply every match.
    pub fn process_line(&self, kind: LogKind, line: &str) {
        let parsed = patterns().parse_kind(kind, line);
        if parsed.facts.is_empty() {
            return;
        }
        let at = parsed.timestamp.unwrap_or_else(Utc::now);
        for fact in &parsed.facts {
            self.apply(fact, at);
        }
    }

    /// Apply lines in order.
    pub fn process_lines<S: AsRef<str>>(&self, kind: LogKind, lines: &[S]) {
        for line in lines {
            self.process_line(kind, line.as_ref());
        }
    }

    /// Apply a single fact observed at `at`.
    pub fn apply(&self, fact: &LogFact, at: DateTime<Utc>) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().unwrap();
            transition(&mut state, fact, at, &mut effects);
        }
        self.dispatch(effects);
    }

    fn dispatch(&self, effects: Effects) {
        if let Some(profile) = &effects.saved_profile {
            self.sink.profile_changed(profile);
        }
        if let Some(raid) = &effects.completed_raid {
            self.sink.raid_completed(raid);
        }
        for event in effects.events {
            self.events.publish(event);
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn transition(state: &mut TrackerState, fact: &LogFact, at: DateTime<Utc>, fx: &mut Effects) {
    match fact {
        LogFact::ProfileSelected {
            profile_id,
            account_id,
        } => select_profile(state, profile_id, account_id.clone(), at, fx),

        LogFact::SessionMode { mode, token } => {
            state.game_mode = *mode;
            tracing::info!(mode = %mode, token = %token, "Session mode detected");
            fx.raid(
                RaidEvent::new(
                    RaidEventKind::SessionModeDetected,
                    state.current_raid.clone(),
                    at,
                )
                .with_message(format!("Session mode: {}", mode)),
            );
        }

        LogFact::MatchingGroup { party } => {
            let message = match party {
                PartyMarker::Solo => "Matching solo".to_string(),
                PartyMarker::Group(leader) => format!("Matching in a party led by {}", leader),
            };
            state.pending_party = Some(party.clone());
            fx.raid(
                RaidEvent::new(RaidEventKind::MatchingStarted, state.current_raid.clone(), at)
                    .with_message(message),
            );
        }

        LogFact::MatchingCancelled => {
            state.pending_party = None;
            let cancelled = state
                .current_raid
                .as_ref()
                .is_some_and(|raid| raid.state == RaidState::Matching);
            if cancelled {
                if let Some(mut raid) = state.current_raid.take() {
                    raid.end(at);
                    tracing::info!(map = ?raid.map_key, "Matchmaking cancelled, raid discarded");
                    fx.raid(
                        RaidEvent::new(RaidEventKind::RaidEnded, Some(raid), at)
                            .with_message("Matchmaking cancelled"),
                    );
                }
            }
        }

        LogFact::GameCreated(created) => start_from_game_create(state, created, at, fx),

        LogFact::MapBundleLoaded { bundle } => {
            let map_key = maps::normalize(bundle);
            match state.current_raid.as_mut() {
                Some(raid) if !raid.is_ended() => {
                    tracing::debug!(
                        previous = ?raid.map_key,
                        map = %map_key,
                        "Map bundle loading for open raid"
                    );
                    raid.map_name = Some(bundle.clone());
                    raid.map_key = Some(map_key.clone());
                    fx.raid(
                        RaidEvent::new(RaidEventKind::MapLoadingStarted, Some(raid.clone()), at)
                            .with_message(format!("Loading {}", maps::display_name(&map_key))),
                    );
                }
                _ => {
                    let mut raid = new_fallback_raid(state, at);
                    raid.map_name = Some(bundle.clone());
                    raid.map_key = Some(map_key.clone());
                    open_raid(state, raid, at, "map bundle", fx);
                }
            }
        }

        LogFact::TransitMarker {
            raid_id,
            map_bundle,
            ..
        } => {
            match state.current_raid.as_mut() {
                Some(raid) if !raid.is_ended() => {
                    if is_blank(&raid.raid_id) {
                        raid.raid_id = Some(raid_id.clone());
                    }
                    if is_blank(&raid.map_key) {
                        // Unknown tokens are kept as-is here
                        let token = map_bundle.as_deref().filter(|b| !b.trim().is_empty());
                        if let Some(bundle) = token {
                            raid.map_name = Some(bundle.to_string());
                            raid.map_key = Some(maps::normalize(bundle));
                        }
                    }
                }
                _ => {
                    // Only a known map is enough evidence to open a raid
                    let resolved = map_bundle
                        .as_deref()
                        .and_then(|bundle| maps::canonical_key(bundle).map(|key| (bundle, key)));
                    if let Some((bundle, key)) = resolved {
                        let mut raid = new_fallback_raid(state, at);
                        raid.raid_id = Some(raid_id.clone());
                        raid.map_name = Some(bundle.to_string());
                        raid.map_key = Some(key.to_string());
                        open_raid(state, raid, at, "transit", fx);
                    }
                }
            }
        }

        LogFact::TransitEnd { raid_id, .. } => {
            if let Some(raid) = finish_raid(state, at, fx) {
                tracing::info!(raid_id = %raid_id, map = ?raid.map_key, "Raid ended by transit");
                fx.raid(
                    RaidEvent::new(RaidEventKind::RaidEnded, Some(raid), at)
                        .with_message("Raid ended"),
                );
            }
        }

        LogFact::NewSession => {
            if let Some(raid) = finish_raid(state, at, fx) {
                tracing::info!(
                    map = ?raid.map_key,
                    "New game session while raid was open, closing it"
                );
                fx.raid(
                    RaidEvent::new(RaidEventKind::Disconnected, Some(raid), at)
                        .with_message("Raid closed by a new game session"),
                );
            }
        }

        LogFact::Connect { address } => {
            if let Some(raid) = state.current_raid.as_mut() {
                raid.server_address = Some(address.to_string());
                raid.state = RaidState::Connecting;
            }
            fx.raid(
                RaidEvent::new(RaidEventKind::Connecting, state.current_raid.clone(), at)
                    .with_message(format!("Connecting to {}", address)),
            );
        }

        LogFact::Connected { address } => {
            if let Some(raid) = state.current_raid.as_mut() {
                raid.state = RaidState::InRaid;
                raid.started_at = Some(at);
                if raid.server_address.is_none() {
                    raid.server_address = Some(address.to_string());
                }
                tracing::info!(address = %address, map = ?raid.map_key, "Connected to raid");
                fx.raid(
                    RaidEvent::new(RaidEventKind::Connected, Some(raid.clone()), at)
                        .with_message(format!("Connected to {}", address)),
                );
            }
        }

        LogFact::Disconnect { address } => {
            if let Some(raid) = finish_raid(state, at, fx) {
                tracing::info!(address = %address, map = ?raid.map_key, "Disconnected from raid");
                fx.raid(
                    RaidEvent::new(RaidEventKind::Disconnected, Some(raid), at)
                        .with_message(format!("Disconnected from {}", address)),
                );
            }
        }

        LogFact::NetworkStatistics { stats, .. } => {
            if stats.is_empty() {
                return;
            }
            if let Some(raid) = state.current_raid.as_mut() {
                let network = &mut raid.network;
                if stats.rtt_ms.is_some() {
                    network.rtt_ms = stats.rtt_ms;
                }
                if stats.packet_loss.is_some() {
                    network.packet_loss = stats.packet_loss;
                }
                if stats.sent.is_some() {
                    network.sent = stats.sent;
                }
                if stats.received.is_some() {
                    network.received = stats.received;
                }
            }
        }

        LogFact::NetworkTimeout {
            kind,
            millis,
            address,
        } => {
            tracing::warn!(kind = %kind, millis, address = %address, "Network timeout");
            fx.raid(
                RaidEvent::new(RaidEventKind::NetworkTimeout, state.current_raid.clone(), at)
                    .with_message(format!("{} timeout after {}ms ({})", kind, millis, address)),
            );
        }
    }
}

fn select_profile(
    state: &mut TrackerState,
    profile_id: &str,
    account_id: Option<String>,
    at: DateTime<Utc>,
    fx: &mut Effects,
) {
    let changed = state
        .profile
        .as_ref()
        .map_or(true, |held| !held.pmc_id.eq_ignore_ascii_case(profile_id));

    if changed {
        let profile = ProfileInfo::new(profile_id, account_id, at);
        tracing::info!(
            pmc_id = %profile.pmc_id,
            scav_id = %profile.scav_id,
            "Profile selected"
        );
        state.profile = Some(profile.clone());
        fx.saved_profile = Some(profile.clone());
        fx.events.push(MonitorEvent::ProfileChanged {
            profile,
            timestamp: at,
        });
    }

    fx.raid(
        RaidEvent::new(RaidEventKind::ProfileSelected, state.current_raid.clone(), at)
            .with_message(format!("Profile {}", profile_id)),
    );
}

fn start_from_game_create(
    state: &mut TrackerState,
    created: &GameCreated,
    at: DateTime<Utc>,
    fx: &mut Effects,
) {
    let raid_type = state
        .profile
        .as_ref()
        .map_or(RaidType::Unknown, |p| p.raid_type_for(&created.profile_id));

    if let Some(previous) = &state.current_raid {
        tracing::debug!(
            previous_map = ?previous.map_key,
            "Session creation replaces the open raid"
        );
    }

    let mut raid = RaidInfo::new(at);
    raid.raid_id = Some(created.profile_id.clone());
    raid.raid_type = raid_type;
    raid.game_mode = state.game_mode;
    raid.map_name = Some(created.location.clone());
    raid.map_key = Some(maps::normalize(&created.location));
    raid.server_address = Some(created.address.to_string());
    raid.session_id = Some(created.session_id.clone());
    raid.short_id = Some(created.short_id.clone());
    raid.party = state.pending_party.take();

    tracing::info!(
        map = ?raid.map_key,
        raid_type = %raid.raid_type,
        mode = %raid.game_mode,
        short_id = %created.short_id,
        "Raid started"
    );

    let message = format!(
        "{} raid on {}",
        raid.raid_type,
        maps::display_name(raid.map_key.as_deref().unwrap_or_default())
    );
    state.current_raid = Some(raid.clone());
    fx.raid(RaidEvent::new(RaidEventKind::RaidStarted, Some(raid), at).with_message(message));
}

/// A raid built from fallback evidence: role unknown, party consumed.
fn new_fallback_raid(state: &mut TrackerState, at: DateTime<Utc>) -> RaidInfo {
    let mut raid = RaidInfo::new(at);
    raid.game_mode = state.game_mode;
    raid.party = state.pending_party.take();
    raid
}

fn open_raid(
    state: &mut TrackerState,
    raid: RaidInfo,
    at: DateTime<Utc>,
    source: &str,
    fx: &mut Effects,
) {
    tracing::info!(map = ?raid.map_key, source, "Raid started from fallback evidence");
    let message = format!(
        "Raid on {} (detected from {})",
        maps::display_name(raid.map_key.as_deref().unwrap_or_default()),
        source
    );
    state.current_raid = Some(raid.clone());
    fx.raid(RaidEvent::new(RaidEventKind::RaidStarted, Some(raid), at).with_message(message));
}

/// End the open raid, clear the slot, and queue it for history.
///
/// Returns the ended raid, or `None` when nothing was open.
fn finish_raid(state: &mut TrackerState, at: DateTime<Utc>, fx: &mut Effects) -> Option<RaidInfo> {
    let mut raid = state.current_raid.take()?;
    if raid.is_ended() {
        return None;
    }
    raid.end(at);
    fx.completed_raid = Some(raid.clone());
    Some(raid)
}
