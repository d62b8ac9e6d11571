//! Game log folder watcher
//!
//! Finds the current log session folder, follows its application and network
//! logs, and feeds appended lines to the [`RaidTracker`].
//!
//! ## Startup
//!
//! 1. Resolve the log root (override, config, platform default).
//! 2. Pick the newest `log_*` session folder, or the root itself.
//! 3. Seed each log's offset at its current end so history is not replayed.
//! 4. Scan the tail of the application log backwards for the last profile
//!    selection and session mode. Nothing else is recovered.
//! 5. Watch the root recursively.
//!
//! ## Runtime
//!
//! Change notifications are coalesced by `notify-debouncer-mini`. Each batch
//! schedules one blocking task per affected log kind. Kinds are processed
//! concurrently; a per-kind lock keeps lines from one file in order.
//!
//! A file of a known kind that has never been seen is a new log (the game
//! started a new session folder) and is read from offset 0, but only when it
//! lives in the newest session folder and is not older than the file being
//! followed. Touching a log in an older session folder changes nothing.

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::events::MonitorEvent;
use crate::patterns::{patterns, LogFact};
use crate::tail::LogTail;
use crate::tracker::RaidTracker;
use crate::types::{GameMode, LogKind};
use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::runtime::Handle;

/// Files currently being followed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoredFiles {
    /// Game log root that is being watched
    pub root: Option<PathBuf>,
    /// Session folder the current logs live in
    pub log_dir: Option<PathBuf>,
    pub application: Option<PathBuf>,
    pub network: Option<PathBuf>,
}

/// Profile and mode found by the startup scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveredSession {
    /// `(profile_id, account_id)` from the last profile selection
    pub profile: Option<(String, Option<String>)>,
    pub game_mode: Option<GameMode>,
    /// Timestamp of the profile line
    pub profile_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct KindReader {
    tail: Mutex<LogTail>,
    current: Mutex<Option<PathBuf>>,
}

struct Shared {
    tracker: Arc<RaidTracker>,
    application: KindReader,
    network: KindReader,
    root: Mutex<Option<PathBuf>>,
    log_dir: Mutex<Option<PathBuf>>,
    active: AtomicBool,
}

impl Shared {
    fn reader(&self, kind: LogKind) -> &KindReader {
        match kind {
            LogKind::Application => &self.application,
            LogKind::Network => &self.network,
        }
    }

    /// Read and apply new lines for one log kind.
    ///
    /// `changed` holds paths reported by the watcher; an empty slice means
    /// "re-read the current file".
    fn process_kind(&self, kind: LogKind, changed: &[PathBuf]) {
        let reader = self.reader(kind);
        let mut tail = reader.tail.lock().unwrap();

        for path in changed {
            if tail.is_tracked(path) || !path.is_file() {
                continue;
            }
            let current = reader.current.lock().unwrap().clone();
            if !self.is_newer_log(path, current.as_deref()) {
                tracing::debug!(
                    kind = kind.as_str(),
                    path = %path.display(),
                    "Ignoring change to an older log file"
                );
                continue;
            }

            tracing::info!(
                kind = kind.as_str(),
                path = %path.display(),
                "New log file, reading from the start"
            );
            tail.seed(path, 0);
            *reader.current.lock().unwrap() = Some(path.clone());
            if let Some(dir) = path.parent() {
                *self.log_dir.lock().unwrap() = Some(dir.to_path_buf());
            }
        }

        let Some(current) = reader.current.lock().unwrap().clone() else {
            return;
        };
        if !changed.is_empty() && !changed.contains(&current) {
            return;
        }

        match tail.read_new_lines(&current) {
            Ok(lines) => {
                if !lines.is_empty() {
                    tracing::debug!(
                        kind = kind.as_str(),
                        path = %current.display(),
                        lines = lines.len(),
                        "Processing appended lines"
                    );
                }
                self.tracker.process_lines(kind, &lines);
            }
            Err(e) => {
                // Offset untouched; the next notification retries
                tracing::warn!(
                    kind = kind.as_str(),
                    path = %current.display(),
                    error = %e,
                    "Failed to read log file"
                );
            }
        }
    }

    /// Whether an untracked log should replace the followed one: it must sit
    /// in the newest session folder and be at least as recent as `current`.
    fn is_newer_log(&self, path: &Path, current: Option<&Path>) -> bool {
        let Some(root) = self.root.lock().unwrap().clone() else {
            return false;
        };
        let session_dir = match find_session_dir(&root) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to look up the session folder");
                return false;
            }
        };
        if path.parent() != Some(session_dir.as_path()) {
            return false;
        }
        current.map_or(true, |current| modified(path) >= modified(current))
    }

    fn reset(&self) {
        for kind in LogKind::ALL {
            let reader = self.reader(kind);
            reader.tail.lock().unwrap().clear();
            *reader.current.lock().unwrap() = None;
        }
        *self.root.lock().unwrap() = None;
        *self.log_dir.lock().unwrap() = None;
    }
}

struct WatchSession {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// File watch orchestrator.
pub struct LogMonitor {
    config: MonitorConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<WatchSession>>,
}

impl LogMonitor {
    pub fn new(tracker: Arc<RaidTracker>, config: MonitorConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                tracker,
                application: KindReader::default(),
                network: KindReader::default(),
                root: Mutex::new(None),
                log_dir: Mutex::new(None),
                active: AtomicBool::new(false),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn tracker(&self) -> &Arc<RaidTracker> {
        &self.shared.tracker
    }

    /// Start following the game logs.
    ///
    /// Must be called inside a tokio runtime. Returns `false` (after emitting
    /// an error event) when the log folder cannot be used or the watcher
    /// cannot be created. Starting twice is a no-op.
    pub fn start(&self, log_folder: Option<&Path>) -> bool {
        let mut session = self.session.lock().unwrap();
        if session.is_some() {
            tracing::debug!("Monitoring already running");
            return true;
        }

        match self.try_start(log_folder) {
            Ok(started) => {
                let files = self.shared_files();
                tracing::info!(
                    root = ?files.root,
                    log_dir = ?files.log_dir,
                    "Monitoring started"
                );
                *session = Some(started);
                self.shared.active.store(true, Ordering::SeqCst);
                drop(session);
                self.publish(MonitorEvent::MonitoringStateChanged(true));
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start monitoring");
                self.shared.reset();
                drop(session);
                self.publish(MonitorEvent::Error(e.to_string()));
                false
            }
        }
    }

    /// Stop watching and forget all file offsets.
    pub fn stop(&self) {
        let mut session = self.session.lock().unwrap();
        let Some(stopped) = session.take() else {
            return;
        };
        self.shared.active.store(false, Ordering::SeqCst);
        drop(stopped);
        self.shared.reset();
        drop(session);

        tracing::info!("Monitoring stopped");
        self.publish(MonitorEvent::MonitoringStateChanged(false));
    }

    pub fn is_monitoring(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Root, session folder, and the log files being followed.
    pub fn current_files(&self) -> MonitoredFiles {
        if !self.is_monitoring() {
            return MonitoredFiles::default();
        }
        self.shared_files()
    }

    fn shared_files(&self) -> MonitoredFiles {
        MonitoredFiles {
            root: self.shared.root.lock().unwrap().clone(),
            log_dir: self.shared.log_dir.lock().unwrap().clone(),
            application: self.shared.application.current.lock().unwrap().clone(),
            network: self.shared.network.current.lock().unwrap().clone(),
        }
    }

    /// Read whatever was appended to the current files, without waiting for
    /// a change notification.
    pub fn refresh(&self) {
        if !self.is_monitoring() {
            return;
        }
        for kind in LogKind::ALL {
            self.shared.process_kind(kind, &[]);
        }
    }

    fn publish(&self, event: MonitorEvent) {
        self.shared.tracker.events().publish(event);
    }

    fn try_start(&self, log_folder: Option<&Path>) -> Result<WatchSession> {
        let runtime = Handle::try_current()?;
        let root = self.config.resolve_log_root(log_folder)?.canonicalize()?;
        let log_dir = find_session_dir(&root)?;

        self.shared.reset();
        *self.shared.root.lock().unwrap() = Some(root.clone());
        *self.shared.log_dir.lock().unwrap() = Some(log_dir.clone());
        for kind in LogKind::ALL {
            let Some(path) = find_latest_log(&log_dir, kind)? else {
                tracing::info!(
                    kind = kind.as_str(),
                    log_dir = %log_dir.display(),
                    "No log file yet, waiting for one"
                );
                continue;
            };
            let reader = self.shared.reader(kind);
            let offset = reader.tail.lock().unwrap().seed_to_end(&path)?;
            tracing::debug!(kind = kind.as_str(), path = %path.display(), offset, "Following log");

            if kind == LogKind::Application {
                let recovered = recover_session(&path, self.config.recovery_scan_bytes)?;
                tracing::info!(
                    profile = ?recovered.profile.as_ref().map(|(id, _)| id),
                    mode = ?recovered.game_mode,
                    "Recovered session from log history"
                );
                self.shared.tracker.restore_session(
                    recovered.profile,
                    recovered.game_mode,
                    recovered.profile_at.unwrap_or_else(Utc::now),
                );
            }
            *reader.current.lock().unwrap() = Some(path);
        }

        let shared = Arc::clone(&self.shared);
        let mut debouncer = new_debouncer(
            self.config.debounce(),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let mut by_kind: HashMap<LogKind, HashSet<PathBuf>> = HashMap::new();
                    for event in events {
                        let kind = event
                            .path
                            .file_name()
                            .and_then(|name| name.to_str())
                            .and_then(LogKind::from_file_name);
                        if let Some(kind) = kind {
                            by_kind.entry(kind).or_default().insert(event.path);
                        }
                    }

                    for (kind, paths) in by_kind {
                        let shared = Arc::clone(&shared);
                        let paths: Vec<PathBuf> = paths.into_iter().collect();
                        runtime.spawn_blocking(move || {
                            if shared.active.load(Ordering::SeqCst) {
                                shared.process_kind(kind, &paths);
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "File watch error");
                }
            },
        )?;
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;

        Ok(WatchSession {
            _debouncer: debouncer,
        })
    }
}

impl Drop for LogMonitor {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

fn glob_in(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full_pattern = PathBuf::from(glob::Pattern::escape(&dir.to_string_lossy())).join(pattern);
    let entries = glob::glob(&full_pattern.to_string_lossy())
        .map_err(|e| Error::Config(format!("Invalid glob pattern: {}", e)))?;
    Ok(entries.flatten().collect())
}

fn modified(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn newest(paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths
        .into_iter()
        .map(|path| (modified(&path), path))
        .max()
        .map(|(_, path)| path)
}

/// Newest `log_*` session folder under the root, or the root itself when the
/// game writes there directly.
pub fn find_session_dir(root: &Path) -> Result<PathBuf> {
    let dirs: Vec<PathBuf> = glob_in(root, "log_*")?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    Ok(newest(dirs).unwrap_or_else(|| root.to_path_buf()))
}

/// Most recently modified log file of one kind in a session folder.
pub fn find_latest_log(log_dir: &Path, kind: LogKind) -> Result<Option<PathBuf>> {
    let files: Vec<PathBuf> = glob_in(log_dir, kind.glob_pattern())?
        .into_iter()
        .filter(|p| p.is_file())
        .collect();
    Ok(newest(files))
}

/// Walk the last `max_bytes` of an application log backwards for the most
/// recent profile selection and session mode.
pub fn recover_session(path: &Path, max_bytes: u64) -> Result<RecoveredSession> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        // First line is probably cut
        lines.remove(0);
    }

    let mut recovered = RecoveredSession::default();
    for line in lines.iter().rev() {
        let parsed = patterns().parse_kind(LogKind::Application, line);
        for fact in parsed.facts {
            match fact {
                LogFact::ProfileSelected {
                    profile_id,
                    account_id,
                } if recovered.profile.is_none() => {
                    recovered.profile = Some((profile_id, account_id));
                    recovered.profile_at = parsed.timestamp;
                }
                LogFact::SessionMode { mode, .. } if recovered.game_mode.is_none() => {
                    recovered.game_mode = Some(mode);
                }
                _ => {}
            }
        }
        if recovered.profile.is_some() && recovered.game_mode.is_some() {
            break;
        }
    }

    Ok(recovered)
}
