//! Activity log
//!
//! User-visible history of actions, HTTP exchanges and received events.
//! This is the single sink every failure is reported to; nothing escalates
//! past it. Entries are mirrored to `tracing` and persisted so the history
//! survives restarts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{keys, KeyValueStore};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Entries kept in memory and in the persisted history
const MAX_ENTRIES: usize = 500;

/// Log entry category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    Base,
    Action,
    Http,
    Event,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Base => write!(f, "BASE"),
            LogKind::Action => write!(f, "ACTION"),
            LogKind::Http => write!(f, "HTTP"),
            LogKind::Event => write!(f, "EVENT"),
        }
    }
}

impl FromStr for LogKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASE" => Ok(LogKind::Base),
            "ACTION" => Ok(LogKind::Action),
            "HTTP" => Ok(LogKind::Http),
            "EVENT" => Ok(LogKind::Event),
            other => Err(AppError::BadRequest(format!("Unknown log type: {}", other))),
        }
    }
}

/// Entry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Info,
    Error,
}

/// One activity log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub title: String,
    pub text: String,
    pub status: LogStatus,
    /// Local wall clock time, `HH:MM:SS`
    pub time: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, title: &str, text: &str, status: LogStatus) -> Self {
        Self {
            kind,
            title: title.to_string(),
            text: text.to_string(),
            status,
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

fn default_filter() -> Vec<LogKind> {
    vec![LogKind::Base, LogKind::Action, LogKind::Http]
}

struct LogState {
    entries: Vec<LogEntry>,
    filter: Vec<LogKind>,
}

/// Activity log with a type filter
pub struct ActivityLog {
    state: Mutex<LogState>,
    store: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn KeyValueStore>, events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: vec![],
                filter: default_filter(),
            }),
            store,
            events,
        }
    }

    /// Restore history and filter from the persisted store
    pub async fn restore(&self) -> Result<()> {
        let entries = match self.store.load(keys::LOGS).await? {
            Some(json) => serde_json::from_str::<Vec<LogEntry>>(&json).unwrap_or_else(|e| {
                warn!("Discarding unreadable log history: {}", e);
                vec![]
            }),
            None => vec![],
        };
        let filter = match self.store.load(keys::LOG_FILTER).await? {
            Some(text) => parse_filter(&text),
            None => default_filter(),
        };

        let mut state = self.state.lock();
        state.entries = entries;
        state.filter = filter;
        Ok(())
    }

    /// Append an informational entry
    pub async fn push(&self, kind: LogKind, title: &str, text: &str) {
        info!(kind = %kind, "{}: {}", title, text);
        self.append(LogEntry::new(kind, title, text, LogStatus::Info))
            .await;
    }

    /// Append an error entry
    pub async fn push_error(&self, kind: LogKind, title: &str, text: &str) {
        warn!(kind = %kind, "{}: {}", title, text);
        self.append(LogEntry::new(kind, title, text, LogStatus::Error))
            .await;
    }

    /// Report an error value under a title
    pub async fn report(&self, kind: LogKind, title: &str, error: &AppError) {
        self.push_error(kind, title, &error.to_string()).await;
    }

    async fn append(&self, entry: LogEntry) {
        let snapshot = {
            let mut state = self.state.lock();
            state.entries.push(entry.clone());
            if state.entries.len() > MAX_ENTRIES {
                let excess = state.entries.len() - MAX_ENTRIES;
                state.entries.drain(..excess);
            }
            serde_json::to_string(&state.entries)
        };

        match snapshot {
            Ok(json) => {
                if let Err(e) = self.store.save(keys::LOGS, &json).await {
                    warn!("Failed to persist activity log: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize activity log: {}", e),
        }

        self.events.publish(SystemEvent::LogAppended { entry });
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().entries.clone()
    }

    /// Entries whose kind is enabled, newest first
    pub fn filtered(&self) -> Vec<LogEntry> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .rev()
            .filter(|e| state.filter.contains(&e.kind))
            .cloned()
            .collect()
    }

    pub fn filter(&self) -> Vec<LogKind> {
        self.state.lock().filter.clone()
    }

    /// Enable or disable a kind; returns the new filter
    pub async fn toggle_filter(&self, kind: LogKind) -> Result<Vec<LogKind>> {
        let filter = {
            let mut state = self.state.lock();
            if let Some(index) = state.filter.iter().position(|k| *k == kind) {
                state.filter.remove(index);
            } else {
                state.filter.push(kind);
            }
            state.filter.clone()
        };

        let text = filter
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.store.save(keys::LOG_FILTER, &text).await?;
        Ok(filter)
    }

    /// Drop the whole history
    pub async fn clear(&self) -> Result<()> {
        self.state.lock().entries.clear();
        self.store.remove(keys::LOGS).await
    }
}

fn parse_filter(text: &str) -> Vec<LogKind> {
    text.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}
