use crate::error::{Error, Result};
use crate::server::ServerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Capacity of the live event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a Guardian log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianAction {
    /// Classified healthy for the first time
    Healthy,
    Degraded,
    Unhealthy,
    /// The Guardian took a failing server offline
    AutoOffline,
    /// Back to healthy after being degraded or unhealthy
    Recovery,
    /// An operator asked the host agent for a restart
    RestartRequested,
    /// Lifecycle action: create, update, status change or delete
    StatusChange,
}

impl GuardianAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardianAction::Healthy => "healthy",
            GuardianAction::Degraded => "degraded",
            GuardianAction::Unhealthy => "unhealthy",
            GuardianAction::AutoOffline => "auto_offline",
            GuardianAction::Recovery => "recovery",
            GuardianAction::RestartRequested => "restart_requested",
            GuardianAction::StatusChange => "status_change",
        }
    }
}

/// Append-only Guardian log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianLogEntry {
    /// Monotonic sequence number, unique within the log
    pub id: u64,
    pub server_id: ServerId,
    pub action: GuardianAction,
    /// Structured payload, shape depends on `action`
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Guardian event log.
///
/// Entries are kept in memory for the lifetime of the process, mirrored to an
/// optional JSON-lines file and broadcast to live subscribers. Appending never
/// fails the caller: a sink error is logged and the in-memory entry is kept.
pub struct GuardianLog {
    entries: Mutex<Vec<GuardianLogEntry>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<GuardianLogEntry>,
    sink: Option<Mutex<File>>,
    sink_path: Option<PathBuf>,
}

impl GuardianLog {
    /// In-memory log
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
            sink: None,
            sink_path: None,
        }
    }

    /// Log mirrored to a JSON-lines file.
    ///
    /// Entries already in the file are loaded back so history survives a
    /// restart. Lines that fail to parse are skipped with a warning.
    pub fn with_sink(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut log = Self::new();

        if path.exists() {
            let file = File::open(path).map_err(|e| {
                Error::Persistence(format!("Failed to open guardian log {}: {}", path.display(), e))
            })?;
            let mut restored = Vec::new();
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| {
                    Error::Persistence(format!("Failed to read guardian log: {}", e))
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<GuardianLogEntry>(&line) {
                    Ok(entry) => restored.push(entry),
                    Err(e) => tracing::warn!(
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed guardian log line"
                    ),
                }
            }
            let next = restored.iter().map(|e| e.id).max().unwrap_or(0) + 1;
            log.next_id = AtomicU64::new(next);
            log.entries = Mutex::new(restored);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                Error::Persistence(format!("Failed to open guardian log {}: {}", path.display(), e))
            })?;
        log.sink = Some(Mutex::new(file));
        log.sink_path = Some(path.to_path_buf());

        Ok(log)
    }

    /// Appends an entry and returns it
    pub fn append(
        &self,
        server_id: ServerId,
        action: GuardianAction,
        details: serde_json::Value,
    ) -> Result<GuardianLogEntry> {
        let entry = GuardianLogEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            server_id,
            action,
            details,
            created_at: Utc::now(),
        };

        {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| Error::Other("Failed to lock guardian log".to_string()))?;
            entries.push(entry.clone());
        }

        self.write_to_sink(&entry);

        tracing::debug!(
            server_id = %server_id,
            action = entry.action.as_str(),
            entry_id = entry.id,
            "Guardian log entry appended"
        );

        // No subscribers is fine
        let _ = self.sender.send(entry.clone());

        Ok(entry)
    }

    /// Best-effort append used by operations whose primary effect already
    /// happened. Failures are reported through tracing only.
    pub fn record(&self, server_id: ServerId, action: GuardianAction, details: serde_json::Value) {
        if let Err(e) = self.append(server_id, action, details) {
            tracing::error!(
                server_id = %server_id,
                action = action.as_str(),
                error = %e,
                "Failed to append guardian log entry"
            );
        }
    }

    fn write_to_sink(&self, entry: &GuardianLogEntry) {
        let Some(sink) = &self.sink else {
            return;
        };

        let result = serde_json::to_string(entry)
            .map_err(|e| e.to_string())
            .and_then(|line| {
                let mut file = sink.lock().map_err(|_| "sink lock poisoned".to_string())?;
                writeln!(file, "{}", line).map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            tracing::error!(
                path = ?self.sink_path,
                entry_id = entry.id,
                error = %e,
                "Failed to write guardian log entry to sink"
            );
        }
    }

    /// Entries of one server, newest first
    pub fn entries_for(&self, server_id: ServerId, limit: Option<usize>) -> Result<Vec<GuardianLogEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Other("Failed to lock guardian log".to_string()))?;

        let selected = entries
            .iter()
            .rev()
            .filter(|e| e.server_id == server_id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(selected)
    }

    /// All entries, newest first
    pub fn all_entries(&self, limit: Option<usize>) -> Result<Vec<GuardianLogEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Other("Failed to lock guardian log".to_string()))?;

        Ok(entries
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Live feed of entries appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GuardianLogEntry> {
        self.sender.subscribe()
    }
}

impl Default for GuardianLog {
    fn default() -> Self {
        Self::new()
    }
}
