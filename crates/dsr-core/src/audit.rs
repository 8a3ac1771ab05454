//! Audit events and the log that stores them.
//!
//! An event is opened in [`AuditOutcome::InProgress`] when an operation starts and completed
//! exactly once when it ends. Queries only ever return completed events.
//!
//! [`FileAuditLog`] persists events as JSON lines: one line when an event starts and one when
//! it completes. On open the lines are folded by event id, the later line winning.

use crate::collaborators::Actor;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use dsr_types::ReleaseKey;
use dsr_uuid::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Create,
    Update,
    Read,
    Execute,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Read => "read",
            Self::Execute => "execute",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditOutcome {
    InProgress,
    Success,
    Failure,
}

/// What an audited operation is about to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditAction {
    pub category: AuditCategory,
    pub description: String,
    pub release_key: Option<ReleaseKey>,
}

impl AuditAction {
    pub fn new(
        category: AuditCategory,
        description: impl Into<String>,
        release_key: Option<&ReleaseKey>,
    ) -> Self {
        Self {
            category,
            description: description.into(),
            release_key: release_key.cloned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: EntityId,
    pub actor: Option<Actor>,
    pub release_key: Option<ReleaseKey>,
    pub category: AuditCategory,
    pub description: String,
    pub outcome: AuditOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn is_completed(&self) -> bool {
        self.outcome != AuditOutcome::InProgress
    }
}

/// Append-only store of audit events.
pub trait AuditLog: Send + Sync {
    /// Open an event in progress and return its id.
    fn start(&self, actor: Option<&Actor>, action: &AuditAction) -> CoreResult<EntityId>;

    /// Complete a previously started event. Completing twice is an error.
    fn complete(
        &self,
        id: &EntityId,
        outcome: AuditOutcome,
        detail: Option<serde_json::Value>,
    ) -> CoreResult<()>;

    /// Completed events for `release_key`, newest first.
    fn completed_events(&self, release_key: &ReleaseKey) -> CoreResult<Vec<AuditEvent>>;

    /// Every event including those still in progress, oldest first.
    fn events(&self) -> CoreResult<Vec<AuditEvent>>;
}

/// Audit log held in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_events(events: Vec<AuditEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    fn event(&self, id: &EntityId) -> Option<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == *id)
            .cloned()
    }
}

impl AuditLog for MemoryAuditLog {
    fn start(&self, actor: Option<&Actor>, action: &AuditAction) -> CoreResult<EntityId> {
        let event = AuditEvent {
            id: EntityId::new(),
            actor: actor.cloned(),
            release_key: action.release_key.clone(),
            category: action.category,
            description: action.description.clone(),
            outcome: AuditOutcome::InProgress,
            started_at: Utc::now(),
            ended_at: None,
            detail: None,
        };
        let id = event.id;
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(id)
    }

    fn complete(
        &self,
        id: &EntityId,
        outcome: AuditOutcome,
        detail: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let event = events
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown audit event {}", id)))?;
        if event.is_completed() {
            return Err(CoreError::InvalidInput(format!(
                "audit event {} already completed",
                id
            )));
        }
        event.outcome = outcome;
        event.ended_at = Some(Utc::now());
        event.detail = detail;
        Ok(())
    }

    fn completed_events(&self, release_key: &ReleaseKey) -> CoreResult<Vec<AuditEvent>> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.is_completed() && e.release_key.as_ref() == Some(release_key))
            .cloned()
            .collect())
    }

    fn events(&self) -> CoreResult<Vec<AuditEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Audit log appended to a JSON lines file, with an in-memory index for queries.
#[derive(Debug)]
pub struct FileAuditLog {
    file: Mutex<File>,
    index: MemoryAuditLog,
}

impl FileAuditLog {
    /// Open (or create) `path`, replaying the events already recorded there.
    ///
    /// A final line without its newline is a write cut short by a crash; it is truncated away.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(CoreError::AuditFile)?;
        }
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(CoreError::AuditFile(err)),
        };
        let complete_len = contents.rfind('\n').map_or(0, |i| i + 1);
        let events = replay(&contents[..complete_len])?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(CoreError::AuditFile)?;
        if complete_len < contents.len() {
            tracing::warn!(path = %path.display(), "dropping torn audit line");
            file.set_len(complete_len as u64).map_err(CoreError::AuditFile)?;
        }

        tracing::info!(path = %path.display(), events = events.len(), "opened audit log");
        Ok(Self {
            file: Mutex::new(file),
            index: MemoryAuditLog::with_events(events),
        })
    }

    fn append(file: &mut File, event: &AuditEvent) -> CoreResult<()> {
        let mut line = serde_json::to_string(event).map_err(CoreError::Serialization)?;
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(CoreError::AuditFile)?;
        file.sync_data().map_err(CoreError::AuditFile)
    }

    fn lock_file(&self) -> std::sync::MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fold recorded lines by id, the later line winning.
fn replay(contents: &str) -> CoreResult<Vec<AuditEvent>> {
    let mut events: Vec<AuditEvent> = Vec::new();
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let event: AuditEvent = serde_json::from_str(line).map_err(CoreError::Deserialization)?;
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event,
            None => events.push(event),
        }
    }
    Ok(events)
}

impl AuditLog for FileAuditLog {
    fn start(&self, actor: Option<&Actor>, action: &AuditAction) -> CoreResult<EntityId> {
        let mut file = self.lock_file();
        let id = self.index.start(actor, action)?;
        if let Some(event) = self.index.event(&id) {
            Self::append(&mut file, &event)?;
        }
        Ok(id)
    }

    fn complete(
        &self,
        id: &EntityId,
        outcome: AuditOutcome,
        detail: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        let mut file = self.lock_file();
        self.index.complete(id, outcome, detail)?;
        if let Some(event) = self.index.event(id) {
            Self::append(&mut file, &event)?;
        }
        Ok(())
    }

    fn completed_events(&self, release_key: &ReleaseKey) -> CoreResult<Vec<AuditEvent>> {
        self.index.completed_events(release_key)
    }

    fn events(&self) -> CoreResult<Vec<AuditEvent>> {
        self.index.events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(key: &ReleaseKey) -> AuditAction {
        AuditAction::new(AuditCategory::Update, "select specimens", Some(key))
    }

    #[test]
    fn in_progress_events_are_hidden_from_queries() {
        let log = MemoryAuditLog::new();
        let key = ReleaseKey::new("R1").unwrap();
        let open = log.start(None, &action(&key)).unwrap();
        let done = log.start(None, &action(&key)).unwrap();
        log.complete(&done, AuditOutcome::Success, None).unwrap();

        let completed = log.completed_events(&key).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);
        assert!(log.events().unwrap().iter().any(|e| e.id == open));
    }

    #[test]
    fn file_log_survives_reopening() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let key = ReleaseKey::new("R1").unwrap();

        let (done, open) = {
            let log = FileAuditLog::open(&path).unwrap();
            let done = log.start(None, &action(&key)).unwrap();
            let open = log.start(None, &action(&key)).unwrap();
            log.complete(&done, AuditOutcome::Success, Some(serde_json::json!({ "added": 1 })))
                .unwrap();
            (done, open)
        };

        let reopened = FileAuditLog::open(&path).unwrap();
        let completed = reopened.completed_events(&key).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);
        assert_eq!(completed[0].detail, Some(serde_json::json!({ "added": 1 })));
        assert_eq!(reopened.events().unwrap().len(), 2);

        reopened.complete(&open, AuditOutcome::Failure, None).unwrap();
        assert!(reopened.complete(&done, AuditOutcome::Failure, None).is_err());
        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 4);
    }

    #[test]
    fn torn_final_line_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let key = ReleaseKey::new("R1").unwrap();
        {
            let log = FileAuditLog::open(&path).unwrap();
            let id = log.start(None, &action(&key)).unwrap();
            log.complete(&id, AuditOutcome::Success, None).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"0000").unwrap();

        let reopened = FileAuditLog::open(&path).expect("torn tail should not block opening");
        assert_eq!(reopened.completed_events(&key).unwrap().len(), 1);

        let id = reopened.start(None, &action(&key)).unwrap();
        reopened.complete(&id, AuditOutcome::Success, None).unwrap();
        drop(reopened);
        let again = FileAuditLog::open(&path).expect("appends after a torn line stay readable");
        assert_eq!(again.completed_events(&key).unwrap().len(), 2);
    }

    #[test]
    fn completing_twice_is_rejected() {
        let log = MemoryAuditLog::new();
        let key = ReleaseKey::new("R1").unwrap();
        let id = log.start(None, &action(&key)).unwrap();
        log.complete(&id, AuditOutcome::Failure, None).unwrap();
        assert!(log.complete(&id, AuditOutcome::Success, None).is_err());
    }

    #[test]
    fn completed_events_are_newest_first() {
        let log = MemoryAuditLog::new();
        let key = ReleaseKey::new("R1").unwrap();
        let first = log.start(None, &action(&key)).unwrap();
        let second = log.start(None, &action(&key)).unwrap();
        log.complete(&first, AuditOutcome::Success, None).unwrap();
        log.complete(&second, AuditOutcome::Success, None).unwrap();

        let ids: Vec<EntityId> = log
            .completed_events(&key)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }
}
