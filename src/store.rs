//! Persisted session store
//!
//! A single JSON file holding finalized sessions, newest first. The file may be
//! a bare array or an object with a `sessions` array; writes always produce a
//! bare array.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborators::SessionSink;
use crate::error::EngineError;
use crate::sync::{lenient_category, null_as_default, SyncRequest, SyncSession, SyncTabLog};
use crate::types::{Category, HistoricalSessionSummary, Session};

/// One visit record as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTabLog {
    #[serde(default, deserialize_with = "null_as_default")]
    pub domain: String,
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: Category,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_important: bool,
    pub timestamp: DateTime<Utc>,
}

/// One session record as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub effective_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub focus_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub burnout_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject_label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tab_logs: Vec<StoredTabLog>,
}

impl StoredSession {
    pub fn summary(&self) -> HistoricalSessionSummary {
        HistoricalSessionSummary {
            start_time: self.start_time,
            total_time: self.total_time,
            effective_time: self.effective_time,
            focus_score: self.focus_score,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoreFile {
    List(Vec<StoredSession>),
    Wrapped {
        #[serde(default)]
        sessions: Vec<StoredSession>,
    },
}

/// JSON-file session store
///
/// Clones share a write lock, so concurrent adds from one process never lose
/// each other's records.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store at the location named by the environment, or the default path
    pub fn from_env() -> Self {
        Self::new(crate::config::sessions_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored sessions, newest first
    ///
    /// A missing file is an empty store; any other read or parse failure is an
    /// error.
    pub fn list(&self) -> Result<Vec<StoredSession>, EngineError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::Io(e)),
        };
        let mut sessions = match serde_json::from_str::<StoreFile>(&raw) {
            Ok(StoreFile::List(list)) => list,
            Ok(StoreFile::Wrapped { sessions }) => sessions,
            Err(e) => {
                return Err(EngineError::CorruptStore(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    /// History summaries for burnout scoring
    pub fn summaries(&self) -> Result<Vec<HistoricalSessionSummary>, EngineError> {
        Ok(self.list()?.iter().map(StoredSession::summary).collect())
    }

    /// Store a session record in front of existing ones and return its id
    ///
    /// Missing numeric and label fields default to zero and empty; tab logs
    /// without a timestamp are stamped now.
    pub fn add_session(
        &self,
        session: &SyncSession,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        tab_logs: &[SyncTabLog],
    ) -> Result<Uuid, EngineError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut sessions = self.list()?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        let record = StoredSession {
            id: id.to_string(),
            start_time,
            end_time: Some(end_time),
            total_time: session.total_time,
            effective_time: session.effective_time,
            focus_score: session.focus_score,
            burnout_score: session.burnout_score,
            subject_label: session.subject_label.clone(),
            tab_logs: tab_logs
                .iter()
                .map(|log| StoredTabLog {
                    domain: log.domain.clone(),
                    category: log.category,
                    time_spent: log.time_spent,
                    is_important: log.is_important,
                    timestamp: log.timestamp.unwrap_or(now),
                })
                .collect(),
        };
        sessions.insert(0, record);
        self.write(&sessions)?;

        debug!(%id, path = %self.path.display(), "stored session");
        Ok(id)
    }

    /// Validate and store a sync request, as the sync endpoint does
    pub fn ingest(&self, request: &SyncRequest) -> Result<Uuid, EngineError> {
        let (session, start, end) = request.validate()?;
        self.add_session(session, start, end, &request.tab_logs)
    }

    fn write(&self, sessions: &[StoredSession]) -> Result<(), EngineError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(sessions)?;
        // Readers never see a half-written file
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl SessionSink for JsonSessionStore {
    fn name(&self) -> &str {
        "store"
    }

    /// Inside a tokio runtime the file write runs on the blocking pool;
    /// otherwise it happens before returning
    fn deliver(&self, session: &Session) -> Result<(), EngineError> {
        let request = SyncRequest::from_session(session, None);
        request.validate()?;

        let Ok(runtime) = Handle::try_current() else {
            return self.ingest(&request).map(|_| ());
        };
        let store = self.clone();
        let local_id = session.id;
        runtime.spawn_blocking(move || {
            if let Err(e) = store.ingest(&request) {
                warn!(%local_id, error = %e, "failed to store session");
            }
        });
        Ok(())
    }
}
