//! File-hierarchy session store
//!
//! Layout under the store root:
//!   sessions/{id}.json    - versioned session record
//!   validation/{id}.json  - sha256 digest of the last committed value
//!
//! Writes land in a temp file and are renamed into place. A mutex per
//! session-id serialises save and rollback; reads take no lock and re-read
//! on a digest mismatch to step over an in-flight commit before reporting
//! corruption.

use delver_core::{
    not_found_error, session_error, AggregatedState, DelverError, DelverResult, ErrorContext,
    IterationRecord, Session, SessionStatus, SessionSummary,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const RECORD_VERSION: u32 = 1;
const LOAD_ATTEMPTS: usize = 3;

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    version: u32,
    session: Session,
}

#[derive(Serialize, Deserialize)]
struct ValidationRecord {
    digest: String,
}

pub struct SessionStore {
    sessions_dir: PathBuf,
    validation_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Open (creating directories as needed) a store rooted at `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> DelverResult<Self> {
        let root = root.as_ref().to_path_buf();
        let sessions_dir = root.join("sessions");
        let validation_dir = root.join("validation");

        for dir in [&sessions_dir, &validation_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| DelverError::Storage {
                message: format!("Failed to create store directory {}: {}", dir.display(), e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("session_store")
                    .with_operation("open")
                    .with_suggestion("Check permissions on the sessions directory"),
            })?;
        }

        info!(root = %root.display(), "Session store initialized");
        Ok(Self {
            sessions_dir,
            validation_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", session_id))
    }

    fn validation_path(&self, session_id: &str) -> PathBuf {
        self.validation_dir.join(format!("{}.json", session_id))
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn storage_error(operation: &str, err: std::io::Error) -> DelverError {
        DelverError::Storage {
            message: format!("{} failed: {}", operation, err),
            source: Some(Box::new(err)),
            context: ErrorContext::new("session_store").with_operation(operation),
        }
    }

    /// Content digest of a session's canonical JSON form
    pub fn digest_of(session: &Session) -> DelverResult<String> {
        let bytes = serde_json::to_vec(session)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> DelverResult<()> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::storage_error("write", e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Self::storage_error("rename", e))?;
        Ok(())
    }

    async fn save_unlocked(&self, session: &Session) -> DelverResult<()> {
        let record = StoredRecord {
            version: RECORD_VERSION,
            session: session.clone(),
        };
        let record_bytes = serde_json::to_vec_pretty(&record)?;
        let digest = Self::digest_of(session)?;
        let validation_bytes = serde_json::to_vec(&ValidationRecord { digest })?;

        Self::write_atomic(&self.session_path(&session.session_id), &record_bytes).await?;
        Self::write_atomic(&self.validation_path(&session.session_id), &validation_bytes).await?;

        debug!(
            session_id = session.session_id.as_str(),
            iteration = session.aggregated.last_completed_iteration,
            status = %session.status,
            "Session saved"
        );
        Ok(())
    }

    /// Upsert a session together with its validation digest.
    pub async fn save(&self, session: &Session) -> DelverResult<()> {
        let lock = self.lock_for(&session.session_id).await;
        let _guard = lock.lock().await;
        self.save_unlocked(session).await
    }

    async fn read_record(&self, session_id: &str) -> DelverResult<Session> {
        let path = self.session_path(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found_error!(format!("session {}", session_id), "session_store"))
            }
            Err(e) => return Err(Self::storage_error("read", e)),
        };

        let record: StoredRecord = serde_json::from_slice(&bytes).map_err(|e| {
            DelverError::Storage {
                message: format!("Unreadable session record {}: {}", session_id, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("session_store").with_operation("load"),
            }
        })?;

        if record.version != RECORD_VERSION {
            return Err(DelverError::Storage {
                message: format!(
                    "Unrecognised session record version {} for {}",
                    record.version, session_id
                ),
                source: None,
                context: ErrorContext::new("session_store")
                    .with_operation("load")
                    .with_suggestion("Upgrade delver or migrate the record"),
            });
        }

        Ok(record.session)
    }

    async fn read_validation(&self, session_id: &str) -> DelverResult<Option<String>> {
        match tokio::fs::read(&self.validation_path(session_id)).await {
            Ok(bytes) => {
                let record: ValidationRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record.digest))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::storage_error("read_validation", e)),
        }
    }

    /// Load the full record; a persistent digest mismatch reports the
    /// session as corrupt.
    pub async fn load(&self, session_id: &str) -> DelverResult<Session> {
        let mut last_mismatch = None;
        for attempt in 0..LOAD_ATTEMPTS {
            let session = self.read_record(session_id).await?;
            let stored = self.read_validation(session_id).await?;
            let computed = Self::digest_of(&session)?;

            match stored {
                Some(stored) if stored == computed => return Ok(session),
                stored => {
                    // A concurrent commit may have renamed one file between
                    // our two reads; re-read before declaring corruption.
                    last_mismatch = Some(stored);
                    if attempt + 1 < LOAD_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }

        warn!(
            session_id = session_id,
            stored = ?last_mismatch,
            "Validation digest mismatch"
        );
        Err(DelverError::Validation {
            message: format!("Session {} failed digest validation", session_id),
            context: ErrorContext::new("session_store")
                .with_operation("load")
                .with_suggestion("The stored record is corrupt; delete or restore it"),
        })
    }

    /// Summaries of stored sessions, optionally filtered by user id,
    /// ordered by start time descending.
    pub async fn list(&self, user_id: Option<&str>) -> DelverResult<Vec<SessionSummary>> {
        let mut entries = tokio::fs::read_dir(&self.sessions_dir)
            .await
            .map_err(|e| Self::storage_error("list", e))?;

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::storage_error("list", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read_record(stem).await {
                Ok(session) => {
                    if let Some(user_id) = user_id {
                        if session.user_id.as_deref() != Some(user_id) {
                            continue;
                        }
                    }
                    summaries.push(SessionSummary::from(&session));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session record");
                }
            }
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    /// Remove a session and its validation record. Returns whether a
    /// session record was removed.
    pub async fn delete(&self, session_id: &str) -> DelverResult<bool> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let existed = match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(Self::storage_error("delete", e)),
        };
        let _ = tokio::fs::remove_file(self.validation_path(session_id)).await;

        info!(session_id = session_id, existed = existed, "Session deleted");
        Ok(existed)
    }

    /// Load a session for resumption; completed and errored sessions
    /// cannot be resumed.
    pub async fn resume(&self, session_id: &str) -> DelverResult<Session> {
        let session = self.load(session_id).await?;
        if !session.status.is_resumable() {
            return Err(session_error!(
                format!(
                    "Session {} has status {} and cannot be resumed",
                    session_id, session.status
                ),
                "session_store"
            ));
        }
        Ok(session)
    }

    /// Projection over the iterations field
    pub async fn history(&self, session_id: &str) -> DelverResult<Vec<IterationRecord>> {
        Ok(self.load(session_id).await?.iterations)
    }

    /// Truncate the iteration list to iterations <= `iteration`, recompute
    /// the aggregated state, clear the final report and end time, set the
    /// status to interrupted, persist, and return the resulting session.
    pub async fn rollback(&self, session_id: &str, iteration: u32) -> DelverResult<Session> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        let last = session.aggregated.last_completed_iteration;
        if iteration == 0 || iteration > last {
            return Err(session_error!(
                format!(
                    "Iteration {} is outside the session's range 1..={}",
                    iteration, last
                ),
                "session_store"
            ));
        }

        session.iterations.retain(|r| r.iteration <= iteration);
        session.aggregated = AggregatedState::rebuild(&session.iterations);
        session.final_report = None;
        session.error_message = None;
        session.ended_at = None;
        session.status = SessionStatus::Interrupted;

        self.save_unlocked(&session).await?;
        info!(
            session_id = session_id,
            iteration = iteration,
            "Session rolled back"
        );
        Ok(session)
    }
}
