//! Persisted session identity.
//!
//! A single JSON file holds the last session identifier and the moment
//! it was created. Load honors a 24-hour validity window; anything
//! older, missing, or unparseable reads as "none" and the caller falls
//! back to creating a fresh session. Single writer, overwrite-on-save.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AcpError, Result};

/// Validity window for a persisted session record.
const SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// On-disk shape: `{"sessionId": "...", "timestamp": 1712345678901}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    session_id: String,
    /// Wall-clock creation moment, milliseconds since the epoch.
    timestamp: i64,
}

/// File-backed store for the persisted session record.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Create a store over the given file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the persisted session identifier, if still valid.
    ///
    /// Returns `None` when the file is absent, unparseable, or older
    /// than 24 hours. Never errors — a broken record is the same as no
    /// record.
    #[must_use]
    pub fn load(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "session store: unreadable record, ignoring");
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis() - record.timestamp;
        if age_ms >= SESSION_TTL_MS {
            debug!(
                session_id = record.session_id.as_str(),
                age_ms, "session store: record expired"
            );
            return None;
        }
        Some(record.session_id)
    }

    /// Persist `session_id` with the current moment, overwriting any
    /// previous record.
    ///
    /// # Errors
    ///
    /// Returns [`AcpError::Io`] when the directory cannot be created or
    /// the file cannot be written.
    pub fn save(&self, session_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AcpError::Io(format!("failed to create state dir: {err}")))?;
        }
        let record = SessionRecord {
            session_id: session_id.to_owned(),
            timestamp: Utc::now().timestamp_millis(),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|err| AcpError::Io(format!("failed to serialize session record: {err}")))?;
        fs::write(&self.path, raw)
            .map_err(|err| AcpError::Io(format!("failed to write session record: {err}")))
    }

    /// Delete the persisted record. Missing files are not an error.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "session store: record cleared"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "session store: failed to clear record");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
