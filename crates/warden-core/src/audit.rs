//! Append-only access audit log.
//!
//! The sink assigns timestamps; callers only supply name, status and
//! confidence. SQLite is the bundled backend.

use crate::policy::{AccessDecision, AccessStatus};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS access_logs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    person_name   TEXT NOT NULL,
    access_status TEXT NOT NULL,
    confidence    REAL NOT NULL,
    access_time   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_access_logs_time ON access_logs(access_time);
";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum AuditWriteError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AuditStoreError {
    #[error("failed to open audit log {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unparseable access_time {0:?}")]
    BadTimestamp(String),
}

/// One row to append.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub person_name: String,
    pub access_status: AccessStatus,
    pub confidence: f32,
}

impl AuditRecord {
    /// Only single-face match outcomes carry a name and confidence worth logging.
    pub fn from_decision(decision: &AccessDecision) -> Option<Self> {
        if !decision.status.is_match_outcome() {
            return None;
        }
        Some(Self {
            person_name: decision.name.clone()?,
            access_status: decision.status,
            confidence: decision.confidence?,
        })
    }
}

/// Destination for audit records.
pub trait AuditSink {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError>;
}

impl<S: AuditSink + ?Sized> AuditSink for Box<S> {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        (**self).append(record)
    }
}

/// A persisted row, as read back.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub person_name: String,
    /// Kept as text: other writers may share the table.
    pub access_status: String,
    pub confidence: f64,
    pub access_time: NaiveDateTime,
}

/// Attempt counts, as shown on a monitoring dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub total: u64,
    pub granted: u64,
    pub warning: u64,
    pub denied: u64,
}

/// SQLite-backed audit log (`access_logs` table).
pub struct SqliteAuditLog {
    conn: Connection,
}

impl SqliteAuditLog {
    /// Open or create the log at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AuditStoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| AuditStoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let log = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "audit log opened");
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self, AuditStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditStoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Newest entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, person_name, access_status, confidence, access_time
             FROM access_logs
             ORDER BY access_time DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, person_name, access_status, confidence, raw_time) = row?;
            let access_time = NaiveDateTime::parse_from_str(&raw_time, TIMESTAMP_FORMAT)
                .map_err(|_| AuditStoreError::BadTimestamp(raw_time.clone()))?;
            entries.push(AuditEntry {
                id,
                person_name,
                access_status,
                confidence,
                access_time,
            });
        }

        Ok(entries)
    }

    pub fn summary(&self) -> Result<AuditSummary, AuditStoreError> {
        let summary = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(access_status = 'GRANTED'), 0),
                    COALESCE(SUM(access_status = 'WARNING'), 0),
                    COALESCE(SUM(access_status = 'DENIED'), 0)
             FROM access_logs",
            [],
            |row| {
                Ok(AuditSummary {
                    total: row.get::<_, i64>(0)? as u64,
                    granted: row.get::<_, i64>(1)? as u64,
                    warning: row.get::<_, i64>(2)? as u64,
                    denied: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(summary)
    }
}

impl AuditSink for SqliteAuditLog {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        self.conn.execute(
            "INSERT INTO access_logs (person_name, access_status, confidence) VALUES (?1, ?2, ?3)",
            params![
                record.person_name,
                record.access_status.as_str(),
                record.confidence as f64
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: AccessStatus, confidence: f32) -> AuditRecord {
        AuditRecord {
            person_name: name.into(),
            access_status: status,
            confidence,
        }
    }

    #[test]
    fn test_from_decision_skips_frame_level_outcomes() {
        assert!(AuditRecord::from_decision(&AccessDecision::no_face()).is_none());
        assert!(AuditRecord::from_decision(&AccessDecision::multi_face(3)).is_none());
    }

    #[test]
    fn test_from_decision_match_outcome() {
        let decision = AccessDecision {
            status: AccessStatus::Denied,
            name: Some("Unknown".into()),
            confidence: Some(-0.2),
            faces: 1,
        };
        let rec = AuditRecord::from_decision(&decision).unwrap();
        assert_eq!(rec, record("Unknown", AccessStatus::Denied, -0.2));
    }

    #[test]
    fn test_append_and_recent_newest_first() {
        let mut log = SqliteAuditLog::open_in_memory().unwrap();
        log.append(&record("alice", AccessStatus::Granted, 0.8)).unwrap();
        log.append(&record("Uncertain", AccessStatus::WarningLowConfidence, 0.5))
            .unwrap();
        log.append(&record("Unknown", AccessStatus::Denied, 0.1)).unwrap();

        let entries = log.recent(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].person_name, "Unknown");
        assert_eq!(entries[0].access_status, "DENIED");
        assert_eq!(entries[1].access_status, "WARNING");
        assert!((entries[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_summary_counts() {
        let mut log = SqliteAuditLog::open_in_memory().unwrap();
        assert_eq!(log.summary().unwrap(), AuditSummary::default());

        log.append(&record("alice", AccessStatus::Granted, 0.8)).unwrap();
        log.append(&record("bob", AccessStatus::Granted, 0.7)).unwrap();
        log.append(&record("Unknown", AccessStatus::Denied, 0.2)).unwrap();
        log.append(&record("Uncertain", AccessStatus::WarningLowConfidence, 0.45))
            .unwrap();

        assert_eq!(
            log.summary().unwrap(),
            AuditSummary {
                total: 4,
                granted: 2,
                warning: 1,
                denied: 1,
            }
        );
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/access.db");
        let mut log = SqliteAuditLog::open(&path).unwrap();
        log.append(&record("alice", AccessStatus::Granted, 0.9)).unwrap();
        drop(log);

        let reopened = SqliteAuditLog::open(&path).unwrap();
        assert_eq!(reopened.summary().unwrap().total, 1);
    }
}
