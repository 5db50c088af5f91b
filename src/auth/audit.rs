//! Attempt Auditor
//! Mission: Bounded, append-only log of authentication attempts

use crate::auth::models::AuditEntry;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::VecDeque;

/// Only the most recent attempts are retained.
pub const MAX_AUDIT_ENTRIES: usize = 1000;

pub trait AuditSink: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<()>;
    /// Newest first.
    fn read_recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// In-process ring of the latest attempts.
pub struct MemoryAuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::with_capacity(MAX_AUDIT_ENTRIES)
    }
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_AUDIT_ENTRIES))),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: AuditEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }

    fn read_recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Audit log persisted next to the user table.
pub struct SqliteAuditLog {
    db_path: String,
    capacity: usize,
}

impl SqliteAuditLog {
    pub fn new(db_path: &str) -> Result<Self> {
        let log = Self {
            db_path: db_path.to_string(),
            capacity: MAX_AUDIT_ENTRIES,
        };
        log.init_db()?;
        Ok(log)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open audit database at {}", self.db_path))
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                username TEXT NOT NULL,
                success INTEGER NOT NULL,
                reason TEXT NOT NULL,
                ip TEXT
            )",
            [],
        )?;
        Ok(())
    }
}

impl AuditSink for SqliteAuditLog {
    fn append(&self, entry: AuditEntry) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO auth_logs (timestamp, username, success, reason, ip)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.timestamp,
                entry.username,
                entry.success,
                entry.reason,
                entry.ip
            ],
        )
        .context("Failed to append audit entry")?;

        tx.execute(
            "DELETE FROM auth_logs WHERE id NOT IN
                (SELECT id FROM auth_logs ORDER BY id DESC LIMIT ?1)",
            params![self.capacity as i64],
        )
        .context("Failed to truncate audit log")?;

        tx.commit()?;
        Ok(())
    }

    fn read_recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, username, success, reason, ip
             FROM auth_logs ORDER BY id DESC LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AuditEntry {
                    timestamp: row.get(0)?,
                    username: row.get(1)?,
                    success: row.get(2)?,
                    reason: row.get(3)?,
                    ip: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}
