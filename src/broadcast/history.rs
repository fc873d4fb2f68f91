//! Persistent log of broadcast runs.
//!
//! A run is recorded as `running` before the first delivery and updated to
//! `completed` with its final tally. There is no resume: a process that dies
//! mid-run leaves the record `running`, and the next start marks it
//! `interrupted` so operators can decide whether to send it again.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::BroadcastTally;
use crate::directory::RecipientMode;
use crate::persist;

/// Errors that can occur while accessing the history file.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to access broadcast history: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse broadcast history: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown broadcast: #{0}")]
    UnknownBroadcast(u64),
}

/// Lifecycle state of a recorded broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Running,
    Completed,
    Interrupted,
}

/// One broadcast run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub id: u64,
    pub admin_id: i64,
    pub from_chat: i64,
    pub message_id: i32,
    pub mode: RecipientMode,
    pub status: BroadcastStatus,
    #[serde(default)]
    pub tally: BroadcastTally,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What is about to be broadcast, and by whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub admin_id: i64,
    pub from_chat: i64,
    pub message_id: i32,
    pub mode: RecipientMode,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    broadcasts: Vec<BroadcastRecord>,
}

/// Broadcast history saved to a JSON file.
#[derive(Debug)]
pub struct BroadcastHistory {
    path: PathBuf,
    records: Mutex<Vec<BroadcastRecord>>,
}

impl BroadcastHistory {
    /// Loads history from `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let file: HistoryFile = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            HistoryFile::default()
        };

        Ok(Self {
            path,
            records: Mutex::new(file.broadcasts),
        })
    }

    /// Records a broadcast as running and returns its id.
    pub async fn start(&self, request: BroadcastRequest, total: usize) -> Result<u64, HistoryError> {
        let mut records = self.records.lock().await;
        let id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;

        records.push(BroadcastRecord {
            id,
            admin_id: request.admin_id,
            from_chat: request.from_chat,
            message_id: request.message_id,
            mode: request.mode,
            status: BroadcastStatus::Running,
            tally: BroadcastTally {
                total,
                ..BroadcastTally::default()
            },
            started_at: Utc::now(),
            completed_at: None,
        });

        self.save(&records)?;
        Ok(id)
    }

    /// Stores the final tally of a broadcast and marks it completed.
    pub async fn complete(&self, id: u64, tally: BroadcastTally) -> Result<(), HistoryError> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(HistoryError::UnknownBroadcast(id))?;

        record.status = BroadcastStatus::Completed;
        record.tally = tally;
        record.completed_at = Some(Utc::now());

        self.save(&records)
    }

    /// Marks every broadcast still `running` as `interrupted`.
    ///
    /// Call once at startup, before any new broadcast begins.
    /// Returns the records that were marked.
    pub async fn mark_interrupted(&self) -> Result<Vec<BroadcastRecord>, HistoryError> {
        let mut records = self.records.lock().await;
        let mut marked = Vec::new();

        for record in records
            .iter_mut()
            .filter(|r| r.status == BroadcastStatus::Running)
        {
            record.status = BroadcastStatus::Interrupted;
            warn!(
                "Broadcast #{} (message {} from chat {}) was interrupted",
                record.id, record.message_id, record.from_chat
            );
            marked.push(record.clone());
        }

        if !marked.is_empty() {
            self.save(&records)?;
            info!("Marked {} broadcasts as interrupted", marked.len());
        }
        Ok(marked)
    }

    /// Returns up to `limit` most recent records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<BroadcastRecord> {
        self.records
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn save(&self, records: &[BroadcastRecord]) -> Result<(), HistoryError> {
        let file = HistoryFile {
            broadcasts: records.to_vec(),
        };
        persist::write_json_atomic(&self.path, &file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BroadcastRequest {
        BroadcastRequest {
            admin_id: 1,
            from_chat: 1,
            message_id: 10,
            mode: RecipientMode::All,
        }
    }

    #[tokio::test]
    async fn test_start_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let history = BroadcastHistory::load(dir.path().join("b.json")).unwrap();

        let id = history.start(request(), 5).await.unwrap();
        assert_eq!(id, 1);

        let tally = BroadcastTally {
            total: 5,
            processed: 5,
            delivered: 4,
            transient_failures: 0,
            unreachable: 1,
        };
        history.complete(id, tally).await.unwrap();

        let recent = history.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, BroadcastStatus::Completed);
        assert_eq!(recent[0].tally, tally);
        assert!(recent[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_unknown_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let history = BroadcastHistory::load(dir.path().join("b.json")).unwrap();

        let result = history.complete(42, BroadcastTally::default()).await;
        assert!(matches!(result, Err(HistoryError::UnknownBroadcast(42))));
    }

    #[tokio::test]
    async fn test_running_broadcast_is_interrupted_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.json");
        {
            let history = BroadcastHistory::load(&path).unwrap();
            let done = history.start(request(), 1).await.unwrap();
            history.complete(done, BroadcastTally::default()).await.unwrap();
            history.start(request(), 3).await.unwrap();
        }

        let history = BroadcastHistory::load(&path).unwrap();
        let marked = history.mark_interrupted().await.unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].id, 2);

        assert!(history.mark_interrupted().await.unwrap().is_empty());
        let recent = history.recent(1).await;
        assert_eq!(recent[0].status, BroadcastStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let history = BroadcastHistory::load(dir.path().join("b.json")).unwrap();
        for _ in 0..3 {
            history.start(request(), 0).await.unwrap();
        }

        let ids: Vec<u64> = history.recent(2).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }
}
