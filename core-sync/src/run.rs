//! Sync Run State Machine
//!
//! One `SyncRun` per sync attempt. Runs move `in_progress` to exactly one of
//! `completed`, `error`, or `cancelled` and are never reopened. Counts and
//! the per-file error log accumulate while the run is in progress and are
//! persisted after every processed file so pollers observe monotonically
//! non-decreasing progress.

use crate::mapping::CaseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SyncStatus::InProgress),
            "completed" => Some(SyncStatus::Completed),
            "error" => Some(SyncStatus::Error),
            "cancelled" => Some(SyncStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::InProgress)
    }

    /// Valid transitions: in_progress may move to any terminal state;
    /// terminal states never change.
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        matches!(self, SyncStatus::InProgress) && next.is_terminal()
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One per-file failure recorded against a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub file_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Accumulated counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub files_found: u32,
    pub files_new: u32,
    /// Known remote file whose content hash changed; ingested as a new
    /// document row
    pub files_updated: u32,
    pub files_skipped: u32,
    pub files_error: u32,
    pub files_queued: u32,
}

/// One execution of the sync process for a case.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub case_id: CaseId,
    pub status: SyncStatus,
    pub counts: SyncCounts,
    pub errors: Vec<FileError>,
    pub files_processed: u32,
    pub total_files: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(case_id: CaseId) -> Self {
        Self {
            id: SyncRunId::new(),
            case_id,
            status: SyncStatus::InProgress,
            counts: SyncCounts::default(),
            errors: Vec::new(),
            files_processed: 0,
            total_files: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Progress percentage in 0..=100. Only a terminal run reports 100, so a
    /// poller seeing 100 knows the run is over.
    pub fn progress_percent(&self) -> u8 {
        if self.status.is_terminal() {
            return 100;
        }
        if self.total_files == 0 {
            return 0;
        }
        let pct = (self.files_processed as u64 * 100 / self.total_files as u64) as u8;
        pct.min(99)
    }

    /// Wall-clock duration, once finalized.
    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_seconds())
    }

    pub fn record_file_error(&mut self, file_name: impl Into<String>, message: impl Into<String>) {
        self.counts.files_error += 1;
        self.errors.push(FileError {
            file_name: file_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    fn finalize(&mut self, status: SyncStatus) {
        debug_assert!(self.status.can_transition_to(status));
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.finalize(SyncStatus::Completed);
    }

    /// Terminal failure with a single top-level error entry.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.errors.push(FileError {
            file_name: "sync".to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.finalize(SyncStatus::Error);
    }

    pub fn cancel(&mut self) {
        self.finalize(SyncStatus::Cancelled);
    }
}
