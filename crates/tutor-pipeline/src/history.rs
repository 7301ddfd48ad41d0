//! History of solved problems.
//!
//! The orchestrator records a solved synchronous run through a
//! [`HistoryStore`] when the caller supplies an [`Identity`]. Anonymous runs
//! and streaming runs are never recorded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TutorError};
use crate::records::{AnalysisRecord, SolutionRecord};

/// The caller on whose behalf a run executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable identifier of the caller.
    pub actor_id: String,
    /// Display name of the caller.
    pub actor_name: String,
}

impl Identity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(actor_id: impl Into<String>, actor_name: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_name: actor_name.into(),
        }
    }
}

/// A solved run, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHistoryRecord {
    /// Identifier of the caller.
    pub actor_id: String,
    /// Display name of the caller.
    pub actor_name: String,
    /// The problem text that was solved.
    pub question_text: String,
    /// Classification of the problem.
    pub analysis: AnalysisRecord,
    /// The worked solution.
    pub solution: SolutionRecord,
}

/// A stored history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Store-assigned identifier.
    pub id: String,
    /// Identifier of the caller.
    pub actor_id: String,
    /// Display name of the caller.
    pub actor_name: String,
    /// The problem text that was solved.
    pub question_text: String,
    /// Classification of the problem.
    pub analysis: AnalysisRecord,
    /// The worked solution.
    pub solution: SolutionRecord,
    /// When the record was stored.
    pub created_at: DateTime<Utc>,
}

/// Persistence for solved runs.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stores a record and returns it with its assigned id and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::History`] if the record could not be stored.
    async fn create(&self, record: NewHistoryRecord) -> Result<HistoryRecord>;
}

/// Process-local [`HistoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records of one actor, newest first.
    pub async fn list_for_actor(&self, actor_id: &str) -> Vec<HistoryRecord> {
        let records = self.records.lock().await;
        let mut matching: Vec<HistoryRecord> = records
            .iter()
            .rev()
            .filter(|r| r.actor_id == actor_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns `true` if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn create(&self, record: NewHistoryRecord) -> Result<HistoryRecord> {
        if record.actor_id.trim().is_empty() {
            return Err(TutorError::history("actor id must not be empty"));
        }

        let stored = HistoryRecord {
            id: Uuid::new_v4().to_string(),
            actor_id: record.actor_id,
            actor_name: record.actor_name,
            question_text: record.question_text,
            analysis: record.analysis,
            solution: record.solution,
            created_at: Utc::now(),
        };
        debug!(id = %stored.id, actor_id = %stored.actor_id, "History record created");

        self.records.lock().await.push(stored.clone());
        Ok(stored)
    }
}
