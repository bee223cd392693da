pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::workflow::types::{ArticleRequest, Phase, RunId};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Summaries stored in log entries are capped at this many characters.
pub const SUMMARY_LIMIT: usize = 500;

/// One step invocation, as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub run_id: RunId,
    /// Per-run counter starting at 0; breaks ties between equal timestamps.
    pub sequence: u32,
    pub phase: Phase,
    pub iteration: u32,
    pub input_summary: String,
    pub output_summary: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl StepLogEntry {
    /// Whether the invocation this entry records ended in an error.
    pub fn is_error(&self) -> bool {
        self.metadata.get("outcome").and_then(|v| v.as_str()) == Some("error")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Completed => "completed",
        }
    }
}

/// The durable result record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub request: ArticleRequest,
    pub final_artifact: Option<String>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only audit sink, one entry per step invocation.
#[async_trait]
pub trait RunLogger: Send + Sync {
    /// Durably append an entry. Returns once the entry is persisted.
    async fn append(&self, entry: &StepLogEntry) -> Result<()>;

    /// All entries for a run, ordered by sequence.
    async fn entries(&self, run_id: RunId) -> Result<Vec<StepLogEntry>>;
}

/// Durable run records keyed by run id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist the request with a placeholder artifact.
    async fn create(&self, run_id: RunId, request: &ArticleRequest) -> Result<()>;

    /// Attach the final artifact to an existing record.
    async fn complete(&self, run_id: RunId, final_artifact: &str) -> Result<()>;

    async fn get(&self, run_id: RunId) -> Result<Option<RunRecord>>;
}

/// Truncate `text` to at most `max_chars` characters, marking the cut.
pub fn summarize(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
