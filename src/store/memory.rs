use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{AppError, Result};
use crate::store::{ResultStore, RunLogger, RunRecord, RunStatus, StepLogEntry};
use crate::workflow::types::{ArticleRequest, RunId};

/// Everything stored for one run.
#[derive(Default)]
struct RunSlot {
    record: Option<RunRecord>,
    log: Vec<StepLogEntry>,
}

/// Process-local store. Used by tests and `storage.backend = "memory"`.
///
/// Each run has its own slot; the index lock is held only to find or insert
/// a slot, so writes for different runs never wait on each other.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<RunId, Arc<Mutex<RunSlot>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, run_id: RunId) -> Option<Arc<Mutex<RunSlot>>> {
        self.slots.read().await.get(&run_id).cloned()
    }

    async fn slot_or_insert(&self, run_id: RunId) -> Arc<Mutex<RunSlot>> {
        if let Some(slot) = self.slot(run_id).await {
            return slot;
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(run_id).or_default())
    }
}

#[async_trait]
impl RunLogger for MemoryStore {
    async fn append(&self, entry: &StepLogEntry) -> Result<()> {
        let slot = self.slot_or_insert(entry.run_id).await;
        slot.lock().await.log.push(entry.clone());
        Ok(())
    }

    async fn entries(&self, run_id: RunId) -> Result<Vec<StepLogEntry>> {
        let Some(slot) = self.slot(run_id).await else {
            return Ok(Vec::new());
        };
        let mut entries = slot.lock().await.log.clone();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create(&self, run_id: RunId, request: &ArticleRequest) -> Result<()> {
        let slot = self.slot_or_insert(run_id).await;
        let mut slot = slot.lock().await;
        if slot.record.is_some() {
            return Err(AppError::Storage(format!("Run {run_id} already exists")));
        }
        slot.record = Some(RunRecord {
            run_id,
            request: request.clone(),
            final_artifact: None,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        });
        Ok(())
    }

    async fn complete(&self, run_id: RunId, final_artifact: &str) -> Result<()> {
        let unknown = || AppError::Storage(format!("Unknown run {run_id}"));
        let slot = self.slot(run_id).await.ok_or_else(unknown)?;
        let mut slot = slot.lock().await;
        let record = slot.record.as_mut().ok_or_else(unknown)?;
        record.final_artifact = Some(final_artifact.to_string());
        record.status = RunStatus::Completed;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        match self.slot(run_id).await {
            Some(slot) => Ok(slot.lock().await.record.clone()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::Phase;

    fn request() -> ArticleRequest {
        ArticleRequest::new("Explain X", "X", Some(500), Some("casual".into())).unwrap()
    }

    fn entry(run_id: RunId, sequence: u32, phase: Phase) -> StepLogEntry {
        StepLogEntry {
            run_id,
            sequence,
            phase,
            iteration: 0,
            input_summary: "in".to_string(),
            output_summary: "out".to_string(),
            metadata: serde_json::json!({ "outcome": "ok" }),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_then_complete() {
        let store = MemoryStore::new();
        let run_id = RunId::new();

        store.create(run_id, &request()).await.unwrap();
        let pending = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(pending.status, RunStatus::Pending);
        assert!(pending.final_artifact.is_none());

        store.complete(run_id, "final text").await.unwrap();
        let done = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.final_artifact.as_deref(), Some("final text"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryStore::new();
        let run_id = RunId::new();
        store.create(run_id, &request()).await.unwrap();
        assert!(store.create(run_id, &request()).await.is_err());
    }

    #[tokio::test]
    async fn test_complete_unknown_run_fails() {
        let store = MemoryStore::new();
        assert!(store.complete(RunId::new(), "text").await.is_err());
    }

    #[tokio::test]
    async fn test_entries_scoped_by_run() {
        let store = MemoryStore::new();
        let a = RunId::new();
        let b = RunId::new();

        store.append(&entry(a, 1, Phase::Draft)).await.unwrap();
        store.append(&entry(b, 0, Phase::Research)).await.unwrap();
        store.append(&entry(a, 0, Phase::Research)).await.unwrap();

        let a_entries = store.entries(a).await.unwrap();
        assert_eq!(a_entries.len(), 2);
        assert_eq!(a_entries[0].phase, Phase::Research);
        assert_eq!(a_entries[1].phase, Phase::Draft);

        assert_eq!(store.entries(b).await.unwrap().len(), 1);
        assert!(store.entries(RunId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_held_run_does_not_block_others() {
        let store = MemoryStore::new();
        let busy = RunId::new();
        let other = RunId::new();
        store.create(busy, &request()).await.unwrap();

        // Hold one run's slot while a different run writes.
        let slot = store.slot(busy).await.unwrap();
        let _held = slot.lock().await;

        let write = async {
            store.create(other, &request()).await.unwrap();
            store.append(&entry(other, 0, Phase::Research)).await.unwrap();
            store.complete(other, "done").await.unwrap();
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), write)
            .await
            .expect("writes for another run should not wait");

        assert_eq!(store.entries(other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_log_before_create_keeps_run_unknown() {
        let store = MemoryStore::new();
        let run_id = RunId::new();
        store.append(&entry(run_id, 0, Phase::Research)).await.unwrap();

        assert!(store.get(run_id).await.unwrap().is_none());
        assert!(store.complete(run_id, "text").await.is_err());
        store.create(run_id, &request()).await.unwrap();
        assert_eq!(store.entries(run_id).await.unwrap().len(), 1);
    }
}
