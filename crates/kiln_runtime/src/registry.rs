//! Execution registry.
//!
//! The single shared mutable store of execution records. All access goes
//! through one `RwLock`; terminal records are never overwritten.

use std::collections::HashMap;
use std::time::Duration;

use kiln_core::{
    BackendOutcome, Execution, ExecutionId, Language, SubmitError, SubmitResult, Timestamp,
};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Entry {
    record: Execution,
    watch: watch::Sender<Execution>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Result of applying a backend outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalize {
    /// The record moved to its terminal status
    Finalized(Execution),
    /// The record was already terminal and kept as is
    AlreadyTerminal(Execution),
    /// The record was evicted meanwhile
    Missing,
}

/// Lock-protected map of execution records
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<ExecutionId, Entry>>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a Running record under a fresh id.
    ///
    /// On a collision with an existing id the id is re-derived with a salt.
    pub async fn insert_running(
        &self,
        language: Language,
        code: &str,
        at: Timestamp,
    ) -> (ExecutionId, CancellationToken) {
        let mut entries = self.entries.write().await;
        let mut salt = 0;
        let id = loop {
            let id = ExecutionId::derive_salted(language, code, at, salt);
            if !entries.contains_key(&id) {
                break id;
            }
            salt += 1;
        };

        let record = Execution::running(id.clone(), language, at);
        let (watch, _) = watch::channel(record.clone());
        let cancel = CancellationToken::new();
        entries.insert(
            id.clone(),
            Entry {
                record,
                watch,
                cancel: cancel.clone(),
                task: None,
            },
        );
        (id, cancel)
    }

    /// Remember the task driving an execution.
    ///
    /// A task that already finalized its record is not kept.
    pub async fn attach_task(&self, id: &ExecutionId, task: JoinHandle<()>) {
        if let Some(entry) = self.entries.write().await.get_mut(id) {
            if !entry.record.is_terminal() {
                entry.task = Some(task);
            }
        }
    }

    /// Snapshot of one record
    pub async fn get(&self, id: &ExecutionId) -> Option<Execution> {
        self.entries.read().await.get(id).map(|e| e.record.clone())
    }

    /// Receiver observing a record's updates
    pub async fn watch(&self, id: &ExecutionId) -> Option<watch::Receiver<Execution>> {
        self.entries.read().await.get(id).map(|e| e.watch.subscribe())
    }

    /// Apply a backend outcome; the first terminal write wins
    pub async fn finalize(&self, id: &ExecutionId, outcome: BackendOutcome, at: Timestamp) -> Finalize {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return Finalize::Missing;
        };
        entry.task = None;
        if entry.record.finish(outcome, at) {
            Finalize::Finalized(entry.record.clone())
        } else {
            Finalize::AlreadyTerminal(entry.record.clone())
        }
    }

    /// Push the current record to its watchers
    pub async fn notify(&self, id: &ExecutionId) {
        if let Some(entry) = self.entries.read().await.get(id) {
            entry.watch.send_replace(entry.record.clone());
        }
    }

    /// Mark a Running record Cancelled and signal its backend.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids
    pub async fn cancel(&self, id: &ExecutionId, at: Timestamp) -> SubmitResult<bool> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| SubmitError::NotFound {
            id: id.to_string(),
        })?;
        if !entry.record.cancel(at) {
            return Ok(false);
        }
        entry.cancel.cancel();
        entry.watch.send_replace(entry.record.clone());
        Ok(true)
    }

    /// Snapshots, newest first
    pub async fn list(&self) -> Vec<Execution> {
        let mut records: Vec<Execution> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Remove terminal records older than `max_age`; Running records stay
    pub async fn evict(&self, max_age: Duration, now: Timestamp) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !(e.record.is_terminal() && e.record.age(now) > max_age));
        before - entries.len()
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Records still Running
    pub async fn running(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.record.is_terminal())
            .count()
    }

    /// Cancel every Running record and abort the tasks driving them.
    ///
    /// Returns the ids that moved to Cancelled.
    pub async fn abort_all(&self, at: Timestamp) -> Vec<ExecutionId> {
        let mut cancelled = Vec::new();
        for (id, entry) in self.entries.write().await.iter_mut() {
            entry.cancel.cancel();
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            if entry.record.cancel(at) {
                entry.watch.send_replace(entry.record.clone());
                cancelled.push(id.clone());
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{ExecutionStatus, FailureKind};

    #[tokio::test]
    async fn test_collision_is_resalted() {
        let registry = Registry::new();
        let at = Timestamp::new(100, 5);
        let (a, _) = registry.insert_running(Language::Python, "print(1)", at).await;
        let (b, _) = registry.insert_running(Language::Python, "print(1)", at).await;
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_first_terminal_write_wins() {
        let registry = Registry::new();
        let (id, token) = registry
            .insert_running(Language::Wat, "(module)", Timestamp::new(100, 0))
            .await;

        assert!(registry.cancel(&id, Timestamp::new(101, 0)).await.unwrap());
        assert!(token.is_cancelled());
        assert!(!registry.cancel(&id, Timestamp::new(102, 0)).await.unwrap());

        let late = BackendOutcome::completed("late".to_string(), 0, 0);
        let result = registry.finalize(&id, late, Timestamp::new(103, 0)).await;
        let Finalize::AlreadyTerminal(record) = result else {
            panic!("expected the cancelled record to stay terminal");
        };
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        assert_eq!(record.error_kind, Some(FailureKind::Cancelled));
        assert!(record.output.is_empty());
    }

    #[tokio::test]
    async fn test_finished_task_is_not_attached() {
        let registry = Registry::new();
        let (id, _) = registry.insert_running(Language::Go, "x", Timestamp::now()).await;
        let outcome = BackendOutcome::completed(String::new(), 0, 0);
        registry.finalize(&id, outcome, Timestamp::now()).await;

        registry.attach_task(&id, tokio::spawn(async {})).await;
        assert!(registry.entries.read().await[&id].task.is_none());

        let (running, _) = registry.insert_running(Language::Go, "y", Timestamp::now()).await;
        registry.attach_task(&running, tokio::spawn(async {})).await;
        assert!(registry.entries.read().await[&running].task.is_some());
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_found() {
        let registry = Registry::new();
        let err = registry
            .cancel(&ExecutionId::from("wat_missing"), Timestamp::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_evict_keeps_running_and_young() {
        let registry = Registry::new();
        let (old, _) = registry.insert_running(Language::Bash, "a", Timestamp::new(100, 0)).await;
        let (young, _) = registry.insert_running(Language::Bash, "b", Timestamp::new(190, 0)).await;
        let (running, _) = registry.insert_running(Language::Bash, "c", Timestamp::new(50, 0)).await;
        for id in [&old, &young] {
            let outcome = BackendOutcome::completed(String::new(), 0, 0);
            registry.finalize(id, outcome, Timestamp::new(195, 0)).await;
        }

        let evicted = registry.evict(Duration::from_secs(60), Timestamp::new(200, 0)).await;
        assert_eq!(evicted, 1);
        assert!(registry.get(&old).await.is_none());
        assert!(registry.get(&young).await.is_some());
        assert!(registry.get(&running).await.is_some());
        assert_eq!(registry.running().await, 1);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let registry = Registry::new();
        registry.insert_running(Language::Ruby, "1", Timestamp::new(1, 0)).await;
        registry.insert_running(Language::Ruby, "3", Timestamp::new(3, 0)).await;
        registry.insert_running(Language::Ruby, "2", Timestamp::new(2, 0)).await;
        let seconds: Vec<u64> = registry.list().await.iter().map(|e| e.timestamp.seconds).collect();
        assert_eq!(seconds, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_watchers_see_cancel() {
        let registry = Registry::new();
        let (id, _) = registry.insert_running(Language::C, "x", Timestamp::now()).await;
        let mut rx = registry.watch(&id).await.unwrap();
        registry.cancel(&id, Timestamp::now()).await.unwrap();
        let record = rx.wait_for(Execution::is_terminal).await.unwrap().clone();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }
}
