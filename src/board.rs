//! Board facade: cached reads plus optimistic status moves.

use crate::api::TaskApi;
use crate::logging;
use crate::store::TaskStore;
use crate::task::{Task, TaskDraft, TaskStatus};
use anyhow::{Context, Result};
use std::sync::Arc;

/// What a move request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Status changed and the cache was reconciled against the server.
    Moved,
    /// The task already had the requested status; nothing was sent.
    Unchanged,
    /// No usable drop target or no such task in the cache; nothing was
    /// mutated and nothing was sent.
    Abandoned,
}

/// The UI layer's entry point: holds the shared store and the API seam.
/// Concurrent moves of different tasks are independent; each captures its
/// own snapshot at call time.
pub struct Board {
    store: Arc<TaskStore>,
    api: Arc<dyn TaskApi>,
}

impl Board {
    pub fn new(store: Arc<TaskStore>, api: Arc<dyn TaskApi>) -> Self {
        Self { store, api }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Fetch the authoritative task list and replace the cache snapshot.
    pub async fn refresh(&self) -> Result<Arc<Vec<Task>>> {
        let tasks = self.api.list_tasks().await.context("refresh task list")?;
        self.store.set(tasks);
        Ok(self.store.get().unwrap_or_default())
    }

    /// Resolve a drag-and-drop target by column name. A missing target or
    /// a name outside the workflow set abandons the move silently.
    pub async fn move_task_to(&self, task_id: &str, target: Option<&str>) -> Result<MoveOutcome> {
        let Some(name) = target else {
            return Ok(MoveOutcome::Abandoned);
        };
        let Ok(status) = name.parse::<TaskStatus>() else {
            logging::debug(&format!("drop target {} is not a status column", name));
            return Ok(MoveOutcome::Abandoned);
        };
        self.move_task(task_id, status).await
    }

    /// Optimistically move a task to a new workflow status.
    ///
    /// The cache is patched before the request goes out so the UI updates
    /// immediately. On success the snapshot is reconciled by refetch; on
    /// failure it is restored verbatim and the error surfaces to the
    /// caller.
    pub async fn move_task(&self, task_id: &str, new_status: TaskStatus) -> Result<MoveOutcome> {
        if let Some(current) = self.store.status_of(task_id) {
            if current == new_status {
                return Ok(MoveOutcome::Unchanged);
            }
        }

        // snapshot, then patch, both before the first await: no reader
        // ever sees a half-written state
        let previous = self.store.get();
        if !self.store.patch_status(task_id, new_status) {
            return Ok(MoveOutcome::Abandoned);
        }

        match self.api.change_status(task_id, new_status).await {
            Ok(()) => {
                self.store.invalidate();
                if let Err(err) = self.refresh().await {
                    // the move itself stuck; the stale flag keeps the
                    // snapshot marked for a later refetch
                    logging::warn(&format!(
                        "task {} moved but refetch failed: {}",
                        task_id, err
                    ));
                }
                Ok(MoveOutcome::Moved)
            }
            Err(err) => {
                self.store.restore(previous);
                Err(err).with_context(|| format!("change status of task {}", task_id))
            }
        }
    }

    /// Create a task, then mark the cache for refetch.
    pub async fn create_task(&self, draft: &TaskDraft) -> Result<()> {
        draft.validate()?;
        self.api.create_task(draft).await?;
        self.store.invalidate();
        Ok(())
    }

    /// Edit a task, then mark the cache for refetch.
    pub async fn edit_task(&self, task_id: &str, draft: &TaskDraft) -> Result<()> {
        draft.validate()?;
        self.api.edit_task(task_id, draft).await?;
        self.store.invalidate();
        Ok(())
    }

    /// Cached tasks in one column.
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.store
            .get()
            .map(|tasks| {
                tasks
                    .iter()
                    .filter(|t| t.status == status)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
