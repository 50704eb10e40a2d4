use crate::task::{Task, TaskStatus};
use std::sync::{Arc, RwLock};

/// Shared snapshot cache of the board's task list.
///
/// Writes replace the whole collection; readers get cheap `Arc` clones of
/// the latest snapshot. The store is memory-resident only and is passed
/// around explicitly rather than living in module-level state.
pub struct TaskStore {
    inner: RwLock<Inner>,
}

struct Inner {
    tasks: Option<Arc<Vec<Task>>>,
    stale: bool,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tasks: None,
                stale: false,
            }),
        }
    }

    /// Latest snapshot, if any fetch has completed.
    pub fn get(&self) -> Option<Arc<Vec<Task>>> {
        self.inner.read().unwrap().tasks.clone()
    }

    /// Replace the snapshot with a freshly fetched collection.
    pub fn set(&self, tasks: Vec<Task>) {
        let mut inner = self.inner.write().unwrap();
        inner.tasks = Some(Arc::new(tasks));
        inner.stale = false;
    }

    /// Put back a snapshot captured earlier with [`get`](Self::get),
    /// verbatim. Used to roll back an optimistic write.
    pub fn restore(&self, snapshot: Option<Arc<Vec<Task>>>) {
        self.inner.write().unwrap().tasks = snapshot;
    }

    /// Mark the snapshot as superseded by server-side changes.
    pub fn invalidate(&self) {
        self.inner.write().unwrap().stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.inner.read().unwrap().stale
    }

    /// Cached status of one task, if present.
    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        let inner = self.inner.read().unwrap();
        let tasks = inner.tasks.as_ref()?;
        tasks.iter().find(|t| t.id == task_id).map(|t| t.status)
    }

    /// Write a new snapshot in which exactly the matching task has its
    /// status replaced; every other entry is untouched. Returns false when
    /// the task is not in the cache (nothing is written).
    pub fn patch_status(&self, task_id: &str, status: TaskStatus) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(tasks) = inner.tasks.as_ref() else {
            return false;
        };
        if !tasks.iter().any(|t| t.id == task_id) {
            return false;
        }
        let patched: Vec<Task> = tasks
            .iter()
            .map(|t| {
                if t.id == task_id {
                    let mut t = t.clone();
                    t.status = status;
                    t
                } else {
                    t.clone()
                }
            })
            .collect();
        inner.tasks = Some(Arc::new(patched));
        true
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
