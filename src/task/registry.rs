use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Task, TaskHandle, TaskId, TaskProgress, TaskResult, TaskState};

/// In-memory store of task snapshots.
///
/// Readers take snapshots; each task's fields are written only through its
/// `TaskHandle`. Terminal tasks are dropped `retention` after finishing.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
    workers: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    retention: Duration,
}

/// Registry counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub done_tasks: usize,
    pub failed_tasks: usize,
    pub live_workers: usize,
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            tasks: RwLock::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            retention,
        })
    }

    /// Register a queued task and hand out its only writer
    pub fn create(self: &Arc<Self>) -> TaskHandle {
        let id = TaskId::new();
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Task::new(id.clone()));
        debug!("🆕 Registered task {}", id);
        TaskHandle::new(id, Arc::clone(self))
    }

    /// Snapshot of one task
    pub fn snapshot(&self, id: &TaskId) -> Option<Task> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn progress(&self, id: &TaskId) -> Option<TaskProgress> {
        self.snapshot(id).map(|task| task.progress())
    }

    pub fn result(&self, id: &TaskId) -> Option<TaskResult> {
        self.snapshot(id).map(|task| TaskResult::from(&task))
    }

    /// Apply `change` to a stored task; only `TaskHandle` calls this
    pub(super) fn update<F>(&self, id: &TaskId, change: F) -> bool
    where
        F: FnOnce(&mut Task) -> bool,
    {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(id) {
            Some(task) => change(task),
            None => {
                warn!("Update for unknown task {}", id);
                false
            }
        }
    }

    /// Keep the worker's join handle until the task is purged or awaited
    pub fn track_worker(&self, id: TaskId, handle: JoinHandle<()>) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, worker| !worker.is_finished());
        workers.insert(id, handle);
    }

    /// Drop terminal tasks older than the retention window
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::days(36_500));

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let before = tasks.len();
        tasks.retain(|_, task| match task.finished_at {
            Some(finished) if task.state.is_terminal() => now - finished < retention,
            _ => true,
        });
        let purged = before - tasks.len();
        drop(tasks);

        if purged > 0 {
            info!("🧹 Purged {} expired tasks", purged);
        }
        purged
    }

    /// Wait for every tracked worker to run to completion
    pub async fn join_workers(&self) {
        let handles: Vec<(TaskId, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain().collect()
        };

        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!("Worker for task {} ended abnormally: {}", id, e);
            }
        }
    }

    pub fn statistics(&self) -> RegistryStats {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let count = |state: TaskState| tasks.values().filter(|t| t.state == state).count();
        let done_tasks = count(TaskState::Done);
        let failed_tasks = count(TaskState::Error);

        let live_workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| !w.is_finished())
            .count();

        RegistryStats {
            total_tasks: tasks.len(),
            running_tasks: tasks.len() - done_tasks - failed_tasks,
            done_tasks,
            failed_tasks,
            live_workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_task_is_queued() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();

        let progress = registry.progress(handle.id()).unwrap();
        assert_eq!(progress.state, TaskState::Queued);
        assert_eq!(progress.percent, 0.0);
        assert!(registry.progress(&TaskId::from("missing")).is_none());
    }

    #[test]
    fn test_purge_drops_only_expired_terminal_tasks() {
        let registry = TaskRegistry::new(Duration::ZERO);
        let finished = registry.create();
        let running = registry.create();
        let finished_id = finished.id().clone();
        let running_id = running.id().clone();

        finished.fail("boom");
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.snapshot(&finished_id).is_none());
        assert!(registry.snapshot(&running_id).is_some());
    }

    #[test]
    fn test_retention_keeps_recent_terminal_tasks() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let handle = registry.create();
        let id = handle.id().clone();
        handle.fail("boom");

        assert_eq!(registry.purge_expired(), 0);
        assert!(registry.snapshot(&id).is_some());
    }

    #[tokio::test]
    async fn test_join_workers_waits_for_completion() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();
        let id = handle.id().clone();

        let worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.fail("finished late");
        });
        registry.track_worker(id.clone(), worker);
        assert_eq!(registry.statistics().live_workers, 1);

        registry.join_workers().await;
        assert_eq!(registry.progress(&id).unwrap().state, TaskState::Error);
        assert_eq!(registry.statistics().failed_tasks, 1);
    }
}
