use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{TaskId, TaskOutcome, TaskRegistry, TaskState};

/// Exclusive writer for one task.
///
/// Not `Clone`: the worker that owns it is the only code that can mutate the
/// task. Finishing consumes the handle. A handle dropped before finishing
/// marks its task as failed.
pub struct TaskHandle {
    id: TaskId,
    registry: Arc<TaskRegistry>,
}

impl TaskHandle {
    pub(super) fn new(id: TaskId, registry: Arc<TaskRegistry>) -> Self {
        Self { id, registry }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Move to the next success state, raising percent to `floor`
    pub fn advance(&self, state: TaskState, floor: f64) -> bool {
        let moved = self.registry.update(&self.id, |task| {
            if !task.state.can_transition_to(state) || state.is_terminal() {
                return false;
            }
            task.state = state;
            task.percent = task.percent.max(floor.clamp(0.0, 100.0));
            true
        });

        if moved {
            debug!("Task {} -> {}", self.id, state);
        } else {
            warn!("Rejected transition of task {} to {}", self.id, state);
        }
        moved
    }

    /// Raise percent; lower or invalid values are ignored
    pub fn report_percent(&self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        self.registry.update(&self.id, |task| {
            if task.state.is_terminal() {
                return false;
            }
            let clamped = percent.clamp(0.0, 100.0);
            if clamped > task.percent {
                task.percent = clamped;
                true
            } else {
                false
            }
        });
    }

    /// Store the result and finish in `Done`
    pub fn complete(self, outcome: TaskOutcome) -> bool {
        self.registry.update(&self.id, |task| {
            if !task.state.can_transition_to(TaskState::Done) {
                return false;
            }
            task.state = TaskState::Done;
            task.percent = 100.0;
            task.result = Some(outcome);
            task.finished_at = Some(Utc::now());
            true
        })
    }

    /// Store the cause and finish in `Error`; percent keeps its last value
    pub fn fail(self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.registry.update(&self.id, move |task| Self::mark_failed(task, message))
    }

    fn mark_failed(task: &mut super::Task, message: String) -> bool {
        if task.state.is_terminal() {
            return false;
        }
        task.state = TaskState::Error;
        task.error = Some(message);
        task.finished_at = Some(Utc::now());
        true
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let abandoned = self.registry.update(&self.id, |task| {
            Self::mark_failed(task, "worker stopped before the task finished".to_string())
        });
        if abandoned {
            warn!("Task {} abandoned by its worker", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskResult;
    use std::time::Duration;

    fn outcome() -> TaskOutcome {
        TaskOutcome {
            video_title: "Talk".to_string(),
            directory: "t".to_string(),
            files: vec!["Intro.mp3".to_string()],
            duration_seconds: 60.0,
            chapters: vec![],
            elapsed_seconds: 1.0,
            total_output_size_mb: 0.5,
        }
    }

    #[test]
    fn test_success_path() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();
        let id = handle.id().clone();

        assert!(handle.advance(TaskState::ResolvingMetadata, 1.0));
        assert!(handle.advance(TaskState::FetchingAudio, 5.0));
        handle.report_percent(30.0);
        assert!(handle.advance(TaskState::Segmenting, 50.0));
        assert!(handle.complete(outcome()));

        let task = registry.snapshot(&id).unwrap();
        assert_eq!(task.state, TaskState::Done);
        assert_eq!(task.percent, 100.0);
        assert!(task.error.is_none());
        assert_eq!(registry.result(&id), Some(TaskResult::Done(outcome())));
    }

    #[test]
    fn test_percent_never_decreases() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();
        let id = handle.id().clone();

        handle.advance(TaskState::ResolvingMetadata, 1.0);
        handle.report_percent(40.0);
        handle.report_percent(10.0);
        handle.report_percent(f64::NAN);
        handle.advance(TaskState::FetchingAudio, 5.0);

        assert_eq!(registry.progress(&id).unwrap().percent, 40.0);
    }

    #[test]
    fn test_skipping_a_state_is_rejected() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();
        let id = handle.id().clone();

        assert!(!handle.advance(TaskState::Segmenting, 50.0));
        assert!(!handle.advance(TaskState::Done, 100.0));
        assert_eq!(registry.progress(&id).unwrap().state, TaskState::Queued);
        handle.fail("stop");
    }

    #[test]
    fn test_complete_requires_segmenting() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();
        let id = handle.id().clone();

        assert!(!handle.complete(outcome()));
        let task = registry.snapshot(&id).unwrap();
        // the dropped handle failed the task instead
        assert_eq!(task.state, TaskState::Error);
        assert!(task.result.is_none());
    }

    #[test]
    fn test_failure_keeps_last_percent_and_is_final() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let handle = registry.create();
        let id = handle.id().clone();

        handle.advance(TaskState::ResolvingMetadata, 1.0);
        assert!(handle.fail("ResolutionFailed: every tier failed"));

        let task = registry.snapshot(&id).unwrap();
        assert_eq!(task.state, TaskState::Error);
        assert_eq!(task.percent, 1.0);
        assert_eq!(task.error.as_deref(), Some("ResolutionFailed: every tier failed"));
        assert!(task.result.is_none());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_dropped_handle_fails_task() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let id = {
            let handle = registry.create();
            handle.advance(TaskState::ResolvingMetadata, 1.0);
            handle.id().clone()
        };

        let task = registry.snapshot(&id).unwrap();
        assert_eq!(task.state, TaskState::Error);
        assert!(task.error.unwrap().contains("worker stopped"));
    }
}
