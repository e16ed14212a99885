//! Task data model, registry and the per-task writer handle

pub mod handle;
pub mod registry;

pub use handle::TaskHandle;
pub use registry::{RegistryStats, TaskRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chapters::ChapterMark;

/// Opaque task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a task; strictly forward, `Done` and `Error` are final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    ResolvingMetadata,
    FetchingAudio,
    Segmenting,
    Done,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Error)
    }

    /// The one state that may follow this one on the success path
    pub fn next(&self) -> Option<TaskState> {
        match self {
            TaskState::Queued => Some(TaskState::ResolvingMetadata),
            TaskState::ResolvingMetadata => Some(TaskState::FetchingAudio),
            TaskState::FetchingAudio => Some(TaskState::Segmenting),
            TaskState::Segmenting => Some(TaskState::Done),
            TaskState::Done | TaskState::Error => None,
        }
    }

    /// Next success state, or `Error` from any non-terminal state
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == TaskState::Error || self.next() == Some(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::ResolvingMetadata => "resolving_metadata",
            TaskState::FetchingAudio => "fetching_audio",
            TaskState::Segmenting => "segmenting",
            TaskState::Done => "done",
            TaskState::Error => "error",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result envelope of a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub video_title: String,
    /// Task-scoped folder under the output base directory
    pub directory: String,
    /// Output file names inside `directory`, in chapter order
    pub files: Vec<String>,
    pub duration_seconds: f64,
    pub chapters: Vec<ChapterMark>,
    pub elapsed_seconds: f64,
    pub total_output_size_mb: f64,
}

/// Snapshot of one task as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub percent: f64,
    pub result: Option<TaskOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the task reached `Done` or `Error`
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Queued,
            percent: 0.0,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            state: self.state,
            percent: self.percent,
        }
    }
}

/// Answer to a progress query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub state: TaskState,
    pub percent: f64,
}

/// Answer to a result query; only terminal tasks carry data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Done(TaskOutcome),
    Error { error: String },
    Pending { state: TaskState, percent: f64 },
}

impl From<&Task> for TaskResult {
    fn from(task: &Task) -> Self {
        match (task.state, &task.result, &task.error) {
            (TaskState::Done, Some(outcome), _) => TaskResult::Done(outcome.clone()),
            (TaskState::Error, _, Some(error)) => TaskResult::Error { error: error.clone() },
            (state, _, _) => TaskResult::Pending {
                state,
                percent: task.percent,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        assert!(TaskState::Queued.can_transition_to(TaskState::ResolvingMetadata));
        assert!(!TaskState::Queued.can_transition_to(TaskState::FetchingAudio));
        assert!(!TaskState::FetchingAudio.can_transition_to(TaskState::ResolvingMetadata));
        assert!(TaskState::FetchingAudio.can_transition_to(TaskState::Error));
        assert!(!TaskState::Done.can_transition_to(TaskState::Error));
        assert!(!TaskState::Error.can_transition_to(TaskState::Done));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&TaskState::ResolvingMetadata).unwrap();
        assert_eq!(json, "\"resolving_metadata\"");
        assert_eq!(TaskState::FetchingAudio.to_string(), "fetching_audio");
    }

    #[test]
    fn test_result_only_for_terminal_tasks() {
        let mut task = Task::new(TaskId::from("t1"));
        assert!(matches!(TaskResult::from(&task), TaskResult::Pending { state: TaskState::Queued, .. }));

        task.state = TaskState::Error;
        task.error = Some("all tiers failed".to_string());
        assert_eq!(
            TaskResult::from(&task),
            TaskResult::Error { error: "all tiers failed".to_string() }
        );

        let json = serde_json::to_value(TaskResult::from(&task)).unwrap();
        assert_eq!(json["status"], "error");
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }
}
