//! Task and completion models

use serde::{Deserialize, Serialize};

use super::record::new_record_id;

/// A chore that can be completed for points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (UUID v7)
    pub id: String,
    /// Short title shown in lists
    pub title: String,
    /// Optional longer description
    #[serde(default)]
    pub description: Option<String>,
    /// Points granted per completion
    #[serde(default)]
    pub points: i64,
    /// Profile the task is assigned to
    #[serde(default)]
    pub assignee_id: Option<String>,
    /// Free-form recurrence rule (e.g. "daily", "weekly:mon")
    #[serde(default)]
    pub recurrence: Option<String>,
    /// Archived tasks stay synced but are hidden from active lists
    #[serde(default)]
    pub archived: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local write timestamp (Unix ms)
    pub updated_at: i64,
}

impl Task {
    /// Create a new unassigned task
    #[must_use]
    pub fn new(title: impl Into<String>, points: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            title: title.into(),
            description: None,
            points,
            assignee_id: None,
            recurrence: None,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assign the task to a profile
    #[must_use]
    pub fn assigned_to(mut self, profile_id: impl Into<String>) -> Self {
        self.assignee_id = Some(profile_id.into());
        self
    }
}

/// One completion of a task, worth the task's points at the time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    /// Completed task
    pub task_id: String,
    /// Profile credited with the completion
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub points: i64,
    /// When the task was done (Unix ms)
    pub completed_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Completion {
    /// Record a completion of `task` right now
    #[must_use]
    pub fn of(task: &Task) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            task_id: task.id.clone(),
            profile_id: task.assignee_id.clone(),
            points: task.points,
            completed_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
