//! Background task tracking.
//!
//! Jobs write progress into the tracker; owners (and admins) poll it. Records
//! live in a bounded store, so an idle or crowded-out task can disappear while
//! its job is still running. Later updates to it are ignored and polls report
//! it as not found.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::TaskConfig;
use crate::store::{BoundedStore, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithWarning,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::CompletedWithWarning | TaskStatus::Failed
        )
    }
}

#[derive(Debug, Clone)]
struct TaskRecord {
    status: TaskStatus,
    progress: u8,
    message: String,
    details: VecDeque<String>,
    owner: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Caller-facing copy of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub details: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    /// Drop the owner.
    pub fn into_public(self) -> Self {
        Self {
            owner: None,
            ..self
        }
    }
}

pub struct TaskTracker {
    tasks: BoundedStore<String, TaskRecord>,
    detail_cap: usize,
}

impl TaskTracker {
    pub fn new(config: &TaskConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: BoundedStore::new("tasks", config.store(), clock),
            detail_cap: config.detail_cap(),
        }
    }

    /// Register a new `pending` task owned by `owner`.
    pub fn create(&self, task_id: &str, owner: &str) {
        self.tasks.atomically(|view| {
            let now = view.now();
            view.insert(
                task_id.to_string(),
                TaskRecord {
                    status: TaskStatus::Pending,
                    progress: 0,
                    message: "Initializing...".to_string(),
                    details: VecDeque::new(),
                    owner: owner.to_string(),
                    created_at: now,
                    updated_at: now,
                },
            );
        });
    }

    /// Partial update; progress is clamped into 0..=100.
    ///
    /// Returns `false` when the task is unknown (never created or evicted).
    pub fn update(
        &self,
        task_id: &str,
        status: Option<TaskStatus>,
        progress: Option<i64>,
        message: Option<&str>,
    ) -> bool {
        let now = self.tasks.clock().now();
        self.tasks
            .update(&task_id.to_string(), |task| {
                if let Some(status) = status {
                    task.status = status;
                }
                if let Some(progress) = progress {
                    task.progress = progress.clamp(0, 100) as u8;
                }
                if let Some(message) = message {
                    task.message = message.to_string();
                }
                task.updated_at = now;
            })
            .is_some()
    }

    /// Append a note, trimming the oldest beyond the per-task cap.
    pub fn append_detail(&self, task_id: &str, detail: &str) -> bool {
        let now = self.tasks.clock().now();
        let cap = self.detail_cap;
        self.tasks
            .update(&task_id.to_string(), |task| {
                task.details.push_back(detail.to_string());
                while task.details.len() > cap {
                    task.details.pop_front();
                }
                task.updated_at = now;
            })
            .is_some()
    }

    /// Owned copy of the task; the owner only when `include_private`.
    pub fn read(&self, task_id: &str, include_private: bool) -> Option<TaskSnapshot> {
        let task = self.tasks.get(&task_id.to_string())?;
        let snapshot = TaskSnapshot {
            status: task.status,
            progress: task.progress,
            message: task.message,
            details: task.details.into_iter().collect(),
            owner: Some(task.owner),
            created_at: task.created_at,
            updated_at: task.updated_at,
        };
        Some(if include_private {
            snapshot
        } else {
            snapshot.into_public()
        })
    }

    pub fn is_owner(&self, task_id: &str, identity: &str) -> bool {
        self.tasks
            .get(&task_id.to_string())
            .map(|task| task.owner == identity)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn maintain(&self, force: bool) -> SweepReport {
        self.tasks.maintain(force)
    }
}
