//! Task repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskStatus, TaskType};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// A page of tasks plus the unpaginated total.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
}

/// Repository interface for Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task row.
    async fn create(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Update an existing task row.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// Delete a task by ID.
    async fn delete(&self, id: Uuid) -> DomainResult<()>;

    /// List tasks matching the filter (newest first), with total count.
    async fn list(&self, filter: TaskFilter) -> DomainResult<TaskPage>;

    /// Count tasks currently in the given status.
    async fn count_by_status(&self, status: TaskStatus) -> DomainResult<u64>;
}
