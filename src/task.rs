use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Workflow states a task moves through on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    InReview,
    Completed,
}

/// Board columns, in display order.
pub const ALL_STATUSES: &[TaskStatus] = &[
    TaskStatus::Pending,
    TaskStatus::InProgress,
    TaskStatus::InReview,
    TaskStatus::Completed,
];

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Completed => "completed",
        }
    }

    /// Terminal statuses carry a `completed_at` timestamp on the server.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "in_review" => Ok(TaskStatus::InReview),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(anyhow::anyhow!("invalid task status: {}", other)),
        }
    }
}

/// Attachment metadata as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A task as the server serializes it.
///
/// The client holds immutable snapshots of these; every edit goes through
/// the API and comes back via refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// The server spells this wire field "asignee".
    #[serde(rename = "asignee", default)]
    pub assignee: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: Option<Vec<FileMeta>>,
}

/// Response body of the task-list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskPage {
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,
}

/// Longest title the server accepts.
pub const MAX_TITLE_LEN: usize = 50;

/// A file queued for upload with a create/edit request.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("no file name in path: {}", path.display()))?
            .to_string();
        let content = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("read {}: {}", path.display(), e))?;
        Ok(Self { file_name, content })
    }
}

/// Fields the client supplies when creating or editing a task.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl TaskDraft {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    /// Checks the rules the server would reject anyway, before any bytes
    /// go over the wire.
    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            anyhow::bail!("title is required");
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            anyhow::bail!("title cannot be longer than {} characters", MAX_TITLE_LEN);
        }
        Ok(())
    }
}
