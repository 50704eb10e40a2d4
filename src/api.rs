//! Typed client for the board's REST API.
//!
//! One hand-maintained surface per endpoint, behind the [`TaskApi`] trait
//! so callers and tests can substitute their own transport.

use crate::config::{ClientConfig, RetryPolicy};
use crate::logging;
use crate::task::{Task, TaskDraft, TaskPage, TaskStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Problem-details body the server returns on failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorModel {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<ErrorDetail>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl ErrorModel {
    fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(title) = &self.title {
            parts.push(title.clone());
        }
        if let Some(detail) = &self.detail {
            parts.push(detail.clone());
        }
        if let Some(errors) = &self.errors {
            for err in errors {
                if let Some(message) = &err.message {
                    parts.push(message.clone());
                }
            }
        }
        parts.join("; ")
    }
}

/// Non-2xx response from the board API.
#[derive(Debug, thiserror::Error)]
#[error("{endpoint} returned {status}: {summary}")]
pub struct ApiError {
    pub status: StatusCode,
    pub endpoint: String,
    pub summary: String,
    pub body: Option<ErrorModel>,
}

#[derive(Serialize)]
struct ChangeStatusBody<'a> {
    status: &'a str,
}

/// The board's task operations, at the seam where the optimistic mutator
/// and the tests plug in.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Fetch the full task collection.
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Move a task to a new workflow status.
    async fn change_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// Create a task; the server assigns the id.
    async fn create_task(&self, draft: &TaskDraft) -> Result<()>;

    /// Edit an existing task's fields and attach any new files.
    async fn edit_task(&self, task_id: &str, draft: &TaskDraft) -> Result<()>;
}

/// reqwest-backed implementation of [`TaskApi`].
pub struct HttpTaskApi {
    client: Client,
    config: ClientConfig,
}

impl HttpTaskApi {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        let url = self.url("/tasks");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("send task list request")?;
        let response = check_status("GET /tasks", response).await?;
        let page: TaskPage = response.json().await.context("decode task list")?;
        Ok(page.tasks.unwrap_or_default())
    }

    fn task_form(draft: &TaskDraft) -> Form {
        let mut form = Form::new().text("title", draft.title.clone());
        if let Some(description) = &draft.description {
            form = form.text("description", description.clone());
        }
        if let Some(due) = &draft.due_date {
            form = form.text("due_date", due.to_rfc3339());
        }
        if let Some(assignee) = &draft.assignee {
            form = form.text("assignee_name", assignee.clone());
        }
        for attachment in &draft.attachments {
            form = form.part(
                "files",
                Part::bytes(attachment.content.clone()).file_name(attachment.file_name.clone()),
            );
        }
        form
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        // the list endpoint is idempotent, so transient failures retry
        with_retry(&self.config.retry, "GET /tasks", || self.fetch_tasks()).await
    }

    async fn change_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let endpoint = format!("POST /tasks/{}/status", task_id);
        let url = self.url(&format!("/tasks/{}/status", task_id));
        let response = self
            .client
            .post(&url)
            .json(&ChangeStatusBody {
                status: status.as_str(),
            })
            .send()
            .await
            .context("send status change request")?;
        check_status(&endpoint, response).await?;
        Ok(())
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<()> {
        draft.validate()?;
        let url = self.url("/tasks/create");
        let response = self
            .client
            .post(&url)
            .multipart(Self::task_form(draft))
            .send()
            .await
            .context("send create task request")?;
        check_status("POST /tasks/create", response).await?;
        Ok(())
    }

    async fn edit_task(&self, task_id: &str, draft: &TaskDraft) -> Result<()> {
        draft.validate()?;
        let endpoint = format!("POST /tasks/{}/edit", task_id);
        let url = self.url(&format!("/tasks/{}/edit", task_id));
        let response = self
            .client
            .post(&url)
            .multipart(Self::task_form(draft))
            .send()
            .await
            .context("send edit task request")?;
        check_status(&endpoint, response).await?;
        Ok(())
    }
}

/// Pass 2xx responses through; turn anything else into an [`ApiError`]
/// carrying the decoded problem body when the server sent one.
async fn check_status(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorModel> = serde_json::from_str(&text).ok();
    let summary = body
        .as_ref()
        .map(|m| m.summary())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| truncate(&text, 200));
    Err(anyhow::Error::new(ApiError {
        status,
        endpoint: endpoint.to_string(),
        summary,
        body,
    }))
}

pub(crate) async fn with_retry<T, F, Fut>(retry: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..retry.max_attempts {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s at the default base delay
            let delay = retry.base_delay_ms * (1 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(delay)).await;
            logging::info(&format!(
                "retrying {} (attempt {}/{})",
                what,
                attempt + 1,
                retry.max_attempts
            ));
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let error_str = err.to_string().to_lowercase();
                if is_retryable_error(&error_str) && attempt + 1 < retry.max_attempts {
                    logging::info(&format!("transient error, will retry: {}", err));
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed", what)))
}

/// Check if an error is transient and should be retried
fn is_retryable_error(error_str: &str) -> bool {
    error_str.contains("connection reset")
        || error_str.contains("connection closed")
        || error_str.contains("connection refused")
        || error_str.contains("broken pipe")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("unexpected eof")
        || error_str.contains("502 bad gateway")
        || error_str.contains("503 service unavailable")
        || error_str.contains("504 gateway timeout")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() > max_len {
        format!("{}...", &s[..max_len])
    } else {
        s.to_string()
    }
}
