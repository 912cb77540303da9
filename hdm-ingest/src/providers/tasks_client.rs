//! Google Tasks v1 client

use super::{
    build_http_client, check_status, ProviderError, ProviderResult, TaskProvider, TokenSource,
    DEFAULT_TIMEOUT,
};
use crate::models::classification::parse_item_date;
use crate::models::Task;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const TASKS_API_URL: &str = "https://tasks.googleapis.com/tasks/v1";

/// Pages of open tasks scanned by a duplicate lookup
const MAX_LOOKUP_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskList {
    #[serde(default)]
    items: Vec<TaskItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskItem {
    #[serde(default)]
    title: String,
    /// RFC 3339; only the date part is meaningful
    #[serde(default)]
    due: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: String,
}

/// Due date in the form the Tasks API expects
pub fn due_timestamp(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

pub struct TasksClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    task_list: String,
}

impl TasksClient {
    pub fn new(tokens: Arc<dyn TokenSource>, task_list: String) -> ProviderResult<Self> {
        Ok(Self {
            http_client: build_http_client(DEFAULT_TIMEOUT)?,
            base_url: TASKS_API_URL.to_string(),
            tokens,
            task_list,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn tasks_url(&self) -> String {
        format!("{}/lists/{}/tasks", self.base_url, self.task_list)
    }
}

#[async_trait]
impl TaskProvider for TasksClient {
    async fn task_exists(&self, title: &str, due: NaiveDate) -> ProviderResult<bool> {
        let due_prefix = due.format("%Y-%m-%d").to_string();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LOOKUP_PAGES {
            let token = self.tokens.access_token().await?;
            let mut request = self
                .http_client
                .get(self.tasks_url())
                .bearer_auth(token)
                .query(&[("showCompleted", "false"), ("maxResults", "100")]);
            if let Some(page) = page_token.as_deref() {
                request = request.query(&[("pageToken", page)]);
            }

            let list: TaskList = check_status(request.send().await?).await?.json().await?;
            let found = list.items.iter().any(|item| {
                item.title == title
                    && item
                        .due
                        .as_deref()
                        .is_some_and(|d| d.starts_with(&due_prefix))
            });
            if found {
                return Ok(true);
            }

            match list.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(false),
            }
        }

        Ok(false)
    }

    async fn create_task(&self, task: &Task, notes: &str) -> ProviderResult<String> {
        let mut body = json!({
            "title": task.title,
            "notes": notes,
        });
        if !task.due_date.trim().is_empty() {
            let due = parse_item_date(&task.due_date).ok_or_else(|| {
                ProviderError::Parse(format!("invalid task due date: {}", task.due_date))
            })?;
            body["due"] = json!(due_timestamp(due));
        }

        let token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .post(self.tasks_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let created: CreatedTask = check_status(response).await?.json().await?;
        info!(title = %task.title, due = %task.due_date, "Task created");
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_timestamp_format() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 3).unwrap();
        assert_eq!(due_timestamp(date), "2025-05-03T00:00:00.000Z");
    }
}
