//! External collaborators
//!
//! Every remote service the pipeline talks to sits behind an object-safe
//! async trait. The core only sees `Arc<dyn …>`; concrete HTTP clients
//! live in the submodules and tests substitute in-memory fakes.

pub mod calendar_client;
pub mod credentials;
pub mod docs_client;
pub mod drive_client;
pub mod folder_cache;
pub mod gemini_client;
pub mod page_converter;
pub mod photos_client;
pub mod tasks_client;

pub use calendar_client::CalendarClient;
pub use credentials::{OAuthCredentials, StaticToken};
pub use docs_client::DocsClient;
pub use drive_client::DriveClient;
pub use folder_cache::FolderCache;
pub use gemini_client::GeminiClient;
pub use page_converter::PdftoppmConverter;
pub use photos_client::PhotosClient;
pub use tasks_client::TasksClient;

use crate::models::{ChangePage, Event, FileRecord, Task, WatchRegistration};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Failure reported by an external provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure (connect, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected or token refresh failed
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Concurrent modification (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Call succeeded but carried nothing usable
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Page conversion failed
    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl ProviderError {
    /// Rate limits, conflicts, transport failures and 5xx
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited | ProviderError::Conflict(_) | ProviderError::Network(_) => {
                true
            }
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map a non-success HTTP status to an error
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => ProviderError::Auth(body),
            403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
                ProviderError::RateLimited
            }
            403 => ProviderError::Auth(body),
            404 => ProviderError::NotFound(body),
            409 => ProviderError::Conflict(body),
            429 => ProviderError::RateLimited,
            _ => ProviderError::Api {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Default timeout for provider HTTP requests
pub(crate) const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub(crate) const USER_AGENT: &str = concat!("hdm-ingest/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_http_client(timeout: std::time::Duration) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Pass successful responses through; map everything else to an error
pub(crate) async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), body))
}

/// Bearer token supplier shared by every Google client
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> ProviderResult<String>;
}

/// File storage: metadata, content, folders and per-file properties
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn get_file(&self, file_id: &str) -> ProviderResult<FileRecord>;

    async fn download(&self, file_id: &str) -> ProviderResult<Vec<u8>>;

    async fn rename(&self, file_id: &str, new_name: &str) -> ProviderResult<()>;

    /// Replace the file's current parents with `new_parent`
    async fn move_to(&self, file_id: &str, new_parent: &str) -> ProviderResult<()>;

    async fn list_folder(&self, folder_id: &str, limit: u32) -> ProviderResult<Vec<FileRecord>>;

    /// First non-trashed child with this exact name (and media type, if given)
    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: Option<&str>,
    ) -> ProviderResult<Option<FileRecord>>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> ProviderResult<String>;

    async fn get_properties(&self, file_id: &str) -> ProviderResult<HashMap<String, String>>;

    async fn set_property(&self, file_id: &str, key: &str, value: &str) -> ProviderResult<()>;
}

/// Push-notification change feed
#[async_trait]
pub trait ChangeFeedProvider: Send + Sync {
    /// Current resume token (a fresh baseline)
    async fn start_page_token(&self) -> ProviderResult<String>;

    async fn watch_changes(
        &self,
        page_token: &str,
        channel_id: &str,
        address: &str,
        expiration: DateTime<Utc>,
        channel_token: Option<&str>,
    ) -> ProviderResult<WatchRegistration>;

    async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> ProviderResult<()>;

    async fn list_changes(&self, page_token: &str) -> ProviderResult<ChangePage>;
}

/// Rich documents supporting append-at-end
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn create_document(&self, parent_id: &str, name: &str) -> ProviderResult<String>;

    /// Insert text at the end of the body; never rewrites the document
    async fn append_text(&self, document_id: &str, text: &str) -> ProviderResult<()>;
}

/// Generative model taking a document plus a prompt
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the first candidate's text; no candidates is `EmptyResponse`
    async fn generate(
        &self,
        model: &str,
        data: &[u8],
        mime_type: &str,
        prompt: &str,
        json_response: bool,
    ) -> ProviderResult<String>;
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// An event with exactly this title exists on `date`
    async fn event_exists(&self, title: &str, date: NaiveDate) -> ProviderResult<bool>;

    async fn create_event(&self, event: &Event, notes: &str) -> ProviderResult<String>;
}

#[async_trait]
pub trait TaskProvider: Send + Sync {
    /// An open task with exactly this title is due on `due`
    async fn task_exists(&self, title: &str, due: NaiveDate) -> ProviderResult<bool>;

    async fn create_task(&self, task: &Task, notes: &str) -> ProviderResult<String>;
}

#[async_trait]
pub trait PhotoProvider: Send + Sync {
    async fn upload_image(&self, data: &[u8], description: &str) -> ProviderResult<String>;
}

/// Opaque PDF → per-page JPEG converter
#[async_trait]
pub trait PageConverter: Send + Sync {
    async fn convert(&self, pdf: &[u8], dpi: u32) -> ProviderResult<Vec<Vec<u8>>>;
}
