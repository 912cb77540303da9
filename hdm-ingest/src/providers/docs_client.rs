//! Google Docs client for accumulated documents
//!
//! Documents are created through Drive (so they land in a chosen
//! folder) and appended to through Docs `batchUpdate` with an
//! `insertText` at the end of the body segment.

use super::{
    build_http_client, check_status, DocumentProvider, ProviderResult, TokenSource,
    DEFAULT_TIMEOUT,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

const DOCS_API_URL: &str = "https://docs.googleapis.com/v1";
const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";

pub const DOCUMENT_MIME_TYPE: &str = "application/vnd.google-apps.document";

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

pub struct DocsClient {
    http_client: Client,
    docs_url: String,
    drive_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl DocsClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> ProviderResult<Self> {
        Ok(Self {
            http_client: build_http_client(DEFAULT_TIMEOUT)?,
            docs_url: DOCS_API_URL.to_string(),
            drive_url: DRIVE_API_URL.to_string(),
            tokens,
        })
    }

    pub fn with_base_urls(mut self, docs_url: impl Into<String>, drive_url: impl Into<String>) -> Self {
        self.docs_url = docs_url.into();
        self.drive_url = drive_url.into();
        self
    }
}

#[async_trait]
impl DocumentProvider for DocsClient {
    async fn create_document(&self, parent_id: &str, name: &str) -> ProviderResult<String> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .post(format!("{}/files", self.drive_url))
            .bearer_auth(token)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "mimeType": DOCUMENT_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await?;
        let created: CreatedFile = check_status(response).await?.json().await?;
        info!(document_id = %created.id, name, "Accumulated document created");
        Ok(created.id)
    }

    async fn append_text(&self, document_id: &str, text: &str) -> ProviderResult<()> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .post(format!("{}/documents/{}:batchUpdate", self.docs_url, document_id))
            .bearer_auth(token)
            .json(&json!({
                "requests": [{
                    "insertText": {
                        "text": text,
                        "endOfSegmentLocation": {},
                    }
                }]
            }))
            .send()
            .await?;
        check_status(response).await?;
        debug!(document_id, chars = text.chars().count(), "Text appended");
        Ok(())
    }
}
