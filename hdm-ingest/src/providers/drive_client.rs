//! Google Drive v3 client
//!
//! Implements both `StorageProvider` and `ChangeFeedProvider`. All
//! requests pass `supportsAllDrives=true` so shared drives behave like
//! My Drive.

use super::{
    build_http_client, check_status, ChangeFeedProvider, ProviderError, ProviderResult,
    StorageProvider, TokenSource, DEFAULT_TIMEOUT,
};
use crate::models::{ChangePage, FileRecord, WatchRegistration};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,parents,trashed";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRecord>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PropertiesResponse {
    #[serde(default)]
    properties: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageTokenResponse {
    start_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    id: String,
    resource_id: String,
    /// Milliseconds since the epoch, as a string
    #[serde(default)]
    expiration: Option<String>,
}

/// Escape a value for a Drive `q` string literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub struct DriveClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl DriveClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> ProviderResult<Self> {
        Ok(Self {
            http_client: build_http_client(DEFAULT_TIMEOUT)?,
            base_url: DRIVE_API_URL.to_string(),
            tokens,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn authed(&self, builder: RequestBuilder) -> ProviderResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(builder.bearer_auth(token))
    }

    async fn send(&self, builder: RequestBuilder) -> ProviderResult<reqwest::Response> {
        let response = self.authed(builder).await?.send().await?;
        check_status(response).await
    }

    async fn update_metadata(
        &self,
        file_id: &str,
        query: &[(&str, &str)],
        body: serde_json::Value,
    ) -> ProviderResult<()> {
        let url = format!("{}/files/{}", self.base_url, file_id);
        self.send(
            self.http_client
                .patch(url)
                .query(&[("supportsAllDrives", "true")])
                .query(query)
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn query_files(&self, q: &str, limit: u32) -> ProviderResult<Vec<FileRecord>> {
        let url = format!("{}/files", self.base_url);
        let page_size = limit.to_string();
        let response = self
            .send(self.http_client.get(url).query(&[
                ("q", q),
                ("pageSize", page_size.as_str()),
                ("fields", "files(id,name,mimeType,parents,trashed)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]))
            .await?;
        let list: FileList = response.json().await?;
        Ok(list.files)
    }
}

#[async_trait]
impl StorageProvider for DriveClient {
    async fn get_file(&self, file_id: &str) -> ProviderResult<FileRecord> {
        let url = format!("{}/files/{}", self.base_url, file_id);
        let response = self
            .send(
                self.http_client
                    .get(url)
                    .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn download(&self, file_id: &str) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/files/{}", self.base_url, file_id);
        let response = self
            .send(
                self.http_client
                    .get(url)
                    .query(&[("alt", "media"), ("supportsAllDrives", "true")]),
            )
            .await?;
        let bytes = response.bytes().await?;
        debug!(file_id, bytes = bytes.len(), "Download complete");
        Ok(bytes.to_vec())
    }

    async fn rename(&self, file_id: &str, new_name: &str) -> ProviderResult<()> {
        self.update_metadata(file_id, &[], json!({ "name": new_name }))
            .await?;
        info!(file_id, new_name, "File renamed");
        Ok(())
    }

    async fn move_to(&self, file_id: &str, new_parent: &str) -> ProviderResult<()> {
        let file = self.get_file(file_id).await?;
        if file.parents.is_empty() {
            return Err(ProviderError::Api {
                status: 400,
                message: format!("file {} has no parents", file_id),
            });
        }
        let remove = file.parents.join(",");
        self.update_metadata(
            file_id,
            &[
                ("addParents", new_parent),
                ("removeParents", remove.as_str()),
                ("fields", "id,parents"),
            ],
            json!({}),
        )
        .await?;
        info!(file_id, new_parent, "File moved");
        Ok(())
    }

    async fn list_folder(&self, folder_id: &str, limit: u32) -> ProviderResult<Vec<FileRecord>> {
        let q = format!("'{}' in parents and trashed=false", escape_query(folder_id));
        self.query_files(&q, limit).await
    }

    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: Option<&str>,
    ) -> ProviderResult<Option<FileRecord>> {
        let mut q = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(parent_id)
        );
        if let Some(mime) = mime_type {
            q.push_str(&format!(" and mimeType='{}'", escape_query(mime)));
        }
        Ok(self.query_files(&q, 1).await?.into_iter().next())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> ProviderResult<String> {
        let url = format!("{}/files", self.base_url);
        let response = self
            .send(
                self.http_client
                    .post(url)
                    .query(&[("fields", "id"), ("supportsAllDrives", "true")])
                    .json(&json!({
                        "name": name,
                        "mimeType": FOLDER_MIME_TYPE,
                        "parents": [parent_id],
                    })),
            )
            .await?;
        let created: CreatedFile = response.json().await?;
        info!(folder_id = %created.id, name, parent_id, "Folder created");
        Ok(created.id)
    }

    async fn get_properties(&self, file_id: &str) -> ProviderResult<HashMap<String, String>> {
        let url = format!("{}/files/{}", self.base_url, file_id);
        let response = self
            .send(
                self.http_client
                    .get(url)
                    .query(&[("fields", "properties"), ("supportsAllDrives", "true")]),
            )
            .await?;
        let props: PropertiesResponse = response.json().await?;
        Ok(props.properties)
    }

    async fn set_property(&self, file_id: &str, key: &str, value: &str) -> ProviderResult<()> {
        let mut properties = serde_json::Map::new();
        properties.insert(key.to_string(), json!(value));
        self.update_metadata(file_id, &[], json!({ "properties": properties }))
            .await
    }
}

#[async_trait]
impl ChangeFeedProvider for DriveClient {
    async fn start_page_token(&self) -> ProviderResult<String> {
        let url = format!("{}/changes/startPageToken", self.base_url);
        let response = self
            .send(
                self.http_client
                    .get(url)
                    .query(&[("supportsAllDrives", "true")]),
            )
            .await?;
        let token: StartPageTokenResponse = response.json().await?;
        Ok(token.start_page_token)
    }

    async fn watch_changes(
        &self,
        page_token: &str,
        channel_id: &str,
        address: &str,
        expiration: DateTime<Utc>,
        channel_token: Option<&str>,
    ) -> ProviderResult<WatchRegistration> {
        let url = format!("{}/changes/watch", self.base_url);
        let mut body = json!({
            "id": channel_id,
            "type": "web_hook",
            "address": address,
            "expiration": expiration.timestamp_millis().to_string(),
        });
        if let Some(token) = channel_token {
            body["token"] = json!(token);
        }

        let response = self
            .send(
                self.http_client
                    .post(url)
                    .query(&[
                        ("pageToken", page_token),
                        ("supportsAllDrives", "true"),
                        ("includeItemsFromAllDrives", "true"),
                    ])
                    .json(&body),
            )
            .await?;
        let channel: ChannelResponse = response.json().await?;

        // The provider may shorten the requested lifetime
        let granted = channel
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(expiration);

        Ok(WatchRegistration {
            channel_id: channel.id,
            resource_id: channel.resource_id,
            expiration: granted,
        })
    }

    async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> ProviderResult<()> {
        let url = format!("{}/channels/stop", self.base_url);
        self.send(self.http_client.post(url).json(&json!({
            "id": channel_id,
            "resourceId": resource_id,
        })))
        .await?;
        Ok(())
    }

    async fn list_changes(&self, page_token: &str) -> ProviderResult<ChangePage> {
        let url = format!("{}/changes", self.base_url);
        let response = self
            .send(self.http_client.get(url).query(&[
                ("pageToken", page_token),
                (
                    "fields",
                    "nextPageToken,newStartPageToken,changes(fileId,removed,file(id,name,mimeType,parents,trashed))",
                ),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]))
            .await?;
        Ok(response.json().await?)
    }
}
