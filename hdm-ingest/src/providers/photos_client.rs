//! Google Photos Library client
//!
//! Upload is two requests: raw bytes to `/uploads` (returns an upload
//! token), then `mediaItems:batchCreate` with that token.

use super::{
    build_http_client, check_status, PhotoProvider, ProviderError, ProviderResult, TokenSource,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const PHOTOS_API_URL: &str = "https://photoslibrary.googleapis.com/v1";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<MediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemResult {
    #[serde(default)]
    media_item: Option<MediaItem>,
    #[serde(default)]
    status: Option<ResultStatus>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResultStatus {
    #[serde(default)]
    message: Option<String>,
}

pub struct PhotosClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl PhotosClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> ProviderResult<Self> {
        Ok(Self {
            http_client: build_http_client(UPLOAD_TIMEOUT)?,
            base_url: PHOTOS_API_URL.to_string(),
            tokens,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl PhotoProvider for PhotosClient {
    async fn upload_image(&self, data: &[u8], description: &str) -> ProviderResult<String> {
        let token = self.tokens.access_token().await?;

        let response = self
            .http_client
            .post(format!("{}/uploads", self.base_url))
            .bearer_auth(&token)
            .header("Content-Type", "application/octet-stream")
            .header("X-Goog-Upload-Content-Type", "image/jpeg")
            .header("X-Goog-Upload-Protocol", "raw")
            .body(data.to_vec())
            .send()
            .await?;
        let upload_token = check_status(response).await?.text().await?;
        if upload_token.trim().is_empty() {
            return Err(ProviderError::EmptyResponse("photo upload".into()));
        }

        let response = self
            .http_client
            .post(format!("{}/mediaItems:batchCreate", self.base_url))
            .bearer_auth(&token)
            .json(&json!({
                "newMediaItems": [{
                    "description": description,
                    "simpleMediaItem": { "uploadToken": upload_token.trim() },
                }]
            }))
            .send()
            .await?;
        let created: BatchCreateResponse = check_status(response).await?.json().await?;

        let result = created
            .new_media_item_results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::EmptyResponse("media item create".into()))?;

        match result.media_item {
            Some(item) => {
                info!(media_item_id = %item.id, description, "Photo uploaded");
                Ok(item.id)
            }
            None => Err(ProviderError::Api {
                status: 200,
                message: result
                    .status
                    .and_then(|s| s.message)
                    .unwrap_or_else(|| "media item not created".into()),
            }),
        }
    }
}
