//! Gemini generateContent client
//!
//! Sends the document as base64 inline data followed by the prompt.
//! Requests are paced by a `governor` limiter shared across model tiers.

use super::{build_http_client, check_status, ModelProvider, ProviderError, ProviderResult};
use async_trait::async_trait;
use base64::Engine;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Document analysis on the high tier can take well over a minute
const MODEL_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GeminiClient {
    pub fn new(api_key: String, requests_per_minute: u32) -> ProviderResult<Self> {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http_client: build_http_client(MODEL_TIMEOUT)?,
            base_url: GEMINI_API_URL.to_string(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        data: &[u8],
        mime_type: &str,
        prompt: &str,
        json_response: bool,
    ) -> ProviderResult<String> {
        self.rate_limiter.until_ready().await;

        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let mut body = json!({
            "contents": [{
                "parts": [
                    { "inline_data": { "mime_type": mime_type, "data": encoded } },
                    { "text": prompt },
                ]
            }]
        });
        if json_response {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }

        debug!(model, mime_type, bytes = data.len(), "Calling model");

        let response = self
            .http_client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateResponse = check_status(response).await?.json().await?;

        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| ProviderError::EmptyResponse(format!("model {}", model)))
    }
}
