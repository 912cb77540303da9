//! Confidence-tiered model routing
//!
//! Every task runs on the low-cost model first. When that call fails or
//! its answer is not trustworthy enough, the same prompt is re-run once
//! on the high-cost model and that answer is final, whatever its
//! confidence. Retries of individual calls are the provider's concern.

use super::prompts;
use super::ClassifyError;
use crate::config::RouterSettings;
use crate::models::{ClassificationResult, EventsAndTasks, ModelClassification, OcrBundle};
use crate::providers::ModelProvider;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extracted text shorter than this is treated as an incomplete read
pub const MIN_OCR_TEXT_CHARS: usize = 200;

/// Uncertain reads with fewer facts than this are escalated
pub const MIN_UNCERTAIN_FACTS: usize = 3;

/// Multi-signal escalation rule for OCR bundles
///
/// Confidence alone misses garbled reads the model is sure about, so
/// quality flags, fact count and text length also count.
pub fn ocr_needs_escalation(bundle: &OcrBundle, threshold: f64) -> bool {
    bundle.confidence < threshold
        || bundle.quality.needs_high_model
        || (bundle.quality.uncertain && bundle.facts.len() < MIN_UNCERTAIN_FACTS)
        || bundle.text_chars() < MIN_OCR_TEXT_CHARS
}

/// Remove a surrounding Markdown code fence, if any
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.strip_prefix("json").unwrap_or(rest),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json<T: DeserializeOwned>(task: &str, text: &str) -> Result<T, ClassifyError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ClassifyError::Parse(format!("{} response: {}", task, e)))
}

pub struct ClassificationRouter {
    model: Arc<dyn ModelProvider>,
    settings: RouterSettings,
}

impl ClassificationRouter {
    pub fn new(model: Arc<dyn ModelProvider>, settings: RouterSettings) -> Self {
        Self { model, settings }
    }

    pub fn threshold(&self) -> f64 {
        self.settings.confidence_threshold
    }

    /// Classify a document
    ///
    /// Escalates when the low-tier call fails, its confidence is below
    /// the threshold, or its category is outside the fixed set.
    pub async fn classify(
        &self,
        data: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<ClassificationResult, ClassifyError> {
        let threshold = self.threshold();
        let result = self
            .run_tiered(
                "classify",
                data,
                mime_type,
                prompt,
                |text| {
                    parse_json::<ModelClassification>("classify", text)
                        .map(ClassificationResult::from)
                },
                |r: &ClassificationResult| r.is_low_confidence(threshold),
            )
            .await?;

        debug!(
            category = %result.category,
            confidence = result.confidence,
            "Classification complete"
        );
        Ok(result)
    }

    /// Full-text extraction for accumulated-document sync
    pub async fn extract_ocr_bundle(
        &self,
        data: &[u8],
        mime_type: &str,
    ) -> Result<OcrBundle, ClassifyError> {
        let threshold = self.threshold();
        self.run_tiered(
            "ocr",
            data,
            mime_type,
            prompts::ocr_prompt(),
            |text| parse_json::<OcrBundle>("ocr", text).map(OcrBundle::normalized),
            |b: &OcrBundle| ocr_needs_escalation(b, threshold),
        )
        .await
    }

    /// Calendar events and tasks; low-cost model only
    pub async fn extract_events_and_tasks(
        &self,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
        today: NaiveDate,
    ) -> Result<EventsAndTasks, ClassifyError> {
        let prompt = prompts::events_prompt(file_name, today);
        let text = self
            .model
            .generate(&self.settings.low_model, data, mime_type, &prompt, true)
            .await?;
        parse_json("events", &text)
    }

    async fn call<T, P>(
        &self,
        model: &str,
        data: &[u8],
        mime_type: &str,
        prompt: &str,
        parse: &P,
    ) -> Result<T, ClassifyError>
    where
        P: Fn(&str) -> Result<T, ClassifyError>,
    {
        let text = self
            .model
            .generate(model, data, mime_type, prompt, true)
            .await?;
        parse(&text)
    }

    async fn run_tiered<T, P, N>(
        &self,
        task: &str,
        data: &[u8],
        mime_type: &str,
        prompt: &str,
        parse: P,
        needs_escalation: N,
    ) -> Result<T, ClassifyError>
    where
        P: Fn(&str) -> Result<T, ClassifyError>,
        N: Fn(&T) -> bool,
    {
        let low_model = self.settings.low_model.as_str();
        let low = self.call(low_model, data, mime_type, prompt, &parse).await;

        let reason = match &low {
            Ok(answer) => needs_escalation(answer).then_some("insufficient confidence"),
            Err(e) => {
                warn!(task, model = low_model, error = %e, "Low-tier model call failed");
                Some("low-tier failure")
            }
        };
        let Some(reason) = reason else {
            return low;
        };

        if !self.settings.enable_escalation {
            debug!(task, reason, "Escalation disabled; keeping low-tier answer");
            return low;
        }

        let high_model = self.settings.high_model.as_str();
        info!(task, reason, model = high_model, "Escalating to high-tier model");
        self.call(high_model, data, mime_type, prompt, &parse).await
    }
}
