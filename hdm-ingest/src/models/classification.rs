//! Classification output, OCR bundles and extracted events/tasks
//!
//! Raw model answers deserialize into lenient `Model*` structs first;
//! the normalised types enforce the invariants (confidence in [0,1],
//! closed category set, bounded fact list).

use super::category::{Category, SubCategory};
use chrono::NaiveDate;
use hdm_common::time::{fiscal_year_of, parse_compact_date};
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum facts kept from an OCR bundle
pub const MAX_FACTS: usize = 10;

/// Clamp a model-reported score into [0,1]; NaN counts as 0
pub fn clamp_confidence(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Model answers use `null` for unknowns; read it as the field's default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Document analysis exactly as the model returns it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelClassification {
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default)]
    pub child_name: Option<String>,
    #[serde(default)]
    pub target_adult: Option<String>,
    #[serde(default)]
    pub target_grade_class: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_photo: bool,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence_score: f64,
}

/// Normalised classification of one document
///
/// The trailing fields are filled in by the destination resolver's
/// child-resolution step, never by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    pub child_name: Option<String>,
    pub target_adult: Option<String>,
    pub target_grade_class: Option<String>,
    pub is_photo: bool,
    /// `YYYYMMDD` as reported (may be empty or malformed)
    pub date: String,
    pub summary: String,
    /// Always within [0,1]
    pub confidence: f64,

    pub fiscal_year: Option<i32>,
    pub target_children: Vec<String>,
    pub resolved_folder_name: Option<String>,
    pub resolved_label: Option<String>,
}

impl From<ModelClassification> for ClassificationResult {
    fn from(raw: ModelClassification) -> Self {
        Self {
            category: Category::parse(&raw.category),
            sub_category: raw.sub_category.as_deref().and_then(SubCategory::parse),
            child_name: non_empty(raw.child_name),
            target_adult: non_empty(raw.target_adult),
            target_grade_class: non_empty(raw.target_grade_class),
            is_photo: raw.is_photo,
            date: raw.date.unwrap_or_default().trim().to_string(),
            summary: raw.summary.unwrap_or_default().trim().to_string(),
            confidence: clamp_confidence(raw.confidence_score),
            fiscal_year: None,
            target_children: Vec::new(),
            resolved_folder_name: None,
            resolved_label: None,
        }
    }
}

impl ClassificationResult {
    /// Below threshold, or outside the fixed category set
    pub fn is_low_confidence(&self, threshold: f64) -> bool {
        self.confidence < threshold || !self.category.is_recognized()
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_compact_date(&self.date)
    }

    /// Document date, `today` when missing or malformed
    pub fn document_date(&self, today: NaiveDate) -> NaiveDate {
        self.parsed_date().unwrap_or(today)
    }

    /// Resolved fiscal year, else computed from the document date
    pub fn fiscal_year_or(&self, today: NaiveDate) -> i32 {
        self.fiscal_year
            .unwrap_or_else(|| fiscal_year_of(self.document_date(today)))
    }
}

/// OCR quality flags reported by the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrQuality {
    #[serde(default, deserialize_with = "null_as_default")]
    pub uncertain: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub needs_high_model: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Extracted text plus facts used for accumulated-document sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrBundle {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ocr_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub facts: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, rename = "confidence_score", deserialize_with = "null_as_default")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quality: OcrQuality,
}

impl OcrBundle {
    /// Enforce bundle invariants after parsing
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self.facts.retain(|f| !f.trim().is_empty());
        self.facts.truncate(MAX_FACTS);
        self.summary = non_empty(self.summary);
        self
    }

    /// Character count of the extracted text
    pub fn text_chars(&self) -> usize {
        self.ocr_text.trim().chars().count()
    }
}

/// Calendar event extracted from a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// `YYYY-MM-DD` or `YYYYMMDD`
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Task (to-do with due date) extracted from a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub due_date: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsAndTasks {
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
}

/// Parse an event/task date in either `YYYY-MM-DD` or `YYYYMMDD`
pub fn parse_item_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_compact_date(s))
}
