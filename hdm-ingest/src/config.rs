//! Runtime ingest settings
//!
//! Loaded from the same TOML file as the bootstrap config (unknown keys
//! on either side are ignored). Every field has a default so a missing
//! file still yields a complete, if unconfigured, settings value.
//! Secrets are resolved ENV → TOML after parsing.

use crate::models::{Category, FallbackPolicy, SubCategory};
use crate::utils::RetryPolicy;
use hdm_common::config::resolve_setting;
use hdm_common::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub folders: FolderSettings,
    pub router: RouterSettings,
    /// Media types the pipeline will process
    pub supported_mime_types: Vec<String>,
    /// Categories filed under a `<fiscalYear>年度` sub-folder
    pub year_bucket_categories: Vec<Category>,
    pub sync: SyncSettings,
    pub grades: GradeSettings,
    pub aliases: AliasSettings,
    pub calendar: CalendarSettings,
    pub tasks: TaskSettings,
    pub photos: PhotoSettings,
    pub download: DownloadSettings,
    /// Inbox entries handled per batch trigger
    pub batch_page_size: u32,
    pub watch: WatchSettings,
    pub unknown_category_fallback: FallbackPolicy,
    pub credentials: CredentialSettings,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            folders: FolderSettings::default(),
            router: RouterSettings::default(),
            supported_mime_types: vec![
                "application/pdf".to_string(),
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/bmp".to_string(),
            ],
            year_bucket_categories: vec![
                Category::MoneyTax,
                Category::LifeAdmin,
                Category::ChildrenEducation,
            ],
            sync: SyncSettings::default(),
            grades: GradeSettings::default(),
            aliases: AliasSettings::default(),
            calendar: CalendarSettings::default(),
            tasks: TaskSettings::default(),
            photos: PhotoSettings::default(),
            download: DownloadSettings::default(),
            batch_page_size: 50,
            watch: WatchSettings::default(),
            unknown_category_fallback: FallbackPolicy::default(),
            credentials: CredentialSettings::default(),
        }
    }
}

/// Storage container ids
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    pub inbox: String,
    pub money_tax: String,
    pub project_asset: String,
    pub life_admin: String,
    pub children_education: String,
    pub photo_other: String,
    pub health_medical: String,
    pub library: String,
    pub archive: String,
    /// Parent of the accumulated documents
    pub accumulated_sync: String,
}

impl FolderSettings {
    /// Configured base container of a category (blank → None)
    pub fn base_folder(&self, category: Category) -> Option<&str> {
        let id = match category {
            Category::MoneyTax => &self.money_tax,
            Category::ProjectAsset => &self.project_asset,
            Category::LifeAdmin => &self.life_admin,
            Category::ChildrenEducation => &self.children_education,
            Category::PhotoOther => &self.photo_other,
            Category::HealthMedical => &self.health_medical,
            Category::Library => &self.library,
            Category::Archive => &self.archive,
            Category::Unrecognized => return None,
        };
        let id = id.trim();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

/// Two-tier model routing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub confidence_threshold: f64,
    pub enable_escalation: bool,
    pub low_model: String,
    pub high_model: String,
    /// Request ceiling for the model API
    pub requests_per_minute: u32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            enable_escalation: true,
            low_model: "gemini-3-flash-preview".to_string(),
            high_model: "gemini-3-pro-preview".to_string(),
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExcludedPair {
    pub category: Category,
    pub sub_category: SubCategory,
}

/// Accumulated-document sync
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub enabled: bool,
    pub excluded_categories: Vec<Category>,
    pub excluded_pairs: Vec<ExcludedPair>,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_categories: vec![Category::PhotoOther],
            excluded_pairs: vec![ExcludedPair {
                category: Category::ChildrenEducation,
                sub_category: SubCategory::Records,
            }],
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

impl SyncSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    /// Whether a (category, sub-category) is eligible for sync
    pub fn allows(&self, category: Category, sub_category: Option<SubCategory>) -> bool {
        if !self.enabled || category.notebook_key().is_none() {
            return false;
        }
        if self.excluded_categories.contains(&category) {
            return false;
        }
        let sub = sub_category.unwrap_or_default();
        !self
            .excluded_pairs
            .iter()
            .any(|p| p.category == category && p.sub_category == sub)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChildGrade {
    pub name: String,
    /// Grade in the base fiscal year (1-6 elementary, 7-9 junior high,
    /// 10-12 high school, zero/negative for preschool)
    pub base_grade: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreschoolClass {
    pub grade: i32,
    pub name: String,
    #[serde(default)]
    pub emoji: String,
}

/// Children who share one destination folder
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SharedGroup {
    /// Classroom name that identifies the group in document text
    pub class_name: String,
    pub children: Vec<String>,
    pub folder_name: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradeSettings {
    pub base_fiscal_year: i32,
    /// Last grade before a child is treated as an adult
    pub graduation_grade: i32,
    pub children: Vec<ChildGrade>,
    pub preschool_classes: Vec<PreschoolClass>,
    pub shared_groups: Vec<SharedGroup>,
}

impl Default for GradeSettings {
    fn default() -> Self {
        Self {
            base_fiscal_year: 2024,
            graduation_grade: 12,
            children: Vec::new(),
            preschool_classes: Vec::new(),
            shared_groups: Vec::new(),
        }
    }
}

/// Name normalisation tables offered to the model
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AliasSettings {
    pub children: BTreeMap<String, Vec<String>>,
    pub adults: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub enabled: bool,
    pub calendar_id: String,
    pub time_zone: String,
    /// Offset used to interpret event times
    pub utc_offset_minutes: i32,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            calendar_id: "primary".to_string(),
            time_zone: "Asia/Tokyo".to_string(),
            utc_offset_minutes: 540,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub enabled: bool,
    pub task_list: String,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            task_list: "@default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhotoSettings {
    pub enabled: bool,
    /// Resolution for PDF page rendering
    pub dpi: u32,
    pub converter_command: String,
}

impl Default for PhotoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dpi: 300,
            converter_command: "pdftoppm".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            max_backoff_ms: 16000,
        }
    }
}

impl DownloadSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Public address notifications are delivered to
    pub webhook_url: Option<String>,
    /// Shared secret echoed back in `X-Goog-Channel-Token`
    pub channel_token: Option<String>,
    pub ttl_hours: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel_token: None,
            ttl_hours: 168,
        }
    }
}

/// Secrets that may also come from the environment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub gemini_api_key: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_refresh_token: Option<String>,
}

impl IngestSettings {
    /// Parse settings from TOML text (None → defaults)
    pub fn from_toml_str(content: Option<&str>) -> Result<Self> {
        match content {
            Some(text) => toml::from_str(text)
                .map_err(|e| Error::Config(format!("Parse ingest settings failed: {}", e))),
            None => Ok(Self::default()),
        }
    }

    /// Apply ENV → TOML resolution to every secret
    pub fn resolve_secrets(&mut self) {
        let creds = &mut self.credentials;
        creds.gemini_api_key = resolve_setting(
            "Gemini API key",
            "HDM_GEMINI_API_KEY",
            creds.gemini_api_key.as_deref(),
        );
        creds.oauth_client_id = resolve_setting(
            "OAuth client id",
            "HDM_OAUTH_CLIENT_ID",
            creds.oauth_client_id.as_deref(),
        );
        creds.oauth_client_secret = resolve_setting(
            "OAuth client secret",
            "HDM_OAUTH_CLIENT_SECRET",
            creds.oauth_client_secret.as_deref(),
        );
        creds.oauth_refresh_token = resolve_setting(
            "OAuth refresh token",
            "HDM_OAUTH_REFRESH_TOKEN",
            creds.oauth_refresh_token.as_deref(),
        );
        self.watch.webhook_url = resolve_setting(
            "Webhook URL",
            "HDM_WEBHOOK_URL",
            self.watch.webhook_url.as_deref(),
        );
        self.watch.channel_token = resolve_setting(
            "Webhook channel token",
            "HDM_WEBHOOK_TOKEN",
            self.watch.channel_token.as_deref(),
        );
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.router.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.sync.max_attempts == 0 {
            return Err(Error::Config("sync.max_attempts must be at least 1".into()));
        }
        if self.download.max_attempts == 0 {
            return Err(Error::Config(
                "download.max_attempts must be at least 1".into(),
            ));
        }
        if self.folders.inbox.trim().is_empty() {
            return Err(Error::Config("folders.inbox must be set".into()));
        }
        if self.batch_page_size == 0 {
            return Err(Error::Config("batch_page_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn is_supported_mime_type(&self, mime_type: &str) -> bool {
        self.supported_mime_types.iter().any(|m| m == mime_type)
    }

    pub fn is_year_bucketed(&self, category: Category) -> bool {
        self.year_bucket_categories.contains(&category)
    }
}
