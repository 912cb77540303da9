//! Destination container resolution
//!
//! Decision table, first match wins:
//! 1. photo flag or photo category → photo container
//! 2. children/education → `<child folder>/<fy>年度/<sub-category>`
//! 3. year-bucketed category → `<base>/<fy>年度`
//! 4. recognised category → its base container
//! 5. unrecognised → the configured fallback policy
//!
//! Sub-folders are created on demand through the shared `FolderCache`.

use crate::config::IngestSettings;
use crate::models::{Category, ClassificationResult, FallbackPolicy, FileRecord};
use crate::providers::{FolderCache, ProviderError};
use crate::services::grade_book::GradeBook;
use chrono::NaiveDate;
use hdm_common::time::{fiscal_year_of, format_compact_date};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Child folder used when no child can be identified
pub const COMMON_CHILD_FOLDER: &str = "共通・学校全般";

/// Summary used in file names when the model gave none
const DEFAULT_SUMMARY: &str = "document";

const DEFAULT_EXTENSION: &str = "pdf";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No container configured for {0}")]
    MissingFolder(Category),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub fn year_folder_name(fiscal_year: i32) -> String {
    format!("{}年度", fiscal_year)
}

pub struct DestinationResolver {
    settings: Arc<IngestSettings>,
    grades: Arc<GradeBook>,
    folders: Arc<FolderCache>,
}

impl DestinationResolver {
    pub fn new(
        settings: Arc<IngestSettings>,
        grades: Arc<GradeBook>,
        folders: Arc<FolderCache>,
    ) -> Self {
        Self {
            settings,
            grades,
            folders,
        }
    }

    /// Children/education post-processing, applied in place
    ///
    /// Fills in the fiscal year and target children, re-routes records
    /// for a graduated lead child to life/admin, and resolves the shared
    /// or individual folder name. Must run before `resolve`.
    pub fn resolve_children(&self, result: &mut ClassificationResult, today: NaiveDate) {
        if result.category != Category::ChildrenEducation {
            return;
        }

        let fiscal_year = fiscal_year_of(result.document_date(today));
        result.fiscal_year = Some(fiscal_year);

        result.target_children = match (&result.child_name, &result.target_grade_class) {
            (Some(child), _) => vec![child.clone()],
            (None, Some(grade_class)) => self.grades.identify_children(grade_class, fiscal_year),
            (None, None) => Vec::new(),
        };

        if let Some(lead) = result.target_children.first().cloned() {
            if self.grades.is_graduated(&lead, fiscal_year) {
                info!(
                    child = %lead,
                    fiscal_year,
                    "Child past graduation grade; re-routing to life/admin"
                );
                result.category = Category::LifeAdmin;
                result.sub_category = None;
                result.target_adult = Some(lead);
                result.target_children.clear();
                result.child_name = None;
                return;
            }
        }

        if let Some(folder) = self.grades.resolve_folder(&result.target_children) {
            result.resolved_folder_name = Some(folder.folder_name);
            result.resolved_label = Some(folder.label);
        }
    }

    /// Container id for a classified document
    pub async fn resolve(
        &self,
        result: &ClassificationResult,
        today: NaiveDate,
    ) -> Result<String, ResolveError> {
        let folders = &self.settings.folders;

        if result.is_photo || result.category == Category::PhotoOther {
            return self.photo_container();
        }

        match result.category {
            Category::ChildrenEducation => self.children_container(result, today).await,
            Category::Unrecognized => self.fallback_container(),
            category => {
                let base = folders
                    .base_folder(category)
                    .ok_or(ResolveError::MissingFolder(category))?;
                if !self.settings.is_year_bucketed(category) {
                    return Ok(base.to_string());
                }
                let year = year_folder_name(result.fiscal_year_or(today));
                Ok(self.folders.get_or_create(base, &year).await?)
            }
        }
    }

    async fn children_container(
        &self,
        result: &ClassificationResult,
        today: NaiveDate,
    ) -> Result<String, ResolveError> {
        let base = self
            .settings
            .folders
            .base_folder(Category::ChildrenEducation)
            .ok_or(ResolveError::MissingFolder(Category::ChildrenEducation))?;

        let child_folder = result
            .resolved_folder_name
            .as_deref()
            .or(result.child_name.as_deref())
            .unwrap_or(COMMON_CHILD_FOLDER);
        let year = year_folder_name(result.fiscal_year_or(today));
        let sub_category = result.sub_category.unwrap_or_default();

        let child_id = self.folders.get_or_create(base, child_folder).await?;
        let year_id = self.folders.get_or_create(&child_id, &year).await?;
        let leaf_id = self
            .folders
            .get_or_create(&year_id, sub_category.label())
            .await?;

        debug!(
            child_folder,
            year = %year,
            sub_category = %sub_category,
            "Resolved children/education container"
        );
        Ok(leaf_id)
    }

    fn photo_container(&self) -> Result<String, ResolveError> {
        self.settings
            .folders
            .base_folder(Category::PhotoOther)
            .map(str::to_string)
            .ok_or(ResolveError::MissingFolder(Category::PhotoOther))
    }

    fn fallback_container(&self) -> Result<String, ResolveError> {
        match &self.settings.unknown_category_fallback {
            FallbackPolicy::Photo => self.photo_container(),
            FallbackPolicy::Folder(id) => Ok(id.clone()),
        }
    }
}

/// New file name: `<YYYYMMDD>_<summary>.<ext>`
pub fn file_name(result: &ClassificationResult, original: &FileRecord, today: NaiveDate) -> String {
    let date = format_compact_date(result.document_date(today));
    let summary = match result.summary.trim() {
        "" => DEFAULT_SUMMARY,
        s => s,
    };
    let extension = original.extension().unwrap_or(DEFAULT_EXTENSION);
    format!("{}_{}.{}", date, summary, extension)
}
