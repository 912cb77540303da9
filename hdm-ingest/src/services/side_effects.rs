//! Best-effort follow-up work after a successful move
//!
//! Photo archival, calendar events, tasks, and accumulated-document sync.
//! Each step logs its own failures and carries on; nothing here changes
//! the file's `ProcessResult`.

use super::accumulated_sync::{AccumulatedDocumentSync, SyncEntry};
use super::classification_router::ClassificationRouter;
use super::grade_book::{GradeBook, GradeInfo};
use crate::config::IngestSettings;
use crate::models::classification::parse_item_date;
use crate::models::{view_url, Category, ClassificationResult, Event, SubCategory, Task};
use crate::providers::{CalendarProvider, PageConverter, PhotoProvider, TaskProvider};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PDF_MIME_TYPE: &str = "application/pdf";

/// What the coordinator managed to do for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffectReport {
    pub photos_uploaded: usize,
    pub events_created: usize,
    pub tasks_created: usize,
    pub synced: bool,
    /// One line per failed step
    pub failures: Vec<String>,
}

impl SideEffectReport {
    fn fail(&mut self, step: &str, error: impl std::fmt::Display) {
        warn!(step, error = %error, "Side effect failed");
        self.failures.push(format!("{}: {}", step, error));
    }
}

/// Everything the side effects need to know about one processed file
pub struct SideEffectInput<'a> {
    pub file_id: &'a str,
    /// Name after renaming
    pub file_name: &'a str,
    pub data: &'a [u8],
    pub mime_type: &'a str,
    pub result: &'a ClassificationResult,
    pub today: NaiveDate,
}

/// Photo storage gets photos and children's records/artwork
pub fn should_upload_photo(result: &ClassificationResult) -> bool {
    result.category == Category::PhotoOther
        || (result.category == Category::ChildrenEducation
            && result.sub_category == Some(SubCategory::Records))
}

/// Calendar/tasks only for children's documents and adult-targeted
/// money or life documents
pub fn should_register_schedule(result: &ClassificationResult) -> bool {
    match result.category {
        Category::ChildrenEducation => true,
        Category::MoneyTax | Category::LifeAdmin => result.target_adult.is_some(),
        _ => false,
    }
}

/// `[who]` prefix for event and task titles; empty when nobody is known
pub fn title_prefix(result: &ClassificationResult, grades: &GradeBook) -> String {
    if let Some(adult) = &result.target_adult {
        return format!("[{}]", adult);
    }

    if let (Some(lead), Some(fiscal_year)) = (result.target_children.first(), result.fiscal_year)
    {
        if let Some(group) = grades.shared_group_for(&result.target_children) {
            return format!("[{}]", group.label);
        }
        let info = grades
            .current_grade(lead, fiscal_year)
            .and_then(|g| grades.grade_info(g));
        return match info {
            Some(info) if !info.label.is_empty() => format!("[{}]", info.label),
            Some(GradeInfo { emoji: Some(emoji), .. }) => format!("[{}]", emoji),
            _ => format!("[{}]", lead),
        };
    }

    match &result.child_name {
        Some(child) => format!("[{}]", child),
        None => String::new(),
    }
}

fn prefixed(prefix: &str, title: &str) -> String {
    if prefix.is_empty() {
        title.to_string()
    } else {
        format!("{} {}", prefix, title)
    }
}

/// Combine tasks that share a due date, keeping first-seen order
pub fn merge_tasks(tasks: Vec<Task>) -> Vec<Task> {
    let mut merged: Vec<Task> = Vec::new();
    for task in tasks {
        match merged.iter_mut().find(|m| m.due_date == task.due_date) {
            Some(existing) => {
                existing.title = format!("{} / {}", existing.title, task.title);
                if let Some(notes) = task.notes.filter(|n| !n.trim().is_empty()) {
                    existing.notes = Some(match existing.notes.take() {
                        Some(prev) if !prev.is_empty() => format!("{}\n{}", prev, notes),
                        _ => notes,
                    });
                }
            }
            None => merged.push(task),
        }
    }
    merged
}

fn source_note(file_id: &str) -> String {
    format!("📎 元のお便り: {}", view_url(file_id))
}

pub struct SideEffectCoordinator {
    settings: Arc<IngestSettings>,
    router: Arc<ClassificationRouter>,
    grades: Arc<GradeBook>,
    sync: Arc<AccumulatedDocumentSync>,
    converter: Arc<dyn PageConverter>,
    calendar: Option<Arc<dyn CalendarProvider>>,
    tasks: Option<Arc<dyn TaskProvider>>,
    photos: Option<Arc<dyn PhotoProvider>>,
}

impl SideEffectCoordinator {
    pub fn new(
        settings: Arc<IngestSettings>,
        router: Arc<ClassificationRouter>,
        grades: Arc<GradeBook>,
        sync: Arc<AccumulatedDocumentSync>,
        converter: Arc<dyn PageConverter>,
    ) -> Self {
        Self {
            settings,
            router,
            grades,
            sync,
            converter,
            calendar: None,
            tasks: None,
            photos: None,
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarProvider>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskProvider>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_photos(mut self, photos: Arc<dyn PhotoProvider>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub async fn run(
        &self,
        input: &SideEffectInput<'_>,
        cancel: &CancellationToken,
    ) -> SideEffectReport {
        let mut report = SideEffectReport::default();

        if should_upload_photo(input.result) {
            self.upload_photos(input, &mut report).await;
        }
        if should_register_schedule(input.result) {
            self.register_schedule(input, &mut report).await;
        }
        self.sync_document(input, cancel, &mut report).await;

        debug!(
            file_id = input.file_id,
            photos = report.photos_uploaded,
            events = report.events_created,
            tasks = report.tasks_created,
            synced = report.synced,
            failures = report.failures.len(),
            "Side effects finished"
        );
        report
    }

    async fn upload_photos(&self, input: &SideEffectInput<'_>, report: &mut SideEffectReport) {
        let Some(photos) = self.photos.as_ref().filter(|_| self.settings.photos.enabled) else {
            return;
        };
        let result = input.result;
        let description = format!(
            "【{}】{}_{}",
            result.category.label(),
            result.date,
            result.summary
        );

        if input.mime_type != PDF_MIME_TYPE {
            match photos.upload_image(input.data, &description).await {
                Ok(_) => report.photos_uploaded += 1,
                Err(e) => report.fail("photo upload", e),
            }
            return;
        }

        let pages = match self
            .converter
            .convert(input.data, self.settings.photos.dpi)
            .await
        {
            Ok(pages) => pages,
            Err(e) => {
                report.fail("pdf conversion", e);
                return;
            }
        };
        let total = pages.len();
        for (index, page) in pages.iter().enumerate() {
            let page_description = format!("{} (Page {}/{})", description, index + 1, total);
            match photos.upload_image(page, &page_description).await {
                Ok(_) => report.photos_uploaded += 1,
                Err(e) => report.fail(&format!("photo upload page {}", index + 1), e),
            }
        }
    }

    async fn register_schedule(&self, input: &SideEffectInput<'_>, report: &mut SideEffectReport) {
        let calendar = self
            .calendar
            .as_ref()
            .filter(|_| self.settings.calendar.enabled);
        let tasks = self.tasks.as_ref().filter(|_| self.settings.tasks.enabled);
        if calendar.is_none() && tasks.is_none() {
            return;
        }

        let extracted = match self
            .router
            .extract_events_and_tasks(input.data, input.mime_type, input.file_name, input.today)
            .await
        {
            Ok(extracted) => extracted,
            Err(e) => {
                report.fail("events extraction", e);
                return;
            }
        };

        let prefix = title_prefix(input.result, &self.grades);
        let notes = source_note(input.file_id);

        if let Some(calendar) = calendar {
            for event in extracted.events {
                self.create_event(calendar.as_ref(), event, &prefix, &notes, report)
                    .await;
            }
        }
        if let Some(tasks) = tasks {
            for task in merge_tasks(extracted.tasks) {
                self.create_task(tasks.as_ref(), task, &prefix, &notes, report)
                    .await;
            }
        }
    }

    async fn create_event(
        &self,
        calendar: &dyn CalendarProvider,
        event: Event,
        prefix: &str,
        notes: &str,
        report: &mut SideEffectReport,
    ) {
        let title = prefixed(prefix, &event.title);
        let Some(date) = parse_item_date(&event.date) else {
            report.fail("calendar event", format!("invalid date {:?} for {}", event.date, title));
            return;
        };

        match calendar.event_exists(&title, date).await {
            Ok(true) => {
                debug!(title = %title, %date, "Calendar event already exists");
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(title = %title, error = %e, "Calendar duplicate check failed"),
        }

        let event = Event { title, ..event };
        match calendar.create_event(&event, notes).await {
            Ok(_) => report.events_created += 1,
            Err(e) => report.fail("calendar event", e),
        }
    }

    async fn create_task(
        &self,
        tasks: &dyn TaskProvider,
        task: Task,
        prefix: &str,
        notes: &str,
        report: &mut SideEffectReport,
    ) {
        let title = prefixed(prefix, &task.title);

        if let Some(due) = parse_item_date(&task.due_date) {
            match tasks.task_exists(&title, due).await {
                Ok(true) => {
                    debug!(title = %title, %due, "Task already exists");
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!(title = %title, error = %e, "Task duplicate check failed"),
            }
        }

        let notes = match task.notes.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{}\n\n{}", notes, extra),
            _ => notes.to_string(),
        };
        let task = Task { title, ..task };
        match tasks.create_task(&task, &notes).await {
            Ok(_) => report.tasks_created += 1,
            Err(e) => report.fail("task", e),
        }
    }

    async fn sync_document(
        &self,
        input: &SideEffectInput<'_>,
        cancel: &CancellationToken,
        report: &mut SideEffectReport,
    ) {
        let result = input.result;
        if !self
            .settings
            .sync
            .allows(result.category, result.sub_category)
        {
            debug!(category = %result.category, "Category not synced to accumulated documents");
            return;
        }
        if self.sync.is_already_synced(input.file_id).await {
            info!(file_id = input.file_id, "Already synced; skipping extraction");
            return;
        }

        let bundle = match self
            .router
            .extract_ocr_bundle(input.data, input.mime_type)
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                report.fail("ocr extraction", e);
                return;
            }
        };
        if bundle.ocr_text.trim().is_empty() {
            info!(file_id = input.file_id, "Extracted text empty; sync skipped");
            return;
        }

        let entry = SyncEntry {
            file_id: input.file_id,
            file_name: input.file_name,
            category: result.category,
            ocr_text: &bundle.ocr_text,
            facts: &bundle.facts,
            summary: bundle.summary.as_deref(),
            date: result.document_date(input.today),
            fiscal_year: result.fiscal_year_or(input.today),
        };
        match self.sync.sync_entry(&entry, cancel).await {
            Ok(()) => report.synced = true,
            Err(e) => report.fail("accumulated sync", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChildGrade, GradeSettings, PreschoolClass, SharedGroup};
    use crate::models::ModelClassification;

    fn grades() -> GradeBook {
        GradeBook::new(GradeSettings {
            base_fiscal_year: 2024,
            graduation_grade: 12,
            children: vec![
                ChildGrade { name: "A".into(), base_grade: 2 },
                ChildGrade { name: "B".into(), base_grade: -1 },
                ChildGrade { name: "C".into(), base_grade: -1 },
                ChildGrade { name: "Z".into(), base_grade: -5 },
            ],
            preschool_classes: vec![PreschoolClass {
                grade: -1,
                name: "りす組".into(),
                emoji: "🐿".into(),
            }],
            shared_groups: vec![SharedGroup {
                class_name: "りす組".into(),
                children: vec!["B".into(), "C".into()],
                folder_name: "B_C".into(),
                label: "🐿りす".into(),
            }],
        })
    }

    fn result(category: &str) -> ClassificationResult {
        ClassificationResult::from(ModelClassification {
            category: category.into(),
            confidence_score: 0.9,
            ..Default::default()
        })
    }

    #[test]
    fn test_prefix_rules() {
        let grades = grades();

        let mut adult = result("30_ライフ・行政");
        adult.target_adult = Some("Mom".into());
        assert_eq!(title_prefix(&adult, &grades), "[Mom]");

        let mut child = result("40_子供・教育");
        child.target_children = vec!["A".into()];
        child.fiscal_year = Some(2025);
        assert_eq!(title_prefix(&child, &grades), "[小3]");

        let mut group = result("40_子供・教育");
        group.target_children = vec!["C".into(), "B".into()];
        group.fiscal_year = Some(2024);
        assert_eq!(title_prefix(&group, &grades), "[🐿りす]");

        // No grade label for this grade: fall back to the name
        let mut unknown_grade = result("40_子供・教育");
        unknown_grade.target_children = vec!["Z".into()];
        unknown_grade.fiscal_year = Some(2024);
        assert_eq!(title_prefix(&unknown_grade, &grades), "[Z]");

        let mut named = result("40_子供・教育");
        named.child_name = Some("A".into());
        assert_eq!(title_prefix(&named, &grades), "[A]");

        assert_eq!(title_prefix(&result("90_ライブラリ"), &grades), "");
    }

    #[test]
    fn test_merge_tasks_by_due_date() {
        let tasks = vec![
            Task { title: "申込書".into(), due_date: "2025-05-01".into(), notes: Some("印鑑".into()) },
            Task { title: "集金".into(), due_date: "2025-05-08".into(), notes: None },
            Task { title: "健康調査票".into(), due_date: "2025-05-01".into(), notes: Some("両面".into()) },
        ];
        let merged = merge_tasks(tasks);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "申込書 / 健康調査票");
        assert_eq!(merged[0].notes.as_deref(), Some("印鑑\n両面"));
        assert_eq!(merged[1].title, "集金");
    }

    #[test]
    fn test_photo_and_schedule_eligibility() {
        let mut records = result("40_子供・教育");
        records.sub_category = Some(SubCategory::Records);
        assert!(should_upload_photo(&records));
        assert!(should_upload_photo(&result("50_写真・その他")));
        assert!(!should_upload_photo(&result("40_子供・教育")));

        assert!(should_register_schedule(&result("40_子供・教育")));
        assert!(!should_register_schedule(&result("10_マネー・税務")));
        let mut adult_money = result("10_マネー・税務");
        adult_money.target_adult = Some("Dad".into());
        assert!(should_register_schedule(&adult_money));
        assert!(!should_register_schedule(&result("60_ヘルス・医療")));
    }

    #[test]
    fn test_prefixed_title() {
        assert_eq!(prefixed("[A]", "遠足"), "[A] 遠足");
        assert_eq!(prefixed("", "遠足"), "遠足");
    }
}
