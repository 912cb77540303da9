//! In-memory providers shared by the integration tests
//!
//! Every fake records what it was asked to do so tests can assert on
//! side effects without any network access.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use hdm_ingest::config::{ChildGrade, IngestSettings};
use hdm_ingest::models::{ChangePage, Event, FileRecord, Task, WatchRegistration};
use hdm_ingest::providers::docs_client::DOCUMENT_MIME_TYPE;
use hdm_ingest::providers::drive_client::FOLDER_MIME_TYPE;
use hdm_ingest::providers::{
    CalendarProvider, ChangeFeedProvider, DocumentProvider, ModelProvider, PageConverter,
    PhotoProvider, ProviderError, ProviderResult, StorageProvider, TaskProvider,
};
use hdm_ingest::services::{IngestionPipeline, PipelineProviders};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const INBOX: &str = "inbox";
pub const EDU: &str = "EDU";
pub const PHOTO: &str = "PHOTO";
pub const LIFE: &str = "LIFE";
pub const MONEY: &str = "MONEY";
pub const SYNC: &str = "SYNC";
pub const PDF: &str = "application/pdf";

/// Settings wired to the fake container ids, with millisecond backoffs
pub fn test_settings() -> IngestSettings {
    let mut settings = IngestSettings::default();
    settings.folders.inbox = INBOX.into();
    settings.folders.children_education = EDU.into();
    settings.folders.photo_other = PHOTO.into();
    settings.folders.life_admin = LIFE.into();
    settings.folders.money_tax = MONEY.into();
    settings.folders.accumulated_sync = SYNC.into();
    settings.grades.base_fiscal_year = 2024;
    settings.grades.children = vec![ChildGrade {
        name: "A".into(),
        base_grade: 2,
    }];
    settings.download.max_attempts = 3;
    settings.download.base_backoff_ms = 1;
    settings.download.max_backoff_ms = 2;
    settings.sync.max_attempts = 3;
    settings.sync.base_backoff_ms = 1;
    settings.sync.max_backoff_ms = 2;
    settings
}

/// Model answer for the standard children's notice fixture
pub const NOTICE_ANALYSIS: &str = r#"{
    "category": "40_子供・教育",
    "child_name": "A",
    "sub_category": "01_お便り・スケジュール",
    "is_photo": false,
    "date": "20250115",
    "summary": "遠足",
    "confidence_score": 0.9
}"#;

pub const NOTICE_EVENTS: &str = r#"{
    "events": [{"title": "遠足", "date": "2025-01-20", "start_time": "08:30", "end_time": null, "location": "動物園", "description": "弁当持参"}],
    "tasks": [{"title": "参加票の提出", "due_date": "2025-01-17", "notes": "担任まで"}]
}"#;

pub fn notice_ocr() -> String {
    serde_json::json!({
        "ocr_text": "遠足のお知らせ。".repeat(30),
        "facts": ["1月20日 遠足", "持ち物: 弁当", "集合 8:30"],
        "summary": "動物園への遠足の案内",
        "confidence_score": 0.95,
        "quality": {"uncertain": false, "needs_high_model": false}
    })
    .to_string()
}

#[derive(Debug, Clone)]
struct StoredFile {
    record: FileRecord,
    data: Vec<u8>,
}

#[derive(Default)]
struct StorageState {
    files: HashMap<String, StoredFile>,
    properties: HashMap<String, HashMap<String, String>>,
    calls: Vec<String>,
    download_failures: u32,
}

/// Storage tree held in memory; created folder ids are `<parent>/<name>`
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
    download_delay: Option<Duration>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slow downloads, to hold an attempt open while another one arrives
    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    pub fn add_file(&self, id: &str, name: &str, mime_type: &str, parent: &str) {
        self.insert(
            FileRecord {
                id: id.into(),
                name: name.into(),
                mime_type: mime_type.into(),
                parents: vec![parent.into()],
                trashed: false,
            },
            format!("content of {}", id).into_bytes(),
        );
    }

    pub fn insert(&self, record: FileRecord, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .insert(record.id.clone(), StoredFile { record, data });
    }

    pub fn file(&self, id: &str) -> Option<FileRecord> {
        let state = self.state.lock().unwrap();
        state.files.get(id).map(|f| f.record.clone())
    }

    pub fn property(&self, id: &str, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.properties.get(id).and_then(|p| p.get(key).cloned())
    }

    pub fn set_marker(&self, id: &str, key: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .properties
            .entry(id.into())
            .or_default()
            .insert(key.into(), "true".into());
    }

    /// Next `n` downloads fail with a transient network error
    pub fn fail_downloads(&self, n: u32) {
        self.state.lock().unwrap().download_failures = n;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn get_file(&self, file_id: &str) -> ProviderResult<FileRecord> {
        self.record(format!("get_file {}", file_id));
        self.file(file_id)
            .ok_or_else(|| ProviderError::NotFound(file_id.into()))
    }

    async fn download(&self, file_id: &str) -> ProviderResult<Vec<u8>> {
        self.record(format!("download {}", file_id));
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.download_failures > 0 {
            state.download_failures -= 1;
            return Err(ProviderError::Network("connection reset".into()));
        }
        state
            .files
            .get(file_id)
            .map(|f| f.data.clone())
            .ok_or_else(|| ProviderError::NotFound(file_id.into()))
    }

    async fn rename(&self, file_id: &str, new_name: &str) -> ProviderResult<()> {
        self.record(format!("rename {} {}", file_id, new_name));
        let mut state = self.state.lock().unwrap();
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| ProviderError::NotFound(file_id.into()))?;
        file.record.name = new_name.into();
        Ok(())
    }

    async fn move_to(&self, file_id: &str, new_parent: &str) -> ProviderResult<()> {
        self.record(format!("move_to {} {}", file_id, new_parent));
        let mut state = self.state.lock().unwrap();
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| ProviderError::NotFound(file_id.into()))?;
        file.record.parents = vec![new_parent.into()];
        Ok(())
    }

    async fn list_folder(&self, folder_id: &str, limit: u32) -> ProviderResult<Vec<FileRecord>> {
        self.record(format!("list_folder {}", folder_id));
        let state = self.state.lock().unwrap();
        let mut files: Vec<FileRecord> = state
            .files
            .values()
            .map(|f| f.record.clone())
            .filter(|r| r.is_in(folder_id) && !r.trashed && r.mime_type != FOLDER_MIME_TYPE)
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        files.truncate(limit as usize);
        Ok(files)
    }

    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: Option<&str>,
    ) -> ProviderResult<Option<FileRecord>> {
        self.record(format!("find_child {} {}", parent_id, name));
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .values()
            .map(|f| &f.record)
            .find(|r| {
                r.is_in(parent_id)
                    && r.name == name
                    && !r.trashed
                    && mime_type.map_or(true, |m| r.mime_type == m)
            })
            .cloned())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> ProviderResult<String> {
        self.record(format!("create_folder {} {}", parent_id, name));
        let id = format!("{}/{}", parent_id, name);
        self.insert(
            FileRecord {
                id: id.clone(),
                name: name.into(),
                mime_type: FOLDER_MIME_TYPE.into(),
                parents: vec![parent_id.into()],
                trashed: false,
            },
            Vec::new(),
        );
        Ok(id)
    }

    async fn get_properties(&self, file_id: &str) -> ProviderResult<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        Ok(state.properties.get(file_id).cloned().unwrap_or_default())
    }

    async fn set_property(&self, file_id: &str, key: &str, value: &str) -> ProviderResult<()> {
        self.record(format!("set_property {} {}", file_id, key));
        let mut state = self.state.lock().unwrap();
        state
            .properties
            .entry(file_id.into())
            .or_default()
            .insert(key.into(), value.into());
        Ok(())
    }
}

#[derive(Default)]
struct DocumentState {
    contents: HashMap<String, String>,
    created: Vec<String>,
    append_attempts: usize,
    failures_left: u32,
    always_fail: bool,
}

/// Composite documents; new documents also appear in the storage tree
pub struct MemoryDocuments {
    storage: Arc<MemoryStorage>,
    state: Mutex<DocumentState>,
}

impl MemoryDocuments {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            state: Mutex::new(DocumentState::default()),
        }
    }

    /// Register an already existing document under `parent`
    pub fn seed(&self, id: &str, parent: &str, name: &str) {
        self.storage.insert(
            FileRecord {
                id: id.into(),
                name: name.into(),
                mime_type: DOCUMENT_MIME_TYPE.into(),
                parents: vec![parent.into()],
                trashed: false,
            },
            Vec::new(),
        );
        self.state
            .lock()
            .unwrap()
            .contents
            .insert(id.into(), String::new());
    }

    /// Next `n` appends fail with a conflict
    pub fn fail_next_appends(&self, n: u32) {
        self.state.lock().unwrap().failures_left = n;
    }

    pub fn fail_all_appends(&self) {
        self.state.lock().unwrap().always_fail = true;
    }

    pub fn content(&self, id: &str) -> Option<String> {
        self.state.lock().unwrap().contents.get(id).cloned()
    }

    /// Names of documents created, in order
    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn append_attempts(&self) -> usize {
        self.state.lock().unwrap().append_attempts
    }
}

#[async_trait]
impl DocumentProvider for MemoryDocuments {
    async fn create_document(&self, parent_id: &str, name: &str) -> ProviderResult<String> {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = format!("doc-{}", state.created.len() + 1);
            state.created.push(name.into());
            state.contents.insert(id.clone(), String::new());
            id
        };
        self.storage.insert(
            FileRecord {
                id: id.clone(),
                name: name.into(),
                mime_type: DOCUMENT_MIME_TYPE.into(),
                parents: vec![parent_id.into()],
                trashed: false,
            },
            Vec::new(),
        );
        Ok(id)
    }

    async fn append_text(&self, document_id: &str, text: &str) -> ProviderResult<()> {
        // Yield so concurrent appenders would interleave without the lock
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.append_attempts += 1;
        if state.always_fail {
            return Err(ProviderError::Conflict("document busy".into()));
        }
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(ProviderError::Conflict("document busy".into()));
        }
        let content = state
            .contents
            .get_mut(document_id)
            .ok_or_else(|| ProviderError::NotFound(document_id.into()))?;
        content.push_str(text);
        Ok(())
    }
}

/// Which prompt a model call answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Analysis,
    Ocr,
    Events,
}

fn prompt_kind(prompt: &str) -> PromptKind {
    if prompt.contains("\"ocr_text\"") {
        PromptKind::Ocr
    } else if prompt.contains("\"events\"") {
        PromptKind::Events
    } else {
        PromptKind::Analysis
    }
}

/// Model answering by prompt kind; `None` answers fail
pub struct ScriptedModel {
    analysis: Mutex<Option<String>>,
    ocr: Mutex<Option<String>>,
    events: Mutex<Option<String>>,
    calls: Mutex<Vec<(String, PromptKind)>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self {
            analysis: Mutex::new(Some(NOTICE_ANALYSIS.into())),
            ocr: Mutex::new(Some(notice_ocr())),
            events: Mutex::new(Some(NOTICE_EVENTS.into())),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedModel {
    pub fn set_analysis(&self, answer: Option<&str>) {
        *self.analysis.lock().unwrap() = answer.map(str::to_string);
    }

    pub fn set_events(&self, answer: Option<&str>) {
        *self.events.lock().unwrap() = answer.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<(String, PromptKind)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: PromptKind) -> usize {
        self.calls().iter().filter(|(_, k)| *k == kind).count()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn generate(
        &self,
        model: &str,
        _data: &[u8],
        _mime_type: &str,
        prompt: &str,
        _json_response: bool,
    ) -> ProviderResult<String> {
        let kind = prompt_kind(prompt);
        self.calls.lock().unwrap().push((model.to_string(), kind));
        let answer = match kind {
            PromptKind::Analysis => self.analysis.lock().unwrap().clone(),
            PromptKind::Ocr => self.ocr.lock().unwrap().clone(),
            PromptKind::Events => self.events.lock().unwrap().clone(),
        };
        answer.ok_or_else(|| ProviderError::Api {
            status: 400,
            message: "model refused".into(),
        })
    }
}

#[derive(Default)]
pub struct RecordingCalendar {
    pub existing: Mutex<HashSet<(String, NaiveDate)>>,
    pub created: Mutex<Vec<(Event, String)>>,
}

#[async_trait]
impl CalendarProvider for RecordingCalendar {
    async fn event_exists(&self, title: &str, date: NaiveDate) -> ProviderResult<bool> {
        Ok(self
            .existing
            .lock()
            .unwrap()
            .contains(&(title.to_string(), date)))
    }

    async fn create_event(&self, event: &Event, notes: &str) -> ProviderResult<String> {
        let mut created = self.created.lock().unwrap();
        created.push((event.clone(), notes.to_string()));
        Ok(format!("event-{}", created.len()))
    }
}

#[derive(Default)]
pub struct RecordingTasks {
    pub created: Mutex<Vec<(Task, String)>>,
}

#[async_trait]
impl TaskProvider for RecordingTasks {
    async fn task_exists(&self, _title: &str, _due: NaiveDate) -> ProviderResult<bool> {
        Ok(false)
    }

    async fn create_task(&self, task: &Task, notes: &str) -> ProviderResult<String> {
        let mut created = self.created.lock().unwrap();
        created.push((task.clone(), notes.to_string()));
        Ok(format!("task-{}", created.len()))
    }
}

#[derive(Default)]
pub struct RecordingPhotos {
    pub uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl PhotoProvider for RecordingPhotos {
    async fn upload_image(&self, _data: &[u8], description: &str) -> ProviderResult<String> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(description.to_string());
        Ok(format!("media-{}", uploads.len()))
    }
}

/// Converter yielding a fixed number of pages
pub struct FixedConverter(pub usize);

#[async_trait]
impl PageConverter for FixedConverter {
    async fn convert(&self, _pdf: &[u8], _dpi: u32) -> ProviderResult<Vec<Vec<u8>>> {
        Ok(vec![b"jpeg".to_vec(); self.0])
    }
}

#[derive(Default)]
struct FeedState {
    tokens_issued: u32,
    pages: HashMap<String, ChangePage>,
    invalid_tokens: HashSet<String>,
    watches: Vec<String>,
    stopped: Vec<String>,
    listed: Vec<String>,
    fail_watch: bool,
    fail_stop: bool,
}

/// Change feed issuing `token-1`, `token-2`, … as start tokens
#[derive(Default)]
pub struct MemoryFeed {
    state: Mutex<FeedState>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, token: &str, page: ChangePage) {
        self.state.lock().unwrap().pages.insert(token.into(), page);
    }

    pub fn invalidate(&self, token: &str) {
        self.state
            .lock()
            .unwrap()
            .invalid_tokens
            .insert(token.into());
    }

    pub fn fail_watch(&self, fail: bool) {
        self.state.lock().unwrap().fail_watch = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.state.lock().unwrap().fail_stop = fail;
    }

    /// Channel ids registered, in order
    pub fn watches(&self) -> Vec<String> {
        self.state.lock().unwrap().watches.clone()
    }

    /// Channel ids stopped, in order
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Tokens passed to `list_changes`, in order
    pub fn listed(&self) -> Vec<String> {
        self.state.lock().unwrap().listed.clone()
    }
}

#[async_trait]
impl ChangeFeedProvider for MemoryFeed {
    async fn start_page_token(&self) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        state.tokens_issued += 1;
        Ok(format!("token-{}", state.tokens_issued))
    }

    async fn watch_changes(
        &self,
        _page_token: &str,
        channel_id: &str,
        _address: &str,
        expiration: DateTime<Utc>,
        _channel_token: Option<&str>,
    ) -> ProviderResult<WatchRegistration> {
        let mut state = self.state.lock().unwrap();
        if state.fail_watch {
            return Err(ProviderError::Api {
                status: 503,
                message: "watch unavailable".into(),
            });
        }
        state.watches.push(channel_id.into());
        Ok(WatchRegistration {
            channel_id: channel_id.into(),
            resource_id: format!("res-{}", state.watches.len()),
            expiration,
        })
    }

    async fn stop_channel(&self, channel_id: &str, _resource_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stop {
            return Err(ProviderError::Network("stop timed out".into()));
        }
        state.stopped.push(channel_id.into());
        Ok(())
    }

    async fn list_changes(&self, page_token: &str) -> ProviderResult<ChangePage> {
        let mut state = self.state.lock().unwrap();
        state.listed.push(page_token.into());
        if state.invalid_tokens.contains(page_token) {
            return Err(ProviderError::NotFound(format!("page token {}", page_token)));
        }
        Ok(state.pages.get(page_token).cloned().unwrap_or_else(|| ChangePage {
            changes: Vec::new(),
            next_page_token: None,
            new_start_page_token: Some(page_token.to_string()),
        }))
    }
}

/// Every fake plus the settings they are wired with
pub struct Harness {
    pub settings: Arc<IngestSettings>,
    pub storage: Arc<MemoryStorage>,
    pub documents: Arc<MemoryDocuments>,
    pub model: Arc<ScriptedModel>,
    pub calendar: Arc<RecordingCalendar>,
    pub tasks: Arc<RecordingTasks>,
    pub photos: Arc<RecordingPhotos>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_settings(), MemoryStorage::new())
    }

    pub fn with(settings: IngestSettings, storage: MemoryStorage) -> Self {
        let storage = Arc::new(storage);
        Self {
            settings: Arc::new(settings),
            documents: Arc::new(MemoryDocuments::new(Arc::clone(&storage))),
            storage,
            model: Arc::new(ScriptedModel::default()),
            calendar: Arc::new(RecordingCalendar::default()),
            tasks: Arc::new(RecordingTasks::default()),
            photos: Arc::new(RecordingPhotos::default()),
        }
    }

    pub fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::clone(&self.settings),
            PipelineProviders {
                storage: self.storage.clone(),
                documents: self.documents.clone(),
                model: self.model.clone(),
                converter: Arc::new(FixedConverter(2)),
                calendar: Some(self.calendar.clone()),
                tasks: Some(self.tasks.clone()),
                photos: Some(self.photos.clone()),
            },
        )
    }
}
