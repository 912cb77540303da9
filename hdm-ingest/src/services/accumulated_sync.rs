//! Accumulated-document sync
//!
//! Extracted text from every synced file is appended to one composite
//! document per (fiscal year, category), named `<fy>年度_<key>`. The
//! document is created on first use and only ever appended to.
//!
//! All appends in the process funnel through one lock: concurrent
//! appenders would race on the end-of-document position. A document's
//! header goes out in the same append as its first entry; until that
//! append lands, the document stays in the lock's headerless set.

use super::SyncError;
use crate::models::{view_url, Category};
use crate::providers::docs_client::DOCUMENT_MIME_TYPE;
use crate::providers::{DocumentProvider, ProviderError, StorageProvider};
use crate::utils::RetryPolicy;
use chrono::NaiveDate;
use hdm_common::time::format_slash_date;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Persisted file property set after a successful append
pub const SYNCED_PROPERTY: &str = "notebooklm_synced";

/// One file's contribution to a composite document
#[derive(Debug, Clone)]
pub struct SyncEntry<'a> {
    pub file_id: &'a str,
    pub file_name: &'a str,
    pub category: Category,
    pub ocr_text: &'a str,
    pub facts: &'a [String],
    pub summary: Option<&'a str>,
    pub date: NaiveDate,
    pub fiscal_year: i32,
}

pub fn document_name(fiscal_year: i32, key: &str) -> String {
    format!("{}年度_{}", fiscal_year, key)
}

/// First text of a newly created composite document
pub fn document_header(fiscal_year: i32, key: &str) -> String {
    format!(
        "# {}年度 {}\n\n\
         > 書類OCRテキストを自動で追記する統合ドキュメントです。\n\
         > 各エントリには [カテゴリ名] と元ファイルへのリンクが付与されています。\n\n",
        fiscal_year, key
    )
}

/// Markdown-like entry appended for one file
pub fn format_entry(entry: &SyncEntry<'_>) -> String {
    let mut text = String::new();
    let _ = write!(
        text,
        "\n---\n\n## 📄 {} - [{}] {}\n\n🔗 [元ファイルを開く]({})\n\n",
        format_slash_date(entry.date),
        entry.category.label(),
        entry.file_name,
        view_url(entry.file_id),
    );

    if !entry.facts.is_empty() {
        text.push_str("### 要点\n");
        for fact in entry.facts {
            let _ = writeln!(text, "- {}", fact.trim());
        }
        text.push('\n');
    }
    if let Some(summary) = entry.summary.map(str::trim).filter(|s| !s.is_empty()) {
        let _ = write!(text, "### 要約\n{}\n\n", summary);
    }
    let _ = write!(text, "### 全文\n{}\n\n", entry.ocr_text.trim());
    text
}

pub struct AccumulatedDocumentSync {
    storage: Arc<dyn StorageProvider>,
    documents: Arc<dyn DocumentProvider>,
    /// Parent container of every composite document
    folder_id: String,
    retry: RetryPolicy,
    /// Ids of documents created here whose header has not been written
    headerless: Mutex<HashSet<String>>,
}

impl AccumulatedDocumentSync {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        documents: Arc<dyn DocumentProvider>,
        folder_id: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            documents,
            folder_id,
            retry,
            headerless: Mutex::new(HashSet::new()),
        }
    }

    /// Has this file already been folded into a composite document?
    ///
    /// A failed lookup counts as "not synced".
    pub async fn is_already_synced(&self, file_id: &str) -> bool {
        match self.storage.get_properties(file_id).await {
            Ok(props) => props.get(SYNCED_PROPERTY).is_some_and(|v| v == "true"),
            Err(e) => {
                warn!(file_id, error = %e, "Synced-marker lookup failed");
                false
            }
        }
    }

    /// Append one entry and mark the source file as synced
    pub async fn sync_entry(
        &self,
        entry: &SyncEntry<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let key = entry
            .category
            .notebook_key()
            .ok_or(SyncError::NotSyncable(entry.category))?;
        if self.folder_id.trim().is_empty() {
            return Err(SyncError::NotConfigured);
        }

        let mut headerless = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            guard = self.headerless.lock() => guard,
        };

        let doc_id = self
            .get_or_create_document(entry.fiscal_year, key, &mut headerless)
            .await?;
        let mut text = String::new();
        if headerless.contains(&doc_id) {
            text.push_str(&document_header(entry.fiscal_year, key));
        }
        text.push_str(&format_entry(entry));

        self.append(&doc_id, &text, cancel).await?;
        headerless.remove(&doc_id);
        self.mark_synced(entry.file_id).await;

        info!(
            file_id = entry.file_id,
            document = %document_name(entry.fiscal_year, key),
            "File synced to accumulated document"
        );
        Ok(())
    }

    async fn get_or_create_document(
        &self,
        fiscal_year: i32,
        key: &str,
        headerless: &mut HashSet<String>,
    ) -> Result<String, SyncError> {
        let name = document_name(fiscal_year, key);
        if let Some(existing) = self
            .storage
            .find_child(&self.folder_id, &name, Some(DOCUMENT_MIME_TYPE))
            .await?
        {
            debug!(document = %name, doc_id = %existing.id, "Using existing accumulated document");
            return Ok(existing.id);
        }

        let doc_id = self.documents.create_document(&self.folder_id, &name).await?;
        info!(document = %name, doc_id = %doc_id, "Accumulated document created");
        headerless.insert(doc_id.clone());
        Ok(doc_id)
    }

    async fn append(
        &self,
        doc_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        self.retry
            .run("append_text", cancel, ProviderError::is_retryable, || {
                self.documents.append_text(doc_id, text)
            })
            .await?;
        Ok(())
    }

    /// Best effort: a missing marker only costs a repeated OCR next time
    async fn mark_synced(&self, file_id: &str) {
        if let Err(e) = self
            .storage
            .set_property(file_id, SYNCED_PROPERTY, "true")
            .await
        {
            warn!(file_id, error = %e, "Failed to set synced marker");
        }
    }
}
