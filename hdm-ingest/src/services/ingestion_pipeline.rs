//! End-to-end per-file ingestion
//!
//! **Order of one attempt:**
//! 1. Admit through the in-process gate (refused → Skipped)
//! 2. Fetch the file snapshot (failure → Error)
//! 3. Still in the inbox? (no → Skipped)
//! 4. Persisted synced/processed markers (set → Skipped)
//! 5. Write the processed marker
//! 6. Media type allow-listed? (no → Skipped)
//! 7. Download with retry (failure → Error)
//! 8. Classify, children post-processing, resolve destination (failure → Error)
//! 9. Rename, then move (failure → Error)
//! 10. Side effects (best effort) → Processed
//!
//! The processed marker is written before the heavy work so a second
//! instance handling the same change backs off. A crash between steps 5
//! and 9 leaves the file marked but still in the inbox.

use super::accumulated_sync::{AccumulatedDocumentSync, SYNCED_PROPERTY};
use super::classification_router::ClassificationRouter;
use super::dedup_gate::{DeduplicationGate, PROCESSED_PROPERTY};
use super::destination_resolver::{file_name, DestinationResolver};
use super::grade_book::GradeBook;
use super::prompts;
use super::side_effects::{SideEffectCoordinator, SideEffectInput};
use crate::config::IngestSettings;
use crate::models::{FileRecord, ProcessResult, SkipReason};
use crate::providers::{
    CalendarProvider, DocumentProvider, FolderCache, ModelProvider, PageConverter, PhotoProvider,
    ProviderError, StorageProvider, TaskProvider,
};
use hdm_common::time::today;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Every collaborator the pipeline needs
pub struct PipelineProviders {
    pub storage: Arc<dyn StorageProvider>,
    pub documents: Arc<dyn DocumentProvider>,
    pub model: Arc<dyn ModelProvider>,
    pub converter: Arc<dyn PageConverter>,
    pub calendar: Option<Arc<dyn CalendarProvider>>,
    pub tasks: Option<Arc<dyn TaskProvider>>,
    pub photos: Option<Arc<dyn PhotoProvider>>,
}

/// One inbox entry of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub id: String,
    pub name: String,
    pub result: ProcessResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Batch trigger summary
///
/// `processed` counts every successful outcome (Processed and Skipped);
/// `skipped` breaks out the Skipped share.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchTally {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub details: Vec<BatchEntry>,
}

impl BatchTally {
    fn record(&mut self, file: &FileRecord, result: ProcessResult) {
        match &result {
            ProcessResult::Processed => self.processed += 1,
            ProcessResult::Skipped(_) => {
                self.processed += 1;
                self.skipped += 1;
            }
            ProcessResult::Error(_) => self.errors += 1,
        }
        let detail = match &result {
            ProcessResult::Processed => None,
            ProcessResult::Skipped(reason) => Some(reason.to_string()),
            ProcessResult::Error(message) => Some(message.clone()),
        };
        self.details.push(BatchEntry {
            id: file.id.clone(),
            name: file.name.clone(),
            result,
            detail,
        });
    }
}

fn flag_set(properties: &HashMap<String, String>, key: &str) -> bool {
    properties.get(key).is_some_and(|v| v == "true")
}

pub struct IngestionPipeline {
    settings: Arc<IngestSettings>,
    storage: Arc<dyn StorageProvider>,
    gate: DeduplicationGate,
    router: Arc<ClassificationRouter>,
    resolver: DestinationResolver,
    side_effects: SideEffectCoordinator,
}

impl IngestionPipeline {
    pub fn new(settings: Arc<IngestSettings>, providers: PipelineProviders) -> Self {
        let grades = Arc::new(GradeBook::new(settings.grades.clone()));
        let router = Arc::new(ClassificationRouter::new(
            providers.model,
            settings.router.clone(),
        ));
        let folders = Arc::new(FolderCache::new(Arc::clone(&providers.storage)));
        let resolver =
            DestinationResolver::new(Arc::clone(&settings), Arc::clone(&grades), folders);
        let sync = Arc::new(AccumulatedDocumentSync::new(
            Arc::clone(&providers.storage),
            providers.documents,
            settings.folders.accumulated_sync.clone(),
            settings.sync.retry_policy(),
        ));

        let mut side_effects = SideEffectCoordinator::new(
            Arc::clone(&settings),
            Arc::clone(&router),
            grades,
            sync,
            providers.converter,
        );
        if let Some(calendar) = providers.calendar {
            side_effects = side_effects.with_calendar(calendar);
        }
        if let Some(tasks) = providers.tasks {
            side_effects = side_effects.with_tasks(tasks);
        }
        if let Some(photos) = providers.photos {
            side_effects = side_effects.with_photos(photos);
        }

        Self {
            settings,
            storage: providers.storage,
            gate: DeduplicationGate::new(),
            router,
            resolver,
            side_effects,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn gate(&self) -> &DeduplicationGate {
        &self.gate
    }

    /// Run one ingestion attempt; never panics, always yields a terminal result
    pub async fn process_file(&self, file_id: &str, cancel: &CancellationToken) -> ProcessResult {
        let Some(_admission) = self.gate.try_admit(file_id) else {
            return ProcessResult::Skipped(SkipReason::InFlight);
        };

        let result = self.attempt(file_id, cancel).await;
        match &result {
            ProcessResult::Processed => info!(file_id, "File processed"),
            ProcessResult::Skipped(reason) => info!(file_id, %reason, "File skipped"),
            ProcessResult::Error(message) => error!(file_id, error = %message, "File processing failed"),
        }
        result
    }

    async fn attempt(&self, file_id: &str, cancel: &CancellationToken) -> ProcessResult {
        let file = match self.storage.get_file(file_id).await {
            Ok(file) => file,
            Err(e) => return ProcessResult::Error(format!("fetch file: {}", e)),
        };

        if !file.is_in(&self.settings.folders.inbox) {
            return ProcessResult::Skipped(SkipReason::NotInInbox);
        }

        match self.storage.get_properties(file_id).await {
            Ok(properties) => {
                if flag_set(&properties, SYNCED_PROPERTY) {
                    return ProcessResult::Skipped(SkipReason::AlreadySynced);
                }
                if flag_set(&properties, PROCESSED_PROPERTY) {
                    return ProcessResult::Skipped(SkipReason::AlreadyProcessed);
                }
            }
            Err(e) => warn!(file_id, error = %e, "Marker lookup failed; continuing"),
        }

        if let Err(e) = self
            .storage
            .set_property(file_id, PROCESSED_PROPERTY, "true")
            .await
        {
            warn!(file_id, error = %e, "Failed to set processed marker; continuing");
        }

        if !self.settings.is_supported_mime_type(&file.mime_type) {
            return ProcessResult::Skipped(SkipReason::UnsupportedMimeType(file.mime_type));
        }

        let data = match self.download(file_id, cancel).await {
            Ok(data) => data,
            Err(message) => return ProcessResult::Error(message),
        };
        debug!(file_id, bytes = data.len(), "Downloaded");

        let today = today();
        let prompt = prompts::analysis_prompt(&self.settings.aliases, &file.name);
        let mut result = match self.router.classify(&data, &file.mime_type, &prompt).await {
            Ok(result) => result,
            Err(e) => return ProcessResult::Error(format!("classification: {}", e)),
        };

        self.resolver.resolve_children(&mut result, today);

        let destination = match self.resolver.resolve(&result, today).await {
            Ok(id) => id,
            Err(e) => return ProcessResult::Error(format!("destination: {}", e)),
        };

        let new_name = file_name(&result, &file, today);
        if let Err(e) = self.storage.rename(file_id, &new_name).await {
            return ProcessResult::Error(format!("rename: {}", e));
        }
        if let Err(e) = self.storage.move_to(file_id, &destination).await {
            return ProcessResult::Error(format!("move: {}", e));
        }
        info!(
            file_id,
            from = %file.name,
            to = %new_name,
            category = %result.category,
            destination = %destination,
            "File filed"
        );

        let input = SideEffectInput {
            file_id,
            file_name: &new_name,
            data: &data,
            mime_type: &file.mime_type,
            result: &result,
            today,
        };
        let report = self.side_effects.run(&input, cancel).await;
        if !report.failures.is_empty() {
            warn!(file_id, failures = ?report.failures, "Some side effects failed");
        }

        ProcessResult::Processed
    }

    async fn download(&self, file_id: &str, cancel: &CancellationToken) -> Result<Vec<u8>, String> {
        self.settings
            .download
            .retry_policy()
            .run("download", cancel, ProviderError::is_retryable, || {
                self.storage.download(file_id)
            })
            .await
            .map_err(|e| format!("download: {}", e))
    }

    /// Sequential attempts over explicit ids
    pub async fn process_files(
        &self,
        file_ids: &[String],
        cancel: &CancellationToken,
    ) -> Vec<(String, ProcessResult)> {
        let mut results = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            if cancel.is_cancelled() {
                warn!(remaining = file_ids.len() - results.len(), "Batch cancelled");
                break;
            }
            let result = self.process_file(file_id, cancel).await;
            results.push((file_id.clone(), result));
        }
        results
    }

    /// Run the pipeline over the inbox, at most one page of entries
    pub async fn process_inbox(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BatchTally, ProviderError> {
        let files = self
            .storage
            .list_folder(&self.settings.folders.inbox, self.settings.batch_page_size)
            .await?;
        info!(count = files.len(), "Batch run over inbox");

        let mut tally = BatchTally::default();
        for file in &files {
            if cancel.is_cancelled() {
                warn!("Batch cancelled");
                break;
            }
            let result = self.process_file(&file.id, cancel).await;
            tally.record(file, result);
        }

        info!(
            processed = tally.processed,
            skipped = tally.skipped,
            errors = tally.errors,
            "Batch run finished"
        );
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts() {
        let file = |id: &str| FileRecord {
            id: id.into(),
            name: format!("{}.pdf", id),
            ..Default::default()
        };
        let mut tally = BatchTally::default();
        tally.record(&file("a"), ProcessResult::Processed);
        tally.record(&file("b"), ProcessResult::Skipped(SkipReason::AlreadyProcessed));
        tally.record(&file("c"), ProcessResult::Error("boom".into()));

        assert_eq!(tally.processed, 2);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.errors, 1);

        let json = serde_json::to_value(&tally).unwrap();
        assert_eq!(json["details"][0]["result"], "PROCESSED");
        assert!(json["details"][0].get("detail").is_none());
        assert_eq!(json["details"][1]["detail"], "already processed");
        assert_eq!(json["details"][2]["result"], "ERROR");
    }
}
