//! Ingestion services
//!
//! Leaves first: change feed, admission gate, model routing, destination
//! resolution, accumulated-document sync, side effects; the pipeline
//! composes them.

pub mod accumulated_sync;
pub mod change_feed;
pub mod classification_router;
pub mod dedup_gate;
pub mod destination_resolver;
pub mod grade_book;
pub mod ingestion_pipeline;
pub mod prompts;
pub mod side_effects;

pub use accumulated_sync::{AccumulatedDocumentSync, SyncEntry, SYNCED_PROPERTY};
pub use change_feed::{ChangeFeedTracker, TrackerError};
pub use classification_router::ClassificationRouter;
pub use dedup_gate::{Admission, DeduplicationGate, PROCESSED_PROPERTY};
pub use destination_resolver::{DestinationResolver, ResolveError};
pub use grade_book::GradeBook;
pub use ingestion_pipeline::{BatchEntry, BatchTally, IngestionPipeline, PipelineProviders};
pub use side_effects::{SideEffectCoordinator, SideEffectReport};

use crate::models::Category;
use crate::providers::ProviderError;
use crate::utils::RetryError;
use thiserror::Error;

/// Model routing failure (both tiers, or an unusable answer)
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Unparsable model response: {0}")]
    Parse(String),
}

/// Accumulated-document sync failure
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Category {0} has no accumulated document")]
    NotSyncable(Category),

    #[error("Accumulated-sync folder not configured")]
    NotConfigured,

    #[error("Sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Append failed: {0}")]
    Append(#[from] RetryError<ProviderError>),
}
