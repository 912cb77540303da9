//! Data models for hdm-ingest

pub mod category;
pub mod classification;
pub mod file_record;
pub mod process_result;
pub mod watch;

pub use category::{Category, FallbackPolicy, SubCategory};
pub use classification::{
    ClassificationResult, Event, EventsAndTasks, ModelClassification, OcrBundle, OcrQuality, Task,
};
pub use file_record::{view_url, ChangePage, FileChange, FileRecord};
pub use process_result::{ProcessResult, SkipReason};
pub use watch::{WatchRegistration, WatchState, WatchStatus};
