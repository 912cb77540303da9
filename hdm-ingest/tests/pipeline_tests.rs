//! End-to-end pipeline tests against in-memory providers

mod helpers;

use helpers::*;
use hdm_ingest::models::{ProcessResult, SkipReason};
use hdm_ingest::services::{PROCESSED_PROPERTY, SYNCED_PROPERTY};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NOTICE_FOLDER: &str = "EDU/A/2024年度/01_お便り・スケジュール";

#[tokio::test]
async fn test_notice_is_filed_and_followed_up() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    let pipeline = harness.pipeline();

    let result = pipeline
        .process_file("doc1", &CancellationToken::new())
        .await;
    assert_eq!(result, ProcessResult::Processed);

    let file = harness.storage.file("doc1").unwrap();
    assert_eq!(file.name, "20250115_遠足.pdf");
    assert_eq!(file.parents, vec![NOTICE_FOLDER.to_string()]);
    assert_eq!(
        harness.storage.property("doc1", PROCESSED_PROPERTY).as_deref(),
        Some("true")
    );

    // Calendar and tasks carry the grade prefix and a link back
    let events = harness.calendar.created.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.title, "[小2] 遠足");
    assert!(events[0].1.contains("https://drive.google.com/file/d/doc1/view"));
    let tasks = harness.tasks.created.lock().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].0.title, "[小2] 参加票の提出");
    assert!(tasks[0].1.ends_with("\n\n担任まで"));

    // Notices are not photo material
    assert!(harness.photos.uploads.lock().unwrap().is_empty());

    // Accumulated document created once, header first
    assert_eq!(harness.documents.created(), vec!["2024年度_children"]);
    let content = harness.documents.content("doc-1").unwrap();
    assert!(content.starts_with("# 2024年度 children"));
    assert!(content.contains("20250115_遠足.pdf"));
    assert!(content.contains("- 持ち物: 弁当"));
    assert_eq!(
        harness.storage.property("doc1", SYNCED_PROPERTY).as_deref(),
        Some("true")
    );
}

#[tokio::test]
async fn test_concurrent_attempts_admit_one() {
    let harness = Harness::with(
        test_settings(),
        MemoryStorage::new().with_download_delay(Duration::from_millis(50)),
    );
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    let pipeline = Arc::new(harness.pipeline());
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        pipeline.process_file("doc1", &cancel),
        pipeline.process_file("doc1", &cancel)
    );

    let mut results = vec![first, second];
    results.sort_by_key(|r| r.as_str());
    assert_eq!(results[0], ProcessResult::Processed);
    assert_eq!(results[1], ProcessResult::Skipped(SkipReason::InFlight));
    assert_eq!(harness.storage.count_calls("download"), 1);
    assert_eq!(harness.storage.count_calls("move_to"), 1);
    assert_eq!(pipeline.gate().in_flight_count(), 0);
}

#[tokio::test]
async fn test_processed_marker_stops_a_second_run() {
    let mut settings = test_settings();
    settings.sync.enabled = false;
    let harness = Harness::with(settings, MemoryStorage::new());
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();

    assert_eq!(
        pipeline.process_file("doc1", &cancel).await,
        ProcessResult::Processed
    );

    // Someone drops the filed document back into the inbox
    harness
        .storage
        .add_file("doc1", "20250115_遠足.pdf", PDF, INBOX);
    assert_eq!(
        pipeline.process_file("doc1", &cancel).await,
        ProcessResult::Skipped(SkipReason::AlreadyProcessed)
    );
    assert_eq!(harness.storage.count_calls("download"), 1);
    assert_eq!(harness.model.count(PromptKind::Analysis), 1);
}

#[tokio::test]
async fn test_synced_marker_skips_before_download() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    harness.storage.set_marker("doc1", SYNCED_PROPERTY);

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(result, ProcessResult::Skipped(SkipReason::AlreadySynced));
    assert_eq!(harness.storage.count_calls("download"), 0);
    assert!(harness.storage.property("doc1", PROCESSED_PROPERTY).is_none());
}

#[tokio::test]
async fn test_file_outside_inbox_is_skipped() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, "elsewhere");

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(result, ProcessResult::Skipped(SkipReason::NotInInbox));
    assert!(harness.storage.property("doc1", PROCESSED_PROPERTY).is_none());
}

#[tokio::test]
async fn test_unsupported_media_type_is_skipped_without_download() {
    let harness = Harness::new();
    harness
        .storage
        .add_file("doc1", "notes.txt", "text/plain", INBOX);

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(
        result,
        ProcessResult::Skipped(SkipReason::UnsupportedMimeType("text/plain".into()))
    );
    assert_eq!(harness.storage.count_calls("download"), 0);
    assert!(harness.model.calls().is_empty());
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let harness = Harness::new();

    let result = harness
        .pipeline()
        .process_file("ghost", &CancellationToken::new())
        .await;

    assert!(matches!(result, ProcessResult::Error(_)));
}

#[tokio::test]
async fn test_classification_failure_leaves_file_in_inbox() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    harness.model.set_analysis(None);

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert!(matches!(result, ProcessResult::Error(_)));
    let file = harness.storage.file("doc1").unwrap();
    assert_eq!(file.name, "scan_001.pdf");
    assert!(file.is_in(INBOX));
    assert_eq!(harness.storage.count_calls("rename"), 0);
    assert_eq!(harness.storage.count_calls("move_to"), 0);
    // Low tier failed, so the high tier was tried too
    assert_eq!(harness.model.count(PromptKind::Analysis), 2);
}

#[tokio::test]
async fn test_unparsable_answer_is_an_error() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    harness.model.set_analysis(Some("I think this is a school letter"));

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert!(matches!(result, ProcessResult::Error(_)));
    assert!(harness.storage.file("doc1").unwrap().is_in(INBOX));
}

#[tokio::test]
async fn test_transient_download_failures_are_retried() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    harness.storage.fail_downloads(2);

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(result, ProcessResult::Processed);
    assert_eq!(harness.storage.count_calls("download"), 3);
}

#[tokio::test]
async fn test_download_retry_ceiling() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    harness.storage.fail_downloads(10);

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert!(matches!(result, ProcessResult::Error(_)));
    assert_eq!(harness.storage.count_calls("download"), 3);
    assert!(harness.storage.file("doc1").unwrap().is_in(INBOX));
}

#[tokio::test]
async fn test_unconfigured_base_folder_is_an_error() {
    let mut settings = test_settings();
    settings.folders.children_education = String::new();
    let harness = Harness::with(settings, MemoryStorage::new());
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert!(matches!(result, ProcessResult::Error(_)));
    assert!(harness.storage.file("doc1").unwrap().is_in(INBOX));
}

#[tokio::test]
async fn test_photo_goes_to_photo_container_and_uploads_pages() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_002.pdf", PDF, INBOX);
    harness.model.set_analysis(Some(
        r#"{"category": "50_写真・その他", "is_photo": true, "date": "20250301",
            "summary": "家族写真", "confidence_score": 0.95}"#,
    ));

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(result, ProcessResult::Processed);
    assert!(harness.storage.file("doc1").unwrap().is_in(PHOTO));
    let uploads = harness.photos.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 2);
    assert!(uploads[1].ends_with("(Page 2/2)"));
    // Photos are never synced and get no calendar entries
    assert!(harness.documents.created().is_empty());
    assert_eq!(harness.model.count(PromptKind::Events), 0);
}

#[tokio::test]
async fn test_side_effect_failure_keeps_processed() {
    let harness = Harness::new();
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    harness.model.set_events(None);
    harness.documents.fail_all_appends();

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(result, ProcessResult::Processed);
    assert!(harness.storage.file("doc1").unwrap().is_in(NOTICE_FOLDER));
    assert!(harness.storage.property("doc1", SYNCED_PROPERTY).is_none());
    assert_eq!(harness.storage.count_calls("move_to"), 1);
}

#[tokio::test]
async fn test_graduated_child_goes_to_life_admin() {
    let mut settings = test_settings();
    settings.grades.children[0].base_grade = 12;
    let harness = Harness::with(settings, MemoryStorage::new());
    harness.storage.add_file("doc1", "scan_001.pdf", PDF, INBOX);
    // 2025-05 is fiscal 2025: grade 13
    harness.model.set_analysis(Some(
        r#"{"category": "40_子供・教育", "child_name": "A", "date": "20250510",
            "summary": "同窓会", "confidence_score": 0.9}"#,
    ));

    let result = harness
        .pipeline()
        .process_file("doc1", &CancellationToken::new())
        .await;

    assert_eq!(result, ProcessResult::Processed);
    assert!(harness.storage.file("doc1").unwrap().is_in("LIFE/2025年度"));
    let events = harness.calendar.created.lock().unwrap().clone();
    assert!(events.iter().all(|(e, _)| e.title.starts_with("[A] ")));
}

#[tokio::test]
async fn test_inbox_batch_tally() {
    let harness = Harness::new();
    harness.storage.add_file("a1", "scan_a.pdf", PDF, INBOX);
    harness.storage.add_file("b2", "scan_b.pdf", PDF, INBOX);
    harness.storage.add_file("c3", "notes.txt", "text/plain", INBOX);
    harness.storage.set_marker("b2", PROCESSED_PROPERTY);

    let tally = harness
        .pipeline()
        .process_inbox(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tally.processed, 3);
    assert_eq!(tally.skipped, 2);
    assert_eq!(tally.errors, 0);
    let ids: Vec<&str> = tally.details.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "b2", "c3"]);
    assert_eq!(tally.details[0].result, ProcessResult::Processed);
}

#[tokio::test]
async fn test_cancelled_batch_stops_early() {
    let harness = Harness::new();
    harness.storage.add_file("a1", "scan_a.pdf", PDF, INBOX);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = harness
        .pipeline()
        .process_files(&["a1".to_string()], &cancel)
        .await;

    assert!(results.is_empty());
    assert!(harness.storage.file("a1").unwrap().is_in(INBOX));
}
