//! End-to-end: filesystem source → job queue → update checker → archive

mod common;

use std::fs::File;
use std::sync::Arc;

use flate2::read::GzDecoder;

use common::{indexed_ids, wait_until, FinishedRecorder, TestSetup};
use indexkeeper::archive::WRITE_LOCK_FILE;
use indexkeeper::{ArchiveOutcome, IndexError};

fn archive_entries(path: &std::path::Path) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    let mut names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Update rounds through the queue
// ============================================================================

#[test]
fn test_update_round_indexes_and_archives() {
    let setup = TestSetup::new();
    setup
        .add_file("a.md", "alpha")
        .add_file("nested/b.txt", "beta")
        .add_file("skipped.bin", "binary");

    let controller = setup.controller(r#"receivers = ["compress_index"]"#);
    let recorder = FinishedRecorder::new();
    controller.events().register(recorder.clone());
    controller.start().unwrap();

    assert_eq!(controller.create_all_update_jobs().unwrap(), 1);
    assert!(wait_until(|| recorder.count() == 1));
    assert!(recorder.seen.lock()[0].modified);
    assert_eq!(recorder.seen.lock()[0].index, "docs");

    assert_eq!(indexed_ids(&controller, "docs"), vec!["a.md", "nested/b.txt"]);

    // The receiver archives on its own thread
    assert!(wait_until(|| setup.archive_path().exists()));
    assert!(wait_until(|| !setup.path().join("docs").join("docs.tmp").exists()));
    let entries = archive_entries(&setup.archive_path());
    assert!(entries.iter().any(|e| e.starts_with("index")));
    assert!(entries.iter().all(|e| !e.ends_with(WRITE_LOCK_FILE)));

    assert_eq!(controller.stop(), 0);
}

#[test]
fn test_second_round_applies_changes_and_deletions() {
    let setup = TestSetup::new();
    setup.add_file("a.md", "alpha").add_file("b.md", "beta");

    let controller = setup.controller("");
    let recorder = FinishedRecorder::new();
    controller.events().register(recorder.clone());
    controller.start().unwrap();

    controller.create_all_update_jobs().unwrap();
    assert!(wait_until(|| recorder.count() == 1));

    setup.remove_file("b.md");
    setup.add_file("c.md", "gamma");
    controller.create_all_update_jobs().unwrap();
    assert!(wait_until(|| recorder.count() == 2));
    assert!(recorder.seen.lock()[1].modified);

    assert_eq!(indexed_ids(&controller, "docs"), vec!["a.md", "c.md"]);

    let queue = controller.queue("docs").unwrap();
    let last = queue.last_jobs();
    assert_eq!(last.len(), 2);
    assert_eq!(last[0].identifier(), "docs:files");

    controller.stop();
}

#[test]
fn test_unchanged_round_reports_unmodified() {
    let setup = TestSetup::new();
    setup.add_file("a.md", "alpha");

    let controller = setup.controller("");
    let recorder = FinishedRecorder::new();
    controller.events().register(recorder.clone());
    controller.start().unwrap();

    controller.create_all_update_jobs().unwrap();
    assert!(wait_until(|| recorder.count() == 1));
    controller.create_all_update_jobs().unwrap();
    assert!(wait_until(|| recorder.count() == 2));

    assert!(!recorder.seen.lock()[1].modified);
    controller.stop();
}

#[test]
fn test_missing_source_root_keeps_index() {
    let setup = TestSetup::new();
    setup.add_file("a.md", "alpha");

    let controller = setup.controller("");
    let job = controller.create_update_jobs("docs").unwrap().remove(0);
    job.run(&tokio_util::sync::CancellationToken::new());
    assert_eq!(indexed_ids(&controller, "docs"), vec!["a.md"]);

    std::fs::remove_dir_all(setup.content_dir()).unwrap();
    let job = controller.create_update_jobs("docs").unwrap().remove(0);
    job.run(&tokio_util::sync::CancellationToken::new());

    // A failed fetch must not look like an empty source
    assert!(!job.is_modified_index());
    assert_eq!(indexed_ids(&controller, "docs"), vec!["a.md"]);
}

// ============================================================================
// Archiving
// ============================================================================

#[test]
fn test_archive_refused_while_writer_is_out() {
    let setup = TestSetup::new();
    let controller = setup.controller("");
    let location = controller.location("docs").unwrap();

    {
        let _writer = location.accessor().writer().unwrap();
        assert!(matches!(
            controller.archive("docs"),
            Err(IndexError::Locked { .. })
        ));
        assert!(!setup.archive_path().exists());
    }

    assert!(matches!(
        controller.archive("docs").unwrap(),
        ArchiveOutcome::Archived { .. }
    ));
}

#[test]
fn test_archive_includes_suggestion_index() {
    let setup = TestSetup::new();
    setup.add_file("a.md", "alpha");
    let controller = setup.controller("");
    let job = controller.create_update_jobs("docs").unwrap().remove(0);
    job.run(&tokio_util::sync::CancellationToken::new());

    controller.archive("docs").unwrap();
    let entries = archive_entries(&setup.archive_path());
    assert!(entries.iter().any(|e| e.starts_with("index/")));
    assert!(entries.iter().any(|e| e.starts_with("suggest")));
}

#[test]
fn test_after_action_task_archives_without_receiver() {
    let setup = TestSetup::new();
    setup.add_file("a.md", "alpha");
    let controller = setup.controller(r#"after_action_tasks = ["compress_index"]"#);

    let job = controller.create_update_jobs("docs").unwrap().remove(0);
    job.run(&tokio_util::sync::CancellationToken::new());
    assert!(setup.archive_path().exists());
}

#[test]
fn test_clear_job_through_queue() {
    let setup = TestSetup::new();
    setup.add_file("a.md", "alpha");
    let controller = setup.controller("");
    let recorder = FinishedRecorder::new();
    controller.events().register(recorder.clone());
    controller.start().unwrap();

    controller.create_all_update_jobs().unwrap();
    assert!(wait_until(|| recorder.count() == 1));

    let clear = controller.create_clear_job("docs").unwrap();
    assert!(controller.add_job("docs", Arc::clone(&clear)).unwrap());
    assert!(wait_until(|| recorder.count() == 2));
    assert!(clear.is_modified_index());
    assert!(indexed_ids(&controller, "docs").is_empty());

    controller.stop();
}
