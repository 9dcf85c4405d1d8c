//! Integration tests for the batch conversion pipeline.
//!
//! Everything runs against a scripted in-memory [`ExtractService`]
//! injected through `ConversionConfig::service` — no network, no live
//! API. Result archives are real zip bytes built with the same crate the
//! pipeline reads them with, and poll timing runs under tokio's paused
//! clock so sleep-based loops finish instantly.

use async_trait::async_trait;
use scan2md::api::{BatchSubmission, FileSlot, ProcessingOptions, RemoteFileResult};
use scan2md::{
    convert_batch, ConversionConfig, ExtractService, FileError, Scan2MdError,
};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zip::write::SimpleFileOptions;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Build a result archive: one Markdown body plus named image entries.
fn build_result_zip(markdown: &str, images: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();
        writer.start_file("full.md", options).unwrap();
        writer.write_all(markdown.as_bytes()).unwrap();
        for (name, data) in images {
            writer
                .start_file(format!("images/{name}"), options)
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// What the mock service should report for one submitted file.
#[derive(Clone)]
struct FilePlan {
    name: String,
    /// Status queries that must happen before this file turns terminal.
    done_after: usize,
    /// Terminal state: "done" or "failed".
    state: &'static str,
    err_msg: Option<String>,
    archive: Option<Vec<u8>>,
}

impl FilePlan {
    fn done(name: &str, archive: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            done_after: 0,
            state: "done",
            err_msg: None,
            archive: Some(archive),
        }
    }

    fn failed(name: &str, err: &str) -> Self {
        Self {
            name: name.to_string(),
            done_after: 0,
            state: "failed",
            err_msg: Some(err.to_string()),
            archive: None,
        }
    }

    fn done_after(mut self, queries: usize) -> Self {
        self.done_after = queries;
        self
    }
}

/// Scripted extraction service.
///
/// Status responses are generated from the file plans and the recorded
/// submission slots, and deliberately listed in **reverse** order so that
/// completion order never matches submission order.
struct MockService {
    plans: Vec<FilePlan>,
    slots: Mutex<Vec<FileSlot>>,
    status_queries: AtomicUsize,
    uploads_in_flight: AtomicUsize,
    upload_high_water: AtomicUsize,
    upload_count: AtomicUsize,
    fail_upload_for: Vec<String>,
    reject_submission: bool,
}

impl MockService {
    fn new(plans: Vec<FilePlan>) -> Arc<Self> {
        Arc::new(Self {
            plans,
            slots: Mutex::new(Vec::new()),
            status_queries: AtomicUsize::new(0),
            uploads_in_flight: AtomicUsize::new(0),
            upload_high_water: AtomicUsize::new(0),
            upload_count: AtomicUsize::new(0),
            fail_upload_for: Vec::new(),
            reject_submission: false,
        })
    }

    fn data_id_for(&self, name: &str) -> String {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.data_id.clone())
            .unwrap_or_default()
    }

    fn zip_url_for(name: &str) -> String {
        format!("https://cdn.example/{name}.zip")
    }
}

#[async_trait]
impl ExtractService for MockService {
    async fn request_upload_slots(
        &self,
        files: &[FileSlot],
        _options: &ProcessingOptions,
    ) -> Result<BatchSubmission, Scan2MdError> {
        if self.reject_submission {
            return Err(Scan2MdError::RemoteRejected {
                code: -60012,
                message: "quota exhausted".into(),
            });
        }
        *self.slots.lock().unwrap() = files.to_vec();
        Ok(BatchSubmission {
            batch_id: "batch-test".to_string(),
            upload_urls: files
                .iter()
                .map(|f| format!("https://upload.example/{}", f.name))
                .collect(),
        })
    }

    async fn upload(&self, upload_url: &str, _body: Vec<u8>) -> Result<(), Scan2MdError> {
        let now = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.upload_high_water.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_upload_for.iter().any(|n| upload_url.ends_with(n.as_str())) {
            return Err(Scan2MdError::RemoteRejected {
                code: 403,
                message: "upload returned HTTP 403".into(),
            });
        }
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_status(&self, _batch_id: &str) -> Result<Vec<RemoteFileResult>, Scan2MdError> {
        let query = self.status_queries.fetch_add(1, Ordering::SeqCst) + 1;
        let mut items: Vec<RemoteFileResult> = self
            .plans
            .iter()
            .map(|plan| {
                let terminal = query > plan.done_after;
                RemoteFileResult {
                    file_name: plan.name.clone(),
                    data_id: self.data_id_for(&plan.name),
                    state: if terminal {
                        plan.state.to_string()
                    } else {
                        "processing".to_string()
                    },
                    full_zip_url: (terminal && plan.state == "done")
                        .then(|| Self::zip_url_for(&plan.name)),
                    err_msg: plan.err_msg.clone(),
                }
            })
            .collect();
        // Completion order must never be what fixes the merge order.
        items.reverse();
        Ok(items)
    }

    async fn fetch_result_archive(&self, zip_url: &str) -> Result<Vec<u8>, FileError> {
        self.plans
            .iter()
            .find(|p| zip_url == Self::zip_url_for(&p.name))
            .and_then(|p| p.archive.clone())
            .ok_or(FileError::DownloadFailed { status: 404 })
    }
}

/// A source directory with the given file names, plus an isolated
/// workspace base and output root.
struct TestDirs {
    _root: tempfile::TempDir,
    image_dir: PathBuf,
    output_root: PathBuf,
    workspace_base: PathBuf,
}

fn setup_dirs(file_names: &[&str]) -> TestDirs {
    let root = tempfile::tempdir().unwrap();
    let image_dir = root.path().join("article").join("pages");
    std::fs::create_dir_all(&image_dir).unwrap();
    for name in file_names {
        std::fs::write(image_dir.join(name), b"fake image bytes").unwrap();
    }
    let output_root = root.path().join("article");
    let workspace_base = root.path().join("work");
    std::fs::create_dir_all(&workspace_base).unwrap();
    TestDirs {
        image_dir,
        output_root,
        workspace_base,
        _root: root,
    }
}

fn test_config(service: Arc<MockService>, dirs: &TestDirs) -> ConversionConfig {
    ConversionConfig::builder()
        .service(service)
        .workspace_base(&dirs.workspace_base)
        .poll_interval_secs(1)
        .poll_max_wait_secs(300)
        .build()
        .unwrap()
}

fn workspace_count(base: &Path) -> usize {
    std::fs::read_dir(base).map(|rd| rd.count()).unwrap_or(0)
}

// ── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn merge_order_follows_submission_order_not_completion_order() {
    let dirs = setup_dirs(&["a.jpg", "b.jpg", "c.jpg"]);
    let service = MockService::new(vec![
        FilePlan::done("a.jpg", build_result_zip("section A", &[])),
        FilePlan::done("b.jpg", build_result_zip("section B", &[])),
        FilePlan::done("c.jpg", build_result_zip("section C", &[])),
    ]);

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    let merged = std::fs::read_to_string(&result.markdown_path).unwrap();
    let pos_a = merged.find("section A").unwrap();
    let pos_b = merged.find("section B").unwrap();
    let pos_c = merged.find("section C").unwrap();
    assert!(pos_a < pos_b && pos_b < pos_c, "got: {merged}");
    assert_eq!(merged.matches("\n\n---\n\n").count(), 2);

    let indices: Vec<usize> = result.files.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

// ── Image collision safety ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn identically_named_images_get_distinct_index_prefixes() {
    let dirs = setup_dirs(&["a.jpg", "b.jpg"]);
    let service = MockService::new(vec![
        FilePlan::done(
            "a.jpg",
            build_result_zip("![x](images/foo.png)", &[("foo.png", b"png-a")]),
        ),
        FilePlan::done(
            "b.jpg",
            build_result_zip("![x](images/foo.png)", &[("foo.png", b"png-b")]),
        ),
    ]);

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(result.image_count, 2);
    assert!(result.images_dir.join("0000_foo.png").is_file());
    assert!(result.images_dir.join("0001_foo.png").is_file());
    assert_eq!(
        std::fs::read(result.images_dir.join("0000_foo.png")).unwrap(),
        b"png-a"
    );

    let merged = std::fs::read_to_string(&result.markdown_path).unwrap();
    assert!(merged.contains("images/0000_foo.png"));
    assert!(merged.contains("images/0001_foo.png"));
    assert!(!merged.contains("](images/foo.png)"));
}

// ── Partial failure ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_file_degrades_to_placeholder_without_aborting_siblings() {
    let dirs = setup_dirs(&["a.jpg", "b.jpg", "c.jpg"]);
    let service = MockService::new(vec![
        FilePlan::done("a.jpg", build_result_zip("alpha", &[])),
        FilePlan::failed("b.jpg", "layout model crashed"),
        FilePlan::done("c.jpg", build_result_zip("gamma", &[])),
    ]);

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(result.stats.completed_files, 2);
    assert_eq!(result.stats.failed_files, 1);

    let merged = std::fs::read_to_string(&result.markdown_path).unwrap();
    assert!(merged.contains("alpha"));
    assert!(merged.contains("gamma"));
    // Exactly one placeholder, carrying file name and error message.
    assert_eq!(merged.matches("<!--").count(), 1);
    assert!(merged.contains("b.jpg"));
    assert!(merged.contains("layout model crashed"));

    let degraded = &result.files[1];
    assert_eq!(degraded.file_name, "b.jpg");
    assert_eq!(degraded.images_extracted, 0);
    assert!(matches!(
        degraded.error,
        Some(FileError::RemoteFailed { .. })
    ));
}

// ── Poller behaviour ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poller_queries_exactly_three_times_for_third_poll_completion() {
    let dirs = setup_dirs(&["a.jpg"]);
    let service = MockService::new(vec![
        FilePlan::done("a.jpg", build_result_zip("body", &[])).done_after(2),
    ]);

    let config = test_config(Arc::clone(&service), &dirs);
    convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(service.status_queries.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn poller_times_out_when_files_never_finish() {
    let dirs = setup_dirs(&["a.jpg"]);
    let service = MockService::new(vec![
        FilePlan::done("a.jpg", Vec::new()).done_after(usize::MAX),
    ]);

    let config = ConversionConfig::builder()
        .service(Arc::clone(&service) as Arc<dyn ExtractService>)
        .workspace_base(&dirs.workspace_base)
        .poll_interval_secs(1)
        .poll_max_wait_secs(5)
        .build()
        .unwrap();

    let err = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Scan2MdError::PollTimeout { waited_secs: 5 }));
    // Nothing was fetched and no workspace was left behind.
    assert_eq!(workspace_count(&dirs.workspace_base), 0);
}

#[tokio::test(start_paused = true)]
async fn poller_waits_for_processing_siblings_after_a_failure() {
    // One file fails on the first query; the sibling finishes on the third.
    // Full-completion policy: the batch still gets the sibling's content.
    let dirs = setup_dirs(&["a.jpg", "b.jpg"]);
    let service = MockService::new(vec![
        FilePlan::failed("a.jpg", "bad scan"),
        FilePlan::done("b.jpg", build_result_zip("survivor", &[])).done_after(2),
    ]);

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(service.status_queries.load(Ordering::SeqCst), 3);
    let merged = std::fs::read_to_string(&result.markdown_path).unwrap();
    assert!(merged.contains("survivor"));
    assert!(merged.contains("bad scan"));
}

#[tokio::test(start_paused = true)]
async fn unknown_remote_state_is_rejected() {
    let dirs = setup_dirs(&["a.jpg"]);
    let service = MockService::new(vec![FilePlan {
        name: "a.jpg".to_string(),
        done_after: 0,
        state: "limbo",
        err_msg: None,
        archive: None,
    }]);

    let config = test_config(Arc::clone(&service), &dirs);
    let err = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap_err();
    match err {
        Scan2MdError::UnknownState { state, file_name } => {
            assert_eq!(state, "limbo");
            assert_eq!(file_name, "a.jpg");
        }
        other => panic!("expected UnknownState, got {other:?}"),
    }
}

// ── Workspace lifecycle ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn workspace_is_removed_after_success() {
    let dirs = setup_dirs(&["a.jpg"]);
    let service = MockService::new(vec![FilePlan::done(
        "a.jpg",
        build_result_zip("body", &[("pic.png", b"png")]),
    )]);

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(workspace_count(&dirs.workspace_base), 0);
    // The extracted image survived the workspace teardown.
    assert!(result.images_dir.join("0000_pic.png").is_file());
}

#[tokio::test(start_paused = true)]
async fn workspace_is_removed_after_packaging_failure() {
    let dirs = setup_dirs(&["a.jpg"]);
    let service = MockService::new(vec![FilePlan::done(
        "a.jpg",
        build_result_zip("body", &[]),
    )]);

    // Output root is a plain file: creating the output tree must fail.
    let blocker = dirs._root.path().join("blocked");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let config = test_config(Arc::clone(&service), &dirs);
    let err = convert_batch(&dirs.image_dir, Some(&blocker), None, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Scan2MdError::Packaging { .. }));
    assert_eq!(workspace_count(&dirs.workspace_base), 0);
}

// ── Upload pool ──────────────────────────────────────────────────────────────

// Real clock: the high-water-mark observation needs uploads genuinely in
// flight together, which the paused clock's auto-advance can short-circuit.
#[tokio::test]
async fn upload_pool_is_bounded() {
    let dirs = setup_dirs(&["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
    let plans = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]
        .iter()
        .map(|n| FilePlan::done(n, build_result_zip("x", &[])))
        .collect();
    let service = MockService::new(plans);

    let config = ConversionConfig::builder()
        .service(Arc::clone(&service) as Arc<dyn ExtractService>)
        .workspace_base(&dirs.workspace_base)
        .concurrency(2)
        .poll_interval_secs(1)
        .build()
        .unwrap();

    convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(service.upload_count.load(Ordering::SeqCst), 5);
    assert_eq!(service.upload_high_water.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn partial_upload_failure_does_not_abort_the_batch() {
    let dirs = setup_dirs(&["a.jpg", "b.jpg"]);
    // Only the uploaded file ever appears in the result set.
    let mut service = MockService::new(vec![FilePlan::done(
        "a.jpg",
        build_result_zip("only section", &[]),
    )]);
    Arc::get_mut(&mut service).unwrap().fail_upload_for = vec!["b.jpg".to_string()];

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap();

    assert_eq!(result.stats.total_files, 2);
    assert_eq!(result.stats.uploaded_files, 1);
    assert_eq!(result.files.len(), 1);
    let merged = std::fs::read_to_string(&result.markdown_path).unwrap();
    assert!(merged.contains("only section"));
}

// ── Submission rejection ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rejected_submission_aborts_before_any_upload() {
    let dirs = setup_dirs(&["a.jpg"]);
    let mut service = MockService::new(vec![]);
    Arc::get_mut(&mut service).unwrap().reject_submission = true;

    let config = test_config(Arc::clone(&service), &dirs);
    let err = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Scan2MdError::RemoteRejected { code: -60012, .. }));
    assert_eq!(service.upload_count.load(Ordering::SeqCst), 0);
    assert_eq!(workspace_count(&dirs.workspace_base), 0);
}

// ── Empty input ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_source_dir_is_an_explicit_error() {
    let dirs = setup_dirs(&[]);
    let service = MockService::new(vec![]);
    let config = test_config(service, &dirs);
    let err = convert_batch(&dirs.image_dir, Some(&dirs.output_root), None, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Scan2MdError::NoInputFiles { .. }));
}

// ── End-to-end ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn end_to_end_two_files_produce_document_images_and_archive() {
    let dirs = setup_dirs(&["page1.jpg", "page2.jpg"]);
    let service = MockService::new(vec![
        FilePlan::done(
            "page1.jpg",
            build_result_zip(
                "First paragraph.\n\n![fig](images/plot.png)",
                &[("plot.png", b"png-1")],
            ),
        ),
        FilePlan::done(
            "page2.jpg",
            build_result_zip(
                "Second paragraph.\n\n![fig](images/plot.png)",
                &[("plot.png", b"png-2")],
            ),
        ),
    ]);

    let config = test_config(Arc::clone(&service), &dirs);
    let result = convert_batch(
        &dirs.image_dir,
        Some(&dirs.output_root),
        Some("merged"),
        &config,
    )
    .await
    .unwrap();

    // Merged document: two paragraphs, one separator, rewritten refs.
    let merged = std::fs::read_to_string(&result.markdown_path).unwrap();
    let halves: Vec<&str> = merged.split("\n\n---\n\n").collect();
    assert_eq!(halves.len(), 2);
    assert!(halves[0].contains("First paragraph."));
    assert!(halves[1].contains("Second paragraph."));
    assert!(halves[0].contains("images/0000_plot.png"));
    assert!(halves[1].contains("images/0001_plot.png"));

    // Images: two uniquely-prefixed files.
    assert_eq!(result.image_count, 2);
    assert!(result.images_dir.join("0000_plot.png").is_file());
    assert!(result.images_dir.join("0001_plot.png").is_file());

    // Archive: holds the document, both images, and never itself.
    let file = std::fs::File::open(&result.archive_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    assert!(names.contains(&"merged/merged.md".to_string()));
    assert!(names.contains(&"merged/images/0000_plot.png".to_string()));
    assert!(names.contains(&"merged/images/0001_plot.png".to_string()));
    assert!(names.iter().all(|n| !n.ends_with(".zip")));

    let mut archived_md = String::new();
    archive
        .by_name("merged/merged.md")
        .unwrap()
        .read_to_string(&mut archived_md)
        .unwrap();
    assert_eq!(archived_md, merged);

    // Stats reflect the full batch.
    assert_eq!(result.stats.total_files, 2);
    assert_eq!(result.stats.uploaded_files, 2);
    assert_eq!(result.stats.completed_files, 2);
    assert_eq!(result.stats.failed_files, 0);
}
