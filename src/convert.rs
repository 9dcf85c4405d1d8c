//! Batch conversion entry points.
//!
//! [`convert_batch`] drives the whole remote job: slot request → concurrent
//! uploads → polling → workspace-scoped materialization → merge →
//! packaging. It returns a complete [`BatchResult`] or a typed failure —
//! never a partial result. Per-file degradation is absorbed upstream into
//! inline placeholder comments (see [`crate::pipeline::materialize`]) and
//! surfaced through [`BatchResult::files`].

use crate::api::{ExtractService, HttpExtractService};
use crate::config::ConversionConfig;
use crate::error::Scan2MdError;
use crate::output::{BatchResult, BatchStats};
use crate::pipeline::{merge, poll, submit};
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Convert every supported file in `image_dir` into one merged Markdown
/// document plus extracted images plus a packaged archive.
///
/// Files are submitted in name order; that order assigns each file its
/// sequence index and fixes the section order of the merged document.
///
/// # Arguments
/// * `image_dir`   — directory of source page images
/// * `output_dir`  — result root; defaults to the parent of `image_dir`
/// * `output_name` — name of the output folder and Markdown file;
///   defaults to `"converted"`
/// * `config`      — conversion configuration
///
/// # Errors
/// Returns `Err(Scan2MdError)` only for batch-level failures: no input
/// files, rejected submission, poll timeout, packaging failure. A file
/// whose remote processing failed contributes a placeholder comment and
/// does not abort the batch.
pub async fn convert_batch(
    image_dir: impl AsRef<Path>,
    output_dir: Option<&Path>,
    output_name: Option<&str>,
    config: &ConversionConfig,
) -> Result<BatchResult, Scan2MdError> {
    let total_start = Instant::now();
    let image_dir = image_dir.as_ref();

    let service = resolve_service(config)?;

    // ── Inputs ───────────────────────────────────────────────────────────
    let images = scan_source_dir(image_dir, config)?;
    if images.is_empty() {
        return Err(Scan2MdError::NoInputFiles {
            dir: image_dir.to_path_buf(),
        });
    }

    let output_name = output_name.unwrap_or("converted");
    let output_dir = match output_dir {
        Some(dir) => dir.join(output_name),
        None => image_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(output_name),
    };

    info!("Found {} file(s) in {}", images.len(), image_dir.display());
    info!("Output directory: {}", output_dir.display());
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_start(images.len());
    }

    // ── Step 1: Request upload slots ─────────────────────────────────────
    info!("Step 1: requesting upload slots...");
    let file_names: Vec<String> = images
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect();
    let submission = submit::request_upload_slots(&service, &file_names, config).await?;
    info!("batch_id: {}", submission.batch_id);

    // ── Step 2: Upload files ─────────────────────────────────────────────
    info!("Step 2: uploading files...");
    let uploaded = submit::upload_all(&service, &images, &submission.upload_urls, config).await;
    if uploaded < images.len() {
        warn!(
            "Only {uploaded}/{} uploads succeeded; missing files will not appear in the result",
            images.len()
        );
    }

    // ── Step 3: Await remote extraction ──────────────────────────────────
    info!("Step 3: waiting for extraction...");
    let poll_start = Instant::now();
    let results = poll::await_completion(&service, &submission.batch_id, config).await?;
    let poll_duration_ms = poll_start.elapsed().as_millis() as u64;

    // ── Steps 4–5: Materialize into a scoped workspace and merge ─────────
    info!("Step 4: downloading result archives...");
    let workspace_base = match &config.workspace_base {
        Some(base) => base.clone(),
        None => std::env::current_dir().map_err(|e| Scan2MdError::Workspace { source: e })?,
    };
    let workspace = Workspace::create(&workspace_base, "converter")
        .map_err(|e| Scan2MdError::Workspace { source: e })?;

    let materialize_start = Instant::now();
    let outcomes = merge::materialize_all(&service, results, &workspace, config).await;
    let materialize_duration_ms = materialize_start.elapsed().as_millis() as u64;

    let image_count: usize = outcomes.iter().map(|o| o.images_extracted).sum();
    info!("Extracted {image_count} image(s) in total");

    info!("Step 5: merging markdown...");
    let merged = merge::join_markdown(&outcomes);

    // ── Steps 6–7: Write outputs and package ─────────────────────────────
    info!("Step 6: writing output tree...");
    let workspace_images = workspace.images_dir();
    let output_dir_owned = output_dir.clone();
    let output_name_owned = output_name.to_string();
    let merged_owned = merged;
    let paths = tokio::task::spawn_blocking(move || {
        merge::write_outputs(
            &merged_owned,
            &workspace_images,
            &output_dir_owned,
            &output_name_owned,
        )
    })
    .await
    .map_err(|e| Scan2MdError::Internal(format!("output task panicked: {e}")))??;

    // The workspace is torn down here, after its images were copied out.
    drop(workspace);

    // ── Stats ────────────────────────────────────────────────────────────
    let completed = outcomes.iter().filter(|o| o.error.is_none()).count();
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();

    let stats = BatchStats {
        total_files: images.len(),
        uploaded_files: uploaded,
        completed_files: completed,
        failed_files: failed,
        images_extracted: image_count,
        poll_duration_ms,
        materialize_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Batch complete: {completed}/{} files, {image_count} images, {}ms total",
        images.len(),
        stats.total_duration_ms
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_complete(completed, failed);
    }

    Ok(BatchResult {
        output_dir,
        markdown_path: paths.markdown_path,
        images_dir: paths.images_dir,
        archive_path: paths.archive_path,
        image_count,
        files: outcomes,
        stats,
    })
}

/// Synchronous wrapper around [`convert_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_batch_sync(
    image_dir: impl AsRef<Path>,
    output_dir: Option<&Path>,
    output_name: Option<&str>,
    config: &ConversionConfig,
) -> Result<BatchResult, Scan2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Scan2MdError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert_batch(image_dir, output_dir, output_name, config))
}

/// Resolve the extraction service: a caller-injected implementation wins,
/// otherwise the HTTP implementation is built from the config.
fn resolve_service(config: &ConversionConfig) -> Result<Arc<dyn ExtractService>, Scan2MdError> {
    if let Some(service) = &config.service {
        return Ok(Arc::clone(service));
    }
    Ok(Arc::new(HttpExtractService::new(config)?))
}

/// List supported files in `dir`, sorted by name.
///
/// Name order is what assigns sequence indices, so it must be stable
/// across runs and platforms.
pub fn scan_source_dir(
    dir: &Path,
    config: &ConversionConfig,
) -> Result<Vec<PathBuf>, Scan2MdError> {
    let entries = std::fs::read_dir(dir).map_err(|e| Scan2MdError::InputDir {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| config.is_supported_file(n))
        })
        .collect();

    files.sort();
    Ok(files)
}
