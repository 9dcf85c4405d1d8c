//! Merge & package: order restoration, document assembly, image
//! consolidation, and the final output archive.
//!
//! Materialization runs concurrently, so results arrive in completion
//! order. The one authoritative ordering guarantee of the pipeline lives
//! here: outcomes are sorted by sequence index — recovered from each
//! file's `data_id` — before the Markdown join, never by arrival order.
//!
//! Packaging walks the result root (the directory that also holds sibling
//! asset folders produced by the upstream download stage) into a single
//! zip written one level above it. Files already carrying the archive
//! extension are skipped so the archive never contains itself.

use crate::api::{parse_data_id_index, ExtractService, RemoteFileResult};
use crate::config::ConversionConfig;
use crate::error::Scan2MdError;
use crate::output::FileOutcome;
use crate::pipeline::materialize::materialize;
use crate::workspace::Workspace;
use futures::stream::{self, StreamExt};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// Separator between per-file sections in the merged document.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Materialize every remote result into the workspace, bounded by the
/// configured worker pool, and return outcomes in sequence order.
pub async fn materialize_all(
    service: &Arc<dyn ExtractService>,
    results: Vec<RemoteFileResult>,
    workspace: &Workspace,
    config: &ConversionConfig,
) -> Vec<FileOutcome> {
    // Recover each file's sequence index from its data_id; a result with a
    // foreign id keeps its arrival position so nothing is dropped.
    let indexed: Vec<(usize, RemoteFileResult)> = results
        .into_iter()
        .enumerate()
        .map(|(pos, item)| (parse_data_id_index(&item.data_id).unwrap_or(pos), item))
        .collect();

    let images_dir = workspace.images_dir();

    let mut outcomes: Vec<FileOutcome> = stream::iter(indexed.into_iter().map(|(index, item)| {
        let service = Arc::clone(service);
        let images_dir = images_dir.clone();
        let progress = config.progress_callback.clone();
        async move {
            let outcome = materialize(&service, &item, index, &images_dir).await;
            if let Some(cb) = progress {
                cb.on_file_materialized(
                    &outcome.file_name,
                    outcome.images_extracted,
                    outcome.error.is_some(),
                );
            }
            outcome
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // The join barrier: ordering is restored here, not relied upon during
    // concurrent execution.
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

/// Join all sections with the horizontal-rule separator.
pub fn join_markdown(outcomes: &[FileOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| o.markdown.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

/// Paths produced by [`write_outputs`].
pub struct MergedPaths {
    pub markdown_path: PathBuf,
    pub images_dir: PathBuf,
    pub archive_path: PathBuf,
}

/// Write the merged document, consolidate images, and package the result
/// tree.
///
/// Fatal on any filesystem failure: the error propagates and no archive is
/// produced.
pub fn write_outputs(
    merged_markdown: &str,
    workspace_images: &Path,
    output_dir: &Path,
    output_name: &str,
) -> Result<MergedPaths, Scan2MdError> {
    std::fs::create_dir_all(output_dir).map_err(|e| Scan2MdError::Packaging {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    // Merged document.
    let markdown_path = output_dir.join(format!("{output_name}.md"));
    std::fs::write(&markdown_path, merged_markdown).map_err(|e| Scan2MdError::Packaging {
        path: markdown_path.clone(),
        source: e,
    })?;
    info!("Wrote {}", markdown_path.display());

    // Consolidated images, only when the workspace extracted any.
    let images_dir = output_dir.join("images");
    let copied = copy_images(workspace_images, &images_dir)?;
    if copied > 0 {
        info!("Copied {copied} image(s) to {}", images_dir.display());
    } else {
        debug!("No images to copy");
    }

    // Package the whole result tree.
    let archive_path = package_tree(output_dir)?;
    info!("Packaged {}", archive_path.display());

    Ok(MergedPaths {
        markdown_path,
        images_dir,
        archive_path,
    })
}

/// Copy every file from the workspace images folder into `target`.
///
/// The target directory is only created when there is at least one image.
fn copy_images(source: &Path, target: &Path) -> Result<usize, Scan2MdError> {
    let entries = match std::fs::read_dir(source) {
        Ok(entries) => entries,
        // No images folder at all counts as empty, not as a failure.
        Err(_) => return Ok(0),
    };

    let files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();

    if files.is_empty() {
        return Ok(0);
    }

    std::fs::create_dir_all(target).map_err(|e| Scan2MdError::Packaging {
        path: target.to_path_buf(),
        source: e,
    })?;

    for file in &files {
        let name = file.file_name().ok_or_else(|| Scan2MdError::Internal(
            format!("image path without file name: {}", file.display()),
        ))?;
        std::fs::copy(file, target.join(name)).map_err(|e| Scan2MdError::Packaging {
            path: file.clone(),
            source: e,
        })?;
    }

    Ok(files.len())
}

/// Zip the parent of `output_dir` (the result root) into
/// `{grandparent}/{root_name}.zip`, skipping zip files so the archive
/// never includes itself.
fn package_tree(output_dir: &Path) -> Result<PathBuf, Scan2MdError> {
    let result_root = output_dir
        .parent()
        .ok_or_else(|| Scan2MdError::Internal("output directory has no parent".into()))?;
    let root_name = result_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let archive_path = result_root
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{root_name}.zip"));

    let file = std::fs::File::create(&archive_path).map_err(|e| Scan2MdError::Packaging {
        path: archive_path.clone(),
        source: e,
    })?;
    let mut writer = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(result_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "zip") {
            continue;
        }
        let arcname = path
            .strip_prefix(result_root)
            .map_err(|e| Scan2MdError::Internal(format!("walk escaped root: {e}")))?
            .to_string_lossy()
            .replace('\\', "/");

        writer
            .start_file(arcname, options)
            .map_err(|e| Scan2MdError::Packaging {
                path: archive_path.clone(),
                source: std::io::Error::other(e),
            })?;
        let mut source = std::fs::File::open(path).map_err(|e| Scan2MdError::Packaging {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).map_err(|e| Scan2MdError::Packaging {
            path: path.to_path_buf(),
            source: e,
        })?;
        writer.write_all(&buf).map_err(|e| Scan2MdError::Packaging {
            path: archive_path.clone(),
            source: e,
        })?;
    }

    writer.finish().map_err(|e| Scan2MdError::Packaging {
        path: archive_path.clone(),
        source: std::io::Error::other(e),
    })?;

    Ok(archive_path)
}
