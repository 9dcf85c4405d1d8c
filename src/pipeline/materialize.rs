//! Per-file result materialization: download the result archive, pull out
//! its Markdown, and extract its images into the batch workspace.
//!
//! This stage absorbs every failure. Whatever goes wrong — remote
//! conversion failure, download error, unreadable archive, missing
//! Markdown — the outcome is a placeholder comment plus zero images, never
//! an error that aborts sibling files. `materialize` always yields a
//! [`FileOutcome`].
//!
//! ## Archive layout
//!
//! ```text
//! <root or one-level dir>/
//!    ├── full.md        ← the Markdown payload
//!    ├── images/        ← extracted image assets
//!    ├── *.json         ← layout sidecars, ignored
//!    └── *_origin.pdf   ← source echo, ignored
//! ```
//!
//! Some archives nest everything one directory deep, so both the Markdown
//! search and the image filter tolerate a single leading path segment.

use crate::api::{ConversionState, ExtractService, RemoteFileResult};
use crate::error::FileError;
use crate::output::FileOutcome;
use crate::pipeline::rewrite::rewrite_image_paths;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Image extensions worth extracting, lowercase.
const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];

/// Canonical name of the full-document Markdown entry.
const CANONICAL_MARKDOWN: &str = "full.md";

/// The in-archive folder images live under.
const IMAGE_FOLDER: &str = "images/";

/// Materialize one file's remote result into Markdown text plus extracted
/// images under `images_dir`.
///
/// `index` is the file's sequence index; it prefixes every extracted image
/// name and every rewritten reference, making names collision-free across
/// the batch.
pub async fn materialize(
    service: &Arc<dyn ExtractService>,
    item: &RemoteFileResult,
    index: usize,
    images_dir: &Path,
) -> FileOutcome {
    let file_name = item.file_name.clone();

    // Only a done file with an archive URL has anything to download; the
    // poller has already validated the state string.
    let zip_url = match (ConversionState::parse(&item.state), &item.full_zip_url) {
        (Some(ConversionState::Done), Some(url)) => url.clone(),
        _ => {
            let message = item
                .err_msg
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            warn!("{file_name}: remote conversion failed: {message}");
            return FileOutcome::placeholder(index, file_name, FileError::RemoteFailed { message });
        }
    };

    let bytes = match service.fetch_result_archive(&zip_url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("{file_name}: {e}");
            return FileOutcome::placeholder(index, file_name, e);
        }
    };

    // Unzip is CPU- and disk-bound; keep it off the async workers.
    let images_dir = images_dir.to_path_buf();
    let extraction = tokio::task::spawn_blocking(move || extract_archive(bytes, index, &images_dir))
        .await
        .unwrap_or_else(|e| {
            Err(FileError::Archive {
                detail: format!("extraction task panicked: {e}"),
            })
        });

    match extraction {
        Ok(Extracted {
            markdown: Some(markdown),
            images_extracted,
        }) => {
            info!("{file_name}: extracted {images_extracted} image(s)");
            FileOutcome {
                index,
                file_name,
                markdown,
                images_extracted,
                error: None,
            }
        }
        Ok(Extracted {
            markdown: None,
            images_extracted,
        }) => {
            // Images without a document still count; the comment records
            // why this section is empty.
            warn!("{file_name}: archive has no markdown entry");
            let mut outcome = FileOutcome::placeholder(index, file_name, FileError::NoMarkdown);
            outcome.images_extracted = images_extracted;
            outcome
        }
        Err(e) => {
            warn!("{file_name}: {e}");
            FileOutcome::placeholder(index, file_name, e)
        }
    }
}

#[derive(Debug)]
struct Extracted {
    markdown: Option<String>,
    images_extracted: usize,
}

/// Open `bytes` as a zip archive, read the Markdown payload, and write
/// index-prefixed images under `images_dir`.
fn extract_archive(bytes: Vec<u8>, index: usize, images_dir: &Path) -> Result<Extracted, FileError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| FileError::Archive {
        detail: e.to_string(),
    })?;

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    debug!("Result archive holds {} entries", names.len());

    let markdown = match select_markdown_entry(&names) {
        Some(entry) => {
            let mut raw = String::new();
            archive
                .by_name(&entry)
                .map_err(|e| FileError::Archive {
                    detail: e.to_string(),
                })?
                .read_to_string(&mut raw)
                .map_err(|e| FileError::Archive {
                    detail: format!("{entry}: {e}"),
                })?;
            Some(rewrite_image_paths(&raw, index))
        }
        None => None,
    };

    let mut images_extracted = 0;
    for name in &names {
        if !is_extractable_image(name) {
            continue;
        }
        let base = name.rsplit('/').next().unwrap_or(name);
        let target = images_dir.join(format!("{index:04}_{base}"));
        write_entry(&mut archive, name, &target)?;
        images_extracted += 1;
    }

    Ok(Extracted {
        markdown,
        images_extracted,
    })
}

/// Pick the Markdown entry: a canonical `full.md` at top level or one
/// directory deep wins; otherwise the first `.md` at the same depth.
fn select_markdown_entry(names: &[String]) -> Option<String> {
    let shallow = |name: &str| name.split('/').count() <= 2;
    names
        .iter()
        .find(|n| n.ends_with(CANONICAL_MARKDOWN) && shallow(n))
        .or_else(|| names.iter().find(|n| n.ends_with(".md") && shallow(n)))
        .cloned()
}

/// An entry is worth extracting when it is a file, image-typed by
/// extension, and located under the conventional image folder (possibly
/// nested one level deep).
fn is_extractable_image(name: &str) -> bool {
    if name.ends_with('/') {
        return false;
    }
    let lower = name.to_lowercase();
    let is_image = IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
    let in_images = name.starts_with(IMAGE_FOLDER) || name.contains("/images/");
    is_image && in_images
}

fn write_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    target: &Path,
) -> Result<(), FileError> {
    let mut entry = archive.by_name(name).map_err(|e| FileError::Archive {
        detail: e.to_string(),
    })?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data).map_err(|e| FileError::Archive {
        detail: format!("{name}: {e}"),
    })?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FileError::Archive {
            detail: format!("{}: {e}", parent.display()),
        })?;
    }
    std::fs::write(target, data).map_err(|e| FileError::Archive {
        detail: format!("{}: {e}", target.display()),
    })
}
