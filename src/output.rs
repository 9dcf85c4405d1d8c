//! Output types: per-file outcomes, batch statistics, and the final
//! [`BatchResult`].

use crate::error::FileError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One source file's materialized result.
///
/// `markdown` always holds something: the extracted document on success,
/// or an inline placeholder comment describing the failure. Check `error`
/// to tell the two apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Stable 0-based position in the batch's submission order.
    ///
    /// Assigned once at batch creation; the sole ordering key for the
    /// final merge, independent of completion order.
    pub index: usize,

    /// Original source file name.
    pub file_name: String,

    /// Extracted Markdown with image references rewritten, or a
    /// placeholder comment when `error` is set.
    pub markdown: String,

    /// Count of images extracted from this file's result archive.
    pub images_extracted: usize,

    /// The per-file failure, if any. Never aborts the batch.
    pub error: Option<FileError>,
}

impl FileOutcome {
    /// An outcome that carries only a placeholder comment.
    pub fn placeholder(index: usize, file_name: impl Into<String>, error: FileError) -> Self {
        let file_name = file_name.into();
        let markdown = match &error {
            // Failed conversions get surrounding blank lines so the comment
            // stands alone as a section in the merged document.
            FileError::RemoteFailed { message } => {
                format!("\n\n<!-- {file_name} conversion failed: {message} -->\n\n")
            }
            other => format!("<!-- {file_name}: {other} -->"),
        };
        Self {
            index,
            file_name,
            markdown,
            images_extracted: 0,
            error: Some(error),
        }
    }
}

/// Aggregate statistics for a completed batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Files submitted to the remote service.
    pub total_files: usize,
    /// Files whose upload succeeded.
    pub uploaded_files: usize,
    /// Files materialized without error.
    pub completed_files: usize,
    /// Files that degraded to a placeholder comment.
    pub failed_files: usize,
    /// Total images extracted across the batch.
    pub images_extracted: usize,
    /// Wall-clock time spent polling the remote service.
    pub poll_duration_ms: u64,
    /// Wall-clock time spent downloading and unpacking result archives.
    pub materialize_duration_ms: u64,
    /// End-to-end wall-clock time.
    pub total_duration_ms: u64,
}

/// Final output of a successful batch conversion. Immutable once returned.
///
/// "Successful" means the batch produced its artifacts — individual files
/// may still have degraded; inspect `files` or grep the merged Markdown
/// for placeholder comments to detect partial degradation.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Directory holding the merged Markdown and the images folder.
    pub output_dir: PathBuf,
    /// The merged Markdown document.
    pub markdown_path: PathBuf,
    /// Consolidated image directory. Reported even when no images were
    /// extracted (the directory then does not exist); `image_count == 0`
    /// signals the distinction.
    pub images_dir: PathBuf,
    /// The packaged archive of the whole result tree.
    pub archive_path: PathBuf,
    /// Total images extracted across the batch.
    pub image_count: usize,
    /// Per-file outcomes in sequence order.
    pub files: Vec<FileOutcome>,
    /// Aggregate statistics.
    pub stats: BatchStats,
}
