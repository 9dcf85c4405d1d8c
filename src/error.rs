//! Error types for the scan2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Scan2MdError`] — **Fatal**: the batch cannot proceed or produce a
//!   result at all (submission rejected, poll deadline exceeded, output
//!   packaging failed). Returned as `Err(Scan2MdError)` from the top-level
//!   `convert_batch*` functions.
//!
//! * [`FileError`] — **Non-fatal**: a single file's remote processing or
//!   result materialization failed but all other files are fine. Stored
//!   inside [`crate::output::FileOutcome`] and rendered as an inline
//!   placeholder comment in the merged document, so callers keep the rest
//!   of the batch rather than losing it to one bad page.
//!
//! The separation lets callers decide their own tolerance: inspect
//! `BatchResult::files` for degraded entries, or grep the merged Markdown
//! for the placeholder comments.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scan2md library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::output::FileOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Scan2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source directory could not be read at all.
    #[error("Failed to read input directory '{path}': {source}")]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source directory contains no files in a supported format.
    #[error("No convertible files found in '{dir}'\nSupported formats: jpg, jpeg, png, webp, pdf.")]
    NoInputFiles { dir: PathBuf },

    // ── Remote API errors ─────────────────────────────────────────────────
    /// The service answered with a non-zero application-level status code.
    ///
    /// Not retried: the request reached the service and was refused, so
    /// repeating it verbatim would be refused again.
    #[error("Remote service rejected the request (code {code}): {message}")]
    RemoteRejected { code: i64, message: String },

    /// The HTTP layer failed after exhausting all retry attempts.
    #[error("Request to '{url}' failed after retries: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service returned a state string outside the known
    /// pending/processing/done/failed set.
    #[error("Unknown conversion state '{state}' reported for '{file_name}'")]
    UnknownState { state: String, file_name: String },

    // ── Poller errors ─────────────────────────────────────────────────────
    /// The poll deadline elapsed with files still pending or processing.
    #[error("Batch did not complete within {waited_secs}s\nIncrease poll_max_wait_secs or retry the batch.")]
    PollTimeout { waited_secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Filesystem failure while writing the merged Markdown, copying
    /// images, or building the output archive. Fatal: no partial
    /// `BatchResult` is returned.
    #[error("Failed to write batch output '{path}': {source}")]
    Packaging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The temporary workspace could not be created.
    #[error("Failed to create workspace: {source}")]
    Workspace {
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed, or required configuration is missing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file within a batch.
///
/// Stored alongside [`crate::output::FileOutcome`] when a file fails.
/// The overall batch continues; the failure surfaces as an inline
/// placeholder comment in the merged document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The remote service reported the file's conversion as failed.
    #[error("conversion failed: {message}")]
    RemoteFailed { message: String },

    /// The result archive download returned a non-2xx status.
    #[error("result download failed (HTTP {status})")]
    DownloadFailed { status: u16 },

    /// The result archive download failed at the network layer after retries.
    #[error("result download failed: {detail}")]
    Transport { detail: String },

    /// No Markdown entry was found in the result archive.
    #[error("no markdown found in result archive")]
    NoMarkdown,

    /// The result archive could not be opened or an entry could not be read.
    #[error("result archive unreadable: {detail}")]
    Archive { detail: String },
}
