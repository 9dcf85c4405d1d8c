//! Progress-callback trait for batch conversion events.
//!
//! Inject an `Arc<dyn BatchProgressCallback>` via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline advances through its stages.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a terminal progress bar, a WebSocket, or a task
//! record — without the library knowing anything about how the host
//! application communicates. The trait is `Send + Sync` because uploads and
//! materialization run concurrently.

use std::sync::Arc;

/// Called by the conversion pipeline as it advances.
///
/// Implementations must be `Send + Sync` (uploads and materialization run
/// concurrently). All methods have default no-op implementations so callers
/// only override what they care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the source directory is scanned.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called as each upload finishes, success or not.
    ///
    /// May be called concurrently from different workers.
    fn on_upload_complete(&self, file_name: &str, ok: bool) {
        let _ = (file_name, ok);
    }

    /// Called after each status query while the batch is processing.
    fn on_poll(&self, done: usize, total: usize, elapsed_secs: u64) {
        let _ = (done, total, elapsed_secs);
    }

    /// Called when one file's result has been materialized.
    ///
    /// `degraded` is true when the file contributed a placeholder comment
    /// instead of real content. May be called concurrently.
    fn on_file_materialized(&self, file_name: &str, images_extracted: usize, degraded: bool) {
        let _ = (file_name, images_extracted, degraded);
    }

    /// Called once after packaging, just before the result is returned.
    fn on_batch_complete(&self, completed: usize, failed: usize) {
        let _ = (completed, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in
/// [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
