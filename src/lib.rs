//! # scan2md
//!
//! Convert batches of scanned document pages to merged Markdown using a
//! remote OCR/layout-recognition service (MinerU-compatible API).
//!
//! ## Why this crate?
//!
//! Local OCR tools struggle with dense scanned pages — formulae, tables,
//! and multi-column layouts come out garbled. Layout-recognition services
//! handle those well, but their batch API is an asynchronous multi-step
//! job: request upload slots, upload every page, poll until the service
//! finishes, then download one result archive per page. This crate wraps
//! that whole dance — including partial failure, ordering, retries, and
//! temporary-workspace cleanup — behind one call that yields a single
//! merged document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page images
//!  │
//!  ├─ 1. Submit       one API call: per-file upload slots + batch id
//!  ├─ 2. Upload       concurrent PUTs through a bounded worker pool
//!  ├─ 3. Poll         sleep-loop until every file is done or failed
//!  ├─ 4. Materialize  download + unzip each result, rewrite image refs
//!  ├─ 5. Merge        join sections in submission order ("---" rule)
//!  └─ 6. Package      output tree → single zip archive
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan2md::{convert_batch, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Token read from MINERU_API_TOKEN unless set explicitly
//!     let config = ConversionConfig::default();
//!     let result = convert_batch("downloaded_images", None, None, &config).await?;
//!     println!("markdown: {}", result.markdown_path.display());
//!     println!("archive:  {}", result.archive_path.display());
//!     eprintln!("{} images extracted", result.image_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2md` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only
//! deps:
//! ```toml
//! scan2md = { version = "0.3", default-features = false }
//! ```
//!
//! ## Failure model
//!
//! One bad page never loses the batch: a file whose remote processing or
//! result download failed contributes an inline `<!-- ... -->` placeholder
//! comment to the merged document and nothing else. Batch-level failures
//! (rejected submission, poll timeout, packaging error) return a typed
//! [`Scan2MdError`] and produce no partial output.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{ConversionState, ExtractService, HttpExtractService, RemoteFileResult};
pub use config::{ConversionConfig, ConversionConfigBuilder, RetryPolicy};
pub use convert::{convert_batch, convert_batch_sync};
pub use error::{FileError, Scan2MdError};
pub use output::{BatchResult, BatchStats, FileOutcome};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use workspace::{sweep_orphans, Workspace, WorkspaceRegistry};
