//! Pipeline stages for batch scan-to-Markdown conversion.
//!
//! Each submodule implements exactly one stage of the remote job protocol.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different packaging format) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! submit ──▶ upload ──▶ poll ──▶ materialize ──▶ merge/package
//! (slots)   (PUT ×N)   (status)  (zip ×N)        (one document)
//! ```
//!
//! 1. [`submit`]      — request per-file upload slots, then upload through
//!    a bounded worker pool
//! 2. [`poll`]        — block until every file reaches a terminal state or
//!    the deadline elapses
//! 3. [`materialize`] — download each result archive, pull out Markdown
//!    and images; absorbs per-file failures into placeholder comments
//! 4. [`rewrite`]     — pure-text image-reference rewriting used by the
//!    materializer
//! 5. [`merge`]       — restore submission order, join sections, copy
//!    images, package the output tree

pub mod materialize;
pub mod merge;
pub mod poll;
pub mod rewrite;
pub mod submit;
