//! Error types for the pdf2sent library.
//!
//! One enum, four families of failure:
//!
//! * **Input errors** — the caller handed us something unusable (missing
//!   PDF, page number 0). Fixable by the caller, never retried.
//!
//! * **External-tool errors** — `pdftoppm`/`pdfinfo` or one of the HTTP
//!   services failed. The underlying cause (exit status, stderr, HTTP
//!   status) is attached so operators can see *which* collaborator broke.
//!
//! * **Data-integrity errors** — the cache contradicts what a collaborator
//!   claimed (an image missing right after a successful render, a
//!   segmentation response with zero segments). These signal a broken
//!   contract, not a normal runtime condition.
//!
//! * **Transient errors** — the sentence-segmentation service answering
//!   503. Retried internally with doubling backoff;
//!   [`PipelineError::ServiceOverloaded`] only surfaces once the retry
//!   budget is spent.
//!
//! Every stage aborts its current unit of work (page or boundary pair) on
//! the first three families rather than guessing at partial recovery; the
//! cache is left exactly as it was before the failed unit started.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdf2sent library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Page numbers are 1-based; 0 is rejected before any tool is invoked.
    #[error("invalid page number {page} (pages are numbered from 1)")]
    InvalidPageNumber { page: usize },

    // ── External-tool errors ──────────────────────────────────────────────
    /// `pdfinfo` failed or its output had no parseable `Pages:` line.
    #[error("failed to read page count of '{path}': {detail}")]
    PageCountFailed { path: PathBuf, detail: String },

    /// `pdftoppm` exited non-zero or could not be spawned.
    #[error("failed to render page {page} of '{path}': {detail}")]
    RenderFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// The OCR chat request failed (transport error or non-success status).
    #[error("OCR request for page {page} failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// A segmentation service returned a non-retryable error.
    #[error("segmentation service '{service}' failed: {detail}")]
    SegmentationFailed { service: String, detail: String },

    // ── Data-integrity errors ─────────────────────────────────────────────
    /// The renderer reported success but the cached image is absent.
    ///
    /// Distinct from [`PipelineError::RenderFailed`]: this is a contract
    /// violation, not a tool error.
    #[error("cached image not found for page {page}: '{path}'")]
    CachedImageMissing { page: usize, path: PathBuf },

    /// The sentence-segmentation service returned zero segments where
    /// segments were required (e.g. for a boundary window).
    #[error("segmentation returned no segments for {context}")]
    EmptySegmentation { context: String },

    /// A cached record could not be parsed.
    #[error("invalid cached record '{path}': {detail}")]
    InvalidRecord { path: PathBuf, detail: String },

    /// A segment file held no segments at all.
    #[error("no text segments found in '{path}'")]
    EmptySegmentFile { path: PathBuf },

    // ── Transient errors ──────────────────────────────────────────────────
    /// The sentence-segmentation service kept answering 503 until the
    /// retry budget ran out.
    #[error("segmentation service still overloaded (503) after {attempts} attempts")]
    ServiceOverloaded { attempts: u32 },

    // ── I/O & config ──────────────────────────────────────────────────────
    /// Another run holds the document's cache lock.
    ///
    /// The cache tree is single-writer; a concurrent run against the same
    /// directory could observe half-written state or race the raw→fixed
    /// rename.
    #[error("cache directory is locked by another run: '{path}'\nRemove the lock file if no other run is active.")]
    CacheLocked { path: PathBuf },

    /// Filesystem operation on the cache tree failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder or environment validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Attach a path to a bare `std::io::Error`.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_image_missing_display() {
        let e = PipelineError::CachedImageMissing {
            page: 4,
            path: PathBuf::from("/cache/doc/page_4.png"),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 4"), "got: {msg}");
        assert!(msg.contains("page_4.png"));
    }

    #[test]
    fn overloaded_display_mentions_attempts() {
        let e = PipelineError::ServiceOverloaded { attempts: 3 };
        assert!(e.to_string().contains("3 attempts"));
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as _;
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = PipelineError::io("/cache/doc/page_1.json", inner);
        assert!(e.source().is_some(), "io source must be preserved");
        assert!(e.to_string().contains("page_1.json"));
    }

    #[test]
    fn segmentation_failed_names_the_service() {
        let e = PipelineError::SegmentationFailed {
            service: "wtpsplit".into(),
            detail: "HTTP 500".into(),
        };
        assert!(e.to_string().contains("wtpsplit"));
        assert!(e.to_string().contains("500"));
    }
}
