//! Full-document processing entry points.
//!
//! [`process_document`] chains the OCR executor, the split sweep, and
//! the boundary sweep for one document — the sequence an embedding
//! application runs when the user picks a PDF. Each stage is also public
//! on its own (see [`crate::pipeline`]) for callers that drive stages
//! separately; the long-segment resplitter stays a separate per-file
//! call because it reads a chosen segment file, not the whole cache.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::boundary::{self, BoundaryStats};
use crate::pipeline::ocr::{self, OcrStats};
use crate::pipeline::split::{self, SplitStats};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Aggregated outcome of one [`process_document`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    pub ocr: OcrStats,
    pub split: SplitStats,
    pub boundary: BoundaryStats,
    pub total_duration_ms: u64,
}

/// Run the pipeline over one document: OCR every missing page, split
/// every unsegmented record, then check every page boundary.
///
/// Fully incremental — rerunning after a success is a no-op, and
/// rerunning after a partial failure resumes where work actually
/// stopped. The split and boundary stages sweep the whole cache root,
/// so records of other documents sharing the cache catch up too.
///
/// # Errors
/// OCR and boundary failures abort the run (see the stage docs for why
/// they are fatal); split failures are per-page and reported in
/// [`SplitStats::pages_failed`].
pub async fn process_document(
    pdf_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ProcessStats, PipelineError> {
    let total_start = Instant::now();
    let pdf_path = pdf_path.as_ref();
    info!("processing document: {}", pdf_path.display());

    let ocr = ocr::ocr_document(pdf_path, config).await?;
    let split = split::split_cache(config).await?;
    let boundary = boundary::fix_cache_boundaries(config).await?;

    let stats = ProcessStats {
        ocr,
        split,
        boundary,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "document complete: {} pages OCR'd, {} pages split, {} boundaries checked ({} repaired), {}ms total",
        stats.ocr.pages_processed,
        stats.split.pages_split,
        stats.boundary.pairs_checked,
        stats.boundary.pairs_repaired,
        stats.total_duration_ms
    );
    Ok(stats)
}

/// Synchronous wrapper around [`process_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_document_sync(
    pdf_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ProcessStats, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::InvalidConfig(format!("failed to create tokio runtime: {e}")))?
        .block_on(process_document(pdf_path, config))
}
