//! Boundary fixer: repair sentences cut across a page break.
//!
//! OCR output is chunked per page, so a sentence that straddles a page
//! cut arrives as two fragments — the tail of one segment list and the
//! head of the next. Re-segmenting a small window around the cut (last
//! two segments of the earlier page, first two of the later) is cheap
//! and local: every segment outside the window is immutable once
//! written.
//!
//! The raw → fixed rename doubles as the "this boundary was checked"
//! marker. It is applied even when the window needed no repair, and once
//! both sides of a pair are fixed the pair short-circuits, which makes
//! re-running the fixer a guaranteed no-op.

use crate::cache::{self, DocumentCache, SegmentState};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::progress::Stage;
use crate::services::SegmentationClient;
use std::time::Instant;
use tracing::{debug, info};

/// What happened to one `(p, p+1)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryOutcome {
    /// Both sides were already fixed; nothing to examine.
    AlreadyFixed,
    /// One side has no segment list at all; the pair is not ready yet.
    MissingSegments,
    /// A side had fewer than 2 segments — not enough context to build a
    /// window. Nothing is touched; the pair stays eligible in case a
    /// later rewrite lengthens the short side.
    TooShort,
    /// The window re-segmented identically: contents untouched, raw
    /// files renamed to fixed.
    Verified,
    /// The window differed: both lists rewritten, renumbered, and fixed.
    Repaired,
}

/// Outcome of a cache-wide boundary sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryStats {
    /// Pairs examined against the segmentation service this run.
    pub pairs_checked: usize,
    /// Subset of checked pairs whose lists were rewritten.
    pub pairs_repaired: usize,
    /// Pairs skipped: already fixed, a side missing its list, or too
    /// few segments for a window.
    pub pairs_skipped: usize,
    pub duration_ms: u64,
}

/// Check, and if needed repair, the boundary between `page` and `page + 1`.
///
/// Hard failures (service error, empty segmentation result) leave both
/// files exactly as they were.
pub async fn fix_boundary_pair(
    doc: &DocumentCache,
    page: usize,
    client: &SegmentationClient,
    config: &PipelineConfig,
) -> Result<BoundaryOutcome, PipelineError> {
    let next = page + 1;
    let (Some((prev_path, prev_state)), Some((next_path, next_state))) = (
        doc.effective_segments_path(page),
        doc.effective_segments_path(next),
    ) else {
        return Ok(BoundaryOutcome::MissingSegments);
    };

    if prev_state == SegmentState::Fixed && next_state == SegmentState::Fixed {
        debug!("pages {page}/{next}: boundary already checked");
        return Ok(BoundaryOutcome::AlreadyFixed);
    }

    let prev_texts = cache::read_segment_texts(&prev_path).await?;
    let next_texts = cache::read_segment_texts(&next_path).await?;

    if prev_texts.len() < 2 || next_texts.len() < 2 {
        debug!("pages {page}/{next}: too few segments for a boundary window");
        return Ok(BoundaryOutcome::TooShort);
    }

    let mut window: Vec<String> = prev_texts[prev_texts.len() - 2..].to_vec();
    window.extend_from_slice(&next_texts[..2]);
    let combined = window.join(" ");

    let segments = client.split(&combined, config.threshold).await?;
    if segments.is_empty() {
        return Err(PipelineError::EmptySegmentation {
            context: format!("the boundary window of pages {page} and {next}"),
        });
    }

    if segments == window {
        // The cut did not split a sentence. Mark both sides checked
        // without rewriting anything.
        mark_fixed(doc, page, prev_state).await?;
        mark_fixed(doc, next, next_state).await?;
        debug!("pages {page}/{next}: boundary intact");
        return Ok(BoundaryOutcome::Verified);
    }

    let mut updated_prev: Vec<String> = prev_texts[..prev_texts.len() - 2].to_vec();
    updated_prev.extend(segments);
    let updated_next: Vec<String> = next_texts[2..].to_vec();

    cache::write_segments(&doc.fixed_segments_path(page), &updated_prev).await?;
    cache::write_segments(&doc.fixed_segments_path(next), &updated_next).await?;
    remove_raw(doc, page, prev_state).await?;
    remove_raw(doc, next, next_state).await?;

    info!(
        "pages {page}/{next}: boundary repaired ({} → {} segments on page {page})",
        prev_texts.len(),
        updated_prev.len()
    );
    Ok(BoundaryOutcome::Repaired)
}

/// Check every adjacent segment-list pair under the cache root.
///
/// Unlike the split sweep, a hard pair failure aborts the whole sweep:
/// an empty segmentation result means the service itself is broken, and
/// hammering it with the remaining pairs would only produce more of the
/// same. Callers that want to press on can drive
/// [`fix_boundary_pair`] themselves.
pub async fn fix_cache_boundaries(config: &PipelineConfig) -> Result<BoundaryStats, PipelineError> {
    let start = Instant::now();
    let client = SegmentationClient::new(config)?;

    let mut work = Vec::new();
    let mut total = 0;
    for dir in cache::document_dirs(&config.cache_root).await? {
        let doc = DocumentCache::at(&dir);
        let pages = doc.segment_pages().await?;
        let pairs: Vec<usize> = pages
            .windows(2)
            .filter(|w| w[1] == w[0] + 1)
            .map(|w| w[0])
            .collect();
        if !pairs.is_empty() {
            total += pairs.len();
            work.push((doc, pairs));
        }
    }
    info!(
        "boundary sweep: {} adjacent pairs under {}",
        total,
        config.cache_root.display()
    );

    if let Some(cb) = &config.progress {
        cb.on_stage_start(Stage::Boundary, total);
    }

    let mut stats = BoundaryStats {
        pairs_checked: 0,
        pairs_repaired: 0,
        pairs_skipped: 0,
        duration_ms: 0,
    };
    let mut unit = 0;

    for (doc, pairs) in &work {
        // One lock per document: the fixed-already check and the
        // raw→fixed renames must not race a concurrent run.
        let _lock = doc.lock().await?;

        for page in pairs {
            unit += 1;
            if let Some(cb) = &config.progress {
                cb.on_unit_start(Stage::Boundary, unit, total);
            }
            match fix_boundary_pair(doc, *page, &client, config).await {
                Ok(outcome) => {
                    match outcome {
                        BoundaryOutcome::Repaired => {
                            stats.pairs_checked += 1;
                            stats.pairs_repaired += 1;
                        }
                        BoundaryOutcome::Verified => {
                            stats.pairs_checked += 1;
                        }
                        BoundaryOutcome::AlreadyFixed
                        | BoundaryOutcome::MissingSegments
                        | BoundaryOutcome::TooShort => {
                            stats.pairs_skipped += 1;
                        }
                    }
                    if let Some(cb) = &config.progress {
                        cb.on_unit_complete(Stage::Boundary, unit, total, 0);
                    }
                }
                Err(e) => {
                    if let Some(cb) = &config.progress {
                        cb.on_unit_error(Stage::Boundary, unit, total, e.to_string());
                    }
                    return Err(e);
                }
            }
        }
    }

    if let Some(cb) = &config.progress {
        cb.on_stage_complete(Stage::Boundary, stats.pairs_checked);
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}

/// Rename a page's raw segment file to its fixed name. No-op when the
/// page is already fixed.
async fn mark_fixed(
    doc: &DocumentCache,
    page: usize,
    state: SegmentState,
) -> Result<(), PipelineError> {
    if state == SegmentState::Raw {
        let raw = doc.raw_segments_path(page);
        let fixed = doc.fixed_segments_path(page);
        tokio::fs::rename(&raw, &fixed)
            .await
            .map_err(|e| PipelineError::io(&raw, e))?;
    }
    Ok(())
}

/// Remove a page's raw file after its fixed replacement was written.
async fn remove_raw(
    doc: &DocumentCache,
    page: usize,
    state: SegmentState,
) -> Result<(), PipelineError> {
    if state == SegmentState::Raw {
        let raw = doc.raw_segments_path(page);
        tokio::fs::remove_file(&raw)
            .await
            .map_err(|e| PipelineError::io(&raw, e))?;
    }
    Ok(())
}
