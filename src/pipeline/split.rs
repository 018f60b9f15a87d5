//! Segment splitter: page text records → raw sentence-segment lists.
//!
//! Purely additive: a page that already has a segment list — raw or
//! fixed — is never touched again, so re-running the sweep over an
//! unchanged cache does nothing. The per-page entry point propagates
//! failures; the cache-wide sweep logs them and carries on, because one
//! overloaded segmentation call must not strand every other page.

use crate::cache::{self, TextRecord};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::progress::Stage;
use crate::services::SegmentationClient;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to a single page record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOutcome {
    /// Segments were produced and written.
    Written { segments: usize },
    /// A raw or fixed segment list already existed, or the record held no
    /// text yet; nothing was written.
    Skipped,
}

/// Outcome of a cache-wide split sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitStats {
    pub pages_split: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub duration_ms: u64,
}

/// Split one page's text record into a raw segment list.
///
/// `json_path` is the path of the `page_<n>.json` text record; the raw
/// list lands next to it as `page_<n>.jsonl`. Skips without calling the
/// service when either segment form already exists. Service failures
/// propagate to the caller.
pub async fn split_page(
    json_path: &Path,
    client: &SegmentationClient,
    config: &PipelineConfig,
) -> Result<SplitOutcome, PipelineError> {
    let raw_path = sibling_with_suffix(json_path, ".jsonl");
    let fixed_path = sibling_with_suffix(json_path, cache::FIXED_SUFFIX);
    if raw_path.exists() || fixed_path.exists() {
        debug!("{}: segment list already present", json_path.display());
        return Ok(SplitOutcome::Skipped);
    }

    let record = read_record(json_path).await?;
    if record.text.is_empty() {
        // Segment lists derive from non-empty text only; an empty record
        // is the OCR stage's problem, not ours.
        debug!("{}: empty text record, skipping", json_path.display());
        return Ok(SplitOutcome::Skipped);
    }

    let segments = client.split(&record.text, config.threshold).await?;
    cache::write_segments(&raw_path, &segments).await?;
    debug!(
        "{}: wrote {} segments",
        raw_path.display(),
        segments.len()
    );
    Ok(SplitOutcome::Written {
        segments: segments.len(),
    })
}

/// Split every unsegmented page record under the cache root.
///
/// Walks the whole tree rather than a single document so a shared cache
/// catches up in one call. Per-page failures are logged and counted;
/// the sweep itself only fails on I/O errors reading the tree.
pub async fn split_cache(config: &PipelineConfig) -> Result<SplitStats, PipelineError> {
    let start = Instant::now();
    let client = SegmentationClient::new(config)?;

    let work = pending_records(&config.cache_root).await?;
    let total: usize = work.iter().map(|(_, records)| records.len()).sum();
    info!(
        "split sweep: {} unsegmented records under {}",
        total,
        config.cache_root.display()
    );

    if let Some(cb) = &config.progress {
        cb.on_stage_start(Stage::Split, total);
    }

    let mut stats = SplitStats {
        pages_split: 0,
        pages_skipped: 0,
        pages_failed: 0,
        duration_ms: 0,
    };
    let mut unit = 0;

    for (dir, records) in &work {
        // Hold the directory's write lock for the whole batch so the
        // exists-check and the write are atomic per document.
        let _lock = cache::DocumentCache::at(dir).lock().await?;

        for json_path in records {
            unit += 1;
            if let Some(cb) = &config.progress {
                cb.on_unit_start(Stage::Split, unit, total);
            }
            match split_page(json_path, &client, config).await {
                Ok(SplitOutcome::Written { segments }) => {
                    stats.pages_split += 1;
                    if let Some(cb) = &config.progress {
                        cb.on_unit_complete(Stage::Split, unit, total, segments);
                    }
                }
                Ok(SplitOutcome::Skipped) => {
                    stats.pages_skipped += 1;
                    if let Some(cb) = &config.progress {
                        cb.on_unit_complete(Stage::Split, unit, total, 0);
                    }
                }
                Err(e) => {
                    warn!("{}: split failed: {e}", json_path.display());
                    stats.pages_failed += 1;
                    if let Some(cb) = &config.progress {
                        cb.on_unit_error(Stage::Split, unit, total, e.to_string());
                    }
                }
            }
        }
    }

    if let Some(cb) = &config.progress {
        cb.on_stage_complete(Stage::Split, stats.pages_split);
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}

/// `.json` records still lacking a segment list, grouped per directory,
/// both levels path-sorted for deterministic processing order.
async fn pending_records(
    cache_root: &Path,
) -> Result<Vec<(PathBuf, Vec<PathBuf>)>, PipelineError> {
    let mut work = Vec::new();
    for dir in cache::document_dirs(cache_root).await? {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PipelineError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = sibling_with_suffix(&path, ".jsonl");
            let fixed = sibling_with_suffix(&path, cache::FIXED_SUFFIX);
            if !raw.exists() && !fixed.exists() {
                records.push(path);
            }
        }
        if !records.is_empty() {
            records.sort();
            work.push((dir, records));
        }
    }
    work.sort();
    Ok(work)
}

async fn read_record(json_path: &Path) -> Result<TextRecord, PipelineError> {
    let raw = tokio::fs::read_to_string(json_path)
        .await
        .map_err(|e| PipelineError::io(json_path, e))?;
    serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidRecord {
        path: json_path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// `page_3.json` → `page_3<suffix>` next to it.
fn sibling_with_suffix(json_path: &Path, suffix: &str) -> PathBuf {
    let stem = json_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    json_path.with_file_name(format!("{stem}{suffix}"))
}
