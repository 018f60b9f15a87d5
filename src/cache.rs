//! Cache directory model: one directory of per-page artifacts per document.
//!
//! ## Layout
//!
//! ```text
//! <cache_root>/<document-stem>/
//!   page_<n>.png          rendered page bitmap
//!   page_<n>.json         {"text": "<ocr text>"}        (text record)
//!   page_<n>.jsonl        [index, text] per line         (raw segments)
//!   page_<n>.fixed.jsonl  same schema, boundary-checked  (fixed segments)
//! ```
//!
//! The document directory is the unit of ownership: a single pipeline run
//! is the only writer, and every derived artifact is written either after
//! its producing call fully succeeded (text records) or via tmp + rename
//! (segment lists), so a reader never observes a half-written "successful"
//! state.
//!
//! Raw and fixed segment files are mutually exclusive per page at rest;
//! the raw → fixed transition is a rename performed by the boundary fixer
//! and is never reversed.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix marking a boundary-checked segment file.
pub const FIXED_SUFFIX: &str = ".fixed.jsonl";

/// Lock-file name inside a document directory.
const LOCK_FILE: &str = ".lock";

/// Raw OCR output for one page. Valid iff `text` is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRecord {
    pub text: String,
}

/// A single sentence-level segment with its 1-based index within the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub text: String,
}

/// Which form a page's segment list is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Freshly produced by the sentence splitter; boundary not yet checked.
    Raw,
    /// Checked (and possibly repaired) against a neighbouring page.
    Fixed,
}

static SEGMENT_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^page_(\d+)(\.fixed)?\.jsonl$").unwrap());

/// Handle on one document's cache directory.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    dir: PathBuf,
}

impl DocumentCache {
    /// Cache for the document at `pdf_path`, named after its file stem.
    ///
    /// An empty or missing stem falls back to `unknown` so a degenerate
    /// path still maps to a well-formed directory.
    pub fn for_document(cache_root: &Path, pdf_path: &Path) -> Self {
        let stem = pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            dir: cache_root.join(stem),
        }
    }

    /// Open an existing document directory directly (used by cache sweeps).
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the document directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::io(&self.dir, e))
    }

    // ── Canonical artifact paths ──────────────────────────────────────────

    pub fn image_path(&self, page: usize) -> PathBuf {
        self.dir.join(format!("page_{page}.png"))
    }

    pub fn text_path(&self, page: usize) -> PathBuf {
        self.dir.join(format!("page_{page}.json"))
    }

    pub fn raw_segments_path(&self, page: usize) -> PathBuf {
        self.dir.join(format!("page_{page}.jsonl"))
    }

    pub fn fixed_segments_path(&self, page: usize) -> PathBuf {
        self.dir.join(format!("page_{page}{FIXED_SUFFIX}"))
    }

    /// The page's segment state at rest, preferring fixed over raw when
    /// both are momentarily present (mid-transition).
    pub fn segment_state(&self, page: usize) -> Option<SegmentState> {
        if self.fixed_segments_path(page).exists() {
            Some(SegmentState::Fixed)
        } else if self.raw_segments_path(page).exists() {
            Some(SegmentState::Raw)
        } else {
            None
        }
    }

    /// Path of the effective segment list for a page, with its state.
    pub fn effective_segments_path(&self, page: usize) -> Option<(PathBuf, SegmentState)> {
        match self.segment_state(page)? {
            SegmentState::Fixed => Some((self.fixed_segments_path(page), SegmentState::Fixed)),
            SegmentState::Raw => Some((self.raw_segments_path(page), SegmentState::Raw)),
        }
    }

    // ── Text records ──────────────────────────────────────────────────────

    /// Read and parse a page's text record.
    pub async fn read_text_record(&self, page: usize) -> Result<TextRecord, PipelineError> {
        let path = self.text_path(page);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::io(&path, e))?;
        serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidRecord {
            path,
            detail: e.to_string(),
        })
    }

    /// Persist a page's text record.
    ///
    /// Callers must only invoke this after the producing OCR call fully
    /// succeeded; the resume scanner treats any present, parseable,
    /// non-empty record as final.
    pub async fn write_text_record(&self, page: usize, text: &str) -> Result<(), PipelineError> {
        let path = self.text_path(page);
        let body = serde_json::to_string(&TextRecord {
            text: text.to_string(),
        })
        .map_err(|e| PipelineError::InvalidRecord {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| PipelineError::io(&path, e))
    }

    // ── Resume scanner ────────────────────────────────────────────────────

    /// First page whose text record is missing, unreadable, or empty.
    ///
    /// Returns `page_count + 1` when every page holds a valid record, so
    /// rerunning after a full success is a no-op. Read-only: a crash
    /// mid-OCR never writes a record, so this scan lands exactly on the
    /// page that was in flight.
    pub async fn resume_page(&self, page_count: usize) -> usize {
        for page in 1..=page_count {
            match self.read_text_record(page).await {
                Ok(record) if !record.text.is_empty() => continue,
                Ok(_) => {
                    debug!("page {page}: empty text record, resuming here");
                    return page;
                }
                Err(_) => {
                    debug!("page {page}: missing or unreadable text record, resuming here");
                    return page;
                }
            }
        }
        page_count + 1
    }

    // ── Write lock ────────────────────────────────────────────────────────

    /// Take the directory's exclusive write lock.
    ///
    /// The cache assumes a single writer; the lock makes the "is this
    /// page/boundary already done" check-and-act atomic within one
    /// document's scope. A second run against the same directory gets
    /// [`PipelineError::CacheLocked`] instead of racing the renames.
    /// The lock file is removed when the guard drops.
    pub async fn lock(&self) -> Result<CacheLock, PipelineError> {
        self.ensure_dir().await?;
        let path = self.dir.join(LOCK_FILE);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(CacheLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(PipelineError::CacheLocked { path })
            }
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    // ── Directory listings ────────────────────────────────────────────────

    /// Pages that have a segment list (raw or fixed), sorted, deduplicated.
    pub async fn segment_pages(&self) -> Result<Vec<usize>, PipelineError> {
        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PipelineError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(caps) = SEGMENT_FILE.captures(&name) {
                if let Ok(page) = caps[1].parse::<usize>() {
                    pages.push(page);
                }
            }
        }
        pages.sort_unstable();
        pages.dedup();
        Ok(pages)
    }
}

/// Guard over a document directory's write lock.
///
/// Releasing is best-effort on drop; a crash leaves the lock file behind,
/// which the next run reports as [`PipelineError::CacheLocked`] rather
/// than guessing whether the previous writer is alive.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Every directory in the cache tree, root included, depth-first.
///
/// The steady-state layout is one level deep, but the sweeps tolerate
/// nesting rather than assuming it away.
pub async fn document_dirs(cache_root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut dirs = Vec::new();
    let mut stack = vec![cache_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PipelineError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(&dir, e))?
        {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            }
        }
        dirs.push(dir);
    }
    Ok(dirs)
}

// ── Segment JSONL codec ──────────────────────────────────────────────────

/// Read the ordered `(index, text)` segments from a JSONL file.
///
/// Blank lines and rows that are not a `[number, string, …]` array are
/// skipped rather than failing the read — foreign rows in a hand-edited
/// file must not poison the whole page.
pub async fn read_segments(path: &Path) -> Result<Vec<Segment>, PipelineError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let mut segments = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let Some(row) = value.as_array() else {
            continue;
        };
        if row.len() < 2 {
            continue;
        }
        let (Some(index), Some(text)) = (row[0].as_u64(), row[1].as_str()) else {
            continue;
        };
        segments.push(Segment {
            index: index as usize,
            text: text.to_string(),
        });
    }
    Ok(segments)
}

/// Read just the segment texts, in order.
pub async fn read_segment_texts(path: &Path) -> Result<Vec<String>, PipelineError> {
    Ok(read_segments(path)
        .await?
        .into_iter()
        .map(|s| s.text)
        .collect())
}

/// Write segments as JSONL, renumbering 1..N.
///
/// Atomic: the rows land in a `.tmp` sibling first and are renamed over
/// the target, so a crash mid-write leaves either the old file or none.
pub async fn write_segments(path: &Path, texts: &[String]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
    }

    let mut body = String::new();
    for (idx, text) in texts.iter().enumerate() {
        let row = serde_json::to_string(&(idx + 1, text)).map_err(|e| {
            PipelineError::InvalidRecord {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        body.push_str(&row);
        body.push('\n');
    }

    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, body)
        .await
        .map_err(|e| PipelineError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segments".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn document_name_comes_from_stem() {
        let cache = DocumentCache::for_document(Path::new("/tmp/cache"), Path::new("/docs/thesis.pdf"));
        assert_eq!(cache.dir(), Path::new("/tmp/cache/thesis"));
    }

    #[test]
    fn empty_stem_falls_back_to_unknown() {
        let cache = DocumentCache::for_document(Path::new("/tmp/cache"), Path::new(""));
        assert_eq!(cache.dir(), Path::new("/tmp/cache/unknown"));
    }

    #[test]
    fn artifact_paths_follow_the_layout() {
        let cache = DocumentCache::at("/c/doc");
        assert_eq!(cache.image_path(3), Path::new("/c/doc/page_3.png"));
        assert_eq!(cache.text_path(3), Path::new("/c/doc/page_3.json"));
        assert_eq!(cache.raw_segments_path(3), Path::new("/c/doc/page_3.jsonl"));
        assert_eq!(
            cache.fixed_segments_path(3),
            Path::new("/c/doc/page_3.fixed.jsonl")
        );
    }

    #[test]
    fn segment_file_pattern_accepts_raw_and_fixed() {
        assert!(SEGMENT_FILE.is_match("page_1.jsonl"));
        assert!(SEGMENT_FILE.is_match("page_12.fixed.jsonl"));
        assert!(!SEGMENT_FILE.is_match("page_1.json"));
        assert!(!SEGMENT_FILE.is_match("page_.jsonl"));
        assert!(!SEGMENT_FILE.is_match("chapter_1.jsonl"));
        assert!(!SEGMENT_FILE.is_match("page_1.rst.jsonl"));
    }

    #[tokio::test]
    async fn segments_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page_1.jsonl");
        let texts = strings(&["First sentence.", "Second sentence.", "Third."]);

        write_segments(&path, &texts).await.unwrap();
        let back = read_segments(&path).await.unwrap();

        assert_eq!(back.len(), 3);
        for (i, seg) in back.iter().enumerate() {
            assert_eq!(seg.index, i + 1);
            assert_eq!(seg.text, texts[i]);
        }
    }

    #[tokio::test]
    async fn writer_renumbers_from_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page_2.fixed.jsonl");
        write_segments(&path, &strings(&["a", "b"])).await.unwrap();
        write_segments(&path, &strings(&["x", "y", "z"])).await.unwrap();

        let back = read_segments(&path).await.unwrap();
        let indices: Vec<usize> = back.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reader_skips_foreign_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page_1.jsonl");
        tokio::fs::write(
            &path,
            "[1, \"keep me\"]\n\nnot json\n{\"index\": 2}\n[3]\n[2, \"and me\"]\n",
        )
        .await
        .unwrap();

        let texts = read_segment_texts(&path).await.unwrap();
        assert_eq!(texts, strings(&["keep me", "and me"]));
    }

    #[tokio::test]
    async fn resume_scan_finds_first_invalid_page() {
        let dir = tempdir().unwrap();
        let cache = DocumentCache::at(dir.path());
        cache.write_text_record(1, "page one").await.unwrap();
        cache.write_text_record(2, "page two").await.unwrap();
        // page 3 missing

        assert_eq!(cache.resume_page(5).await, 3);
    }

    #[tokio::test]
    async fn resume_scan_catches_empty_and_corrupt_records() {
        let dir = tempdir().unwrap();
        let cache = DocumentCache::at(dir.path());
        cache.write_text_record(1, "ok").await.unwrap();
        cache.write_text_record(2, "").await.unwrap();
        assert_eq!(cache.resume_page(3).await, 2);

        tokio::fs::write(cache.text_path(2), "{ not json").await.unwrap();
        assert_eq!(cache.resume_page(3).await, 2);
    }

    #[tokio::test]
    async fn resume_scan_full_cache_returns_count_plus_one() {
        let dir = tempdir().unwrap();
        let cache = DocumentCache::at(dir.path());
        for page in 1..=4 {
            cache.write_text_record(page, "text").await.unwrap();
        }
        assert_eq!(cache.resume_page(4).await, 5);
    }

    #[tokio::test]
    async fn segment_pages_merges_raw_and_fixed() {
        let dir = tempdir().unwrap();
        let cache = DocumentCache::at(dir.path());
        write_segments(&cache.raw_segments_path(3), &strings(&["c"]))
            .await
            .unwrap();
        write_segments(&cache.fixed_segments_path(1), &strings(&["a"]))
            .await
            .unwrap();
        write_segments(&cache.raw_segments_path(2), &strings(&["b"]))
            .await
            .unwrap();

        assert_eq!(cache.segment_pages().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn effective_path_prefers_fixed() {
        let dir = tempdir().unwrap();
        let cache = DocumentCache::at(dir.path());
        write_segments(&cache.raw_segments_path(1), &strings(&["raw"]))
            .await
            .unwrap();
        write_segments(&cache.fixed_segments_path(1), &strings(&["fixed"]))
            .await
            .unwrap();

        let (path, state) = cache.effective_segments_path(1).unwrap();
        assert_eq!(state, SegmentState::Fixed);
        assert_eq!(path, cache.fixed_segments_path(1));
    }

    #[tokio::test]
    async fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let cache = DocumentCache::at(dir.path());

        let guard = cache.lock().await.unwrap();
        let second = cache.lock().await;
        assert!(matches!(second, Err(PipelineError::CacheLocked { .. })));

        drop(guard);
        let third = cache.lock().await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn document_dirs_walks_the_tree() {
        let root = tempdir().unwrap();
        tokio::fs::create_dir_all(root.path().join("doc_a")).await.unwrap();
        tokio::fs::create_dir_all(root.path().join("doc_b/nested"))
            .await
            .unwrap();

        let dirs = document_dirs(root.path()).await.unwrap();
        assert!(dirs.iter().any(|d| d.as_path() == root.path()));
        assert!(dirs.iter().any(|d| d.ends_with("doc_a")));
        assert!(dirs.iter().any(|d| d.ends_with("nested")));
    }
}
