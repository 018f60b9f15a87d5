//! # pdf2sent
//!
//! Convert a multi-page PDF into clean, sentence-segmented text —
//! incrementally, with every intermediate artifact cached on disk.
//!
//! ## Why this crate?
//!
//! OCR'ing a long document through a vision model is slow and flaky:
//! calls time out and segmentation services shed load under pressure.
//! Redoing a 300-page document because page 211 failed is not an option.
//! This crate persists every per-page artifact (rendered image, OCR
//! text, segment list) the moment it is complete, scans the cache on
//! startup to find the first page still missing valid text, and resumes
//! exactly there. Sentences cut in half by the page break — the classic
//! artefact of per-page OCR — are repaired by re-segmenting a small
//! window around every page cut.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render    rasterise missing pages via pdftoppm (cached as PNG)
//!  ├─ 2. OCR       "free OCR" chat request per page → page_<n>.json
//!  ├─ 3. Split     sentence segmentation per page   → page_<n>.jsonl
//!  ├─ 4. Boundary  repair cross-page sentence cuts  → page_<n>.fixed.jsonl
//!  └─ 5. Resplit   break over-long segments         → <stem>.rst.jsonl
//! ```
//!
//! Every stage skips work already in the cache, so each is safe to rerun
//! at any time. Pages are processed strictly in order, one at a time —
//! the cache directory assumes a single writer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2sent::{process_document, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Services resolved from PDF2SENT_* env vars / pdf2sent.toml
//!     let config = PipelineConfig::from_env()?;
//!     let stats = process_document("document.pdf", &config).await?;
//!     eprintln!(
//!         "{} pages OCR'd, {} boundaries repaired",
//!         stats.ocr.pages_processed, stats.boundary.pairs_repaired
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2sent` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2sent = { version = "0.3", default-features = false }
//! ```
//!
//! ## External services
//!
//! | Service | Contract | Retry |
//! |---------|----------|-------|
//! | renderer | `pdfinfo` / `pdftoppm` subprocesses | none |
//! | OCR | Ollama-style `/api/chat`, one image per request | none |
//! | sentence splitter | `{texts, threshold?}` → nested segments | 3× on 503, doubling backoff |
//! | discourse splitter | `{text}` → inclusive char-offset spans | none |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{DocumentCache, Segment, SegmentState, TextRecord};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::PipelineError;
pub use pipeline::boundary::{fix_boundary_pair, fix_cache_boundaries, BoundaryOutcome, BoundaryStats};
pub use pipeline::ocr::{ocr_document, ocr_pages, OcrStats};
pub use pipeline::render::{page_count, render_page};
pub use pipeline::resplit::{resplit_long_segments, ResplitOutcome};
pub use pipeline::split::{split_cache, split_page, SplitOutcome, SplitStats};
pub use process::{process_document, process_document_sync, ProcessStats};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use services::{OcrClient, SegmentationClient};
