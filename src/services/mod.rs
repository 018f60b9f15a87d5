//! Clients for the external services the pipeline depends on.
//!
//! Each client owns one `reqwest::Client` and the slice of
//! [`crate::config::PipelineConfig`] it needs (base URL, token,
//! timeouts). All of them treat the remote side as an opaque contract:
//! request shape in, response shape out, descriptive error otherwise.
//!
//! 1. [`ocr`]     — image-grounded chat requests against an Ollama-style
//!    REST API ("free OCR" of a page bitmap) plus model discovery
//! 2. [`segment`] — the sentence splitter (retried on 503 with doubling
//!    backoff) and the discourse splitter (offset spans, no retry)

pub mod ocr;
pub mod segment;

pub use ocr::OcrClient;
pub use segment::SegmentationClient;
