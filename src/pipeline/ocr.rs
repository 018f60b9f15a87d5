//! Page OCR executor: image in, text record out, resumable.
//!
//! The executor walks pages strictly in order from the resume point,
//! ensuring each page's image exists before asking the OCR service for a
//! free transcription. The text record is written only after the OCR
//! call fully succeeded — a crash or service failure mid-call leaves no
//! record behind, which is exactly what makes the resume scan land on
//! the right page next run.
//!
//! Any failure aborts the run immediately rather than skipping to the
//! next page: a gap in the text records would break the page-order
//! invariant every later stage depends on.

use crate::cache::DocumentCache;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::render;
use crate::progress::Stage;
use crate::services::OcrClient;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of an OCR run over one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrStats {
    /// Total pages in the document.
    pub page_count: usize,
    /// First page actually processed; `page_count + 1` when the cache was
    /// already complete.
    pub resumed_from: usize,
    /// Pages OCR'd in this run.
    pub pages_processed: usize,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// OCR every missing page of the document, deriving the page count via
/// `pdfinfo`.
pub async fn ocr_document(
    pdf_path: &Path,
    config: &PipelineConfig,
) -> Result<OcrStats, PipelineError> {
    let page_count = render::page_count(pdf_path).await?;
    if page_count < 1 {
        return Err(PipelineError::PageCountFailed {
            path: pdf_path.to_path_buf(),
            detail: "document reports zero pages".into(),
        });
    }
    ocr_pages(pdf_path, page_count, config).await
}

/// OCR every missing page when the page count is already known.
///
/// Split out from [`ocr_document`] so embedders that cached the count
/// (or obtained it elsewhere) skip the extra `pdfinfo` run.
pub async fn ocr_pages(
    pdf_path: &Path,
    page_count: usize,
    config: &PipelineConfig,
) -> Result<OcrStats, PipelineError> {
    let start = Instant::now();
    let cache = DocumentCache::for_document(&config.cache_root, pdf_path);
    let _lock = cache.lock().await?;

    let client = OcrClient::new(config)?;
    let resumed_from = cache.resume_page(page_count).await;
    let remaining = page_count.saturating_sub(resumed_from) + 1;

    if resumed_from > page_count {
        info!("all {page_count} pages already extracted, nothing to do");
        return Ok(OcrStats {
            page_count,
            resumed_from,
            pages_processed: 0,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }
    info!("extracting pages {resumed_from}..={page_count} of {}", pdf_path.display());

    if let Some(cb) = &config.progress {
        cb.on_stage_start(Stage::Ocr, remaining);
    }

    let mut pages_processed = 0;
    for page in resumed_from..=page_count {
        if let Some(cb) = &config.progress {
            cb.on_unit_start(Stage::Ocr, page, page_count);
        }
        match ocr_page(pdf_path, page, &cache, &client, config).await {
            Ok(text_len) => {
                pages_processed += 1;
                if let Some(cb) = &config.progress {
                    cb.on_unit_complete(Stage::Ocr, page, page_count, text_len);
                }
            }
            Err(e) => {
                if let Some(cb) = &config.progress {
                    cb.on_unit_error(Stage::Ocr, page, page_count, e.to_string());
                }
                return Err(e);
            }
        }
    }

    if let Some(cb) = &config.progress {
        cb.on_stage_complete(Stage::Ocr, pages_processed);
    }

    Ok(OcrStats {
        page_count,
        resumed_from,
        pages_processed,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Render (if needed) and OCR one page. Returns the text length written.
async fn ocr_page(
    pdf_path: &Path,
    page: usize,
    cache: &DocumentCache,
    client: &OcrClient,
    config: &PipelineConfig,
) -> Result<usize, PipelineError> {
    let image_path = cache.image_path(page);
    if !image_path.exists() {
        render::render_page(pdf_path, page, cache).await?;
    }

    // The renderer just claimed success; a still-missing image is a
    // broken contract, not a rendering error.
    if !image_path.exists() {
        return Err(PipelineError::CachedImageMissing {
            page,
            path: image_path,
        });
    }

    let image = tokio::fs::read(&image_path)
        .await
        .map_err(|e| PipelineError::io(&image_path, e))?;
    debug!("page {page}: sending {} image bytes to OCR", image.len());

    let text = client.free_ocr(&config.model, page, &image).await?;
    cache.write_text_record(page, &text).await?;
    Ok(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config_for(server: &MockServer, cache_root: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .cache_root(cache_root)
            .ocr_base_url(server.base_url())
            .model("llava")
            .build()
            .unwrap()
    }

    async fn seed_images(cache: &DocumentCache, pages: &[usize]) {
        cache.ensure_dir().await.unwrap();
        for &page in pages {
            tokio::fs::write(cache.image_path(page), b"fake png")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn resumes_after_valid_pages_and_writes_records() {
        let dir = tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let pdf = dir.path().join("doc.pdf");

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200)
                    .json_body(json!({"message": {"content": "extracted text"}}));
            })
            .await;

        let config = config_for(&server, &cache_root);
        let cache = DocumentCache::for_document(&cache_root, &pdf);
        seed_images(&cache, &[1, 2, 3]).await;
        cache.write_text_record(1, "already done").await.unwrap();

        let stats = ocr_pages(&pdf, 3, &config).await.unwrap();

        assert_eq!(stats.resumed_from, 2);
        assert_eq!(stats.pages_processed, 2);
        mock.assert_hits_async(2).await;
        assert_eq!(cache.read_text_record(1).await.unwrap().text, "already done");
        assert_eq!(
            cache.read_text_record(3).await.unwrap().text,
            "extracted text"
        );
    }

    #[tokio::test]
    async fn complete_cache_is_a_noop() {
        let dir = tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let pdf = dir.path().join("doc.pdf");

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).json_body(json!({"message": {"content": "x"}}));
            })
            .await;

        let config = config_for(&server, &cache_root);
        let cache = DocumentCache::for_document(&cache_root, &pdf);
        cache.ensure_dir().await.unwrap();
        for page in 1..=2 {
            cache.write_text_record(page, "done").await.unwrap();
        }

        let stats = ocr_pages(&pdf, 2, &config).await.unwrap();
        assert_eq!(stats.resumed_from, 3);
        assert_eq!(stats.pages_processed, 0);
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn ocr_failure_aborts_and_leaves_no_record() {
        let dir = tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let pdf = dir.path().join("doc.pdf");

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(502);
            })
            .await;

        let config = config_for(&server, &cache_root);
        let cache = DocumentCache::for_document(&cache_root, &pdf);
        seed_images(&cache, &[1, 2]).await;

        let err = ocr_pages(&pdf, 2, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::OcrFailed { page: 1, .. }));
        assert!(!cache.text_path(1).exists(), "no record may be written");
        assert!(!cache.text_path(2).exists(), "later pages must not run");
    }

    #[tokio::test]
    async fn missing_image_and_missing_pdf_fail_at_render() {
        let dir = tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let pdf = dir.path().join("ghost.pdf"); // never created

        let server = MockServer::start_async().await;
        let config = config_for(&server, &cache_root);

        let err = ocr_pages(&pdf, 1, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}
