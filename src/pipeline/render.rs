//! External renderer: page counting via `pdfinfo`, rasterisation via
//! `pdftoppm`.
//!
//! Rasterisation is delegated to the poppler tools as opaque subprocesses
//! rather than linked in-process: the pipeline only needs one PNG per
//! page, produced once and cached forever, and a subprocess boundary
//! means a crashing renderer can never take the pipeline down with it.
//!
//! `pdftoppm` writes into a temporary directory first; the bytes are
//! copied to the canonical cache path only after the tool exits
//! successfully, so the cache never holds a truncated image.

use crate::cache::DocumentCache;
use crate::error::PipelineError;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Number of pages in the PDF, from `pdfinfo`.
pub async fn page_count(pdf_path: &Path) -> Result<usize, PipelineError> {
    if !pdf_path.exists() {
        return Err(PipelineError::FileNotFound {
            path: pdf_path.to_path_buf(),
        });
    }

    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .map_err(|e| PipelineError::PageCountFailed {
            path: pdf_path.to_path_buf(),
            detail: format!("failed to run pdfinfo: {e}"),
        })?;

    if !output.status.success() {
        return Err(PipelineError::PageCountFailed {
            path: pdf_path.to_path_buf(),
            detail: format!(
                "pdfinfo exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_page_count(&stdout).ok_or_else(|| PipelineError::PageCountFailed {
        path: pdf_path.to_path_buf(),
        detail: "no parseable 'Pages:' line in pdfinfo output".into(),
    })
}

/// Extract the page count from `pdfinfo` stdout.
fn parse_page_count(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Ensure the rendered PNG for `page` exists in the document cache.
///
/// A no-op when the image is already cached. Otherwise `pdftoppm`
/// renders exactly that page into a temp directory and the result is
/// copied to [`DocumentCache::image_path`]. Any tool failure aborts the
/// whole run — a page that cannot be rendered means every later page
/// would land at the wrong position in the sentence stream.
pub async fn render_page(
    pdf_path: &Path,
    page: usize,
    cache: &DocumentCache,
) -> Result<(), PipelineError> {
    if !pdf_path.exists() {
        return Err(PipelineError::FileNotFound {
            path: pdf_path.to_path_buf(),
        });
    }
    if page < 1 {
        return Err(PipelineError::InvalidPageNumber { page });
    }

    let output_path = cache.image_path(page);
    if output_path.exists() {
        debug!("page {page}: image already cached");
        return Ok(());
    }

    cache.ensure_dir().await?;

    let tmp_dir = tempfile::Builder::new()
        .prefix("pdf2sent_render_")
        .tempdir()
        .map_err(|e| PipelineError::RenderFailed {
            path: pdf_path.to_path_buf(),
            page,
            detail: format!("temp dir: {e}"),
        })?;
    let tmp_stem = tmp_dir.path().join(format!("page_{page}"));

    let output = Command::new("pdftoppm")
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-png")
        .arg("-singlefile")
        .arg(pdf_path)
        .arg(&tmp_stem)
        .output()
        .await
        .map_err(|e| PipelineError::RenderFailed {
            path: pdf_path.to_path_buf(),
            page,
            detail: format!("failed to run pdftoppm: {e}"),
        })?;

    if !output.status.success() {
        return Err(PipelineError::RenderFailed {
            path: pdf_path.to_path_buf(),
            page,
            detail: format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let tmp_png = tmp_stem.with_extension("png");
    if !tmp_png.exists() {
        return Err(PipelineError::RenderFailed {
            path: pdf_path.to_path_buf(),
            page,
            detail: "pdftoppm reported success but produced no output file".into(),
        });
    }

    let bytes = tokio::fs::read(&tmp_png)
        .await
        .map_err(|e| PipelineError::io(&tmp_png, e))?;
    tokio::fs::write(&output_path, &bytes)
        .await
        .map_err(|e| PipelineError::io(&output_path, e))?;

    info!(
        "page {page}: rendered {} bytes → {}",
        bytes.len(),
        output_path.display()
    );
    Ok(())
}
