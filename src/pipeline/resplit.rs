//! Long-segment resplitter: break over-long segments into discourse units.
//!
//! Sentence segmentation occasionally leaves a segment that is really a
//! whole passage, typically dense academic prose or a run-on list.
//! Segments at or above the length threshold are sent to the
//! discourse-level service, which answers with inclusive `(start, end)`
//! character offsets into the original string; the sub-strings replace
//! the one segment in place. Everything below the threshold passes
//! through byte-for-byte.
//!
//! Output goes to a new file (input stem + `.rst.jsonl`) instead of
//! overwriting the input, keeping the original list as an audit trail.

use crate::cache;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::progress::Stage;
use crate::services::SegmentationClient;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of one resplit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResplitOutcome {
    /// Where the rewritten list was written.
    pub output_path: PathBuf,
    /// Whether any segment was actually split. `false` means the output
    /// file is a renumbered copy of the input.
    pub changed: bool,
    /// Segments in the output file.
    pub segments_written: usize,
}

/// Re-split every over-long segment of a JSONL segment file.
///
/// `output_path` defaults to the input path with `.jsonl` replaced by
/// `.rst.jsonl`. The threshold comes from
/// [`PipelineConfig::min_resplit_chars`], measured in characters so
/// multi-byte scripts are not penalised.
pub async fn resplit_long_segments(
    jsonl_path: &Path,
    output_path: Option<&Path>,
    client: &SegmentationClient,
    config: &PipelineConfig,
) -> Result<ResplitOutcome, PipelineError> {
    if !jsonl_path.exists() {
        return Err(PipelineError::FileNotFound {
            path: jsonl_path.to_path_buf(),
        });
    }

    let output_path = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(jsonl_path));

    let texts = cache::read_segment_texts(jsonl_path).await?;
    let total = texts.len();

    if let Some(cb) = &config.progress {
        cb.on_stage_start(Stage::Resplit, total);
    }

    let mut rewritten: Vec<String> = Vec::with_capacity(total);
    let mut changed = false;

    for (unit, text) in texts.into_iter().enumerate() {
        let unit = unit + 1;
        if let Some(cb) = &config.progress {
            cb.on_unit_start(Stage::Resplit, unit, total);
        }

        let before = rewritten.len();
        if text.chars().count() >= config.min_resplit_chars {
            let spans = match client.discourse_spans(&text).await {
                Ok(spans) => spans,
                Err(e) => {
                    if let Some(cb) = &config.progress {
                        cb.on_unit_error(Stage::Resplit, unit, total, e.to_string());
                    }
                    return Err(e);
                }
            };
            let pieces = extract_spans(&text, &spans);
            if pieces.is_empty() {
                rewritten.push(text);
            } else {
                debug!(
                    "segment of {} chars resplit into {} discourse units",
                    text.chars().count(),
                    pieces.len()
                );
                rewritten.extend(pieces);
                changed = true;
            }
        } else {
            rewritten.push(text);
        }

        if let Some(cb) = &config.progress {
            cb.on_unit_complete(Stage::Resplit, unit, total, rewritten.len() - before);
        }
    }

    if rewritten.is_empty() {
        return Err(PipelineError::EmptySegmentFile {
            path: jsonl_path.to_path_buf(),
        });
    }

    cache::write_segments(&output_path, &rewritten).await?;
    if changed {
        info!(
            "resplit {} → {} ({} segments)",
            jsonl_path.display(),
            output_path.display(),
            rewritten.len()
        );
    } else {
        info!(
            "no segments over threshold in {}; wrote {}",
            jsonl_path.display(),
            output_path.display()
        );
    }

    if let Some(cb) = &config.progress {
        cb.on_stage_complete(Stage::Resplit, rewritten.len());
    }

    Ok(ResplitOutcome {
        output_path,
        changed,
        segments_written: rewritten.len(),
    })
}

/// Materialise inclusive character-offset spans. Spans that fall outside
/// the text are clamped; degenerate or empty results are dropped.
fn extract_spans(text: &str, spans: &[(usize, usize)]) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::with_capacity(spans.len());
    for &(start, end) in spans {
        if start >= chars.len() || start > end {
            continue;
        }
        let end = end.min(chars.len() - 1);
        let piece: String = chars[start..=end].iter().collect();
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }
    pieces
}

/// `page_2.fixed.jsonl` → `page_2.fixed.rst.jsonl`, next to the input.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segments".to_string());
    input.with_file_name(format!("{stem}.rst.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config_for(server: &MockServer, min_chars: usize) -> PipelineConfig {
        PipelineConfig::builder()
            .rst_base_url(server.url("/rst"))
            .min_resplit_chars(min_chars)
            .build()
            .unwrap()
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn output_path_adds_rst_suffix() {
        assert_eq!(
            default_output_path(Path::new("/c/doc/page_2.jsonl")),
            Path::new("/c/doc/page_2.rst.jsonl")
        );
        assert_eq!(
            default_output_path(Path::new("/c/doc/page_2.fixed.jsonl")),
            Path::new("/c/doc/page_2.fixed.rst.jsonl")
        );
    }

    #[test]
    fn extract_spans_is_inclusive_and_clamped() {
        let text = "abcdef";
        assert_eq!(
            extract_spans(text, &[(0, 2), (3, 5)]),
            strings(&["abc", "def"])
        );
        // End past the text clamps; start past the text drops.
        assert_eq!(extract_spans(text, &[(4, 99)]), strings(&["ef"]));
        assert_eq!(extract_spans(text, &[(99, 100)]), Vec::<String>::new());
    }

    #[test]
    fn extract_spans_counts_characters_not_bytes() {
        let text = "äöü end";
        assert_eq!(extract_spans(text, &[(0, 2)]), strings(&["äöü"]));
    }

    #[tokio::test]
    async fn long_segment_is_replaced_in_place() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("page_1.fixed.jsonl");
        let long = "A long clause, and another one after it.";
        cache::write_segments(&input, &strings(&["Short.", long, "Also short."]))
            .await
            .unwrap();

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/rst");
                then.status(200).json_body(json!([[0, 13], [15, 39]]));
            })
            .await;

        let config = config_for(&server, 20);
        let client = SegmentationClient::new(&config).unwrap();

        let outcome = resplit_long_segments(&input, None, &client, &config)
            .await
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.output_path, dir.path().join("page_1.fixed.rst.jsonl"));
        mock.assert_hits_async(1).await;

        let texts = cache::read_segment_texts(&outcome.output_path).await.unwrap();
        assert_eq!(
            texts,
            strings(&[
                "Short.",
                "A long clause,",
                "and another one after it.",
                "Also short."
            ])
        );
        // The input file stays behind as the audit trail.
        assert!(input.exists());
    }

    #[tokio::test]
    async fn below_threshold_passes_through_unchanged() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("page_1.jsonl");
        cache::write_segments(&input, &strings(&["One.", "Two."]))
            .await
            .unwrap();

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/rst");
                then.status(200).json_body(json!([]));
            })
            .await;

        let config = config_for(&server, 120);
        let client = SegmentationClient::new(&config).unwrap();

        let outcome = resplit_long_segments(&input, None, &client, &config)
            .await
            .unwrap();

        assert!(!outcome.changed);
        assert_eq!(outcome.segments_written, 2);
        mock.assert_hits_async(0).await;

        let texts = cache::read_segment_texts(&outcome.output_path).await.unwrap();
        assert_eq!(texts, strings(&["One.", "Two."]));
    }

    #[tokio::test]
    async fn empty_span_response_keeps_the_original_segment() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("page_1.jsonl");
        let long = "A segment well over the tiny threshold used here.";
        cache::write_segments(&input, &strings(&[long])).await.unwrap();

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rst");
                then.status(200).json_body(json!([]));
            })
            .await;

        let config = config_for(&server, 10);
        let client = SegmentationClient::new(&config).unwrap();

        let outcome = resplit_long_segments(&input, None, &client, &config)
            .await
            .unwrap();
        assert!(!outcome.changed);
        let texts = cache::read_segment_texts(&outcome.output_path).await.unwrap();
        assert_eq!(texts, strings(&[long]));
    }

    #[tokio::test]
    async fn empty_input_is_an_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("page_1.jsonl");
        tokio::fs::write(&input, "").await.unwrap();

        let server = MockServer::start_async().await;
        let config = config_for(&server, 120);
        let client = SegmentationClient::new(&config).unwrap();

        let err = resplit_long_segments(&input, None, &client, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptySegmentFile { .. }));
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let server = MockServer::start_async().await;
        let config = config_for(&server, 120);
        let client = SegmentationClient::new(&config).unwrap();

        let err = resplit_long_segments(Path::new("/nope/page_1.jsonl"), None, &client, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}
