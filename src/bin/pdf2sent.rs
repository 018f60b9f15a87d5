//! CLI binary for pdf2sent.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, picks the requested stage, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2sent::{
    fix_cache_boundaries, ocr_document, process_document, resplit_long_segments, split_cache,
    OcrClient, PipelineConfig, PipelineProgressCallback, ProgressCallback, SegmentationClient,
    Stage,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar that is re-armed at the start of
/// each pipeline stage. Events arrive strictly in order (the pipeline is
/// sequential), so no locking is needed beyond what indicatif provides.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn stage_prefix(stage: Stage) -> &'static str {
        match stage {
            Stage::Ocr => "Extracting",
            Stage::Split => "Splitting",
            Stage::Boundary => "Fixing boundaries",
            Stage::Resplit => "Resplitting",
        }
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, total_units: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.reset();
        self.bar.set_length(total_units as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(Self::stage_prefix(stage));
    }

    fn on_unit_start(&self, stage: Stage, unit: usize, _total: usize) {
        let noun = match stage {
            Stage::Boundary => "pair",
            Stage::Resplit => "segment",
            _ => "page",
        };
        self.bar.set_message(format!("{noun} {unit}"));
    }

    fn on_unit_complete(&self, _stage: Stage, _unit: usize, _total: usize, _detail_len: usize) {
        self.bar.inc(1);
    }

    fn on_unit_error(&self, _stage: Stage, unit: usize, total: usize, error: String) {
        let msg = if error.len() > 80 {
            format!("{}\u{2026}", &error[..79])
        } else {
            error
        };
        self.bar
            .println(format!("  {} {unit:>3}/{total:<3}  {}", red("✗"), red(&msg)));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: Stage, success_count: usize) {
        self.bar.println(format!(
            "  {} {}: {} units done",
            green("✓"),
            Self::stage_prefix(stage),
            success_count
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full pipeline: OCR, sentence split, boundary repair
  pdf2sent document.pdf

  # Resume an interrupted run (already-cached pages are skipped)
  pdf2sent document.pdf

  # Run a single stage over the cache
  pdf2sent --stage ocr document.pdf
  pdf2sent --stage split document.pdf
  pdf2sent --stage boundaries document.pdf

  # Break over-long segments in a finished segment file
  pdf2sent --resplit cache/document/page_3.fixed.jsonl --min-chars 120

  # See which models the OCR service offers
  pdf2sent --list-models

CACHE LAYOUT (per document):
  cache/<stem>/page_<n>.png          rendered page image
  cache/<stem>/page_<n>.json         raw OCR text
  cache/<stem>/page_<n>.jsonl        sentence segments
  cache/<stem>/page_<n>.fixed.jsonl  boundary-checked segments
  cache/<stem>/<name>.rst.jsonl      resplitter output

ENVIRONMENT VARIABLES:
  PDF2SENT_OCR_BASE_URL      OCR/chat service (default: http://localhost:11434)
  PDF2SENT_SPLIT_BASE_URL    sentence-segmentation /split endpoint
  PDF2SENT_RST_BASE_URL      discourse-segmentation endpoint
  PDF2SENT_TOKEN             bearer token for all three services
  PDF2SENT_MODEL             vision model for OCR (default: llava)
  PDF2SENT_CACHE_DIR         cache root (default: ./cache)
  PDF2SENT_SPLIT_THRESHOLD   confidence threshold for the splitter
  PDF2SENT_CONFIG            path to pdf2sent.toml (fallback config file)

REQUIREMENTS:
  pdfinfo and pdftoppm (poppler-utils) must be on PATH for rendering.
"#;

/// Convert a PDF into sentence-segmented text, incrementally and cached.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2sent",
    version,
    about = "Convert a PDF into clean, sentence-segmented text",
    long_about = "Convert a multi-page PDF into sentence-segmented text: pages are rendered \
with pdftoppm, transcribed by a vision model, split into sentences by an external \
segmentation service, and sentences cut across page breaks are repaired. Every artifact \
is cached per page, so interrupted runs resume where they stopped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: Option<PathBuf>,

    /// Pipeline stage to run: all, ocr, split, boundaries.
    #[arg(long, value_enum, default_value = "all")]
    stage: StageArg,

    /// Run the long-segment resplitter on this JSONL segment file
    /// instead of processing a PDF.
    #[arg(long, value_name = "JSONL")]
    resplit: Option<PathBuf>,

    /// Write resplitter output here (default: input with .rst.jsonl).
    #[arg(short, long, requires = "resplit")]
    output: Option<PathBuf>,

    /// List the OCR service's available models and exit.
    #[arg(long)]
    list_models: bool,

    /// Cache root directory.
    #[arg(long, env = "PDF2SENT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Vision model for OCR (e.g. llava, llama3.2-vision).
    #[arg(long, env = "PDF2SENT_MODEL")]
    model: Option<String>,

    /// OCR/chat service base URL.
    #[arg(long, env = "PDF2SENT_OCR_BASE_URL")]
    ocr_url: Option<String>,

    /// Sentence-segmentation /split endpoint URL.
    #[arg(long, env = "PDF2SENT_SPLIT_BASE_URL")]
    split_url: Option<String>,

    /// Discourse-segmentation endpoint URL.
    #[arg(long, env = "PDF2SENT_RST_BASE_URL")]
    rst_url: Option<String>,

    /// Bearer token for the services.
    #[arg(long, env = "PDF2SENT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Confidence threshold forwarded to the sentence splitter.
    #[arg(long, env = "PDF2SENT_SPLIT_THRESHOLD")]
    threshold: Option<f64>,

    /// Minimum segment length (chars) before the resplitter kicks in
    /// (default: 120).
    #[arg(long)]
    min_chars: Option<usize>,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StageArg {
    All,
    Ocr,
    Split,
    Boundaries,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters interactively.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli, show_progress)?;

    // ── List-models mode ─────────────────────────────────────────────────
    if cli.list_models {
        let client = OcrClient::new(&config)?;
        let models = client
            .list_models()
            .await
            .context("failed to query the OCR service")?;
        for model in models {
            println!("{model}");
        }
        return Ok(());
    }

    // ── Resplit mode ─────────────────────────────────────────────────────
    if let Some(ref jsonl_path) = cli.resplit {
        let client = SegmentationClient::new(&config)?;
        let outcome = resplit_long_segments(jsonl_path, cli.output.as_deref(), &client, &config)
            .await
            .context("resplit failed")?;

        if !cli.quiet {
            let verdict = if outcome.changed {
                "split long segments"
            } else {
                "no long segments found"
            };
            eprintln!(
                "{} {verdict}  →  {} {}",
                green("✔"),
                bold(&outcome.output_path.display().to_string()),
                dim(&format!("({} segments)", outcome.segments_written)),
            );
        }
        return Ok(());
    }

    // ── Document pipeline ────────────────────────────────────────────────
    let pdf_path = cli
        .input
        .clone()
        .context("a PDF path is required unless --resplit or --list-models is used")?;

    match cli.stage {
        StageArg::All => {
            let stats = process_document(&pdf_path, &config)
                .await
                .context("processing failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} pages OCR'd (resumed at {}), {} pages split, {} boundaries checked, {} repaired  {}",
                    green("✔"),
                    stats.ocr.pages_processed,
                    stats.ocr.resumed_from,
                    stats.split.pages_split,
                    stats.boundary.pairs_checked,
                    stats.boundary.pairs_repaired,
                    dim(&format!("{}ms", stats.total_duration_ms)),
                );
                if stats.split.pages_failed > 0 {
                    eprintln!(
                        "   {} pages failed to split — rerun to retry",
                        red(&stats.split.pages_failed.to_string())
                    );
                }
            }
        }
        StageArg::Ocr => {
            let stats = ocr_document(&pdf_path, &config)
                .await
                .context("OCR stage failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {}/{} pages extracted {}",
                    green("✔"),
                    stats.pages_processed,
                    stats.page_count,
                    dim(&format!("{}ms", stats.duration_ms)),
                );
            }
        }
        StageArg::Split => {
            let stats = split_cache(&config).await.context("split stage failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} split, {} skipped, {} failed {}",
                    if stats.pages_failed == 0 { green("✔") } else { red("⚠") },
                    stats.pages_split,
                    stats.pages_skipped,
                    stats.pages_failed,
                    dim(&format!("{}ms", stats.duration_ms)),
                );
            }
        }
        StageArg::Boundaries => {
            let stats = fix_cache_boundaries(&config)
                .await
                .context("boundary stage failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} pairs checked, {} repaired, {} skipped {}",
                    green("✔"),
                    stats.pairs_checked,
                    stats.pairs_repaired,
                    stats.pairs_skipped,
                    dim(&format!("{}ms", stats.duration_ms)),
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args over the env/file-resolved config.
fn build_config(cli: &Cli, show_progress: bool) -> Result<PipelineConfig> {
    // Start from the environment/config-file chain, then let explicit
    // flags win.
    let base = PipelineConfig::from_env().context("invalid configuration")?;

    let mut builder = PipelineConfig::builder()
        .cache_root(cli.cache_dir.clone().unwrap_or(base.cache_root))
        .model(cli.model.clone().unwrap_or(base.model))
        .ocr_base_url(cli.ocr_url.clone().unwrap_or(base.ocr_base_url))
        .split_base_url(cli.split_url.clone().unwrap_or(base.split_base_url))
        .rst_base_url(cli.rst_url.clone().unwrap_or(base.rst_base_url))
        .min_resplit_chars(cli.min_chars.unwrap_or(base.min_resplit_chars));

    if let Some(token) = cli.token.clone().or(base.token) {
        builder = builder.token(token);
    }
    if let Some(threshold) = cli.threshold.or(base.threshold) {
        builder = builder.threshold(threshold);
    }
    if show_progress {
        builder = builder.progress(CliProgressCallback::new() as ProgressCallback);
    }

    builder.build().context("invalid configuration")
}
