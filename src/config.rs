//! Configuration for the pdf2sent pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`] and threaded explicitly through every stage
//! call. Keeping every knob in one struct makes it trivial to share a
//! config across stages, log it, and diff two runs to understand why
//! their caches differ.
//!
//! # Resolution order
//!
//! [`PipelineConfig::from_env`] resolves each field from, in order:
//!
//! 1. `PDF2SENT_*` environment variables
//! 2. a `pdf2sent.toml` file (path from `PDF2SENT_CONFIG`, else the
//!    current directory)
//! 3. built-in defaults
//!
//! The result is an ordinary value constructed once at startup — no stage
//! reads the environment on its own.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration for a document-processing run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::from_env()`].
///
/// # Example
/// ```rust
/// use pdf2sent::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .cache_root("./cache")
///     .model("llava")
///     .split_base_url("https://segment.example.com/split")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory holding one cache subdirectory per document. Default: `./cache`.
    pub cache_root: PathBuf,

    /// Vision model identifier passed to the OCR service. Default: `llava`.
    pub model: String,

    /// Base URL of the OCR/chat service. Default: `http://localhost:11434`.
    pub ocr_base_url: String,

    /// URL of the sentence-segmentation `/split` endpoint. Empty until
    /// configured; the segmentation client rejects calls while it is empty.
    pub split_base_url: String,

    /// URL of the discourse-segmentation endpoint. Empty until configured.
    pub rst_base_url: String,

    /// Bearer token sent to all three services. `None` sends no
    /// `Authorization` header.
    pub token: Option<String>,

    /// Optional confidence threshold forwarded to the sentence splitter.
    ///
    /// The service applies its own default when this is `None`; we never
    /// invent one client-side.
    pub threshold: Option<f64>,

    /// Minimum segment length (in characters) before the resplitter sends
    /// a segment to the discourse service. Default: 120.
    pub min_resplit_chars: usize,

    /// Per-call timeout for the OCR request in seconds. Default: 200.
    ///
    /// Vision models transcribing a dense page routinely take over a
    /// minute on local hardware.
    pub ocr_timeout_secs: u64,

    /// Per-call timeout for the sentence splitter in seconds. Default: 60.
    pub split_timeout_secs: u64,

    /// Per-call timeout for the discourse splitter in seconds. Default: 120.
    pub rst_timeout_secs: u64,

    /// Total attempts against the sentence splitter when it answers 503.
    /// Default: 3.
    ///
    /// Only 503 is retried. Any other failure status surfaces immediately:
    /// a 500 or 400 will not heal with time, a 503 usually does.
    pub max_split_retries: u32,

    /// Initial backoff before the second splitter attempt, in
    /// milliseconds; doubles after each 503. Default: 1000.
    pub split_backoff_ms: u64,

    /// Progress callback receiving per-page events. Default: none.
    pub progress: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("cache"),
            model: "llava".to_string(),
            ocr_base_url: "http://localhost:11434".to_string(),
            split_base_url: String::new(),
            rst_base_url: String::new(),
            token: None,
            threshold: None,
            min_resplit_chars: 120,
            ocr_timeout_secs: 200,
            split_timeout_secs: 60,
            rst_timeout_secs: 120,
            max_split_retries: 3,
            split_backoff_ms: 1000,
            progress: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("cache_root", &self.cache_root)
            .field("model", &self.model)
            .field("ocr_base_url", &self.ocr_base_url)
            .field("split_base_url", &self.split_base_url)
            .field("rst_base_url", &self.rst_base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("threshold", &self.threshold)
            .field("min_resplit_chars", &self.min_resplit_chars)
            .field("max_split_retries", &self.max_split_retries)
            .field("split_backoff_ms", &self.split_backoff_ms)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn callback>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve a config from `PDF2SENT_*` environment variables with a
    /// `pdf2sent.toml` file as fallback.
    ///
    /// See the module docs for the precedence chain. The file is optional;
    /// a present-but-unparseable file is an error rather than a silent
    /// fallthrough to defaults.
    pub fn from_env() -> Result<Self, PipelineError> {
        let file = FileConfig::load()?;
        let mut b = Self::builder();

        if let Some(dir) = env_or("PDF2SENT_CACHE_DIR", file.cache_root) {
            b = b.cache_root(dir);
        }
        if let Some(model) = env_or("PDF2SENT_MODEL", file.model) {
            b = b.model(model);
        }
        if let Some(url) = env_or("PDF2SENT_OCR_BASE_URL", file.ocr_base_url) {
            b = b.ocr_base_url(url);
        }
        if let Some(url) = env_or("PDF2SENT_SPLIT_BASE_URL", file.split_base_url) {
            b = b.split_base_url(url);
        }
        if let Some(url) = env_or("PDF2SENT_RST_BASE_URL", file.rst_base_url) {
            b = b.rst_base_url(url);
        }
        if let Some(token) = env_or("PDF2SENT_TOKEN", file.token) {
            b = b.token(token);
        }
        if let Some(raw) = env_or(
            "PDF2SENT_SPLIT_THRESHOLD",
            file.threshold.map(|t| t.to_string()),
        ) {
            let t: f64 = raw.parse().map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "PDF2SENT_SPLIT_THRESHOLD must be a number, got '{raw}'"
                ))
            })?;
            b = b.threshold(t);
        }
        if let Some(n) = file.min_resplit_chars {
            b = b.min_resplit_chars(n);
        }

        b.build()
    }
}

/// Read an environment variable, falling back to a file-provided value.
///
/// Empty env values are treated as unset so `FOO= pdf2sent …` does not
/// shadow the config file.
fn env_or(var: &str, fallback: Option<String>) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => fallback,
    }
}

/// Partial config as read from `pdf2sent.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    cache_root: Option<String>,
    model: Option<String>,
    ocr_base_url: Option<String>,
    split_base_url: Option<String>,
    rst_base_url: Option<String>,
    token: Option<String>,
    threshold: Option<f64>,
    min_resplit_chars: Option<usize>,
}

impl FileConfig {
    fn load() -> Result<Self, PipelineError> {
        let path = std::env::var("PDF2SENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("pdf2sent.toml"));
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        toml::from_str(&raw).map_err(|e| {
            PipelineError::InvalidConfig(format!("failed to parse '{}': {e}", path.display()))
        })
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_root = dir.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn ocr_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_base_url = trim_trailing_slash(url.into());
        self
    }

    pub fn split_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.split_base_url = url.into();
        self
    }

    pub fn rst_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.rst_base_url = url.into();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    pub fn threshold(mut self, t: f64) -> Self {
        self.config.threshold = Some(t);
        self
    }

    pub fn min_resplit_chars(mut self, n: usize) -> Self {
        self.config.min_resplit_chars = n.max(1);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn split_timeout_secs(mut self, secs: u64) -> Self {
        self.config.split_timeout_secs = secs;
        self
    }

    pub fn rst_timeout_secs(mut self, secs: u64) -> Self {
        self.config.rst_timeout_secs = secs;
        self
    }

    pub fn max_split_retries(mut self, n: u32) -> Self {
        self.config.max_split_retries = n.max(1);
        self
    }

    pub fn split_backoff_ms(mut self, ms: u64) -> Self {
        self.config.split_backoff_ms = ms;
        self
    }

    pub fn progress(mut self, cb: ProgressCallback) -> Self {
        self.config.progress = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.model.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "model identifier must not be empty".into(),
            ));
        }
        if c.ocr_base_url.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "OCR base URL must not be empty".into(),
            ));
        }
        if c.max_split_retries == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_split_retries must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
