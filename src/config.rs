//! Configuration types for batch scan-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::api::ExtractService;
use crate::error::Scan2MdError;
use crate::progress::BatchProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Retry behaviour for outbound HTTP requests.
///
/// Backoff between attempts is exponential
/// (`wait_multiplier * 2^(attempt-1)` seconds) clamped to
/// `[wait_min_secs, wait_max_secs]`. With the defaults the wait sequence
/// is 2 s → 2 s, after which the last error propagates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempt ceiling, first try included. Default: 3.
    pub max_attempts: u32,
    /// Exponential backoff multiplier in seconds. Default: 1.0.
    pub wait_multiplier: f64,
    /// Lower clamp on the inter-attempt wait. Default: 2.0 s.
    pub wait_min_secs: f64,
    /// Upper clamp on the inter-attempt wait. Default: 10.0 s.
    pub wait_max_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_multiplier: 1.0,
            wait_min_secs: 2.0,
            wait_max_secs: 10.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based: the wait after the
    /// first failed try is `wait_for(1)`).
    pub fn wait_for(&self, attempt: u32) -> std::time::Duration {
        let exp = self.wait_multiplier * 2f64.powi(attempt.saturating_sub(1) as i32);
        let secs = exp.clamp(self.wait_min_secs, self.wait_max_secs);
        std::time::Duration::from_secs_f64(secs)
    }
}

/// Configuration for a batch conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use scan2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .api_token("mineru-token")
///     .concurrency(8)
///     .language("en")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Base URL of the remote extraction API. Default:
    /// `https://mineru.net/api/v4`.
    pub base_url: String,

    /// Bearer token for the extraction API. Defaults to the
    /// `MINERU_API_TOKEN` environment variable.
    ///
    /// Only the submission and status endpoints carry the token; upload
    /// targets are pre-signed URLs and result archives are plain downloads.
    pub api_token: String,

    /// Ask the remote service to recognise formulae. Default: true.
    pub enable_formula: bool,

    /// Ask the remote service to recognise tables. Default: true.
    pub enable_table: bool,

    /// Layout-recognition model name sent with the submission.
    /// Default: `doclayout_yolo`.
    pub layout_model: String,

    /// Document language hint sent with the submission. Default: `ch`.
    pub language: String,

    /// File extensions (with leading dot, lowercase) accepted from the
    /// source directory. Default: jpg, jpeg, png, webp, pdf.
    pub supported_formats: Vec<String>,

    /// Worker-pool size for concurrent uploads and result
    /// materialization. Default: 5.
    ///
    /// Both stages are network-bound; a handful of in-flight requests cuts
    /// wall-clock time without tripping the service's rate limits. Excess
    /// jobs queue behind the pool, so batch size is unbounded by this value.
    pub concurrency: usize,

    /// Retry behaviour for transient HTTP failures.
    pub retry: RetryPolicy,

    /// Timeout for ordinary API requests in seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// Deadline for the whole polling phase in seconds. Default: 300.
    ///
    /// Remote processing time scales with page density, not file size;
    /// five minutes covers typical batches of a few dozen scanned pages.
    /// Past the deadline the batch fails with `PollTimeout` — nothing the
    /// service finished is fetched.
    pub poll_max_wait_secs: u64,

    /// Sleep between status queries in seconds. Default: 3.
    pub poll_interval_secs: u64,

    /// Timeout for result-archive downloads in seconds. Default: 120.
    ///
    /// Result archives carry every extracted image and can run to tens of
    /// megabytes, so they get a far longer budget than API calls.
    pub zip_download_timeout_secs: u64,

    /// Base directory for temporary workspaces. Default: the process
    /// working directory.
    pub workspace_base: Option<PathBuf>,

    /// Age in hours past which leftover workspaces from prior runs are
    /// reclaimed by [`crate::workspace::sweep_orphans`]. Default: 24.
    pub workspace_max_age_hours: u64,

    /// Pre-constructed extraction service. Takes precedence over the
    /// HTTP implementation built from `base_url`/`api_token`.
    ///
    /// The injection point for tests and for callers that need custom
    /// middleware (caching, request shaping) around the remote API.
    pub service: Option<Arc<dyn ExtractService>>,

    /// Progress callback invoked as the pipeline advances. Default: none.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mineru.net/api/v4".to_string(),
            api_token: std::env::var("MINERU_API_TOKEN").unwrap_or_default(),
            enable_formula: true,
            enable_table: true,
            layout_model: "doclayout_yolo".to_string(),
            language: "ch".to_string(),
            supported_formats: [".jpg", ".jpeg", ".png", ".webp", ".pdf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            concurrency: 5,
            retry: RetryPolicy::default(),
            request_timeout_secs: 30,
            poll_max_wait_secs: 300,
            poll_interval_secs: 3,
            zip_download_timeout_secs: 120,
            workspace_base: None,
            workspace_max_age_hours: 24,
            service: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &if self.api_token.is_empty() { "<unset>" } else { "<redacted>" })
            .field("enable_formula", &self.enable_formula)
            .field("enable_table", &self.enable_table)
            .field("layout_model", &self.layout_model)
            .field("language", &self.language)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("poll_max_wait_secs", &self.poll_max_wait_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("zip_download_timeout_secs", &self.zip_download_timeout_secs)
            .field("workspace_base", &self.workspace_base)
            .field("service", &self.service.as_ref().map(|_| "<dyn ExtractService>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when `name`'s extension is one of the supported formats.
    pub fn is_supported_file(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.supported_formats.iter().any(|ext| lower.ends_with(ext.as_str()))
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = token.into();
        self
    }

    pub fn enable_formula(mut self, v: bool) -> Self {
        self.config.enable_formula = v;
        self
    }

    pub fn enable_table(mut self, v: bool) -> Self {
        self.config.enable_table = v;
        self
    }

    pub fn layout_model(mut self, model: impl Into<String>) -> Self {
        self.config.layout_model = model.into();
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn poll_max_wait_secs(mut self, secs: u64) -> Self {
        self.config.poll_max_wait_secs = secs;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs.max(1);
        self
    }

    pub fn zip_download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.zip_download_timeout_secs = secs;
        self
    }

    pub fn workspace_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.config.workspace_base = Some(base.into());
        self
    }

    pub fn workspace_max_age_hours(mut self, hours: u64) -> Self {
        self.config.workspace_max_age_hours = hours;
        self
    }

    pub fn service(mut self, service: Arc<dyn ExtractService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Scan2MdError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(Scan2MdError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.poll_interval_secs == 0 {
            return Err(Scan2MdError::InvalidConfig(
                "Poll interval must be ≥ 1 second".into(),
            ));
        }
        if c.poll_max_wait_secs < c.poll_interval_secs {
            return Err(Scan2MdError::InvalidConfig(format!(
                "Poll deadline ({}s) shorter than poll interval ({}s)",
                c.poll_max_wait_secs, c.poll_interval_secs
            )));
        }
        if c.base_url.is_empty() {
            return Err(Scan2MdError::InvalidConfig("Base URL must not be empty".into()));
        }
        Ok(self.config)
    }
}
