//! Configuration types for remote conversions.
//!
//! All orchestrator behaviour is controlled through [`ConversionConfig`],
//! built via its [`ConversionConfigBuilder`]. One struct holds every knob so
//! a config can be shared between orchestrators, logged, and compared.

use crate::error::ConvertError;
use crate::limiter::ConcurrencyLimiter;
use crate::pipeline::client::ProviderApi;
use crate::pipeline::poll::PollPolicy;
use crate::progress::ProgressCallback;
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default provider endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudconvert.com/v2";

/// Configuration for remote document conversions.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use konvrt::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .max_concurrent_jobs(4)
///     .poll_interval_ms(500)
///     .conversion_attempts(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_jobs, 4);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Jobs allowed to hold a provider slot at once. Default: 2.
    ///
    /// Free provider plans reject work beyond a small number of concurrent
    /// jobs, and every admitted job occupies its slot from job creation
    /// until the result is on disk.
    pub max_concurrent_jobs: usize,

    /// Delay between two status checks of the same stage. Default: 1000.
    pub poll_interval_ms: u64,

    /// Status checks spent waiting for the upload target. Default: 10.
    pub upload_ready_attempts: u32,

    /// Status checks spent waiting for the conversion to finish. Default: 30.
    ///
    /// With the default interval this is a ~30s ceiling. Large documents
    /// through a busy provider can need more.
    pub conversion_attempts: u32,

    /// Provider API root. Default: [`DEFAULT_API_BASE_URL`].
    pub api_base_url: String,

    /// Bearer credential. If None, `KONVRT_API_KEY` is read when the HTTP
    /// client is built.
    pub api_key: Option<SecretString>,

    /// Provider-side engine requested for the convert task. Default: `libreoffice`.
    pub engine: Option<String>,

    /// Directory converted files are written to. Default: `outputs`.
    pub output_dir: PathBuf,

    /// Per-HTTP-request timeout in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Pre-constructed provider client. Takes precedence over `api_base_url`
    /// and `api_key`.
    pub provider: Option<Arc<dyn ProviderApi>>,

    /// Shared limiter. When None each orchestrator creates its own with
    /// `max_concurrent_jobs` slots.
    pub limiter: Option<ConcurrencyLimiter>,

    /// Receives job lifecycle events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_interval_ms: 1000,
            upload_ready_attempts: 10,
            conversion_attempts: 30,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            engine: Some("libreoffice".to_string()),
            output_dir: PathBuf::from("outputs"),
            request_timeout_secs: 60,
            provider: None,
            limiter: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("upload_ready_attempts", &self.upload_ready_attempts)
            .field("conversion_attempts", &self.conversion_attempts)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("engine", &self.engine)
            .field("output_dir", &self.output_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn ProviderApi>"))
            .field("limiter", &self.limiter)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
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

    /// Polling policy for the upload-readiness stage.
    pub fn upload_ready_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.upload_ready_attempts,
        )
    }

    /// Polling policy for the conversion stage.
    pub fn conversion_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.conversion_attempts,
        )
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn upload_ready_attempts(mut self, n: u32) -> Self {
        self.config.upload_ready_attempts = n.max(1);
        self
    }

    pub fn conversion_attempts(mut self, n: u32) -> Self {
        self.config.conversion_attempts = n.max(1);
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn engine(mut self, engine: Option<String>) -> Self {
        self.config.engine = engine.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ProviderApi>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.config.limiter = Some(limiter);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.max_concurrent_jobs == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        if c.provider.is_none()
            && !(c.api_base_url.starts_with("http://") || c.api_base_url.starts_with("https://"))
        {
            return Err(ConvertError::InvalidConfig(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                c.api_base_url
            )));
        }
        if let Some(ref limiter) = c.limiter {
            if limiter.capacity() != c.max_concurrent_jobs {
                return Err(ConvertError::InvalidConfig(format!(
                    "shared limiter has {} slots but max_concurrent_jobs is {}",
                    limiter.capacity(),
                    c.max_concurrent_jobs
                )));
            }
        }
        Ok(self.config)
    }
}
