//! Configuration for a conversion session.
//!
//! Every knob lives in [`SessionConfig`], built via its
//! [`SessionConfigBuilder`]. Setters clamp out-of-range values; `build()`
//! rejects what cannot be clamped (an unusable base URL).

use crate::error::ClientError;
use reqwest::Url;
use std::time::Duration;

/// Default conversion service address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/";

const DEFAULT_RENDER_SCALE: f32 = 1.0;

/// Supported preview scale range; 1.0 maps one PDF point to one pixel.
pub const RENDER_SCALE_RANGE: (f32, f32) = (0.1, 8.0);

/// Configuration for a [`crate::SessionController`].
///
/// # Example
/// ```rust
/// use pdf_semantic_client::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .base_url("http://converter.internal:8000")
///     .poll_interval_ms(1000)
///     .render_concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url.as_str(), "http://converter.internal:8000/");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root URL of the conversion service. Always ends with `/`.
    pub base_url: Url,

    /// Period between two status queries, in milliseconds. Default: 2000.
    ///
    /// The next query is scheduled only after the previous one returned,
    /// so a slow backend stretches the period rather than stacking requests.
    pub poll_interval_ms: u64,

    /// Scale applied to each page's intrinsic size for the preview. Default: 1.0.
    ///
    /// At 1.0 one PDF point maps to one surface pixel.
    pub render_scale: f32,

    /// Number of pages rasterised concurrently. Default: 4.
    pub render_concurrency: usize,

    /// Timeout for each HTTP request, in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Consecutive status-query failures tolerated before the status line
    /// says so. `None` keeps failures silent. Default: `None`.
    ///
    /// Polling never stops because of transport errors either way.
    pub max_silent_poll_failures: Option<u32>,

    /// Also fetch the backend's intermediate layout dump on completion. Default: false.
    pub load_intermediate: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: 2000,
            render_scale: DEFAULT_RENDER_SCALE,
            render_concurrency: 4,
            request_timeout_secs: 120,
            max_silent_poll_failures: None,
            load_intermediate: false,
        }
    }
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
            base_url: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `render_scale` as the renderer uses it: clamped to
    /// [`RENDER_SCALE_RANGE`], with NaN falling back to 1.0.
    pub fn effective_render_scale(&self) -> f32 {
        if self.render_scale.is_nan() {
            return DEFAULT_RENDER_SCALE;
        }
        self.render_scale
            .clamp(RENDER_SCALE_RANGE.0, RENDER_SCALE_RANGE.1)
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
    base_url: Option<String>,
}

impl SessionConfigBuilder {
    /// Service root, e.g. `http://localhost:8000`. Parsed in [`build`](Self::build).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(10);
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        // NaN passes through the clamp and is rejected by `build()`.
        self.config.render_scale = scale.clamp(RENDER_SCALE_RANGE.0, RENDER_SCALE_RANGE.1);
        self
    }

    pub fn render_concurrency(mut self, n: usize) -> Self {
        self.config.render_concurrency = n.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_silent_poll_failures(mut self, n: Option<u32>) -> Self {
        self.config.max_silent_poll_failures = n.map(|n| n.max(1));
        self
    }

    pub fn load_intermediate(mut self, v: bool) -> Self {
        self.config.load_intermediate = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<SessionConfig, ClientError> {
        if let Some(raw) = self.base_url.take() {
            self.config.base_url = parse_base_url(&raw)?;
        }
        if !self.config.render_scale.is_finite() {
            return Err(ClientError::InvalidConfig(
                "Render scale must be a finite number".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Parse a service root, forcing a trailing slash so relative joins keep the path.
fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash)
        .map_err(|e| ClientError::InvalidConfig(format!("Base URL '{trimmed}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::InvalidConfig(format!(
            "Base URL must be http or https, got '{other}'"
        ))),
    }
}
