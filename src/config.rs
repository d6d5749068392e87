//! Configuration types for the capture-and-upload client.
//!
//! Everything tunable lives in [`ClientConfig`], built via its
//! [`ClientConfigBuilder`]. The defaults reproduce the observed browser
//! client: a 1280×720 camera feed sampled every five seconds, 5 MiB images
//! and 50 MiB / 50-page documents.

use crate::error::ClientError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Configuration for the capture pipeline and the upload client.
///
/// # Example
/// ```rust
/// use formula_capture::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::builder()
///     .base_url("https://formulas.example.org")
///     .capture_interval(Duration::from_secs(3))
///     .build()
///     .unwrap();
/// assert_eq!(config.frame_width, 1280);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin of the detection service. Endpoints are joined onto it.
    /// Default: `http://localhost:8000`.
    pub base_url: String,

    /// Period between automatic capture ticks. Default: 5 s.
    pub capture_interval: Duration,

    /// Target camera width in pixels. Default: 1280.
    pub frame_width: u32,

    /// Target camera height in pixels. Default: 720.
    pub frame_height: u32,

    /// JPEG quality used when encoding captured frames (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Whole-request timeout for uploads, in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Size of the body chunks handed to the transport. Progress is reported
    /// once per chunk. Default: 64 KiB.
    pub upload_chunk_size: usize,

    /// Session cookie (`name=value`) seeded into the cookie jar for
    /// `base_url`. Cookies set by the service are kept regardless.
    pub session_cookie: Option<String>,

    /// Client-side validation limits.
    pub limits: ValidationLimits,

    /// Explicit path to the pdfium shared library. `None` binds the system
    /// library (or `PDFIUM_LIB_PATH` when set).
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            capture_interval: Duration::from_secs(5),
            frame_width: 1280,
            frame_height: 720,
            jpeg_quality: 85,
            request_timeout_secs: 60,
            upload_chunk_size: 64 * 1024,
            session_cookie: None,
            limits: ValidationLimits::default(),
            pdfium_library_path: None,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// `base_url` parsed, with a trailing slash so endpoint paths join cleanly.
    pub fn parsed_base_url(&self) -> Result<Url, ClientError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| {
            ClientError::InvalidConfig(format!("base URL '{}' is invalid: {}", self.base_url, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ClientError::InvalidConfig(format!(
                "base URL must be http or https, got '{other}'"
            ))),
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn capture_interval(mut self, interval: Duration) -> Self {
        self.config.capture_interval = interval;
        self
    }

    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.config.frame_width = width;
        self.config.frame_height = height;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn upload_chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload_chunk_size = bytes;
        self
    }

    pub fn session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.config.session_cookie = Some(cookie.into());
        self
    }

    pub fn limits(mut self, limits: ValidationLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, ClientError> {
        let c = &self.config;
        c.parsed_base_url()?;
        if c.capture_interval < Duration::from_millis(100) {
            return Err(ClientError::InvalidConfig(format!(
                "capture interval must be at least 100ms, got {}ms",
                c.capture_interval.as_millis()
            )));
        }
        for (name, px) in [("width", c.frame_width), ("height", c.frame_height)] {
            if !(16..=4096).contains(&px) {
                return Err(ClientError::InvalidConfig(format!(
                    "frame {name} must be 16–4096, got {px}"
                )));
            }
        }
        if c.request_timeout_secs == 0 {
            return Err(ClientError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.upload_chunk_size < 1024 {
            return Err(ClientError::InvalidConfig(format!(
                "upload chunk size must be ≥ 1024 bytes, got {}",
                c.upload_chunk_size
            )));
        }
        if let Some(ref cookie) = c.session_cookie {
            if !cookie.contains('=') {
                return Err(ClientError::InvalidConfig(format!(
                    "session cookie must look like name=value, got '{cookie}'"
                )));
            }
        }
        c.limits.check()?;
        Ok(self.config)
    }
}

/// Client-side limits applied by the [`crate::validate::Validator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// Byte ceiling for images. Default: 5 MiB.
    pub image_max_bytes: u64,
    /// Byte ceiling for documents. Default: 50 MiB.
    pub document_max_bytes: u64,
    /// Minimum accepted page count. Default: 1.
    pub min_pages: u32,
    /// Maximum accepted page count. Default: 50.
    pub max_pages: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            image_max_bytes: 5 * MIB,
            document_max_bytes: 50 * MIB,
            min_pages: 1,
            max_pages: 50,
        }
    }
}

impl ValidationLimits {
    fn check(&self) -> Result<(), ClientError> {
        if self.min_pages > self.max_pages {
            return Err(ClientError::InvalidConfig(format!(
                "min pages ({}) exceeds max pages ({})",
                self.min_pages, self.max_pages
            )));
        }
        if self.image_max_bytes == 0 || self.document_max_bytes == 0 {
            return Err(ClientError::InvalidConfig(
                "size limits must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
