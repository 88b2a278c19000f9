//! Image resolution: raw bytes, local files, and remote URLs.
//!
//! Remote fetches go through an ordered list of transports: a direct fetch
//! first, then exactly one fallback through a relay proxy for hosts that
//! block or time out. Every attempt is individually timeout-bounded, and
//! fetched bytes are validated before decoding.

use image::DynamicImage;
use std::error::Error as _;
use std::path::PathBuf;
use std::time::Duration;

/// Reject tracking pixels and truncated placeholder payloads.
const MIN_IMAGE_BYTES: usize = 128;

/// A reference to an image the engine can resolve.
#[derive(Clone, Debug)]
pub enum ImageRef {
    /// Raw encoded bytes, e.g. an upload body.
    Bytes(Vec<u8>),
    /// Local file path.
    Path(PathBuf),
    /// Remote URL.
    Url(String),
}

impl ImageRef {
    /// Classify a string reference: URLs by scheme, everything else a path.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Url(s.to_string())
        } else {
            Self::Path(PathBuf::from(s))
        }
    }

    /// Short description for log lines and stub keying in tests.
    pub fn describe(&self) -> String {
        match self {
            Self::Bytes(b) => format!("bytes({})", b.len()),
            Self::Path(p) => p.display().to_string(),
            Self::Url(u) => u.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a usable image: {0}")]
    InvalidImage(String),

    #[error("http client init failed: {0}")]
    Client(String),

    #[error("all transports failed for {url}: {reason}")]
    Unreachable { url: String, reason: String },
}

/// One way of turning a URL into bytes.
struct Transport {
    name: &'static str,
    url: String,
}

/// Resolves `ImageRef`s into decoded images.
pub struct ImageLoader {
    http: reqwest::Client,
    timeout: Duration,
    proxy_prefix: Option<String>,
}

impl ImageLoader {
    pub fn new(config: &crate::config::LoaderConfig) -> Result<Self, LoadError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::Client(e.to_string()))?;

        Ok(Self {
            http,
            timeout,
            proxy_prefix: config.proxy_prefix.clone(),
        })
    }

    /// Resolve a reference into a decoded image.
    pub async fn load(&self, image: &ImageRef) -> Result<DynamicImage, LoadError> {
        match image {
            ImageRef::Bytes(bytes) => decode_bytes(bytes),
            ImageRef::Path(path) => {
                let bytes = tokio::fs::read(path).await?;
                decode_bytes(&bytes)
            }
            ImageRef::Url(url) => self.load_remote(url).await,
        }
    }

    /// Try each transport in order; the first attempt that yields a valid,
    /// decodable image wins.
    async fn load_remote(&self, url: &str) -> Result<DynamicImage, LoadError> {
        let mut last_failure = String::from("no transports configured");

        for transport in self.transports(url) {
            let attempt = tokio::time::timeout(self.timeout, self.fetch(&transport.url)).await;
            match attempt {
                Err(_) => {
                    log::warn!(
                        "transport={} url={url} outcome=timeout after {}ms",
                        transport.name,
                        self.timeout.as_millis()
                    );
                    last_failure = format!("timed out after {}ms", self.timeout.as_millis());
                }
                Ok(Err(e)) => {
                    let reason = source_message(&e);
                    log::warn!("transport={} url={url} outcome=error err={reason}", transport.name);
                    last_failure = reason;
                }
                Ok(Ok(bytes)) => match decode_bytes(&bytes) {
                    Ok(img) => {
                        log::debug!(
                            "transport={} url={url} outcome=success bytes={}",
                            transport.name,
                            bytes.len()
                        );
                        return Ok(img);
                    }
                    Err(e) => {
                        log::warn!("transport={} url={url} outcome=invalid err={e}", transport.name);
                        last_failure = e.to_string();
                    }
                },
            }
        }

        Err(LoadError::Unreachable {
            url: url.to_string(),
            reason: last_failure,
        })
    }

    fn transports(&self, url: &str) -> Vec<Transport> {
        let mut transports = vec![Transport {
            name: "direct",
            url: url.to_string(),
        }];

        if let Some(prefix) = &self.proxy_prefix {
            let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
            transports.push(Transport {
                name: "proxy",
                url: format!("{prefix}{encoded}"),
            });
        }

        transports
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Validate and decode encoded image bytes.
///
/// Rejects empty/tiny payloads, HTML masquerading as an image (error pages
/// served with a 200), and anything that fails format sniffing or decoding.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::InvalidImage("empty payload".to_string()));
    }
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(LoadError::InvalidImage(format!(
            "payload too small ({} bytes)",
            bytes.len()
        )));
    }
    if is_html_content(bytes) {
        return Err(LoadError::InvalidImage("payload is HTML".to_string()));
    }
    if !infer::is_image(bytes) {
        return Err(LoadError::InvalidImage("unrecognized image format".to_string()));
    }

    image::load_from_memory(bytes).map_err(|e| LoadError::InvalidImage(e.to_string()))
}

/// Case-insensitive check of the payload prefix.
fn is_html_content(bytes: &[u8]) -> bool {
    let prefix = bytes[..bytes.len().min(50)].to_ascii_lowercase();
    prefix.starts_with(b"<!doctype") || prefix.starts_with(b"<html")
}

/// Unwrap the deepest error source for a readable log line.
fn source_message(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(inner) => inner.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}
