//! Media fetcher behind the scanner's [`MediaSource`] seam.
//!
//! Handles the two URL shapes the blob store publishes: HTTP(S) for hosted
//! events and `file://` for local ones. The HTTP client carries a request
//! timeout so one stuck download cannot stall a whole scan.

use momentka_core::{FetchError, MediaSource};
use std::fs;
use std::time::Duration;

/// Default per-request timeout for media downloads.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

const FILE_SCHEME: &str = "file://";

/// Blocking fetcher for event media.
pub struct UrlFetcher {
    client: reqwest::blocking::Client,
}

impl UrlFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl MediaSource for UrlFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(path) = url.strip_prefix(FILE_SCHEME) {
            return fs::read(path).map_err(|e| FetchError::new(format!("{path}: {e}")));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .and_then(|r| r.error_for_status())
                .map_err(|e| FetchError::new(e.to_string()))?;
            let bytes = response.bytes().map_err(|e| FetchError::new(e.to_string()))?;
            return Ok(bytes.to_vec());
        }
        Err(FetchError::new(format!("unsupported URL scheme: {url}")))
    }
}
