//! Payload fetching for cache warm-up

use crate::error::Result;

/// Downloads a stem payload by source URL
pub trait PayloadFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP fetcher
#[cfg(feature = "http")]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| crate::error::StemsyncError::cache(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl PayloadFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        use crate::error::StemsyncError;

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| StemsyncError::load(url, e.to_string()))?;
        if !response.status().is_success() {
            return Err(StemsyncError::load(
                url,
                format!("HTTP {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .map_err(|e| StemsyncError::load(url, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
