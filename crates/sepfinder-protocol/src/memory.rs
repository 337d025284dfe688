//! In-memory [`RangeFetcher`] for tests
//!
//! Only built for this crate's tests or with the `test-util` feature.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::HashMap;
use url::Url;

use crate::error::{Result, TransportError};
use crate::range::RangeFetcher;

/// One stored resource of a [`MemoryFetcher`]
#[derive(Debug, Clone)]
struct MemoryResource {
    length: u64,
    /// Bytes at the end of the resource; everything before reads as zero
    tail: Bytes,
}

/// In-memory range fetcher
///
/// Serves resources registered by URL and records every ranged read. A
/// resource may be sparse: only its tail is stored and the remaining prefix
/// reads as zeros, which allows multi-gigabyte archives to be simulated.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: Mutex<HashMap<String, MemoryResource>>,
    reads: Mutex<Vec<(String, u64, u64)>>,
}

impl MemoryFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a complete resource
    pub fn insert(&self, url: &Url, data: impl Into<Bytes>) {
        let tail = data.into();
        self.resources.lock().insert(
            url.to_string(),
            MemoryResource {
                length: tail.len() as u64,
                tail,
            },
        );
    }

    /// Register a resource of `length` bytes ending in `tail`
    pub fn insert_sparse(&self, url: &Url, length: u64, tail: impl Into<Bytes>) {
        let tail = tail.into();
        let length = length.max(tail.len() as u64);
        self.resources
            .lock()
            .insert(url.to_string(), MemoryResource { length, tail });
    }

    /// Ranged reads served so far, as `(url, start, end)`
    pub fn reads(&self) -> Vec<(String, u64, u64)> {
        self.reads.lock().clone()
    }

    fn resource(&self, url: &Url) -> Result<MemoryResource> {
        self.resources
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: StatusCode::NOT_FOUND,
                url: url.to_string(),
            })
    }
}

#[async_trait]
impl RangeFetcher for MemoryFetcher {
    async fn length(&self, url: &Url) -> Result<u64> {
        Ok(self.resource(url)?.length)
    }

    async fn fetch(&self, url: &Url, start: u64, end: u64) -> Result<Bytes> {
        if end < start {
            return Err(TransportError::InvalidRange { start, end });
        }
        let resource = self.resource(url)?;
        self.reads.lock().push((url.to_string(), start, end));

        if end >= resource.length {
            return Err(TransportError::ShortRead {
                expected: end - start + 1,
                actual: resource.length.saturating_sub(start),
            });
        }

        let tail_start = resource.length - resource.tail.len() as u64;
        let mut out = Vec::with_capacity((end - start + 1) as usize);
        if start < tail_start {
            out.resize((tail_start.min(end + 1) - start) as usize, 0);
        }
        if end >= tail_start {
            let from = (start.max(tail_start) - tail_start) as usize;
            let to = (end - tail_start) as usize;
            out.extend_from_slice(&resource.tail[from..=to]);
        }
        Ok(Bytes::from(out))
    }

    async fn fetch_whole(&self, url: &Url) -> Result<Bytes> {
        let resource = self.resource(url)?;
        if resource.length != resource.tail.len() as u64 {
            return Err(TransportError::RangeNotSupported {
                url: url.to_string(),
            });
        }
        Ok(resource.tail)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let fetcher = MemoryFetcher::new();
        let url = Url::parse("https://example.com/a").expect("url");
        fetcher.insert(&url, vec![0u8; 10]);
        assert!(matches!(
            fetcher.fetch(&url, 5, 4).await,
            Err(TransportError::InvalidRange { start: 5, end: 4 })
        ));
    }

    #[tokio::test]
    async fn test_memory_fetcher_sparse() {
        let fetcher = MemoryFetcher::new();
        let url = Url::parse("https://example.com/huge.ipsw").expect("url");
        fetcher.insert_sparse(&url, 100, b"tail".to_vec());

        assert_eq!(fetcher.length(&url).await.expect("length"), 100);
        assert_eq!(fetcher.fetch(&url, 0, 3).await.expect("prefix").as_ref(), &[0; 4]);
        assert_eq!(
            fetcher.fetch(&url, 94, 99).await.expect("straddle").as_ref(),
            b"\0\0tail"
        );
        assert!(fetcher.fetch(&url, 98, 100).await.is_err());
        assert!(fetcher.fetch_whole(&url).await.is_err());
        assert_eq!(fetcher.reads().len(), 3);
    }
}
