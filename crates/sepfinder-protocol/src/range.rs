//! Byte-range reads over HTTP
//!
//! A [`RangeFetcher`] answers two questions about a remote resource: how long
//! it is, and what bytes lie in an inclusive span. Every call is idempotent,
//! so [`HttpRangeFetcher`] runs each one under its [`RetryPolicy`] with the
//! configured per-attempt deadline.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, TransportError};
use crate::retry::{RetryPolicy, Span};
use crate::transport::build_client;

/// Random access to the bytes of remote resources
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Total length of the resource in bytes
    async fn length(&self, url: &Url) -> Result<u64>;

    /// Exactly the bytes in `[start, end]`, both inclusive
    async fn fetch(&self, url: &Url, start: u64, end: u64) -> Result<Bytes>;

    /// The complete resource, for small documents such as manifests
    async fn fetch_whole(&self, url: &Url) -> Result<Bytes>;
}

/// Parsed `Content-Range` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Span delivered, `None` for an unsatisfied range (`bytes */N`)
    pub span: Option<(u64, u64)>,
    /// Complete length, `None` when the server sends `*`
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes START-END/TOTAL`, `bytes START-END/*` or `bytes */TOTAL`
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || TransportError::InvalidContentRange(value.to_string());

        let rest = value
            .trim()
            .strip_prefix("bytes")
            .ok_or_else(invalid)?
            .trim_start();
        let (span, total) = rest.split_once('/').ok_or_else(invalid)?;

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().map_err(|_| invalid())?),
        };

        let span = match span.trim() {
            "*" => None,
            s => {
                let (start, end) = s.split_once('-').ok_or_else(invalid)?;
                let start = start.trim().parse::<u64>().map_err(|_| invalid())?;
                let end = end.trim().parse::<u64>().map_err(|_| invalid())?;
                if end < start || total.is_some_and(|t| end >= t) {
                    return Err(invalid());
                }
                Some((start, end))
            }
        };

        if span.is_none() && total.is_none() {
            return Err(invalid());
        }

        Ok(Self { span, total })
    }

    fn from_headers(headers: &HeaderMap) -> Result<Option<Self>> {
        headers
            .get(CONTENT_RANGE)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| TransportError::InvalidContentRange(format!("{value:?}")))
                    .and_then(Self::parse)
            })
            .transpose()
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Range fetcher backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl HttpRangeFetcher {
    /// Create a fetcher with its own client
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self::with_client(build_client(config)?, config))
    }

    /// Create a fetcher sharing an existing client
    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            retry_policy: config.retry_policy.clone(),
            request_timeout: config.request_timeout,
        }
    }

    /// Underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn probe_head(&self, url: &Url) -> Result<Option<u64>> {
        let response = self
            .client
            .head(url.clone())
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await?;

        if !response.status().is_success() {
            debug!("HEAD {} returned {}", url, response.status());
            return Ok(None);
        }
        Ok(content_length(response.headers()).filter(|&len| len > 0))
    }

    async fn probe_range(&self, url: &Url) -> Result<u64> {
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers();
        let length = match status {
            StatusCode::PARTIAL_CONTENT => ContentRange::from_headers(headers)?
                .and_then(|range| range.total),
            StatusCode::OK => content_length(headers),
            status => {
                return Err(TransportError::Status {
                    status,
                    url: url.to_string(),
                });
            }
        };

        length.ok_or_else(|| TransportError::MissingLength(url.to_string()))
    }

    async fn fetch_once(&self, url: &Url, start: u64, end: u64) -> Result<Bytes> {
        let expected = end - start + 1;
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes={start}-{end}"))
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                if let Some(range) = ContentRange::from_headers(response.headers())?
                    && range.span.is_some_and(|(first, _)| first != start)
                {
                    return Err(TransportError::RangeNotSupported {
                        url: url.to_string(),
                    });
                }
            }
            // A full response is only acceptable when it is exactly the span
            StatusCode::OK => {
                if start != 0 || content_length(response.headers()).is_some_and(|l| l != expected)
                {
                    return Err(TransportError::RangeNotSupported {
                        url: url.to_string(),
                    });
                }
            }
            status => {
                return Err(TransportError::Status {
                    status,
                    url: url.to_string(),
                });
            }
        }

        let body = response.bytes().await?;
        if (body.len() as u64) < expected {
            return Err(TransportError::ShortRead {
                expected,
                actual: body.len() as u64,
            });
        }
        Ok(body.slice(..expected as usize))
    }

    async fn fetch_whole_once(&self, url: &Url) -> Result<Bytes> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn length(&self, url: &Url) -> Result<u64> {
        let length = self
            .retry_policy
            .run(url, Span::Length, self.request_timeout, || async {
                if let Some(length) = self.probe_head(url).await? {
                    return Ok(length);
                }
                self.probe_range(url).await
            })
            .await?;
        debug!("{} is {} bytes", url, length);
        Ok(length)
    }

    async fn fetch(&self, url: &Url, start: u64, end: u64) -> Result<Bytes> {
        if end < start {
            return Err(TransportError::InvalidRange { start, end });
        }
        debug!("GET {} bytes={}-{}", url, start, end);
        self.retry_policy
            .run(url, Span::Bytes { start, end }, self.request_timeout, || {
                self.fetch_once(url, start, end)
            })
            .await
    }

    async fn fetch_whole(&self, url: &Url) -> Result<Bytes> {
        debug!("GET {}", url);
        self.retry_policy
            .run(url, Span::Whole, self.request_timeout, || {
                self.fetch_whole_once(url)
            })
            .await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Serves a fixed body honoring single `Range: bytes=a-b` headers
    pub(crate) struct RangeResponder(pub Vec<u8>);

    impl Respond for RangeResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let len = self.0.len() as u64;
            let Some(range) = request
                .headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("bytes="))
                .and_then(|v| v.split_once('-'))
            else {
                return ResponseTemplate::new(200).set_body_bytes(self.0.clone());
            };

            let start: u64 = range.0.parse().unwrap_or(0);
            let end: u64 = range.1.parse().map_or(len - 1, |e: u64| e.min(len - 1));
            if start >= len {
                return ResponseTemplate::new(416)
                    .insert_header("content-range", format!("bytes */{len}"));
            }
            ResponseTemplate::new(206)
                .insert_header("content-range", format!("bytes {start}-{end}/{len}"))
                .set_body_bytes(self.0[start as usize..=end as usize].to_vec())
        }
    }

    pub(crate) fn test_config() -> ClientConfig {
        ClientConfig {
            retry_policy: RetryPolicy {
                max_retries: 1,
                backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            request_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).expect("valid url")
    }

    #[test]
    fn test_content_range_parse() {
        assert_eq!(
            ContentRange::parse("bytes 0-0/1234").expect("parse"),
            ContentRange {
                span: Some((0, 0)),
                total: Some(1234)
            }
        );
        assert_eq!(
            ContentRange::parse("bytes 100-199/*").expect("parse"),
            ContentRange {
                span: Some((100, 199)),
                total: None
            }
        );
        assert_eq!(
            ContentRange::parse("bytes */5000").expect("parse"),
            ContentRange {
                span: None,
                total: Some(5000)
            }
        );
        for bad in ["bytes", "0-1/2", "bytes 5-1/10", "bytes 0-10/10", "bytes */*", "bytes a-b/c"] {
            assert!(ContentRange::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_fetch_range_and_length_probe() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        Mock::given(method("GET"))
            .and(path("/fw.ipsw"))
            .respond_with(RangeResponder(body.clone()))
            .mount(&server)
            .await;

        let fetcher = HttpRangeFetcher::new(&test_config()).expect("fetcher");
        let url = url(&server, "/fw.ipsw");

        // No HEAD route: the length comes from the probe range
        assert_eq!(fetcher.length(&url).await.expect("length"), 4096);

        let bytes = fetcher.fetch(&url, 1000, 1099).await.expect("fetch");
        assert_eq!(bytes.as_ref(), &body[1000..1100]);

        let bytes = fetcher.fetch(&url, 4095, 4095).await.expect("last byte");
        assert_eq!(bytes.as_ref(), &[body[4095]]);
    }

    #[tokio::test]
    async fn test_fetch_short_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 0-99/1000")
                    .set_body_bytes(vec![0u8; 10]),
            )
            .mount(&server)
            .await;

        let fetcher = HttpRangeFetcher::new(&test_config()).expect("fetcher");
        let result = fetcher.fetch(&url(&server, "/short"), 0, 99).await;
        assert!(matches!(
            result,
            Err(TransportError::ShortRead {
                expected: 100,
                actual: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_range_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/norange"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 500]))
            .mount(&server)
            .await;

        let fetcher = HttpRangeFetcher::new(&test_config()).expect("fetcher");
        let result = fetcher.fetch(&url(&server, "/norange"), 100, 199).await;
        assert!(matches!(
            result,
            Err(TransportError::RangeNotSupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpRangeFetcher::new(&test_config()).expect("fetcher");
        let result = fetcher.fetch(&url(&server, "/missing"), 0, 10).await;
        assert!(matches!(
            result,
            Err(TransportError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            })
        ));

        let result = fetcher.length(&url(&server, "/missing")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(RangeResponder(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let fetcher = HttpRangeFetcher::new(&test_config()).expect("fetcher");
        let bytes = fetcher
            .fetch(&url(&server, "/flaky"), 2, 5)
            .await
            .expect("second attempt succeeds");
        assert_eq!(bytes.as_ref(), b"2345");
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 0-0/1")
                    .set_body_bytes(vec![0u8])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config = ClientConfig {
            request_timeout: Duration::from_millis(50),
            retry_policy: RetryPolicy::none(),
            ..ClientConfig::default()
        };
        let fetcher = HttpRangeFetcher::new(&config).expect("fetcher");
        let result = fetcher.fetch(&url(&server, "/slow"), 0, 0).await;
        assert!(
            matches!(result, Err(TransportError::Timeout))
                || matches!(&result, Err(TransportError::Network(e)) if e.is_timeout()),
            "unexpected result: {result:?}"
        );
    }
}
