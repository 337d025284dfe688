//! HTTP transport construction
//!
//! Firmware hosts and catalog services share one pooled client per
//! configuration. Compression is left to the catalog responses: range
//! requests opt out explicitly so byte offsets stay meaningful.

use reqwest::{Client, ClientBuilder};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::Result;

static CRYPTO_PROVIDER: OnceLock<()> = OnceLock::new();

/// Install the process-wide rustls crypto provider once
///
/// reqwest is built without a bundled provider, so one must be installed
/// before the first TLS handshake. Installing twice is harmless.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build an HTTP client from client configuration
pub fn build_client(config: &ClientConfig) -> Result<Client> {
    ensure_crypto_provider();

    ClientBuilder::new()
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(60))
        .http2_adaptive_window(true)
        .gzip(true)
        .brotli(true)
        .deflate(true)
        // Firmware links are frequently redirected to a CDN edge
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(concat!("sepfinder/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Into::into)
}
