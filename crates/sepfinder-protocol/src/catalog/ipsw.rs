//! JSON catalog client for the ipsw.me v4 API and the beta firmware service

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use super::{Catalog, DeviceRecord, DeviceSummary, FirmwareRecord, Result};
use crate::config::ClientConfig;
use crate::error::{CatalogError, TransportError};
use crate::retry::{RetryPolicy, Span};
use crate::transport::build_client;

/// Time-bounded cache of the full device list
///
/// Shared by every clone of an [`IpswCatalog`]; sessions only ever read it.
#[derive(Debug)]
pub struct DeviceListCache {
    ttl: Duration,
    entry: RwLock<Option<(Instant, Arc<[DeviceSummary]>)>>,
}

impl DeviceListCache {
    /// Create an empty cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// Cached list, if still fresh
    pub fn get(&self) -> Option<Arc<[DeviceSummary]>> {
        let entry = self.entry.read();
        entry
            .as_ref()
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, devices)| Arc::clone(devices))
    }

    /// Replace the cached list
    pub fn put(&self, devices: Arc<[DeviceSummary]>) {
        *self.entry.write() = Some((Instant::now(), devices));
    }

    /// Drop the cached list
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }
}

/// Catalog backed by the ipsw.me and beta firmware HTTP APIs
#[derive(Debug, Clone)]
pub struct IpswCatalog {
    client: Client,
    catalog_url: Url,
    beta_catalog_url: Url,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
    devices: Arc<DeviceListCache>,
}

impl IpswCatalog {
    /// Create a catalog client from configuration
    pub fn new(config: &ClientConfig) -> std::result::Result<Self, TransportError> {
        Self::with_client(build_client(config)?, config)
    }

    /// Create a catalog client sharing an HTTP client
    pub fn with_client(
        client: Client,
        config: &ClientConfig,
    ) -> std::result::Result<Self, TransportError> {
        Ok(Self {
            client,
            catalog_url: parse_base(&config.catalog_url)?,
            beta_catalog_url: parse_base(&config.beta_catalog_url)?,
            retry_policy: config.retry_policy.clone(),
            request_timeout: config.request_timeout,
            devices: Arc::new(DeviceListCache::new(config.device_list_ttl)),
        })
    }

    /// Shared device list cache
    pub fn device_cache(&self) -> &DeviceListCache {
        &self.devices
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("Catalog request URL: {}", url);
        let body = self
            .retry_policy
            .run(&url, Span::Whole, self.request_timeout, || async {
                let response = self.client.get(url.clone()).send().await?;
                match response.status() {
                    StatusCode::OK => Ok(response.bytes().await?),
                    status => Err(TransportError::Status {
                        status,
                        url: url.to_string(),
                    }),
                }
            })
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn join(base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{base}{path}: {e}")).into())
    }
}

fn parse_base(base: &str) -> std::result::Result<Url, TransportError> {
    // Url::join replaces the last segment unless the base ends with a slash
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&base).map_err(|e| TransportError::InvalidUrl(format!("{base}: {e}")))
}

#[async_trait]
impl Catalog for IpswCatalog {
    async fn list_devices(&self) -> Result<Arc<[DeviceSummary]>> {
        if let Some(devices) = self.devices.get() {
            debug!("Device list cache hit ({} devices)", devices.len());
            return Ok(devices);
        }

        let url = Self::join(&self.catalog_url, "devices")?;
        let devices: Vec<DeviceSummary> = self.get_json(url).await?;
        let devices: Arc<[DeviceSummary]> = devices.into();
        self.devices.put(Arc::clone(&devices));
        Ok(devices)
    }

    async fn get_device(&self, identifier: &str) -> Result<DeviceRecord> {
        let mut url = Self::join(&self.catalog_url, &format!("device/{identifier}"))?;
        url.query_pairs_mut().append_pair("type", "ipsw");

        self.get_json(url).await.map_err(|e| match e {
            CatalogError::Transport(TransportError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            }) => CatalogError::UnknownDevice(identifier.to_string()),
            e => e,
        })
    }

    async fn get_beta_firmwares(&self, identifier: &str) -> Result<Vec<FirmwareRecord>> {
        let url = Self::join(&self.beta_catalog_url, identifier)?;
        self.get_json(url).await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::range::tests::test_config;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn devices_json() -> serde_json::Value {
        serde_json::json!([
            {"name": "iPhone 13", "identifier": "iPhone14,5",
             "boards": [{"boardconfig": "D17AP", "platform": "t8110", "cpid": 33040, "bdid": 12}]},
            {"name": "iPad Pro (11-inch)", "identifier": "iPad8,1",
             "boards": [{"boardconfig": "J317AP", "platform": "t8027", "cpid": 32807, "bdid": 12}]}
        ])
    }

    async fn catalog_for(server: &MockServer) -> IpswCatalog {
        let config = test_config().with_catalog_base(&server.uri());
        IpswCatalog::new(&config).expect("catalog")
    }

    #[tokio::test]
    async fn test_list_devices_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(devices_json()))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = catalog_for(&server).await;
        let first = catalog.list_devices().await.expect("devices");
        let second = catalog.clone().list_devices().await.expect("cached devices");

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].boards[0].boardconfig, "D17AP");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = DeviceListCache::new(Duration::from_millis(0));
        cache.put(Vec::new().into());
        assert!(cache.get().is_none());

        let cache = DeviceListCache::new(Duration::from_secs(60));
        cache.put(Vec::new().into());
        assert!(cache.get().is_some());
        cache.invalidate();
        assert!(cache.get().is_none());
    }

    #[tokio::test]
    async fn test_get_device() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/device/iPhone14,5"))
            .and(query_param("type", "ipsw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "iPhone 13",
                "identifier": "iPhone14,5",
                "boards": [{"boardconfig": "D17AP", "platform": "t8110", "cpid": 33040, "bdid": 12}],
                "firmwares": [{
                    "identifier": "iPhone14,5",
                    "version": "16.5",
                    "buildid": "20F66",
                    "sha1sum": "0000",
                    "md5sum": "0000",
                    "filesize": 6_543_210_000u64,
                    "url": "https://updates.cdn-apple.com/2023SpringFCS/fullrestores/032-84904/iPhone14,5_16.5_20F66_Restore.ipsw",
                    "releasedate": "2023-05-18T17:04:19Z",
                    "uploaddate": "2023-05-18T16:49:53Z",
                    "signed": true
                }]
            })))
            .mount(&server)
            .await;

        let catalog = catalog_for(&server).await;
        let device = catalog.get_device("iPhone14,5").await.expect("device");
        assert_eq!(device.name, "iPhone 13");
        assert_eq!(device.firmwares.len(), 1);
        assert_eq!(device.firmwares[0].filesize, Some(6_543_210_000));
        assert!(device.firmwares[0].signed);
    }

    #[tokio::test]
    async fn test_get_device_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/device/iPhone99,9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let catalog = catalog_for(&server).await;
        let err = catalog.get_device("iPhone99,9").await.expect_err("should fail");
        assert!(matches!(err, CatalogError::UnknownDevice(id) if id == "iPhone99,9"));
    }

    #[tokio::test]
    async fn test_beta_firmwares_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/betas/iPhone14,5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"version": "17.0 beta", "buildid": "21A5248v",
                 "url": "https://updates.cdn-apple.com/beta/iPhone14,5_17.0_21A5248v_Restore.ipsw",
                 "signed": true}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/betas/iPad8,1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let catalog = catalog_for(&server).await;
        let betas = catalog.get_beta_firmwares("iPhone14,5").await.expect("betas");
        assert_eq!(betas[0].buildid, "21A5248v");

        let err = catalog.get_beta_firmwares("iPad8,1").await.expect_err("bad json");
        assert!(matches!(err, CatalogError::Decode(_)));
    }
}
