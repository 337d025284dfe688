//! Locating a firmware's build manifest
//!
//! Most firmware hosts publish `BuildManifest.plist` next to the archive, so
//! a single small GET is enough. Legacy hosts do not, and for those (or when
//! the sibling fetch fails) the manifest is extracted from the archive itself.

use bytes::Bytes;
use sepfinder_formats::BUILD_MANIFEST_FILE;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ManifestSourceError;
use crate::range::RangeFetcher;
use crate::remote_zip::RemoteArchive;

/// Where a manifest was obtained from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOrigin {
    /// Fetched from the URL next to the archive
    Sibling,
    /// Extracted from the archive's central directory
    Archive,
}

/// Raw manifest bytes and how they were obtained
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    /// Manifest document, unparsed
    pub bytes: Bytes,
    /// Source of the bytes
    pub origin: ManifestOrigin,
}

/// Strategy for obtaining build manifests
#[derive(Clone)]
pub struct ManifestSource {
    fetcher: Arc<dyn RangeFetcher>,
    config: ClientConfig,
}

impl ManifestSource {
    /// Create a manifest source using `fetcher` for every request
    pub fn new(fetcher: Arc<dyn RangeFetcher>, config: &ClientConfig) -> Self {
        Self {
            fetcher,
            config: config.clone(),
        }
    }

    /// Fetcher shared with archive extraction
    pub fn fetcher(&self) -> &Arc<dyn RangeFetcher> {
        &self.fetcher
    }

    /// Whether `url` is served from a host without sibling manifests
    pub fn is_legacy(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.config.is_legacy_host(host))
    }

    /// Obtain the manifest for the firmware archive at `firmware_url`
    pub async fn fetch(&self, firmware_url: &str) -> Result<FetchedManifest, ManifestSourceError> {
        let url = Url::parse(firmware_url)
            .map_err(|e| ManifestSourceError::InvalidUrl(format!("{firmware_url}: {e}")))?;

        if self.is_legacy(&url) {
            info!("Legacy host for {}, extracting manifest from archive", url);
            return self.from_archive(url).await;
        }

        let sibling = sibling_url(&url, BUILD_MANIFEST_FILE)?;
        match self.fetcher.fetch_whole(&sibling).await {
            Ok(bytes) => {
                info!("Fetched manifest from {}", sibling);
                Ok(FetchedManifest {
                    bytes,
                    origin: ManifestOrigin::Sibling,
                })
            }
            Err(e) => {
                warn!("Sibling manifest {} unavailable ({}), extracting from archive", sibling, e);
                self.from_archive(url).await
            }
        }
    }

    async fn from_archive(&self, url: Url) -> Result<FetchedManifest, ManifestSourceError> {
        let archive = RemoteArchive::open(Arc::clone(&self.fetcher), url).await?;
        let file = archive.extract(BUILD_MANIFEST_FILE).await?;
        Ok(FetchedManifest {
            bytes: file.data.into(),
            origin: ManifestOrigin::Archive,
        })
    }
}

/// Replace the last path segment of `url` with `file_name`
pub fn sibling_url(url: &Url, file_name: &str) -> Result<Url, ManifestSourceError> {
    let mut sibling = url.clone();
    sibling
        .path_segments_mut()
        .map_err(|()| ManifestSourceError::InvalidUrl(url.to_string()))?
        .pop()
        .push(file_name);
    Ok(sibling)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryFetcher;
    use pretty_assertions::assert_eq;
    use sepfinder_formats::ZipBuilder;

    const MANIFEST: &[u8] = b"<?xml version=\"1.0\"?><plist version=\"1.0\"><dict/></plist>";

    fn archive_with_manifest(manifest: &[u8]) -> Vec<u8> {
        ZipBuilder::new()
            .add_deflated(BUILD_MANIFEST_FILE, manifest.to_vec())
            .add_stored("Firmware/all_flash/sep-firmware.n71.RELEASE.im4p", vec![1; 64])
            .build()
            .expect("archive")
    }

    fn source(fetcher: &Arc<MemoryFetcher>) -> ManifestSource {
        ManifestSource::new(fetcher.clone(), &ClientConfig::default())
    }

    #[test]
    fn test_sibling_url() {
        let url = Url::parse(
            "https://updates.cdn-apple.com/2023SpringFCS/fullrestores/032-84904/iPhone14,5_16.5_20F66_Restore.ipsw?x=1",
        )
        .expect("url");
        assert_eq!(
            sibling_url(&url, BUILD_MANIFEST_FILE).expect("sibling").as_str(),
            "https://updates.cdn-apple.com/2023SpringFCS/fullrestores/032-84904/BuildManifest.plist?x=1"
        );
    }

    #[test]
    fn test_legacy_detection() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let source = source(&fetcher);
        let legacy = Url::parse("http://appldnld.apple.com/iOS9/a.ipsw").expect("url");
        let modern = Url::parse("https://updates.cdn-apple.com/a.ipsw").expect("url");
        assert!(source.is_legacy(&legacy));
        assert!(!source.is_legacy(&modern));
    }

    #[test]
    fn test_legacy_detection_follows_config() {
        let config = ClientConfig {
            legacy_hosts: vec!["old.example.com".to_string()],
            ..ClientConfig::default()
        };
        let source = ManifestSource::new(Arc::new(MemoryFetcher::new()), &config);

        let custom = Url::parse("http://OLD.example.com/fw/a.ipsw").expect("url");
        let default_legacy = Url::parse("http://appldnld.apple.com/iOS9/a.ipsw").expect("url");
        assert!(config.is_legacy_host("OLD.EXAMPLE.COM"));
        assert!(source.is_legacy(&custom));
        assert!(!source.is_legacy(&default_legacy));
    }

    #[tokio::test]
    async fn test_sibling_fetch_preferred() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let ipsw = Url::parse("https://updates.cdn-apple.com/fw/iPhone_16.5_Restore.ipsw").expect("url");
        let sibling = Url::parse("https://updates.cdn-apple.com/fw/BuildManifest.plist").expect("url");
        fetcher.insert(&ipsw, archive_with_manifest(b"from archive"));
        fetcher.insert(&sibling, MANIFEST.to_vec());

        let manifest = source(&fetcher).fetch(ipsw.as_str()).await.expect("manifest");
        assert_eq!(manifest.origin, ManifestOrigin::Sibling);
        assert_eq!(manifest.bytes.as_ref(), MANIFEST);
        assert!(fetcher.reads().is_empty(), "no ranged reads expected");
    }

    #[tokio::test]
    async fn test_sibling_missing_falls_back_to_archive() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let ipsw = Url::parse("https://updates.cdn-apple.com/fw/iPhone_16.5_Restore.ipsw").expect("url");
        fetcher.insert(&ipsw, archive_with_manifest(MANIFEST));

        let manifest = source(&fetcher).fetch(ipsw.as_str()).await.expect("manifest");
        assert_eq!(manifest.origin, ManifestOrigin::Archive);
        assert_eq!(manifest.bytes.as_ref(), MANIFEST);
    }

    #[tokio::test]
    async fn test_legacy_host_always_uses_archive() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let ipsw = Url::parse("http://appldnld.apple.com/iOS10/091-1234/iPhone_10.3.3_Restore.ipsw")
            .expect("url");
        let sibling = Url::parse("http://appldnld.apple.com/iOS10/091-1234/BuildManifest.plist")
            .expect("url");
        fetcher.insert(&ipsw, archive_with_manifest(MANIFEST));
        // A sibling exists, but must never be consulted for legacy hosts
        fetcher.insert(&sibling, b"wrong manifest".to_vec());

        let manifest = source(&fetcher).fetch(ipsw.as_str()).await.expect("manifest");
        assert_eq!(manifest.origin, ManifestOrigin::Archive);
        assert_eq!(manifest.bytes.as_ref(), MANIFEST);
        assert!(
            fetcher
                .reads()
                .iter()
                .all(|(url, _, _)| url == ipsw.as_str())
        );
    }

    #[tokio::test]
    async fn test_both_sources_fail() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let err = source(&fetcher)
            .fetch("https://updates.cdn-apple.com/fw/missing.ipsw")
            .await
            .expect_err("should fail");
        assert!(matches!(err, ManifestSourceError::Archive(_)));

        let err = source(&fetcher).fetch("not a url").await.expect_err("bad url");
        assert!(matches!(err, ManifestSourceError::InvalidUrl(_)));
    }
}
