//! Output bundle assembly
//!
//! A bundle is a ZIP holding the raw build manifest plus the SEP and baseband
//! files under their original archive paths. Components are extracted from
//! the firmware archive concurrently; one failing does not stop the other.

use futures::future::join_all;
use sepfinder_formats::{BUILD_MANIFEST_FILE, ExtractedFile, ZipBuilder};
use sepfinder_protocol::{RangeFetcher, RemoteArchive, RemoteArchiveError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use crate::error::BundleError;
use crate::reply::{Reply, messages};
use crate::state::ResolvedBuild;

/// Display names of the bundled components
pub const SEP_NAME: &str = "SEP";
pub const BASEBAND_NAME: &str = "baseband";

/// Finished bundle
#[derive(Debug, Clone)]
pub struct Bundle {
    /// `sepbb_<board>_<buildid>.zip`
    pub file_name: String,
    /// ZIP archive bytes
    pub data: Vec<u8>,
    /// Entry names, in archive order
    pub entries: Vec<String>,
}

impl Bundle {
    /// Write the bundle into `dir` under its file name
    pub async fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// Result of a download: progress and failure notices plus the bundle
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub replies: Vec<Reply>,
    pub bundle: Bundle,
}

/// Extract the resolved components and build the bundle
pub async fn assemble(
    fetcher: Arc<dyn RangeFetcher>,
    build: &ResolvedBuild,
) -> Result<DownloadOutcome, BundleError> {
    let wanted: Vec<(&str, &str)> = [
        (SEP_NAME, build.sep_path.as_deref()),
        (BASEBAND_NAME, build.baseband_path.as_deref()),
    ]
    .into_iter()
    .filter_map(|(name, path)| path.map(|path| (name, path)))
    .collect();

    let mut replies: Vec<Reply> = wanted
        .iter()
        .map(|(name, _)| Reply::text(messages::extracting(name)))
        .collect();

    let mut builder = ZipBuilder::new().add_deflated(BUILD_MANIFEST_FILE, build.manifest.to_vec());
    let mut entries = vec![BUILD_MANIFEST_FILE.to_string()];

    if !wanted.is_empty() {
        let url = Url::parse(&build.firmware.url)
            .map_err(|e| BundleError::InvalidUrl(format!("{}: {e}", build.firmware.url)))?;

        for ((name, path), result) in wanted.iter().zip(extract_all(fetcher, url, &wanted).await) {
            match result {
                Ok(file) => {
                    info!("Extracted {} ({} bytes) from {}", path, file.data.len(), build.firmware.url);
                    builder = builder.add_deflated(file.file_name.clone(), file.data);
                    entries.push(file.file_name);
                }
                Err(e) => {
                    error!("Failed to extract {} ({}): {}", name, path, e);
                    replies.push(Reply::text(messages::extract_failed(name)));
                }
            }
        }
    }

    let data = builder.build()?;
    let bundle = Bundle {
        file_name: build.bundle_name(),
        data,
        entries,
    };
    info!("Built {} with {} entries", bundle.file_name, bundle.entries.len());

    Ok(DownloadOutcome { replies, bundle })
}

/// Extract every wanted path, results in the same order
///
/// The archive index is read once; when that fails, every component fails
/// with the same error.
async fn extract_all(
    fetcher: Arc<dyn RangeFetcher>,
    url: Url,
    wanted: &[(&str, &str)],
) -> Vec<Result<ExtractedFile, Arc<RemoteArchiveError>>> {
    let archive = match RemoteArchive::open(fetcher, url).await {
        Ok(archive) => archive,
        Err(e) => {
            let e = Arc::new(e);
            return wanted.iter().map(|_| Err(Arc::clone(&e))).collect();
        }
    };

    let archive = &archive;
    join_all(wanted.iter().map(|&(_, path)| async move {
        archive.extract(path).await.map_err(Arc::new)
    }))
    .await
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use sepfinder_formats::ArchiveIndex;
    use sepfinder_protocol::{FirmwareRecord, MemoryFetcher};

    const IPSW_URL: &str = "https://updates.cdn-apple.com/fw/iPhone14,5_16.5_20F66_Restore.ipsw";
    const SEP_PATH: &str = "Firmware/all_flash/sep-firmware.d17.RELEASE.im4p";
    const BASEBAND_PATH: &str = "Firmware/Mav21-1.70.02.Release.bbfw";

    fn build(sep: Option<&str>, baseband: Option<&str>) -> ResolvedBuild {
        ResolvedBuild {
            device_name: "iPhone 13".to_string(),
            board: "D17AP".to_string(),
            firmware: FirmwareRecord {
                version: "16.5".to_string(),
                buildid: "20F66".to_string(),
                url: IPSW_URL.to_string(),
                signed: true,
                filesize: None,
            },
            manifest: Bytes::from_static(b"<plist/>"),
            sep_path: sep.map(ToString::to_string),
            baseband_path: baseband.map(ToString::to_string),
        }
    }

    fn fetcher_with_ipsw() -> Arc<MemoryFetcher> {
        let ipsw = ZipBuilder::new()
            .add_deflated("BuildManifest.plist", b"<plist/>".to_vec())
            .add_deflated(SEP_PATH, vec![0x5e; 4096])
            .add_stored(BASEBAND_PATH, vec![0xbb; 1024])
            .build()
            .expect("ipsw");
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(&Url::parse(IPSW_URL).expect("url"), ipsw);
        fetcher
    }

    fn texts(replies: &[Reply]) -> Vec<&str> {
        replies.iter().map(|r| r.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_bundle_with_both_components() {
        let outcome = assemble(fetcher_with_ipsw(), &build(Some(SEP_PATH), Some(BASEBAND_PATH)))
            .await
            .expect("bundle");

        assert_eq!(outcome.bundle.file_name, "sepbb_D17AP_20F66.zip");
        assert_eq!(
            texts(&outcome.replies),
            vec!["Extracting SEP, please wait...", "Extracting baseband, please wait..."]
        );

        let index = ArchiveIndex::from_bytes(&outcome.bundle.data).expect("bundle index");
        let names: Vec<&str> = index.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["BuildManifest.plist", SEP_PATH, BASEBAND_PATH]);
        assert_eq!(
            index
                .extract_from(&outcome.bundle.data, SEP_PATH)
                .expect("sep")
                .data,
            vec![0x5e; 4096]
        );
        assert_eq!(
            index
                .extract_from(&outcome.bundle.data, "BuildManifest.plist")
                .expect("manifest")
                .data,
            b"<plist/>".to_vec()
        );
    }

    #[tokio::test]
    async fn test_missing_baseband_path() {
        let outcome = assemble(fetcher_with_ipsw(), &build(Some(SEP_PATH), None))
            .await
            .expect("bundle");
        assert_eq!(outcome.bundle.entries, vec!["BuildManifest.plist", SEP_PATH]);
        assert_eq!(texts(&outcome.replies), vec!["Extracting SEP, please wait..."]);
    }

    #[tokio::test]
    async fn test_one_component_fails() {
        let outcome = assemble(
            fetcher_with_ipsw(),
            &build(Some("Firmware/all_flash/missing.im4p"), Some(BASEBAND_PATH)),
        )
        .await
        .expect("bundle");

        assert_eq!(outcome.bundle.entries, vec!["BuildManifest.plist", BASEBAND_PATH]);
        assert!(texts(&outcome.replies).contains(
            &"Unable to extract SEP for the selected firmware, please try again later."
        ));
    }

    #[tokio::test]
    async fn test_unreachable_archive() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let outcome = assemble(fetcher.clone(), &build(Some(SEP_PATH), Some(BASEBAND_PATH)))
            .await
            .expect("bundle");

        assert_eq!(outcome.bundle.entries, vec!["BuildManifest.plist"]);
        assert_eq!(outcome.replies.len(), 4);
    }

    #[tokio::test]
    async fn test_write_to_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = assemble(fetcher_with_ipsw(), &build(None, Some(BASEBAND_PATH)))
            .await
            .expect("bundle");

        let path = outcome.bundle.write_to(dir.path()).await.expect("write");
        assert_eq!(path, dir.path().join("sepbb_D17AP_20F66.zip"));
        assert_eq!(std::fs::read(&path).expect("read back"), outcome.bundle.data);
    }

    #[tokio::test]
    async fn test_no_components_skips_archive() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let outcome = assemble(fetcher.clone(), &build(None, None))
            .await
            .expect("bundle");

        assert_eq!(outcome.bundle.entries, vec!["BuildManifest.plist"]);
        assert!(outcome.replies.is_empty());
        assert!(fetcher.reads().is_empty());
    }
}
