//! # sepfinder-protocol - Remote partial firmware extraction
//!
//! This crate provides the networking half of the firmware extraction
//! pipeline: byte-range reads over HTTP, ZIP archives indexed and extracted
//! through those reads, build manifest lookup and the device catalog.
//!
//! ## Architecture Overview
//!
//! 1. **Range reads** ([`RangeFetcher`], [`HttpRangeFetcher`]): exact inclusive
//!    byte spans with a per-attempt deadline and retry with backoff
//! 2. **Remote archives** ([`RemoteArchive`]): central directory located from
//!    the archive tail, entries fetched and decoded one at a time
//! 3. **Manifest lookup** ([`ManifestSource`]): sibling `BuildManifest.plist`
//!    first, archive extraction for legacy hosts or as a fallback
//! 4. **Catalog** ([`Catalog`], [`IpswCatalog`]): device list (cached
//!    process-wide), device records and beta firmwares
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sepfinder_protocol::{ClientConfig, HttpRangeFetcher, RemoteArchive};
//! use std::sync::Arc;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_env();
//!     let fetcher = Arc::new(HttpRangeFetcher::new(&config)?);
//!
//!     let url = Url::parse("https://updates.cdn-apple.com/.../iPhone14,5_16.5_20F66_Restore.ipsw")?;
//!     let archive = RemoteArchive::open(fetcher, url).await?;
//!     let manifest = archive.extract("BuildManifest.plist").await?;
//!     println!("{} bytes of manifest", manifest.data.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! [`TransportError`]s are retryable when [`TransportError::should_retry`]
//! says so; [`RetryPolicy`] handles that internally. Format errors from
//! `sepfinder-formats` are never retried.

pub mod catalog;
pub mod config;
pub mod error;
pub mod manifest_source;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod range;
pub mod remote_zip;
pub mod retry;
pub mod transport;

pub use catalog::{
    Board, Catalog, DeviceListCache, DeviceRecord, DeviceSummary, FirmwareRecord, IpswCatalog,
};
pub use config::ClientConfig;
pub use error::{CatalogError, ManifestSourceError, RemoteArchiveError, Result, TransportError};
pub use manifest_source::{FetchedManifest, ManifestOrigin, ManifestSource, sibling_url};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryFetcher;
pub use range::{ContentRange, HttpRangeFetcher, RangeFetcher};
pub use remote_zip::RemoteArchive;
pub use retry::{RetryPolicy, Span};
pub use transport::{build_client, ensure_crypto_provider};
