//! ZIP archives read through a [`RangeFetcher`]
//!
//! Opening an archive costs one length probe, one tail read, up to two ZIP64
//! record reads and one central directory read, in the order
//! [`DirectoryLookup`] asks for them. Records inside the tail window are
//! served from it. Each extraction afterwards
//! costs a local header read and a payload read.

use bytes::Bytes;
use sepfinder_formats::zip::{
    ArchiveIndex, CentralDirectoryEntry, DirectoryLookup, ExtractedFile, LOCAL_HEADER_SIZE,
    LookupStep, ReadRequest, parse_local_header,
};
use sepfinder_formats::ArchiveFormatError;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::RemoteArchiveError;
use crate::range::RangeFetcher;

/// Remote archive result type
pub type Result<T> = std::result::Result<T, RemoteArchiveError>;

/// An indexed ZIP archive behind a URL
///
/// The index is built once in [`RemoteArchive::open`] and never changes, so a
/// `RemoteArchive` can serve concurrent extractions.
pub struct RemoteArchive {
    fetcher: Arc<dyn RangeFetcher>,
    url: Url,
    index: ArchiveIndex,
}

impl std::fmt::Debug for RemoteArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteArchive")
            .field("url", &self.url.as_str())
            .field("length", &self.index.archive_len())
            .field("entries", &self.index.len())
            .finish_non_exhaustive()
    }
}

/// Tail bytes already fetched, reused for records that fall inside them
struct TailWindow {
    offset: u64,
    bytes: Bytes,
}

impl TailWindow {
    fn slice(&self, read: ReadRequest) -> Option<Bytes> {
        let start = read.offset.checked_sub(self.offset)?;
        let end = start.checked_add(read.len)?;
        if end > self.bytes.len() as u64 {
            return None;
        }
        Some(self.bytes.slice(start as usize..end as usize))
    }
}

impl RemoteArchive {
    /// Probe the archive length and read its central directory
    pub async fn open(fetcher: Arc<dyn RangeFetcher>, url: Url) -> Result<Self> {
        let length = fetcher.length(&url).await?;
        let mut lookup = DirectoryLookup::new(length)?;
        let mut window: Option<TailWindow> = None;

        let index = loop {
            let read = lookup.next_read();
            let bytes = match window.as_ref().and_then(|w| w.slice(read)) {
                Some(bytes) => bytes,
                None => {
                    debug!("Directory read {} bytes={}-{}", url, read.offset, read.last());
                    fetcher.fetch(&url, read.offset, read.last()).await?
                }
            };
            if window.is_none() {
                window = Some(TailWindow {
                    offset: read.offset,
                    bytes: bytes.clone(),
                });
            }

            match lookup.supply(&bytes)? {
                LookupStep::Read(next) => lookup = next,
                LookupStep::Indexed(index) => break index,
            }
        };

        info!("Indexed {} entries of {}", index.len(), url);
        Ok(Self {
            fetcher,
            url,
            index,
        })
    }

    /// URL this archive was opened from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Entry table
    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Look up an entry by exact name
    pub fn find(&self, name: &str) -> Option<&CentralDirectoryEntry> {
        self.index.find(name)
    }

    /// Fetch and decode one entry by name
    pub async fn extract(&self, name: &str) -> Result<ExtractedFile> {
        let entry = self.index.require(name)?;
        self.extract_entry(entry).await
    }

    /// Fetch and decode an entry of this archive's index
    pub async fn extract_entry(&self, entry: &CentralDirectoryEntry) -> Result<ExtractedFile> {
        if entry.compressed_size == 0 {
            return Ok(ExtractedFile {
                file_name: entry.file_name.clone(),
                data: entry.decode(&[])?,
            });
        }

        let header_start = entry.local_header_offset;
        let header_bytes = self
            .fetcher
            .fetch(
                &self.url,
                header_start,
                header_start + LOCAL_HEADER_SIZE as u64 - 1,
            )
            .await?;
        let header = parse_local_header(&header_bytes)?;

        let payload_start = header.payload_offset(header_start);
        let payload_end = payload_start + entry.compressed_size - 1;
        if payload_end >= self.index.archive_len() {
            return Err(ArchiveFormatError::EntryOutOfBounds {
                name: entry.file_name.clone(),
                end: payload_end + 1,
                length: self.index.archive_len(),
            }
            .into());
        }

        debug!(
            "Extracting {} ({} -> {} bytes)",
            entry.file_name, entry.compressed_size, entry.uncompressed_size
        );
        let payload = self
            .fetcher
            .fetch(&self.url, payload_start, payload_end)
            .await?;

        let file_name = entry.file_name.clone();
        let entry = entry.clone();
        let data = tokio::task::spawn_blocking(move || entry.decode(&payload))
            .await
            .map_err(|e| {
                ArchiveFormatError::DecompressionFailed(format!("decoder task failed: {e}"))
            })??;

        Ok(ExtractedFile { file_name, data })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::range::tests::{RangeResponder, test_config};
    use crate::memory::MemoryFetcher;
    use crate::range::HttpRangeFetcher;
    use pretty_assertions::assert_eq;
    use sepfinder_formats::ZipBuilder;
    use sepfinder_formats::zip::end_window_len;
    use sepfinder_formats::zip::records::{
        CentralDirectoryHeader, EndOfCentralDirectory, Zip64EndOfCentralDirectory, Zip64ExtraField,
        Zip64Locator, write_record,
    };
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer};

    const SEP: &str = "Firmware/all_flash/sep-firmware.d17.RELEASE.im4p";
    const BASEBAND: &str = "Firmware/Mav21-1.60.00.Release.bbfw";

    fn firmware_archive() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let sep: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let baseband = vec![0x5Au8; 20_000];
        let archive = ZipBuilder::new()
            .add_deflated("BuildManifest.plist", b"<plist/>".repeat(100))
            .add_stored(SEP, sep.clone())
            .add_deflated(BASEBAND, baseband.clone())
            .add_stored("Firmware/empty.txt", Vec::new())
            .with_comment(b"ipsw".to_vec())
            .build()
            .expect("build archive");
        (archive, sep, baseband)
    }

    fn memory_url() -> Url {
        Url::parse("https://updates.cdn-apple.com/2023/iPhone14,5_16.5_20F66_Restore.ipsw")
            .expect("url")
    }

    #[tokio::test]
    async fn test_open_and_extract_over_http() {
        let (archive, sep, baseband) = firmware_archive();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fw.ipsw"))
            .respond_with(RangeResponder(archive))
            .mount(&server)
            .await;

        let fetcher = Arc::new(HttpRangeFetcher::new(&test_config()).expect("fetcher"));
        let url = Url::parse(&format!("{}/fw.ipsw", server.uri())).expect("url");
        let remote = RemoteArchive::open(fetcher, url).await.expect("open");

        assert_eq!(remote.index().len(), 4);
        assert_eq!(remote.extract(SEP).await.expect("sep").data, sep);
        assert_eq!(remote.extract(BASEBAND).await.expect("baseband").data, baseband);
        assert_eq!(
            remote.extract("BuildManifest.plist").await.expect("manifest").data,
            b"<plist/>".repeat(100)
        );
    }

    #[tokio::test]
    async fn test_small_archive_reads() {
        let (archive, _, _) = firmware_archive();
        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert(&url, archive.clone());

        let remote = RemoteArchive::open(fetcher.clone(), url.clone())
            .await
            .expect("open");
        // The whole archive fits the tail window: one read indexes it
        assert_eq!(fetcher.reads(), vec![(url.to_string(), 0, archive.len() as u64 - 1)]);

        let empty = remote.extract("Firmware/empty.txt").await.expect("empty");
        assert!(empty.data.is_empty());
        assert_eq!(fetcher.reads().len(), 1, "empty entries need no fetch");

        remote.extract(SEP).await.expect("sep");
        let reads = fetcher.reads();
        assert_eq!(reads.len(), 3);
        assert_eq!(reads[1].2 - reads[1].1 + 1, LOCAL_HEADER_SIZE as u64);
        assert_eq!(reads[2].2 - reads[2].1 + 1, 50_000);
    }

    #[tokio::test]
    async fn test_large_archive_reads_only_tail_and_directory() {
        // 8 GiB archive whose directory sits in the last few hundred bytes
        let length = 8u64 << 30;
        let payload = vec![0xC3u8; 4096];
        let tail = ZipBuilder::new()
            .with_prefix_len(length - 10_000)
            .add_stored(SEP, payload.clone())
            .build()
            .expect("build tail");
        let tail_len = tail.len() as u64;
        let prefix = length - tail_len;
        // Rebuild with the exact prefix so offsets line up with the end
        let tail = ZipBuilder::new()
            .with_prefix_len(prefix)
            .add_stored(SEP, payload.clone())
            .build()
            .expect("build tail");
        assert_eq!(tail.len() as u64, tail_len);

        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert_sparse(&url, length, tail);

        let remote = RemoteArchive::open(fetcher.clone(), url).await.expect("open");
        let entry = remote.find(SEP).expect("entry");
        assert_eq!(entry.local_header_offset, prefix);
        assert_eq!(entry.compressed_size, 4096);

        assert_eq!(remote.extract(SEP).await.expect("extract").data, payload);
        for (_, start, _) in fetcher.reads() {
            assert!(start >= length - end_window_len(length));
        }
    }

    /// Directory tail claiming one entry of `size` bytes at offset zero
    fn zip64_tail(name: &str, size: u64, directory_offset: u64) -> Vec<u8> {
        let zip64 = Zip64ExtraField {
            uncompressed_size: Some(size),
            compressed_size: Some(size),
            local_header_offset: Some(0),
        };
        let extra = zip64.encode();
        let mut tail = write_record(&CentralDirectoryHeader {
            version_made_by: 45,
            version_needed: 45,
            flags: 0,
            compression: 0,
            mod_time: 0,
            mod_date: 0x0021,
            crc32: 0,
            compressed_size: u32::MAX,
            uncompressed_size: u32::MAX,
            file_name_len: name.len() as u16,
            extra_len: extra.len() as u16,
            comment_len: 0,
            disk_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            local_header_offset: u32::MAX,
        })
        .expect("central header");
        tail.extend_from_slice(name.as_bytes());
        tail.extend_from_slice(&extra);
        let directory_size = tail.len() as u64;

        tail.extend(
            write_record(&Zip64EndOfCentralDirectory {
                record_size: 44,
                version_made_by: 45,
                version_needed: 45,
                disk_number: 0,
                directory_disk: 0,
                disk_entries: 1,
                total_entries: 1,
                directory_size,
                directory_offset,
            })
            .expect("zip64 record"),
        );
        tail.extend(
            write_record(&Zip64Locator {
                eocd_disk: 0,
                eocd_offset: directory_offset + directory_size,
                total_disks: 1,
            })
            .expect("locator"),
        );
        tail.extend(
            write_record(&EndOfCentralDirectory {
                disk_number: 0,
                directory_disk: 0,
                disk_entries: u16::MAX,
                total_entries: u16::MAX,
                directory_size: u32::MAX,
                directory_offset: u32::MAX,
                comment_len: 0,
            })
            .expect("end record"),
        );
        tail
    }

    #[tokio::test]
    async fn test_zip64_entry_beyond_4gib() {
        let name = "Firmware/078-12345-678.dmg";
        let size = 5u64 << 30;
        let directory_offset = LOCAL_HEADER_SIZE as u64 + name.len() as u64 + size;
        let tail = zip64_tail(name, size, directory_offset);
        let length = directory_offset + tail.len() as u64;

        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert_sparse(&url, length, tail);

        let remote = RemoteArchive::open(fetcher, url).await.expect("open");
        let entry = remote.find(name).expect("entry");
        assert_eq!(entry.compressed_size, size);
        assert_eq!(entry.uncompressed_size, size);
        assert_eq!(entry.local_header_offset, 0);
        assert_eq!(remote.index().archive_len(), length);
    }

    #[tokio::test]
    async fn test_zip64_records_served_from_tail_window() {
        let archive = ZipBuilder::new()
            .force_zip64(true)
            .add_stored(SEP, vec![7; 512])
            .build()
            .expect("build archive");
        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert(&url, archive);

        let remote = RemoteArchive::open(fetcher.clone(), url).await.expect("open");
        assert_eq!(remote.index().len(), 1);
        // Locator, ZIP64 record and directory all lie inside the tail read
        assert_eq!(fetcher.reads().len(), 1);
        assert_eq!(remote.extract(SEP).await.expect("sep").data, vec![7; 512]);
    }

    #[tokio::test]
    async fn test_zip64_entry_exceeding_archive() {
        let name = "Firmware/078-12345-678.dmg";
        let size = 5u64 << 30;
        // Directory placed well before where the claimed payload would end
        let directory_offset = 1 << 20;
        let tail = zip64_tail(name, size, directory_offset);
        let length = directory_offset + tail.len() as u64;

        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert_sparse(&url, length, tail);

        let err = RemoteArchive::open(fetcher, url).await.expect_err("should fail");
        assert!(matches!(
            err,
            RemoteArchiveError::Format(ArchiveFormatError::EntryOutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_a_zip() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert(&url, vec![0u8; 100_000]);

        let err = RemoteArchive::open(fetcher, url).await.expect_err("should fail");
        assert!(matches!(
            err,
            RemoteArchiveError::Format(ArchiveFormatError::EocdNotFound)
        ));
        assert!(err.is_format_error());
    }

    #[tokio::test]
    async fn test_missing_resource() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let err = RemoteArchive::open(fetcher, memory_url())
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            RemoteArchiveError::Transport(TransportError::Status { .. })
        ));
    }

    #[tokio::test]
    async fn test_entry_not_found() {
        let (archive, _, _) = firmware_archive();
        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert(&url, archive);

        let remote = RemoteArchive::open(fetcher, url).await.expect("open");
        let err = remote
            .extract("firmware/all_flash/SEP-FIRMWARE.D17.RELEASE.IM4P")
            .await
            .expect_err("lookup is case-sensitive");
        assert!(matches!(
            err,
            RemoteArchiveError::Format(ArchiveFormatError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_extractions() {
        let (archive, sep, baseband) = firmware_archive();
        let fetcher = Arc::new(MemoryFetcher::new());
        let url = memory_url();
        fetcher.insert(&url, archive);

        let remote = RemoteArchive::open(fetcher, url).await.expect("open");
        let (a, b) = futures::join!(remote.extract(SEP), remote.extract(BASEBAND));
        assert_eq!(a.expect("sep").data, sep);
        assert_eq!(b.expect("baseband").data, baseband);
    }
}
