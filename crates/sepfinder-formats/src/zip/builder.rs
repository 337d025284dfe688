//! ZIP archive writer
//!
//! Produces single-disk archives with stored or deflated entries. Used for the
//! output bundle and for building synthetic archives in tests.

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

use super::entry::CompressionMethod;
use super::error::{ArchiveFormatError, ArchiveResult};
use super::records::{
    CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader, MAX_COMMENT_LEN,
    U16_SENTINEL, U32_SENTINEL, ZIP64_EOCD_SIZE, Zip64EndOfCentralDirectory, Zip64ExtraField,
    Zip64Locator, write_record,
};

/// 1980-01-01, the earliest MS-DOS date
const DOS_EPOCH_DATE: u16 = 0x0021;
const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;

struct PendingEntry {
    name: String,
    method: CompressionMethod,
    data: Vec<u8>,
}

/// Builder for an in-memory ZIP archive
///
/// Entries are written in the order they were added.
///
/// ```
/// use sepfinder_formats::ZipBuilder;
///
/// let archive = ZipBuilder::new()
///     .add_deflated("BuildManifest.plist", b"<plist/>".to_vec())
///     .add_stored("sep-firmware.im4p", vec![0u8; 16])
///     .build()
///     .expect("build");
/// assert_eq!(&archive[..4], b"PK\x03\x04");
/// ```
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<PendingEntry>,
    comment: Vec<u8>,
    force_zip64: bool,
    prefix_len: u64,
}

impl ZipBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry stored without compression
    pub fn add_stored(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.entries.push(PendingEntry {
            name: name.into(),
            method: CompressionMethod::Stored,
            data,
        });
        self
    }

    /// Add an entry compressed with DEFLATE
    pub fn add_deflated(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.entries.push(PendingEntry {
            name: name.into(),
            method: CompressionMethod::Deflated,
            data,
        });
        self
    }

    /// Set the archive comment
    pub fn with_comment(mut self, comment: Vec<u8>) -> Self {
        self.comment = comment;
        self
    }

    /// Always emit ZIP64 records, even for small archives
    pub fn force_zip64(mut self, force: bool) -> Self {
        self.force_zip64 = force;
        self
    }

    /// Write offsets as if `len` bytes preceded the archive
    ///
    /// The prefix itself is not part of the output. Useful for producing the
    /// tail of a very large archive without materializing the rest.
    pub fn with_prefix_len(mut self, len: u64) -> Self {
        self.prefix_len = len;
        self
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the archive
    pub fn build(self) -> ArchiveResult<Vec<u8>> {
        if self.comment.len() > MAX_COMMENT_LEN {
            return Err(ArchiveFormatError::InvalidHeader(format!(
                "archive comment of {} bytes exceeds {MAX_COMMENT_LEN}",
                self.comment.len()
            )));
        }

        let mut out = Vec::new();
        let mut directory = Vec::new();

        for entry in &self.entries {
            let name = entry.name.as_bytes();
            let name_len = u16::try_from(name.len()).map_err(|_| {
                ArchiveFormatError::InvalidHeader(format!("file name too long: {}", entry.name))
            })?;

            let payload = match entry.method {
                CompressionMethod::Deflated => deflate(&entry.data)?,
                _ => entry.data.clone(),
            };
            let crc32 = crc32fast::hash(&entry.data);
            let offset = self.prefix_len + out.len() as u64;

            let wide = |value: u64| self.force_zip64 || value >= u64::from(U32_SENTINEL);
            let zip64 = Zip64ExtraField {
                uncompressed_size: wide(entry.data.len() as u64).then_some(entry.data.len() as u64),
                compressed_size: wide(payload.len() as u64).then_some(payload.len() as u64),
                local_header_offset: wide(offset).then_some(offset),
            };
            let uses_zip64 = zip64 != Zip64ExtraField::default();
            let version = if uses_zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

            let narrow = |value: Option<u64>, actual: u64| match value {
                Some(_) => U32_SENTINEL,
                None => actual as u32,
            };
            let compressed_size = narrow(zip64.compressed_size, payload.len() as u64);
            let uncompressed_size = narrow(zip64.uncompressed_size, entry.data.len() as u64);

            let local_extra = if zip64.uncompressed_size.is_some() || zip64.compressed_size.is_some()
            {
                Zip64ExtraField {
                    local_header_offset: None,
                    ..zip64
                }
                .encode()
            } else {
                Vec::new()
            };
            let local = LocalFileHeader {
                version_needed: version,
                flags: 0,
                compression: entry.method.code(),
                mod_time: 0,
                mod_date: DOS_EPOCH_DATE,
                crc32,
                compressed_size,
                uncompressed_size,
                file_name_len: name_len,
                extra_len: local_extra.len() as u16,
            };
            out.extend(write_record(&local)?);
            out.extend_from_slice(name);
            out.extend(local_extra);
            out.extend(payload);

            let central_extra = if uses_zip64 { zip64.encode() } else { Vec::new() };
            let central = CentralDirectoryHeader {
                version_made_by: version,
                version_needed: version,
                flags: 0,
                compression: entry.method.code(),
                mod_time: 0,
                mod_date: DOS_EPOCH_DATE,
                crc32,
                compressed_size,
                uncompressed_size,
                file_name_len: name_len,
                extra_len: central_extra.len() as u16,
                comment_len: 0,
                disk_start: 0,
                internal_attrs: 0,
                external_attrs: 0,
                local_header_offset: narrow(zip64.local_header_offset, offset),
            };
            directory.extend(write_record(&central)?);
            directory.extend_from_slice(name);
            directory.extend(central_extra);
        }

        let directory_offset = self.prefix_len + out.len() as u64;
        let directory_size = directory.len() as u64;
        let entry_count = self.entries.len() as u64;
        out.extend(directory);

        let needs_zip64 = self.force_zip64
            || entry_count >= u64::from(U16_SENTINEL)
            || directory_size >= u64::from(U32_SENTINEL)
            || directory_offset >= u64::from(U32_SENTINEL);

        let end = if needs_zip64 {
            let zip64_offset = self.prefix_len + out.len() as u64;
            out.extend(write_record(&Zip64EndOfCentralDirectory {
                record_size: (ZIP64_EOCD_SIZE - 12) as u64,
                version_made_by: VERSION_ZIP64,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                directory_disk: 0,
                disk_entries: entry_count,
                total_entries: entry_count,
                directory_size,
                directory_offset,
            })?);
            out.extend(write_record(&Zip64Locator {
                eocd_disk: 0,
                eocd_offset: zip64_offset,
                total_disks: 1,
            })?);
            EndOfCentralDirectory {
                disk_number: 0,
                directory_disk: 0,
                disk_entries: U16_SENTINEL,
                total_entries: U16_SENTINEL,
                directory_size: U32_SENTINEL,
                directory_offset: U32_SENTINEL,
                comment_len: self.comment.len() as u16,
            }
        } else {
            EndOfCentralDirectory {
                disk_number: 0,
                directory_disk: 0,
                disk_entries: entry_count as u16,
                total_entries: entry_count as u16,
                directory_size: directory_size as u32,
                directory_offset: directory_offset as u32,
                comment_len: self.comment.len() as u16,
            }
        };
        out.extend(write_record(&end)?);
        out.extend(self.comment);

        Ok(out)
    }
}

fn deflate(data: &[u8]) -> ArchiveResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::zip::directory::{
        DirectoryLocation, locate_end_record, parse_central_directory, parse_local_header,
        parse_zip64_end_record, parse_zip64_locator,
    };
    use crate::zip::records::{EOCD_SIZE, ZIP64_LOCATOR_SIZE};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_archive() {
        let archive = ZipBuilder::new().build().expect("build");
        assert_eq!(archive.len(), EOCD_SIZE);
        let end = locate_end_record(&archive, 0).expect("locate");
        assert_eq!(end.record.total_entries, 0);
        assert_eq!(end.record.directory_offset, 0);
    }

    #[test]
    fn test_comment_too_long() {
        let result = ZipBuilder::new()
            .with_comment(vec![0; MAX_COMMENT_LEN + 1])
            .build();
        assert!(matches!(result, Err(ArchiveFormatError::InvalidHeader(_))));
    }

    #[test]
    fn test_local_header_matches_directory() {
        let archive = ZipBuilder::new()
            .add_deflated("BuildManifest.plist", vec![b'x'; 2048])
            .build()
            .expect("build");

        let local = parse_local_header(&archive).expect("local header");
        assert_eq!(local.compression, 8);
        assert_eq!(local.uncompressed_size, 2048);
        assert_eq!(local.crc32, crc32fast::hash(&[b'x'; 2048]));
        assert!(local.compressed_size < 2048);
    }

    #[test]
    fn test_prefix_shifts_offsets() {
        let prefix = 5u64 << 30;
        let archive = ZipBuilder::new()
            .with_prefix_len(prefix)
            .add_stored("Firmware/all_flash/sep-firmware.im4p", vec![9; 64])
            .build()
            .expect("build");

        // Offsets past 4 GiB force the ZIP64 records
        let end = locate_end_record(&archive, prefix).expect("locate");
        assert!(end.record.requires_zip64());

        let locator_at = (end.offset - prefix) as usize - ZIP64_LOCATOR_SIZE;
        let locator = parse_zip64_locator(&archive[locator_at..]).expect("locator");
        let record = parse_zip64_end_record(&archive[(locator.eocd_offset - prefix) as usize..])
            .expect("zip64 record");
        let location = DirectoryLocation::from_zip64(&record);
        assert_eq!(location.entries, 1);

        let start = (location.offset - prefix) as usize;
        let entries =
            parse_central_directory(&archive[start..start + location.size as usize], 1)
                .expect("directory");
        assert_eq!(entries[0].local_header_offset, prefix);
        assert_eq!(entries[0].compressed_size, 64);
    }
}
