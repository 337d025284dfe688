//! Central directory entries and payload decoding

use flate2::read::DeflateDecoder;
use std::io::Read;

use super::error::{ArchiveFormatError, ArchiveResult};
use super::records::{CentralDirectoryHeader, U32_SENTINEL, Zip64ExtraField};

/// Upper bound on the buffer reserved up front when inflating
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Compression method of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Method 0, bytes stored as-is
    Stored,
    /// Method 8, raw DEFLATE
    Deflated,
    /// Any other method code
    Unsupported(u16),
}

impl CompressionMethod {
    /// Parse from the method code in a ZIP header
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Stored,
            8 => Self::Deflated,
            other => Self::Unsupported(other),
        }
    }

    /// Method code as written in ZIP headers
    pub fn code(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
            Self::Unsupported(code) => code,
        }
    }
}

/// One file listed in an archive's central directory
///
/// Sizes and offset are already widened with any ZIP64 values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    /// File name (archive-relative path)
    pub file_name: String,
    /// Compression method
    pub compression: CompressionMethod,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Size of the payload as stored in the archive
    pub compressed_size: u64,
    /// Size after decoding
    pub uncompressed_size: u64,
    /// Offset of the entry's local file header
    pub local_header_offset: u64,
}

impl CentralDirectoryEntry {
    /// Build an entry from a parsed header and its variable-length parts
    pub fn from_header(
        header: &CentralDirectoryHeader,
        file_name: &[u8],
        extra: &[u8],
    ) -> ArchiveResult<Self> {
        let mut compressed_size = u64::from(header.compressed_size);
        let mut uncompressed_size = u64::from(header.uncompressed_size);
        let mut local_header_offset = u64::from(header.local_header_offset);

        let needs_zip64 = header.compressed_size == U32_SENTINEL
            || header.uncompressed_size == U32_SENTINEL
            || header.local_header_offset == U32_SENTINEL;

        if let Some(zip64) = Zip64ExtraField::parse(extra, header)? {
            if let Some(size) = zip64.uncompressed_size {
                uncompressed_size = size;
            }
            if let Some(size) = zip64.compressed_size {
                compressed_size = size;
            }
            if let Some(offset) = zip64.local_header_offset {
                local_header_offset = offset;
            }
        } else if needs_zip64 {
            return Err(ArchiveFormatError::InvalidHeader(format!(
                "entry {} uses ZIP64 sentinels without a ZIP64 extra field",
                String::from_utf8_lossy(file_name)
            )));
        }

        Ok(Self {
            file_name: String::from_utf8_lossy(file_name).into_owned(),
            compression: CompressionMethod::from_code(header.compression),
            crc32: header.crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
        })
    }

    /// First byte past this entry's compressed data, assuming a bare local header
    ///
    /// Used as a lower bound when validating entries against the archive length.
    pub fn min_end(&self) -> u64 {
        self.local_header_offset
            .saturating_add(super::records::LOCAL_HEADER_SIZE as u64)
            .saturating_add(self.compressed_size)
    }

    /// Decode a fetched payload into the entry's original bytes
    ///
    /// Verifies the decoded length and the CRC-32 from the central directory.
    pub fn decode(&self, payload: &[u8]) -> ArchiveResult<Vec<u8>> {
        let data = match self.compression {
            CompressionMethod::Stored => {
                if payload.len() as u64 != self.uncompressed_size {
                    return Err(ArchiveFormatError::SizeMismatch {
                        expected: self.uncompressed_size,
                        actual: payload.len() as u64,
                    });
                }
                payload.to_vec()
            }
            CompressionMethod::Deflated => inflate(payload, self.uncompressed_size)?,
            CompressionMethod::Unsupported(code) => {
                return Err(ArchiveFormatError::UnsupportedCompression(code));
            }
        };

        self.verify_checksum(&data)?;
        Ok(data)
    }

    fn verify_checksum(&self, data: &[u8]) -> ArchiveResult<()> {
        let actual = crc32fast::hash(data);
        if actual != self.crc32 {
            return Err(ArchiveFormatError::ChecksumMismatch {
                expected: self.crc32,
                actual,
            });
        }
        Ok(())
    }
}

/// Inflate raw DEFLATE data to exactly `expected` bytes
fn inflate(payload: &[u8], expected: u64) -> ArchiveResult<Vec<u8>> {
    let capacity = usize::try_from(expected)
        .map_err(|_| {
            ArchiveFormatError::DecompressionFailed(format!(
                "uncompressed size {expected} exceeds addressable memory"
            ))
        })?
        .min(MAX_PREALLOCATION);

    // One extra byte lets an overlong stream be detected without reading it all
    let mut decoder = DeflateDecoder::new(payload).take(expected.saturating_add(1));
    let mut decompressed = Vec::with_capacity(capacity);
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ArchiveFormatError::DecompressionFailed(format!("inflate failed: {e}")))?;

    if decompressed.len() as u64 != expected {
        return Err(ArchiveFormatError::DecompressionFailed(format!(
            "inflated {} bytes, expected {}",
            decompressed.len(),
            expected
        )));
    }

    Ok(decompressed)
}

/// A decoded archive member, owned by whoever requested it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Archive-relative file name
    pub file_name: String,
    /// Decoded bytes
    pub data: Vec<u8>,
}
