//! Error types for ZIP archive operations

use thiserror::Error;

/// ZIP operation result type
pub type ArchiveResult<T> = Result<T, ArchiveFormatError>;

/// Malformed or unsupported ZIP structure
///
/// None of these are worth retrying: the same bytes will fail the same way.
#[derive(Debug, Error)]
pub enum ArchiveFormatError {
    /// No end-of-central-directory record in the archive tail
    #[error("End of central directory record not found")]
    EocdNotFound,

    /// The central directory holds fewer records than the end record declares
    #[error("Truncated central directory: declared {declared} entries, parsed {parsed}")]
    TruncatedDirectory {
        /// Entry count from the end record
        declared: u64,
        /// Records actually parsed
        parsed: u64,
    },

    /// Stored entry length disagrees with its declared size
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared uncompressed size
        expected: u64,
        /// Bytes actually present
        actual: u64,
    },

    /// Inflating a deflated entry failed or produced the wrong length
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// Compression method other than stored (0) or deflate (8)
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// CRC-32 of the decoded bytes disagrees with the directory entry
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// CRC-32 stored in the central directory
        expected: u32,
        /// CRC-32 computed over the decoded bytes
        actual: u32,
    },

    /// An entry's data would extend past the end of the archive
    #[error("Entry {name} ends at byte {end}, past archive length {length}")]
    EntryOutOfBounds {
        /// Entry file name
        name: String,
        /// First byte after the entry's compressed data
        end: u64,
        /// Total archive length
        length: u64,
    },

    /// A record signature or field is invalid
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Requested entry is not in the central directory
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Binary read/write error
    #[error("Binary format error: {0}")]
    BinRead(#[from] binrw::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveFormatError {
    /// Check if this error describes the archive itself rather than a lookup miss
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::EntryNotFound(_) | Self::Io(_))
    }

    /// Check if this is an integrity failure of decoded data
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::SizeMismatch { .. } | Self::DecompressionFailed(_)
        )
    }
}
