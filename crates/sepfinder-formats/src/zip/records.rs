//! Fixed-size ZIP records and the ZIP64 extended-information extra field
//!
//! All multi-byte integers in a ZIP archive are little-endian. Every record
//! here carries its 4-byte signature as a binrw magic, so parsing a record
//! from the wrong offset fails immediately instead of yielding garbage.

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

use super::error::{ArchiveFormatError, ArchiveResult};

/// End of central directory record signature (0x06054b50)
pub const EOCD_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
/// ZIP64 end of central directory locator signature (0x07064b50)
pub const ZIP64_LOCATOR_SIGNATURE: [u8; 4] = *b"PK\x06\x07";
/// ZIP64 end of central directory record signature (0x06064b50)
pub const ZIP64_EOCD_SIGNATURE: [u8; 4] = *b"PK\x06\x06";
/// Central directory file header signature (0x02014b50)
pub const CENTRAL_HEADER_SIGNATURE: [u8; 4] = *b"PK\x01\x02";
/// Local file header signature (0x04034b50)
pub const LOCAL_HEADER_SIGNATURE: [u8; 4] = *b"PK\x03\x04";

/// Size of the end of central directory record without its comment
pub const EOCD_SIZE: usize = 22;
/// Longest comment the end record can declare
pub const MAX_COMMENT_LEN: usize = u16::MAX as usize;
/// Size of the ZIP64 end of central directory locator
pub const ZIP64_LOCATOR_SIZE: usize = 20;
/// Size of the ZIP64 end of central directory record (version 1, no extensible data)
pub const ZIP64_EOCD_SIZE: usize = 56;
/// Fixed portion of a central directory file header
pub const CENTRAL_HEADER_SIZE: usize = 46;
/// Fixed portion of a local file header
pub const LOCAL_HEADER_SIZE: usize = 30;

/// Header ID of the ZIP64 extended information extra field
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
/// 16-bit field value meaning "see the ZIP64 record"
pub const U16_SENTINEL: u16 = 0xFFFF;
/// 32-bit field value meaning "see the ZIP64 record"
pub const U32_SENTINEL: u32 = 0xFFFF_FFFF;

/// End of central directory record (22 bytes + comment)
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PK\x05\x06")]
pub struct EndOfCentralDirectory {
    /// Number of this disk
    pub disk_number: u16,
    /// Disk holding the start of the central directory
    pub directory_disk: u16,
    /// Central directory records on this disk
    pub disk_entries: u16,
    /// Total central directory records
    pub total_entries: u16,
    /// Size of the central directory in bytes
    pub directory_size: u32,
    /// Offset of the central directory from the start of the archive
    pub directory_offset: u32,
    /// Length of the trailing archive comment
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    /// Whether any field carries a ZIP64 sentinel
    pub fn requires_zip64(&self) -> bool {
        self.total_entries == U16_SENTINEL
            || self.disk_entries == U16_SENTINEL
            || self.directory_size == U32_SENTINEL
            || self.directory_offset == U32_SENTINEL
    }
}

/// ZIP64 end of central directory locator (20 bytes)
///
/// Sits immediately before the classic end record.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PK\x06\x07")]
pub struct Zip64Locator {
    /// Disk holding the ZIP64 end record
    pub eocd_disk: u32,
    /// Absolute offset of the ZIP64 end record
    pub eocd_offset: u64,
    /// Total number of disks
    pub total_disks: u32,
}

/// ZIP64 end of central directory record (56 bytes, version 1)
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PK\x06\x06")]
pub struct Zip64EndOfCentralDirectory {
    /// Size of the remaining record (excludes signature and this field)
    pub record_size: u64,
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// Number of this disk
    pub disk_number: u32,
    /// Disk holding the start of the central directory
    pub directory_disk: u32,
    /// Central directory records on this disk
    pub disk_entries: u64,
    /// Total central directory records
    pub total_entries: u64,
    /// Size of the central directory in bytes
    pub directory_size: u64,
    /// Offset of the central directory from the start of the archive
    pub directory_offset: u64,
}

/// Fixed portion of a central directory file header (46 bytes)
///
/// Followed by the file name, extra field and comment.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PK\x01\x02")]
pub struct CentralDirectoryHeader {
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Compression method code
    pub compression: u16,
    /// MS-DOS modification time
    pub mod_time: u16,
    /// MS-DOS modification date
    pub mod_date: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size (or sentinel)
    pub compressed_size: u32,
    /// Uncompressed size (or sentinel)
    pub uncompressed_size: u32,
    /// Length of the file name
    pub file_name_len: u16,
    /// Length of the extra field
    pub extra_len: u16,
    /// Length of the file comment
    pub comment_len: u16,
    /// Disk number where the file starts
    pub disk_start: u16,
    /// Internal file attributes
    pub internal_attrs: u16,
    /// External file attributes
    pub external_attrs: u32,
    /// Offset of the local file header (or sentinel)
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader {
    /// Total on-disk length of this header including its variable parts
    pub fn record_len(&self) -> usize {
        CENTRAL_HEADER_SIZE
            + self.file_name_len as usize
            + self.extra_len as usize
            + self.comment_len as usize
    }
}

/// Fixed portion of a local file header (30 bytes)
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PK\x03\x04")]
pub struct LocalFileHeader {
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Compression method code
    pub compression: u16,
    /// MS-DOS modification time
    pub mod_time: u16,
    /// MS-DOS modification date
    pub mod_date: u16,
    /// CRC-32 (zero when a data descriptor follows)
    pub crc32: u32,
    /// Compressed size (unreliable when a data descriptor follows)
    pub compressed_size: u32,
    /// Uncompressed size (unreliable when a data descriptor follows)
    pub uncompressed_size: u32,
    /// Length of the file name
    pub file_name_len: u16,
    /// Length of the extra field
    pub extra_len: u16,
}

impl LocalFileHeader {
    /// Absolute offset of the entry payload given the header's own offset
    pub fn payload_offset(&self, header_offset: u64) -> u64 {
        header_offset
            + LOCAL_HEADER_SIZE as u64
            + u64::from(self.file_name_len)
            + u64::from(self.extra_len)
    }
}

/// Parse a fixed-size record from the start of `bytes`
pub fn parse_record<T>(bytes: &[u8], what: &str) -> ArchiveResult<T>
where
    T: for<'a> BinRead<Args<'a> = ()>,
{
    T::read_le(&mut Cursor::new(bytes))
        .map_err(|e| ArchiveFormatError::InvalidHeader(format!("{what}: {e}")))
}

/// Serialize a fixed-size record
pub fn write_record<T>(record: &T) -> ArchiveResult<Vec<u8>>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::new());
    record.write_le(&mut cursor)?;
    Ok(cursor.into_inner())
}

/// Values carried by a ZIP64 extended information extra field
///
/// Only the fields whose 32-bit counterparts hold the sentinel are present,
/// always in this order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    /// 64-bit uncompressed size
    pub uncompressed_size: Option<u64>,
    /// 64-bit compressed size
    pub compressed_size: Option<u64>,
    /// 64-bit local header offset
    pub local_header_offset: Option<u64>,
}

impl Zip64ExtraField {
    /// Find and decode the ZIP64 block in an extra field
    ///
    /// `header` tells which values were replaced by sentinels. Returns `None`
    /// when the extra field has no ZIP64 block.
    pub fn parse(extra: &[u8], header: &CentralDirectoryHeader) -> ArchiveResult<Option<Self>> {
        let mut pos = 0;
        while pos + 4 <= extra.len() {
            let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            let start = pos + 4;
            let end = start + size;
            if end > extra.len() {
                // Trailing padding that isn't a well-formed block
                break;
            }
            if id == ZIP64_EXTRA_ID {
                return Self::decode(&extra[start..end], header).map(Some);
            }
            pos = end;
        }
        Ok(None)
    }

    fn decode(block: &[u8], header: &CentralDirectoryHeader) -> ArchiveResult<Self> {
        let mut values = block.chunks_exact(8).map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            u64::from_le_bytes(bytes)
        });
        let mut take = |wanted: bool, field: &str| -> ArchiveResult<Option<u64>> {
            if !wanted {
                return Ok(None);
            }
            values.next().map(Some).ok_or_else(|| {
                ArchiveFormatError::InvalidHeader(format!("ZIP64 extra field missing {field}"))
            })
        };

        let uncompressed_size =
            take(header.uncompressed_size == U32_SENTINEL, "uncompressed size")?;
        let compressed_size = take(header.compressed_size == U32_SENTINEL, "compressed size")?;
        let local_header_offset = take(
            header.local_header_offset == U32_SENTINEL,
            "local header offset",
        )?;

        Ok(Self {
            uncompressed_size,
            compressed_size,
            local_header_offset,
        })
    }

    /// Encode as a complete extra field block (header ID, size, values)
    pub fn encode(&self) -> Vec<u8> {
        let values: Vec<u64> = [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut block = Vec::with_capacity(4 + values.len() * 8);
        block.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        block.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
        for value in values {
            block.extend_from_slice(&value.to_le_bytes());
        }
        block
    }
}
