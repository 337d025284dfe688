//! End record location and central directory parsing
//!
//! Reading an archive's directory takes at most four targeted reads, driven
//! by [`DirectoryLookup`]:
//!
//! ```text
//! tail window ──► EOCD ──(sentinels?)──► ZIP64 locator ──► ZIP64 EOCD
//!                   │                                          │
//!                   └──────────────► DirectoryLocation ◄───────┘
//!                                          │
//!                              central directory bytes ──► ArchiveIndex
//! ```

use std::collections::HashMap;

use super::entry::{CentralDirectoryEntry, ExtractedFile};
use super::error::{ArchiveFormatError, ArchiveResult};
use super::records::{
    CENTRAL_HEADER_SIGNATURE, CENTRAL_HEADER_SIZE, CentralDirectoryHeader, EOCD_SIGNATURE,
    EOCD_SIZE, EndOfCentralDirectory, LOCAL_HEADER_SIZE, LocalFileHeader, MAX_COMMENT_LEN,
    ZIP64_EOCD_SIZE, ZIP64_LOCATOR_SIZE, Zip64EndOfCentralDirectory, Zip64Locator, parse_record,
};

/// Number of trailing bytes that always contain the end record
pub fn end_window_len(archive_len: u64) -> u64 {
    archive_len.min((EOCD_SIZE + MAX_COMMENT_LEN) as u64)
}

/// End record found inside a tail window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndRecordLocation {
    /// Absolute offset of the end record signature
    pub offset: u64,
    /// Parsed end record
    pub record: EndOfCentralDirectory,
}

impl EndRecordLocation {
    /// Absolute offset where a ZIP64 locator would sit, if there is room for one
    pub fn zip64_locator_offset(&self) -> Option<u64> {
        self.offset.checked_sub(ZIP64_LOCATOR_SIZE as u64)
    }
}

/// Scan a tail window backward for the end of central directory record
///
/// `window_offset` is the absolute offset of `window[0]`. A candidate whose
/// comment reaches exactly the end of the window is preferred; otherwise the
/// last candidate whose record fits is used, which tolerates trailing bytes
/// after the comment.
pub fn locate_end_record(window: &[u8], window_offset: u64) -> ArchiveResult<EndRecordLocation> {
    if window.len() < EOCD_SIZE {
        return Err(ArchiveFormatError::EocdNotFound);
    }

    let mut fallback = None;
    for pos in (0..=window.len() - EOCD_SIZE).rev() {
        if window[pos..pos + 4] != EOCD_SIGNATURE {
            continue;
        }
        let Ok(record) = parse_record::<EndOfCentralDirectory>(&window[pos..], "end record")
        else {
            continue;
        };

        let record_end = pos + EOCD_SIZE + record.comment_len as usize;
        if record_end == window.len() {
            return Ok(EndRecordLocation {
                offset: window_offset + pos as u64,
                record,
            });
        }
        if record_end < window.len() && fallback.is_none() {
            fallback = Some(EndRecordLocation {
                offset: window_offset + pos as u64,
                record,
            });
        }
    }

    fallback.ok_or(ArchiveFormatError::EocdNotFound)
}

/// Parse the ZIP64 locator preceding the end record
pub fn parse_zip64_locator(bytes: &[u8]) -> ArchiveResult<Zip64Locator> {
    parse_record(bytes, "ZIP64 end of central directory locator")
}

/// Parse the ZIP64 end of central directory record
pub fn parse_zip64_end_record(bytes: &[u8]) -> ArchiveResult<Zip64EndOfCentralDirectory> {
    if bytes.len() < ZIP64_EOCD_SIZE {
        return Err(ArchiveFormatError::InvalidHeader(format!(
            "ZIP64 end record needs {ZIP64_EOCD_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    parse_record(bytes, "ZIP64 end of central directory record")
}

/// Where the central directory lives and how many records it declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    /// Absolute offset of the first central directory header
    pub offset: u64,
    /// Size of the central directory in bytes
    pub size: u64,
    /// Declared number of records
    pub entries: u64,
}

impl DirectoryLocation {
    /// From a classic end record without ZIP64 sentinels
    pub fn from_end_record(record: &EndOfCentralDirectory) -> Self {
        Self {
            offset: u64::from(record.directory_offset),
            size: u64::from(record.directory_size),
            entries: u64::from(record.total_entries),
        }
    }

    /// From a ZIP64 end record
    pub fn from_zip64(record: &Zip64EndOfCentralDirectory) -> Self {
        Self {
            offset: record.directory_offset,
            size: record.directory_size,
            entries: record.total_entries,
        }
    }

    /// Check the directory fits inside an archive of `archive_len` bytes
    pub fn validate(&self, archive_len: u64) -> ArchiveResult<()> {
        let end = self.offset.checked_add(self.size).ok_or_else(|| {
            ArchiveFormatError::InvalidHeader("central directory bounds overflow".to_string())
        })?;
        if end > archive_len {
            return Err(ArchiveFormatError::InvalidHeader(format!(
                "central directory [{}, {}) exceeds archive length {}",
                self.offset, end, archive_len
            )));
        }
        Ok(())
    }
}

/// Parse `declared` central directory headers from `data`
///
/// Each header is self-describing, so records are read back to back until
/// the declared count is reached. Running out of bytes or hitting a foreign
/// signature first means the directory is truncated.
pub fn parse_central_directory(
    data: &[u8],
    declared: u64,
) -> ArchiveResult<Vec<CentralDirectoryEntry>> {
    let mut entries = Vec::with_capacity(declared.min(65_536) as usize);
    let mut pos = 0usize;

    while (entries.len() as u64) < declared {
        let truncated = || ArchiveFormatError::TruncatedDirectory {
            declared,
            parsed: entries.len() as u64,
        };

        if pos + CENTRAL_HEADER_SIZE > data.len()
            || data[pos..pos + 4] != CENTRAL_HEADER_SIGNATURE
        {
            return Err(truncated());
        }

        let header: CentralDirectoryHeader = parse_record(&data[pos..], "central directory header")?;
        let record_end = pos + header.record_len();
        if record_end > data.len() {
            return Err(truncated());
        }

        let name_start = pos + CENTRAL_HEADER_SIZE;
        let name_end = name_start + header.file_name_len as usize;
        let extra_end = name_end + header.extra_len as usize;

        entries.push(CentralDirectoryEntry::from_header(
            &header,
            &data[name_start..name_end],
            &data[name_end..extra_end],
        )?);
        pos = record_end;
    }

    Ok(entries)
}

/// Parse the fixed portion of a local file header
pub fn parse_local_header(bytes: &[u8]) -> ArchiveResult<LocalFileHeader> {
    if bytes.len() < LOCAL_HEADER_SIZE {
        return Err(ArchiveFormatError::InvalidHeader(format!(
            "local file header needs {LOCAL_HEADER_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    parse_record(bytes, "local file header")
}

/// Lookup table of an archive's entries
///
/// Built once from the central directory and immutable afterwards. Names are
/// unique in the lookup; when an archive lists a name twice the later record
/// wins, while [`ArchiveIndex::entries`] keeps every record in directory order.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    archive_len: u64,
    entries: Vec<CentralDirectoryEntry>,
    by_name: HashMap<String, usize>,
}

impl ArchiveIndex {
    /// Build an index, checking every entry lies within the archive
    pub fn new(archive_len: u64, entries: Vec<CentralDirectoryEntry>) -> ArchiveResult<Self> {
        let mut by_name = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let end = entry.min_end();
            if end > archive_len {
                return Err(ArchiveFormatError::EntryOutOfBounds {
                    name: entry.file_name.clone(),
                    end,
                    length: archive_len,
                });
            }
            by_name.insert(entry.file_name.clone(), i);
        }

        Ok(Self {
            archive_len,
            entries,
            by_name,
        })
    }

    /// Index a complete archive held in memory
    pub fn from_bytes(data: &[u8]) -> ArchiveResult<Self> {
        let mut lookup = DirectoryLookup::new(data.len() as u64)?;
        loop {
            let read = lookup.next_read();
            match lookup.supply(slice(data, read.offset, read.len)?)? {
                LookupStep::Read(next) => lookup = next,
                LookupStep::Indexed(index) => return Ok(index),
            }
        }
    }

    /// Look up an entry by exact, case-sensitive name
    pub fn find(&self, name: &str) -> Option<&CentralDirectoryEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Look up an entry, failing with `EntryNotFound`
    pub fn require(&self, name: &str) -> ArchiveResult<&CentralDirectoryEntry> {
        self.find(name)
            .ok_or_else(|| ArchiveFormatError::EntryNotFound(name.to_string()))
    }

    /// All entries in central directory order
    pub fn entries(&self) -> &[CentralDirectoryEntry] {
        &self.entries
    }

    /// Length of the archive this index was built from
    pub fn archive_len(&self) -> u64 {
        self.archive_len
    }

    /// Number of directory records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive lists no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Extract one entry from a complete archive held in memory
    pub fn extract_from(&self, data: &[u8], name: &str) -> ArchiveResult<ExtractedFile> {
        let entry = self.require(name)?;
        let header = parse_local_header(slice(data, entry.local_header_offset, LOCAL_HEADER_SIZE as u64)?)?;
        let payload = slice(
            data,
            header.payload_offset(entry.local_header_offset),
            entry.compressed_size,
        )?;
        Ok(ExtractedFile {
            file_name: entry.file_name.clone(),
            data: entry.decode(payload)?,
        })
    }
}

/// Byte span a [`DirectoryLookup`] needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Absolute offset of the first byte
    pub offset: u64,
    /// Number of bytes, never zero
    pub len: u64,
}

impl ReadRequest {
    /// Last byte of the span, inclusive
    pub fn last(&self) -> u64 {
        self.offset + self.len - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Tail,
    Zip64Locator { offset: u64 },
    Zip64EndRecord { offset: u64 },
    Directory(DirectoryLocation),
}

/// Outcome of feeding bytes to a [`DirectoryLookup`]
#[derive(Debug)]
pub enum LookupStep {
    /// More bytes are needed, see [`DirectoryLookup::next_read`]
    Read(DirectoryLookup),
    /// The central directory has been read
    Indexed(ArchiveIndex),
}

/// Central directory lookup driven one read at a time
///
/// The lookup never reads on its own: the caller asks for the next span,
/// fetches it however it likes (a slice of memory, a range request) and
/// hands the bytes back. The steps are the tail window, then for ZIP64
/// archives the locator and the ZIP64 end record, then the directory itself.
#[derive(Debug)]
pub struct DirectoryLookup {
    archive_len: u64,
    pending: Pending,
}

impl DirectoryLookup {
    /// Start a lookup for an archive of `archive_len` bytes
    pub fn new(archive_len: u64) -> ArchiveResult<Self> {
        if archive_len < EOCD_SIZE as u64 {
            return Err(ArchiveFormatError::EocdNotFound);
        }
        Ok(Self {
            archive_len,
            pending: Pending::Tail,
        })
    }

    /// Span to read before the next [`DirectoryLookup::supply`]
    pub fn next_read(&self) -> ReadRequest {
        let (offset, len) = match self.pending {
            Pending::Tail => {
                let len = end_window_len(self.archive_len);
                (self.archive_len - len, len)
            }
            Pending::Zip64Locator { offset } => (offset, ZIP64_LOCATOR_SIZE as u64),
            Pending::Zip64EndRecord { offset } => (offset, ZIP64_EOCD_SIZE as u64),
            Pending::Directory(location) => (location.offset, location.size),
        };
        ReadRequest { offset, len }
    }

    /// Consume the bytes of [`DirectoryLookup::next_read`]
    pub fn supply(self, bytes: &[u8]) -> ArchiveResult<LookupStep> {
        let read = self.next_read();
        if bytes.len() as u64 != read.len {
            return Err(ArchiveFormatError::InvalidHeader(format!(
                "expected {} bytes at offset {}, got {}",
                read.len,
                read.offset,
                bytes.len()
            )));
        }

        match self.pending {
            Pending::Tail => {
                let end = locate_end_record(bytes, read.offset)?;
                if !end.record.requires_zip64() {
                    return self.locate(DirectoryLocation::from_end_record(&end.record));
                }
                let offset = end.zip64_locator_offset().ok_or_else(|| {
                    ArchiveFormatError::InvalidHeader("no room for ZIP64 locator".to_string())
                })?;
                Ok(self.then(Pending::Zip64Locator { offset }))
            }
            Pending::Zip64Locator { .. } => {
                let locator = parse_zip64_locator(bytes)?;
                let record_end = locator.eocd_offset.checked_add(ZIP64_EOCD_SIZE as u64);
                if record_end.is_none_or(|end| end > self.archive_len) {
                    return Err(ArchiveFormatError::InvalidHeader(format!(
                        "ZIP64 end record at {} exceeds archive length {}",
                        locator.eocd_offset, self.archive_len
                    )));
                }
                Ok(self.then(Pending::Zip64EndRecord {
                    offset: locator.eocd_offset,
                }))
            }
            Pending::Zip64EndRecord { .. } => {
                let record = parse_zip64_end_record(bytes)?;
                self.locate(DirectoryLocation::from_zip64(&record))
            }
            Pending::Directory(location) => {
                let entries = parse_central_directory(bytes, location.entries)?;
                Ok(LookupStep::Indexed(ArchiveIndex::new(self.archive_len, entries)?))
            }
        }
    }

    fn then(self, pending: Pending) -> LookupStep {
        LookupStep::Read(Self { pending, ..self })
    }

    fn locate(self, location: DirectoryLocation) -> ArchiveResult<LookupStep> {
        location.validate(self.archive_len)?;
        if location.size == 0 {
            let entries = parse_central_directory(&[], location.entries)?;
            return Ok(LookupStep::Indexed(ArchiveIndex::new(self.archive_len, entries)?));
        }
        Ok(self.then(Pending::Directory(location)))
    }
}

fn slice(data: &[u8], offset: u64, len: u64) -> ArchiveResult<&[u8]> {
    let start = usize::try_from(offset)
        .map_err(|_| ArchiveFormatError::InvalidHeader(format!("offset {offset} out of range")))?;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            ArchiveFormatError::InvalidHeader(format!(
                "range {offset}+{len} exceeds archive length {}",
                data.len()
            ))
        })?;
    Ok(&data[start..end])
}
