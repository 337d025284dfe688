//! ZIP archive structures
//!
//! The read path is split so that no step needs more than the bytes it parses.
//! [`DirectoryLookup`] walks steps 1 to 3 for both in-memory and remote
//! readers:
//!
//! 1. [`end_window_len`] bytes from the tail go to [`locate_end_record`]
//! 2. If the end record carries ZIP64 sentinels, the 20-byte locator just
//!    before it points at the 56-byte ZIP64 end record
//! 3. [`DirectoryLocation`] names the central directory span, which
//!    [`parse_central_directory`] turns into entries for an [`ArchiveIndex`]
//! 4. Per entry, the 30-byte local header gives the payload offset and
//!    [`CentralDirectoryEntry::decode`] turns the payload into file bytes
//!
//! Only stored (0) and DEFLATE (8) entries are decoded. Encryption and
//! multi-disk archives are not supported.

pub mod builder;
pub mod directory;
pub mod entry;
pub mod error;
pub mod records;

pub use builder::ZipBuilder;
pub use directory::{
    ArchiveIndex, DirectoryLocation, DirectoryLookup, EndRecordLocation, LookupStep, ReadRequest,
    end_window_len, locate_end_record, parse_central_directory, parse_local_header,
    parse_zip64_end_record, parse_zip64_locator,
};
pub use entry::{CentralDirectoryEntry, CompressionMethod, ExtractedFile};
pub use error::{ArchiveFormatError, ArchiveResult};
pub use records::{
    EOCD_SIZE, LOCAL_HEADER_SIZE, MAX_COMMENT_LEN, ZIP64_EOCD_SIZE, ZIP64_LOCATOR_SIZE,
};
