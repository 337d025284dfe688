//! File format parsers and builders for partial firmware extraction
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::doc_markdown)] // Many ZIP-specific terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! This crate provides the pure, I/O-free half of the firmware extraction
//! pipeline. Everything here operates on byte slices that a transport layer
//! has already fetched.
//!
//! # Supported Formats
//!
//! - **ZIP / ZIP64 directory records**: End-of-central-directory record, ZIP64
//!   locator and end record, central directory headers, local file headers
//!   and the ZIP64 extended-information extra field
//! - **Entry payloads**: Stored and raw-DEFLATE entries with CRC-32 verification
//! - **ZIP building**: A small writer used for output bundles and synthetic archives
//! - **Build manifests**: Binary or XML property lists describing per-board
//!   build identities and their firmware component paths
//!
//! # Design Principles
//!
//! - **Targeted reads**: Parsing functions tell the caller exactly which byte
//!   span to fetch next, so a remote archive is never downloaded in full
//! - **Type Safety**: Optional components are `Option`, not missing keys
//! - **Symmetric records**: Every fixed-size ZIP record can be read and written

#![warn(missing_docs)]

/// Build manifest parsing and board resolution
///
/// Build manifests are property lists shipped next to (and inside) firmware
/// archives. They list one build identity per board configuration, and each
/// identity maps component names to archive-relative paths.
///
/// See the [`manifest`] module for resolution rules.
pub mod manifest;
/// ZIP archive directory parsing, entry decoding and building
///
/// Key features:
/// - **Backward EOCD scan**: Locates the end record behind comments of any length
/// - **ZIP64 Support**: 64-bit sizes, offsets and entry counts
/// - **Lookup by name**: Exact, case-sensitive entry lookup
/// - **Checksums**: CRC-32 verification of decoded entries
///
/// See the [`zip`] module for the read sequence used against remote archives.
pub mod zip;

pub use manifest::{
    BASEBAND_COMPONENT, BUILD_MANIFEST_FILE, BuildIdentity, BuildManifest, ManifestError,
    ManifestFormatError, ResolveError, SEP_COMPONENT,
};
pub use zip::{
    ArchiveFormatError, ArchiveIndex, ArchiveResult, CentralDirectoryEntry, CompressionMethod,
    DirectoryLookup, ExtractedFile, LookupStep, ReadRequest, ZipBuilder,
};
