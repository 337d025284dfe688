//! Error types for build manifest handling

use thiserror::Error;

/// The manifest bytes are not a usable property list
#[derive(Debug, Error)]
pub enum ManifestFormatError {
    /// Not a binary or XML property list, or missing required structure
    #[error("Failed to parse build manifest: {0}")]
    ParseFailed(#[from] plist::Error),
}

/// No usable build identity for the requested board
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No identity's device class matches the board
    #[error("No build identity for board {board}")]
    BoardNotFound {
        /// Requested board identifier
        board: String,
    },

    /// Several identities match with differing component paths
    #[error("Board {board} matches {count} build identities with differing components")]
    AmbiguousBoard {
        /// Requested board identifier
        board: String,
        /// Number of matching identities
        count: usize,
    },

    /// A matching identity lacks its Manifest dictionary or a component path
    #[error("Unable to get data from BuildManifest for board {board}: {detail}")]
    IncompleteIdentity {
        /// Device class of the identity
        board: String,
        /// What is missing
        detail: String,
    },
}

/// Either stage of turning manifest bytes into a build identity
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Parsing failed
    #[error(transparent)]
    Format(#[from] ManifestFormatError),

    /// Resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl ManifestError {
    /// Whether the manifest itself could not be read, as opposed to lacking the board
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}
