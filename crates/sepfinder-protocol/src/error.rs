//! Error types for network operations

use reqwest::StatusCode;
use sepfinder_formats::ArchiveFormatError;
use thiserror::Error;

/// Failure to move bytes over HTTP
///
/// Every variant describes the request, not the data, so repeating the same
/// request may succeed. [`TransportError::should_retry`] narrows that down.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS or body read failure
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with an unexpected status
    #[error("HTTP status {status} for {url}")]
    Status {
        /// Status code received
        status: StatusCode,
        /// Requested URL
        url: String,
    },

    /// Server ignored the range header and sent a different span
    #[error("Range not honored for {url}")]
    RangeNotSupported {
        /// Requested URL
        url: String,
    },

    /// Fewer bytes arrived than the range covers
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Length of the requested span
        expected: u64,
        /// Bytes received
        actual: u64,
    },

    /// Content-Range header missing or malformed
    #[error("Invalid Content-Range header: {0}")]
    InvalidContentRange(String),

    /// Neither HEAD nor a probe range revealed the resource length
    #[error("Resource length unavailable for {0}")]
    MissingLength(String),

    /// The per-request deadline elapsed
    #[error("Request timed out")]
    Timeout,

    /// URL could not be parsed or manipulated
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Caller asked for an empty or inverted span
    #[error("Invalid range {start}-{end}")]
    InvalidRange {
        /// First byte
        start: u64,
        /// Last byte (inclusive)
        end: u64,
    },
}

impl TransportError {
    /// Check if error is retryable
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Timeout | Self::ShortRead { .. } => true,
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::Status { status, .. } => matches!(
                *status,
                StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            _ => false,
        }
    }

    /// HTTP status, if the server answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }
}

/// Transport result type
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failure while indexing or extracting from a remote archive
#[derive(Debug, Error)]
pub enum RemoteArchiveError {
    /// Bytes could not be fetched
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Fetched bytes are not a usable ZIP archive
    #[error(transparent)]
    Format(#[from] ArchiveFormatError),
}

impl RemoteArchiveError {
    /// Whether the archive content itself is at fault
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

/// Failure talking to the device catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog service unreachable or answered with an error
    #[error("Catalog unavailable: {0}")]
    Transport(#[from] TransportError),

    /// Response body was not the expected JSON
    #[error("Malformed catalog response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No device with this identifier
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

/// Failure obtaining a firmware's build manifest
#[derive(Debug, Error)]
pub enum ManifestSourceError {
    /// Firmware URL is not usable
    #[error("Invalid firmware URL: {0}")]
    InvalidUrl(String),

    /// Both the sibling fetch and archive extraction failed
    #[error("Manifest extraction failed: {0}")]
    Archive(#[from] RemoteArchiveError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(TransportError::Timeout.should_retry());
        assert!(
            TransportError::ShortRead {
                expected: 10,
                actual: 4
            }
            .should_retry()
        );
        assert!(
            TransportError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                url: "https://updates.cdn-apple.com/a.ipsw".to_string(),
            }
            .should_retry()
        );
        assert!(
            !TransportError::Status {
                status: StatusCode::NOT_FOUND,
                url: "https://updates.cdn-apple.com/a.ipsw".to_string(),
            }
            .should_retry()
        );
        assert!(!TransportError::InvalidContentRange("bytes */*".to_string()).should_retry());
        assert!(!TransportError::MissingLength("x".to_string()).should_retry());
    }

    #[test]
    fn test_status_accessor() {
        let err = TransportError::Status {
            status: StatusCode::NOT_FOUND,
            url: String::new(),
        };
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(TransportError::Timeout.status(), None);
    }
}
