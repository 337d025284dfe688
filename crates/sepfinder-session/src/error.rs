//! Error types for selection sessions

use sepfinder_formats::ArchiveFormatError;
use thiserror::Error;

use crate::reply::messages;

/// An operation was attempted in a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} is not valid while {state}")]
pub struct SessionStateError {
    /// What was attempted
    pub operation: &'static str,
    /// State the session was in
    pub state: &'static str,
}

/// Failure assembling the output bundle
#[derive(Debug, Error)]
pub enum BundleError {
    /// Firmware URL is not usable
    #[error("Invalid firmware URL: {0}")]
    InvalidUrl(String),

    /// The bundle archive could not be written
    #[error("Bundle archive error: {0}")]
    Archive(#[from] ArchiveFormatError),
}

/// Errors surfaced by the dispatcher
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation outside its valid state
    #[error(transparent)]
    State(#[from] SessionStateError),

    /// Bundle could not be produced
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// The session was restarted while the operation ran
    #[error("Session restarted, result discarded")]
    Cancelled,
}

impl SessionError {
    /// Text shown to the user for this error
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::State(_) => messages::INVALID_STATE,
            Self::Bundle(_) => messages::TRY_AGAIN_LATER,
            Self::Cancelled => messages::START_OVER,
        }
    }
}

/// Session result type
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = SessionError::from(SessionStateError {
            operation: "download",
            state: "idle",
        });
        assert_eq!(err.to_string(), "download is not valid while idle");
        assert_eq!(err.user_message(), messages::INVALID_STATE);
        assert_eq!(SessionError::Cancelled.user_message(), messages::START_OVER);
    }
}
