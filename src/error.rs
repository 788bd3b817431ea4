//! Typed error hierarchy for prodl
//!
//! Each variant maps to one failure class in the engine: bad input,
//! a remote server refusing the metadata fetch, a stage fault inside a
//! running transfer, or a failed reconstruction pass.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The pipeline stage a transfer fault originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Reading the response body from the network.
    Network,
    /// Appending received bytes to the local temp file.
    Disk,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "download stream"),
            Self::Disk => write!(f, "local write"),
        }
    }
}

/// Main error type for the download engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// URL is empty or not http(s). Fatal, surfaced before any request.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The metadata fetch did not return a success status, or could not
    /// be sent at all. Carries the server's reason phrase when there is one.
    #[error("remote error: {reason}")]
    Remote {
        /// HTTP status code, if a response was received.
        status: Option<u16>,
        reason: String,
    },

    /// A network or disk fault aborted one segment's pipeline. The temp
    /// file keeps whatever prefix was written, so the segment can resume.
    #[error("{stage} error in segment {segment}: {message}")]
    Transfer {
        stage: TransferStage,
        segment: usize,
        message: String,
    },

    /// A temp file was missing or short at merge time.
    #[error("reconstruction failed at {path:?}: {message}")]
    Reconstruction { path: PathBuf, message: String },

    /// Invalid input from the caller.
    #[error("invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// The session's cancellation signal was observed before completion.
    #[error("download cancelled")]
    Cancelled,

    /// Internal error (bug)
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a transfer error tagged with its originating stage
    pub fn transfer(stage: TransferStage, segment: usize, message: impl Into<String>) -> Self {
        Self::Transfer {
            stage,
            segment,
            message: message.into(),
        }
    }

    /// Create a reconstruction error
    pub fn reconstruction(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Reconstruction {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// Create a remote error from a response status
    pub fn remote_status(status: u16, reason: impl Into<String>) -> Self {
        Self::Remote {
            status: Some(status),
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_name_their_stage() {
        let net = EngineError::transfer(TransferStage::Network, 3, "connection reset");
        assert_eq!(
            net.to_string(),
            "download stream error in segment 3: connection reset"
        );

        let disk = EngineError::transfer(TransferStage::Disk, 1, "no space left");
        assert_eq!(
            disk.to_string(),
            "local write error in segment 1: no space left"
        );
    }
}
