//! FastDFS Error Definitions
//!
//! Errors fall into configuration, lifecycle, network, server status and
//! malformed-response categories. Only the operation layer decides whether an
//! error is worth another attempt.

use std::io;
use thiserror::Error;

/// Result type alias for FastDFS operations
pub type Result<T> = std::result::Result<T, FdfsError>;

/// Base error type for all FastDFS client errors
#[derive(Error, Debug)]
pub enum FdfsError {
    /// Client or pool has been closed
    #[error("Client is closed")]
    ClientClosed,

    /// Requested file does not exist (status 2)
    #[error("File not found")]
    FileNotFound,

    /// File already exists (status 6)
    #[error("File already exists")]
    FileAlreadyExists,

    /// Insufficient storage space (status 28)
    #[error("Insufficient storage space")]
    InsufficientSpace,

    /// Tracker answered without naming a storage server
    #[error("No storage server available")]
    NoStorageServer,

    /// File ID format is invalid
    #[error("Invalid file ID: {0}")]
    InvalidFileId(String),

    /// Server response is malformed or truncated
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    /// Invalid argument, either local validation or status 22
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unrecognized non-zero status code
    #[error("Protocol error (code {code})")]
    Protocol {
        /// Raw status byte from the response header
        code: u8,
    },

    /// Connect, read or write failure, timeouts included
    #[error("Network error during {operation} to {addr}: {source}")]
    Network {
        /// "connect", "read" or "write"
        operation: &'static str,
        /// Server the operation targeted
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Local file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FdfsError {
    pub(crate) fn network(operation: &'static str, addr: impl Into<String>, source: io::Error) -> Self {
        FdfsError::Network {
            operation,
            addr: addr.into(),
            source,
        }
    }

    pub(crate) fn timeout(operation: &'static str, addr: impl Into<String>) -> Self {
        Self::network(
            operation,
            addr,
            io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", operation)),
        )
    }

    /// Returns true for connect/read/write failures
    pub fn is_network(&self) -> bool {
        matches!(self, FdfsError::Network { .. })
    }

    /// Returns true when a network operation ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, FdfsError::Network { source, .. } if source.kind() == io::ErrorKind::TimedOut)
    }
}

/// Maps FastDFS protocol status codes to errors
///
/// Status code 0 indicates success (no error).
/// Other status codes are mapped to predefined errors or a Protocol error.
///
/// Common status codes:
///   - 0: Success
///   - 2: File not found (ENOENT)
///   - 6: File already exists (EEXIST)
///   - 22: Invalid argument (EINVAL)
///   - 28: Insufficient space (ENOSPC)
pub fn map_status_to_error(status: u8) -> Option<FdfsError> {
    match status {
        0 => None,
        2 => Some(FdfsError::FileNotFound),
        6 => Some(FdfsError::FileAlreadyExists),
        22 => Some(FdfsError::InvalidArgument("rejected by server".to_string())),
        28 => Some(FdfsError::InsufficientSpace),
        code => Some(FdfsError::Protocol { code }),
    }
}
