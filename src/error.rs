//! Error kinds shared by the server workers and the client driver.
//!
//! Per-connection failures end only the affected worker on the server.
//! On the client every variant except a skipped command is fatal.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by the connection protocol engine
#[derive(Debug)]
pub enum Error {
    /// Transport connection to the server could not be established
    ConnectFailed { addr: String, source: io::Error },
    /// Request line is missing its path or names an unknown method
    MalformedRequest(String),
    /// File could not be opened
    FileNotFound { path: PathBuf, source: io::Error },
    /// File could not persist all received bytes
    FileWriteError { path: PathBuf, source: io::Error },
    /// No request arrived before the idle deadline
    Timeout(Duration),
    /// Peer closed or reset the connection
    ConnectionReset,
    /// Upload still rejected after the configured number of attempts
    UploadFailed { path: String, attempts: u32 },
    /// Peer violated the framing contract
    Protocol(String),
    /// Any other I/O failure
    Io(io::Error),
}

impl Error {
    /// Classify a socket error, folding disconnect kinds into `ConnectionReset`.
    pub fn from_socket(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Error::ConnectionReset,
            _ => Error::Io(e),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ConnectFailed { addr, source } => {
                write!(f, "Failed to connect to {}: {}", addr, source)
            }
            Error::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            Error::FileNotFound { path, source } => {
                write!(f, "Cannot open '{}': {}", path.display(), source)
            }
            Error::FileWriteError { path, source } => {
                write!(f, "Failed to write '{}': {}", path.display(), source)
            }
            Error::Timeout(after) => write!(f, "Idle timeout after {:?}", after),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::UploadFailed { path, attempts } => {
                write!(f, "Upload of '{}' failed after {} attempts", path, attempts)
            }
            Error::Protocol(msg) => write!(f, "Protocol violation: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConnectFailed { source, .. }
            | Error::FileNotFound { source, .. }
            | Error::FileWriteError { source, .. } => Some(source),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_errors_become_reset() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = Error::from_socket(io::Error::new(kind, "gone"));
            assert!(matches!(err, Error::ConnectionReset));
        }

        let err = Error::from_socket(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_display() {
        let err = Error::UploadFailed {
            path: "report.txt".to_string(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "Upload of 'report.txt' failed after 3 attempts");
    }
}
