//! Error types for the range-dl library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while probing, fetching or merging a download.
#[derive(Error, Debug)]
pub enum Error {
    /// The server did not report the resource length.
    #[error("could not determine the total length of {url}")]
    SizeUnknown {
        /// URL that was probed.
        url: String,
    },

    /// The server neither advertises nor honors byte-range requests.
    #[error("server does not support range requests: {url}")]
    RangeUnsupported {
        /// URL that was probed.
        url: String,
    },

    /// The server answered with a status that retrying will not fix.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status.
        status: reqwest::StatusCode,
    },

    /// A chunk ran out of retry attempts or hit its retry deadline.
    #[error("chunk {chunk} gave up after {attempts} attempt(s): {last_error}")]
    FetchExhausted {
        /// Index of the chunk.
        chunk: usize,
        /// Number of connection attempts made.
        attempts: u32,
        /// Description of the last transient failure.
        last_error: String,
    },

    /// The server closed a chunk's stream before the range was complete.
    #[error("chunk {chunk}: server closed the stream after {received} of {expected} bytes")]
    UnderDelivered {
        /// Index of the chunk.
        chunk: usize,
        /// Bytes the range requires.
        expected: u64,
        /// Bytes actually written.
        received: u64,
    },

    /// Filesystem failure while concatenating chunk files.
    #[error("merge failed at {}: {source}", path.display())]
    Merge {
        /// File being handled when the failure occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error while preparing or writing chunk files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A spawned fetch task panicked or was aborted.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The download was cancelled by the caller.
    #[error("download cancelled")]
    Cancelled,

    /// The job inputs or configuration are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true for failures a chunk fetcher recovers from by reconnecting.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                if let Some(status) = e.status() {
                    return status_is_transient(status);
                }
                e.is_connect() || e.is_timeout() || e.is_body() || e.is_request() || e.is_decode()
            }
            Self::Status { status, .. } => status_is_transient(*status),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Name of the download phase this error aborts, for user-facing reports.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::SizeUnknown { .. } => "probe",
            Self::RangeUnsupported { .. } => "range-support",
            Self::Status { .. }
            | Self::FetchExhausted { .. }
            | Self::UnderDelivered { .. }
            | Self::Io(_)
            | Self::Http(_)
            | Self::Join(_) => "fetch",
            Self::Merge { .. } => "merge",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig(_) => "config",
        }
    }
}

fn status_is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// A specialized `Result` type for range-dl operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn status(code: u16) -> Error {
        Error::Status {
            url: "http://example.test/file".into(),
            status: StatusCode::from_u16(code).unwrap(),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(status(408).is_transient());
    }

    #[test]
    fn client_errors_are_fatal() {
        assert!(!status(404).is_transient());
        assert!(!status(403).is_transient());
    }

    #[test]
    fn reset_connections_are_transient() {
        let e = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(e.is_transient());
        let e = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!e.is_transient());
    }

    #[test]
    fn structural_errors_name_their_phase() {
        assert_eq!(
            Error::SizeUnknown { url: String::new() }.phase(),
            "probe"
        );
        assert_eq!(
            Error::RangeUnsupported { url: String::new() }.phase(),
            "range-support"
        );
        assert_eq!(
            Error::UnderDelivered {
                chunk: 0,
                expected: 10,
                received: 5
            }
            .phase(),
            "fetch"
        );
        assert_eq!(
            Error::Merge {
                path: PathBuf::from("out"),
                source: std::io::Error::other("disk full"),
            }
            .phase(),
            "merge"
        );
        assert_eq!(Error::Io(std::io::Error::other("disk full")).phase(), "fetch");
    }

    #[test]
    fn under_delivery_message_names_counts() {
        let msg = Error::UnderDelivered {
            chunk: 2,
            expected: 250,
            received: 100,
        }
        .to_string();
        assert!(msg.contains("chunk 2"));
        assert!(msg.contains("100 of 250"));
    }
}
