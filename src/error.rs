//! Error taxonomy for the client engine.
//!
//! Every failure a caller can observe is an [`Error`] carrying one of a
//! small, fixed set of [`ErrorKind`]s plus the underlying cause. Errors are
//! only ever delivered through the asynchronous result handle of the request
//! that failed, never raised synchronously at submission time.

use std::fmt;
use std::io;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The classified kind of a request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The destination could not be resolved or connected to.
    HostUnreachable,

    /// The remote end closed or reset an established connection
    /// mid-exchange.
    ConnectionAborted,

    /// The request timer or a body-read timer expired before the operation
    /// completed.
    TimedOut,

    /// Bytes were received but could not be parsed as an HTTP message.
    MalformedResponse,

    /// The base address or request target is not a usable URI. Produced by
    /// request validation, never by the transport classifier.
    InvalidUri,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::HostUnreachable => "host unreachable",
            ErrorKind::ConnectionAborted => "connection aborted",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::InvalidUri => "invalid uri",
        })
    }
}

impl ErrorKind {
    /// Classify a failure to establish a connection.
    ///
    /// At this stage nothing has been sent, so refusals, unreachable
    /// networks and resolver failures all collapse into
    /// [`ErrorKind::HostUnreachable`]; platform-specific codes map to the
    /// closest kind rather than being left unclassified.
    pub fn from_connect(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            _ => ErrorKind::HostUnreachable,
        }
    }

    /// Classify a failure on an established connection.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            io::ErrorKind::InvalidData => ErrorKind::MalformedResponse,
            _ => ErrorKind::ConnectionAborted,
        }
    }

    /// Classify an error reported by the HTTP codec.
    pub fn from_hyper(error: &hyper::Error) -> Self {
        if error.is_parse() || error.is_parse_status() || error.is_parse_too_large() {
            ErrorKind::MalformedResponse
        } else if error.is_timeout() {
            ErrorKind::TimedOut
        } else if let Some(io) = io_source(error) {
            ErrorKind::from_io(io)
        } else {
            // incomplete messages, mid-stream closes and canceled sends all
            // boil down to the peer abandoning the exchange
            ErrorKind::ConnectionAborted
        }
    }
}

/// Walk an error's source chain looking for the underlying [`io::Error`].
fn io_source<'a>(error: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            return Some(io);
        }
        source = cause.source();
    }
    None
}

/// A terminal request failure: a classified [`ErrorKind`] and the underlying
/// cause, immutable once constructed.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    pub(crate) fn message(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            source: Some(message.into()),
        }
    }

    pub(crate) fn timed_out() -> Self {
        Self {
            kind: ErrorKind::TimedOut,
            source: None,
        }
    }

    pub(crate) fn from_hyper(error: hyper::Error) -> Self {
        Self {
            kind: ErrorKind::from_hyper(&error),
            source: Some(error.into()),
        }
    }

    /// The classified kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_stage_classification() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, ErrorKind::HostUnreachable),
            (io::ErrorKind::AddrNotAvailable, ErrorKind::HostUnreachable),
            (io::ErrorKind::NotFound, ErrorKind::HostUnreachable),
            (io::ErrorKind::TimedOut, ErrorKind::TimedOut),
            // ambiguous platform codes fall to the closest kind
            (io::ErrorKind::Other, ErrorKind::HostUnreachable),
        ];
        for (io_kind, expected) in cases {
            let error = io::Error::new(io_kind, "boom");
            assert_eq!(ErrorKind::from_connect(&error), expected, "{io_kind:?}");
        }
    }

    #[test]
    fn established_stage_classification() {
        let cases = [
            (io::ErrorKind::ConnectionReset, ErrorKind::ConnectionAborted),
            (io::ErrorKind::ConnectionAborted, ErrorKind::ConnectionAborted),
            (io::ErrorKind::BrokenPipe, ErrorKind::ConnectionAborted),
            (io::ErrorKind::UnexpectedEof, ErrorKind::ConnectionAborted),
            (io::ErrorKind::TimedOut, ErrorKind::TimedOut),
            (io::ErrorKind::InvalidData, ErrorKind::MalformedResponse),
            (io::ErrorKind::Other, ErrorKind::ConnectionAborted),
        ];
        for (io_kind, expected) in cases {
            let error = io::Error::new(io_kind, "boom");
            assert_eq!(ErrorKind::from_io(&error), expected, "{io_kind:?}");
        }
    }

    #[test]
    fn io_source_is_found_through_wrapping() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] io::Error);

        let outer = Outer(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let found = io_source(&outer).expect("io source should be found");
        assert_eq!(found.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn error_display_carries_kind() {
        let error = Error::message(ErrorKind::HostUnreachable, "nope");
        assert_eq!(error.to_string(), "host unreachable");
        assert_eq!(error.kind(), ErrorKind::HostUnreachable);
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn timed_out_has_no_cause() {
        let error = Error::timed_out();
        assert_eq!(error.kind(), ErrorKind::TimedOut);
        assert!(std::error::Error::source(&error).is_none());
    }
}
