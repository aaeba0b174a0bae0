//! Error type for the connection driver.
//!
//! Mirrors the error shape used elsewhere in this codec stack: a small `Kind`
//! enum distinguishes the failure category, paired with an optional boxed
//! cause reachable through [`std::error::Error::source`]. Context can be
//! attached at propagation sites via [`rama_error::ErrorContext`] without
//! forcing every call site to know the concrete cause type.

use std::fmt;

use rama_error::BoxError;

use crate::close::StatusCode;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, DriverError>;

/// An error raised by the connection driver or one of its collaborators.
pub struct DriverError {
    kind: Kind,
    cause: Option<BoxError>,
}

#[derive(Debug)]
enum Kind {
    /// Malformed framing, reserved bits, invalid UTF-8, invalid CLOSE payload.
    Protocol,
    /// The codec raised a close exception requesting a specific status.
    Close(StatusCode),
    /// `fill`/`flush` failed, or the transport reached unexpected EOF.
    Io,
    /// The idle timeout elapsed.
    Timeout,
    /// A caller-supplied argument violated a documented precondition.
    InvalidArgument,
    /// The executor refused to spawn a task.
    RejectedTask,
    /// The flusher or state machine is already in a terminal state.
    Closed,
}

impl DriverError {
    fn new(kind: Kind) -> Self {
        Self { kind, cause: None }
    }

    fn with_cause(kind: Kind, cause: impl Into<BoxError>) -> Self {
        Self {
            kind,
            cause: Some(cause.into()),
        }
    }

    pub fn protocol(cause: impl Into<BoxError>) -> Self {
        Self::with_cause(Kind::Protocol, cause)
    }

    pub fn close_requested(status: StatusCode, cause: impl Into<BoxError>) -> Self {
        Self::with_cause(Kind::Close(status), cause)
    }

    pub fn io(cause: impl Into<BoxError>) -> Self {
        Self::with_cause(Kind::Io, cause)
    }

    pub fn timeout() -> Self {
        Self::new(Kind::Timeout)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_cause(Kind::InvalidArgument, message.into())
    }

    pub fn rejected_task(cause: impl Into<BoxError>) -> Self {
        Self::with_cause(Kind::RejectedTask, cause)
    }

    pub fn closed() -> Self {
        Self::new(Kind::Closed)
    }

    /// True for errors that should drive the IO state machine to an
    /// abnormal close rather than a negotiated one.
    #[must_use]
    pub fn is_abnormal(&self) -> bool {
        matches!(self.kind, Kind::Io | Kind::RejectedTask)
    }

    /// The status code a close initiated by this error should carry.
    #[must_use]
    pub fn close_status(&self) -> StatusCode {
        match self.kind {
            Kind::Protocol => StatusCode::PROTOCOL,
            Kind::Close(status) => status,
            Kind::Io => StatusCode::ABNORMAL,
            Kind::Timeout => StatusCode::SHUTDOWN,
            Kind::InvalidArgument | Kind::RejectedTask | Kind::Closed => StatusCode::ABNORMAL,
        }
    }
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("DriverError");
        builder.field("kind", &self.kind);
        if let Some(cause) = &self.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Protocol => write!(f, "protocol error"),
            Kind::Close(status) => write!(f, "close requested (status {status})"),
            Kind::Io => write!(f, "transport I/O error"),
            Kind::Timeout => write!(f, "idle timeout"),
            Kind::InvalidArgument => write!(f, "invalid argument"),
            Kind::RejectedTask => write!(f, "executor rejected task"),
            Kind::Closed => write!(f, "connection already closed"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err)
    }
}
