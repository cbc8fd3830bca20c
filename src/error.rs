//! The error type returned by every reactor operation.

use std::io;

/// Name of the operation that failed, used to build [`Error::Submit`] and
/// [`Error::Completion`] without allocating in the common case.
pub type OpName = &'static str;

/// Errors produced by [`crate::reactor::Reactor`] operations.
///
/// Partial success — a short read, a short write, or a recv returning zero
/// bytes because the peer closed — is never represented here; those are
/// ordinary return values of the corresponding [`crate::task::Task`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend rejected the submission synchronously (before the
    /// operation was ever handed to the kernel). The awaiting task never
    /// suspended.
    #[error("submitting {op} failed")]
    Submit {
        op: OpName,
        #[source]
        source: io::Error,
    },

    /// The kernel reported a failed completion for an in-flight operation.
    #[error("{op} failed")]
    Completion {
        op: OpName,
        #[source]
        source: io::Error,
    },

    /// A caller-supplied argument violates a precondition (e.g. `recv` with
    /// `size == 0`). Rejected locally, before any submission is attempted.
    #[error("invalid argument to {op}: {reason}")]
    InvalidArgument { op: OpName, reason: &'static str },

    /// The reactor has already been stopped; new submissions fail fast.
    #[error("reactor is stopped")]
    Stopped,

    /// The operation was aborted because the reactor was stopped while it
    /// was still in flight.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// The raw OS error code carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Submit { source, .. } | Error::Completion { source, .. } => {
                source.raw_os_error()
            }
            Error::InvalidArgument { .. } | Error::Stopped | Error::Canceled => None,
        }
    }
}
