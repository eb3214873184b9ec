//! Typed error taxonomy for the core (spec §7). Transient I/O (EAGAIN,
//! partial writes) never reaches this type — callers rearm interest and
//! keep going. Everything here is either connection-fatal, protocol-fatal,
//! or loop-fatal.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("deadline expired")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("sequence id mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("capacity exceeded")]
    CapacityExceeded,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Typed failure surfaced from [`crate::client::Client::call`] (spec §4.6
/// step 6). A focused subset of [`ServiceError`] — callers of an outbound
/// RPC don't need to distinguish handler panics from capacity errors, only
/// why *their* call didn't get a reply.
pub mod client {
    use std::io;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum CallError {
        #[error("outbound call timed out")]
        Timeout,

        #[error("peer connection closed")]
        Closed,

        #[error("reply sequence id {actual} did not match request {expected}")]
        SequenceMismatch { expected: u32, actual: u32 },

        #[error("io error: {0}")]
        Io(#[from] io::Error),
    }

    impl From<super::ServiceError> for CallError {
        fn from(err: super::ServiceError) -> CallError {
            match err {
                super::ServiceError::Timeout => CallError::Timeout,
                super::ServiceError::ConnectionClosed => CallError::Closed,
                super::ServiceError::SequenceMismatch { expected, actual } => {
                    CallError::SequenceMismatch { expected, actual }
                }
                super::ServiceError::Io(e) => CallError::Io(e),
                other => CallError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
            }
        }
    }
}
