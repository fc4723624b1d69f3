// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Structured, status-coded errors shared by every layer of the remuxer.
//!
//! Every fatal condition named in the spec (environment, parse, rate-probe,
//! I/O, child-process) is represented as an [`Error`] carrying an
//! [`ErrorKind`]. The kinds mirror gRPC's status codes, same as
//! moonfire-nvr's `base::ErrorKind`, since that taxonomy already covers
//! everything this crate needs (not-found, data-loss, failed-precondition,
//! unavailable, ...) without inventing a bespoke one.

pub use coded::{bail, err, msg, source};

/// Status code attached to every [`Error`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, coded::Code)]
#[non_exhaustive]
pub enum ErrorKind {
    #[code(display = "cancelled")]
    Cancelled,
    #[code(display = "unknown")]
    Unknown,
    #[code(display = "invalid argument")]
    InvalidArgument,
    #[code(display = "deadline exceeded")]
    DeadlineExceeded,
    #[code(display = "not found")]
    NotFound,
    #[code(display = "already exists")]
    AlreadyExists,
    #[code(display = "permission denied")]
    PermissionDenied,
    #[code(display = "resource exhausted")]
    ResourceExhausted,
    #[code(display = "failed precondition")]
    FailedPrecondition,
    #[code(display = "aborted")]
    Aborted,
    #[code(display = "out of range")]
    OutOfRange,
    #[code(display = "unimplemented")]
    Unimplemented,
    #[code(display = "internal")]
    Internal,
    #[code(display = "unavailable")]
    Unavailable,
    #[code(display = "data loss")]
    DataLoss,
}

pub type Error = coded::Error<ErrorKind>;

/// Extension methods for attaching a kind to a foreign error.
pub trait ResultExt<T> {
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| err!(k, source(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bail_attaches_kind() {
        let e = (|| -> Result<(), Error> {
            bail!(NotFound, msg("no such track {}", 42));
        })()
        .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn err_kind_wraps_foreign_error() {
        let r: Result<(), std::num::ParseIntError> = "x".parse::<i32>().map(|_| ());
        let e = r.err_kind(ErrorKind::InvalidArgument).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
    }
}
