//! # Store Errors
//!
//! Every fallible operation returns `eyre::Result`. Outcomes that callers are
//! expected to handle during normal operation (a missing document, an
//! oversized payload, a document already locked) travel inside the report as
//! a [`StoreError`] so they can be told apart from filesystem failures:
//!
//! ```ignore
//! match error_kind(&err) {
//!     ErrorKind::NotFound => { /* absent or deleted */ }
//!     ErrorKind::Locked => { /* retry later */ }
//!     _ => return Err(err),
//! }
//! ```
//!
//! A corrupted header met during a scan is resynchronized locally and never
//! reaches the caller. Met during addressed access it is reported as
//! `NotFound`, so callers cannot distinguish "never existed" from "corrupted".

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(u64),
    TooLarge { max: u64, given: u64 },
    Locked(u64),
    CorruptHeader(u64),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "document {} does not exist", id),
            StoreError::TooLarge { max, given } => {
                write!(f, "document is too large: max room {}, given {}", max, given)
            }
            StoreError::Locked(id) => {
                write!(f, "document {} is locked for update, try again later", id)
            }
            StoreError::CorruptHeader(offset) => {
                write!(f, "corrupted record header at offset {}", offset)
            }
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    TooLarge,
    Locked,
    CorruptHeader,
    Io,
}

/// Classifies a report. Anything not carrying a [`StoreError`] is an I/O or
/// mapping failure.
pub fn error_kind(err: &eyre::Report) -> ErrorKind {
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound(_)) => ErrorKind::NotFound,
        Some(StoreError::TooLarge { .. }) => ErrorKind::TooLarge,
        Some(StoreError::Locked(_)) => ErrorKind::Locked,
        Some(StoreError::CorruptHeader(_)) => ErrorKind::CorruptHeader,
        None => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn classifies_store_errors() {
        let err = eyre::Report::new(StoreError::Locked(7));
        assert_eq!(error_kind(&err), ErrorKind::Locked);
        assert_eq!(err.to_string(), "document 7 is locked for update, try again later");
    }

    #[test]
    fn wrapped_store_error_keeps_its_kind() {
        let result: eyre::Result<()> = Err(StoreError::NotFound(3).into());
        let err = result.wrap_err("reading document").unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::NotFound);
    }

    #[test]
    fn io_failures_classify_as_io() {
        let err = eyre::Report::new(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(error_kind(&err), ErrorKind::Io);
    }
}
