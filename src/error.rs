//! Error types shared by every container backend.

use thiserror::Error;

use crate::zip::ZipError;

/// Errors raised by readers, writers, factories and the registry.
#[derive(Error, Debug)]
pub enum VdmError {
    /// Missing container source, scheme or entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Foreign entry, unsupported descriptor, or a target of the wrong type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Entry stream lifecycle violated.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Underlying read/write/flush/create failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The container has already been closed.
    #[error("container `{0}` is closed")]
    Closed(String),
}

impl From<ZipError> for VdmError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::RecordInProgress(_) | ZipError::NoRecord | ZipError::Finished => {
                VdmError::IllegalState(err.to_string())
            }
            ZipError::Io(e) => VdmError::Io(e),
            other => VdmError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                other.to_string(),
            )),
        }
    }
}

impl VdmError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        VdmError::NotFound(what.into())
    }

    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        VdmError::InvalidArgument(what.into())
    }

    pub(crate) fn illegal(what: impl Into<String>) -> Self {
        VdmError::IllegalState(what.into())
    }
}
