//! ZIP archive codec.
//!
//! - [`structures`]: on-disk records (EOCD, central and local headers) and their encoding
//! - [`source`]: random access sources ([`ReadAt`])
//! - [`parser`]: reads the central directory from any [`ReadAt`] source
//! - [`archive`]: an opened archive and per-record decompressing readers
//! - [`writer`]: sequential record writer
//!
//! Archives are read from the end: EOCD first, then the central directory.
//! Records are written one after another with a trailing data descriptor, so
//! the output only needs to implement [`std::io::Write`].
//!
//! Supported: STORED and DEFLATE methods, ZIP64 on read.
//! Not supported: encryption, multi-disk archives, ZIP64 on write.

mod archive;
mod parser;
mod source;
mod structures;
mod writer;

use thiserror::Error;

pub use archive::ZipArchive;
pub use parser::{CentralDirectory, ZipParser};
pub use source::{LocalFileReader, ReadAt};
pub use structures::*;
pub use writer::{MAX_RECORDS, RecordOptions, ZipStreamWriter};

pub type ZipResult<T> = std::result::Result<T, ZipError>;

#[derive(Error, Debug)]
pub enum ZipError {
    #[error("record `{0}` is still being written")]
    RecordInProgress(String),

    #[error("no record is being written")]
    NoRecord,

    #[error("archive is already finished")]
    Finished,

    #[error("not a valid ZIP archive: {0}")]
    Malformed(String),

    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    #[error("{0} exceeds the limits of a non-ZIP64 archive")]
    TooLarge(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ZipError> for std::io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => e,
            ZipError::Malformed(_) | ZipError::UnsupportedMethod(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests;
