use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use flate2::read::DeflateDecoder;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};
use super::{LocalFileReader, ReadAt, ZipError, ZipResult};
use crate::core::utils;

/// An opened archive: its source plus the parsed central directory.
///
/// Record names are normalized on open (`\` to `/`, no leading `/`, no `.`
/// components), and when several records end up with the same name only the
/// last one is kept. Names that cannot be normalized (e.g. with `..`) stay as
/// stored.
pub struct ZipArchive {
    name: String,
    parser: ZipParser,
    comment: String,
    records: Vec<ZipFileEntry>,
}

impl ZipArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let path = path.as_ref();
        let source = LocalFileReader::new(path)?;
        Self::from_source(path.display().to_string(), Arc::new(source))
    }

    pub fn from_file(name: impl Into<String>, file: File) -> ZipResult<Self> {
        Self::from_source(name, Arc::new(LocalFileReader::from_file(file)?))
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> ZipResult<Self> {
        Self::from_source(name, Arc::new(bytes))
    }

    pub fn from_source(name: impl Into<String>, source: Arc<dyn ReadAt>) -> ZipResult<Self> {
        let parser = ZipParser::new(source);
        let directory = parser.read_directory()?;
        Ok(Self {
            name: name.into(),
            parser,
            comment: directory.comment,
            records: normalize_records(directory.entries),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn records(&self) -> &[ZipFileEntry] {
        &self.records
    }

    /// Last record named `name`, or the directory marker `name/`.
    pub fn by_name(&self, name: &str) -> Option<&ZipFileEntry> {
        self.records
            .iter()
            .rev()
            .find(|r| r.file_name == name)
            .or_else(|| {
                let marker = format!("{}/", name.trim_end_matches('/'));
                self.records.iter().rev().find(|r| r.file_name == marker)
            })
    }

    /// Decompressing reader over the data of `record`.
    /// The CRC-32 is verified when the data is exhausted.
    pub fn open_record(&self, record: &ZipFileEntry) -> ZipResult<Box<dyn Read + Send>> {
        let start = self.parser.data_offset(record)?;
        let end = start
            .checked_add(record.compressed_size)
            .filter(|end| *end <= self.parser.reader().size())
            .ok_or_else(|| {
                ZipError::Malformed(format!("data of `{}` is out of bounds", record.file_name))
            })?;
        let raw = RangeReader {
            source: self.parser.reader().clone(),
            pos: start,
            end,
        };

        let decoded: Box<dyn Read + Send> = match record.compression_method {
            CompressionMethod::Stored => Box::new(raw),
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(raw)),
            CompressionMethod::Unknown(method) => return Err(ZipError::UnsupportedMethod(method)),
        };

        Ok(Box::new(CrcReader {
            inner: decoded,
            hasher: crc32fast::Hasher::new(),
            expected: record.crc32,
            name: record.file_name.clone(),
            verified: false,
        }))
    }
}

fn normalize_records(records: Vec<ZipFileEntry>) -> Vec<ZipFileEntry> {
    let mut seen = HashSet::new();
    let mut kept: Vec<ZipFileEntry> = records
        .into_iter()
        .rev()
        .map(|mut record| {
            if let Ok(name) = utils::normalize_name(&record.file_name) {
                record.is_directory = name.ends_with('/');
                record.file_name = name;
            }
            record
        })
        .filter(|record| seen.insert(record.file_name.clone()))
        .collect();
    kept.reverse();
    kept
}

/// Sequential reader over `[pos, end)` of a shared source.
struct RangeReader {
    source: Arc<dyn ReadAt>,
    pos: u64,
    end: u64,
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.source.read_at(self.pos, &mut buf[..len])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive truncated",
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}

struct CrcReader {
    inner: Box<dyn Read + Send>,
    hasher: crc32fast::Hasher,
    expected: u32,
    name: String,
    verified: bool,
}

impl Read for CrcReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        } else if !buf.is_empty() && !self.verified {
            self.verified = true;
            let actual = self.hasher.clone().finalize();
            if actual != self.expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC mismatch in `{}`: expected {:08x}, got {:08x}",
                        self.name, self.expected, actual
                    ),
                ));
            }
        }
        Ok(n)
    }
}
