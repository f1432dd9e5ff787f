use std::collections::HashMap;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::DeflateEncoder;

use super::structures::*;
use super::{ZipError, ZipResult};

/// Most records a non-ZIP64 archive can list. `0xFFFF` itself marks a ZIP64 EOCD.
pub const MAX_RECORDS: usize = 0xFFFE;

/// Per-record settings.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub method: CompressionMethod,
    pub level: u32,
    pub comment: Option<String>,
    pub modified: DateTime<Utc>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Deflate,
            level: 6,
            comment: None,
            modified: Utc::now(),
        }
    }
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct OpenRecord {
    header: ZipFileEntry,
    hasher: crc32fast::Hasher,
    encoder: Option<DeflateEncoder<Vec<u8>>>,
}

/// Writes records strictly one after another.
///
/// A record is started with [`start_record`](Self::start_record), fed with
/// [`write_data`](Self::write_data) and completed with
/// [`finish_record`](Self::finish_record). Starting a record while another is
/// open fails with [`ZipError::RecordInProgress`]. A later record with the
/// same name replaces the earlier one in the central directory.
///
/// Limits of the non-ZIP64 format (name and comment length, record count,
/// header offset) are checked by `start_record`, before anything is written,
/// so a rejected record leaves the archive intact.
pub struct ZipStreamWriter<W: Write> {
    out: CountingWriter<W>,
    records: Vec<ZipFileEntry>,
    index: HashMap<String, usize>,
    current: Option<OpenRecord>,
    comment: String,
    finished: bool,
}

impl<W: Write> ZipStreamWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: CountingWriter { inner: out, count: 0 },
            records: Vec::new(),
            index: HashMap::new(),
            current: None,
            comment: String::new(),
            finished: false,
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Completed records, in central directory order.
    pub fn records(&self) -> &[ZipFileEntry] {
        &self.records
    }

    pub fn is_record_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn start_record(&mut self, name: &str, options: RecordOptions) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::Finished);
        }
        if let Some(open) = &self.current {
            return Err(ZipError::RecordInProgress(open.header.file_name.clone()));
        }

        self.check_limits(name, &options)?;

        let is_directory = name.ends_with('/');
        let method = if is_directory {
            CompressionMethod::Stored
        } else {
            options.method
        };
        let encoder = match method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(DeflateEncoder::new(
                Vec::new(),
                Compression::new(options.level.min(9)),
            )),
            CompressionMethod::Unknown(m) => return Err(ZipError::UnsupportedMethod(m)),
        };

        let (time, date) = dos_datetime(&options.modified);
        let lfh_offset = self.out.count;
        write_local_header(&mut self.out, name, method, (time, date))?;

        self.current = Some(OpenRecord {
            header: ZipFileEntry {
                file_name: name.to_string(),
                comment: options.comment.unwrap_or_default(),
                flags: WRITER_FLAGS,
                compression_method: method,
                compressed_size: 0,
                uncompressed_size: 0,
                crc32: 0,
                lfh_offset,
                last_mod_time: time,
                last_mod_date: date,
                is_directory,
            },
            hasher: crc32fast::Hasher::new(),
            encoder,
        });
        Ok(())
    }

    pub fn write_data(&mut self, buf: &[u8]) -> ZipResult<()> {
        let Some(open) = self.current.as_mut() else {
            return Err(ZipError::NoRecord);
        };
        if buf.is_empty() {
            return Ok(());
        }
        if open.header.is_directory {
            return Err(ZipError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` is a directory record", open.header.file_name),
            )));
        }

        open.hasher.update(buf);
        open.header.uncompressed_size += buf.len() as u64;
        match open.encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(buf)?;
                let compressed = std::mem::take(encoder.get_mut());
                self.out.write_all(&compressed)?;
                open.header.compressed_size += compressed.len() as u64;
            }
            None => {
                self.out.write_all(buf)?;
                open.header.compressed_size += buf.len() as u64;
            }
        }
        Ok(())
    }

    /// Completes the open record. On failure the record is dropped and the
    /// writer accepts a new one.
    pub fn finish_record(&mut self) -> ZipResult<()> {
        let Some(mut open) = self.current.take() else {
            return Err(ZipError::NoRecord);
        };

        if let Some(encoder) = open.encoder.take() {
            let tail = encoder.finish()?;
            self.out.write_all(&tail)?;
            open.header.compressed_size += tail.len() as u64;
        }
        open.header.crc32 = open.hasher.finalize();

        let too_large = || ZipError::TooLarge(format!("`{}`", open.header.file_name));
        let compressed = u32::try_from(open.header.compressed_size).map_err(|_| too_large())?;
        let uncompressed = u32::try_from(open.header.uncompressed_size).map_err(|_| too_large())?;
        write_data_descriptor(&mut self.out, open.header.crc32, compressed, uncompressed)?;

        match self.index.get(&open.header.file_name) {
            Some(&at) => self.records[at] = open.header,
            None => {
                self.index
                    .insert(open.header.file_name.clone(), self.records.len());
                self.records.push(open.header);
            }
        }
        Ok(())
    }

    fn check_limits(&self, name: &str, options: &RecordOptions) -> ZipResult<()> {
        if name.len() > u16::MAX as usize {
            return Err(ZipError::TooLarge(format!("name of {} bytes", name.len())));
        }
        let comment_len = options.comment.as_ref().map_or(0, String::len);
        if comment_len > u16::MAX as usize {
            return Err(ZipError::TooLarge(format!("comment of `{name}`")));
        }
        if self.records.len() >= MAX_RECORDS && !self.index.contains_key(name) {
            return Err(ZipError::TooLarge(format!(
                "record `{name}` beyond {MAX_RECORDS} records"
            )));
        }
        if self.out.count > u32::MAX as u64 {
            return Err(ZipError::TooLarge(format!("offset of `{name}`")));
        }
        Ok(())
    }

    /// Writes the central directory and the EOCD, then flushes.
    /// A record still open at this point is completed first.
    pub fn finish(&mut self) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::Finished);
        }
        if self.current.is_some() {
            self.finish_record()?;
        }
        self.finished = true;

        let cd_offset = self.out.count;
        for record in &self.records {
            record.write_central_header(&mut self.out)?;
        }
        let cd_size = self.out.count - cd_offset;

        let eocd = EndOfCentralDirectory::for_records(self.records.len(), cd_size, cd_offset, &self.comment)?;
        eocd.write_to(&mut self.out, &self.comment)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.out.inner
    }

    pub fn into_inner(self) -> W {
        self.out.inner
    }
}
