//! Containers stored as a single ZIP archive.
//!
//! Entry name, comment and timestamp map 1:1 onto archive record fields.
//! Writing is strictly sequential: one record is open at a time, which the
//! codec enforces on its own and the writer lifecycle checks up front.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{ContainerReader, ContainerWriter, Result, WriterProperty, utils};
use crate::error::VdmError;
use crate::vfs::container::{ContainerState, WriterLifecycle};
use crate::vfs::streams::EntrySink;
use crate::zip::{
    CompressionMethod, RecordOptions, ZipArchive, ZipError, ZipFileEntry, ZipStreamWriter,
};
use crate::{Entry, EntryInputStream, EntryOutputStream, EntryType};

/// Reads entries from a ZIP archive.
pub struct ZipReader {
    state: ContainerState,
    archive: ZipArchive,
}

impl ZipReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VdmError::not_found(format!("{}", path.display())));
        }
        if path.is_dir() {
            return Err(VdmError::invalid(format!("{:?} is a directory", path)));
        }
        Ok(Self::from_archive(ZipArchive::open(path)?))
    }

    /// Reads an archive from an already opened file.
    pub fn from_file(name: impl Into<String>, file: File) -> Result<Self> {
        Ok(Self::from_archive(ZipArchive::from_file(name, file)?))
    }

    pub fn from_archive(archive: ZipArchive) -> Self {
        Self {
            state: ContainerState::new(archive.name()),
            archive,
        }
    }

    pub fn archive(&self) -> &ZipArchive {
        &self.archive
    }

    fn to_entry(&self, record: &ZipFileEntry) -> Entry {
        let entry_type = if record.is_directory {
            EntryType::Directory
        } else {
            EntryType::File
        };
        let comment = Some(record.comment.clone()).filter(|c| !c.is_empty());
        Entry::found(record.file_name.clone(), entry_type, self.state.id())
            .with_comment(comment)
            .with_last_modified(record.last_modified())
            .with_size(Some(record.uncompressed_size))
    }
}

impl ContainerReader for ZipReader {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn comment(&self) -> Option<&str> {
        Some(self.archive.comment()).filter(|c| !c.is_empty())
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        self.state.ensure_open()?;
        let name = utils::normalize_name(name)?;
        self.archive
            .by_name(&name)
            .map(|record| self.to_entry(record))
            .ok_or_else(|| VdmError::not_found(name))
    }

    fn input_stream(&self, entry: &Entry) -> Result<EntryInputStream> {
        self.state.check_entry(entry)?;
        if entry.is_dir() {
            return Err(VdmError::invalid(format!("`{}` is a directory", entry.name())));
        }
        let record = self
            .archive
            .by_name(entry.name())
            .ok_or_else(|| VdmError::not_found(entry.name()))?;
        let reader = self.archive.open_record(record)?;
        Ok(self.state.open_input(entry, reader))
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + '_>> {
        self.state.ensure_open()?;
        Ok(Box::new(
            self.archive.records().iter().map(|record| self.to_entry(record)),
        ))
    }

    fn size(&self) -> Result<usize> {
        self.state.ensure_open()?;
        Ok(self.archive.records().len())
    }

    fn close(&mut self) -> Result<()> {
        self.state.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl Drop for ZipReader {
    fn drop(&mut self) {
        self.state.close();
    }
}

type SharedArchive = Arc<Mutex<ZipStreamWriter<Box<dyn Write + Send>>>>;

/// A record refused for format limits is a bad argument for that entry only.
fn start_error(err: ZipError) -> VdmError {
    match err {
        ZipError::TooLarge(_) => VdmError::invalid(err.to_string()),
        other => other.into(),
    }
}

/// Writes entries as records of a new ZIP archive.
///
/// The central directory is written by [`close`](ContainerWriter::close)
/// (or on drop); until then the output is not a readable archive.
///
/// Recognized properties: [`WriterProperty::Method`] (`Stored` or `Deflate`,
/// default `Deflate`) and [`WriterProperty::Level`] (`0..=9`, default `6`).
/// They apply to entries put after the change.
pub struct ZipWriter {
    lifecycle: WriterLifecycle,
    archive: SharedArchive,
    method: CompressionMethod,
    level: u32,
}

impl ZipWriter {
    /// Creates (or truncates) the archive file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(VdmError::invalid("invalid archive path: empty"));
        }
        if path.is_dir() {
            return Err(VdmError::invalid(format!("{:?} is a directory", path)));
        }
        let file = File::create(path)?;
        Ok(Self::from_writer(path.display().to_string(), Box::new(BufWriter::new(file))))
    }

    pub fn from_file(name: impl Into<String>, file: File) -> Self {
        Self::from_writer(name, Box::new(BufWriter::new(file)))
    }

    pub fn from_writer(name: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        let defaults = RecordOptions::default();
        Self {
            lifecycle: WriterLifecycle::new(name),
            archive: Arc::new(Mutex::new(ZipStreamWriter::new(out))),
            method: defaults.method,
            level: defaults.level,
        }
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn finish_archive(&mut self) -> Result<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        self.archive.lock().finish()?;
        debug!(archive = %self.lifecycle.state().name(), "archive finished");
        Ok(())
    }
}

impl ContainerWriter for ZipWriter {
    fn name(&self) -> &str {
        self.lifecycle.state().name()
    }

    fn set_comment(&mut self, comment: &str) -> Result<()> {
        self.lifecycle.state().ensure_open()?;
        if comment.len() > u16::MAX as usize {
            return Err(VdmError::invalid("archive comment exceeds 65535 bytes"));
        }
        self.archive.lock().set_comment(comment);
        Ok(())
    }

    fn set_property(&mut self, property: WriterProperty) -> Result<()> {
        self.lifecycle.state().ensure_open()?;
        match property {
            WriterProperty::Method(CompressionMethod::Unknown(code)) => Err(VdmError::invalid(
                format!("unsupported compression method {code}"),
            )),
            WriterProperty::Method(method) => {
                self.method = method;
                Ok(())
            }
            WriterProperty::Level(level) if level > 9 => {
                Err(VdmError::invalid(format!("level {level} is out of 0..=9")))
            }
            WriterProperty::Level(level) => {
                self.level = level;
                Ok(())
            }
        }
    }

    fn new_entry(&mut self, name: &str) -> Result<Entry> {
        let entry = self.lifecycle.new_entry(name)?;
        if entry.name().len() > u16::MAX as usize {
            return Err(VdmError::invalid(format!(
                "entry name of {} bytes exceeds 65535",
                entry.name().len()
            )));
        }
        Ok(entry)
    }

    fn put_entry(&mut self, entry: &Entry) -> Result<EntryOutputStream> {
        let archive = self.archive.clone();
        let options = RecordOptions {
            method: self.method,
            level: self.level,
            comment: entry.comment().map(str::to_string),
            modified: entry.last_modified().unwrap_or_else(Utc::now),
        };
        self.lifecycle.put_entry(entry, move |entry| {
            archive
                .lock()
                .start_record(entry.name(), options)
                .map_err(start_error)?;
            Ok(Box::new(RecordSink { archive }))
        })
    }

    fn write(&mut self, entry: &Entry, content: &[u8]) -> Result<()> {
        self.lifecycle.write(entry, content)
    }

    fn close_entry(&mut self, entry: &Entry) -> Result<()> {
        self.lifecycle.close_entry(entry)
    }

    fn close(&mut self) -> Result<()> {
        self.finish_archive()
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.state().is_closed()
    }
}

impl Drop for ZipWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish_archive() {
            warn!(archive = %self.lifecycle.state().name(), error = %err, "failed to finish archive");
        }
    }
}

struct RecordSink {
    archive: SharedArchive,
}

impl Write for RecordSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.archive.lock().write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EntrySink for RecordSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.archive.lock().finish_record()?;
        Ok(())
    }
}
