//! Containers kept entirely in memory.
//!
//! A [`MapStore`] is a shared, cloneable handle to an ordered map of entries.
//! Writers fill it, readers see a snapshot of each record when they open it.
//! It is the container behind the `mem` scheme and handy for tests that must
//! not touch the host filesystem.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::{ContainerReader, ContainerWriter, Result, WriterProperty, utils};
use crate::error::VdmError;
use crate::vfs::container::{ContainerState, WriterLifecycle};
use crate::vfs::streams::EntrySink;
use crate::{Entry, EntryInputStream, EntryOutputStream, EntryType};

#[derive(Debug, Clone)]
struct MapRecord {
    entry_type: EntryType,
    content: Arc<Vec<u8>>,
    comment: Option<String>,
    modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MapContents {
    comment: Option<String>,
    records: BTreeMap<String, MapRecord>, // normalized entry names
}

/// Shared in-memory storage of one container.
///
/// ### Invariants
/// - Keys are normalized entry names; directory records end with `/`.
/// - Each name maps to exactly one record; writing a name again replaces it.
///
/// ### Example
/// ```
/// use vdm_kit::{ContainerReader, ContainerWriter, MapReader, MapStore, MapWriter};
///
/// let store = MapStore::new("scratch");
/// let mut writer = MapWriter::new(store.clone());
/// let entry = writer.new_entry("docs/note.txt").unwrap();
/// writer.write_entry(&entry, b"Hello").unwrap();
/// writer.close().unwrap();
///
/// let reader = MapReader::new(store.clone());
/// assert_eq!(reader.size().unwrap(), 1);
/// assert_eq!(store.read("docs/note.txt").unwrap(), b"Hello");
/// ```
#[derive(Debug, Clone)]
pub struct MapStore {
    label: Arc<str>,
    contents: Arc<RwLock<MapContents>>,
}

impl MapStore {
    pub fn new(label: &str) -> Self {
        Self {
            label: Arc::from(label),
            contents: Arc::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.contents.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.read().records.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contents.read().records.contains_key(name)
    }

    /// Content of a file record.
    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.contents
            .read()
            .records
            .get(name)
            .filter(|r| r.entry_type == EntryType::File)
            .map(|r| r.content.as_ref().clone())
    }

    pub fn comment(&self) -> Option<String> {
        self.contents.read().comment.clone()
    }

    /// Removes every record and the comment.
    pub fn clear(&self) {
        let mut contents = self.contents.write();
        contents.records.clear();
        contents.comment = None;
    }

    fn lookup(&self, name: &str) -> Option<(String, MapRecord)> {
        let contents = self.contents.read();
        if let Some(record) = contents.records.get(name) {
            return Some((name.to_string(), record.clone()));
        }
        let marker = format!("{}/", utils::trim_dir_marker(name));
        contents
            .records
            .get(&marker)
            .map(|record| (marker, record.clone()))
    }
}

/// Reads entries from a [`MapStore`].
pub struct MapReader {
    state: ContainerState,
    store: MapStore,
    comment: Option<String>,
}

impl MapReader {
    pub fn new(store: MapStore) -> Self {
        let comment = store.comment();
        Self {
            state: ContainerState::new(format!("mem:{}", store.label())),
            store,
            comment,
        }
    }

    fn to_entry(&self, name: String, record: &MapRecord) -> Entry {
        let size = match record.entry_type {
            EntryType::File => Some(record.content.len() as u64),
            EntryType::Directory => None,
        };
        Entry::found(name, record.entry_type, self.state.id())
            .with_comment(record.comment.clone())
            .with_last_modified(record.modified)
            .with_size(size)
    }
}

impl ContainerReader for MapReader {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        self.state.ensure_open()?;
        let name = utils::normalize_name(name)?;
        let (name, record) = self
            .store
            .lookup(&name)
            .ok_or_else(|| VdmError::not_found(name))?;
        Ok(self.to_entry(name, &record))
    }

    fn input_stream(&self, entry: &Entry) -> Result<EntryInputStream> {
        self.state.check_entry(entry)?;
        if entry.is_dir() {
            return Err(VdmError::invalid(format!("`{}` is a directory", entry.name())));
        }
        let (_, record) = self
            .store
            .lookup(entry.name())
            .ok_or_else(|| VdmError::not_found(entry.name()))?;
        let reader = Cursor::new(SharedBytes(record.content));
        Ok(self.state.open_input(entry, Box::new(reader)))
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + '_>> {
        self.state.ensure_open()?;
        let snapshot: Vec<_> = self
            .store
            .contents
            .read()
            .records
            .iter()
            .map(|(name, record)| self.to_entry(name.clone(), record))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn size(&self) -> Result<usize> {
        self.state.ensure_open()?;
        Ok(self.store.len())
    }

    fn close(&mut self) -> Result<()> {
        self.state.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl Drop for MapReader {
    fn drop(&mut self) {
        self.state.close();
    }
}

/// Writes entries into a [`MapStore`]. A record becomes visible when its entry is closed.
pub struct MapWriter {
    lifecycle: WriterLifecycle,
    store: MapStore,
}

impl MapWriter {
    pub fn new(store: MapStore) -> Self {
        Self {
            lifecycle: WriterLifecycle::new(format!("mem:{}", store.label())),
            store,
        }
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }
}

impl ContainerWriter for MapWriter {
    fn name(&self) -> &str {
        self.lifecycle.state().name()
    }

    fn set_comment(&mut self, comment: &str) -> Result<()> {
        self.lifecycle.state().ensure_open()?;
        self.store.contents.write().comment = Some(comment.to_string());
        Ok(())
    }

    fn set_property(&mut self, _property: WriterProperty) -> Result<()> {
        self.lifecycle.state().ensure_open()
    }

    fn new_entry(&mut self, name: &str) -> Result<Entry> {
        self.lifecycle.new_entry(name)
    }

    fn put_entry(&mut self, entry: &Entry) -> Result<EntryOutputStream> {
        let store = self.store.clone();
        self.lifecycle.put_entry(entry, move |entry| {
            Ok(Box::new(MapSink {
                store,
                name: entry.name().to_string(),
                record: MapRecord {
                    entry_type: entry.entry_type(),
                    content: Arc::default(),
                    comment: entry.comment().map(str::to_string),
                    modified: Some(entry.last_modified().unwrap_or_else(Utc::now)),
                },
                buffer: Vec::new(),
            }))
        })
    }

    fn write(&mut self, entry: &Entry, content: &[u8]) -> Result<()> {
        self.lifecycle.write(entry, content)
    }

    fn close_entry(&mut self, entry: &Entry) -> Result<()> {
        self.lifecycle.close_entry(entry)
    }

    fn close(&mut self) -> Result<()> {
        self.lifecycle.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.state().is_closed()
    }
}

impl Drop for MapWriter {
    fn drop(&mut self) {
        self.lifecycle.close();
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

struct MapSink {
    store: MapStore,
    name: String,
    record: MapRecord,
    buffer: Vec<u8>,
}

impl Write for MapSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.record.entry_type == EntryType::Directory && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` is a directory", self.name),
            ));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EntrySink for MapSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let MapSink {
            store,
            name,
            mut record,
            buffer,
        } = *self;
        record.content = Arc::new(buffer);
        store.contents.write().records.insert(name, record);
        Ok(())
    }
}
