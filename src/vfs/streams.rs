//! Streams handed out by containers and the bookkeeping that lets a container
//! close every stream it opened.
//!
//! A container owns one [`OpenStreams`] set. Each stream registers a slot in it;
//! the caller's handle and the set share that slot, so closing the container
//! empties the slot and later reads or writes through the handle fail.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Destination of one entry's bytes. `finish` completes the entry
/// (flush, trailer, catalog update) and is called exactly once.
pub(crate) trait EntrySink: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

trait TrackedStream: Send + Sync {
    fn entry_name(&self) -> &str;
    fn close(&self) -> io::Result<()>;
}

struct InputSlot {
    name: String,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
}

impl TrackedStream for InputSlot {
    fn entry_name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> io::Result<()> {
        self.reader.lock().take();
        Ok(())
    }
}

pub(crate) struct OutputSlot {
    name: String,
    sink: Mutex<Option<Box<dyn EntrySink>>>,
}

impl OutputSlot {
    /// Takes the sink out of the slot and finishes it.
    /// Returns `Ok(false)` when it was already finished.
    pub(crate) fn finish(&self) -> io::Result<bool> {
        let sink = self.sink.lock().take();
        match sink {
            Some(sink) => sink.finish().map(|_| true),
            None => Ok(false),
        }
    }
}

impl TrackedStream for OutputSlot {
    fn entry_name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> io::Result<()> {
        self.finish().map(|_| ())
    }
}

/// The set of streams a container has opened and not yet seen closed.
#[derive(Default)]
pub(crate) struct OpenStreams {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, Arc<dyn TrackedStream>>>,
}

impl OpenStreams {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, stream: Arc<dyn TrackedStream>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, stream);
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.streams.lock().len()
    }

    /// Drains the set and closes every stream, even after failures.
    /// Returns the failures as `(entry name, error)` pairs.
    pub(crate) fn close_all(&self) -> Vec<(String, io::Error)> {
        let drained: Vec<_> = {
            let mut streams = self.streams.lock();
            let mut drained: Vec<_> = streams.drain().collect();
            drained.sort_by_key(|(id, _)| *id);
            drained
        };

        drained
            .into_iter()
            .filter_map(|(_, stream)| {
                stream
                    .close()
                    .err()
                    .map(|err| (stream.entry_name().to_string(), err))
            })
            .collect()
    }

    /// Registers a reader and returns the caller's handle for it.
    pub(crate) fn open_input(
        self: &Arc<Self>,
        name: &str,
        reader: Box<dyn Read + Send>,
    ) -> EntryInputStream {
        let slot = Arc::new(InputSlot {
            name: name.to_string(),
            reader: Mutex::new(Some(reader)),
        });
        let id = self.register(slot.clone());
        EntryInputStream {
            id,
            slot,
            streams: Arc::downgrade(self),
        }
    }

    /// Registers a sink and returns the slot together with the caller's handle.
    pub(crate) fn open_output(
        self: &Arc<Self>,
        name: &str,
        sink: Box<dyn EntrySink>,
    ) -> (u64, Arc<OutputSlot>, EntryOutputStream) {
        let slot = Arc::new(OutputSlot {
            name: name.to_string(),
            sink: Mutex::new(Some(sink)),
        });
        let id = self.register(slot.clone());
        let stream = EntryOutputStream::from_slot(slot.clone());
        (id, slot, stream)
    }
}

fn closed_stream(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("stream of entry `{name}` is closed"),
    )
}

/// Readable content of one entry.
///
/// Dropping the handle releases the stream; closing the owning reader
/// releases it too, after which `read` fails.
pub struct EntryInputStream {
    id: u64,
    slot: Arc<InputSlot>,
    streams: Weak<OpenStreams>,
}

impl EntryInputStream {
    pub fn entry_name(&self) -> &str {
        &self.slot.name
    }

    pub fn is_closed(&self) -> bool {
        self.slot.reader.lock().is_none()
    }

    /// Releases the stream before the handle is dropped.
    pub fn close(&mut self) {
        self.slot.reader.lock().take();
        if let Some(streams) = self.streams.upgrade() {
            streams.remove(self.id);
        }
    }
}

impl Read for EntryInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self.slot.reader.lock();
        match reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(closed_stream(&self.slot.name)),
        }
    }
}

impl Drop for EntryInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writable content of one `Open` entry.
///
/// The stream is finished by the writer's `close_entry` (or `close`);
/// dropping the handle alone leaves the entry open.
pub struct EntryOutputStream {
    slot: Arc<OutputSlot>,
}

impl EntryOutputStream {
    pub(crate) fn from_slot(slot: Arc<OutputSlot>) -> Self {
        Self { slot }
    }

    pub fn entry_name(&self) -> &str {
        &self.slot.name
    }

    pub fn is_closed(&self) -> bool {
        self.slot.sink.lock().is_none()
    }
}

impl Write for EntryOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = self.slot.sink.lock();
        match sink.as_mut() {
            Some(sink) => sink.write(buf),
            None => Err(closed_stream(&self.slot.name)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut sink = self.slot.sink.lock();
        match sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Err(closed_stream(&self.slot.name)),
        }
    }
}
