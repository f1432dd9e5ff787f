//! Lifecycle bookkeeping shared by all backends: the open/closed flag, entry
//! ownership checks, stream tracking and the writer's one-open-entry rule.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{Result, utils};
use crate::error::VdmError;
use crate::vfs::entry::{ContainerId, Entry, StreamState};
use crate::vfs::streams::{EntryInputStream, EntryOutputStream, EntrySink, OpenStreams, OutputSlot};

pub(crate) struct ContainerState {
    id: ContainerId,
    name: String,
    closed: bool,
    streams: Arc<OpenStreams>,
}

impl ContainerState {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let state = Self {
            id: ContainerId::next(),
            name: name.into(),
            closed: false,
            streams: OpenStreams::new(),
        };
        debug!(container = %state.name, id = ?state.id, "container opened");
        state
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn streams(&self) -> &Arc<OpenStreams> {
        &self.streams
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VdmError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Fails with `InvalidArgument` unless `entry` was produced by this container.
    pub(crate) fn check_owner(&self, entry: &Entry) -> Result<()> {
        if entry.owner() != self.id {
            return Err(VdmError::invalid(format!(
                "entry `{}` does not belong to container `{}`",
                entry.name(),
                self.name
            )));
        }
        Ok(())
    }

    /// Open + owner check, the preamble of every stream operation.
    pub(crate) fn check_entry(&self, entry: &Entry) -> Result<()> {
        self.ensure_open()?;
        self.check_owner(entry)
    }

    pub(crate) fn open_input(&self, entry: &Entry, reader: Box<dyn Read + Send>) -> EntryInputStream {
        self.streams.open_input(entry.name(), reader)
    }

    /// Marks the container closed and closes every tracked stream.
    /// Returns `false` if it was closed already.
    pub(crate) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for (entry, err) in self.streams.close_all() {
            warn!(container = %self.name, entry = %entry, error = %err, "failed to close stream");
        }
        debug!(container = %self.name, id = ?self.id, "container closed");
        true
    }
}

struct OpenEntry {
    entry: Entry,
    stream_id: u64,
    slot: Arc<OutputSlot>,
}

/// Writer side of the lifecycle. Backends supply sinks; this type enforces
/// the state machine around them.
pub(crate) struct WriterLifecycle {
    state: ContainerState,
    current: Option<OpenEntry>,
}

impl WriterLifecycle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            state: ContainerState::new(name),
            current: None,
        }
    }

    pub(crate) fn state(&self) -> &ContainerState {
        &self.state
    }

    pub(crate) fn new_entry(&self, name: &str) -> Result<Entry> {
        self.state.ensure_open()?;
        let name = utils::normalize_name(name)?;
        Ok(Entry::declared(name, self.state.id()))
    }

    /// Validates a `New` entry, opens its sink through `open_sink` and moves it to `Open`.
    pub(crate) fn put_entry<F>(&mut self, entry: &Entry, open_sink: F) -> Result<EntryOutputStream>
    where
        F: FnOnce(&Entry) -> Result<Box<dyn EntrySink>>,
    {
        self.state.check_entry(entry)?;
        entry.expect_state(StreamState::New)?;
        if let Some(open) = &self.current {
            return Err(VdmError::illegal(format!(
                "entry `{}` is still open",
                open.entry.name()
            )));
        }

        let sink = open_sink(entry)?;
        entry.transition(StreamState::New, StreamState::Open)?;
        let (stream_id, slot, stream) = self.state.streams().open_output(entry.name(), sink);
        self.current = Some(OpenEntry {
            entry: entry.clone(),
            stream_id,
            slot,
        });
        debug!(container = %self.state.name(), entry = entry.name(), "entry opened");
        Ok(stream)
    }

    pub(crate) fn write(&mut self, entry: &Entry, content: &[u8]) -> Result<()> {
        self.state.check_entry(entry)?;
        entry.expect_state(StreamState::Open)?;
        let open = self.current_for(entry)?;
        let mut stream = EntryOutputStream::from_slot(open.slot.clone());
        stream.write_all(content)?;
        Ok(())
    }

    /// Finishes the sink of an `Open` entry. The entry ends up `Closed`
    /// even when finishing fails; the failure aborts only this entry.
    pub(crate) fn close_entry(&mut self, entry: &Entry) -> Result<()> {
        self.state.check_entry(entry)?;
        entry.expect_state(StreamState::Open)?;
        self.current_for(entry)?;

        let Some(open) = self.current.take() else {
            return Err(VdmError::illegal(format!("entry `{}` is not open", entry.name())));
        };
        self.state.streams().remove(open.stream_id);
        let finished = open.slot.finish();
        entry.transition(StreamState::Open, StreamState::Closed)?;
        debug!(container = %self.state.name(), entry = entry.name(), "entry closed");

        match finished {
            Ok(true) => Ok(()),
            Ok(false) => Err(VdmError::illegal(format!(
                "stream of entry `{}` was already closed",
                entry.name()
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Closes the open entry (if any) and every tracked stream.
    /// Returns `false` if the writer was closed already.
    pub(crate) fn close(&mut self) -> bool {
        if let Some(open) = self.current.take() {
            // The sink itself is finished by the stream drain below.
            if let Err(err) = open.entry.transition(StreamState::Open, StreamState::Closed) {
                debug!(entry = open.entry.name(), error = %err, "entry state on close");
            }
        }
        self.state.close()
    }

    fn current_for(&self, entry: &Entry) -> Result<&OpenEntry> {
        match &self.current {
            Some(open) if open.entry.is_same(entry) => Ok(open),
            _ => Err(VdmError::illegal(format!(
                "entry `{}` is not the open entry",
                entry.name()
            ))),
        }
    }
}
