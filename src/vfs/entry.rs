use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::Result;
use crate::error::VdmError;

/// Identity of one reader or writer instance.
/// Two containers opened over the same storage still have distinct ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(u64);

impl ContainerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContainerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

/// Stream lifecycle of an entry declared on a writer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    New,
    Open,
    Closed,
}

/// One named item of a container.
///
/// Clones share the stream state, so a clone handed to another call observes
/// the same `New -> Open -> Closed` progress.
#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    entry_type: EntryType,
    comment: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    size: Option<u64>,
    owner: ContainerId,
    state: Option<Arc<Mutex<StreamState>>>,
}

impl Entry {
    /// An entry produced by enumeration; it has no write state.
    pub(crate) fn found(name: impl Into<String>, entry_type: EntryType, owner: ContainerId) -> Entry {
        Entry {
            name: name.into(),
            entry_type,
            comment: None,
            last_modified: None,
            size: None,
            owner,
            state: None,
        }
    }

    /// An entry declared on a writer, starting in `New`.
    pub(crate) fn declared(name: String, owner: ContainerId) -> Entry {
        let entry_type = if name.ends_with('/') {
            EntryType::Directory
        } else {
            EntryType::File
        };
        Entry {
            name,
            entry_type,
            comment: None,
            last_modified: None,
            size: None,
            owner,
            state: Some(Arc::new(Mutex::new(StreamState::New))),
        }
    }

    pub(crate) fn with_comment(mut self, comment: Option<String>) -> Entry {
        self.comment = comment;
        self
    }

    pub(crate) fn with_last_modified(mut self, modified: Option<DateTime<Utc>>) -> Entry {
        self.last_modified = modified;
        self
    }

    pub(crate) fn with_size(mut self, size: Option<u64>) -> Entry {
        self.size = size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Uncompressed content size, when the backend knows it up front.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn owner(&self) -> ContainerId {
        self.owner
    }

    /// Sets the comment stored with the entry. Only archive records keep it.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// Sets the modification time written for the entry.
    pub fn set_last_modified(&mut self, modified: DateTime<Utc>) {
        self.last_modified = Some(modified);
    }

    /// Current write state; `None` for entries obtained from a reader.
    pub fn stream_state(&self) -> Option<StreamState> {
        self.state.as_ref().map(|state| *state.lock())
    }

    pub(crate) fn is_same(&self, other: &Entry) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Moves the entry from `from` to `to`, or fails with `IllegalState`.
    pub(crate) fn transition(&self, from: StreamState, to: StreamState) -> Result<()> {
        let Some(state) = &self.state else {
            return Err(VdmError::illegal(format!(
                "entry `{}` has no write state",
                self.name
            )));
        };
        let mut current = state.lock();
        if *current != from {
            return Err(VdmError::illegal(format!(
                "entry `{}` is {:?}, expected {:?}",
                self.name, *current, from
            )));
        }
        *current = to;
        Ok(())
    }

    pub(crate) fn expect_state(&self, expected: StreamState) -> Result<()> {
        match self.stream_state() {
            Some(state) if state == expected => Ok(()),
            Some(state) => Err(VdmError::illegal(format!(
                "entry `{}` is {:?}, expected {:?}",
                self.name, state, expected
            ))),
            None => Err(VdmError::illegal(format!(
                "entry `{}` has no write state",
                self.name
            ))),
        }
    }
}
