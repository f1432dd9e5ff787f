use std::io::Write;

use crate::error::VdmError;
use crate::vfs::{Entry, EntryInputStream, EntryOutputStream};
use crate::zip::CompressionMethod;

pub type Result<T> = std::result::Result<T, VdmError>;

/// Read side of a container: enumeration and streaming read of entries.
pub trait ContainerReader: Send {
    /// Display name of the underlying storage (a path, or a label for handles).
    fn name(&self) -> &str;

    /// Container-level comment, if the storage carries one.
    fn comment(&self) -> Option<&str>;

    /// Looks up a single entry by its `/`-separated name.
    fn entry(&self, name: &str) -> Result<Entry>;

    /// Opens a stream over the content of `entry`.
    /// The entry must have been produced by this very reader.
    fn input_stream(&self, entry: &Entry) -> Result<EntryInputStream>;

    /// Enumerates all entries. Each call makes a fresh pass.
    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + '_>>;

    /// Number of entries `entries()` would yield.
    fn size(&self) -> Result<usize>;

    /// Closes the reader and every stream it handed out. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Write side of a container: declaration of entries and streaming write.
///
/// Entries follow `New -> Open -> Closed`, and at most one entry of a writer
/// is `Open` at any moment.
pub trait ContainerWriter: Send {
    fn name(&self) -> &str;

    /// Sets the container-level comment.
    fn set_comment(&mut self, comment: &str) -> Result<()>;

    /// Applies a backend-specific property. Backends without properties accept and ignore it.
    fn set_property(&mut self, property: WriterProperty) -> Result<()>;

    /// Declares a new entry in state `New`. Names ending with `/` denote directories.
    fn new_entry(&mut self, name: &str) -> Result<Entry>;

    /// Opens the output stream of a `New` entry and moves it to `Open`.
    fn put_entry(&mut self, entry: &Entry) -> Result<EntryOutputStream>;

    /// Appends bytes to the stream of an `Open` entry.
    fn write(&mut self, entry: &Entry, content: &[u8]) -> Result<()>;

    /// Flushes and closes the stream of an `Open` entry and moves it to `Closed`.
    fn close_entry(&mut self, entry: &Entry) -> Result<()>;

    /// Writes a whole `New` entry in one call: `put_entry`, write, `close_entry`.
    /// A failed write aborts only this entry.
    fn write_entry(&mut self, entry: &Entry, content: &[u8]) -> Result<()> {
        let mut stream = self.put_entry(entry)?;
        if let Err(err) = stream.write_all(content) {
            if let Err(close_err) = self.close_entry(entry) {
                tracing::debug!(entry = entry.name(), error = %close_err, "abort after failed write");
            }
            return Err(err.into());
        }
        drop(stream);
        self.close_entry(entry)
    }

    /// Closes any open entry, finalizes the storage and releases it. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Recognized writer properties.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriterProperty {
    /// Compression method of the following archive records.
    Method(CompressionMethod),
    /// Deflate level, `0..=9`.
    Level(u32),
}

impl WriterProperty {
    /// Builds a property from its textual `name = value` form,
    /// e.g. `("method", "deflate")` or `("level", "9")`.
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "method" | "compression" => match value.trim().to_ascii_lowercase().as_str() {
                "stored" | "store" | "0" => Ok(WriterProperty::Method(CompressionMethod::Stored)),
                "deflate" | "deflated" | "8" => {
                    Ok(WriterProperty::Method(CompressionMethod::Deflate))
                }
                other => Err(VdmError::invalid(format!("unknown compression method `{other}`"))),
            },
            "level" => {
                let level: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| VdmError::invalid(format!("invalid level `{value}`")))?;
                if level > 9 {
                    return Err(VdmError::invalid(format!("level {level} is out of 0..=9")));
                }
                Ok(WriterProperty::Level(level))
            }
            other => Err(VdmError::invalid(format!("unknown writer property `{other}`"))),
        }
    }
}

pub mod utils {
    use crate::core::Result;
    use crate::error::VdmError;

    /// Normalizes an entry name: `\` becomes `/`, empty and `.` components are dropped.
    /// A trailing `/` (directory marker) is preserved.
    /// Names that are empty or climb out of the container with `..` are rejected.
    pub fn normalize_name(name: &str) -> Result<String> {
        let unified = name.replace('\\', "/");
        let is_dir = unified.ends_with('/');
        let mut parts = Vec::new();
        for part in unified.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    return Err(VdmError::invalid(format!(
                        "entry name `{name}` leaves the container"
                    )));
                }
                _ => parts.push(part),
            }
        }
        if parts.is_empty() {
            return Err(VdmError::invalid(format!("invalid entry name `{name}`")));
        }
        let mut normalized = parts.join("/");
        if is_dir {
            normalized.push('/');
        }
        Ok(normalized)
    }

    /// Name without a trailing directory marker.
    pub fn trim_dir_marker(name: &str) -> &str {
        name.strip_suffix('/').unwrap_or(name)
    }
}
