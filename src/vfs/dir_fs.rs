//! Containers backed by a directory tree on the host filesystem.
//!
//! ### Layout
//! - Entry names are paths relative to the root, with `/` separators on every platform.
//! - The file [`COMMENT_FILE`] directly under the root holds the container comment;
//!   it is never reported as an entry.
//! - Only regular files are enumerated. Directories are reachable through
//!   [`ContainerReader::entry`] as synthesized directory entries (`name/`).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::{ContainerReader, ContainerWriter, Result, WriterProperty, utils};
use crate::error::VdmError;
use crate::vfs::container::{ContainerState, WriterLifecycle};
use crate::vfs::streams::EntrySink;
use crate::{Entry, EntryInputStream, EntryOutputStream, EntryType};

/// Reserved file holding the container comment.
pub const COMMENT_FILE: &str = ".vdm-comment";

fn check_root(root: &Path) -> Result<()> {
    if root.as_os_str().is_empty() {
        return Err(VdmError::invalid("invalid root path: empty"));
    }
    if root.exists() && !root.is_dir() {
        return Err(VdmError::invalid(format!("{:?} is not a directory", root)));
    }
    Ok(())
}

fn io_not_found(err: io::Error, what: &str) -> VdmError {
    if err.kind() == io::ErrorKind::NotFound {
        VdmError::not_found(what)
    } else {
        VdmError::Io(err)
    }
}

/// Reads a directory tree as a container.
///
/// ### Example:
/// ```no_run
/// use std::io::Read;
/// use vdm_kit::{ContainerReader, DirReader};
///
/// let reader = DirReader::open("/tmp/my_container").unwrap();
/// for entry in reader.entries().unwrap() {
///     let mut content = Vec::new();
///     reader.input_stream(&entry).unwrap().read_to_end(&mut content).unwrap();
///     println!("{}: {} bytes", entry.name(), content.len());
/// }
/// ```
pub struct DirReader {
    state: ContainerState,
    root: PathBuf,
    comment: Option<String>,
}

impl DirReader {
    /// Opens the directory at `root`. It must exist.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        check_root(root)?;
        if !root.exists() {
            return Err(VdmError::not_found(format!("{}", root.display())));
        }

        let comment = match std::fs::read_to_string(root.join(COMMENT_FILE)) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            state: ContainerState::new(root.display().to_string()),
            root: root.to_path_buf(),
            comment,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, name: &str) -> PathBuf {
        self.root.join(utils::trim_dir_marker(name))
    }

    fn to_entry(&self, name: String, metadata: &std::fs::Metadata) -> Entry {
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        if metadata.is_dir() {
            Entry::found(format!("{name}/"), EntryType::Directory, self.state.id())
                .with_last_modified(modified)
        } else {
            Entry::found(name, EntryType::File, self.state.id())
                .with_last_modified(modified)
                .with_size(Some(metadata.len()))
        }
    }

    /// Collects the regular files under `dir`, recursively.
    fn collect_recursive(&self, dir: &Path, prefix: &str, found: &mut Vec<Entry>) -> Result<()> {
        for item in std::fs::read_dir(dir)? {
            let item = item?;
            let Some(file_name) = item.file_name().to_str().map(str::to_string) else {
                warn!(path = %item.path().display(), "skipping non UTF-8 name");
                continue;
            };
            if prefix.is_empty() && file_name == COMMENT_FILE {
                continue;
            }
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{prefix}/{file_name}")
            };

            // follows symlinks, like `Path::is_dir`
            let metadata = std::fs::metadata(item.path())?;
            if metadata.is_dir() {
                self.collect_recursive(&item.path(), &name, found)?;
            } else if metadata.is_file() {
                found.push(self.to_entry(name, &metadata));
            }
        }
        Ok(())
    }

    fn walk(&self) -> Result<Vec<Entry>> {
        let mut found = Vec::new();
        self.collect_recursive(&self.root, "", &mut found)?;
        found.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(found)
    }
}

impl ContainerReader for DirReader {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        self.state.ensure_open()?;
        let name = utils::normalize_name(name)?;
        let plain = utils::trim_dir_marker(&name);
        if plain == COMMENT_FILE {
            return Err(VdmError::not_found(name));
        }
        let metadata = std::fs::metadata(self.host_path(plain)).map_err(|e| io_not_found(e, &name))?;
        Ok(self.to_entry(plain.to_string(), &metadata))
    }

    fn input_stream(&self, entry: &Entry) -> Result<EntryInputStream> {
        self.state.check_entry(entry)?;
        if entry.is_dir() {
            return Err(VdmError::invalid(format!("`{}` is a directory", entry.name())));
        }
        let file = File::open(self.host_path(entry.name())).map_err(|e| io_not_found(e, entry.name()))?;
        Ok(self.state.open_input(entry, Box::new(BufReader::new(file))))
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + '_>> {
        self.state.ensure_open()?;
        Ok(Box::new(self.walk()?.into_iter()))
    }

    fn size(&self) -> Result<usize> {
        self.state.ensure_open()?;
        Ok(self.walk()?.len())
    }

    fn close(&mut self) -> Result<()> {
        self.state.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl Drop for DirReader {
    fn drop(&mut self) {
        self.state.close();
    }
}

/// Writes entries as files under a root directory.
///
/// The root and any missing parents are created on construction. Writing an
/// entry whose file already exists truncates and rewrites it.
pub struct DirWriter {
    lifecycle: WriterLifecycle,
    root: PathBuf,
    created_root_parents: Vec<PathBuf>,
}

impl DirWriter {
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        check_root(root)?;

        let mut created_root_parents = Vec::new();
        if !root.exists() {
            created_root_parents.extend(Self::mkdir_all(root)?);
            debug!(root = %root.display(), created = created_root_parents.len(), "created root");
        }

        Ok(Self {
            lifecycle: WriterLifecycle::new(root.display().to_string()),
            root: root.to_path_buf(),
            created_root_parents,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directories made by [`create`](Self::create) to bring the root into existence.
    pub fn created_root_parents(&self) -> &[PathBuf] {
        &self.created_root_parents
    }

    /// Make directories recursively.
    /// Returns vector of created directories.
    fn mkdir_all(path: &Path) -> Result<Vec<PathBuf>> {
        let host_path = path.to_path_buf();

        // Looking for the first existing parent
        let mut existed_part = host_path.clone();
        while let Some(parent) = existed_part.parent() {
            let parent_buf = parent.to_path_buf();
            if parent.as_os_str().is_empty() || std::fs::exists(parent)? {
                existed_part = parent_buf;
                break;
            }
            existed_part = parent_buf;
        }

        // Create from the closest existing parent to the target path
        let need_to_create: Vec<_> = host_path
            .strip_prefix(&existed_part)
            .map_err(|e| VdmError::invalid(e.to_string()))?
            .components()
            .collect();

        let mut created = Vec::new();
        let mut built = existed_part.clone();
        for component in need_to_create {
            built.push(component);
            if !std::fs::exists(&built)? {
                std::fs::create_dir(&built)?;
                created.push(built.clone());
            }
        }

        Ok(created)
    }

    fn open_sink(root: &Path, entry: &Entry) -> Result<Box<dyn EntrySink>> {
        let host = root.join(utils::trim_dir_marker(entry.name()));
        if entry.is_dir() {
            std::fs::create_dir_all(&host)?;
            return Ok(Box::new(DirMarkerSink {
                name: entry.name().to_string(),
            }));
        }
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&host)?;
        Ok(Box::new(FileSink {
            writer: BufWriter::new(file),
            modified: entry.last_modified(),
        }))
    }
}

impl ContainerWriter for DirWriter {
    fn name(&self) -> &str {
        self.lifecycle.state().name()
    }

    fn set_comment(&mut self, comment: &str) -> Result<()> {
        self.lifecycle.state().ensure_open()?;
        std::fs::write(self.root.join(COMMENT_FILE), comment)?;
        Ok(())
    }

    fn set_property(&mut self, property: WriterProperty) -> Result<()> {
        self.lifecycle.state().ensure_open()?;
        debug!(?property, "directory writer ignores properties");
        Ok(())
    }

    fn new_entry(&mut self, name: &str) -> Result<Entry> {
        let entry = self.lifecycle.new_entry(name)?;
        if utils::trim_dir_marker(entry.name()) == COMMENT_FILE {
            return Err(VdmError::invalid(format!("`{COMMENT_FILE}` is reserved")));
        }
        Ok(entry)
    }

    fn put_entry(&mut self, entry: &Entry) -> Result<EntryOutputStream> {
        let root = &self.root;
        self.lifecycle.put_entry(entry, |entry| Self::open_sink(root, entry))
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

impl Drop for DirWriter {
    fn drop(&mut self) {
        self.lifecycle.close();
    }
}

struct FileSink {
    writer: BufWriter<File>,
    modified: Option<DateTime<Utc>>,
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl EntrySink for FileSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        if let Some(modified) = self.modified {
            file.set_modified(modified.into())?;
        }
        Ok(())
    }
}

struct DirMarkerSink {
    name: String,
}

impl Write for DirMarkerSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("`{}` is a directory", self.name),
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EntrySink for DirMarkerSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
