//! Construction of readers and writers from opaque descriptors.

use std::any::Any;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use crate::core::{ContainerReader, ContainerWriter, Result};
use crate::error::VdmError;
use crate::vfs::{DirReader, DirWriter, MapReader, MapStore, MapWriter, ZipReader, ZipWriter};
use crate::zip::ZipArchive;

/// Where a container lives.
pub enum Descriptor {
    /// A path on the host filesystem.
    Path(PathBuf),
    /// An already opened OS file.
    File(File),
    /// An already opened native container (e.g. a [`ZipArchive`] or a [`MapStore`]).
    Handle(Box<dyn Any + Send>),
}

impl Descriptor {
    pub fn handle<T: Any + Send>(value: T) -> Self {
        Descriptor::Handle(Box::new(value))
    }

    /// Short form name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Descriptor::Path(_) => "path",
            Descriptor::File(_) => "file",
            Descriptor::Handle(_) => "handle",
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Descriptor::File(file) => f.debug_tuple("File").field(file).finish(),
            Descriptor::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

impl From<PathBuf> for Descriptor {
    fn from(path: PathBuf) -> Self {
        Descriptor::Path(path)
    }
}

impl From<&std::path::Path> for Descriptor {
    fn from(path: &std::path::Path) -> Self {
        Descriptor::Path(path.to_path_buf())
    }
}

impl From<&str> for Descriptor {
    fn from(path: &str) -> Self {
        Descriptor::Path(PathBuf::from(path))
    }
}

impl From<String> for Descriptor {
    fn from(path: String) -> Self {
        Descriptor::Path(PathBuf::from(path))
    }
}

impl From<File> for Descriptor {
    fn from(file: File) -> Self {
        Descriptor::File(file)
    }
}

fn unsupported(scheme: &str, descriptor: &Descriptor) -> VdmError {
    VdmError::invalid(format!(
        "scheme `{scheme}` does not accept a {} descriptor",
        descriptor.kind()
    ))
}

/// Builds the reader and writer of one backend.
pub trait ContainerFactory: Send + Sync {
    /// Scheme names served by this factory.
    fn schemes(&self) -> &[&str];

    fn reader(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerReader>>;

    fn writer(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerWriter>>;

    fn supports(&self, scheme: &str) -> bool {
        self.schemes().iter().any(|s| *s == scheme)
    }
}

/// `dir`: accepts paths only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirFactory;

impl ContainerFactory for DirFactory {
    fn schemes(&self) -> &[&str] {
        &["dir"]
    }

    fn reader(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerReader>> {
        match descriptor {
            Descriptor::Path(path) => Ok(Box::new(DirReader::open(path)?)),
            other => Err(unsupported("dir", &other)),
        }
    }

    fn writer(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerWriter>> {
        match descriptor {
            Descriptor::Path(path) => Ok(Box::new(DirWriter::create(path)?)),
            other => Err(unsupported("dir", &other)),
        }
    }
}

/// `zip`: paths, files, and handles.
///
/// A reader handle is a [`ZipArchive`]; a writer handle is any
/// `Box<dyn Write + Send>` receiving the archive bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipFactory;

impl ContainerFactory for ZipFactory {
    fn schemes(&self) -> &[&str] {
        &["zip"]
    }

    fn reader(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerReader>> {
        match descriptor {
            Descriptor::Path(path) => Ok(Box::new(ZipReader::open(path)?)),
            Descriptor::File(file) => Ok(Box::new(ZipReader::from_file("<file>", file)?)),
            Descriptor::Handle(handle) => match handle.downcast::<ZipArchive>() {
                Ok(archive) => Ok(Box::new(ZipReader::from_archive(*archive))),
                Err(handle) => Err(unsupported("zip", &Descriptor::Handle(handle))),
            },
        }
    }

    fn writer(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerWriter>> {
        match descriptor {
            Descriptor::Path(path) => Ok(Box::new(ZipWriter::create(path)?)),
            Descriptor::File(file) => Ok(Box::new(ZipWriter::from_file("<file>", file))),
            Descriptor::Handle(handle) => match handle.downcast::<Box<dyn Write + Send>>() {
                Ok(out) => Ok(Box::new(ZipWriter::from_writer("<handle>", *out))),
                Err(handle) => Err(unsupported("zip", &Descriptor::Handle(handle))),
            },
        }
    }
}

/// `mem`: handles holding a [`MapStore`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MapFactory;

impl MapFactory {
    fn store(descriptor: Descriptor) -> Result<MapStore> {
        match descriptor {
            Descriptor::Handle(handle) => match handle.downcast::<MapStore>() {
                Ok(store) => Ok(*store),
                Err(handle) => Err(unsupported("mem", &Descriptor::Handle(handle))),
            },
            other => Err(unsupported("mem", &other)),
        }
    }
}

impl ContainerFactory for MapFactory {
    fn schemes(&self) -> &[&str] {
        &["mem"]
    }

    fn reader(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerReader>> {
        Ok(Box::new(MapReader::new(Self::store(descriptor)?)))
    }

    fn writer(&self, descriptor: Descriptor) -> Result<Box<dyn ContainerWriter>> {
        Ok(Box::new(MapWriter::new(Self::store(descriptor)?)))
    }
}
