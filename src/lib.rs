//! Virtual containers for Rust: one entry/stream API over directory trees,
//! ZIP archives and in-memory stores.
//!
//! ### Overview
//!
//! A container is a named, hierarchical collection of byte blobs ("entries").
//! `vdm-kit` reads containers through [`ContainerReader`] and writes them through
//! [`ContainerWriter`], whatever the physical storage is.
//!
//! **Key ideas**:
//! - **One protocol**: entries are enumerated, looked up and streamed the same way for every backend.
//! - **Ownership**: an [`Entry`] only works with the container that produced it.
//! - **Ordered writes**: writer entries go `New -> Open -> Closed`, one open entry at a time.
//! - **Deterministic cleanup**: closing (or dropping) a container closes every stream it handed out.
//! - **Pluggable backends**: a [`Registry`] resolves scheme names (`"dir"`, `"zip"`, ...) to factories.
//!
//! ### Example
//! ```no_run
//! use std::io::Read;
//! use vdm_kit::{ContainerReader, ContainerWriter, Registry};
//!
//! let registry = Registry::global();
//! let mut writer = registry.writer("zip", "/tmp/out.zip").unwrap();
//! let entry = writer.new_entry("docs/readme.txt").unwrap();
//! writer.write_entry(&entry, b"hello").unwrap();
//! writer.close().unwrap();
//!
//! let reader = registry.reader("zip", "/tmp/out.zip").unwrap();
//! let entry = reader.entry("docs/readme.txt").unwrap();
//! let mut content = String::new();
//! reader.input_stream(&entry).unwrap().read_to_string(&mut content).unwrap();
//! ```

mod core;
mod error;
mod factory;
mod registry;
mod vfs;
pub mod zip;

pub use crate::core::{ContainerReader, ContainerWriter, Result, WriterProperty, utils};
pub use error::VdmError;
pub use factory::{ContainerFactory, Descriptor, DirFactory, MapFactory, ZipFactory};
pub use registry::{BuiltinDiscovery, Discovery, Registry};
pub use vfs::{
    COMMENT_FILE, ContainerId, DirReader, DirWriter, Entry, EntryInputStream, EntryOutputStream,
    EntryType, MapReader, MapStore, MapWriter, StreamState, ZipReader, ZipWriter,
};
