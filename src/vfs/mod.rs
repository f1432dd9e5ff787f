mod container;
mod dir_fs;
mod entry;
mod map_fs;
mod streams;
mod zip_fs;

pub use dir_fs::{COMMENT_FILE, DirReader, DirWriter};
pub use entry::{ContainerId, Entry, EntryType, StreamState};
pub use map_fs::{MapReader, MapStore, MapWriter};
pub use streams::{EntryInputStream, EntryOutputStream};
pub use zip_fs::{ZipReader, ZipWriter};
