use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempdir::TempDir;
use vdm_kit::{
    BuiltinDiscovery, ContainerFactory, ContainerReader, ContainerWriter, Descriptor, Discovery,
    MapFactory, MapStore, Registry, StreamState, VdmError,
};

fn setup_test_env() -> TempDir {
    TempDir::new("containers_test").unwrap()
}

fn read_entry(reader: &dyn ContainerReader, name: &str) -> anyhow::Result<Vec<u8>> {
    let entry = reader.entry(name)?;
    let mut content = Vec::new();
    reader.input_stream(&entry)?.read_to_end(&mut content)?;
    Ok(content)
}

fn sorted_names(reader: &dyn ContainerReader) -> anyhow::Result<Vec<String>> {
    let mut names: Vec<String> = reader.entries()?.map(|e| e.name().to_string()).collect();
    names.sort();
    Ok(names)
}

/// Writer and reader of one backend over the same storage.
struct Backend {
    scheme: &'static str,
    writer: fn(&TempDir) -> Box<dyn ContainerWriter>,
    reader: fn(&TempDir) -> Box<dyn ContainerReader>,
}

fn backends() -> Vec<Backend> {
    vec![
        Backend {
            scheme: "dir",
            writer: |tmp| Registry::global().writer("dir", tmp.path().join("tree")).unwrap(),
            reader: |tmp| Registry::global().reader("dir", tmp.path().join("tree")).unwrap(),
        },
        Backend {
            scheme: "zip",
            writer: |tmp| Registry::global().writer("zip", tmp.path().join("c.zip")).unwrap(),
            reader: |tmp| Registry::global().reader("zip", tmp.path().join("c.zip")).unwrap(),
        },
    ]
}

mod scenarios {
    use super::*;

    #[test]
    fn scenario_a_directory_round_trip() -> anyhow::Result<()> {
        let temp_dir = setup_test_env();
        let root = temp_dir.path().join("container");

        let mut writer = Registry::global().writer("dir", root.clone())?;
        let entry = writer.new_entry("a/b.txt")?;
        writer.write_entry(&entry, b"hi")?;
        writer.close()?;

        let reader = Registry::global().reader("dir", root)?;
        assert_eq!(sorted_names(reader.as_ref())?, vec!["a/b.txt".to_string()]);
        assert_eq!(read_entry(reader.as_ref(), "a/b.txt")?, b"hi");
        Ok(())
    }

    #[test]
    fn scenario_b_archive_sequential_entries() -> anyhow::Result<()> {
        let temp_dir = setup_test_env();
        let path = temp_dir.path().join("b.zip");

        let mut writer = Registry::global().writer("zip", path.as_path())?;
        for name in ["1.txt", "2.txt"] {
            let entry = writer.new_entry(name)?;
            let mut stream = writer.put_entry(&entry)?;
            stream.write_all(name.as_bytes())?;
            drop(stream);
            writer.close_entry(&entry)?;
        }
        writer.close()?;

        let reader = Registry::global().reader("zip", path.as_path())?;
        assert_eq!(reader.size()?, 2);
        assert_eq!(
            sorted_names(reader.as_ref())?,
            vec!["1.txt".to_string(), "2.txt".to_string()]
        );
        Ok(())
    }

    #[test]
    fn scenario_c_override_wins_over_discovery() -> anyhow::Result<()> {
        struct Claimer;

        impl ContainerFactory for Claimer {
            fn schemes(&self) -> &[&str] {
                &["dir", "mem"]
            }
            fn reader(&self, _: Descriptor) -> vdm_kit::Result<Box<dyn ContainerReader>> {
                Err(VdmError::NotFound("discovered".into()))
            }
            fn writer(&self, _: Descriptor) -> vdm_kit::Result<Box<dyn ContainerWriter>> {
                Err(VdmError::NotFound("discovered".into()))
            }
        }

        struct Growing(Arc<AtomicBool>);

        impl Discovery for Growing {
            fn discover(&self) -> Vec<Arc<dyn ContainerFactory>> {
                let mut found = BuiltinDiscovery.discover();
                if self.0.load(Ordering::SeqCst) {
                    found.insert(0, Arc::new(Claimer));
                }
                found
            }
        }

        let grown = Arc::new(AtomicBool::new(false));
        let registry = Registry::new(Box::new(Growing(grown.clone())));
        assert!(matches!(registry.service("mem"), Err(VdmError::NotFound(_))));

        registry.register_service("mem", Arc::new(MapFactory));
        grown.store(true, Ordering::SeqCst);
        registry.reload();

        let store = MapStore::new("scenario-c");
        let mut writer = registry.writer("mem", Descriptor::handle(store.clone()))?;
        let entry = writer.new_entry("x.txt")?;
        writer.write_entry(&entry, b"resolved")?;
        writer.close()?;
        assert_eq!(store.read("x.txt"), Some(b"resolved".to_vec()));

        // Without an override the newly discovered factory takes "dir" first.
        assert!(matches!(
            registry.reader("dir", "/nonexistent"),
            Err(VdmError::NotFound(msg)) if msg == "discovered"
        ));
        Ok(())
    }
}

mod properties {
    use super::*;

    #[test]
    fn directory_size_matches_file_count() -> anyhow::Result<()> {
        let temp_dir = setup_test_env();
        let root = temp_dir.path().join("files");
        for path in ["one.txt", "sub/two.txt", "sub/deeper/three.bin"] {
            let host = root.join(path);
            std::fs::create_dir_all(host.parent().unwrap())?;
            std::fs::write(host, path)?;
        }

        let reader = Registry::global().reader("dir", root)?;
        assert_eq!(reader.size()?, 3);
        assert_eq!(
            sorted_names(reader.as_ref())?,
            vec!["one.txt", "sub/deeper/three.bin", "sub/two.txt"]
        );
        Ok(())
    }

    #[test]
    fn round_trip_is_byte_identical() -> anyhow::Result<()> {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
        for backend in backends() {
            let temp_dir = setup_test_env();
            let mut writer = (backend.writer)(&temp_dir);
            let entry = writer.new_entry("data/blob.bin")?;
            writer.write_entry(&entry, &payload)?;
            writer.close()?;

            let reader = (backend.reader)(&temp_dir);
            assert_eq!(
                read_entry(reader.as_ref(), "data/blob.bin")?,
                payload,
                "backend {}",
                backend.scheme
            );
        }
        Ok(())
    }

    #[test]
    fn writer_lifecycle_is_enforced() -> anyhow::Result<()> {
        for backend in backends() {
            let temp_dir = setup_test_env();
            let mut writer = (backend.writer)(&temp_dir);
            let entry = writer.new_entry("a.txt")?;
            assert_eq!(entry.stream_state(), Some(StreamState::New));

            assert!(matches!(writer.write(&entry, b"x"), Err(VdmError::IllegalState(_))));
            assert!(matches!(writer.close_entry(&entry), Err(VdmError::IllegalState(_))));

            let _stream = writer.put_entry(&entry)?;
            assert!(matches!(writer.put_entry(&entry), Err(VdmError::IllegalState(_))));
            writer.write(&entry, b"x")?;
            writer.close_entry(&entry)?;
            assert_eq!(entry.stream_state(), Some(StreamState::Closed));
            assert!(matches!(writer.write(&entry, b"y"), Err(VdmError::IllegalState(_))));
            writer.close()?;
        }
        Ok(())
    }

    #[test]
    fn entries_belong_to_their_reader() -> anyhow::Result<()> {
        for backend in backends() {
            let temp_dir = setup_test_env();
            let mut writer = (backend.writer)(&temp_dir);
            let entry = writer.new_entry("owned.txt")?;
            writer.write_entry(&entry, b"mine")?;

            writer.close()?;

            let first = (backend.reader)(&temp_dir);
            let second = (backend.reader)(&temp_dir);
            let entry = first.entry("owned.txt")?;
            assert!(
                matches!(second.input_stream(&entry), Err(VdmError::InvalidArgument(_))),
                "backend {}",
                backend.scheme
            );
            assert!(first.input_stream(&entry).is_ok());
        }
        Ok(())
    }

    #[test]
    fn writer_entries_belong_to_their_writer() -> anyhow::Result<()> {
        let first_store = MapStore::new("first");
        let mut first = MapFactory.writer(Descriptor::handle(first_store))?;
        let mut second = MapFactory.writer(Descriptor::handle(MapStore::new("second")))?;

        let entry = first.new_entry("a")?;
        assert!(matches!(second.put_entry(&entry), Err(VdmError::InvalidArgument(_))));
        assert_eq!(entry.stream_state(), Some(StreamState::New));
        first.write_entry(&entry, b"ok")?;
        Ok(())
    }

    #[test]
    fn closed_reader_rejects_everything() -> anyhow::Result<()> {
        for backend in backends() {
            let temp_dir = setup_test_env();
            let mut writer = (backend.writer)(&temp_dir);
            let entry = writer.new_entry("c.txt")?;
            writer.write_entry(&entry, b"closing")?;
            writer.close()?;

            let mut reader = (backend.reader)(&temp_dir);
            let entry = reader.entry("c.txt")?;
            let mut stream = reader.input_stream(&entry)?;
            reader.close()?;

            assert!(reader.is_closed());
            assert!(stream.is_closed());
            assert!(stream.read(&mut [0u8; 4]).is_err());
            assert!(matches!(reader.entry("c.txt"), Err(VdmError::Closed(_))));
            assert!(matches!(reader.input_stream(&entry), Err(VdmError::Closed(_))));
            assert!(matches!(reader.entries(), Err(VdmError::Closed(_))));
            reader.close()?;
        }
        Ok(())
    }

    #[test]
    fn closed_writer_rejects_everything() -> anyhow::Result<()> {
        for backend in backends() {
            let temp_dir = setup_test_env();
            let mut writer = (backend.writer)(&temp_dir);
            let entry = writer.new_entry("open.txt")?;
            let mut stream = writer.put_entry(&entry)?;
            stream.write_all(b"left open")?;
            writer.close()?;

            assert!(stream.is_closed());
            assert!(stream.write(b"more").is_err());
            assert!(matches!(writer.new_entry("late.txt"), Err(VdmError::Closed(_))));
            assert!(matches!(writer.write(&entry, b"x"), Err(VdmError::Closed(_))));
            writer.close()?;

            let reader = (backend.reader)(&temp_dir);
            assert_eq!(read_entry(reader.as_ref(), "open.txt")?, b"left open");
        }
        Ok(())
    }

    #[test]
    fn dropping_containers_closes_streams() -> anyhow::Result<()> {
        let store = MapStore::new("drop");
        let mut writer = MapFactory.writer(Descriptor::handle(store.clone()))?;
        let entry = writer.new_entry("d.txt")?;
        writer.write_entry(&entry, b"dropped")?;
        drop(writer);

        let reader = MapFactory.reader(Descriptor::handle(store))?;
        let entry = reader.entry("d.txt")?;
        let mut stream = reader.input_stream(&entry)?;
        drop(reader);
        assert!(stream.is_closed());
        assert!(stream.read(&mut [0u8; 1]).is_err());
        Ok(())
    }

    #[test]
    fn comments_round_trip() -> anyhow::Result<()> {
        for backend in backends() {
            let temp_dir = setup_test_env();
            let mut writer = (backend.writer)(&temp_dir);
            writer.set_comment("container note")?;
            let entry = writer.new_entry("n.txt")?;
            writer.write_entry(&entry, b"n")?;
            writer.close()?;

            let reader = (backend.reader)(&temp_dir);
            assert_eq!(reader.comment(), Some("container note"), "backend {}", backend.scheme);
            assert_eq!(reader.size()?, 1);
        }
        Ok(())
    }

    #[test]
    fn failed_descriptor_is_invalid_argument() {
        assert!(matches!(
            Registry::global().reader("dir", Descriptor::handle(5u8)),
            Err(VdmError::InvalidArgument(_))
        ));
        assert!(matches!(
            Registry::global().reader("dir", "/definitely/not/here"),
            Err(VdmError::NotFound(_))
        ));
    }
}
