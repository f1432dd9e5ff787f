use std::io::{Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{TimeZone, Utc};

use super::*;

fn build(records: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
    let mut writer = ZipStreamWriter::new(Vec::new());
    for (name, data, method) in records {
        let options = RecordOptions {
            method: *method,
            ..RecordOptions::default()
        };
        writer.start_record(name, options).unwrap();
        writer.write_data(data).unwrap();
        writer.finish_record().unwrap();
    }
    writer.finish().unwrap();
    writer.into_inner()
}

fn read_record(archive: &ZipArchive, name: &str) -> Vec<u8> {
    let record = archive.by_name(name).unwrap();
    let mut content = Vec::new();
    archive
        .open_record(record)
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    content
}

mod writer {
    use super::*;

    #[test]
    fn test_stored_and_deflated_records() {
        let big = vec![b'z'; 64 * 1024];
        let bytes = build(&[
            ("plain.txt", &b"stored content"[..], CompressionMethod::Stored),
            ("big.bin", &big[..], CompressionMethod::Deflate),
        ]);

        let archive = ZipArchive::from_bytes("mem.zip", bytes).unwrap();
        assert_eq!(archive.records().len(), 2);
        assert_eq!(read_record(&archive, "plain.txt"), b"stored content");
        assert_eq!(read_record(&archive, "big.bin"), big);

        let deflated = archive.by_name("big.bin").unwrap();
        assert_eq!(deflated.compression_method, CompressionMethod::Deflate);
        assert!(deflated.compressed_size < deflated.uncompressed_size);
    }

    #[test]
    fn test_second_record_while_open_is_rejected() {
        let mut writer = ZipStreamWriter::new(Vec::new());
        writer.start_record("1.txt", RecordOptions::default()).unwrap();
        let result = writer.start_record("2.txt", RecordOptions::default());
        assert!(matches!(result, Err(ZipError::RecordInProgress(name)) if name == "1.txt"));
    }

    #[test]
    fn test_data_without_record_is_rejected() {
        let mut writer = ZipStreamWriter::new(Vec::new());
        assert!(matches!(writer.write_data(b"x"), Err(ZipError::NoRecord)));
        assert!(matches!(writer.finish_record(), Err(ZipError::NoRecord)));
    }

    #[test]
    fn test_finish_twice() {
        let mut writer = ZipStreamWriter::new(Vec::new());
        writer.finish().unwrap();
        assert!(matches!(writer.finish(), Err(ZipError::Finished)));
        assert!(matches!(
            writer.start_record("late", RecordOptions::default()),
            Err(ZipError::Finished)
        ));
    }

    #[test]
    fn test_duplicate_name_replaces_record() {
        let bytes = build(&[
            ("same.txt", &b"first"[..], CompressionMethod::Deflate),
            ("same.txt", &b"second"[..], CompressionMethod::Deflate),
        ]);
        let archive = ZipArchive::from_bytes("dup.zip", bytes).unwrap();
        assert_eq!(archive.records().len(), 1);
        assert_eq!(read_record(&archive, "same.txt"), b"second");
    }

    #[test]
    fn test_comments_and_timestamps() {
        let modified = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap();
        let mut writer = ZipStreamWriter::new(Vec::new());
        writer.set_comment("archive note");
        writer
            .start_record(
                "a.txt",
                RecordOptions {
                    comment: Some("entry note".into()),
                    modified,
                    ..RecordOptions::default()
                },
            )
            .unwrap();
        writer.write_data(b"a").unwrap();
        writer.finish_record().unwrap();
        writer.finish().unwrap();

        let archive = ZipArchive::from_bytes("c.zip", writer.into_inner()).unwrap();
        assert_eq!(archive.comment(), "archive note");
        let record = archive.by_name("a.txt").unwrap();
        assert_eq!(record.comment, "entry note");
        // DOS time has a two second resolution.
        assert_eq!(
            record.last_modified(),
            Some(Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap())
        );
    }

    #[test]
    fn test_directory_record() {
        let mut writer = ZipStreamWriter::new(Vec::new());
        writer.start_record("docs/", RecordOptions::default()).unwrap();
        assert!(writer.write_data(b"nope").is_err());
        writer.finish_record().unwrap();
        writer.finish().unwrap();

        let archive = ZipArchive::from_bytes("d.zip", writer.into_inner()).unwrap();
        let record = archive.by_name("docs").unwrap();
        assert!(record.is_directory);
        assert_eq!(record.compression_method, CompressionMethod::Stored);
    }

    #[test]
    fn test_oversized_fields_are_rejected_before_writing() {
        let mut writer = ZipStreamWriter::new(Vec::new());
        writer.start_record("good.txt", RecordOptions::default()).unwrap();
        writer.write_data(b"kept").unwrap();
        writer.finish_record().unwrap();
        let written = writer.get_ref().len();

        let long_comment = RecordOptions {
            comment: Some("c".repeat(70_000)),
            ..RecordOptions::default()
        };
        assert!(matches!(
            writer.start_record("bad.txt", long_comment),
            Err(ZipError::TooLarge(_))
        ));
        let long_name = "n".repeat(70_000);
        assert!(matches!(
            writer.start_record(&long_name, RecordOptions::default()),
            Err(ZipError::TooLarge(_))
        ));
        assert!(!writer.is_record_open());
        assert_eq!(writer.get_ref().len(), written);

        writer.finish().unwrap();
        let archive = ZipArchive::from_bytes("limits.zip", writer.into_inner()).unwrap();
        assert_eq!(archive.records().len(), 1);
        assert_eq!(read_record(&archive, "good.txt"), b"kept");
    }

    #[test]
    fn test_record_count_limit() {
        let stored = || RecordOptions {
            method: CompressionMethod::Stored,
            ..RecordOptions::default()
        };
        let mut writer = ZipStreamWriter::new(Vec::new());
        for i in 0..MAX_RECORDS {
            writer.start_record(&i.to_string(), stored()).unwrap();
            writer.finish_record().unwrap();
        }

        assert!(matches!(
            writer.start_record("one-too-many", stored()),
            Err(ZipError::TooLarge(_))
        ));
        // Replacing an existing name does not grow the directory.
        writer.start_record("0", stored()).unwrap();
        writer.write_data(b"again").unwrap();
        writer.finish_record().unwrap();
        writer.finish().unwrap();

        let archive = ZipArchive::from_bytes("many.zip", writer.into_inner()).unwrap();
        assert_eq!(archive.records().len(), MAX_RECORDS);
        assert_eq!(read_record(&archive, "0"), b"again");
    }
}

mod reader {
    use super::*;

    #[test]
    fn test_not_a_zip() {
        let result = ZipArchive::from_bytes("junk", b"definitely not an archive".to_vec());
        assert!(matches!(result, Err(ZipError::Malformed(_))));
    }

    #[test]
    fn test_too_small() {
        let result = ZipArchive::from_bytes("tiny", vec![0u8; 4]);
        assert!(matches!(result, Err(ZipError::Malformed(_))));
    }

    #[test]
    fn test_empty_archive() {
        let bytes = build(&[]);
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        let archive = ZipArchive::from_bytes("empty.zip", bytes).unwrap();
        assert!(archive.records().is_empty());
    }

    #[test]
    fn test_crc_mismatch_is_reported() {
        let mut bytes = build(&[("a.txt", &b"abcdef"[..], CompressionMethod::Stored)]);
        // The stored data starts right after the 30-byte local header and the name.
        let data_start = LFH_SIZE + "a.txt".len();
        bytes[data_start] = b'X';

        let archive = ZipArchive::from_bytes("bad.zip", bytes).unwrap();
        let record = archive.by_name("a.txt").unwrap();
        let mut content = Vec::new();
        let err = archive
            .open_record(record)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_by_name_lookup() {
        let bytes = build(&[
            ("x", &b"1"[..], CompressionMethod::Stored),
            ("y", &b"2"[..], CompressionMethod::Stored),
        ]);
        let archive = ZipArchive::from_bytes("n.zip", bytes).unwrap();
        assert!(archive.by_name("x").is_some());
        assert!(archive.by_name("z").is_none());
    }

    #[test]
    fn test_record_names_are_normalized() {
        let bytes = build(&[
            ("./dir/x.txt", &b"first"[..], CompressionMethod::Stored),
            ("win\\path.txt", &b"w"[..], CompressionMethod::Stored),
            ("/rooted.txt", &b"r"[..], CompressionMethod::Stored),
            ("dir/x.txt", &b"second"[..], CompressionMethod::Stored),
            ("../outside.txt", &b"o"[..], CompressionMethod::Stored),
        ]);
        let archive = ZipArchive::from_bytes("names.zip", bytes).unwrap();
        let names: Vec<&str> = archive
            .records()
            .iter()
            .map(|r| r.file_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["win/path.txt", "rooted.txt", "dir/x.txt", "../outside.txt"]
        );
        assert_eq!(read_record(&archive, "dir/x.txt"), b"second");
    }

    /// One STORED record whose sizes and header offset live in the ZIP64
    /// extra field, listed through a ZIP64 EOCD and its locator.
    fn zip64_archive(name: &str, data: &[u8]) -> Vec<u8> {
        let crc = crc32fast::hash(data);
        let mut out = Vec::new();

        out.write_all(LFH_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0x21).unwrap();
        out.write_u32::<LittleEndian>(crc).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_all(name.as_bytes()).unwrap();
        out.write_all(data).unwrap();

        let cd_offset = out.len() as u64;
        out.write_all(CDFH_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0x21).unwrap();
        out.write_u32::<LittleEndian>(crc).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(4 + 24).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_all(name.as_bytes()).unwrap();
        out.write_u16::<LittleEndian>(0x0001).unwrap();
        out.write_u16::<LittleEndian>(24).unwrap();
        out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
        out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap();
        let cd_size = out.len() as u64 - cd_offset;

        let eocd64_offset = out.len() as u64;
        out.write_all(Zip64EOCD::SIGNATURE).unwrap();
        out.write_u64::<LittleEndian>(Zip64EOCD::MIN_SIZE as u64 - 12).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(1).unwrap();
        out.write_u64::<LittleEndian>(1).unwrap();
        out.write_u64::<LittleEndian>(cd_size).unwrap();
        out.write_u64::<LittleEndian>(cd_offset).unwrap();

        out.write_all(Zip64EOCDLocator::SIGNATURE).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(eocd64_offset).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();

        out.write_all(EndOfCentralDirectory::SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0xFFFF).unwrap();
        out.write_u16::<LittleEndian>(0xFFFF).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out
    }

    #[test]
    fn test_zip64_directory() {
        let bytes = zip64_archive("big/one.txt", b"zip64 body");
        let parser = ZipParser::new(std::sync::Arc::new(bytes.clone()));
        let (eocd, offset) = parser.find_eocd().unwrap();
        assert!(eocd.is_zip64());
        let eocd64 = parser.read_zip64_eocd(offset).unwrap();
        assert_eq!(eocd64.total_entries, 1);

        let archive = ZipArchive::from_bytes("z64.zip", bytes).unwrap();
        let record = archive.by_name("big/one.txt").unwrap();
        assert_eq!(record.uncompressed_size, 10);
        assert_eq!(record.compressed_size, 10);
        assert_eq!(record.lfh_offset, 0);
        assert_eq!(read_record(&archive, "big/one.txt"), b"zip64 body");
    }

    #[test]
    fn test_zip64_without_locator() {
        let mut bytes = zip64_archive("a", b"x");
        let eocd_start = bytes.len() - EndOfCentralDirectory::SIZE;
        // Break the locator signature.
        bytes[eocd_start - Zip64EOCDLocator::SIZE] = b'X';
        assert!(matches!(
            ZipArchive::from_bytes("broken.zip", bytes),
            Err(ZipError::Malformed(_))
        ));
    }
}

mod structures {
    use super::*;

    #[test]
    fn test_dos_datetime_clamps() {
        let early = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(dos_datetime(&early), (0, 0x21));

        let at = Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 2).unwrap();
        assert_eq!(dos_datetime(&at), (1, 0x21));
    }

    #[test]
    fn test_compression_method_codes() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_u16(12).as_u16(), 12);
    }
}
