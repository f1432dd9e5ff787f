use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use super::{ZipError, ZipResult};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flags written on every record:
/// bit 3 (sizes in a trailing data descriptor) and bit 11 (UTF-8 names).
pub const WRITER_FLAGS: u16 = 0x0808;
/// "Version made by": UNIX host, format version 2.0.
pub const VERSION_MADE_BY: u16 = 0x0314;
pub const VERSION_NEEDED: u16 = 20;

const DIR_EXTERNAL_ATTRS: u32 = (0o40755 << 16) | 0x10;
const FILE_EXTERNAL_ATTRS: u32 = 0o100644 << 16;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Malformed("invalid end of central directory".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Single-disk EOCD for an archive written by this crate.
    pub fn for_records(records: usize, cd_size: u64, cd_offset: u64, comment: &str) -> ZipResult<Self> {
        let entries = u16::try_from(records)
            .map_err(|_| ZipError::TooLarge(format!("{records} records")))?;
        Ok(Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: u32::try_from(cd_size)
                .map_err(|_| ZipError::TooLarge("central directory".into()))?,
            cd_offset: u32::try_from(cd_offset)
                .map_err(|_| ZipError::TooLarge("central directory offset".into()))?,
            comment_len: u16::try_from(comment.len())
                .map_err(|_| ZipError::TooLarge("archive comment".into()))?,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W, comment: &str) -> ZipResult<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        out.write_all(comment.as_bytes())?;
        Ok(())
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Malformed("invalid ZIP64 locator".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Malformed("invalid ZIP64 end of central directory".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Data descriptor following the data of a record written with flag bit 3.
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub comment: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Modification timestamp, `None` when the DOS fields do not form a valid date.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
            .and_hms_opt(hour as u32, minute as u32, second as u32)
            .map(|naive| naive.and_utc())
    }

    /// Writes the central directory header of this record.
    pub fn write_central_header<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        let too_large = |what: &str| ZipError::TooLarge(format!("{what} of `{}`", self.file_name));
        let compressed = u32::try_from(self.compressed_size).map_err(|_| too_large("size"))?;
        let uncompressed = u32::try_from(self.uncompressed_size).map_err(|_| too_large("size"))?;
        let offset = u32::try_from(self.lfh_offset).map_err(|_| too_large("offset"))?;
        let name_len = u16::try_from(self.file_name.len()).map_err(|_| too_large("name"))?;
        let comment_len = u16::try_from(self.comment.len()).map_err(|_| too_large("comment"))?;
        let external_attrs = if self.is_directory {
            DIR_EXTERNAL_ATTRS
        } else {
            FILE_EXTERNAL_ATTRS
        };

        out.write_all(CDFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(compressed)?;
        out.write_u32::<LittleEndian>(uncompressed)?;
        out.write_u16::<LittleEndian>(name_len)?;
        out.write_u16::<LittleEndian>(0)?; // extra field
        out.write_u16::<LittleEndian>(comment_len)?;
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(0)?; // internal attributes
        out.write_u32::<LittleEndian>(external_attrs)?;
        out.write_u32::<LittleEndian>(offset)?;
        out.write_all(self.file_name.as_bytes())?;
        out.write_all(self.comment.as_bytes())?;
        Ok(())
    }
}

/// Local header of a record whose sizes and CRC follow in a data descriptor.
pub fn write_local_header<W: Write>(
    out: &mut W,
    name: &str,
    method: CompressionMethod,
    (time, date): (u16, u16),
) -> ZipResult<()> {
    let name_len = u16::try_from(name.len())
        .map_err(|_| ZipError::TooLarge(format!("name `{name}`")))?;

    out.write_all(LFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    out.write_u16::<LittleEndian>(WRITER_FLAGS)?;
    out.write_u16::<LittleEndian>(method.as_u16())?;
    out.write_u16::<LittleEndian>(time)?;
    out.write_u16::<LittleEndian>(date)?;
    out.write_u32::<LittleEndian>(0)?; // crc, in descriptor
    out.write_u32::<LittleEndian>(0)?; // compressed size, in descriptor
    out.write_u32::<LittleEndian>(0)?; // uncompressed size, in descriptor
    out.write_u16::<LittleEndian>(name_len)?;
    out.write_u16::<LittleEndian>(0)?;
    out.write_all(name.as_bytes())?;
    Ok(())
}

pub fn write_data_descriptor<W: Write>(out: &mut W, crc32: u32, compressed: u32, uncompressed: u32) -> ZipResult<()> {
    out.write_all(DATA_DESCRIPTOR_SIGNATURE)?;
    out.write_u32::<LittleEndian>(crc32)?;
    out.write_u32::<LittleEndian>(compressed)?;
    out.write_u32::<LittleEndian>(uncompressed)?;
    Ok(())
}

/// Encodes a timestamp as DOS `(time, date)`. Dates outside 1980..=2107 are clamped.
pub fn dos_datetime(at: &DateTime<Utc>) -> (u16, u16) {
    if at.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    if at.year() > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }
    let time = ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2);
    let date = (((at.year() - 1980) as u16) << 9) | ((at.month() as u16) << 5) | at.day() as u16;
    (time, date)
}
