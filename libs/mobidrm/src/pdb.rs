//! The *PalmDB* container reader
//!
//! Provides access to the database header and record list of a PalmDB file,
//! the outer container that holds Mobipocket/KF7/KF8 e-books. Record 0 of a
//! MOBI book carries the PalmDOC/MOBI/EXTH headers and (if present) the DRM
//! table; every other record is raw text or image data.

use crate::error::MobiError;
use palmutils::io::{rdu16be, rdu32be};
use std::cell::RefCell;
use std::io::{self, Read, Seek};

const PALMDB_HEADER_SIZE: u64 = 78;
const NAME_LEN: usize = 32;
const RECORD_ENTRY_SIZE: u64 = 8;

/// One entry of the PalmDB record list
#[derive(Debug, Clone, Copy)]
pub struct RecordInfo {
    /// Byte offset of the record's data within the file
    pub offset: u32,
    /// Record attributes bitfield
    pub attributes: u8,
    /// The record's 3-byte unique ID
    pub unique_id: [u8; 3],
}

/// The fixed-layout PalmDB database header
#[derive(Debug, Clone)]
pub struct PalmDbHeader {
    /// Database name, NUL-padded to 32 bytes on disk, trimmed here
    pub name: String,
    /// Database attribute flags
    pub attributes: u16,
    /// Database version
    pub version: u16,
    /// Creation time (seconds since the PalmDB epoch, 1904-01-01)
    pub creation_time: u32,
    /// Last modification time (seconds since the PalmDB epoch)
    pub modification_time: u32,
    /// Last backup time (seconds since the PalmDB epoch)
    pub backup_time: u32,
    /// Modification number
    pub modification_number: u32,
    /// Offset to application info, 0 if absent
    pub app_info_id: u32,
    /// Offset to sort info, 0 if absent
    pub sort_info_id: u32,
    /// 4-byte database type tag (e.g. `"BOOK"` or `"TEXt"`)
    pub type_: [u8; 4],
    /// 4-byte creator tag (e.g. `"MOBI"` or `"REAd"`)
    pub creator: [u8; 4],
    /// Unique ID seed
    pub unique_id_seed: u32,
    /// Next record list ID (always 0 on disk)
    pub next_record_list_id: u32,
    /// The record list
    pub records: Vec<RecordInfo>,
}

/// The parser and record reader for PalmDB containers
///
/// # Examples
/// ```no_run
/// use mobidrm::PalmDb;
/// use std::fs::File;
/// use std::io::BufReader;
///
/// let f = File::open("book.mobi").unwrap();
/// let pdb = PalmDb::new(BufReader::new(f)).unwrap();
/// let record0 = pdb.record0().unwrap();
/// println!("record 0 is {} bytes", record0.len());
/// ```
pub struct PalmDb<R: Read + Seek> {
    internal: PalmDbCore<R>,
}

impl<R: Read + Seek> PalmDb<R> {
    /// Parses a PalmDB container and reads its full record list
    pub fn new(reader: R) -> Result<Self, MobiError> {
        Ok(Self {
            internal: PalmDbCore::new(reader)?,
        })
    }

    /// The parsed database header, including the record list
    pub fn header(&self) -> &PalmDbHeader {
        &self.internal.header
    }

    /// Lists the anomalies detected while parsing the container
    pub fn anomalies(&self) -> &[String] {
        self.internal.anomalies.as_slice()
    }

    /// The number of records in the container
    pub fn num_records(&self) -> usize {
        self.internal.header.records.len()
    }

    /// Reads and returns the full bytes of record `index`
    pub fn record(&self, index: usize) -> Result<Vec<u8>, MobiError> {
        self.internal.read_record(index)
    }

    /// Reads and returns the full bytes of record 0
    ///
    /// Record 0 is where MOBI books store the PalmDOC/MOBI/EXTH headers and
    /// the DRM table; it is always expected to be present.
    pub fn record0(&self) -> Result<Vec<u8>, MobiError> {
        if self.internal.header.records.is_empty() {
            return Err(MobiError::DataCorrupt("container has no records".into()));
        }
        self.record(0)
    }
}

struct PalmDbCore<R: Read + Seek> {
    f: RefCell<R>,
    anomalies: Vec<String>,
    header: PalmDbHeader,
    file_size: u64,
}

impl<R: Read + Seek> PalmDbCore<R> {
    fn new(mut f: R) -> Result<Self, MobiError> {
        let file_size = f.seek(io::SeekFrom::End(0))?;
        f.seek(io::SeekFrom::Start(0))?;

        if file_size < PALMDB_HEADER_SIZE {
            return Err(MobiError::DataCorrupt(
                "file is shorter than a PalmDB header".into(),
            ));
        }

        let mut anomalies = Vec::new();

        let mut namebuf = [0u8; NAME_LEN];
        f.read_exact(&mut namebuf)?;
        let name_end = namebuf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&namebuf[..name_end]).into_owned();

        let attributes = rdu16be(&mut f)?;
        let version = rdu16be(&mut f)?;
        let creation_time = rdu32be(&mut f)?;
        let modification_time = rdu32be(&mut f)?;
        let backup_time = rdu32be(&mut f)?;
        let modification_number = rdu32be(&mut f)?;
        let app_info_id = rdu32be(&mut f)?;
        let sort_info_id = rdu32be(&mut f)?;

        let mut type_ = [0u8; 4];
        f.read_exact(&mut type_)?;
        let mut creator = [0u8; 4];
        f.read_exact(&mut creator)?;

        let unique_id_seed = rdu32be(&mut f)?;
        let next_record_list_id = rdu32be(&mut f)?;
        if next_record_list_id != 0 {
            anomalies.push(format!(
                "next record list id is {} instead of 0",
                next_record_list_id
            ));
        }

        let num_records = rdu16be(&mut f)?;
        let mut records = Vec::with_capacity(num_records as usize);
        for i in 0..num_records {
            let remaining_bytes = file_size.saturating_sub(f.stream_position()?);
            if remaining_bytes < RECORD_ENTRY_SIZE {
                anomalies.push(format!(
                    "record list truncated after {} of {} entries",
                    i, num_records
                ));
                break;
            }
            let offset = rdu32be(&mut f)?;
            let mut attr_and_id = [0u8; 4];
            f.read_exact(&mut attr_and_id)?;
            records.push(RecordInfo {
                offset,
                attributes: attr_and_id[0],
                unique_id: [attr_and_id[1], attr_and_id[2], attr_and_id[3]],
            });
        }

        for w in records.windows(2) {
            if w[1].offset < w[0].offset {
                anomalies.push("record list offsets are not monotonically increasing".into());
                break;
            }
        }
        for r in &records {
            if u64::from(r.offset) > file_size {
                anomalies.push(format!(
                    "record at offset {} lies past the end of the file",
                    r.offset
                ));
            }
        }

        let header = PalmDbHeader {
            name,
            attributes,
            version,
            creation_time,
            modification_time,
            backup_time,
            modification_number,
            app_info_id,
            sort_info_id,
            type_,
            creator,
            unique_id_seed,
            next_record_list_id,
            records,
        };

        Ok(Self {
            f: RefCell::new(f),
            anomalies,
            header,
            file_size,
        })
    }

    fn read_record(&self, index: usize) -> Result<Vec<u8>, MobiError> {
        let record = *self
            .header
            .records
            .get(index)
            .ok_or_else(|| MobiError::DataCorrupt(format!("record {} does not exist", index)))?;
        let next_offset = self
            .header
            .records
            .get(index + 1)
            .map(|r| u64::from(r.offset))
            .unwrap_or(self.file_size);
        let start = u64::from(record.offset);
        let size = next_offset
            .checked_sub(start)
            .ok_or_else(|| MobiError::DataCorrupt("record size underflow".into()))?;
        let size = usize::try_from(size)
            .map_err(|_| MobiError::DataCorrupt("record size overflow".into()))?;

        let mut f = self.f.borrow_mut();
        f.seek(io::SeekFrom::Start(start))?;
        let mut buf = vec![0u8; size];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }
}
