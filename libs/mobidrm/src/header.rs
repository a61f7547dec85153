//! PalmDOC, MOBI and EXTH header parsing
//!
//! These headers live at the start of Record 0 of a PalmDB/MOBI container.
//! Only the fields the DRM engine or the CLI dump output need are parsed;
//! the rest of Record 0 (text compression dictionaries, image index, etc.)
//! is out of scope.

use crate::crypto::drm::NOT_SET;
use crate::error::MobiError;
use palmutils::io::rdu32be;
use std::io::{Cursor, Read};

const PALMDOC_HEADER_SIZE: usize = 16;

/// The fixed-layout PalmDOC header at the start of Record 0
#[derive(Debug, Clone)]
pub struct PalmDocHeader {
    /// Compression type (1 = none, 2 = PalmDOC, 17480 = HUFF/CDIC)
    pub compression: u16,
    /// Uncompressed text length
    pub text_length: u32,
    /// Number of text records
    pub record_count: u16,
    /// Maximum size of each text record (usually 4096)
    pub record_size: u16,
    /// Encryption type: 0 = none, 1 = old mobipocket, 2+ = cookie-based
    pub encryption_type: u16,
}

impl PalmDocHeader {
    /// Parses the 16-byte PalmDOC header from the start of `record0`
    pub fn parse(record0: &[u8]) -> Result<Self, MobiError> {
        if record0.len() < PALMDOC_HEADER_SIZE {
            return Err(MobiError::DataCorrupt(
                "Record 0 is shorter than a PalmDOC header".into(),
            ));
        }
        let compression = u16::from_be_bytes(record0[0..2].try_into().unwrap());
        let text_length = u32::from_be_bytes(record0[4..8].try_into().unwrap());
        let record_count = u16::from_be_bytes(record0[8..10].try_into().unwrap());
        let record_size = u16::from_be_bytes(record0[10..12].try_into().unwrap());
        let encryption_type = u16::from_be_bytes(record0[12..14].try_into().unwrap());
        Ok(Self {
            compression,
            text_length,
            record_count,
            record_size,
            encryption_type,
        })
    }
}

/// The `type`/`creator` 4-byte tags from the PalmDB database header, which
/// double as the format signature since PalmDB has no dedicated magic cookie
#[derive(Debug, Clone, Copy)]
pub struct FormatTag {
    /// 4-byte type tag, e.g. `*b"TEXt"` or `*b"BOOK"`
    pub type_: [u8; 4],
    /// 4-byte creator tag, e.g. `*b"REAd"` or `*b"MOBI"`
    pub creator: [u8; 4],
}

impl FormatTag {
    /// True for the legacy PalmDOC `TEXt`/`REAd` signature
    pub fn is_text_read(&self) -> bool {
        &self.type_ == b"TEXt" && &self.creator == b"REAd"
    }
}

/// The fixed-layout MOBI header, present iff Record 0 carries the `"MOBI"`
/// identifier at offset 16
#[derive(Debug, Clone)]
pub struct MobiHeader {
    /// Header length in bytes, as recorded in the header itself
    pub header_length: u32,
    /// MOBI format version, or the "not set" sentinel (`0xFFFFFFFF`)
    pub version: u32,
    /// Offset of the DRM table within Record 0, or the "not set" sentinel
    pub drm_offset: u32,
    /// Number of DRM table entries
    pub drm_count: u32,
    /// Total size in bytes of the DRM table
    pub drm_size: u32,
    /// EXTH header flags; bit 6 set means an EXTH header follows this one
    pub exth_flags: u32,
    /// Full name offset within Record 0, or the "not set" sentinel
    pub full_name_offset: u32,
    /// Index of the first image record, or the "not set" sentinel
    pub first_image_index: u32,
}

impl MobiHeader {
    const IDENT_OFFSET: usize = 16;
    const HEADER_LENGTH_OFFSET: usize = 20;
    const VERSION_OFFSET: usize = 36;
    const FULL_NAME_OFFSET_OFFSET: usize = 84;
    const EXTH_FLAGS_OFFSET: usize = 128;
    const DRM_OFFSET_OFFSET: usize = 168;
    const DRM_COUNT_OFFSET: usize = 172;
    const DRM_SIZE_OFFSET: usize = 176;
    const FIRST_IMAGE_INDEX_OFFSET: usize = 108;

    /// True iff Record 0 carries a MOBI header (the `"MOBI"` identifier at
    /// offset 16 within Record 0)
    pub fn is_present(record0: &[u8]) -> bool {
        record0.len() >= Self::IDENT_OFFSET + 4
            && &record0[Self::IDENT_OFFSET..Self::IDENT_OFFSET + 4] == b"MOBI"
    }

    /// Parses the MOBI header from Record 0
    ///
    /// Every field this crate needs is read at its documented fixed offset;
    /// callers must check [`is_present`](Self::is_present) first.
    pub fn parse(record0: &[u8]) -> Result<Self, MobiError> {
        if !Self::is_present(record0) {
            return Err(MobiError::DataCorrupt("MOBI identifier not found".into()));
        }
        let read_u32_at = |off: usize| -> Result<u32, MobiError> {
            record0
                .get(off..off + 4)
                .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
                .ok_or_else(|| MobiError::DataCorrupt(format!("MOBI header truncated at offset {}", off)))
        };

        Ok(Self {
            header_length: read_u32_at(Self::HEADER_LENGTH_OFFSET)?,
            version: read_u32_at(Self::VERSION_OFFSET)?,
            full_name_offset: read_u32_at(Self::FULL_NAME_OFFSET_OFFSET).unwrap_or(NOT_SET),
            first_image_index: read_u32_at(Self::FIRST_IMAGE_INDEX_OFFSET).unwrap_or(NOT_SET),
            exth_flags: read_u32_at(Self::EXTH_FLAGS_OFFSET).unwrap_or(0),
            drm_offset: read_u32_at(Self::DRM_OFFSET_OFFSET).unwrap_or(NOT_SET),
            drm_count: read_u32_at(Self::DRM_COUNT_OFFSET).unwrap_or(0),
            drm_size: read_u32_at(Self::DRM_SIZE_OFFSET).unwrap_or(0),
        })
    }

    /// True iff the EXTH header flag (bit 6) is set
    pub fn has_exth(&self) -> bool {
        self.exth_flags & 0x40 != 0
    }
}

/// One EXTH record: a type tag paired with its raw byte payload
#[derive(Debug, Clone)]
pub struct ExthRecord {
    /// The record's numeric type tag (meaning defined by the MOBI spec, not
    /// interpreted here)
    pub record_type: u32,
    /// The record's raw payload
    pub data: Vec<u8>,
}

/// The parsed EXTH (extended) header: a sequence of type-tagged byte blobs
/// following the MOBI header
#[derive(Debug, Clone)]
pub struct ExthHeader {
    /// Total length of the EXTH header in bytes, as recorded on disk
    pub header_length: u32,
    /// The parsed records, in on-disk order
    pub records: Vec<ExthRecord>,
}

impl ExthHeader {
    /// Parses an EXTH header starting at `offset` within `record0`
    pub fn parse(record0: &[u8], offset: usize) -> Result<Self, MobiError> {
        let mut cursor = Cursor::new(
            record0
                .get(offset..)
                .ok_or_else(|| MobiError::DataCorrupt("EXTH offset past end of Record 0".into()))?,
        );
        let mut ident = [0u8; 4];
        cursor.read_exact(&mut ident).map_err(MobiError::from)?;
        if &ident != b"EXTH" {
            return Err(MobiError::DataCorrupt("EXTH identifier not found".into()));
        }
        let header_length = rdu32be(&mut cursor)?;
        let record_count = rdu32be(&mut cursor)?;

        let mut records = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let record_type = rdu32be(&mut cursor)?;
            let record_length = rdu32be(&mut cursor)?;
            let data_length = (record_length as usize)
                .checked_sub(8)
                .ok_or_else(|| MobiError::DataCorrupt("EXTH record length underflow".into()))?;
            let mut data = vec![0u8; data_length];
            cursor.read_exact(&mut data).map_err(MobiError::from)?;
            records.push(ExthRecord { record_type, data });
        }

        Ok(Self {
            header_length,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palmdoc_bytes(encryption_type: u16) -> Vec<u8> {
        let mut buf = vec![0u8; PALMDOC_HEADER_SIZE];
        buf[0..2].copy_from_slice(&2u16.to_be_bytes()); // compression
        buf[12..14].copy_from_slice(&encryption_type.to_be_bytes());
        buf
    }

    #[test]
    fn parses_palmdoc_header() {
        let buf = palmdoc_bytes(2);
        let h = PalmDocHeader::parse(&buf).unwrap();
        assert_eq!(h.encryption_type, 2);
        assert_eq!(h.compression, 2);
    }

    #[test]
    fn detects_missing_mobi_header() {
        let buf = palmdoc_bytes(1);
        assert!(!MobiHeader::is_present(&buf));
    }

    #[test]
    fn parses_mobi_header_with_drm_fields() {
        let mut buf = vec![0u8; 200];
        buf[16..20].copy_from_slice(b"MOBI");
        buf[20..24].copy_from_slice(&232u32.to_be_bytes()); // header_length
        buf[36..40].copy_from_slice(&6u32.to_be_bytes()); // version
        buf[168..172].copy_from_slice(&NOT_SET.to_be_bytes()); // drm_offset
        assert!(MobiHeader::is_present(&buf));
        let mh = MobiHeader::parse(&buf).unwrap();
        assert_eq!(mh.header_length, 232);
        assert_eq!(mh.version, 6);
        assert_eq!(mh.drm_offset, NOT_SET);
        assert_eq!(mh.drm_count, 0);
    }

    #[test]
    fn text_read_tag_detection() {
        let tag = FormatTag {
            type_: *b"TEXt",
            creator: *b"REAd",
        };
        assert!(tag.is_text_read());
        let other = FormatTag {
            type_: *b"BOOK",
            creator: *b"MOBI",
        };
        assert!(!other.is_text_read());
    }
}
