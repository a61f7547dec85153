//! The host container: parses a PalmDB/MOBI file and drives DRM key recovery
//! and text-record decryption

use crate::crypto::drm::{self, V1KeySource};
use crate::crypto::{pc1, pid};
use crate::error::MobiError;
use crate::header::{ExthHeader, FormatTag, MobiHeader, PalmDocHeader};
use crate::pdb::PalmDb;
use std::io::{Read, Seek};
use tracing::debug;
use zeroize::Zeroize;

/// A recovered 16-byte DRM key
///
/// Zeroized on drop so that the plaintext key does not linger in memory
/// longer than the handle that owns it.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct BookKey([u8; pc1::KEY_SIZE]);

impl BookKey {
    /// Returns the key's raw bytes
    pub fn as_bytes(&self) -> &[u8; pc1::KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BookKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BookKey(***)")
    }
}

impl std::fmt::LowerHex for BookKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for v in &self.0 {
            write!(f, "{:02x}", v)?
        }
        Ok(())
    }
}

/// A parsed Mobipocket/KF7/KF8 book, with its DRM key state
///
/// # Examples
/// ```no_run
/// use mobidrm::Book;
/// use std::fs::File;
/// use std::io::BufReader;
///
/// let f = File::open("book.mobi").unwrap();
/// let mut book = Book::new(BufReader::new(f)).unwrap();
/// book.set_key(None).unwrap(); // encryption_type == 0: no-op success
/// ```
pub struct Book<R: Read + Seek> {
    pdb: PalmDb<R>,
    record0: Vec<u8>,
    palmdoc: PalmDocHeader,
    mobi: Option<MobiHeader>,
    exth: Option<ExthHeader>,
    format_tag: FormatTag,
    key: Option<BookKey>,
}

impl<R: Read + Seek> Book<R> {
    /// Opens a PalmDB container and parses its PalmDOC/MOBI/EXTH headers
    ///
    /// Fails with [`MobiError::DataCorrupt`] if Record 0 is missing or too
    /// short to carry a PalmDOC header.
    pub fn new(reader: R) -> Result<Self, MobiError> {
        let pdb = PalmDb::new(reader)?;
        for anomaly in pdb.anomalies() {
            debug!("PalmDB anomaly: {}", anomaly);
        }
        let record0 = pdb.record0()?;
        let palmdoc = PalmDocHeader::parse(&record0)?;
        let mobi = if MobiHeader::is_present(&record0) {
            Some(MobiHeader::parse(&record0)?)
        } else {
            None
        };
        let exth = match &mobi {
            Some(mh) if mh.has_exth() => {
                let offset = 16 + mh.header_length as usize;
                ExthHeader::parse(&record0, offset).ok()
            }
            _ => None,
        };
        let format_tag = FormatTag {
            type_: pdb.header().type_,
            creator: pdb.header().creator,
        };

        Ok(Self {
            pdb,
            record0,
            palmdoc,
            mobi,
            exth,
            format_tag,
            key: None,
        })
    }

    /// The parsed PalmDOC header
    pub fn palmdoc_header(&self) -> &PalmDocHeader {
        &self.palmdoc
    }

    /// The parsed MOBI header, if Record 0 carried one
    pub fn mobi_header(&self) -> Option<&MobiHeader> {
        self.mobi.as_ref()
    }

    /// The parsed EXTH header, if present
    pub fn exth_header(&self) -> Option<&ExthHeader> {
        self.exth.as_ref()
    }

    /// The underlying PalmDB container
    pub fn container(&self) -> &PalmDb<R> {
        &self.pdb
    }

    /// True if a DRM key is currently stored
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// The stored DRM key, if any
    pub fn key(&self) -> Option<&BookKey> {
        self.key.as_ref()
    }

    /// Attempts to recover the DRM key, dispatching on the PalmDOC header's
    /// `encryption_type`
    ///
    /// - `0`: succeeds without setting a key.
    /// - `1`: `pid` is ignored; the key is read from one of three fixed
    ///   offsets in Record 0 and decrypted with `KEYVEC1_V1`.
    /// - `2+`: `pid` is required and must be a valid 10-byte PID; the cookie
    ///   table is walked to find a matching, verifying entry.
    ///
    /// A failed call leaves the book in the "no key" state regardless of any
    /// key that was previously stored.
    pub fn set_key(&mut self, pid: Option<&[u8]>) -> Result<(), MobiError> {
        self.key = None;
        match self.palmdoc.encryption_type {
            0 => Ok(()),
            1 => {
                let source = if self.format_tag.is_text_read() {
                    V1KeySource::TextRead
                } else {
                    match &self.mobi {
                        None => V1KeySource::NoMobiVersion,
                        Some(mh) if mh.version == drm::NOT_SET => V1KeySource::NoMobiVersion,
                        Some(mh) => V1KeySource::Mobi {
                            header_length: mh.header_length,
                        },
                    }
                };
                let key = drm::recover_v1(&self.record0, source)?;
                self.key = Some(BookKey(key));
                Ok(())
            }
            _ => {
                let pid = pid.ok_or(MobiError::InitFailed("PID is required for this book"))?;
                pid::validate(pid)?;
                let pid_arr: [u8; pid::PID_SIZE] = pid
                    .try_into()
                    .map_err(|_| MobiError::PidInvalid)?;

                let (drm_offset, drm_count, drm_size) = match &self.mobi {
                    Some(mh) => (mh.drm_offset, mh.drm_count, mh.drm_size),
                    None => {
                        return Err(MobiError::DataCorrupt(
                            "no MOBI header to source the DRM table from".into(),
                        ))
                    }
                };
                let table = drm::parse_table(&self.record0, drm_offset, drm_count, drm_size)?;
                let key = drm::recover_v2(&pid_arr, &table)?;
                self.key = Some(BookKey(key));
                Ok(())
            }
        }
    }

    /// Drops the stored key, if any; a no-op if no key is set
    pub fn delete_key(&mut self) {
        self.key = None;
    }

    /// Decrypts `ciphertext` with the stored DRM key, running the PC1 cipher
    ///
    /// Fails with [`MobiError::InitFailed`] if no key is currently set.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, MobiError> {
        let key = self
            .key
            .as_ref()
            .ok_or(MobiError::InitFailed("no DRM key set"))?;
        pc1::decrypt_to_vec(ciphertext, key.as_bytes())
    }
}
