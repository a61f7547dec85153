//! DRM record table parsing and the key-recovery engine

use crate::crypto::pc1;
use crate::crypto::pid;
use crate::crypto::{KEYVEC1, KEYVEC1_V1};
use crate::error::MobiError;

/// Sentinel marking an absent optional `u32` header field
pub const NOT_SET: u32 = 0xFFFF_FFFF;

/// The on-disk stride, in bytes, of one DRM table entry
const ENTRY_SIZE: usize = 48;

/// The size in bytes of an encrypted cookie
const COOKIE_SIZE: usize = 32;

/// A single parsed entry of the DRM cookie descriptor table
///
/// `cookie` references into the Record 0 buffer the table was parsed from
/// rather than owning its bytes; it remains valid only as long as that buffer
/// is retained.
#[derive(Debug, Clone, Copy)]
pub struct DrmEntry<'a> {
    /// Verification value expected inside the decrypted cookie
    pub verification: u32,
    /// Size field, unused by key recovery but carried for completeness
    pub size: u32,
    /// Type field, unused by key recovery but carried for completeness
    pub type_: u32,
    /// Checksum of the key that is expected to decrypt this cookie
    pub checksum: u8,
    /// The 32-byte ciphertext cookie
    pub cookie: &'a [u8; COOKIE_SIZE],
}

/// Parses the DRM cookie descriptor table out of Record 0
///
/// Returns an empty table if `drm_offset` is the "not set" sentinel,
/// `drm_count` is zero, or the table would run past the end of `record0`
/// (a soft guard, not a parse failure). Fails with [`MobiError::MallocFailed`]
/// if `drm_count` entries cannot be reserved up front (a huge, corrupt count
/// read directly off disk, with no upper bound of its own).
pub fn parse_table(
    record0: &[u8],
    drm_offset: u32,
    drm_count: u32,
    drm_size: u32,
) -> Result<Vec<DrmEntry<'_>>, MobiError> {
    if drm_offset == NOT_SET || drm_count == 0 {
        return Ok(Vec::new());
    }
    let record0_size = record0.len() as u64;
    let end = u64::from(drm_offset) + u64::from(drm_size);
    if end > record0_size {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    entries
        .try_reserve(drm_count as usize)
        .map_err(|_| MobiError::MallocFailed)?;
    let mut pos = drm_offset as usize;
    for _ in 0..drm_count {
        if pos + ENTRY_SIZE > record0.len() {
            break;
        }
        let verification = u32::from_be_bytes(record0[pos..pos + 4].try_into().unwrap());
        let size = u32::from_be_bytes(record0[pos + 4..pos + 8].try_into().unwrap());
        let type_ = u32::from_be_bytes(record0[pos + 8..pos + 12].try_into().unwrap());
        let checksum = record0[pos + 12];
        let cookie: &[u8; COOKIE_SIZE] = record0[pos + 16..pos + 16 + COOKIE_SIZE]
            .try_into()
            .unwrap();
        entries.push(DrmEntry {
            verification,
            size,
            type_,
            checksum,
            cookie,
        });
        pos += ENTRY_SIZE;
    }
    Ok(entries)
}

/// Sums the 16 bytes of a key modulo 256
pub fn keychecksum(key: &[u8; pc1::KEY_SIZE]) -> u8 {
    key.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// The three possible locations of the v1 source key inside Record 0, chosen
/// at parse time by the caller according to §4.4's selection rule
#[derive(Debug, Clone, Copy)]
pub enum V1KeySource {
    /// PalmDOC `type == "TEXt"`, `creator == "REAd"`: the key lives at offset 14
    TextRead,
    /// No MOBI header, or its `version` field is the "not set" sentinel: offset 144
    NoMobiVersion,
    /// A MOBI header with a set `version`: offset `header_length + 16`
    Mobi {
        /// `header_length` as read from the MOBI header
        header_length: u32,
    },
}

impl V1KeySource {
    fn offset(self) -> u32 {
        match self {
            Self::TextRead => 14,
            Self::NoMobiVersion => 144,
            Self::Mobi { header_length } => header_length.wrapping_add(16),
        }
    }
}

/// Recovers the book key for `encryption_type == 1` books
///
/// Reads the 16 encrypted key bytes from `record0` at the offset implied by
/// `source` and decrypts them with `KEYVEC1_V1`. No verification is
/// performed for this mode.
pub fn recover_v1(record0: &[u8], source: V1KeySource) -> Result<[u8; pc1::KEY_SIZE], MobiError> {
    let offset = source.offset() as usize;
    let end = offset
        .checked_add(pc1::KEY_SIZE)
        .ok_or_else(|| MobiError::DataCorrupt("v1 key source offset overflow".into()))?;
    let key_enc: &[u8; pc1::KEY_SIZE] = record0
        .get(offset..end)
        .ok_or_else(|| MobiError::DataCorrupt("v1 key source runs past Record 0".into()))?
        .try_into()
        .unwrap();
    let mut key = [0u8; pc1::KEY_SIZE];
    pc1::decrypt(&mut key, key_enc, &KEYVEC1_V1)?;
    Ok(key)
}

/// Verifies a decrypted cookie's `verification`/`flags` fields against the
/// descriptor's expected verification value
fn verify_cookie(descriptor_verification: u32, cookie_plain: &[u8; COOKIE_SIZE]) -> Option<[u8; pc1::KEY_SIZE]> {
    let ver = u32::from_be_bytes(cookie_plain[0..4].try_into().unwrap());
    let flags = u32::from_be_bytes(cookie_plain[4..8].try_into().unwrap());
    if ver == descriptor_verification && (flags & 0x1f) != 0 {
        Some(cookie_plain[8..24].try_into().unwrap())
    } else {
        None
    }
}

/// Recovers the book key for `encryption_type >= 2` books, given a validated
/// PID and the DRM table parsed from Record 0
///
/// Walks the table in order, trying each entry whose checksum matches either
/// the PID-derived temporary key or the device-neutral `KEYVEC1`.
pub fn recover_v2(pid: &[u8; pid::PID_SIZE], table: &[DrmEntry<'_>]) -> Result<[u8; pc1::KEY_SIZE], MobiError> {
    let mut pid_padded = [0u8; pc1::KEY_SIZE];
    pid_padded[0..8].copy_from_slice(&pid[0..8]);

    let temp_key = pc1::encrypt_to_vec(&pid_padded, &KEYVEC1)?;
    let temp_key: [u8; pc1::KEY_SIZE] = temp_key.try_into().unwrap();

    let temp_key_checksum = keychecksum(&temp_key);
    let default_checksum = keychecksum(&KEYVEC1);

    for entry in table {
        let key = if entry.checksum == temp_key_checksum {
            &temp_key
        } else if entry.checksum == default_checksum {
            &KEYVEC1
        } else {
            continue;
        };

        let mut cookie_plain = [0u8; COOKIE_SIZE];
        pc1::decrypt(&mut cookie_plain, entry.cookie, key)?;
        if let Some(book_key) = verify_cookie(entry.verification, &cookie_plain) {
            return Ok(book_key);
        }
    }
    Err(MobiError::KeyNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S2: keychecksum(KEYVEC1) == 0xDA
    #[test]
    fn s2_keychecksum_keyvec1() {
        assert_eq!(keychecksum(&KEYVEC1), 0xDA);
    }

    fn build_cookie(verification: u32, flags: u32, book_key: &[u8; 16]) -> [u8; COOKIE_SIZE] {
        let mut cookie = [0u8; COOKIE_SIZE];
        cookie[0..4].copy_from_slice(&verification.to_be_bytes());
        cookie[4..8].copy_from_slice(&flags.to_be_bytes());
        cookie[8..24].copy_from_slice(book_key);
        cookie
    }

    fn build_table_bytes(verification: u32, checksum: u8, cookie_cipher: &[u8; COOKIE_SIZE]) -> Vec<u8> {
        let mut entry = Vec::with_capacity(ENTRY_SIZE);
        entry.extend_from_slice(&verification.to_be_bytes());
        entry.extend_from_slice(&0u32.to_be_bytes()); // size
        entry.extend_from_slice(&0u32.to_be_bytes()); // type
        entry.push(checksum);
        entry.extend_from_slice(&[0u8; 3]);
        entry.extend_from_slice(cookie_cipher);
        entry
    }

    /// S4: v2 key recovery happy path
    #[test]
    fn s4_v2_recovery_happy_path() {
        let payload = *b"12345678";
        let pid = pid::with_checksum(&payload);

        let mut pid_padded = [0u8; 16];
        pid_padded[0..8].copy_from_slice(&pid[0..8]);
        let temp_key: [u8; 16] = pc1::encrypt_to_vec(&pid_padded, &KEYVEC1)
            .unwrap()
            .try_into()
            .unwrap();
        let checksum = keychecksum(&temp_key);

        let book_key = *b"bookkeybookkey16";
        let verification = 0xdead_beefu32;
        let cookie_plain = build_cookie(verification, 0x0000_0001, &book_key);
        let cookie_cipher: [u8; COOKIE_SIZE] = pc1::encrypt_to_vec(&cookie_plain, &temp_key)
            .unwrap()
            .try_into()
            .unwrap();

        let table_bytes = build_table_bytes(verification, checksum, &cookie_cipher);
        let table = parse_table(&table_bytes, 0, 1, ENTRY_SIZE as u32).unwrap();
        assert_eq!(table.len(), 1);

        let recovered = recover_v2(&pid, &table).unwrap();
        assert_eq!(recovered, book_key);
    }

    /// S5: v2 recovery with the wrong PID fails with KeyNotFound
    #[test]
    fn s5_v2_wrong_pid() {
        let payload = *b"12345678";
        let pid = pid::with_checksum(&payload);
        let other_payload = *b"87654321";
        let other_pid = pid::with_checksum(&other_payload);

        let mut pid_padded = [0u8; 16];
        pid_padded[0..8].copy_from_slice(&pid[0..8]);
        let temp_key: [u8; 16] = pc1::encrypt_to_vec(&pid_padded, &KEYVEC1)
            .unwrap()
            .try_into()
            .unwrap();
        let checksum = keychecksum(&temp_key);

        let book_key = *b"bookkeybookkey16";
        let verification = 0x1234_5678u32;
        let cookie_plain = build_cookie(verification, 0x0000_0001, &book_key);
        let cookie_cipher: [u8; COOKIE_SIZE] = pc1::encrypt_to_vec(&cookie_plain, &temp_key)
            .unwrap()
            .try_into()
            .unwrap();

        let table_bytes = build_table_bytes(verification, checksum, &cookie_cipher);
        let table = parse_table(&table_bytes, 0, 1, ENTRY_SIZE as u32).unwrap();

        let result = recover_v2(&other_pid, &table);
        assert!(matches!(result, Err(MobiError::KeyNotFound)));
    }

    #[test]
    fn cookie_verification_rejects_bad_verification_or_flags() {
        let book_key = [0u8; 16];
        let bad_verification = build_cookie(1, 0x1, &book_key);
        assert!(verify_cookie(2, &bad_verification).is_none());

        let bad_flags = build_cookie(1, 0, &book_key);
        assert!(verify_cookie(1, &bad_flags).is_none());

        let good = build_cookie(1, 0x1, &book_key);
        assert!(verify_cookie(1, &good).is_some());
    }

    /// S7 (table bounds): drm_offset + drm_size > record0_size yields zero entries
    #[test]
    fn table_bounds_guard() {
        let record0 = vec![0u8; 32];
        let table = parse_table(&record0, 16, 1, 48).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn not_set_and_zero_count_yield_empty_table() {
        let record0 = vec![0u8; 256];
        assert!(parse_table(&record0, NOT_SET, 1, 48).unwrap().is_empty());
        assert!(parse_table(&record0, 0, 0, 48).unwrap().is_empty());
    }
}
