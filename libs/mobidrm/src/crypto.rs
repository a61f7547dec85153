//! The DRM engine: the PC1 cipher, PID validation, and cookie-based key recovery

pub mod drm;
pub mod pc1;
pub mod pid;

/// The fixed key vector used to bootstrap v2+ (cookie table) key recovery
pub const KEYVEC1: [u8; 16] = [
    0x72, 0x38, 0x33, 0xB0, 0xB4, 0xF2, 0xE3, 0xCA, 0xDF, 0x09, 0x01, 0xD6, 0xE2, 0xE0, 0x3F, 0x96,
];

/// The fixed key vector used to decrypt v1 (single-offset) book keys
pub const KEYVEC1_V1: [u8; 16] = *b"QDCVEPMU675RUBSZ";
