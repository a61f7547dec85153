//! The crate's error type

use std::fmt;

/// Errors produced while reading a PalmDB/MOBI container or recovering/using its DRM key
#[derive(Debug)]
pub enum MobiError {
    /// A required input was missing or null (e.g. a PID was required but not supplied)
    InitFailed(&'static str),
    /// The container or header data is structurally invalid
    DataCorrupt(String),
    /// An allocation-shaped step in key recovery could not be sized
    MallocFailed,
    /// The supplied PID failed the checksum validation
    PidInvalid,
    /// Key recovery exhausted the DRM table without a verifying cookie
    KeyNotFound,
    /// An I/O error occurred while reading the container
    Io(std::io::Error),
}

impl fmt::Display for MobiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed(what) => write!(f, "initialization failed: {}", what),
            Self::DataCorrupt(msg) => write!(f, "data corrupt: {}", msg),
            Self::MallocFailed => write!(f, "allocation failed"),
            Self::PidInvalid => write!(f, "PID is invalid"),
            Self::KeyNotFound => write!(f, "no DRM key found for the supplied PID"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for MobiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MobiError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
