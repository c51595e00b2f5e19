// ---------------------------------------------------------------------------
// SaveError: typed errors for the codec, containers and save files
// ---------------------------------------------------------------------------

use std::fmt;

/// Errors that can occur while encoding, decoding or storing persistence data.
///
/// Object-level problems inside an archive (missing types, short reads) are
/// recovered locally and only logged; these errors are for failures that stop
/// a whole save or load.
#[derive(Debug)]
pub enum SaveError {
    /// I/O error from the storage backend (permission denied, disk full, etc.)
    Io(std::io::Error),
    /// A read ran past the end of the available bytes.
    Truncated { needed: usize, remaining: usize },
    /// Bytes were present but could not be interpreted.
    Decode(String),
    /// Size or checksum validation failed.
    Corrupt(String),
    /// The data was written by a newer format or build than this one.
    TooNew {
        kind: &'static str,
        found: u32,
        supported: u32,
    },
    /// The saved root class is not compatible with the object being loaded into.
    ClassMismatch { expected: String, found: String },
    /// A name index pointed outside the name table.
    UnknownName(u16),
    /// LZ4 compression or decompression failed.
    Compression(String),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "I/O error: {e}"),
            SaveError::Truncated { needed, remaining } => write!(
                f,
                "Unexpected end of data: needed {needed} bytes, {remaining} remaining"
            ),
            SaveError::Decode(msg) => write!(f, "Decoding error: {msg}"),
            SaveError::Corrupt(msg) => write!(f, "Corrupt save data: {msg}"),
            SaveError::TooNew {
                kind,
                found,
                supported,
            } => write!(
                f,
                "Save {kind} is {found}, but this build only supports up to {supported}"
            ),
            SaveError::ClassMismatch { expected, found } => write!(
                f,
                "Saved root class '{found}' is not compatible with '{expected}'"
            ),
            SaveError::UnknownName(index) => write!(f, "Name index {index} is not in the name table"),
            SaveError::Compression(msg) => write!(f, "Compression error: {msg}"),
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<bitcode::Error> for SaveError {
    fn from(e: bitcode::Error) -> Self {
        SaveError::Decode(e.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for SaveError {
    fn from(e: lz4_flex::block::DecompressError) -> Self {
        SaveError::Compression(e.to_string())
    }
}
