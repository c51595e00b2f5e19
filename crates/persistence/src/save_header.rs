// ---------------------------------------------------------------------------
// save_header – save file framing, checksum, versions and compression
// ---------------------------------------------------------------------------
//
// Uncompressed layout (little-endian):
//   [0..4]   xxHash32 checksum of bytes [4..size)
//   [4..8]   size: meaningful bytes, anything past it is padding
//   [8..12]  format version
//   [12..16] build number
//   [16..20] schema version
//   root type path (string)
//   codec payload (u32 length + bytes)
//   custom versions
//
// On disk the first 12 bytes stay as they are and everything after them is
// LZ4 compressed with the uncompressed length prepended. Format versions
// before FIRST_COMPRESSED_FORMAT_VERSION were stored uncompressed.

use bevy::log::warn;
use xxhash_rust::xxh32::xxh32;

use crate::archive::CustomVersions;
use crate::byte_stream::{ByteReader, ByteWriter};
use crate::persistence_types::ClassPath;
use crate::save_error::SaveError;

/// Save file layout version written by this build.
pub const PERSISTENCE_FORMAT_VERSION: u32 = 2;

/// First format version whose body is LZ4 compressed.
pub const FIRST_COMPRESSED_FORMAT_VERSION: u32 = 2;

/// Bytes left uncompressed at the front: checksum, size and format version.
pub const RAW_PREFIX_SIZE: usize = 12;

/// Upper bound on a decompressed body, so a damaged length prefix can't
/// trigger a huge allocation.
pub const MAX_DECOMPRESSED_SIZE: usize = 256 * 1024 * 1024;

/// Seed for the xxHash32 checksum.
const XXHASH_SEED: u32 = 0;

/// Storage name of the profile save.
pub const PROFILE_SLOT: &str = "profile";

/// Storage name of world save slot `n`.
pub fn slot_name(n: i32) -> String {
    format!("save_{n}")
}

/// Parsed fixed fields of a save file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub checksum: u32,
    pub size: u32,
    pub format_version: u32,
    pub build_number: u32,
    pub schema_version: u32,
    pub root_type: ClassPath,
}

/// A validated save: header, codec payload and the custom versions the
/// payload was written with.
#[derive(Debug, Clone)]
pub struct SaveFile {
    pub header: SaveHeader,
    pub payload: Vec<u8>,
    pub versions: CustomVersions,
}

// =============================================================================
// Write
// =============================================================================

/// Frame a codec payload as an uncompressed save with its size and checksum
/// filled in.
pub fn build_save(
    build_number: u32,
    schema_version: u32,
    root_type: &ClassPath,
    payload: &[u8],
    versions: &CustomVersions,
) -> Vec<u8> {
    let mut out = ByteWriter::with_capacity(payload.len() + 64);
    let checksum_at = out.reserve_u32();
    let size_at = out.reserve_u32();
    out.write_u32(PERSISTENCE_FORMAT_VERSION);
    out.write_u32(build_number);
    out.write_u32(schema_version);
    out.write_str(root_type.as_str());
    out.write_bytes(payload);
    versions.write(&mut out);

    let size = out.position() as u32;
    out.patch_u32(size_at, size);
    let mut bytes = out.into_inner();
    let checksum = xxh32(&bytes[4..], XXHASH_SEED);
    bytes[checksum_at..checksum_at + 4].copy_from_slice(&checksum.to_le_bytes());
    bytes
}

/// Recompute size-bounded checksum in place, for callers that patch a
/// finished save.
pub fn refresh_checksum(bytes: &mut [u8]) {
    if bytes.len() < 8 {
        return;
    }
    let size = (u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize).min(bytes.len());
    let checksum = xxh32(&bytes[4..size.max(4)], XXHASH_SEED);
    bytes[0..4].copy_from_slice(&checksum.to_le_bytes());
}

/// Compress everything after the raw prefix.
pub fn compress(uncompressed: &[u8]) -> Vec<u8> {
    if uncompressed.len() <= RAW_PREFIX_SIZE {
        return uncompressed.to_vec();
    }
    let (prefix, body) = uncompressed.split_at(RAW_PREFIX_SIZE);
    let mut out = Vec::with_capacity(uncompressed.len() / 2 + RAW_PREFIX_SIZE);
    out.extend_from_slice(prefix);
    out.extend_from_slice(&lz4_flex::compress_prepend_size(body));
    out
}

// =============================================================================
// Read
// =============================================================================

fn stored_format_version(stored: &[u8]) -> Option<u32> {
    let bytes = stored.get(8..12)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Undo [`compress`]. Saves from before compression are returned as is.
pub fn decompress(stored: &[u8]) -> Result<Vec<u8>, SaveError> {
    let Some(version) = stored_format_version(stored) else {
        return Err(SaveError::Corrupt(format!(
            "save is only {} bytes",
            stored.len()
        )));
    };
    if version < FIRST_COMPRESSED_FORMAT_VERSION {
        return Ok(stored.to_vec());
    }

    let body = &stored[RAW_PREFIX_SIZE..];
    let Some(len_bytes) = body.get(0..4) else {
        return Err(SaveError::Corrupt("missing compressed length".into()));
    };
    let expected = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    // LZ4 can't expand input by more than ~255x.
    let limit = MAX_DECOMPRESSED_SIZE.min(body.len().saturating_mul(255));
    if expected > limit {
        return Err(SaveError::Corrupt(format!(
            "compressed body claims {expected} bytes (limit {limit})"
        )));
    }

    let decompressed = lz4_flex::decompress_size_prepended(body)?;
    let mut out = Vec::with_capacity(RAW_PREFIX_SIZE + decompressed.len());
    out.extend_from_slice(&stored[..RAW_PREFIX_SIZE]);
    out.extend_from_slice(&decompressed);
    Ok(out)
}

/// Check size bounds and checksum of an uncompressed save.
fn check_integrity(bytes: &[u8]) -> Result<usize, SaveError> {
    if bytes.len() < 8 {
        return Err(SaveError::Corrupt(format!("save is only {} bytes", bytes.len())));
    }
    let stored_checksum = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if size <= 8 || size > bytes.len() {
        return Err(SaveError::Corrupt(format!(
            "save size {size} is outside 9..={}",
            bytes.len()
        )));
    }
    let computed = xxh32(&bytes[4..size], XXHASH_SEED);
    if computed != stored_checksum {
        return Err(SaveError::Corrupt(format!(
            "checksum mismatch (expected {stored_checksum:#010X}, got {computed:#010X})"
        )));
    }
    Ok(size)
}

/// Validate and split an uncompressed save.
///
/// Checks run in order: size bounds, checksum, format version, then the
/// build number against `current_build` (0 leaves the build gate open).
pub fn parse_save(bytes: &[u8], current_build: u32) -> Result<SaveFile, SaveError> {
    let size = check_integrity(bytes)?;
    let mut r = ByteReader::new(&bytes[..size]);
    let checksum = r.read_u32()?;
    let size = r.read_u32()?;

    let format_version = r.read_u32()?;
    if format_version > PERSISTENCE_FORMAT_VERSION {
        warn!(
            "Save format version {} is newer than supported {}",
            format_version, PERSISTENCE_FORMAT_VERSION
        );
        return Err(SaveError::TooNew {
            kind: "format version",
            found: format_version,
            supported: PERSISTENCE_FORMAT_VERSION,
        });
    }

    let build_number = r.read_u32()?;
    if current_build != 0 && build_number > current_build {
        warn!(
            "Save was written by build {}, this is build {}",
            build_number, current_build
        );
        return Err(SaveError::TooNew {
            kind: "build number",
            found: build_number,
            supported: current_build,
        });
    }

    let schema_version = r.read_u32()?;
    let root_type = ClassPath(r.read_string()?);
    let payload = r.read_bytes()?.to_vec();
    let versions = CustomVersions::read(&mut r)?;

    Ok(SaveFile {
        header: SaveHeader {
            checksum,
            size,
            format_version,
            build_number,
            schema_version,
            root_type,
        },
        payload,
        versions,
    })
}

/// Decompress and validate bytes as read from storage.
pub fn load_stored(stored: &[u8], current_build: u32) -> Result<SaveFile, SaveError> {
    let bytes = decompress(stored)?;
    parse_save(&bytes, current_build)
}

/// Integrity check used by storage backends: the bytes decompress, and size
/// and checksum hold. Version gates are not applied.
pub fn verify_stored(stored: &[u8]) -> Result<(), SaveError> {
    let bytes = decompress(stored)?;
    check_integrity(&bytes).map(|_| ())
}
