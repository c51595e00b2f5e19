// ---------------------------------------------------------------------------
// Container blob header
// ---------------------------------------------------------------------------
//
//   [version:u32][index_offset:u32][dynamic_offset:u32]
//   ...entity regions...
//   at dynamic_offset: [count:u32] {[id:u64][transform][class:string]}*
//   at index_offset:   [count:u32] {[id:u64][offset:u32][length:u32]}*
//                      [destroyed:u32] {[id:u64]}*
//                      [custom versions]
//                      [name table]

use crate::archive::CustomVersions;
use crate::byte_stream::{ByteReader, ByteWriter};
use crate::name_table::NameTable;
use crate::persistence_types::StableId;
use crate::save_error::SaveError;

/// Layout version of container blobs.
pub const CONTAINER_VERSION: u32 = 1;

/// Size of the fixed part of the header.
pub const FIXED_HEADER_SIZE: usize = 12;

/// Where one entity's region lives inside the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityIndex {
    pub id: StableId,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerHeader {
    pub version: u32,
    pub index_offset: u32,
    pub dynamic_offset: u32,
    /// Sorted by id.
    pub index: Vec<EntityIndex>,
    pub destroyed: Vec<StableId>,
    pub versions: CustomVersions,
    pub names: NameTable,
}

impl ContainerHeader {
    pub fn new() -> Self {
        Self {
            version: CONTAINER_VERSION,
            ..Self::default()
        }
    }

    pub fn find(&self, id: StableId) -> Option<&EntityIndex> {
        self.index
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.index[i])
    }

    pub fn is_destroyed(&self, id: StableId) -> bool {
        self.destroyed.contains(&id)
    }

    pub fn write_fixed(&self, out: &mut ByteWriter) {
        out.write_u32(self.version);
        out.write_u32(self.index_offset);
        out.write_u32(self.dynamic_offset);
    }

    pub fn write_variable(&self, out: &mut ByteWriter) {
        out.write_u32(self.index.len() as u32);
        for entry in &self.index {
            out.write_u64(entry.id.0);
            out.write_u32(entry.offset);
            out.write_u32(entry.length);
        }
        out.write_u32(self.destroyed.len() as u32);
        for id in &self.destroyed {
            out.write_u64(id.0);
        }
        self.versions.write(out);
        self.names.write(out);
    }

    /// Parse the fixed header and the variable section. Entity payloads and
    /// the dynamic section are not touched.
    pub fn read(blob: &[u8]) -> Result<Self, SaveError> {
        let mut r = ByteReader::new(blob);
        let version = r.read_u32()?;
        if version > CONTAINER_VERSION {
            return Err(SaveError::TooNew {
                kind: "container version",
                found: version,
                supported: CONTAINER_VERSION,
            });
        }
        let index_offset = r.read_u32()?;
        let dynamic_offset = r.read_u32()?;
        if (dynamic_offset as usize) < FIXED_HEADER_SIZE || dynamic_offset > index_offset {
            return Err(SaveError::Decode(format!(
                "container offsets out of order (dynamic {dynamic_offset}, index {index_offset})"
            )));
        }

        r.seek(index_offset as usize)?;
        let count = r.read_u32()? as usize;
        if count > r.remaining() / 16 {
            return Err(SaveError::Truncated {
                needed: count * 16,
                remaining: r.remaining(),
            });
        }
        let mut index = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = EntityIndex {
                id: StableId(r.read_u64()?),
                offset: r.read_u32()?,
                length: r.read_u32()?,
            };
            let end = entry.offset as u64 + entry.length as u64;
            if (entry.offset as usize) < FIXED_HEADER_SIZE || end > dynamic_offset as u64 {
                return Err(SaveError::Decode(format!(
                    "entity {} region out of bounds",
                    entry.id
                )));
            }
            index.push(entry);
        }
        if index.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(SaveError::Decode("container index is not sorted".into()));
        }

        let destroyed_count = r.read_u32()? as usize;
        if destroyed_count > r.remaining() / 8 {
            return Err(SaveError::Truncated {
                needed: destroyed_count * 8,
                remaining: r.remaining(),
            });
        }
        let mut destroyed = Vec::with_capacity(destroyed_count);
        for _ in 0..destroyed_count {
            destroyed.push(StableId(r.read_u64()?));
        }

        let versions = CustomVersions::read(&mut r)?;
        let names = NameTable::read(&mut r)?;

        Ok(Self {
            version,
            index_offset,
            dynamic_offset,
            index,
            destroyed,
            versions,
            names,
        })
    }
}
