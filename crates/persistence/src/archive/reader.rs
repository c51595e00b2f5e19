use bevy::prelude::Transform;

use crate::archive::custom_versions::CustomVersions;
use crate::byte_stream::ByteReader;
use crate::name_table::{Name, NameTable};
use crate::save_error::SaveError;

/// Input handed to `read_fields` for one object's payload.
///
/// The reader is bounded to that object's bytes, so a host that reads too far
/// gets an error instead of the next object's data.
pub struct ArchiveReader<'a, O> {
    input: ByteReader<'a>,
    names: &'a NameTable,
    objects: &'a [Option<O>],
    versions: &'a CustomVersions,
    schema_version: u32,
}

impl<'a, O: Copy> ArchiveReader<'a, O> {
    pub(crate) fn new(
        input: ByteReader<'a>,
        names: &'a NameTable,
        objects: &'a [Option<O>],
        versions: &'a CustomVersions,
        schema_version: u32,
    ) -> Self {
        Self {
            input,
            names,
            objects,
            versions,
            schema_version,
        }
    }

    pub fn position(&self) -> usize {
        self.input.position()
    }

    pub fn remaining(&self) -> usize {
        self.input.remaining()
    }

    pub fn read_u8(&mut self) -> Result<u8, SaveError> {
        self.input.read_u8()
    }

    pub fn read_bool(&mut self) -> Result<bool, SaveError> {
        self.input.read_bool()
    }

    pub fn read_u32(&mut self) -> Result<u32, SaveError> {
        self.input.read_u32()
    }

    pub fn read_i32(&mut self) -> Result<i32, SaveError> {
        self.input.read_i32()
    }

    pub fn read_u64(&mut self) -> Result<u64, SaveError> {
        self.input.read_u64()
    }

    pub fn read_f32(&mut self) -> Result<f32, SaveError> {
        self.input.read_f32()
    }

    pub fn read_string(&mut self) -> Result<String, SaveError> {
        self.input.read_string()
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, SaveError> {
        self.input.read_bytes().map(<[u8]>::to_vec)
    }

    pub fn read_name(&mut self) -> Result<Name, SaveError> {
        self.names.read_name(&mut self.input)
    }

    pub fn read_transform(&mut self) -> Result<Transform, SaveError> {
        self.input.read_transform()
    }

    /// Read a reference. Null and references to objects that could not be
    /// resolved on this load both come back as `None`.
    pub fn read_object(&mut self) -> Result<Option<O>, SaveError> {
        let id = self.input.read_i32()?;
        if id == -1 {
            return Ok(None);
        }
        if id < 0 || id as usize >= self.objects.len() {
            return Err(SaveError::Decode(format!(
                "object reference {id} outside table of {}",
                self.objects.len()
            )));
        }
        Ok(self.objects[id as usize])
    }

    /// Version of `key` recorded when the data was written, if any.
    pub fn custom_version(&self, key: &str) -> Option<u32> {
        self.versions.get(key)
    }

    /// Schema version from the save header this data came from.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }
}
