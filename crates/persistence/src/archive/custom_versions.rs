use std::collections::BTreeMap;

use crate::byte_stream::{ByteReader, ByteWriter};
use crate::save_error::SaveError;

/// Per-feature version numbers recorded alongside saved data, so readers can
/// branch on the layout a given feature was written with.
///
/// Stored as a length-prefixed bitcode blob; a `BTreeMap` keeps the encoding
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomVersions {
    versions: BTreeMap<String, u32>,
}

impl CustomVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, version: u32) {
        self.versions.insert(key.to_string(), version);
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.versions.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn write(&self, out: &mut ByteWriter) {
        out.write_bytes(&bitcode::encode(&self.versions));
    }

    pub fn read(input: &mut ByteReader<'_>) -> Result<Self, SaveError> {
        let bytes = input.read_bytes()?;
        let versions: BTreeMap<String, u32> = bitcode::decode(bytes)?;
        Ok(Self { versions })
    }
}
