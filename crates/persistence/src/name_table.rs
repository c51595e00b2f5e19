// ---------------------------------------------------------------------------
// name_table – identifier interning for one serialization pass
// ---------------------------------------------------------------------------
//
// Identifiers are written as a u16 index into a side table. Entity names are
// usually the same base string with different numeric suffixes ("door_3",
// "door_4"), so the suffix is split off and stored next to the index only when
// it is non-zero, flagged by the index's high bit:
//
//   [index:u16]                 suffix == 0
//   [index|0x8000:u16][n:i32]   suffix != 0
//
// The table itself is written once: [count:u32] then count strings.

use std::collections::HashMap;
use std::fmt;

use crate::byte_stream::{ByteReader, ByteWriter};
use crate::save_error::SaveError;

/// Index bit flagging that a numeric suffix follows.
pub const HAS_NUMBER: u16 = 1 << 15;

/// Maximum number of distinct base strings one table can hold.
pub const MAX_NAMES: usize = HAS_NUMBER as usize;

/// An identifier with an optional numeric suffix (0 means no suffix).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name {
    pub base: String,
    pub number: i32,
}

impl Name {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            number: 0,
        }
    }

    pub fn with_number(base: impl Into<String>, number: i32) -> Self {
        Self {
            base: base.into(),
            number,
        }
    }

    /// The "no name" value.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.base.is_empty() && self.number == 0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.number == 0 {
            f.write_str(&self.base)
        } else {
            write!(f, "{}_{}", self.base, self.number)
        }
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

/// Deduplicating table of base strings.
#[derive(Debug, Default, Clone)]
pub struct NameTable {
    lookup: HashMap<String, u16>,
    names: Vec<String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn reset(&mut self) {
        self.lookup.clear();
        self.names.clear();
    }

    /// Intern `base` and return its index.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_NAMES`] distinct strings are added; past that
    /// point the index would collide with the suffix flag.
    pub fn add(&mut self, base: &str) -> u16 {
        if let Some(&index) = self.lookup.get(base) {
            return index;
        }
        assert!(
            self.names.len() < MAX_NAMES,
            "More than {MAX_NAMES} unique names in one name table"
        );
        let index = self.names.len() as u16;
        self.names.push(base.to_string());
        self.lookup.insert(base.to_string(), index);
        index
    }

    pub fn get(&self, index: u16) -> Result<&str, SaveError> {
        self.names
            .get(index as usize)
            .map(String::as_str)
            .ok_or(SaveError::UnknownName(index))
    }

    /// Write a name reference (index plus optional suffix).
    pub fn write_name(&mut self, out: &mut ByteWriter, name: &Name) {
        let mut index = self.add(&name.base);
        if name.number != 0 {
            index |= HAS_NUMBER;
        }
        out.write_u16(index);
        if name.number != 0 {
            out.write_i32(name.number);
        }
    }

    /// Read a name reference written by [`NameTable::write_name`].
    pub fn read_name(&self, input: &mut ByteReader<'_>) -> Result<Name, SaveError> {
        let raw = input.read_u16()?;
        let number = if raw & HAS_NUMBER != 0 {
            input.read_i32()?
        } else {
            0
        };
        let base = self.get(raw & !HAS_NUMBER)?;
        Ok(Name::with_number(base, number))
    }

    /// Serialize the table: [count:u32] then each string.
    pub fn write(&self, out: &mut ByteWriter) {
        out.write_u32(self.names.len() as u32);
        for name in &self.names {
            out.write_str(name);
        }
    }

    /// Replace the table's contents with a table read from `input`.
    pub fn read(input: &mut ByteReader<'_>) -> Result<Self, SaveError> {
        let count = input.read_u32()? as usize;
        if count > MAX_NAMES {
            return Err(SaveError::Decode(format!(
                "name table has {count} entries, limit is {MAX_NAMES}"
            )));
        }
        let mut table = NameTable::new();
        for _ in 0..count {
            let s = input.read_string()?;
            // Duplicates cannot come from our writer; keep positional order regardless.
            table.lookup.entry(s.clone()).or_insert(table.names.len() as u16);
            table.names.push(s);
        }
        Ok(table)
    }
}
