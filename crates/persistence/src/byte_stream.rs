// ---------------------------------------------------------------------------
// byte_stream – little-endian writer/reader with back-patching and seeking
// ---------------------------------------------------------------------------
//
// Every on-disk structure in this crate (archives, containers, save headers)
// is built from these primitives:
//   - integers and floats are little-endian
//   - strings are [len:u32][utf8 bytes]
//   - byte arrays are [len:u32][bytes]
//   - transforms are 10 f32s: translation xyz, rotation xyzw, scale xyz

use bevy::math::{Quat, Vec3};
use bevy::prelude::Transform;

use crate::save_error::SaveError;

/// Growable little-endian output buffer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current write position (always the end of the buffer).
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_transform(&mut self, t: &Transform) {
        for v in t.translation.to_array() {
            self.write_f32(v);
        }
        for v in t.rotation.to_array() {
            self.write_f32(v);
        }
        for v in t.scale.to_array() {
            self.write_f32(v);
        }
    }

    /// Reserve a u32 slot to be filled in later with [`ByteWriter::patch_u32`].
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.position();
        self.write_u32(0);
        at
    }

    /// Overwrite a previously written u32 at `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at` does not point at four already-written bytes.
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
}

/// Bounds-checked little-endian reader over a borrowed slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The full underlying slice, independent of the read position.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), SaveError> {
        if pos > self.data.len() {
            return Err(SaveError::Truncated {
                needed: pos,
                remaining: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), SaveError> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], SaveError> {
        if n > self.remaining() {
            return Err(SaveError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], SaveError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// A reader over `len` bytes starting at `offset`, with its own position 0.
    pub fn sub_reader(&self, offset: usize, len: usize) -> Result<ByteReader<'a>, SaveError> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.data.len() {
            return Err(SaveError::Truncated {
                needed: end,
                remaining: self.data.len(),
            });
        }
        Ok(ByteReader::new(&self.data[offset..end]))
    }

    pub fn read_u8(&mut self) -> Result<u8, SaveError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, SaveError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, SaveError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, SaveError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, SaveError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SaveError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, SaveError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], SaveError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String, SaveError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SaveError::Decode(format!("invalid UTF-8 in string: {e}")))
    }

    pub fn read_transform(&mut self) -> Result<Transform, SaveError> {
        let mut v = [0f32; 10];
        for slot in v.iter_mut() {
            *slot = self.read_f32()?;
        }
        Ok(Transform {
            translation: Vec3::new(v[0], v[1], v[2]),
            rotation: Quat::from_xyzw(v[3], v[4], v[5], v[6]),
            scale: Vec3::new(v[7], v[8], v[9]),
        })
    }
}
