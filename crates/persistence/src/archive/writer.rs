use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use bevy::prelude::Transform;

use crate::archive::custom_versions::CustomVersions;
use crate::byte_stream::ByteWriter;
use crate::name_table::{Name, NameTable};

/// Objects discovered during one write pass, in id order.
///
/// Slot 0 is the root. A `None` slot is a root owned by the persistence layer
/// itself, which has no host handle.
#[derive(Debug)]
pub(crate) struct ObjectCollector<O> {
    pub(crate) objects: Vec<Option<O>>,
    ids: HashMap<O, i32>,
    pub(crate) queue: VecDeque<usize>,
}

impl<O: Copy + Eq + Hash> ObjectCollector<O> {
    pub(crate) fn new(root: Option<O>) -> Self {
        let mut ids = HashMap::new();
        if let Some(root) = root {
            ids.insert(root, 0);
        }
        Self {
            objects: vec![root],
            ids,
            queue: VecDeque::from([0]),
        }
    }

    pub(crate) fn id_of(&self, obj: O) -> Option<i32> {
        self.ids.get(&obj).copied()
    }

    /// Assign an id to `obj` (and, first, to every unseen outer above it) and
    /// queue each newly seen object for writing.
    fn register(&mut self, obj: O, outer_of: &dyn Fn(O) -> Option<O>) -> i32 {
        if let Some(id) = self.id_of(obj) {
            return id;
        }

        // Outers must get lower ids than their inners.
        let mut chain = vec![obj];
        let mut cursor = outer_of(obj);
        while let Some(outer) = cursor {
            if self.ids.contains_key(&outer) || chain.contains(&outer) {
                break;
            }
            chain.push(outer);
            cursor = outer_of(outer);
        }

        let mut id = 0;
        for o in chain.into_iter().rev() {
            id = self.objects.len() as i32;
            self.ids.insert(o, id);
            self.objects.push(Some(o));
            self.queue.push_back(id as usize);
        }
        id
    }
}

/// Output handed to `write_fields` for one object's payload.
///
/// Object references are written as ids; an object seen for the first time is
/// queued so the graph pass writes it later.
pub struct ArchiveWriter<'a, O> {
    out: ByteWriter,
    collector: &'a mut ObjectCollector<O>,
    names: &'a mut NameTable,
    versions: &'a mut CustomVersions,
    outer_of: &'a dyn Fn(O) -> Option<O>,
}

impl<'a, O: Copy + Eq + Hash> ArchiveWriter<'a, O> {
    pub(crate) fn new(
        collector: &'a mut ObjectCollector<O>,
        names: &'a mut NameTable,
        versions: &'a mut CustomVersions,
        outer_of: &'a dyn Fn(O) -> Option<O>,
    ) -> Self {
        Self {
            out: ByteWriter::new(),
            collector,
            names,
            versions,
            outer_of,
        }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.out.into_inner()
    }

    /// Bytes written to this payload so far.
    pub fn position(&self) -> usize {
        self.out.position()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.out.write_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.out.write_bool(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.out.write_u32(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.out.write_i32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.out.write_u64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.out.write_f32(v);
    }

    pub fn write_str(&mut self, s: &str) {
        self.out.write_str(s);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.write_bytes(bytes);
    }

    pub fn write_name(&mut self, name: &Name) {
        self.names.write_name(&mut self.out, name);
    }

    pub fn write_transform(&mut self, t: &Transform) {
        self.out.write_transform(t);
    }

    /// Write a reference. `None` is written as -1.
    pub fn write_object(&mut self, obj: Option<O>) {
        let id = match obj {
            Some(o) => self.collector.register(o, self.outer_of),
            None => -1,
        };
        self.out.write_i32(id);
    }

    /// Record that data written from here on depends on version `v` of `key`.
    pub fn use_custom_version(&mut self, key: &str, v: u32) {
        self.versions.set(key, v);
    }
}
