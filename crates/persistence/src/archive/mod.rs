// ---------------------------------------------------------------------------
// archive – object graph codec
// ---------------------------------------------------------------------------
//
// One archive holds a root object plus everything it transitively references.
// Each distinct object is written once; references are ids into the archive's
// own object table.
//
//   [archive_version:u32][object_count:u32][index_offset:u32][names_offset:u32]
//   object records, in id order:
//     [id:i32][len:u32][payload][has_components:u8]
//       ([count:u32] {[name:string][len:u32][payload]}*)  if has_components
//   index at index_offset:
//     [count:u32] then per object either
//       [1:u8][path:string]                                  already exists
//       [0:u8][class:string][name][outer:i32]                created on load
//   name table at names_offset (0 when the caller shares one)
//
// Decoding creates every object before reading any payload, so forward and
// backward references resolve alike.

pub mod class_cache;
pub mod custom_versions;
pub mod host;
pub mod reader;
pub mod writer;


use bevy::log::{trace, warn};

use crate::byte_stream::{ByteReader, ByteWriter};
use crate::name_table::{Name, NameTable};
use crate::persistence_types::ClassPath;
use crate::save_error::SaveError;

pub use class_cache::ClassCache;
pub use custom_versions::CustomVersions;
pub use host::{EntityHost, NativeRoot, ObjectHost};
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

use writer::ObjectCollector;

/// Layout version written at the start of every archive.
pub const ARCHIVE_VERSION: u32 = 1;

/// Size of the fixed preamble in bytes.
pub const PREAMBLE_SIZE: usize = 16;

/// The object a pass starts from.
pub enum Root<'r, O> {
    /// A root owned by the persistence layer (world or profile save).
    Native(&'r dyn NativeRoot<O>),
    /// A host object, e.g. one entity inside a container.
    Host(O),
}

/// The object a decode fills in. Never created by the decoder.
pub enum RootMut<'r, O> {
    Native(&'r mut dyn NativeRoot<O>),
    Host(O),
}

/// What a decode did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub objects: usize,
    pub created: usize,
    pub unresolved: usize,
    pub mismatched: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexEntry {
    Loaded(String),
    Created {
        class: ClassPath,
        name: Name,
        outer: i32,
    },
}

// =============================================================================
// Write
// =============================================================================

/// Serialize `root` and everything reachable from it.
///
/// With `names` the archive interns into a table the caller writes elsewhere
/// (containers share one table across all their entities); without it the
/// archive carries its own table.
pub fn write_graph<H: ObjectHost>(
    host: &H,
    root: Root<'_, H::Object>,
    classes: &mut ClassCache,
    names: Option<&mut NameTable>,
    versions: &mut CustomVersions,
) -> Vec<u8> {
    let mut local_names = NameTable::new();
    let owns_names = names.is_none();
    let names = match names {
        Some(shared) => shared,
        None => &mut local_names,
    };

    let (native, host_root) = match root {
        Root::Native(r) => (Some(r), None),
        Root::Host(o) => (None, Some(o)),
    };

    let outer_of = |o: H::Object| {
        if host.existing_path(o).is_some() {
            None
        } else {
            host.outer_of(o)
        }
    };

    let mut collector = ObjectCollector::new(host_root);
    let mut out = ByteWriter::new();
    out.write_u32(ARCHIVE_VERSION);
    let count_at = out.reserve_u32();
    let index_at = out.reserve_u32();
    let names_at = out.reserve_u32();

    while let Some(id) = collector.queue.pop_front() {
        let obj = collector.objects[id];
        out.write_i32(id as i32);

        let payload = {
            let mut ar = ArchiveWriter::new(&mut collector, names, versions, &outer_of);
            match (obj, native) {
                (None, Some(r)) => r.write_root(&mut ar),
                (Some(o), _) if host.is_type_descriptor(o) => {}
                (Some(o), _) => host.write_fields(o, &mut ar),
                (None, None) => {}
            }
            ar.into_bytes()
        };
        out.write_bytes(&payload);

        let components: Vec<(String, H::Object)> = match obj {
            Some(o) if !host.is_type_descriptor(o) => host
                .components(o)
                .into_iter()
                .filter(|(_, c)| classes.has_persistable_fields(host, &host.class_of(*c)))
                .collect(),
            _ => Vec::new(),
        };
        out.write_bool(!components.is_empty());
        if !components.is_empty() {
            out.write_u32(components.len() as u32);
            for (key, component) in &components {
                out.write_str(key);
                let mut ar = ArchiveWriter::new(&mut collector, names, versions, &outer_of);
                host.write_fields(*component, &mut ar);
                out.write_bytes(&ar.into_bytes());
            }
        }

        trace!("Wrote archive object {} ({} bytes)", id, payload.len());
    }

    let object_count = collector.objects.len();
    out.patch_u32(count_at, object_count as u32);
    out.patch_u32(index_at, out.position() as u32);

    out.write_u32(object_count as u32);
    for (i, obj) in collector.objects.iter().enumerate() {
        match (i, obj) {
            (0, None) => {
                let class = native.map(|r| r.root_class()).unwrap_or_default();
                out.write_u8(0);
                out.write_str(class.as_str());
                names.write_name(&mut out, &Name::none());
                out.write_i32(-1);
            }
            (0, Some(o)) => {
                if host.existing_path(*o).is_some() {
                    out.write_u8(1);
                    out.write_str("");
                } else {
                    out.write_u8(0);
                    out.write_str(host.class_of(*o).as_str());
                    names.write_name(&mut out, &host.name_of(*o));
                    out.write_i32(-1);
                }
            }
            (_, Some(o)) => {
                if let Some(path) = host.existing_path(*o) {
                    out.write_u8(1);
                    out.write_str(&path);
                } else {
                    out.write_u8(0);
                    out.write_str(host.class_of(*o).as_str());
                    names.write_name(&mut out, &host.name_of(*o));
                    let outer = host
                        .outer_of(*o)
                        .and_then(|p| collector.id_of(p))
                        .unwrap_or(-1);
                    assert!(
                        outer < i as i32,
                        "Archive object {i} written before its outer {outer}"
                    );
                    out.write_i32(outer);
                }
            }
            (_, None) => {}
        }
    }

    if owns_names {
        out.patch_u32(names_at, out.position() as u32);
        names.write(&mut out);
    }

    out.into_inner()
}

// =============================================================================
// Read
// =============================================================================

struct Preamble {
    object_count: usize,
    index_offset: usize,
    names_offset: usize,
}

fn read_preamble(r: &mut ByteReader<'_>) -> Result<Preamble, SaveError> {
    let version = r.read_u32()?;
    if version > ARCHIVE_VERSION {
        return Err(SaveError::TooNew {
            kind: "archive version",
            found: version,
            supported: ARCHIVE_VERSION,
        });
    }
    let object_count = r.read_u32()? as usize;
    let index_offset = r.read_u32()? as usize;
    let names_offset = r.read_u32()? as usize;
    if object_count == 0 {
        return Err(SaveError::Decode("archive has no objects".into()));
    }
    Ok(Preamble {
        object_count,
        index_offset,
        names_offset,
    })
}

fn read_names(
    r: &ByteReader<'_>,
    preamble: &Preamble,
    shared: Option<&NameTable>,
) -> Result<Option<NameTable>, SaveError> {
    if preamble.names_offset == 0 {
        return match shared {
            Some(_) => Ok(None),
            None => Err(SaveError::Decode(
                "archive uses a shared name table but none was supplied".into(),
            )),
        };
    }
    let mut names = r.clone();
    names.seek(preamble.names_offset)?;
    NameTable::read(&mut names).map(Some)
}

fn read_index(
    r: &ByteReader<'_>,
    preamble: &Preamble,
    names: &NameTable,
) -> Result<Vec<IndexEntry>, SaveError> {
    let mut r = r.clone();
    r.seek(preamble.index_offset)?;
    let count = r.read_u32()? as usize;
    if count != preamble.object_count {
        return Err(SaveError::Decode(format!(
            "archive index has {count} entries for {} objects",
            preamble.object_count
        )));
    }
    // Smallest record is a flag plus an empty string.
    if count > r.remaining() / 5 {
        return Err(SaveError::Truncated {
            needed: count * 5,
            remaining: r.remaining(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        if r.read_bool()? {
            entries.push(IndexEntry::Loaded(r.read_string()?));
        } else {
            let class = ClassPath(r.read_string()?);
            let name = names.read_name(&mut r)?;
            let outer = r.read_i32()?;
            if outer < -1 || outer >= i as i32 {
                return Err(SaveError::Decode(format!(
                    "archive object {i} has outer {outer}"
                )));
            }
            entries.push(IndexEntry::Created { class, name, outer });
        }
    }
    Ok(entries)
}

/// Every type path the archive needs that `host` cannot currently resolve,
/// de-duplicated, in index order.
pub fn classes_to_load<H: ObjectHost>(
    host: &H,
    bytes: &[u8],
    shared_names: Option<&NameTable>,
) -> Result<Vec<ClassPath>, SaveError> {
    let r = ByteReader::new(bytes);
    let mut head = r.clone();
    let preamble = read_preamble(&mut head)?;
    let local = read_names(&r, &preamble, shared_names)?;
    let names = match (&local, shared_names) {
        (Some(n), _) | (None, Some(n)) => n,
        (None, None) => return Ok(Vec::new()),
    };

    let mut missing: Vec<ClassPath> = Vec::new();
    // Entry 0 is the root, which the caller always supplies.
    for entry in read_index(&r, &preamble, names)?.into_iter().skip(1) {
        let path = match entry {
            IndexEntry::Loaded(path) => ClassPath(path),
            IndexEntry::Created { class, .. } => class,
        };
        if host.find_object(path.as_str()).is_none() && !missing.contains(&path) {
            missing.push(path);
        }
    }
    Ok(missing)
}

/// Decode an archive into `root`, creating every other object it describes.
///
/// Objects whose type or path cannot be resolved are skipped with a warning,
/// and so is any payload the host reads incorrectly. Only structural damage
/// and an incompatible root class fail the whole decode.
pub fn read_graph<H: ObjectHost>(
    host: &mut H,
    bytes: &[u8],
    root: RootMut<'_, H::Object>,
    shared_names: Option<&NameTable>,
    versions: &CustomVersions,
    schema_version: u32,
) -> Result<GraphStats, SaveError> {
    let r = ByteReader::new(bytes);
    let mut input = r.clone();
    let preamble = read_preamble(&mut input)?;
    let local = read_names(&r, &preamble, shared_names)?;
    let names = match (&local, shared_names) {
        (Some(n), _) | (None, Some(n)) => n,
        (None, None) => return Err(SaveError::Decode("archive has no name table".into())),
    };
    let index = read_index(&r, &preamble, names)?;

    let (expected, host_root) = match &root {
        RootMut::Native(n) => (n.root_class(), None),
        RootMut::Host(o) => (host.class_of(*o), Some(*o)),
    };

    let mut stats = GraphStats {
        objects: index.len(),
        ..GraphStats::default()
    };

    // Create phase.
    let mut objects: Vec<Option<H::Object>> = Vec::with_capacity(index.len());
    for (i, entry) in index.iter().enumerate() {
        let obj = match (i, entry) {
            (0, IndexEntry::Loaded(_)) => host_root,
            (0, IndexEntry::Created { class, .. }) => {
                if class != &expected && !host.class_is_child_of(class, &expected) {
                    return Err(SaveError::ClassMismatch {
                        expected: expected.to_string(),
                        found: class.to_string(),
                    });
                }
                host_root
            }
            (_, IndexEntry::Loaded(path)) => {
                let found = host.find_object(path);
                if found.is_none() {
                    warn!("Saved object '{}' no longer exists", path);
                }
                found
            }
            (_, IndexEntry::Created { class, name, outer }) => {
                let outer = if *outer >= 0 {
                    objects[*outer as usize]
                } else {
                    None
                };
                let created = host.create_object(class, name, outer);
                match created {
                    Some(_) => stats.created += 1,
                    None => warn!("Couldn't find class '{}' for saved object '{}'", class, name),
                }
                created
            }
        };
        if obj.is_none() && !(i == 0 && host_root.is_none()) {
            stats.unresolved += 1;
        }
        objects.push(obj);
    }

    // Payload phase.
    let mut native = match root {
        RootMut::Native(n) => Some(n),
        RootMut::Host(_) => None,
    };
    for _ in 0..preamble.object_count {
        let id = input.read_i32()?;
        let len = input.read_u32()? as usize;
        let start = input.position();
        let body = input.sub_reader(start, len)?;
        input.skip(len)?;

        let target = if id >= 0 { objects.get(id as usize).copied() } else { None };
        let outcome = match (id, target) {
            (0, Some(None)) => native.as_mut().map(|n| {
                let mut ar = ArchiveReader::new(body, names, &objects, versions, schema_version);
                let res = n.read_root(&mut ar);
                (res, ar.remaining())
            }),
            (_, Some(Some(obj))) if len > 0 => {
                let mut ar = ArchiveReader::new(body, names, &objects, versions, schema_version);
                let res = host.read_fields(obj, &mut ar);
                Some((res, ar.remaining()))
            }
            _ => None,
        };
        match outcome {
            Some((Err(e), _)) => {
                warn!("Archive object {} failed to read: {}", id, e);
                stats.mismatched += 1;
            }
            Some((Ok(()), left)) if left != 0 => {
                warn!("Archive object {} didn't read all its data ({} bytes left)", id, left);
                stats.mismatched += 1;
            }
            _ => {}
        }

        if input.read_bool()? {
            let owner = target.flatten();
            let components = owner.map(|o| host.components(o)).unwrap_or_default();
            let count = input.read_u32()? as usize;
            for _ in 0..count {
                let key = input.read_string()?;
                let body = input.read_bytes()?;
                let Some((_, component)) = components.iter().find(|(k, _)| *k == key) else {
                    trace!("Skipping saved component '{}'", key);
                    continue;
                };
                let mut ar = ArchiveReader::new(
                    ByteReader::new(body),
                    names,
                    &objects,
                    versions,
                    schema_version,
                );
                match host.read_fields(*component, &mut ar) {
                    Err(e) => {
                        warn!("Component '{}' failed to read: {}", key, e);
                        stats.mismatched += 1;
                    }
                    Ok(()) if ar.remaining() != 0 => {
                        warn!("Component '{}' didn't read all its data", key);
                        stats.mismatched += 1;
                    }
                    Ok(()) => {}
                }
            }
        }
    }

    Ok(stats)
}
