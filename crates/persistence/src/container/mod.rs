// ---------------------------------------------------------------------------
// container – packed per-scene (or per-key) entity storage
// ---------------------------------------------------------------------------
//
// A container owns one blob holding every entity written for its key. While
// packed only the blob is kept. Unpacking parses the header and index so a
// single entity can be read back by id without decoding the rest.

pub mod header;
pub mod load_state;

#[cfg(test)]
mod tests_container;

use bevy::log::{debug, error, info, trace, warn};
use bevy::math::Vec3;
use bevy::prelude::Transform;

use crate::archive::{self, ClassCache, CustomVersions, EntityHost, Root, RootMut};
use crate::byte_stream::{ByteReader, ByteWriter};
use crate::name_table::{Name, NameTable};
use crate::persistence_types::{ClassPath, StableId};
use crate::save_error::SaveError;
use crate::type_loader::{AsyncLoadHandle, TypeLoader};

pub use header::{ContainerHeader, EntityIndex, CONTAINER_VERSION};
pub use load_state::{LoadState, SceneReadyAction};

/// One entity handed to [`Container::write_data`].
#[derive(Debug, Clone, Copy)]
pub struct EntityRecord<O> {
    pub object: O,
    pub id: StableId,
    pub dynamic: bool,
    pub persist_transform: bool,
}

/// A dynamic entity to respawn: its id, placement and type.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRecord {
    pub id: StableId,
    pub transform: Transform,
    pub class: ClassPath,
}

/// What a container holds for one id.
pub enum EntityData<'a> {
    /// A reader bounded to exactly this entity's region.
    Data(ByteReader<'a>),
    /// The entity was persistently removed.
    Destroyed,
    /// Nothing saved; first-time defaults apply.
    NoData,
}

/// Outcome of [`Container::read_entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLoad {
    Loaded,
    Destroyed,
    NoData,
}

/// Outcome of [`Container::spawn_dynamic`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnStep {
    /// Spawn these now, in order.
    Spawn(Vec<DynamicRecord>),
    /// Types still loading; spawning happens when they finish.
    Deferred,
    Idle,
}

#[derive(Debug)]
pub struct Container {
    key: Name,
    blob: Vec<u8>,
    header: ContainerHeader,
    unpacked: bool,
    state: LoadState,
    load_handle: Option<AsyncLoadHandle>,
    spawning_id: StableId,
    scene_offset: Option<Vec3>,
}

impl Container {
    /// A container that has never been written. It starts out unpacked.
    pub fn new(key: Name) -> Self {
        Self {
            key,
            blob: Vec::new(),
            header: ContainerHeader::new(),
            unpacked: true,
            state: LoadState::Uninitialized,
            load_handle: None,
            spawning_id: StableId::INVALID,
            scene_offset: None,
        }
    }

    /// A container restored from a save file. It starts out packed.
    pub fn from_blob(key: Name, blob: Vec<u8>) -> Self {
        Self {
            unpacked: false,
            blob,
            ..Self::new(key)
        }
    }

    pub fn key(&self) -> &Name {
        &self.key
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    pub fn is_packed(&self) -> bool {
        !self.unpacked && !self.blob.is_empty()
    }

    pub fn is_unpacked(&self) -> bool {
        self.unpacked
    }

    pub fn has_destroyed(&self) -> bool {
        !self.header.destroyed.is_empty()
    }

    pub fn has_spawned_dynamic(&self) -> bool {
        self.state == LoadState::Complete
    }

    pub fn set_scene_offset(&mut self, offset: Option<Vec3>) {
        self.scene_offset = offset;
    }

    // =========================================================================
    // Pack / unpack
    // =========================================================================

    /// Drop the parsed header and keep the blob. Packing a packed container
    /// does nothing.
    pub fn pack(&mut self, loader: &mut dyn TypeLoader) {
        if !self.unpacked {
            return;
        }
        self.cancel_load(loader);
        self.state = LoadState::Uninitialized;
        self.header = ContainerHeader::new();
        self.unpacked = false;
        debug!("Packed container '{}'", self.key);
    }

    /// Parse the header and index. The container must not already be
    /// unpacked.
    pub fn unpack(&mut self) -> Result<(), SaveError> {
        assert!(
            !self.unpacked,
            "container '{}' unpacked twice without a pack",
            self.key
        );
        self.header = ContainerHeader::new();
        self.unpacked = true;
        if self.blob.is_empty() {
            return Ok(());
        }
        match ContainerHeader::read(&self.blob) {
            Ok(header) => {
                debug!(
                    "Unpacked container '{}' ({} entities, {} destroyed)",
                    self.key,
                    header.index.len(),
                    header.destroyed.len()
                );
                self.header = header;
                Ok(())
            }
            Err(e) => {
                warn!("Container '{}' is unreadable, dropping its data: {}", self.key, e);
                self.blob.clear();
                Err(e)
            }
        }
    }

    fn ensure_unpacked(&mut self) {
        if !self.unpacked {
            // The error is already logged and the blob dropped.
            let _ = self.unpack();
        }
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Fully rewrite the blob from `entities`. Destroyed-entity records
    /// survive the rewrite.
    pub fn write_data<H: EntityHost>(
        &mut self,
        host: &H,
        entities: &[EntityRecord<H::Object>],
        classes: &mut ClassCache,
    ) {
        self.ensure_unpacked();
        trace!("Writing container '{}' ({} entities)", self.key, entities.len());

        let destroyed = std::mem::take(&mut self.header.destroyed);
        let mut header = ContainerHeader::new();
        header.destroyed = destroyed;
        let mut names = NameTable::new();
        let mut versions = CustomVersions::new();

        let mut out = ByteWriter::new();
        header.write_fixed(&mut out);

        for entity in entities {
            let region = self.write_entity(host, entity, classes, &mut names, &mut versions);
            header.index.push(EntityIndex {
                id: entity.id,
                offset: out.position() as u32,
                length: region.len() as u32,
            });
            out.write_raw(&region);
        }
        header.index.sort_by_key(|e| e.id);
        if header.index.windows(2).any(|w| w[0].id == w[1].id) {
            error!("Container '{}' has duplicate entity ids", self.key);
            header.index.dedup_by_key(|e| e.id);
        }

        header.dynamic_offset = out.position() as u32;
        let dynamic: Vec<&EntityRecord<H::Object>> =
            entities.iter().filter(|e| e.dynamic).collect();
        out.write_u32(dynamic.len() as u32);
        for entity in dynamic {
            out.write_u64(entity.id.0);
            out.write_transform(&self.remove_offset(host.transform_of(entity.object)));
            out.write_str(host.class_of(entity.object).as_str());
        }

        header.index_offset = out.position() as u32;
        header.versions = versions;
        header.names = names;
        header.write_variable(&mut out);
        out.patch_u32(4, header.index_offset);
        out.patch_u32(8, header.dynamic_offset);

        self.blob = out.into_inner();
        self.header = header;
        self.unpacked = true;
    }

    fn write_entity<H: EntityHost>(
        &self,
        host: &H,
        entity: &EntityRecord<H::Object>,
        classes: &mut ClassCache,
        names: &mut NameTable,
        versions: &mut CustomVersions,
    ) -> Vec<u8> {
        let mut region = ByteWriter::new();
        region.write_bool(entity.persist_transform);
        if entity.persist_transform {
            region.write_transform(&self.remove_offset(host.transform_of(entity.object)));
        }
        let graph = archive::write_graph(
            host,
            Root::Host(entity.object),
            classes,
            Some(names),
            versions,
        );
        region.write_raw(&graph);
        region.into_inner()
    }

    fn remove_offset(&self, mut t: Transform) -> Transform {
        if let Some(offset) = self.scene_offset {
            t.translation -= offset;
        }
        t
    }

    fn add_offset(&self, mut t: Transform) -> Transform {
        if let Some(offset) = self.scene_offset {
            t.translation += offset;
        }
        t
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Random access to one entity's saved bytes.
    pub fn load_entity(&self, id: StableId) -> EntityData<'_> {
        if !self.blob.is_empty() && !self.unpacked {
            error!("Loading entity {} from packed container '{}'", id, self.key);
            return EntityData::NoData;
        }
        if let Some(entry) = self.header.find(id) {
            let start = entry.offset as usize;
            let end = start + entry.length as usize;
            return EntityData::Data(ByteReader::new(&self.blob[start..end]));
        }
        if self.header.is_destroyed(id) {
            return EntityData::Destroyed;
        }
        EntityData::NoData
    }

    /// Restore `obj` from the region saved for `id`.
    pub fn read_entity<H: EntityHost>(
        &self,
        host: &mut H,
        obj: H::Object,
        id: StableId,
        schema_version: u32,
    ) -> Result<EntityLoad, SaveError> {
        let mut r = match self.load_entity(id) {
            EntityData::Data(r) => r,
            EntityData::Destroyed => {
                debug!("Entity {} in '{}' was persistently destroyed", id, self.key);
                return Ok(EntityLoad::Destroyed);
            }
            EntityData::NoData => return Ok(EntityLoad::NoData),
        };

        if r.read_bool()? {
            let t = r.read_transform()?;
            host.set_transform(obj, self.add_offset(t));
        }
        let graph = r.take(r.remaining())?;
        let stats = archive::read_graph(
            host,
            graph,
            RootMut::Host(obj),
            Some(&self.header.names),
            &self.header.versions,
            schema_version,
        )?;
        trace!("Read entity {} from '{}': {:?}", id, self.key, stats);
        Ok(EntityLoad::Loaded)
    }

    /// Record `id` as persistently destroyed. Returns false if it already was.
    pub fn set_destroyed(&mut self, id: StableId) -> bool {
        self.ensure_unpacked();
        if self.header.is_destroyed(id) {
            warn!("Entity {} in '{}' destroyed twice", id, self.key);
            return false;
        }
        self.header.destroyed.push(id);
        true
    }

    // =========================================================================
    // Dynamic entities
    // =========================================================================

    /// Every dynamic record, with the scene offset applied.
    pub fn dynamic_records(&self) -> Result<Vec<DynamicRecord>, SaveError> {
        if self.blob.is_empty() || !self.unpacked {
            return Ok(Vec::new());
        }
        let mut r = ByteReader::new(&self.blob);
        r.seek(self.header.dynamic_offset as usize)?;
        let count = r.read_u32()? as usize;
        let mut records = Vec::with_capacity(count.min(r.remaining() / 48));
        for _ in 0..count {
            let id = StableId(r.read_u64()?);
            let transform = self.add_offset(r.read_transform()?);
            let class = ClassPath(r.read_string()?);
            records.push(DynamicRecord {
                id,
                transform,
                class,
            });
        }
        Ok(records)
    }

    /// Start loading every type the dynamic section needs, as one batch.
    /// Only acts from `Uninitialized`.
    pub fn preload_dynamic(&mut self, loader: &mut dyn TypeLoader) -> Result<(), SaveError> {
        if self.state != LoadState::Uninitialized {
            return Ok(());
        }
        let records = self.dynamic_records()?;
        if records.is_empty() {
            self.state = LoadState::Complete;
            return Ok(());
        }

        let mut missing: Vec<ClassPath> = Vec::new();
        for record in &records {
            if !loader.is_resident(&record.class) && !missing.contains(&record.class) {
                missing.push(record.class.clone());
            }
        }
        if missing.is_empty() {
            // Types are ready but the spawn itself still waits for the
            // scene, so this is SpawningDynamicActors and not Complete.
            self.state = LoadState::SpawningDynamicActors;
            return Ok(());
        }

        info!(
            "Requesting load of {} dynamic entity type(s) for container '{}'",
            missing.len(),
            self.key
        );
        self.load_handle = Some(loader.request(missing));
        self.state = LoadState::Preloading;
        Ok(())
    }

    /// The scene is ready for spawns.
    pub fn spawn_dynamic(&mut self) -> Result<SpawnStep, SaveError> {
        let (next, action) = self.state.on_scene_ready();
        match action {
            SceneReadyAction::Spawn => {
                let records = self.dynamic_records()?;
                self.state = next;
                self.load_handle = None;
                if !records.is_empty() {
                    info!(
                        "Spawning {} dynamic entities for container '{}'",
                        records.len(),
                        self.key
                    );
                }
                Ok(SpawnStep::Spawn(records))
            }
            SceneReadyAction::Defer => {
                info!(
                    "Scene for container '{}' is ready before its dynamic entity types, delaying spawn",
                    self.key
                );
                self.state = next;
                Ok(SpawnStep::Deferred)
            }
            SceneReadyAction::Nothing => Ok(SpawnStep::Idle),
        }
    }

    /// The batched type load `handle` finished. Returns true when the scene
    /// was already waiting, in which case the caller spawns right away.
    pub fn on_types_loaded(&mut self, handle: AsyncLoadHandle) -> bool {
        if self.load_handle != Some(handle) {
            return false;
        }
        let (next, spawn_now) = self.state.on_types_loaded();
        self.state = next;
        if spawn_now {
            info!("Dynamic entity types for '{}' loaded, spawning", self.key);
        } else {
            info!("Dynamic entity types for '{}' loaded", self.key);
        }
        spawn_now
    }

    pub fn load_handle(&self) -> Option<AsyncLoadHandle> {
        self.load_handle
    }

    /// With `check_completed`, a load the loader already reports as done
    /// (but whose completion has not been routed yet) does not count.
    pub fn is_preloading(&self, check_completed: bool, loader: &dyn TypeLoader) -> bool {
        if check_completed && self.state.is_preloading() {
            if let Some(handle) = self.load_handle {
                if loader.is_complete(handle) {
                    return false;
                }
            }
        }
        self.state.is_preloading()
    }

    pub fn cancel_load(&mut self, loader: &mut dyn TypeLoader) {
        if let Some(handle) = self.load_handle.take() {
            debug!("Cancelling type load {:?} for '{}'", handle, self.key);
            loader.cancel(handle);
        }
    }

    pub fn set_spawning_id(&mut self, id: StableId) {
        self.spawning_id = id;
    }

    /// The id of the dynamic entity being spawned right now, consumed by the
    /// entity's initialization.
    pub fn take_spawning_id(&mut self) -> Option<StableId> {
        let id = std::mem::replace(&mut self.spawning_id, StableId::INVALID);
        id.is_valid().then_some(id)
    }
}
