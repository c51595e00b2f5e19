// ---------------------------------------------------------------------------
// save_game – the world and profile save roots
// ---------------------------------------------------------------------------

use std::hash::Hash;

use bevy::log::info;

use crate::archive::{ArchiveReader, ArchiveWriter, NativeRoot};
use crate::container::Container;
use crate::name_table::Name;
use crate::persistence_types::{ClassPath, StableId};
use crate::save_error::SaveError;

pub const WORLD_ROOT_CLASS: &str = "persistence.SaveGameWorld";
pub const PROFILE_ROOT_CLASS: &str = "persistence.SaveGameProfile";

const WORLD_VERSION_KEY: &str = "persistence.world";
const WORLD_VERSION: u32 = 1;
const PROFILE_VERSION_KEY: &str = "persistence.profile";
const PROFILE_VERSION: u32 = 1;

// =============================================================================
// World
// =============================================================================

/// Everything saved for one world slot.
#[derive(Debug)]
pub struct SaveGameWorld<O> {
    /// Last id handed out for a runtime entity.
    pub unique_id_generator: StableId,
    pub requires_full_game: bool,
    pub containers: Vec<Container>,
    /// Host object carried along with the save.
    pub user_data: Option<O>,
}

impl<O> Default for SaveGameWorld<O> {
    fn default() -> Self {
        Self {
            unique_id_generator: StableId::RUNTIME_BASE,
            requires_full_game: false,
            containers: Vec::new(),
            user_data: None,
        }
    }
}

impl<O> SaveGameWorld<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next runtime id. Never returns [`StableId::INVALID`].
    pub fn generate_id(&mut self) -> StableId {
        let mut next = self.unique_id_generator.0.wrapping_add(1);
        if next == StableId::INVALID.0 {
            next = StableId::RUNTIME_BASE.0 + 1;
        }
        self.unique_id_generator = StableId(next);
        self.unique_id_generator
    }

    pub fn container(&self, key: &Name) -> Option<&Container> {
        self.containers.iter().find(|c| c.key() == key)
    }

    pub fn container_mut(&mut self, key: &Name) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.key() == key)
    }

    pub fn get_or_create_container(&mut self, key: &Name) -> &mut Container {
        let index = match self.containers.iter().position(|c| c.key() == key) {
            Some(i) => i,
            None => {
                info!("Creating container '{}'", key);
                self.containers.push(Container::new(key.clone()));
                self.containers.len() - 1
            }
        };
        &mut self.containers[index]
    }

    pub fn remove_container(&mut self, key: &Name) -> Option<Container> {
        let index = self.containers.iter().position(|c| c.key() == key)?;
        Some(self.containers.remove(index))
    }

    /// Keys of containers named `pattern`, or containing it when `substring`.
    pub fn matching_containers(&self, pattern: &str, substring: bool) -> Vec<Name> {
        self.containers
            .iter()
            .map(|c| c.key())
            .filter(|k| {
                let key = k.to_string();
                if substring {
                    key.contains(pattern)
                } else {
                    key == pattern
                }
            })
            .cloned()
            .collect()
    }
}

impl<O: Copy + Eq + Hash> NativeRoot<O> for SaveGameWorld<O> {
    fn root_class(&self) -> ClassPath {
        ClassPath::new(WORLD_ROOT_CLASS)
    }

    fn write_root(&self, ar: &mut ArchiveWriter<'_, O>) {
        ar.use_custom_version(WORLD_VERSION_KEY, WORLD_VERSION);
        ar.write_u64(self.unique_id_generator.0);
        ar.write_bool(self.requires_full_game);
        ar.write_u32(self.containers.len() as u32);
        for container in &self.containers {
            ar.write_name(container.key());
            ar.write_bytes(container.blob());
        }
        ar.write_object(self.user_data);
    }

    fn read_root(&mut self, ar: &mut ArchiveReader<'_, O>) -> Result<(), SaveError> {
        self.unique_id_generator = StableId(ar.read_u64()?);
        self.requires_full_game = ar.read_bool()?;
        let count = ar.read_u32()? as usize;
        let mut containers = Vec::with_capacity(count.min(ar.remaining() / 6));
        for _ in 0..count {
            let key = ar.read_name()?;
            let blob = ar.read_bytes()?;
            containers.push(Container::from_blob(key, blob));
        }
        self.containers = containers;
        self.user_data = ar.read_object()?;
        Ok(())
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Per-user data shared by every world slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveGameProfile<O> {
    pub user_settings: Vec<(String, String)>,
    pub achievement_progress: Vec<(Name, i32)>,
    pub user_data: Option<O>,
}

impl<O> Default for SaveGameProfile<O> {
    fn default() -> Self {
        Self {
            user_settings: Vec::new(),
            achievement_progress: Vec::new(),
            user_data: None,
        }
    }
}

impl<O> SaveGameProfile<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.user_settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_setting(&mut self, key: &str, value: &str) {
        match self.user_settings.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.user_settings.push((key.to_string(), value.to_string())),
        }
    }

    pub fn achievement_progress(&self, achievement: &Name) -> i32 {
        self.achievement_progress
            .iter()
            .find(|(a, _)| a == achievement)
            .map_or(0, |(_, p)| *p)
    }

    pub fn set_achievement_progress(&mut self, achievement: Name, progress: i32) {
        match self.achievement_progress.iter_mut().find(|(a, _)| *a == achievement) {
            Some((_, p)) => *p = progress,
            None => self.achievement_progress.push((achievement, progress)),
        }
    }
}

impl<O: Copy + Eq + Hash> NativeRoot<O> for SaveGameProfile<O> {
    fn root_class(&self) -> ClassPath {
        ClassPath::new(PROFILE_ROOT_CLASS)
    }

    fn write_root(&self, ar: &mut ArchiveWriter<'_, O>) {
        ar.use_custom_version(PROFILE_VERSION_KEY, PROFILE_VERSION);
        ar.write_u32(self.user_settings.len() as u32);
        for (k, v) in &self.user_settings {
            ar.write_str(k);
            ar.write_str(v);
        }
        ar.write_u32(self.achievement_progress.len() as u32);
        for (name, progress) in &self.achievement_progress {
            ar.write_name(name);
            ar.write_i32(*progress);
        }
        ar.write_object(self.user_data);
    }

    fn read_root(&mut self, ar: &mut ArchiveReader<'_, O>) -> Result<(), SaveError> {
        let count = ar.read_u32()? as usize;
        let mut settings = Vec::with_capacity(count.min(ar.remaining() / 8));
        for _ in 0..count {
            settings.push((ar.read_string()?, ar.read_string()?));
        }
        let count = ar.read_u32()? as usize;
        let mut achievements = Vec::with_capacity(count.min(ar.remaining() / 6));
        for _ in 0..count {
            achievements.push((ar.read_name()?, ar.read_i32()?));
        }
        self.user_settings = settings;
        self.achievement_progress = achievements;
        self.user_data = ar.read_object()?;
        Ok(())
    }
}
