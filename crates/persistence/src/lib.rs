//! Object-graph persistence for a game world.
//!
//! Entities are grouped into per-scene containers that stay packed as byte
//! blobs until their scene loads. Slots and the player profile are written
//! as versioned, checksummed and compressed save files by a single
//! background worker, and every result is delivered back on the thread
//! that pumps the [`PersistenceManager`].

pub mod archive;
pub mod byte_stream;
pub mod container;
pub mod manager;
pub mod name_table;
pub mod persistence_types;
pub mod plugin;
pub mod registry;
pub mod save_error;
pub mod save_game;
pub mod save_header;
pub mod settings;
pub mod storage;
pub mod type_loader;

#[cfg(test)]
pub mod test_support;


pub use archive::{EntityHost, ObjectHost};
pub use manager::{EndReason, EntityDesc, PersistenceEvent, PersistenceManager, PersistentReference};
pub use name_table::Name;
pub use persistence_types::{
    ClassPath, HasResult, LoadResult, PersistenceKey, SaveResult, SceneId, StableId,
};
pub use plugin::{PersistenceNotification, PersistencePlugin};
pub use save_error::SaveError;
pub use settings::PersistenceSettings;
pub use storage::{FileSystemBackend, MemoryBackend, StorageBackend};
pub use type_loader::{ManualTypeLoader, TypeLoader};
