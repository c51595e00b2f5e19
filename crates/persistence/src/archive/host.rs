// ---------------------------------------------------------------------------
// Host reflection boundary for the graph codec
// ---------------------------------------------------------------------------

use std::fmt::Debug;
use std::hash::Hash;

use bevy::prelude::Transform;

use crate::archive::reader::ArchiveReader;
use crate::archive::writer::ArchiveWriter;
use crate::name_table::Name;
use crate::persistence_types::{ClassPath, SceneId};
use crate::save_error::SaveError;

/// The host's object model, as seen by the codec.
///
/// The codec never owns objects. It only holds `Object` handles for the
/// duration of one pass and asks the host to describe, write, read, find and
/// create them.
pub trait ObjectHost {
    /// Cheap handle to a host object. Identity is handle equality.
    type Object: Copy + Eq + Hash + Debug;

    /// Class of the object.
    fn class_of(&self, obj: Self::Object) -> ClassPath;

    /// Name of the object, used to recreate runtime objects.
    fn name_of(&self, obj: Self::Object) -> Name;

    /// The object that owns `obj`, if any.
    fn outer_of(&self, obj: Self::Object) -> Option<Self::Object>;

    /// Stable path for objects that already exist when a save is loaded
    /// (pre-placed objects and type descriptors). `None` means the object
    /// was created at run time and must be recreated from its class.
    fn existing_path(&self, obj: Self::Object) -> Option<String>;

    /// Type descriptors are referenced by identity only; their fields are
    /// never written.
    fn is_type_descriptor(&self, obj: Self::Object) -> bool {
        let _ = obj;
        false
    }

    /// Write the object's save-flagged fields.
    fn write_fields(&self, obj: Self::Object, ar: &mut ArchiveWriter<'_, Self::Object>);

    /// Read back the fields written by [`ObjectHost::write_fields`].
    fn read_fields(
        &mut self,
        obj: Self::Object,
        ar: &mut ArchiveReader<'_, Self::Object>,
    ) -> Result<(), SaveError>;

    /// Resolve an existing object or a resident type descriptor by path.
    fn find_object(&self, path: &str) -> Option<Self::Object>;

    /// Create a runtime object of `class`. `None` when the class is unknown.
    fn create_object(
        &mut self,
        class: &ClassPath,
        name: &Name,
        outer: Option<Self::Object>,
    ) -> Option<Self::Object>;

    /// Whether `class` is `base` or derives from it.
    fn class_is_child_of(&self, class: &ClassPath, base: &ClassPath) -> bool {
        let mut current = Some(class.clone());
        while let Some(c) = current {
            if &c == base {
                return true;
            }
            current = self.super_class(&c);
        }
        false
    }

    /// Named sub-objects (components) that are saved along with `obj`.
    fn components(&self, obj: Self::Object) -> Vec<(String, Self::Object)> {
        let _ = obj;
        Vec::new()
    }

    /// Whether `class` itself (not its ancestors) declares save-flagged fields.
    fn class_declares_save_fields(&self, class: &ClassPath) -> bool;

    /// Direct parent class.
    fn super_class(&self, class: &ClassPath) -> Option<ClassPath>;
}

/// A root object owned by the persistence layer rather than the host (the
/// world and profile saves). It is always object 0 of its archive.
pub trait NativeRoot<O> {
    fn root_class(&self) -> ClassPath;

    fn write_root(&self, ar: &mut ArchiveWriter<'_, O>);

    fn read_root(&mut self, ar: &mut ArchiveReader<'_, O>) -> Result<(), SaveError>;
}

/// Scene-level capabilities needed to persist whole entities (placement and
/// dynamic respawn) on top of the object graph.
pub trait EntityHost: ObjectHost {
    fn transform_of(&self, obj: Self::Object) -> Transform;

    fn set_transform(&mut self, obj: Self::Object, transform: Transform);

    /// Spawn an entity of `class` into `scene` at `transform`. `None` when the
    /// class is not available.
    fn spawn_entity(
        &mut self,
        class: &ClassPath,
        scene: SceneId,
        transform: &Transform,
    ) -> Option<Self::Object>;
}
