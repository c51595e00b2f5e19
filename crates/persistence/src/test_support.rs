//! In-memory host used by the unit tests.
//!
//! `TestWorld` is a tiny object model: every object has a class, a name, an
//! optional outer, an `i32` value, a label and a list of references. Classes
//! form a single-inheritance tree, and a class is only usable once the shared
//! [`ManualTypeLoader`] reports it resident.

use std::cell::Cell;
use std::collections::HashMap;

use bevy::prelude::Transform;

use crate::archive::{ArchiveReader, ArchiveWriter, EntityHost, ObjectHost};
use crate::name_table::Name;
use crate::persistence_types::{ClassPath, SceneId};
use crate::save_error::SaveError;
use crate::type_loader::{ManualTypeLoader, TypeLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub u32);

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub super_class: Option<ClassPath>,
    pub declares_fields: bool,
    /// Instances read back less than they wrote.
    pub short_read: bool,
}

#[derive(Debug, Clone)]
pub struct TestObject {
    pub class: ClassPath,
    pub name: Name,
    pub outer: Option<ObjId>,
    pub path: Option<String>,
    pub descriptor: bool,
    pub value: i32,
    pub label: String,
    pub refs: Vec<Option<ObjId>>,
    pub components: Vec<(String, ObjId)>,
    pub transform: Transform,
    pub scene: Option<SceneId>,
}

impl TestObject {
    fn new(class: ClassPath, name: Name) -> Self {
        Self {
            class,
            name,
            outer: None,
            path: None,
            descriptor: false,
            value: 0,
            label: String::new(),
            refs: Vec::new(),
            components: Vec::new(),
            transform: Transform::IDENTITY,
            scene: None,
        }
    }
}

pub const DESCRIPTOR_CLASS: &str = "core.Class";

pub struct TestWorld {
    pub loader: ManualTypeLoader,
    classes: HashMap<ClassPath, ClassDef>,
    descriptors: HashMap<ClassPath, ObjId>,
    objects: Vec<TestObject>,
    class_queries: Cell<usize>,
    pub spawned: Vec<ObjId>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            loader: ManualTypeLoader::new(),
            classes: HashMap::new(),
            descriptors: HashMap::new(),
            objects: Vec::new(),
            class_queries: Cell::new(0),
            spawned: Vec::new(),
        }
    }

    /// Define a class that is resident straight away.
    pub fn define_class(&mut self, name: &str, super_class: Option<&str>, declares_fields: bool) {
        self.define_unloaded_class(name, super_class, declares_fields);
        self.loader.mark_resident(name);
    }

    /// Define a class that has to go through the loader before use.
    pub fn define_unloaded_class(
        &mut self,
        name: &str,
        super_class: Option<&str>,
        declares_fields: bool,
    ) {
        let class = ClassPath::new(name);
        self.classes.insert(
            class.clone(),
            ClassDef {
                super_class: super_class.map(ClassPath::new),
                declares_fields,
                short_read: false,
            },
        );
        let mut descriptor = TestObject::new(ClassPath::new(DESCRIPTOR_CLASS), Name::new(name));
        descriptor.path = Some(name.to_string());
        descriptor.descriptor = true;
        let id = self.push(descriptor);
        self.descriptors.insert(class, id);
    }

    pub fn set_short_read(&mut self, class: &str) {
        if let Some(def) = self.classes.get_mut(&ClassPath::new(class)) {
            def.short_read = true;
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        let class = ClassPath::new(class);
        self.classes.remove(&class);
        self.loader.evict(&class);
    }

    fn push(&mut self, obj: TestObject) -> ObjId {
        self.objects.push(obj);
        ObjId(self.objects.len() as u32 - 1)
    }

    /// A runtime object, recreated from its class on load.
    pub fn spawn(&mut self, class: &str, name: &str) -> ObjId {
        self.push(TestObject::new(ClassPath::new(class), Name::new(name)))
    }

    /// A pre-placed object, found again by `path` on load.
    pub fn spawn_placed(&mut self, class: &str, name: &str, path: &str) -> ObjId {
        let mut obj = TestObject::new(ClassPath::new(class), Name::new(name));
        obj.path = Some(path.to_string());
        self.push(obj)
    }

    pub fn add_component(&mut self, owner: ObjId, key: &str, class: &str) -> ObjId {
        let mut component = TestObject::new(ClassPath::new(class), Name::new(key));
        component.outer = Some(owner);
        let id = self.push(component);
        self.obj_mut(owner).components.push((key.to_string(), id));
        id
    }

    pub fn descriptor(&self, class: &str) -> ObjId {
        self.descriptors[&ClassPath::new(class)]
    }

    pub fn obj(&self, id: ObjId) -> &TestObject {
        &self.objects[id.0 as usize]
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut TestObject {
        &mut self.objects[id.0 as usize]
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn class_queries(&self) -> usize {
        self.class_queries.get()
    }

    fn is_usable(&self, class: &ClassPath) -> bool {
        self.classes.contains_key(class) && self.loader.is_resident(class)
    }
}

impl ObjectHost for TestWorld {
    type Object = ObjId;

    fn class_of(&self, obj: ObjId) -> ClassPath {
        self.obj(obj).class.clone()
    }

    fn name_of(&self, obj: ObjId) -> Name {
        self.obj(obj).name.clone()
    }

    fn outer_of(&self, obj: ObjId) -> Option<ObjId> {
        self.obj(obj).outer
    }

    fn existing_path(&self, obj: ObjId) -> Option<String> {
        self.obj(obj).path.clone()
    }

    fn is_type_descriptor(&self, obj: ObjId) -> bool {
        self.obj(obj).descriptor
    }

    fn write_fields(&self, obj: ObjId, ar: &mut ArchiveWriter<'_, ObjId>) {
        let o = self.obj(obj);
        ar.use_custom_version("test.object", 2);
        ar.write_i32(o.value);
        ar.write_str(&o.label);
        ar.write_u32(o.refs.len() as u32);
        for r in &o.refs {
            ar.write_object(*r);
        }
    }

    fn read_fields(
        &mut self,
        obj: ObjId,
        ar: &mut ArchiveReader<'_, ObjId>,
    ) -> Result<(), SaveError> {
        let short = self
            .classes
            .get(&self.obj(obj).class)
            .is_some_and(|c| c.short_read);
        let value = ar.read_i32()?;
        self.obj_mut(obj).value = value;
        if short {
            return Ok(());
        }
        let label = ar.read_string()?;
        let count = ar.read_u32()? as usize;
        let mut refs = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            refs.push(ar.read_object()?);
        }
        let o = self.obj_mut(obj);
        o.label = label;
        o.refs = refs;
        Ok(())
    }

    fn find_object(&self, path: &str) -> Option<ObjId> {
        if let Some(i) = self
            .objects
            .iter()
            .position(|o| !o.descriptor && o.path.as_deref() == Some(path))
        {
            return Some(ObjId(i as u32));
        }
        let class = ClassPath::new(path);
        if self.is_usable(&class) {
            return self.descriptors.get(&class).copied();
        }
        None
    }

    fn create_object(
        &mut self,
        class: &ClassPath,
        name: &Name,
        outer: Option<ObjId>,
    ) -> Option<ObjId> {
        if !self.is_usable(class) {
            return None;
        }
        let mut obj = TestObject::new(class.clone(), name.clone());
        obj.outer = outer;
        Some(self.push(obj))
    }

    fn components(&self, obj: ObjId) -> Vec<(String, ObjId)> {
        self.obj(obj).components.clone()
    }

    fn class_declares_save_fields(&self, class: &ClassPath) -> bool {
        self.class_queries.set(self.class_queries.get() + 1);
        self.classes.get(class).is_some_and(|c| c.declares_fields)
    }

    fn super_class(&self, class: &ClassPath) -> Option<ClassPath> {
        self.classes.get(class).and_then(|c| c.super_class.clone())
    }
}

impl EntityHost for TestWorld {
    fn transform_of(&self, obj: ObjId) -> Transform {
        self.obj(obj).transform
    }

    fn set_transform(&mut self, obj: ObjId, transform: Transform) {
        self.obj_mut(obj).transform = transform;
    }

    fn spawn_entity(
        &mut self,
        class: &ClassPath,
        scene: SceneId,
        transform: &Transform,
    ) -> Option<ObjId> {
        let id = self.create_object(class, &Name::new(class.as_str()), None)?;
        let obj = self.obj_mut(id);
        obj.scene = Some(scene);
        obj.transform = *transform;
        self.spawned.push(id);
        Some(id)
    }
}
