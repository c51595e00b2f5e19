use bevy::math::Vec3;
use bevy::prelude::Transform;

use super::*;
use crate::test_support::{ObjId, TestWorld};
use crate::type_loader::ManualTypeLoader;

fn world() -> TestWorld {
    let mut w = TestWorld::new();
    w.define_class("Game.Door", None, true);
    w
}

fn placed(id: u64, obj: ObjId) -> EntityRecord<ObjId> {
    EntityRecord {
        object: obj,
        id: StableId(id),
        dynamic: false,
        persist_transform: false,
    }
}

fn dynamic(id: u64, obj: ObjId) -> EntityRecord<ObjId> {
    EntityRecord {
        object: obj,
        id: StableId(id),
        dynamic: true,
        persist_transform: true,
    }
}

/// Write `records` from `src` and return a packed copy of the container.
fn saved(src: &TestWorld, records: &[EntityRecord<ObjId>]) -> Container {
    let mut c = Container::new(Name::new("level1"));
    c.write_data(src, records, &mut ClassCache::new());
    Container::from_blob(Name::new("level1"), c.blob().to_vec())
}

#[test]
fn test_entity_reference_resolves_after_unpack() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let b = src.spawn_placed("Game.Door", "b", "level1.b");
    src.obj_mut(a).refs = vec![Some(b)];
    src.obj_mut(a).value = 10;
    src.obj_mut(b).value = 20;

    let mut c = saved(&src, &[placed(1, a), placed(2, b)]);
    assert!(c.is_packed());
    c.unpack().unwrap();

    let mut dst = world();
    let a2 = dst.spawn_placed("Game.Door", "a", "level1.a");
    let b2 = dst.spawn_placed("Game.Door", "b", "level1.b");
    assert_eq!(
        c.read_entity(&mut dst, a2, StableId(1), 0).unwrap(),
        EntityLoad::Loaded
    );
    assert_eq!(dst.obj(a2).value, 10);
    assert_eq!(dst.obj(a2).refs, vec![Some(b2)]);

    // b2 is the entity saved under id 2.
    c.read_entity(&mut dst, b2, StableId(2), 0).unwrap();
    assert_eq!(dst.obj(b2).value, 20);
}

#[test]
fn test_load_entity_is_bounded_to_its_region() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let b = src.spawn_placed("Game.Door", "b", "level1.b");
    src.obj_mut(b).label = "x".repeat(100);

    let mut c = saved(&src, &[placed(1, a), placed(2, b)]);
    c.unpack().unwrap();
    let len_a = c.header().find(StableId(1)).unwrap().length as usize;
    let len_b = c.header().find(StableId(2)).unwrap().length as usize;
    assert!(len_b > len_a + 90);

    match c.load_entity(StableId(1)) {
        EntityData::Data(r) => assert_eq!(r.len(), len_a),
        _ => panic!("expected data for id 1"),
    }
    assert!(matches!(c.load_entity(StableId(3)), EntityData::NoData));
}

#[test]
fn test_destroyed_ids_survive_empty_rewrite() {
    let src = world();
    let mut c = Container::new(Name::new("level1"));
    assert!(c.set_destroyed(StableId(7)));
    c.write_data(&src, &[], &mut ClassCache::new());
    assert!(c.has_destroyed());

    let mut loader = ManualTypeLoader::new();
    c.pack(&mut loader);
    assert!(c.is_packed());
    assert!(!c.has_destroyed());
    c.unpack().unwrap();
    assert!(c.has_destroyed());
    assert!(matches!(c.load_entity(StableId(7)), EntityData::Destroyed));

    let mut dst = world();
    let door = dst.spawn_placed("Game.Door", "d", "level1.d");
    assert_eq!(
        c.read_entity(&mut dst, door, StableId(7), 0).unwrap(),
        EntityLoad::Destroyed
    );
}

#[test]
fn test_set_destroyed_twice_is_rejected() {
    let mut c = Container::new(Name::new("level1"));
    assert!(c.set_destroyed(StableId(7)));
    assert!(!c.set_destroyed(StableId(7)));
    assert_eq!(c.header().destroyed, vec![StableId(7)]);
}

#[test]
fn test_pack_is_idempotent() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let mut c = saved(&src, &[placed(1, a)]);
    let blob = c.blob().to_vec();
    let mut loader = ManualTypeLoader::new();

    c.pack(&mut loader);
    c.pack(&mut loader);
    assert!(c.is_packed());
    assert_eq!(c.blob(), blob.as_slice());

    c.unpack().unwrap();
    assert!(c.is_unpacked());
    c.pack(&mut loader);
    c.pack(&mut loader);
    assert!(c.is_packed());
    assert_eq!(c.blob(), blob.as_slice());
}

#[test]
#[should_panic(expected = "unpacked twice")]
fn test_unpack_twice_is_a_logic_error() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let mut c = saved(&src, &[placed(1, a)]);
    c.unpack().unwrap();
    let _ = c.unpack();
}

#[test]
fn test_write_is_deterministic() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let b = src.spawn("Game.Door", "b");
    src.obj_mut(a).refs = vec![Some(b)];
    src.obj_mut(b).transform = Transform::from_xyz(1.0, 2.0, 3.0);

    let records = [placed(5, a), dynamic(2, b)];
    let mut c = Container::new(Name::new("level1"));
    c.write_data(&src, &records, &mut ClassCache::new());
    let first = c.blob().to_vec();
    c.write_data(&src, &records, &mut ClassCache::new());
    assert_eq!(c.blob(), first.as_slice());

    // Index is sorted regardless of write order.
    let ids: Vec<StableId> = c.header().index.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![StableId(2), StableId(5)]);
}

#[test]
fn test_scene_offset_removed_on_write_added_on_read() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    src.obj_mut(a).transform = Transform::from_xyz(105.0, 1.0, 0.0);

    let mut c = Container::new(Name::new("level1"));
    c.set_scene_offset(Some(Vec3::new(100.0, 0.0, 0.0)));
    let mut record = placed(1, a);
    record.persist_transform = true;
    c.write_data(&src, &[record], &mut ClassCache::new());

    let mut copy = Container::from_blob(Name::new("level1"), c.blob().to_vec());
    copy.unpack().unwrap();
    copy.set_scene_offset(Some(Vec3::new(200.0, 0.0, 0.0)));
    let mut dst = world();
    let a2 = dst.spawn_placed("Game.Door", "a", "level1.a");
    copy.read_entity(&mut dst, a2, StableId(1), 0).unwrap();
    assert_eq!(dst.obj(a2).transform.translation, Vec3::new(205.0, 1.0, 0.0));

    // Without an offset the stored placement comes back unchanged.
    copy.set_scene_offset(None);
    copy.read_entity(&mut dst, a2, StableId(1), 0).unwrap();
    assert_eq!(dst.obj(a2).transform.translation, Vec3::new(5.0, 1.0, 0.0));
}

#[test]
fn test_missing_types_load_as_one_batch() {
    let mut src = world();
    src.define_class("Game.Crate", None, true);
    let c1 = src.spawn("Game.Crate", "c1");
    let c2 = src.spawn("Game.Crate", "c2");
    src.obj_mut(c1).transform = Transform::from_xyz(1.0, 0.0, 0.0);
    src.obj_mut(c2).transform = Transform::from_xyz(2.0, 0.0, 0.0);
    let mut c = saved(&src, &[dynamic(11, c1), dynamic(12, c2)]);
    c.unpack().unwrap();

    let mut dst = world();
    dst.define_unloaded_class("Game.Crate", None, true);
    let mut loader = dst.loader.clone();

    c.preload_dynamic(&mut loader).unwrap();
    assert_eq!(c.load_state(), LoadState::Preloading);
    assert_eq!(loader.requests(), vec![vec![ClassPath::new("Game.Crate")]]);
    assert!(c.is_preloading(true, &loader));

    // Scene becomes ready first.
    assert_eq!(c.spawn_dynamic().unwrap(), SpawnStep::Deferred);
    assert_eq!(c.load_state(), LoadState::WaitingForPreload);

    let handle = c.load_handle().unwrap();
    assert!(loader.complete(handle));
    assert!(!c.is_preloading(true, &loader));
    assert_eq!(loader.drain_completed(), vec![handle]);
    assert!(c.on_types_loaded(handle));

    let SpawnStep::Spawn(records) = c.spawn_dynamic().unwrap() else {
        panic!("expected spawn");
    };
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, StableId(11));
    assert_eq!(records[1].transform.translation.x, 2.0);
    assert!(records.iter().all(|r| r.class.as_str() == "Game.Crate"));
    assert!(c.has_spawned_dynamic());
    assert_eq!(loader.requests().len(), 1);

    // Nothing more happens once complete.
    assert_eq!(c.spawn_dynamic().unwrap(), SpawnStep::Idle);
}

#[test]
fn test_types_loaded_before_scene_ready() {
    let mut src = world();
    src.define_class("Game.Crate", None, true);
    let c1 = src.spawn("Game.Crate", "c1");
    let mut c = saved(&src, &[dynamic(11, c1)]);
    c.unpack().unwrap();

    let mut dst = world();
    dst.define_unloaded_class("Game.Crate", None, true);
    let mut loader = dst.loader.clone();
    c.preload_dynamic(&mut loader).unwrap();
    let handle = c.load_handle().unwrap();
    loader.complete(handle);
    assert!(!c.on_types_loaded(handle));
    assert_eq!(c.load_state(), LoadState::SpawningDynamicActors);
    assert!(matches!(c.spawn_dynamic().unwrap(), SpawnStep::Spawn(r) if r.len() == 1));
}

#[test]
fn test_resident_types_skip_the_request() {
    let mut src = world();
    let d = src.spawn("Game.Door", "d");
    let mut c = saved(&src, &[dynamic(3, d)]);
    c.unpack().unwrap();

    let mut loader = world().loader;
    c.preload_dynamic(&mut loader).unwrap();
    assert_eq!(c.load_state(), LoadState::SpawningDynamicActors);
    assert!(loader.requests().is_empty());
    assert!(!c.is_preloading(false, &loader));
}

#[test]
fn test_no_dynamic_entities_completes_immediately() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let mut c = saved(&src, &[placed(1, a)]);
    c.unpack().unwrap();

    let mut loader = ManualTypeLoader::new();
    c.preload_dynamic(&mut loader).unwrap();
    assert_eq!(c.load_state(), LoadState::Complete);
    assert_eq!(c.spawn_dynamic().unwrap(), SpawnStep::Idle);
}

#[test]
fn test_pack_cancels_pending_type_load() {
    let mut src = world();
    src.define_class("Game.Crate", None, true);
    let c1 = src.spawn("Game.Crate", "c1");
    let mut c = saved(&src, &[dynamic(11, c1)]);
    c.unpack().unwrap();

    let mut loader = ManualTypeLoader::new();
    c.preload_dynamic(&mut loader).unwrap();
    let handle = c.load_handle().unwrap();
    c.pack(&mut loader);
    assert_eq!(loader.cancelled(), vec![handle]);
    assert_eq!(c.load_state(), LoadState::Uninitialized);
    assert!(c.load_handle().is_none());
    // A late completion for the old handle is ignored.
    assert!(!c.on_types_loaded(handle));
}

#[test]
fn test_packing_a_packed_container_leaves_it_alone() {
    let mut src = world();
    let a = src.spawn_placed("Game.Door", "a", "level1.a");
    let mut c = saved(&src, &[placed(1, a)]);
    let mut loader = ManualTypeLoader::new();

    // Nothing is readable while packed, so there is nothing to spawn.
    c.preload_dynamic(&mut loader).unwrap();
    assert_eq!(c.load_state(), LoadState::Complete);

    c.pack(&mut loader);
    assert_eq!(c.load_state(), LoadState::Complete);
    assert!(loader.cancelled().is_empty());
    assert!(c.is_packed());
}

#[test]
fn test_spawning_id_is_consumed_once() {
    let mut c = Container::new(Name::new("level1"));
    assert_eq!(c.take_spawning_id(), None);
    c.set_spawning_id(StableId(0x42));
    assert_eq!(c.take_spawning_id(), Some(StableId(0x42)));
    assert_eq!(c.take_spawning_id(), None);
}

#[test]
fn test_unreadable_blob_fails_unpack_and_is_dropped() {
    let mut c = Container::from_blob(Name::new("level1"), vec![1, 0, 0, 0, 0xFF, 0xFF]);
    assert!(c.is_packed());
    assert!(c.unpack().is_err());
    assert!(c.blob().is_empty());
    assert!(matches!(c.load_entity(StableId(1)), EntityData::NoData));
}

#[test]
fn test_empty_container_unpacks_to_empty_header() {
    let mut c = Container::from_blob(Name::new("level1"), Vec::new());
    assert!(!c.is_packed());
    c.unpack().unwrap();
    assert!(c.header().index.is_empty());
    assert!(!c.has_destroyed());
}
