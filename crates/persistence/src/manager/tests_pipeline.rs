use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use super::*;
use crate::persistence_types::{ClassPath, HasResult, StableId};
use crate::save_header::{self, PERSISTENCE_FORMAT_VERSION};
use crate::storage::MemoryBackend;
use crate::test_support::TestWorld;

const WAIT: Duration = Duration::from_secs(5);

fn host() -> TestWorld {
    let mut w = TestWorld::new();
    w.define_class("Game.Door", None, true);
    w.define_class("Game.WorldData", None, true);
    w
}

fn settings() -> PersistenceSettings {
    PersistenceSettings {
        world_data_class: Some(ClassPath::new("Game.WorldData")),
        ..PersistenceSettings::default()
    }
}

fn manager_with(
    w: &TestWorld,
    backend: &MemoryBackend,
    settings: PersistenceSettings,
) -> PersistenceManager<TestWorld> {
    PersistenceManager::new(settings, Box::new(backend.clone()), Box::new(w.loader.clone())).unwrap()
}

fn manager(w: &TestWorld, backend: &MemoryBackend) -> PersistenceManager<TestWorld> {
    manager_with(w, backend, settings())
}

fn flush(m: &mut PersistenceManager<TestWorld>, w: &mut TestWorld) {
    assert!(m.flush(w, WAIT), "pipeline didn't go idle");
}

/// A shared log and a callback that appends to it.
fn recorder<T: 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnOnce(T) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |value| sink.borrow_mut().push(value))
}

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("persistence_pipeline_test_{name}"));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Save one door with `value` into slot 0 of `backend`.
fn save_door(backend: &MemoryBackend, value: i32) {
    let mut w = host();
    let mut m = manager(&w, backend);
    m.scene_loaded(SceneId(1), Name::new("level1"));
    let door = w.spawn_placed("Game.Door", "door", "level1.door");
    w.obj_mut(door).value = value;
    m.initialize_entity(&mut w, EntityDesc::placed(door, SceneId(1), StableId(1)))
        .unwrap();

    let (results, cb) = recorder();
    m.commit_to_slot(&mut w, 0, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![SaveResult::Success]);
}

// =============================================================================
// Commit and load
// =============================================================================

#[test]
fn test_commit_then_load_restores_entity() {
    let backend = MemoryBackend::new(0);
    save_door(&backend, 5);
    assert!(backend.get("save_0").is_some());

    let mut w = host();
    let door = w.spawn_placed("Game.Door", "door", "level1.door");
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    m.load_slot(0, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![LoadResult::Success]);
    assert_eq!(m.current_slot(), 0);
    assert_eq!(m.world().containers.len(), 1);

    m.scene_loaded(SceneId(1), Name::new("level1"));
    let (_, outcome) = m
        .initialize_entity(&mut w, EntityDesc::placed(door, SceneId(1), StableId(1)))
        .unwrap();
    assert_eq!(outcome, crate::container::EntityLoad::Loaded);
    assert_eq!(w.obj(door).value, 5);
}

#[test]
fn test_missing_slot_starts_fresh_world_with_user_data() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);

    let (results, cb) = recorder();
    m.load_slot(3, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![LoadResult::DoesNotExist]);
    assert_eq!(m.current_slot(), 3);
    let data = m.world().user_data.unwrap();
    assert_eq!(w.obj(data).class, ClassPath::new("Game.WorldData"));
    assert!(m.drain_events().contains(&PersistenceEvent::SlotLoaded {
        slot: 3,
        result: LoadResult::DoesNotExist,
    }));
}

#[test]
fn test_newer_format_is_too_new_and_changes_nothing() {
    let backend = MemoryBackend::new(0);
    save_door(&backend, 1);
    let mut raw = save_header::decompress(&backend.get("save_0").unwrap()).unwrap();
    raw[8..12].copy_from_slice(&(PERSISTENCE_FORMAT_VERSION + 1).to_le_bytes());
    save_header::refresh_checksum(&mut raw);
    backend.insert("save_0", save_header::compress(&raw));

    let mut w = host();
    let mut m = manager(&w, &backend);
    m.world_mut().get_or_create_container(&Name::new("keep"));
    let (results, cb) = recorder();
    m.load_slot(0, cb);
    flush(&mut m, &mut w);

    assert_eq!(*results.borrow(), vec![LoadResult::TooNew]);
    assert_eq!(m.current_slot(), -1);
    assert_eq!(m.world().containers.len(), 1);
    assert!(m.world().container(&Name::new("keep")).is_some());
    assert!(m.world().user_data.is_none());
}

#[test]
fn test_save_from_later_build_is_too_new() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);
    m.set_build_number_oracle(Box::new(|| 10));
    m.commit_to_slot(&mut w, 0, |_| {});
    flush(&mut m, &mut w);

    let (results, cb) = recorder();
    m.set_build_number_oracle(Box::new(|| 9));
    m.load_slot(0, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![LoadResult::TooNew]);

    let (results, cb) = recorder();
    m.set_build_number_oracle(Box::new(|| 10));
    m.load_slot(0, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![LoadResult::Success]);
}

#[test]
fn test_commit_after_out_of_band_delete() {
    let dir = test_dir("out_of_band");
    let settings = PersistenceSettings {
        save_dir: dir.clone(),
        ..settings()
    };
    let mut w = host();
    let mut m =
        PersistenceManager::<TestWorld>::with_file_system(settings, Box::new(w.loader.clone()))
            .unwrap();

    let (results, cb) = recorder();
    m.commit_to_slot(&mut w, 0, cb);
    flush(&mut m, &mut w);
    let (has, has_cb) = recorder();
    m.has_slot(0, has_cb);
    flush(&mut m, &mut w);
    assert_eq!(*has.borrow(), vec![HasResult::Exists]);

    fs::remove_file(dir.join("save_0.sav")).unwrap();
    let sink = results.clone();
    m.commit(&mut w, "after delete", move |r| sink.borrow_mut().push(r));
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![SaveResult::Success, SaveResult::Success]);
    assert!(dir.join("save_0.sav").exists());
}

#[test]
fn test_read_slot_leaves_current_save_alone() {
    let backend = MemoryBackend::new(0);
    save_door(&backend, 3);

    let mut w = host();
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    m.read_slot(0, move |result, world| cb((result, world.map(|w| w.containers.len()))));
    flush(&mut m, &mut w);

    assert_eq!(*results.borrow(), vec![(LoadResult::Success, Some(1))]);
    assert_eq!(m.current_slot(), -1);
    assert!(m.world().containers.is_empty());
}

#[test]
fn test_profile_written_after_world() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);

    let (loaded, cb) = recorder();
    m.load_profile(cb);
    flush(&mut m, &mut w);
    assert_eq!(*loaded.borrow(), vec![LoadResult::DoesNotExist]);
    m.profile_mut().unwrap().set_setting("volume", "7");

    m.commit_to_slot(&mut w, 0, |_| {});
    flush(&mut m, &mut w);
    assert_eq!(backend.writes(), vec!["save_0".to_string(), "profile".to_string()]);

    let mut w2 = host();
    let mut m2 = manager(&w2, &backend);
    let (loaded, cb) = recorder();
    m2.load_profile(cb);
    flush(&mut m2, &mut w2);
    assert_eq!(*loaded.borrow(), vec![LoadResult::Success]);
    assert_eq!(m2.profile().unwrap().setting("volume"), Some("7"));
}

#[test]
fn test_commit_without_slot_or_profile_writes_nothing() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    m.commit(&mut w, "idle", cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![SaveResult::Success]);
    assert!(backend.writes().is_empty());
}

#[test]
fn test_failed_write_reports_unknown() {
    let backend = MemoryBackend::new(0);
    backend.set_fail_writes(true);
    let mut w = host();
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    m.commit_to_slot(&mut w, 0, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![SaveResult::Unknown]);
    assert_eq!(m.pending_saves(), 0);
}

// =============================================================================
// Ordering and parking
// =============================================================================

#[test]
fn test_callbacks_run_in_enqueue_order() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);
    let log: Rc<RefCell<Vec<String>>> = Rc::default();

    let l = log.clone();
    m.has_slot(0, move |r| l.borrow_mut().push(format!("has {r:?}")));
    let l = log.clone();
    m.commit_to_slot(&mut w, 0, move |r| l.borrow_mut().push(format!("commit {r:?}")));
    let l = log.clone();
    m.has_slot(0, move |r| l.borrow_mut().push(format!("has {r:?}")));
    let l = log.clone();
    m.delete_slot(0, move |ok| l.borrow_mut().push(format!("delete {ok}")));
    let l = log.clone();
    m.has_slot(0, move |r| l.borrow_mut().push(format!("has {r:?}")));
    assert!(m.is_busy());
    flush(&mut m, &mut w);

    assert_eq!(
        *log.borrow(),
        vec![
            "has Empty",
            "commit Success",
            "has Exists",
            "delete true",
            "has Empty",
        ]
    );
    assert!(!m.is_busy());
}

/// A world save whose user data is `value`, written by a host that had the
/// user data class loaded.
fn save_world_data(backend: &MemoryBackend, value: i32) {
    let mut w = host();
    let mut m = manager(&w, backend);
    m.load_slot(0, |_| {});
    flush(&mut m, &mut w);
    let data = m.world().user_data.unwrap();
    w.obj_mut(data).value = value;
    m.commit(&mut w, "test", |_| {});
    flush(&mut m, &mut w);
}

fn host_without_world_data() -> TestWorld {
    let mut w = TestWorld::new();
    w.define_class("Game.Door", None, true);
    w.define_unloaded_class("Game.WorldData", None, true);
    w
}

#[test]
fn test_load_waits_for_missing_types() {
    let backend = MemoryBackend::new(0);
    save_world_data(&backend, 77);

    let mut w = host_without_world_data();
    let mut m = manager(&w, &backend);
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let l = log.clone();
    m.load_slot(0, move |r| l.borrow_mut().push(format!("load {r:?}")));
    let l = log.clone();
    m.has_slot(0, move |r| l.borrow_mut().push(format!("has {r:?}")));

    assert!(!m.flush(&mut w, Duration::from_millis(200)));
    assert_eq!(m.parked_loads(), 1);
    assert!(log.borrow().is_empty());
    assert_eq!(
        w.loader.requests(),
        vec![vec![ClassPath::new("Game.WorldData")]]
    );

    w.loader.complete_all();
    flush(&mut m, &mut w);
    assert_eq!(*log.borrow(), vec!["load Success", "has Exists"]);
    assert_eq!(m.parked_loads(), 0);
    let data = m.world().user_data.unwrap();
    assert_eq!(w.obj(data).value, 77);
}

#[test]
fn test_drop_cancels_parked_load() {
    let backend = MemoryBackend::new(0);
    save_world_data(&backend, 1);

    let mut w = host_without_world_data();
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder::<LoadResult>();
    m.load_slot(0, cb);
    assert!(!m.flush(&mut w, Duration::from_millis(200)));
    assert_eq!(m.parked_loads(), 1);

    drop(m);
    assert_eq!(w.loader.cancelled().len(), 1);
    assert!(results.borrow().is_empty());
}

// =============================================================================
// Commit gates
// =============================================================================

#[test]
fn test_never_commit_is_disabled() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager_with(
        &w,
        &backend,
        PersistenceSettings {
            never_commit: true,
            ..settings()
        },
    );
    let (results, cb) = recorder();
    m.commit_to_slot(&mut w, 0, cb);
    // Rejections are reported before any pump.
    assert_eq!(*results.borrow(), vec![SaveResult::Disabled]);
    assert!(!m.is_busy());
    assert!(m.drain_events().is_empty());
}

#[test]
fn test_disable_and_shutdown_reject_commits() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    let slot_before = m.current_slot();
    m.set_disable_commit(true);
    m.commit_to_slot(&mut w, 3, cb);
    assert_eq!(*results.borrow(), vec![SaveResult::Disabled]);
    // A rejected commit doesn't switch slots.
    assert_eq!(m.current_slot(), slot_before);

    m.set_disable_commit(false);
    let sink = results.clone();
    m.commit_to_slot(&mut w, 0, move |r| sink.borrow_mut().push(r));
    flush(&mut m, &mut w);
    assert_eq!(m.current_slot(), 0);

    m.shutdown();
    let sink = results.clone();
    m.commit(&mut w, "late", move |r| sink.borrow_mut().push(r));
    assert_eq!(
        *results.borrow(),
        vec![SaveResult::Disabled, SaveResult::Success, SaveResult::Disabled]
    );
    assert_eq!(backend.writes().len(), 1);
}

#[test]
fn test_second_commit_is_busy_without_queueing() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager_with(
        &w,
        &backend,
        PersistenceSettings {
            allow_queued_commits: false,
            ..settings()
        },
    );
    let log: Rc<RefCell<Vec<(u8, SaveResult)>>> = Rc::default();
    let l = log.clone();
    m.commit_to_slot(&mut w, 0, move |r| l.borrow_mut().push((1, r)));
    let l = log.clone();
    m.commit(&mut w, "again", move |r| l.borrow_mut().push((2, r)));
    assert_eq!(*log.borrow(), vec![(2, SaveResult::Busy)]);
    assert_eq!(m.pending_saves(), 1);

    flush(&mut m, &mut w);
    assert_eq!(
        *log.borrow(),
        vec![(2, SaveResult::Busy), (1, SaveResult::Success)]
    );
    assert_eq!(m.pending_saves(), 0);
}

#[test]
fn test_queued_commits_all_run() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    m.commit_to_slot(&mut w, 0, cb);
    let sink = results.clone();
    m.commit(&mut w, "again", move |r| sink.borrow_mut().push(r));
    assert_eq!(m.pending_saves(), 2);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![SaveResult::Success, SaveResult::Success]);
    assert_eq!(backend.writes().len(), 2);
}

#[test]
fn test_commit_events() {
    let backend = MemoryBackend::new(0);
    let mut w = host();
    let mut m = manager(&w, &backend);
    m.commit_to_slot(&mut w, 0, |_| {});
    flush(&mut m, &mut w);
    assert_eq!(
        m.drain_events(),
        vec![
            PersistenceEvent::PreSave,
            PersistenceEvent::BackgroundWorkBegan,
            PersistenceEvent::Committed(SaveResult::Success),
            PersistenceEvent::BackgroundWorkEnded,
        ]
    );
    assert!(m.drain_events().is_empty());
}

// =============================================================================
// Backups
// =============================================================================

#[test]
fn test_corrupt_slot_loads_from_backup() {
    let backend = MemoryBackend::new(2);
    save_door(&backend, 1);
    save_door(&backend, 2);
    backend.corrupt("save_0", 20);

    let mut w = host();
    let door = w.spawn_placed("Game.Door", "door", "level1.door");
    let mut m = manager(&w, &backend);
    let (results, cb) = recorder();
    m.load_slot(0, cb);
    flush(&mut m, &mut w);
    assert_eq!(*results.borrow(), vec![LoadResult::Restored]);

    m.scene_loaded(SceneId(1), Name::new("level1"));
    m.initialize_entity(&mut w, EntityDesc::placed(door, SceneId(1), StableId(1)))
        .unwrap();
    assert_eq!(w.obj(door).value, 1);
}

#[test]
fn test_backup_queries_restore_and_delete() {
    let backend = MemoryBackend::new(2);
    save_door(&backend, 1);
    save_door(&backend, 2);

    let mut w = host();
    let mut m = manager(&w, &backend);
    let (flags, cb) = recorder();
    m.has_slot_backup(0, cb);
    let sink = flags.clone();
    m.has_profile_backup(move |ok| sink.borrow_mut().push(ok));
    let sink = flags.clone();
    m.restore_slot_backup(0, move |ok| sink.borrow_mut().push(ok));
    let sink = flags.clone();
    m.restore_profile_backup(move |ok| sink.borrow_mut().push(ok));
    let sink = flags.clone();
    m.delete_slot(0, move |ok| sink.borrow_mut().push(ok));
    let sink = flags.clone();
    m.delete_slot(0, move |ok| sink.borrow_mut().push(ok));
    let sink = flags.clone();
    m.delete_profile(move |ok| sink.borrow_mut().push(ok));
    flush(&mut m, &mut w);

    assert_eq!(
        *flags.borrow(),
        vec![true, false, true, false, true, false, false]
    );
    assert!(backend.get("save_0").is_none());
}
