// ---------------------------------------------------------------------------
// load_state – dynamic entity spawn state machine
// ---------------------------------------------------------------------------
//
// Two independent events have to meet before dynamic entities can spawn: the
// batched type load finishing and the owning scene becoming ready. Either can
// happen first.
//
//   Uninitialized --preload--> Preloading --types--> SpawningDynamicActors
//                         \              \                     |
//                          \              scene                spawn
//                           \              v                   v
//                            \--> WaitingForPreload --types--> Complete
//
// A preload with nothing to spawn goes straight to Complete. One whose types
// are all resident goes straight to SpawningDynamicActors: the records still
// need spawning, and that only happens once the scene is ready.

/// Where a container is in loading and spawning its dynamic entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Uninitialized,
    /// Types requested, scene not ready yet.
    Preloading,
    /// Types resident, waiting for the scene.
    SpawningDynamicActors,
    /// Scene ready, waiting for the types.
    WaitingForPreload,
    Complete,
}

/// What the scene-ready event should do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneReadyAction {
    Spawn,
    Defer,
    Nothing,
}

impl LoadState {
    /// Transition for the scene becoming ready.
    pub fn on_scene_ready(self) -> (LoadState, SceneReadyAction) {
        match self {
            LoadState::SpawningDynamicActors => (LoadState::Complete, SceneReadyAction::Spawn),
            LoadState::Preloading => (LoadState::WaitingForPreload, SceneReadyAction::Defer),
            other => (other, SceneReadyAction::Nothing),
        }
    }

    /// Transition for the batched type load finishing. The flag is true when
    /// the scene was already waiting, so the caller must spawn now.
    pub fn on_types_loaded(self) -> (LoadState, bool) {
        match self {
            LoadState::Preloading => (LoadState::SpawningDynamicActors, false),
            LoadState::WaitingForPreload => (LoadState::SpawningDynamicActors, true),
            other => (other, false),
        }
    }

    pub fn is_preloading(self) -> bool {
        self == LoadState::Preloading
    }
}
