use std::marker::PhantomData;

use bevy::prelude::*;

use crate::archive::EntityHost;
use crate::manager::{PersistenceEvent, PersistenceManager};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A [`PersistenceEvent`] forwarded into the ECS once per frame.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct PersistenceNotification(pub PersistenceEvent);

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// Pumps a [`PersistenceManager<H>`] every frame and forwards its events.
///
/// The manager and the host are both non-send resources: the manager owns
/// caller-thread callbacks, and the host is whatever object model the game
/// exposes. Insert them with `insert_non_send_resource` once the host can
/// build them; until then the pump system does nothing.
pub struct PersistencePlugin<H> {
    marker: PhantomData<fn() -> H>,
}

impl<H> Default for PersistencePlugin<H> {
    fn default() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<H: EntityHost + 'static> Plugin for PersistencePlugin<H> {
    fn build(&self, app: &mut App) {
        app.add_event::<PersistenceNotification>();
        app.add_systems(Update, pump_persistence::<H>);
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Dispatches finished jobs and type loads, then forwards the events they
/// produced. Exclusive so callbacks see a consistent world.
pub fn pump_persistence<H: EntityHost + 'static>(world: &mut World) {
    let Some(mut manager) = world.remove_non_send_resource::<PersistenceManager<H>>() else {
        return;
    };
    match world.get_non_send_resource_mut::<H>() {
        Some(mut host) => manager.pump(&mut host),
        None => warn!("Persistence host resource is missing, skipping pump"),
    }
    let events = manager.drain_events();
    world.insert_non_send_resource(manager);
    for event in events {
        trace!("Persistence event: {:?}", event);
        world.send_event(PersistenceNotification(event));
    }
}
