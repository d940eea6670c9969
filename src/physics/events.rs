use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::ecs::{CommandQueue, Entity};
use crate::physics::manifold::ContactManifold;

/// Callback invoked with (self entity, other entity, manifold). World
/// mutations must go through the command queue; they are applied after the
/// whole callback phase so iteration order cannot observe them.
pub type ContactCallback = Box<dyn FnMut(Entity, Entity, &ContactManifold, &mut CommandQueue)>;
/// Pair-only callback for events with no surviving manifold (exits).
pub type PairCallback = Box<dyn FnMut(Entity, Entity, &mut CommandQueue)>;

/// Collision lifecycle callbacks for one entity. Fired for every solver
/// contact the entity participates in.
#[derive(Default)]
pub struct CollisionCallbackComponent {
    pub on_enter: Option<ContactCallback>,
    pub on_stay: Option<ContactCallback>,
    pub on_exit: Option<PairCallback>,
}

impl CollisionCallbackComponent {
    pub fn on_enter(mut self, callback: ContactCallback) -> Self {
        self.on_enter = Some(callback);
        self
    }

    pub fn on_stay(mut self, callback: ContactCallback) -> Self {
        self.on_stay = Some(callback);
        self
    }

    pub fn on_exit(mut self, callback: PairCallback) -> Self {
        self.on_exit = Some(callback);
        self
    }
}

impl std::fmt::Debug for CollisionCallbackComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionCallbackComponent")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_stay", &self.on_stay.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

/// Overlap lifecycle callbacks for a trigger collider. The first argument
/// is always the trigger entity, the second the overlapping entity.
#[derive(Default)]
pub struct TriggerComponent {
    pub on_enter: Option<PairCallback>,
    pub on_stay: Option<PairCallback>,
    pub on_exit: Option<PairCallback>,
}

impl TriggerComponent {
    pub fn on_enter(mut self, callback: PairCallback) -> Self {
        self.on_enter = Some(callback);
        self
    }

    pub fn on_stay(mut self, callback: PairCallback) -> Self {
        self.on_stay = Some(callback);
        self
    }

    pub fn on_exit(mut self, callback: PairCallback) -> Self {
        self.on_exit = Some(callback);
        self
    }
}

impl std::fmt::Debug for TriggerComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerComponent")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_stay", &self.on_stay.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

/// Runs one callback with panic isolation: a failing callback is reported
/// and must not take down the tick or starve sibling callbacks.
pub fn invoke_guarded(context: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("{context} callback panicked; event dropped, tick continues");
    }
}
