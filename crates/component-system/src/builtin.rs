//! Built-in events and lifecycle. See `SPEC_FULL.md` §4.8.

use uuid::Uuid;

use crate::event::EventPayload;

/// Fired once, on broadcast, to boot a tree. Components that need
/// background threads register themselves with the runtime's
/// [`crate::generator::GeneratorRegistry`] from their `Component::on_start`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Start;
impl EventPayload for Start {}

/// Fired to quiesce a tree. Low-priority handlers release resources;
/// `Component::on_stop` is invoked for every component in the tree, each
/// bounded by its own `Component::on_stop_timeout`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stop;
impl EventPayload for Stop {}

/// Fired after `attach` links `child` under `parent`.
#[derive(Debug, Clone, Copy)]
pub struct Attached {
    pub parent: Uuid,
    pub child: Uuid,
}
impl EventPayload for Attached {}

/// Fired after `detach` unlinks `child` from `former_parent`.
#[derive(Debug, Clone, Copy)]
pub struct Detached {
    pub former_parent: Uuid,
    pub child: Uuid,
}
impl EventPayload for Detached {}

/// Fired on the offending event's own channels when a handler panics.
/// Dispatch logs a default message if nothing else handles it (§4.6/§7).
#[derive(Debug, Clone)]
pub struct HandlingError {
    pub message: String,
    pub event_type: &'static str,
}
impl EventPayload for HandlingError {}

/// Fired on an event's own channels once its `openCount` has dropped to
/// zero, including every causally linked child (§3/§4.4).
#[derive(Debug, Clone, Copy)]
pub struct Completed {
    pub event_type: &'static str,
}
impl EventPayload for Completed {}
