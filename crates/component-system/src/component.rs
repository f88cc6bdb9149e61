//! The `Component` trait: an object with a default channel and a set of
//! handler subscriptions, arranged in the component tree. See
//! `SPEC_FULL.md` §3-§4.3.

use std::time::Duration;

use async_trait::async_trait;
use component_error::RuntimeError;

use crate::context::Context;
use crate::handler::HandlerSet;

/// Implemented by every node in the component tree.
///
/// `Component::handlers` is called exactly once, at construction, to build
/// the static handler set seeded into the tree; use
/// [`crate::manager::Manager::add_handler`] for subscriptions built up
/// later.
#[async_trait]
pub trait Component: Send + Sized + 'static {
    /// Used in tracing spans and error messages; need not be unique.
    const NAME: &'static str;

    /// Declares this component's static handler subscriptions.
    fn handlers(_builder: &mut HandlerSet<Self>) {}

    /// Overrides this component's default channel. Defaults to the
    /// component acting as its own channel (`Channel::Component(id)`).
    fn default_channel_name(&self) -> Option<&str> {
        None
    }

    /// Called once when `Components::start` reaches this component.
    async fn on_start(&mut self, _ctx: &Context) {}

    /// Called once when the component's subtree is asked to stop. Returning
    /// `Err` is logged but does not prevent the stop from completing.
    async fn on_stop(&mut self, _ctx: &Context) -> Result<(), Box<dyn RuntimeError>> {
        Ok(())
    }

    /// How long `on_stop` is given to complete before it's abandoned.
    fn on_stop_timeout(&self) -> Duration {
        Duration::from_secs(6)
    }

    /// Called when a handler belonging to this component panics, after the
    /// panic has already been turned into a `HandlingError` event. The
    /// default does nothing; components holding resources that need
    /// cleaning up on a broken invariant can override this.
    fn on_handler_panic(&mut self, _panic: &component_error::PanicError) {}
}
