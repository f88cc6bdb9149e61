//! A typed, tree-structured event dispatch runtime.
//!
//! Components are arranged in a tree; each declares handler subscriptions
//! keyed by event type and channel. Firing an event enqueues it on a
//! pipeline, which dispatches it to matching handlers in tree pre-order,
//! insertion-order-stable, descending-priority order, and tracks causally
//! related child events so callers can wait for an event (and everything it
//! transitively triggered) to fully drain. See `SPEC_FULL.md` for the full
//! design.

mod builtin;
mod channel;
mod component;
mod context;
mod dispatcher;
mod error;
mod event;
mod generator;
mod handler;
mod manager;
mod matcher;
mod pipeline;
mod runtime;
mod tree;

pub use builtin::{Attached, Completed, Detached, HandlingError, Start, Stop};
pub use channel::{Channel, IoSubchannel, Subchannel};
pub use component::Component;
pub use context::Context;
pub use error::TreeError;
pub use event::{Event, EventPayload};
pub use generator::{GeneratorHandle, GeneratorRegistry};
pub use handler::{dynamic_handler, Handler, HandlerSet};
pub use manager::{await_exhaustion, start, stop, Manager};
pub use matcher::MatchKey;
pub use pipeline::Pipeline;
pub use runtime::{Runtime, RuntimeConfig};
