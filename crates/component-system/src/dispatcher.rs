//! Given a fired event and the channels it was fired on, collects matching
//! handlers from the tree and invokes them in priority order. See
//! `SPEC_FULL.md` §4.6, plus the completion bookkeeping from §3/§4.4/§4.5.

use std::any::TypeId;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use component_error::PanicError;
use futures::FutureExt;

use crate::builtin;
use crate::channel::Channel;
use crate::context::Context;
use crate::event::EventCore;
use crate::pipeline::Pipeline;
use crate::tree::Node;

pub(crate) async fn dispatch(tree_root: &Arc<Node>, core: Arc<EventCore>, channels: &[Channel], pipeline: &Pipeline) {
    let tree = tree_root.tree();
    let entries = tree.collect_handlers(core.type_id, core.ancestors, channels);

    if entries.is_empty() && core.type_id == TypeId::of::<builtin::HandlingError>() {
        if let Some(err) = core.payload.downcast_ref::<builtin::HandlingError>() {
            tracing::error!(event = err.event_type, message = %err.message, "unhandled HandlingError");
        }
        return;
    }

    for entry in entries.iter() {
        if core.stopped.load(Ordering::Acquire) {
            break;
        }
        let ctx = Context {
            node: entry.node.clone(),
            pipeline: pipeline.clone(),
            runtime: pipeline.runtime().clone(),
            event: core.clone(),
        };
        let callable = entry.handler.callable.clone();
        let core_for_call = core.clone();
        let result = AssertUnwindSafe(callable(core_for_call, ctx)).catch_unwind().await;
        if let Err(panic) = result {
            let panic_err = PanicError::new(panic);
            let message = panic_err.message();
            tracing::error!(component = entry.node.name(), event = core.type_name, %message, "handler panicked");
            (entry.node.ops.on_handler_panic)(panic_err).await;
            fire_handling_error(tree_root, &core, channels, pipeline, message);
        }
    }
}

fn fire_handling_error(tree_root: &Arc<Node>, core: &Arc<EventCore>, channels: &[Channel], pipeline: &Pipeline, message: String) {
    pipeline.fire(
        builtin::HandlingError {
            message,
            event_type: core.type_name,
        },
        channels.to_vec(),
        tree_root.clone(),
    );
}

/// Decrements `core`'s `openCount`; once it reaches zero, marks the event
/// completed, wakes anyone blocked in `Event::get`, fires `Completed`, and
/// propagates the same decrement to the causal parent, if any (§3: "a child
/// event inherits its parent's lifecycle").
///
/// `Completed` events are exempt from firing a further `Completed` of their
/// own: without this, each meta-event's own completion would enqueue another
/// one, forever, and the pipeline would never reach quiescence.
pub(crate) fn complete(core: Arc<EventCore>, pipeline: &Pipeline) {
    let remaining = core.open_count.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining != 0 {
        return;
    }
    core.completed.store(true, Ordering::Release);
    core.notify.notify_waiters();

    if core.type_id != TypeId::of::<builtin::Completed>() {
        let tree_root = core.tree_root.clone();
        let channels = core.channels.clone();
        pipeline.fire(builtin::Completed { event_type: core.type_name }, channels, tree_root);
    }

    if let Some(parent_weak) = &core.parent {
        if let Some(parent_core) = parent_weak.upgrade() {
            let parent_pipeline = parent_core.processed_by.clone();
            complete(parent_core, &parent_pipeline);
        }
    }
}
