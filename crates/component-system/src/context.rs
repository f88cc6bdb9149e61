//! The dispatch context passed to every handler invocation.
//!
//! This is the "feedback filter" from `SPEC_FULL.md` §9 made concrete: since
//! every handler call receives its `Context` explicitly, firing through it
//! naturally targets the pipeline that is currently dispatching, with no
//! task-local bookkeeping required.

use std::sync::Arc;

use crate::channel::Channel;
use crate::event::{Event, EventCore, EventPayload};
use crate::manager::Manager;
use crate::pipeline::Pipeline;
use crate::runtime::Runtime;
use crate::tree::Node;

#[derive(Clone)]
pub struct Context {
    pub(crate) node: Arc<Node>,
    pub(crate) pipeline: Pipeline,
    pub(crate) runtime: Runtime,
    pub(crate) event: Arc<EventCore>,
}

impl Context {
    /// The `Manager` handle for the component this handler belongs to.
    pub fn manager(&self) -> Manager {
        Manager::from_node(self.node.clone(), self.runtime.clone())
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The pipeline currently dispatching the event this handler is
    /// reacting to. Firing through this `Context` targets this pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Fires `payload` on the component's default channel, on the currently
    /// executing pipeline, with this handler's event recorded as the new
    /// event's causal parent.
    pub fn fire<M: EventPayload>(&self, payload: M) -> Event<M> {
        self.fire_on(payload, vec![self.node.default_channel()])
    }

    /// Like [`Context::fire`], but on explicit channels.
    pub fn fire_on<M: EventPayload>(&self, payload: M, channels: Vec<Channel>) -> Event<M> {
        self.pipeline.fire_with_parent(
            payload,
            channels,
            Some(Arc::downgrade(&self.event)),
            self.node.root(),
        )
    }
}
