//! `Manager`: the public handle onto a component in the tree. See
//! `SPEC_FULL.md` §6 for the full public contract this wraps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use component_error::PanicError;
use uuid::Uuid;

use crate::builtin;
use crate::channel::Channel;
use crate::component::Component;
use crate::context::Context;
use crate::error::TreeError;
use crate::event::{Event, EventPayload};
use crate::handler::{dynamic_handler, HandlerEntry, HandlerSet};
use crate::matcher::MatchKey;
use crate::pipeline::Pipeline;
use crate::runtime::Runtime;
use crate::tree::{self, ComponentOps, Node};

/// A handle onto one component in the tree: attach/detach/iterate, fire
/// events, register handlers. Cheap to clone.
#[derive(Clone)]
pub struct Manager {
    node: Arc<Node>,
    runtime: Runtime,
}

impl Manager {
    /// Derives a component's node from its `Component` implementation,
    /// starting life as its own one-node tree.
    pub fn new<C: Component>(component: C, runtime: Runtime) -> Manager {
        let id = Uuid::new_v4();
        let default_channel = match component.default_channel_name() {
            Some(name) => Channel::new_named(name.to_string()),
            None => Channel::Component(id),
        };
        let on_stop_timeout = component.on_stop_timeout();
        let name = C::NAME;

        let shared = Arc::new(tokio::sync::Mutex::new(component));

        let mut builder = HandlerSet::new(shared.clone(), default_channel.match_key());
        C::handlers(&mut builder);
        let mut handlers = builder.entries;

        let on_start: crate::tree::OnStartFn = {
            let shared = shared.clone();
            Arc::new(move |ctx: Context| {
                let shared = shared.clone();
                Box::pin(async move {
                    shared.lock().await.on_start(&ctx).await;
                })
            })
        };
        let on_stop: crate::tree::OnStopFn = {
            let shared = shared.clone();
            Arc::new(move |ctx: Context| {
                let shared = shared.clone();
                Box::pin(async move { shared.lock().await.on_stop(&ctx).await })
            })
        };
        let on_handler_panic: crate::tree::OnHandlerPanicFn = {
            let shared = shared.clone();
            Arc::new(move |panic: PanicError| {
                let shared = shared.clone();
                Box::pin(async move {
                    shared.lock().await.on_handler_panic(&panic);
                })
            })
        };

        let ops = ComponentOps {
            name,
            on_start: on_start.clone(),
            on_stop: on_stop.clone(),
            on_stop_timeout,
            on_handler_panic,
        };

        let start_callable: crate::handler::HandlerFn =
            Arc::new(move |_core: Arc<crate::event::EventCore>, ctx: Context| on_start(ctx));
        handlers.push(HandlerEntry {
            event_key: MatchKey::of::<builtin::Start>(),
            channel_key: MatchKey::broadcast(),
            priority: 0,
            callable: start_callable,
        });
        let stop_callable: crate::handler::HandlerFn = Arc::new(move |_core: Arc<crate::event::EventCore>, ctx: Context| {
            let on_stop = on_stop.clone();
            Box::pin(async move {
                match tokio::time::timeout(on_stop_timeout, on_stop(ctx)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::error!(component = name, %err, "on_stop failed"),
                    Err(_) => tracing::warn!(component = name, "on_stop timed out"),
                }
            })
        });
        handlers.push(HandlerEntry {
            event_key: MatchKey::of::<builtin::Stop>(),
            channel_key: MatchKey::broadcast(),
            priority: 0,
            callable: stop_callable,
        });

        let node = Node::new(id, ops, default_channel, handlers, runtime.clone());
        Manager { node, runtime }
    }

    pub(crate) fn from_node(node: Arc<Node>, runtime: Runtime) -> Manager {
        Manager { node, runtime }
    }

    pub fn id(&self) -> Uuid {
        self.node.id()
    }

    pub fn name(&self) -> &'static str {
        self.node.name()
    }

    pub fn default_channel(&self) -> Channel {
        self.node.default_channel()
    }

    /// Merges `child` (which must be a detached root) into this component's
    /// tree. See `SPEC_FULL.md` §4.3 for the invariants enforced.
    pub fn attach(&self, child: &Manager) -> Result<(), TreeError> {
        tree::attach(&self.node, &child.node)
    }

    /// Detaches this component from its parent; the detached subtree
    /// becomes its own tree with a fresh pipeline.
    pub fn detach(&self) -> Result<(), TreeError> {
        tree::detach(&self.node)
    }

    pub fn parent(&self) -> Option<Manager> {
        self.node.parent().map(|n| Manager::from_node(n, self.runtime.clone()))
    }

    pub fn root(&self) -> Manager {
        Manager::from_node(self.node.root(), self.runtime.clone())
    }

    pub fn children(&self) -> Vec<Manager> {
        self.node
            .children()
            .into_iter()
            .map(|n| Manager::from_node(n, self.runtime.clone()))
            .collect()
    }

    /// Pre-order traversal of this component's subtree.
    pub fn iterator(&self) -> Vec<Manager> {
        self.node
            .iter_preorder()
            .into_iter()
            .map(|n| Manager::from_node(n, self.runtime.clone()))
            .collect()
    }

    pub fn path(&self) -> String {
        self.node.path()
    }

    /// Fires `payload` on this tree's root pipeline. An empty `channels`
    /// defaults to this component's own default channel, per §3.
    pub fn fire<M: EventPayload>(&self, payload: M, channels: Vec<Channel>) -> Event<M> {
        let channels = if channels.is_empty() { vec![self.node.default_channel()] } else { channels };
        let tree = self.node.tree();
        tree.root_pipeline().fire(payload, channels, tree.root())
    }

    /// Fires `payload` on `pipeline` instead of this tree's root pipeline —
    /// for a subsystem's own [`Manager::new_event_pipeline`], or a
    /// subchannel's response pipeline (§4.5/§4.9).
    pub fn fire_on_pipeline<M: EventPayload>(&self, pipeline: &Pipeline, payload: M, channels: Vec<Channel>) -> Event<M> {
        let channels = if channels.is_empty() { vec![self.node.default_channel()] } else { channels };
        pipeline.fire(payload, channels, self.node.root())
    }

    /// Allocates a dedicated event pipeline for a subsystem (§4.5) — events
    /// fired through it are serialized relative to each other and
    /// independent of the tree's root pipeline.
    pub fn new_event_pipeline(&self) -> Pipeline {
        Pipeline::new_detached(self.runtime.clone())
    }

    /// Adds a handler outside of `Component::handlers`, for subscriptions
    /// built up at runtime (§4.2/§6).
    pub fn add_handler<M, F, Fut>(&self, channel: MatchKey, priority: i32, f: F)
    where
        M: EventPayload,
        F: Fn(Event<M>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let entry = dynamic_handler(channel, priority, f);
        self.node.add_handler(entry);
        self.node.tree().invalidate_cache();
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

/// Boots a tree (fires `Start` on broadcast) and marks it started, after
/// which `attach`ing new children into it is rejected (§4.3/§4.8).
pub async fn start(root: &Manager) -> Event<builtin::Start> {
    let event = root.fire(builtin::Start, vec![Channel::Broadcast]);
    root.node.tree().mark_started();
    event
}

/// Fires `Stop` on broadcast and, per `RuntimeConfig::stop_blocks_until_drained`
/// (default `true`), waits for the tree's pipelines and any outstanding
/// generators to drain before returning.
pub async fn stop(root: &Manager) {
    root.fire(builtin::Stop, vec![Channel::Broadcast]);
    if root.runtime.config().stop_blocks_until_drained {
        root.runtime
            .await_exhaustion_timeout(root.runtime.config().on_stop_timeout)
            .await;
    }
}

/// Blocks until every pipeline drawing on `runtime` is idle and every
/// registered generator has deregistered (§4.7/§6). Returns whether
/// exhaustion was reached within `timeout`, or `true` if no timeout is
/// given.
pub async fn await_exhaustion(runtime: &Runtime, timeout: Option<Duration>) -> bool {
    match timeout {
        Some(timeout) => runtime.await_exhaustion_timeout(timeout).await,
        None => {
            runtime.await_exhaustion().await;
            true
        }
    }
}
