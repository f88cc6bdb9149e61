//! The handler registry: declarative handler metadata plus the type-erased
//! callables the dispatcher invokes. See `SPEC_FULL.md` §4.2.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::event::{Event, EventCore, EventPayload};
use crate::matcher::MatchKey;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub(crate) type HandlerFn = Arc<dyn Fn(Arc<EventCore>, Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// One registered handler: the (event key, channel key) it matches, its
/// priority, and the callable that invokes it. Ties in priority are broken
/// by the order `HandlerEntry`s appear in `Node::handlers`, which is
/// registration order within a component (see `tree::collect_handlers`'s
/// stable sort).
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub event_key: MatchKey,
    pub channel_key: MatchKey,
    pub priority: i32,
    pub callable: HandlerFn,
}

impl HandlerEntry {
    pub fn event_type_matches(&self, type_id: std::any::TypeId, ancestors: &[std::any::TypeId]) -> bool {
        crate::matcher::type_matches(type_id, ancestors, &self.event_key)
    }
}

/// Handlers implement this for every event payload type `M` they subscribe
/// to, and declare the subscription in [`crate::component::Component::handlers`]
/// via [`HandlerSet::on`].
#[async_trait]
pub trait Handler<M: EventPayload>: Send + 'static {
    async fn handle(&mut self, event: &Event<M>, ctx: &Context);
}

/// A builder components populate from `Component::handlers` to declare their
/// static handler subscriptions. One `HandlerSet` is built per component
/// instance at construction time; its entries seed the component's node in
/// the tree.
pub struct HandlerSet<C> {
    pub(crate) entries: Vec<HandlerEntry>,
    shared: Arc<tokio::sync::Mutex<C>>,
    default_channel: MatchKey,
}

impl<C: Send + 'static> HandlerSet<C> {
    pub(crate) fn new(shared: Arc<tokio::sync::Mutex<C>>, default_channel: MatchKey) -> Self {
        HandlerSet {
            entries: Vec::new(),
            shared,
            default_channel,
        }
    }

    /// Subscribes this component's `Handler<M>` implementation to `M` events
    /// fired on `channel`, at the given priority (higher runs first).
    pub fn on<M>(&mut self, channel: MatchKey, priority: i32)
    where
        C: Handler<M>,
        M: EventPayload,
    {
        self.push::<M>(MatchKey::of::<M>(), channel, priority);
    }

    /// Like [`HandlerSet::on`], but only on this component's default
    /// channel.
    pub fn on_default_channel<M>(&mut self, priority: i32)
    where
        C: Handler<M>,
        M: EventPayload,
    {
        let channel = self.default_channel.clone();
        self.push::<M>(MatchKey::of::<M>(), channel, priority);
    }

    fn push<M>(&mut self, event_key: MatchKey, channel_key: MatchKey, priority: i32)
    where
        C: Handler<M>,
        M: EventPayload,
    {
        let shared = self.shared.clone();
        let callable: HandlerFn = Arc::new(move |core, ctx| {
            let shared = shared.clone();
            Box::pin(async move {
                let event = Event::<M>::from_core(core);
                let mut guard = shared.lock().await;
                guard.handle(&event, &ctx).await;
            })
        });
        self.entries.push(HandlerEntry {
            event_key,
            channel_key,
            priority,
            callable,
        });
    }
}

/// Adds a handler outside of `Component::handlers`, for subscriptions built
/// up at runtime (e.g. a response handler registered per-request). The
/// closure owns whatever state it needs to capture; it is not tied to any
/// particular `Component` impl.
pub fn dynamic_handler<M, F, Fut>(channel: MatchKey, priority: i32, f: F) -> HandlerEntry
where
    M: EventPayload,
    F: Fn(Event<M>, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let callable: HandlerFn = Arc::new(move |core, ctx| {
        let event = Event::<M>::from_core(core);
        Box::pin(f(event, ctx))
    });
    HandlerEntry {
        event_key: MatchKey::of::<M>(),
        channel_key: channel,
        priority,
        callable,
    }
}
