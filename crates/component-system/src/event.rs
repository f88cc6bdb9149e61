//! Events: the unit of dispatch. See `SPEC_FULL.md` §3-§4.4/§11.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::error::Elapsed;

use crate::channel::Channel;
use crate::pipeline::Pipeline;
use crate::tree::Node;

/// Implemented by every type that can be fired as an event payload.
///
/// `ancestors` declares the type's static "is-a" chain for matcher purposes
/// (see `matcher.rs`): a handler registered for a supertype receives events
/// of every declared subtype. Most payloads have no ancestors and can rely
/// on the default empty slice.
pub trait EventPayload: Any + Send + Sync + 'static {
    /// Declares this type's supertypes for matcher purposes: a handler
    /// registered for one of these types is invoked for events of this type
    /// too (§3/§4.1). A handler matched this way still receives `Event<M>`
    /// for its own declared `M`, not the fired type, so `ancestors` is only
    /// safe to use for marker types a handler addresses through generic
    /// `Event` operations (`channels()`, `stop()`, `set_result()`) rather
    /// than payload fields — there is no Rust-level subtyping between
    /// distinct payload structs, so a handler that `Deref`s such an event
    /// expecting its own fields will panic on the downcast.
    fn ancestors() -> &'static [TypeId] {
        &[]
    }
}

/// The type-erased, shared state backing every fired event: exactly one
/// `EventCore` exists per fired event and is shared by every handler
/// invocation and every [`Event<M>`] view over it.
pub(crate) struct EventCore {
    pub(crate) payload: Box<dyn Any + Send + Sync>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) ancestors: &'static [TypeId],
    pub(crate) channels: Vec<Channel>,
    pub(crate) parent: Option<Weak<EventCore>>,
    pub(crate) processed_by: Pipeline,
    /// The root of the component tree this event is dispatched against.
    /// Recorded at fire time so that completion handling (which may walk up
    /// a chain of causally related parent events fired into different
    /// trees) always knows which tree to use for the `Completed` meta-event.
    pub(crate) tree_root: Arc<Node>,
    pub(crate) open_count: AtomicI64,
    pub(crate) stopped: AtomicBool,
    pub(crate) completed: AtomicBool,
    pub(crate) result: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    pub(crate) notify: Notify,
}

impl EventCore {
    pub(crate) fn new<M: EventPayload>(
        payload: M,
        channels: Vec<Channel>,
        parent: Option<Weak<EventCore>>,
        processed_by: Pipeline,
        tree_root: Arc<Node>,
    ) -> Arc<Self> {
        Arc::new(EventCore {
            payload: Box::new(payload),
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            ancestors: M::ancestors(),
            channels,
            parent,
            processed_by,
            tree_root,
            open_count: AtomicI64::new(1),
            stopped: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            result: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// A strongly typed, reference-counted view over a fired event's shared
/// state. Cheap to clone; every clone sees the same [`EventCore`].
pub struct Event<M> {
    pub(crate) core: Arc<EventCore>,
    _marker: PhantomData<M>,
}

impl<M> Clone for Event<M> {
    fn clone(&self) -> Self {
        Event {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M: EventPayload> Event<M> {
    pub(crate) fn from_core(core: Arc<EventCore>) -> Self {
        Event {
            core,
            _marker: PhantomData,
        }
    }

    /// The channels this event was fired on. Non-empty.
    pub fn channels(&self) -> &[Channel] {
        &self.core.channels
    }

    /// Requests that no further handlers be invoked for this dispatch pass.
    /// Handlers already invoked, and sibling events already enqueued, are
    /// unaffected.
    pub fn stop(&self) {
        self.core.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.core.stopped.load(Ordering::Acquire)
    }

    /// Records a result value on the event, retrievable via [`Event::with_result`].
    /// Overwrites any value previously set.
    pub fn set_result<T: Send + Sync + 'static>(&self, value: T) {
        *self.core.result.lock() = Some(Box::new(value));
    }

    /// Reads the event's result, if one has been set and is of type `T`.
    pub fn with_result<T: 'static, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.core.result.lock();
        f(guard.as_ref().and_then(|b| b.downcast_ref::<T>()))
    }

    /// Waits until this event, and every descendant it causally holds open,
    /// has completed.
    pub async fn get(&self) {
        loop {
            let notified = self.core.notify.notified();
            if self.core.is_completed() {
                return;
            }
            notified.await;
        }
    }

    /// Like [`Event::get`], but bounded by `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<(), Elapsed> {
        tokio::time::timeout(timeout, self.get()).await
    }
}

impl<M: EventPayload> Deref for Event<M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.core
            .payload
            .downcast_ref::<M>()
            .expect("Event<M> always wraps an EventCore built from an M payload")
    }
}

impl<M: EventPayload + std::fmt::Debug> std::fmt::Debug for Event<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("type", &self.core.type_name)
            .field("payload", &**self)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::tree::{ComponentOps, Node};

    #[derive(Debug)]
    struct Ping(u32);
    impl EventPayload for Ping {}

    /// A standalone one-node tree with inert lifecycle callbacks, for tests
    /// that need a `tree_root` but don't exercise dispatch.
    fn test_tree_root(runtime: Runtime) -> Arc<Node> {
        let on_start: crate::tree::OnStartFn = Arc::new(|_ctx: crate::context::Context| Box::pin(async {}));
        let on_stop: crate::tree::OnStopFn = Arc::new(|_ctx: crate::context::Context| {
            Box::pin(async { Ok::<(), Box<dyn component_error::RuntimeError>>(()) })
        });
        let on_handler_panic: crate::tree::OnHandlerPanicFn =
            Arc::new(|_panic: component_error::PanicError| Box::pin(async {}));
        let ops = ComponentOps {
            name: "test",
            on_start,
            on_stop,
            on_stop_timeout: Duration::from_secs(1),
            on_handler_panic,
        };
        Node::new(uuid::Uuid::new_v4(), ops, Channel::Broadcast, Vec::new(), runtime)
    }

    #[tokio::test]
    async fn stop_and_result_round_trip() {
        let runtime = Runtime::default();
        let pipeline = Pipeline::new_detached(runtime.clone());
        let tree_root = test_tree_root(runtime);
        let core = EventCore::new(Ping(1), vec![Channel::Broadcast], None, pipeline, tree_root);
        let event = Event::<Ping>::from_core(core);
        assert_eq!(event.0, 1);
        assert!(!event.is_stopped());
        event.stop();
        assert!(event.is_stopped());
        event.set_result(99u32);
        event.with_result::<u32, _>(|v| assert_eq!(v, Some(&99)));
    }

    #[tokio::test]
    async fn get_resolves_once_completed() {
        let runtime = Runtime::default();
        let pipeline = Pipeline::new_detached(runtime.clone());
        let tree_root = test_tree_root(runtime);
        let core = EventCore::new(Ping(1), vec![Channel::Broadcast], None, pipeline, tree_root);
        let event = Event::<Ping>::from_core(core.clone());
        let waiter = tokio::spawn({
            let event = event.clone();
            async move { event.get().await }
        });
        tokio::task::yield_now().await;
        core.completed.store(true, Ordering::Release);
        core.notify.notify_waiters();
        waiter.await.unwrap();
    }
}
