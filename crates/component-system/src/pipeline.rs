//! The event pipeline: a single-threaded FIFO processor over a shared
//! worker pool. See `SPEC_FULL.md` §4.5.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::{Event, EventCore, EventPayload};
use crate::generator::GeneratorHandle;
use crate::runtime::Runtime;
use crate::tree::Node;

enum Scheduling {
    Idle,
    /// Holds the generator-registry membership for as long as this pipeline
    /// has been handed to the executor and hasn't yet drained its queue.
    Executing(GeneratorHandle),
}

struct Inner {
    runtime: Runtime,
    queue: Mutex<VecDeque<Arc<EventCore>>>,
    scheduling: Mutex<Scheduling>,
}

/// A FIFO event processor. Cheap to clone; every clone shares the same
/// queue and scheduling state.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Creates a pipeline with no tree of its own — the tree to dispatch
    /// against is supplied per `fire` call. This is what
    /// `Manager::new_event_pipeline` and a subchannel's response pipeline
    /// build on.
    pub(crate) fn new_detached(runtime: Runtime) -> Self {
        Pipeline {
            inner: Arc::new(Inner {
                runtime,
                queue: Mutex::new(VecDeque::new()),
                scheduling: Mutex::new(Scheduling::Idle),
            }),
        }
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Fires `payload` with no causal parent.
    pub(crate) fn fire<M: EventPayload>(&self, payload: M, channels: Vec<crate::channel::Channel>, tree_root: Arc<Node>) -> Event<M> {
        self.fire_with_parent(payload, channels, None, tree_root)
    }

    /// Fires `payload`, recording `parent` as the causal parent event (its
    /// `openCount` is incremented for as long as this event is open; see
    /// §3/§4.4).
    pub(crate) fn fire_with_parent<M: EventPayload>(
        &self,
        payload: M,
        channels: Vec<crate::channel::Channel>,
        parent: Option<Weak<EventCore>>,
        tree_root: Arc<Node>,
    ) -> Event<M> {
        debug_assert!(!channels.is_empty(), "an event's channels must be resolved before firing");
        if let Some(parent_weak) = &parent {
            if let Some(parent_core) = parent_weak.upgrade() {
                parent_core.open_count.fetch_add(1, Ordering::AcqRel);
            }
        }
        let core = EventCore::new(payload, channels, parent, self.clone(), tree_root);
        self.enqueue(core.clone());
        Event::<M>::from_core(core)
    }

    fn enqueue(&self, core: Arc<EventCore>) {
        self.inner.queue.lock().push_back(core);
        self.ensure_scheduled();
    }

    /// Non-destructively returns the event at the front of the queue, if
    /// any (§4.4: the queue supports `add`/`peek`/`remove`/`drainTo`; `add`
    /// is `enqueue`, `remove` is the pop in `drain`, `drainTo` is `merge`).
    pub(crate) fn peek(&self) -> Option<Arc<EventCore>> {
        self.inner.queue.lock().front().cloned()
    }

    /// Idle → executing is atomic with the first enqueue (§4.5); this is
    /// always called right after pushing onto the queue, under no lock that
    /// the drain loop itself needs, so there's no ordering hazard with the
    /// scheduling-state check below.
    fn ensure_scheduled(&self) {
        let mut state = self.inner.scheduling.lock();
        if matches!(*state, Scheduling::Idle) {
            *state = Scheduling::Executing(self.inner.runtime.generators().register());
            drop(state);
            let pipeline = self.clone();
            self.inner.runtime.spawn(async move { pipeline.drain().await });
        }
    }

    async fn drain(&self) {
        loop {
            let next = self.inner.queue.lock().pop_front();
            let Some(core) = next else {
                // Transition back to idle only while holding the scheduling
                // lock, and only if the queue is still empty once we have
                // it — otherwise a concurrent enqueue raced us and the
                // pipeline must keep running.
                let mut state = self.inner.scheduling.lock();
                if self.inner.queue.lock().is_empty() {
                    *state = Scheduling::Idle;
                    return;
                }
                continue;
            };
            self.process_one(core).await;
        }
    }

    async fn process_one(&self, core: Arc<EventCore>) {
        let channels = core.channels.clone();
        let tree_root = core.tree_root.clone();
        crate::dispatcher::dispatch(&tree_root, core.clone(), &channels, self).await;
        crate::dispatcher::complete(core, self);
    }

    /// Accepts events buffered on `other` (a pipeline being retired, e.g.
    /// during tree construction or an `attach`) and re-homes them to this
    /// pipeline, preserving their causal fields untouched.
    pub(crate) fn merge(&self, other: &Pipeline) {
        let drained: Vec<Arc<EventCore>> = other.inner.queue.lock().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        self.inner.queue.lock().extend(drained);
        self.ensure_scheduled();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::component::Component;
    use crate::context::Context;
    use crate::handler::{Handler, HandlerSet};
    use crate::manager::Manager;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Ping;
    impl EventPayload for Ping {}

    struct Counter {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Component for Counter {
        const NAME: &'static str = "Counter";

        fn handlers(builder: &mut HandlerSet<Self>) {
            builder.on_default_channel::<Ping>(0);
        }
    }

    #[async_trait]
    impl Handler<Ping> for Counter {
        async fn handle(&mut self, _event: &Event<Ping>, _ctx: &Context) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn fired_event_reaches_its_own_handler_and_completes() {
        let runtime = Runtime::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let manager = Manager::new(Counter { hits: hits.clone() }, runtime.clone());
        let event = manager.fire(Ping, vec![Channel::Broadcast]);
        event.get().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peek_returns_front_without_removing_it() {
        let runtime = Runtime::default();
        let pipeline = Pipeline::new_detached(runtime.clone());
        assert!(pipeline.peek().is_none());

        let manager = Manager::new(
            Counter {
                hits: Arc::new(AtomicUsize::new(0)),
            },
            runtime.clone(),
        );
        let first = manager.fire_on_pipeline(&pipeline, Ping, vec![Channel::Broadcast]);
        manager.fire_on_pipeline(&pipeline, Ping, vec![Channel::Broadcast]);

        let peeked = pipeline.peek().expect("queue should not be empty");
        assert!(Arc::ptr_eq(&peeked, &first.core));
        let peeked_again = pipeline.peek().expect("peek must not remove");
        assert!(Arc::ptr_eq(&peeked_again, &first.core));
    }
}
