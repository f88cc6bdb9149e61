//! The component tree: parent/child graph, shared per-tree state, and the
//! handler-lookup cache dispatch reads from. See `SPEC_FULL.md` §4.3.

use std::any::TypeId;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use component_error::{PanicError, RuntimeError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::channel::Channel;
use crate::context::Context;
use crate::handler::HandlerEntry;
use crate::matcher::MatchKey;
use crate::pipeline::Pipeline;
use crate::{error::TreeError, runtime::Runtime};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) type OnStartFn = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type OnStopFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<(), Box<dyn RuntimeError>>> + Send + Sync>;
pub(crate) type OnHandlerPanicFn = Arc<dyn Fn(PanicError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Type-erased lifecycle callbacks for a component instance, built once at
/// `Manager::new` time from its `Component` impl.
pub(crate) struct ComponentOps {
    pub(crate) name: &'static str,
    pub(crate) on_start: OnStartFn,
    pub(crate) on_stop: OnStopFn,
    pub(crate) on_stop_timeout: std::time::Duration,
    pub(crate) on_handler_panic: OnHandlerPanicFn,
}

/// One node in the component tree: a component's identity, its default
/// channel, its handler set, and its position in the tree.
pub struct Node {
    pub(crate) id: Uuid,
    pub(crate) ops: ComponentOps,
    pub(crate) default_channel: Channel,
    pub(crate) handlers: RwLock<Vec<HandlerEntry>>,
    pub(crate) parent: RwLock<Option<Weak<Node>>>,
    pub(crate) children: RwLock<Vec<Arc<Node>>>,
    pub(crate) tree: RwLock<Option<Arc<TreeState>>>,
}

impl Node {
    pub(crate) fn new(id: Uuid, ops: ComponentOps, default_channel: Channel, handlers: Vec<HandlerEntry>, runtime: Runtime) -> Arc<Node> {
        let node = Arc::new(Node {
            id,
            ops,
            default_channel,
            handlers: RwLock::new(handlers),
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            tree: RwLock::new(None),
        });
        let tree_state = TreeState::new(node.clone(), runtime);
        *node.tree.write() = Some(tree_state);
        node
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.ops.name
    }

    pub fn default_channel(&self) -> Channel {
        self.default_channel.clone()
    }

    pub(crate) fn tree(&self) -> Arc<TreeState> {
        self.tree
            .read()
            .clone()
            .expect("Node::tree is set before the constructing Arc<Node> escapes Node::new")
    }

    pub fn parent(self: &Arc<Self>) -> Option<Arc<Node>> {
        self.parent.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<Node>> {
        self.children.read().clone()
    }

    pub fn root(self: &Arc<Self>) -> Arc<Node> {
        self.tree().root()
    }

    /// Pre-order traversal starting at this node.
    pub fn iter_preorder(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let mut out = Vec::new();
        collect_preorder(self, &mut out);
        out
    }

    /// Slash-separated chain of component names, root first.
    pub fn path(self: &Arc<Self>) -> String {
        let mut names = vec![self.name().to_string()];
        let mut cur = self.parent();
        while let Some(p) = cur {
            names.push(p.name().to_string());
            cur = p.parent();
        }
        names.reverse();
        names.join("/")
    }

    pub(crate) fn add_handler(&self, entry: HandlerEntry) {
        self.handlers.write().push(entry);
    }
}

fn collect_preorder(node: &Arc<Node>, out: &mut Vec<Arc<Node>>) {
    out.push(node.clone());
    for child in node.children.read().iter() {
        collect_preorder(child, out);
    }
}

/// Runtime-wide cache key: the fired event's Rust type plus the canonical,
/// order-independent set of channel match keys it was fired on.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    event_type: TypeId,
    channel_keys: Vec<ChannelKeyKind>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum ChannelKeyKind {
    Ty(TypeId),
    Name(String),
}

impl ChannelKeyKind {
    fn of(key: &MatchKey) -> Self {
        match key {
            MatchKey::Type(tk) => ChannelKeyKind::Ty(tk.id),
            MatchKey::Name(n) => ChannelKeyKind::Name(n.to_string()),
        }
    }

    fn sort_key(&self) -> (u8, String) {
        match self {
            ChannelKeyKind::Ty(id) => (0, format!("{id:?}")),
            ChannelKeyKind::Name(n) => (1, n.clone()),
        }
    }
}

fn cache_key(event_type: TypeId, channels: &[Channel]) -> CacheKey {
    let mut keys: Vec<ChannelKeyKind> = channels.iter().map(|c| ChannelKeyKind::of(&c.match_key())).collect();
    keys.sort_by_key(|k| k.sort_key());
    keys.dedup();
    CacheKey {
        event_type,
        channel_keys: keys,
    }
}

/// One handler collected for dispatch, paired with the node it belongs to
/// (needed to build the `Context` a handler is invoked with).
#[derive(Clone)]
pub(crate) struct DispatchEntry {
    pub(crate) node: Arc<Node>,
    pub(crate) handler: HandlerEntry,
}

/// State shared by every node in one tree: the root, the root pipeline, the
/// handler-lookup cache, and whether the tree has been started (§4.3:
/// attach is rejected once a subtree has outstanding generators).
pub struct TreeState {
    pub(crate) id: Uuid,
    root: RwLock<Arc<Node>>,
    root_pipeline: Pipeline,
    cache: DashMap<CacheKey, Arc<Vec<DispatchEntry>>>,
    started: AtomicBool,
    mutation_lock: Mutex<()>,
}

impl TreeState {
    fn new(root: Arc<Node>, runtime: Runtime) -> Arc<TreeState> {
        Arc::new(TreeState {
            id: Uuid::new_v4(),
            root_pipeline: Pipeline::new_detached(runtime),
            root: RwLock::new(root),
            cache: DashMap::new(),
            started: AtomicBool::new(false),
            mutation_lock: Mutex::new(()),
        })
    }

    pub(crate) fn root(&self) -> Arc<Node> {
        self.root.read().clone()
    }

    pub(crate) fn root_pipeline(&self) -> &Pipeline {
        &self.root_pipeline
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn invalidate_cache(&self) {
        self.cache.clear();
    }

    /// Collects the handlers matching `(event_type, ancestors)` × `channels`
    /// in dispatch order (§4.6): tree pre-order, component insertion order,
    /// then a stable sort by descending priority.
    pub(crate) fn collect_handlers(&self, event_type: TypeId, ancestors: &[TypeId], channels: &[Channel]) -> Arc<Vec<DispatchEntry>> {
        let key = cache_key(event_type, channels);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let root = self.root();
        let mut collected = Vec::new();
        for node in root.iter_preorder() {
            for handler in node.handlers.read().iter() {
                if !handler.event_type_matches(event_type, ancestors) {
                    continue;
                }
                if !channels.iter().any(|c| c.matches(&handler.channel_key)) {
                    continue;
                }
                collected.push(DispatchEntry {
                    node: node.clone(),
                    handler: handler.clone(),
                });
            }
        }
        collected.sort_by(|a, b| b.handler.priority.cmp(&a.handler.priority));
        let collected = Arc::new(collected);
        self.cache.insert(key, collected.clone());
        collected
    }
}

/// Attaches `child` (which must be a detached root) under `parent`. Invalid
/// if `child` is already attached or its subtree has been started.
///
/// Lock order: child, then child's (old) tree, then parent's (new) tree —
/// matching `SPEC_FULL.md` §4.3/§9.
pub(crate) fn attach(parent: &Arc<Node>, child: &Arc<Node>) -> Result<(), TreeError> {
    {
        let parent_guard = child.parent.read();
        if parent_guard.is_some() {
            return Err(TreeError::AlreadyAttached);
        }
    }
    let old_tree = child.tree();
    let new_tree = parent.tree();

    // `child` has no parent, so it is the root of `old_tree`. If that tree is
    // also `new_tree`, `parent` is one of `child`'s own descendants: attaching
    // would create a cycle. Reject it here, before taking any lock — the two
    // `Arc`s below would otherwise point at the same `parking_lot::Mutex`,
    // and locking it twice on one thread deadlocks instead of erroring.
    if Arc::ptr_eq(&old_tree, &new_tree) {
        return Err(TreeError::AlreadyAttached);
    }

    let _old_guard = old_tree.mutation_lock.lock();
    let _new_guard = new_tree.mutation_lock.lock();

    if old_tree.is_started() {
        return Err(TreeError::SubtreeStarted);
    }

    *child.parent.write() = Some(Arc::downgrade(parent));
    parent.children.write().push(child.clone());

    reassign_tree(child, new_tree.clone());
    new_tree.root_pipeline.merge(&old_tree.root_pipeline);
    old_tree.invalidate_cache();

    let parent_channel = parent.default_channel();
    let child_channel = child.default_channel();
    let attached_channels = if parent_channel == child_channel {
        vec![parent_channel]
    } else if matches!(parent_channel, Channel::Broadcast) || matches!(child_channel, Channel::Broadcast) {
        vec![Channel::Broadcast]
    } else {
        vec![parent_channel, child_channel]
    };
    new_tree.root_pipeline.fire(
        crate::builtin::Attached {
            parent: parent.id(),
            child: child.id(),
        },
        attached_channels,
        new_tree.root(),
    );

    Ok(())
}

/// Detaches `node` from its parent; the detached subtree becomes its own
/// tree with a fresh pipeline.
pub(crate) fn detach(node: &Arc<Node>) -> Result<(), TreeError> {
    let former_parent = node.parent().ok_or(TreeError::NoParent)?;
    let old_tree = node.tree();

    let _old_guard = old_tree.mutation_lock.lock();

    {
        let mut siblings = former_parent.children.write();
        let before = siblings.len();
        siblings.retain(|c| !Arc::ptr_eq(c, node));
        if siblings.len() == before {
            return Err(TreeError::NotAChild);
        }
    }
    *node.parent.write() = None;

    let fresh_tree = TreeState::new(node.clone(), old_tree.root_pipeline.runtime().clone());
    reassign_tree(node, fresh_tree.clone());
    old_tree.invalidate_cache();

    let parent_channel = former_parent.default_channel();
    let child_channel = node.default_channel();
    let detached_channels = if parent_channel == child_channel {
        vec![parent_channel]
    } else {
        vec![parent_channel, child_channel]
    };
    fresh_tree.root_pipeline.fire(
        crate::builtin::Detached {
            former_parent: former_parent.id(),
            child: node.id(),
        },
        detached_channels,
        fresh_tree.root(),
    );

    Ok(())
}

fn reassign_tree(node: &Arc<Node>, tree: Arc<TreeState>) {
    *tree.root.write() = node.clone();
    *node.tree.write() = Some(tree.clone());
    for child in node.children.read().iter() {
        reassign_tree_child(child, tree.clone());
    }
}

fn reassign_tree_child(node: &Arc<Node>, tree: Arc<TreeState>) {
    *node.tree.write() = Some(tree.clone());
    for child in node.children.read().iter() {
        reassign_tree_child(child, tree.clone());
    }
}
