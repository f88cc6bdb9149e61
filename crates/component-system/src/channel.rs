//! Channels: the topic a fired event is addressed to, independent of who
//! handles it. See `SPEC_FULL.md` §4.9 for subchannels.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use uuid::Uuid;

use crate::matcher::MatchKey;
use crate::pipeline::Pipeline;

/// A topic events are fired on and handlers are filtered by.
///
/// `Channel` is cheap to clone (everything but [`Channel::Sub`] is a plain
/// value or an `Arc`-backed handle).
#[derive(Clone)]
pub enum Channel {
    /// Matches, and is matched by, every handler's channel key.
    Broadcast,
    /// A channel identified by name, e.g. `"config"` or `"log"`.
    Named(Arc<str>),
    /// A component acting as its own channel (its default channel unless
    /// overridden).
    Component(Uuid),
    /// A dynamically created subchannel; see [`Subchannel`].
    Sub(Arc<Subchannel>),
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Broadcast => write!(f, "Channel::Broadcast"),
            Channel::Named(n) => write!(f, "Channel::Named({n:?})"),
            Channel::Component(id) => write!(f, "Channel::Component({id})"),
            Channel::Sub(s) => write!(f, "Channel::Sub({})", s.id),
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Channel::Broadcast, Channel::Broadcast) => true,
            (Channel::Named(a), Channel::Named(b)) => a == b,
            (Channel::Component(a), Channel::Component(b)) => a == b,
            (Channel::Sub(a), Channel::Sub(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Channel {
    /// The key handlers are matched against for this channel. Subchannels
    /// share their wrapped channel's key, per §4.9.
    pub fn match_key(&self) -> MatchKey {
        match self {
            Channel::Broadcast => MatchKey::broadcast(),
            Channel::Named(n) => MatchKey::named(n.to_string()),
            Channel::Component(id) => MatchKey::named(format!("component:{id}")),
            Channel::Sub(s) => s.parent.match_key(),
        }
    }

    /// Whether firing on this channel reaches every handler regardless of
    /// its registered channel key.
    pub fn matches(&self, handler_key: &MatchKey) -> bool {
        if matches!(self, Channel::Broadcast) {
            return true;
        }
        if handler_key.is_broadcast() {
            return true;
        }
        self.match_key() == *handler_key
    }

    pub fn new_named(name: impl Into<Arc<str>>) -> Self {
        Channel::Named(name.into())
    }

    /// Creates a subchannel wrapping `parent`, with its own association map
    /// and response pipeline drawn from `runtime`.
    pub fn new_sub(parent: Channel, pipeline: Pipeline) -> Self {
        Channel::Sub(Arc::new(Subchannel {
            id: Uuid::new_v4(),
            parent,
            associations: DashMap::new(),
            upstream: None,
            response_pipeline: pipeline,
        }))
    }

    /// Creates a subchannel linked to an existing upstream subchannel,
    /// recording a weak back-reference so the upstream can be located from
    /// values stored in the new subchannel's association map.
    pub fn new_linked_sub(parent: Channel, upstream: &Channel, pipeline: Pipeline) -> Option<Self> {
        let Channel::Sub(upstream_inner) = upstream else {
            return None;
        };
        let downstream = Arc::new(Subchannel {
            id: Uuid::new_v4(),
            parent,
            associations: DashMap::new(),
            upstream: Some(Arc::downgrade(upstream_inner)),
            response_pipeline: pipeline,
        });
        upstream_inner.associate(Downstream(Arc::downgrade(&downstream)));
        Some(Channel::Sub(downstream))
    }

    pub fn as_subchannel(&self) -> Option<&Subchannel> {
        match self {
            Channel::Sub(s) => Some(s),
            _ => None,
        }
    }
}

struct Downstream(Weak<Subchannel>);

/// A channel created to track one logical connection or session, carrying
/// arbitrary application-defined associations (e.g. a session object) and
/// its own dedicated response [`Pipeline`] so responses preserve FIFO order
/// relative to each other without being reordered by unrelated traffic.
///
/// `IoSubchannel` in the public API is this same type; concrete I/O
/// components are out of scope here, but this is the extension point they
/// would use.
pub struct Subchannel {
    id: Uuid,
    parent: Channel,
    associations: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    upstream: Option<Weak<Subchannel>>,
    response_pipeline: Pipeline,
}

impl Subchannel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn response_pipeline(&self) -> &Pipeline {
        &self.response_pipeline
    }

    pub fn upstream(&self) -> Option<Arc<Subchannel>> {
        self.upstream.as_ref().and_then(Weak::upgrade)
    }

    /// Associates `value` with this subchannel under its own type.
    pub fn associate<T: Send + Sync + 'static>(&self, value: T) {
        self.associations.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Looks up a value of type `T`, falling back to the wrapped channel if
    /// it is itself a subchannel and this subchannel has no association of
    /// that type.
    pub fn associated<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        if let Some(boxed) = self.associations.get(&TypeId::of::<T>()) {
            return boxed.downcast_ref::<T>().cloned();
        }
        self.parent.as_subchannel()?.associated::<T>()
    }
}

/// Alias kept for call sites that want to spell out intent; concrete I/O
/// components build on [`Subchannel`] through this name.
pub type IoSubchannel = Subchannel;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn broadcast_matches_any_handler_key() {
        assert!(Channel::Broadcast.matches(&MatchKey::named("anything")));
    }

    #[test]
    fn named_channel_matches_exact_name_or_broadcast_handler() {
        let ch = Channel::new_named("orders");
        assert!(ch.matches(&MatchKey::named("orders")));
        assert!(!ch.matches(&MatchKey::named("payments")));
        assert!(ch.matches(&MatchKey::broadcast()));
    }

    #[test]
    fn subchannel_shares_parent_match_key() {
        let runtime = Runtime::default();
        let parent = Channel::new_named("orders");
        let pipeline = Pipeline::new_detached(runtime.clone());
        let sub = Channel::new_sub(parent.clone(), pipeline);
        assert_eq!(sub.match_key(), parent.match_key());
    }

    #[test]
    fn association_falls_back_to_parent_subchannel() {
        let runtime = Runtime::default();
        let base = Channel::new_sub(Channel::Broadcast, Pipeline::new_detached(runtime.clone()));
        if let Channel::Sub(inner) = &base {
            inner.associate(42u32);
        }
        let nested = Channel::new_sub(base, Pipeline::new_detached(runtime));
        assert_eq!(nested.as_subchannel().unwrap().associated::<u32>(), Some(42));
    }
}
