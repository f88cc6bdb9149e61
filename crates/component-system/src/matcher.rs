//! The matching algebra shared by events and channels.
//!
//! A handler is registered against an *event key* and a *channel key*. A
//! fired event matches a handler when the event's own key equals the
//! handler's key or names one of the event's declared ancestors, and the
//! channel the event was fired on matches the handler's channel key the same
//! way. [`BROADCAST`] is the universal key: it matches, and is matched by,
//! everything.

use std::any::TypeId;
use std::borrow::Cow;
use std::hash::{Hash, Hasher};

/// A zero-sized marker type whose `TypeId` is used as the broadcast sentinel.
/// Nothing ever constructs a value of this type; only its `TypeId` matters.
pub struct Broadcast;

fn broadcast_id() -> TypeId {
    TypeId::of::<Broadcast>()
}

/// The key a handler is registered under, or the key a fired value (event or
/// channel) is matched against.
#[derive(Clone, Debug)]
pub enum MatchKey {
    /// Matched by Rust type identity plus declared ancestors (see
    /// [`crate::event::EventPayload::ancestors`]).
    Type(TypeKey),
    /// Matched by exact name, for channels and dynamically-keyed handlers
    /// that aren't tied to a single Rust type.
    Name(Cow<'static, str>),
}

impl MatchKey {
    pub fn of<T: 'static>() -> Self {
        MatchKey::Type(TypeKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        })
    }

    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        MatchKey::Name(name.into())
    }

    pub fn broadcast() -> Self {
        MatchKey::Type(TypeKey {
            id: broadcast_id(),
            name: "Broadcast",
        })
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, MatchKey::Type(tk) if tk.id == broadcast_id())
    }
}

impl PartialEq for MatchKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MatchKey::Type(a), MatchKey::Type(b)) => a.id == b.id,
            (MatchKey::Name(a), MatchKey::Name(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for MatchKey {}

impl Hash for MatchKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            MatchKey::Type(tk) => {
                0u8.hash(state);
                tk.id.hash(state);
            }
            MatchKey::Name(n) => {
                1u8.hash(state);
                n.hash(state);
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TypeKey {
    pub id: TypeId,
    pub name: &'static str,
}

/// Checks whether a fired value of Rust-type identity `value_id` (with the
/// given static ancestor chain) matches a handler registered under
/// `handler_key`. Name-keyed handlers never match type-identified values;
/// use [`name_matches`] for name-identified values (channels, dynamic
/// events).
pub fn type_matches(value_id: TypeId, value_ancestors: &[TypeId], handler_key: &MatchKey) -> bool {
    match handler_key {
        MatchKey::Type(tk) => {
            tk.id == broadcast_id()
                || value_id == broadcast_id()
                || tk.id == value_id
                || value_ancestors.contains(&tk.id)
        }
        MatchKey::Name(_) => false,
    }
}

/// Checks whether a fired value identified by `value_name` matches a handler
/// registered under `handler_key`. A handler registered under [`MatchKey::broadcast`]
/// matches every name.
pub fn name_matches(value_name: &str, handler_key: &MatchKey) -> bool {
    match handler_key {
        MatchKey::Name(n) => n.as_ref() == value_name,
        MatchKey::Type(tk) => tk.id == broadcast_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Foo;
    struct Bar;

    #[test]
    fn exact_type_match() {
        let handler_key = MatchKey::of::<Foo>();
        assert!(type_matches(TypeId::of::<Foo>(), &[], &handler_key));
        assert!(!type_matches(TypeId::of::<Bar>(), &[], &handler_key));
    }

    #[test]
    fn ancestor_match() {
        let handler_key = MatchKey::of::<Bar>();
        let ancestors = [TypeId::of::<Bar>()];
        assert!(type_matches(TypeId::of::<Foo>(), &ancestors, &handler_key));
    }

    #[test]
    fn broadcast_matches_anything_either_direction() {
        let broadcast = MatchKey::broadcast();
        assert!(type_matches(TypeId::of::<Foo>(), &[], &broadcast));
        let foo_handler = MatchKey::of::<Foo>();
        assert!(type_matches(broadcast_id(), &[], &foo_handler));
    }

    #[test]
    fn name_match_is_exact_unless_broadcast() {
        let handler_key = MatchKey::named("orders");
        assert!(name_matches("orders", &handler_key));
        assert!(!name_matches("payments", &handler_key));
        assert!(name_matches("payments", &MatchKey::broadcast()));
    }

    // §8.1 matcher completeness: a type-keyed handler matches iff the fired
    // value's type equals the handler key or appears in its declared
    // ancestors, modulo the broadcast sentinel matching everything either
    // direction. `TypeId`s can only come from real types, so the universe
    // below stands in for "any five distinct declared types".
    struct T0;
    struct T1;
    struct T2;
    struct T3;
    struct T4;

    fn universe() -> [TypeId; 5] {
        [
            TypeId::of::<T0>(),
            TypeId::of::<T1>(),
            TypeId::of::<T2>(),
            TypeId::of::<T3>(),
            TypeId::of::<T4>(),
        ]
    }

    proptest! {
        #[test]
        fn type_match_completeness(
            value_idx in 0usize..5,
            handler_idx in 0usize..5,
            ancestor_idxs in prop::collection::vec(0usize..5, 0..5),
        ) {
            let ids = universe();
            let value_id = ids[value_idx];
            let ancestors: Vec<TypeId> = ancestor_idxs.iter().map(|&i| ids[i]).collect();
            let handler_key = MatchKey::Type(TypeKey { id: ids[handler_idx], name: "T" });

            let expected = ids[handler_idx] == value_id || ancestors.contains(&ids[handler_idx]);
            prop_assert_eq!(type_matches(value_id, &ancestors, &handler_key), expected);
        }

        #[test]
        fn broadcast_handler_matches_every_value(value_idx in 0usize..5) {
            let value_id = universe()[value_idx];
            prop_assert!(type_matches(value_id, &[], &MatchKey::broadcast()));
        }

        #[test]
        fn name_match_completeness(value in "[a-z]{1,8}", handler in "[a-z]{1,8}") {
            let handler_key = MatchKey::named(handler.clone());
            prop_assert_eq!(name_matches(&value, &handler_key), value == handler);
            prop_assert!(name_matches(&value, &MatchKey::broadcast()));
        }
    }
}
