use std::any::Any;
use std::rc::Rc;

use bitflags::bitflags;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::component::{Component, Snapshot};
use crate::element::{Element, ElementKind, Key, Transform};
use crate::store::{ObserverEntry, Subscription};
use crate::value::Value;

new_key_type! {
    /// Handle to a live instance in its tree's arena. Stable for the
    /// instance's lifetime; never reused while the instance is alive.
    pub struct GovernorId;
}

bitflags! {
    /// Which inputs of an instance changed since it last settled.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub(crate) struct Dirty: u8 {
        /// Props pushed by the parent reconciler (or a root props push).
        const PROPS = 1 << 0;
        /// Internal state mutated through `EventCx`.
        const STATE = 1 << 1;
        /// A subscribed child's output changed.
        const SUBS = 1 << 2;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Phase {
    Instantiating,
    Idle,
    Transacting,
    Disposed,
}

/// Per-kind behavior tag. Built-ins carry their transform/behavior
/// payload; user components carry the behavior table.
#[derive(Clone)]
pub(crate) enum GovernorKind {
    Combine,
    CombineArray,
    Map { to: Transform },
    FlatMap { to: Transform },
    Constant,
    Subscribe,
    Component { component: Rc<dyn Component> },
}

/// Structural position of a `combine_array` child: its explicit key when
/// given, otherwise its index.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum ChildKey {
    Index(usize),
    Key(Key),
}

/// The live child tree of one instance, shaped by its kind.
pub(crate) enum Children {
    None,
    /// A component's subscribed tree, or a map/flat_map `from` slot
    /// (flat_map keeps its routed target separately).
    Single(GovernorId),
    Keyed(Vec<(String, GovernorId)>),
    Indexed(Vec<(ChildKey, GovernorId)>),
    Routed {
        from: GovernorId,
        target: Option<GovernorId>,
    },
}

impl Children {
    pub fn ids(&self) -> SmallVec<[GovernorId; 4]> {
        match self {
            Children::None => SmallVec::new(),
            Children::Single(id) => SmallVec::from_slice(&[*id]),
            Children::Keyed(kids) => kids.iter().map(|(_, id)| *id).collect(),
            Children::Indexed(kids) => kids.iter().map(|(_, id)| *id).collect(),
            Children::Routed { from, target } => {
                let mut out = SmallVec::new();
                out.push(*from);
                if let Some(t) = target {
                    out.push(*t);
                }
                out
            }
        }
    }
}

/// One live instance: the stateful realization of an element, owned by
/// the tree arena. Parent/child links are handles, never references, so
/// disposal walks by handle.
pub(crate) struct Governor {
    pub parent: Option<GovernorId>,
    pub depth: u32,
    pub phase: Phase,
    pub dirty: Dirty,
    pub kind: GovernorKind,
    /// The element payload this instance currently realizes: user props
    /// for components, the children description for combines, the `from`
    /// node for map/flat_map, the literal for constants, the upstream
    /// store for subscribes.
    pub props: Value,
    /// Internal component state. Subscribe nodes reuse this slot to cache
    /// the store they are currently attached to.
    pub state: Value,
    /// Collected input snapshot: the flattened output of the child tree.
    pub subs: Value,
    /// Working output, updated as the instance republishes mid-transaction.
    pub value: Value,
    /// Last committed output; the only value external readers ever see.
    pub committed: Value,
    pub children: Children,
    pub observers: SmallVec<[ObserverEntry; 2]>,
    /// Upstream link held by subscribe nodes; released on dispose.
    pub upstream: Option<Subscription>,
    /// Explicit element key, for indexed matching.
    pub key: Option<Key>,
    /// What the last publish saw; becomes `did_update`'s prev snapshot.
    pub published: Option<Snapshot>,
}

impl Governor {
    /// Identity rule for reuse across reconciliations: the kinds must
    /// match, and for components the implementing struct type must match.
    /// A matching key with a different type is dispose + recreate.
    pub fn matches_element(&self, elem: &Element) -> bool {
        match (&self.kind, &elem.kind) {
            (GovernorKind::Combine, ElementKind::Combine(_)) => true,
            (GovernorKind::CombineArray, ElementKind::CombineArray(_)) => true,
            (GovernorKind::Map { .. }, ElementKind::Map { .. }) => true,
            (GovernorKind::FlatMap { .. }, ElementKind::FlatMap { .. }) => true,
            (GovernorKind::Constant, ElementKind::Constant(_)) => true,
            (GovernorKind::Subscribe, ElementKind::Subscribe(_)) => true,
            (
                GovernorKind::Component { component: mine },
                ElementKind::Component { component: theirs, .. },
            ) => {
                let mine: &dyn Any = &**mine;
                let theirs: &dyn Any = &**theirs;
                mine.type_id() == theirs.type_id()
            }
            _ => false,
        }
    }
}
