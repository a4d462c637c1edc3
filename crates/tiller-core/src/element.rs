use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::component::{Component, Sfc};
use crate::store::Store;
use crate::value::Value;

/// Transform applied by `map` and `flat_map` nodes.
pub type Transform = Rc<dyn Fn(&Value) -> Value>;

/// Explicit child identity for keyed reconciliation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// An immutable descriptor of a node to instantiate: what to build, not a
/// live instance. Consumed by instantiation and reconciliation.
#[derive(Clone)]
pub struct Element {
    pub(crate) kind: ElementKind,
    pub(crate) key: Option<Key>,
}

#[derive(Clone)]
pub(crate) enum ElementKind {
    Combine(BTreeMap<String, Value>),
    CombineArray(Vec<Value>),
    Map { from: Box<Value>, to: Transform },
    FlatMap { from: Box<Value>, to: Transform },
    Constant(Box<Value>),
    Subscribe(Store),
    Component { component: Rc<dyn Component>, props: Box<Value> },
}

impl Element {
    /// Attaches an explicit key, used instead of the structural position
    /// when matching children across reconciliations.
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        use ElementKind::*;
        if self.key != other.key {
            return false;
        }
        match (&self.kind, &other.kind) {
            (Combine(a), Combine(b)) => a == b,
            (CombineArray(a), CombineArray(b)) => a == b,
            (Map { from: fa, to: ta }, Map { from: fb, to: tb })
            | (FlatMap { from: fa, to: ta }, FlatMap { from: fb, to: tb }) => {
                fa == fb && Rc::ptr_eq(ta, tb)
            }
            (Constant(a), Constant(b)) => a == b,
            (Subscribe(a), Subscribe(b)) => a == b,
            (
                Component { component: ca, props: pa },
                Component { component: cb, props: pb },
            ) => Rc::ptr_eq(ca, cb) && pa == pb,
            _ => false,
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match &self.kind {
            ElementKind::Combine(_) => "combine",
            ElementKind::CombineArray(_) => "combine_array",
            ElementKind::Map { .. } => "map",
            ElementKind::FlatMap { .. } => "flat_map",
            ElementKind::Constant(_) => "constant",
            ElementKind::Subscribe(_) => "subscribe",
            ElementKind::Component { .. } => "component",
        };
        write!(f, "Element({tag})")
    }
}

/// Derives a record output from named children, reusing keyed children
/// across updates.
pub fn combine<K, V>(children: impl IntoIterator<Item = (K, V)>) -> Element
where
    K: Into<String>,
    V: Into<Value>,
{
    Element {
        kind: ElementKind::Combine(
            children
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ),
        key: None,
    }
}

/// Derives an ordered list output from a sequence of children, matched by
/// index or explicit key.
pub fn combine_array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Element {
    Element {
        kind: ElementKind::CombineArray(items.into_iter().map(Into::into).collect()),
        key: None,
    }
}

/// Applies `to` to the output of `from`. The transformed value is used
/// as-is; it is never instantiated, even if it happens to be an element.
pub fn map(from: impl Into<Value>, to: impl Fn(&Value) -> Value + 'static) -> Element {
    Element {
        kind: ElementKind::Map {
            from: Box::new(from.into()),
            to: Rc::new(to),
        },
        key: None,
    }
}

/// Routes to a second node computed from the output of `from`, and
/// flattens: the flat_map's output is the routed node's output. When the
/// route changes, the previous target is disposed within the same
/// transaction.
pub fn flat_map(from: impl Into<Value>, to: impl Fn(&Value) -> Value + 'static) -> Element {
    Element {
        kind: ElementKind::FlatMap {
            from: Box::new(from.into()),
            to: Rc::new(to),
        },
        key: None,
    }
}

/// A node whose output is a literal value, unconditionally stable.
pub fn constant(value: impl Into<Value>) -> Element {
    Element {
        kind: ElementKind::Constant(Box::new(value.into())),
        key: None,
    }
}

/// Wraps a live store from this or another tree; the node's output tracks
/// the store's committed value, folding each upstream commit into one
/// transaction here.
pub fn subscribe(store: &Store) -> Element {
    Element {
        kind: ElementKind::Subscribe(store.clone()),
        key: None,
    }
}

/// A user component element.
pub fn component(component: impl Component, props: impl Into<Value>) -> Element {
    Element {
        kind: ElementKind::Component {
            component: Rc::new(component),
            props: Box::new(props.into()),
        },
        key: None,
    }
}

/// A stateless function component: `f` maps props to a node description,
/// and the instance publishes that node's output unchanged.
pub fn sfc(f: impl Fn(&Value) -> Value + 'static, props: impl Into<Value>) -> Element {
    component(Sfc(f), props)
}
