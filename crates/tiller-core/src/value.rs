use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::element::Element;
use crate::governor::GovernorId;
use crate::runtime::{self, Mutation, Runtime};
use crate::store::Store;

/// A dynamic value flowing through a governor tree.
///
/// Published outputs are `Value`s, and so are the node descriptions
/// returned from `Component::subscribe`: records and lists double as
/// implicit `combine` / `combine_array` nodes (see `normalize`). Values
/// can carry live handles: an [`Action`] sends an event back into the
/// tree that published it, a [`Store`] links another tree in, and an
/// [`Element`] describes a node that has not been instantiated yet.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Element(Element),
    Store(Store),
    Action(Action),
    Opaque(Rc<dyn Any>),
}

impl Value {
    /// Builds a record value from `(key, value)` pairs.
    pub fn record<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Record(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Record field lookup; `None` for non-records and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Record(map) => map.get(key),
            _ => None,
        }
    }

    /// List element lookup; `None` for non-lists and out-of-range indices.
    pub fn at(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Value::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_store(&self) -> Option<&Store> {
        match self {
            Value::Store(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            (Element(a), Element(b)) => a == b,
            (Store(a), Store(b)) => a == b,
            (Action(a), Action(b)) => a == b,
            (Opaque(a), Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Record(map) => f.debug_map().entries(map).finish(),
            Value::Element(_) => write!(f, "<element>"),
            Value::Store(_) => write!(f, "<store>"),
            Value::Action(a) => write!(f, "<action {}>", a.name),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Record(map)
    }
}

impl From<Element> for Value {
    fn from(e: Element) -> Self {
        Value::Element(e)
    }
}

impl From<Store> for Value {
    fn from(s: Store) -> Self {
        Value::Store(s)
    }
}

impl From<Action> for Value {
    fn from(a: Action) -> Self {
        Value::Action(a)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// A named event sender bound to one component instance.
///
/// Actions are minted by `Cx::action` during `publish` and travel inside
/// published values; invoking one enters the owning tree's transaction
/// coordinator and delivers the event to `Component::receive`. Two
/// actions compare equal when they target the same instance with the
/// same name, so republishing does not churn downstream values.
#[derive(Clone)]
pub struct Action {
    pub(crate) rt: Weak<RefCell<Runtime>>,
    pub(crate) target: GovernorId,
    pub(crate) name: Rc<str>,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `(name, payload)` to the owning component. Folds into the
    /// currently open transaction if there is one, otherwise runs a new
    /// transaction to completion before returning. Invoking an action
    /// whose tree is gone is a logged no-op.
    pub fn invoke(&self, payload: impl Into<Value>) {
        let Some(rt) = self.rt.upgrade() else {
            log::warn!("action `{}` invoked on a dropped tree", self.name);
            return;
        };
        runtime::enter(
            &rt,
            Mutation::Event {
                target: self.target,
                name: self.name.clone(),
                payload: payload.into(),
            },
        );
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.name == other.name && self.rt.ptr_eq(&other.rt)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.name)
    }
}
