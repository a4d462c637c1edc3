use std::any::Any;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::rc::{Rc, Weak};

use crate::governor::{Dirty, GovernorId, Phase};
use crate::runtime::Runtime;
use crate::value::{Action, Value};

/// A user-defined dataflow component.
///
/// A component declares how an output value is derived from its props,
/// internal state, and the outputs of the children it subscribes to. The
/// runtime owns all instance state; the component itself is a stateless
/// behavior table. Configuration may live in the implementing struct,
/// since reconciliation matches instances by struct type, not by field
/// values.
///
/// Call order per instance: `initial_state` → `subscribe` → children
/// reconcile → `publish` → `did_instantiate`; on each later update the
/// dirtied parts re-run (`subscribe` only when props or state changed),
/// then `publish` and `did_update`. `will_dispose` runs before the
/// instance and its children are torn down.
pub trait Component: Any {
    /// Record entries merged into missing props keys.
    fn default_props(&self) -> Value {
        Value::Null
    }

    fn initial_state(&self, _props: &Value) -> Value {
        Value::Null
    }

    /// Returns the node description for this instance's children, or
    /// `None` for a leaf. Re-run whenever props or state change.
    fn subscribe(&self, _cx: &Cx) -> Option<Value> {
        None
    }

    /// Derives the output value from `cx.props()`, `cx.state()` and
    /// `cx.subs()`. Runs after the children have settled.
    fn publish(&self, cx: &Cx) -> Value;

    /// Handles an event delivered by one of this instance's actions
    /// (see `Cx::action`). The usual place to call `cx.update_state`.
    fn receive(&self, _cx: &mut EventCx<'_>, _event: &str, _payload: Value) {}

    fn did_instantiate(&self, _cx: &mut EventCx<'_>) {}

    /// Fires after every re-publish with the previously published
    /// props/state/subs.
    fn did_update(&self, _cx: &mut EventCx<'_>, _prev: Snapshot) {}

    fn will_dispose(&self, _cx: &Cx) {}
}

/// The props/state/subs a component last published with; handed to
/// `did_update` so a hook can react to what actually changed.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub props: Value,
    pub state: Value,
    pub subs: Value,
}

/// Read-only view of one instance, passed to `subscribe` and `publish`.
pub struct Cx {
    pub(crate) rt: Weak<RefCell<Runtime>>,
    pub(crate) id: GovernorId,
    pub(crate) props: Value,
    pub(crate) state: Value,
    pub(crate) subs: Value,
}

impl Cx {
    pub fn props(&self) -> &Value {
        &self.props
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    /// The flattened output of the subscribed child tree. During
    /// `subscribe` this is the value collected on the previous pass
    /// (`Null` before the first reconcile).
    pub fn subs(&self) -> &Value {
        &self.subs
    }

    /// Mints an action value targeting this instance. Stable identity:
    /// actions minted with the same name on successive publishes compare
    /// equal.
    pub fn action(&self, name: &str) -> Value {
        Value::Action(Action {
            rt: self.rt.clone(),
            target: self.id,
            name: Rc::from(name),
        })
    }
}

/// Mutation-capable view of one instance, passed to `receive`,
/// `did_instantiate` and `did_update`. State writes mark the instance
/// dirty inside the currently open transaction; the coordinator re-runs
/// it before committing.
pub struct EventCx<'a> {
    pub(crate) rt: &'a Rc<RefCell<Runtime>>,
    pub(crate) id: GovernorId,
}

impl EventCx<'_> {
    pub fn props(&self) -> Value {
        self.read(|g| g.props.clone())
    }

    pub fn state(&self) -> Value {
        self.read(|g| g.state.clone())
    }

    pub fn subs(&self) -> Value {
        self.read(|g| g.subs.clone())
    }

    pub fn action(&self, name: &str) -> Value {
        Value::Action(Action {
            rt: Rc::downgrade(self.rt),
            target: self.id,
            name: Rc::from(name),
        })
    }

    pub fn set_state(&mut self, next: impl Into<Value>) {
        let next = next.into();
        self.update_state(|state| *state = next);
    }

    /// Mutates the instance state in place and schedules a re-derivation
    /// within the open transaction.
    pub fn update_state(&mut self, f: impl FnOnce(&mut Value)) {
        let mut r = self.rt.borrow_mut();
        let Some(g) = r.nodes.get_mut(self.id) else {
            return;
        };
        if g.phase == Phase::Disposed {
            return;
        }
        f(&mut g.state);
        g.dirty |= Dirty::STATE;
        let depth = g.depth;
        r.dirty.insert((Reverse(depth), self.id));
    }

    fn read<R>(&self, f: impl FnOnce(&crate::governor::Governor) -> R) -> R
    where
        R: Default,
    {
        let r = self.rt.borrow();
        r.nodes.get(self.id).map(f).unwrap_or_default()
    }
}

/// Adapter implementing the stateless function component contract on top
/// of the standard component machinery: subscribe returns `f(props)`, and
/// the instance publishes its subs unchanged.
pub(crate) struct Sfc<F>(pub F);

impl<F: Fn(&Value) -> Value + 'static> Component for Sfc<F> {
    fn subscribe(&self, cx: &Cx) -> Option<Value> {
        Some((self.0)(cx.props()))
    }

    fn publish(&self, cx: &Cx) -> Value {
        cx.subs().clone()
    }
}

/// Fills missing record keys in `props` from `defaults`; a `Null` props
/// value takes the defaults wholesale.
pub(crate) fn merge_defaults(defaults: Value, props: Value) -> Value {
    match (defaults, props) {
        (Value::Record(defaults), Value::Record(mut props)) => {
            for (k, v) in defaults {
                props.entry(k).or_insert(v);
            }
            Value::Record(props)
        }
        (defaults, Value::Null) => defaults,
        (_, props) => props,
    }
}
