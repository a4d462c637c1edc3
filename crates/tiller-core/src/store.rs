use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::element::{self, Element};
use crate::error::TillerError;
use crate::governor::{GovernorId, GovernorKind};
use crate::normalize::normalize;
use crate::runtime::{self, Mutation, Runtime};
use crate::value::Value;

/// The externally observable handle to a governor tree's root output.
///
/// Reads are synchronous against the last committed value; subscribers
/// are notified exactly once per outer transaction that changed it,
/// never mid-transaction. Clones share the same tree; the tree lives as
/// long as some handle (or a downstream subscribing tree) holds it, and
/// `dispose` tears it down eagerly.
#[derive(Clone)]
pub struct Store {
    pub(crate) rt: Rc<RefCell<Runtime>>,
    pub(crate) id: GovernorId,
}

impl Store {
    /// Last committed output. Mid-transaction re-derivations are never
    /// visible here.
    pub fn get(&self) -> Result<Value, TillerError> {
        let r = self.rt.borrow();
        r.nodes
            .get(self.id)
            .map(|g| g.committed.clone())
            .ok_or(TillerError::Disposed)
    }

    /// Attaches an observer. Nothing is delivered on attach; call
    /// [`Store::get`] for the initial value.
    pub fn subscribe(
        &self,
        observer: impl Fn(&Value) + 'static,
    ) -> Result<Subscription, TillerError> {
        let mut r = self.rt.borrow_mut();
        if r.disposed {
            return Err(TillerError::Disposed);
        }
        let token = r.take_token();
        let Some(g) = r.nodes.get_mut(self.id) else {
            return Err(TillerError::Disposed);
        };
        g.observers.push(ObserverEntry {
            token,
            observer: Observer::External(Rc::new(observer)),
        });
        Ok(Subscription {
            rt: Rc::downgrade(&self.rt),
            id: self.id,
            token,
            active: Cell::new(true),
        })
    }

    /// A `map` element over this store; embed it in a larger tree or
    /// instantiate it on its own.
    pub fn map(&self, to: impl Fn(&Value) -> Value + 'static) -> Element {
        element::map(self.clone(), to)
    }

    /// A `flat_map` element over this store.
    pub fn flat_map(&self, to: impl Fn(&Value) -> Value + 'static) -> Element {
        element::flat_map(self.clone(), to)
    }

    /// Pushes new props onto a component root, as a transaction. Only
    /// component roots accept props.
    pub fn set_props(&self, props: impl Into<Value>) -> Result<(), TillerError> {
        {
            let r = self.rt.borrow();
            let Some(g) = r.nodes.get(self.id) else {
                return Err(TillerError::Disposed);
            };
            if !matches!(g.kind, GovernorKind::Component { .. }) {
                return Err(TillerError::Shape(
                    "props can only be pushed onto a component root".into(),
                ));
            }
        }
        runtime::enter(
            &self.rt,
            Mutation::Props {
                target: self.id,
                props: props.into(),
            },
        );
        Ok(())
    }

    /// Tears the whole tree down depth-first, releasing upstream
    /// subscriptions. Idempotent. A dispose requested while this tree's
    /// own transaction is open is deferred to the commit boundary.
    pub fn dispose(&self) {
        runtime::teardown(&self.rt);
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.rt, &other.rt) && self.id == other.id
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store")
    }
}

/// Builds the full governor tree for `node`, runs it to idle, commits,
/// and returns the root store.
pub fn instantiate(node: impl Into<Value>) -> Store {
    let rt = Rc::new(RefCell::new(Runtime::new()));
    let elem = normalize(&node.into());
    let root = runtime::instantiate_root(&rt, elem);
    Store { rt, id: root }
}

/// Handle returned by [`Store::subscribe`]; detaches the observer.
pub struct Subscription {
    pub(crate) rt: Weak<RefCell<Runtime>>,
    pub(crate) id: GovernorId,
    pub(crate) token: u64,
    pub(crate) active: Cell<bool>,
}

impl Subscription {
    /// Stops further notifications. Safe to call multiple times.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        let Some(rt) = self.rt.upgrade() else {
            return;
        };
        let mut r = rt.borrow_mut();
        if let Some(g) = r.nodes.get_mut(self.id) {
            g.observers.retain(|e| e.token != self.token);
        }
    }
}

/// One attached observer: an external callback, or a link feeding a
/// subscribe node in another tree.
#[derive(Clone)]
pub(crate) enum Observer {
    External(Rc<dyn Fn(&Value)>),
    Linked {
        rt: Weak<RefCell<Runtime>>,
        target: GovernorId,
    },
}

#[derive(Clone)]
pub(crate) struct ObserverEntry {
    pub token: u64,
    pub observer: Observer,
}

impl Observer {
    /// Opens a transaction bracket on the linked tree, so every value
    /// delivered from one upstream commit folds into a single downstream
    /// transaction. External observers have no bracket.
    pub fn bracket_begin(&self) {
        if let Observer::Linked { rt, .. } = self
            && let Some(rt) = rt.upgrade()
        {
            runtime::begin_bracket(&rt);
        }
    }

    pub fn deliver(&self, value: &Value) {
        match self {
            Observer::External(f) => f(value),
            Observer::Linked { rt, target } => {
                if let Some(rt) = rt.upgrade() {
                    runtime::enter(
                        &rt,
                        Mutation::Upstream {
                            target: *target,
                            value: value.clone(),
                        },
                    );
                }
            }
        }
    }

    pub fn bracket_end(&self) {
        if let Observer::Linked { rt, .. } = self
            && let Some(rt) = rt.upgrade()
        {
            runtime::end_bracket(&rt);
        }
    }
}
