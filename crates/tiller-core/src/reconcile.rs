use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::component::{Cx, EventCx, Snapshot, merge_defaults};
use crate::element::{Element, ElementKind};
use crate::governor::{ChildKey, Children, Dirty, Governor, GovernorId, GovernorKind, Phase};
use crate::normalize::normalize;
use crate::runtime::{self, Runtime};
use crate::store::{Observer, ObserverEntry, Store, Subscription};
use crate::value::Value;

/// Instantiates `elem` as a fresh governor under `parent` and runs it to
/// idle: constructor, subscribe, child reconciliation, first publish,
/// `did_instantiate`.
pub(crate) fn create_governor(
    rt: &Rc<RefCell<Runtime>>,
    parent: Option<GovernorId>,
    elem: Element,
) -> GovernorId {
    let Element { kind, key } = elem;
    let (kind, props, state) = match kind {
        ElementKind::Combine(children) => {
            (GovernorKind::Combine, Value::Record(children), Value::Null)
        }
        ElementKind::CombineArray(items) => {
            (GovernorKind::CombineArray, Value::List(items), Value::Null)
        }
        ElementKind::Map { from, to } => (GovernorKind::Map { to }, *from, Value::Null),
        ElementKind::FlatMap { from, to } => (GovernorKind::FlatMap { to }, *from, Value::Null),
        ElementKind::Constant(v) => (GovernorKind::Constant, *v, Value::Null),
        ElementKind::Subscribe(store) => {
            (GovernorKind::Subscribe, Value::Store(store), Value::Null)
        }
        ElementKind::Component { component, props } => {
            let merged = merge_defaults(component.default_props(), *props);
            let state = component.initial_state(&merged);
            (GovernorKind::Component { component }, merged, state)
        }
    };
    let id = {
        let mut r = rt.borrow_mut();
        let depth = parent
            .and_then(|p| r.nodes.get(p))
            .map(|g| g.depth + 1)
            .unwrap_or(0);
        r.nodes.insert(Governor {
            parent,
            depth,
            phase: Phase::Instantiating,
            dirty: Dirty::PROPS | Dirty::STATE,
            kind,
            props,
            state,
            subs: Value::Null,
            value: Value::Null,
            committed: Value::Null,
            children: Children::None,
            observers: SmallVec::new(),
            upstream: None,
            key,
            published: None,
        })
    };
    update_governor(rt, id);
    id
}

/// Re-derives one dirty instance: re-runs subscribe when props or state
/// changed, reconciles the child tree, re-collects subs, re-publishes,
/// and fires the appropriate lifecycle hook. Children settle inside the
/// reconcile recursion, before this instance publishes.
pub(crate) fn update_governor(rt: &Rc<RefCell<Runtime>>, id: GovernorId) {
    let Some((kind, dirty, was_instantiating)) = ({
        let mut r = rt.borrow_mut();
        match r.nodes.get_mut(id) {
            Some(g) if g.phase == Phase::Disposed => None,
            Some(g) if g.phase == Phase::Transacting => {
                log::warn!("update re-entered for an instance already settling; skipped");
                None
            }
            Some(g) => {
                let inst = g.phase == Phase::Instantiating;
                if !inst && g.dirty.is_empty() {
                    None
                } else {
                    if !inst {
                        g.phase = Phase::Transacting;
                    }
                    Some((g.kind.clone(), g.dirty, inst))
                }
            }
            None => None,
        }
    }) else {
        return;
    };

    match kind {
        GovernorKind::Constant => {
            let value = read(rt, id, |g| g.props.clone());
            finish_update(rt, id, None, value);
        }
        GovernorKind::Subscribe => {
            let (desired, attached) = read(rt, id, |g| (g.props.clone(), g.state.clone()));
            let value = if desired != attached {
                let old = {
                    let mut r = rt.borrow_mut();
                    r.nodes.get_mut(id).and_then(|g| g.upstream.take())
                };
                if let Some(sub) = old {
                    sub.unsubscribe();
                }
                match &desired {
                    Value::Store(store) => {
                        let (sub, value) = attach_upstream(rt, id, store);
                        let mut r = rt.borrow_mut();
                        if let Some(g) = r.nodes.get_mut(id) {
                            g.upstream = Some(sub);
                            g.state = desired.clone();
                        }
                        value
                    }
                    _ => Value::Null,
                }
            } else {
                // Still attached to the same store; upstream pushes land
                // on the working value directly.
                read(rt, id, |g| g.value.clone())
            };
            finish_update(rt, id, None, value);
        }
        GovernorKind::Combine => {
            if was_instantiating || dirty.contains(Dirty::PROPS) {
                let desc = match read(rt, id, |g| g.props.clone()) {
                    Value::Record(map) => map,
                    _ => BTreeMap::new(),
                };
                reconcile_keyed(rt, id, desc);
            }
            let subs = collect_keyed(rt, id);
            finish_update(rt, id, Some(subs.clone()), subs);
        }
        GovernorKind::CombineArray => {
            if was_instantiating || dirty.contains(Dirty::PROPS) {
                let items = match read(rt, id, |g| g.props.clone()) {
                    Value::List(items) => items,
                    _ => Vec::new(),
                };
                reconcile_indexed(rt, id, items);
            }
            let subs = collect_indexed(rt, id);
            finish_update(rt, id, Some(subs.clone()), subs);
        }
        GovernorKind::Map { to } => {
            if was_instantiating || dirty.contains(Dirty::PROPS) {
                let from = read(rt, id, |g| g.props.clone());
                reconcile_single(rt, id, &from);
            }
            let subs = single_child_value(rt, id);
            let value = to(&subs);
            finish_update(rt, id, Some(subs), value);
        }
        GovernorKind::FlatMap { to } => {
            let full = was_instantiating || dirty.contains(Dirty::PROPS);
            if full {
                let from = read(rt, id, |g| g.props.clone());
                reconcile_routed_from(rt, id, &from);
            }
            let (from_value, routed_before, has_target) = {
                let r = rt.borrow();
                match r.nodes.get(id) {
                    Some(g) => match &g.children {
                        Children::Routed { from, target } => (
                            r.nodes.get(*from).map(|c| c.value.clone()).unwrap_or_default(),
                            g.subs.clone(),
                            target.is_some(),
                        ),
                        _ => (Value::Null, g.subs.clone(), false),
                    },
                    None => return,
                }
            };
            // Re-route when the routing input changed; a target-only
            // change just flows through below.
            if full || !has_target || from_value != routed_before {
                let routed = to(&from_value);
                reconcile_routed_target(rt, id, normalize(&routed));
            }
            let value = {
                let r = rt.borrow();
                match r.nodes.get(id).map(|g| &g.children) {
                    Some(Children::Routed { target: Some(t), .. }) => {
                        r.nodes.get(*t).map(|c| c.value.clone()).unwrap_or_default()
                    }
                    _ => Value::Null,
                }
            };
            finish_update(rt, id, Some(from_value), value);
        }
        GovernorKind::Component { component } => {
            let (props, state, old_subs, prev) = read(rt, id, |g| {
                (
                    g.props.clone(),
                    g.state.clone(),
                    g.subs.clone(),
                    g.published.clone(),
                )
            });
            let full = was_instantiating || dirty.intersects(Dirty::PROPS | Dirty::STATE);
            if full {
                let cx = Cx {
                    rt: Rc::downgrade(rt),
                    id,
                    props: props.clone(),
                    state: state.clone(),
                    subs: old_subs,
                };
                match component.subscribe(&cx) {
                    Some(node) => reconcile_single(rt, id, &node),
                    None => clear_single(rt, id),
                }
            }
            let subs = single_child_value(rt, id);
            let cx = Cx {
                rt: Rc::downgrade(rt),
                id,
                props: props.clone(),
                state: state.clone(),
                subs: subs.clone(),
            };
            let value = component.publish(&cx);
            {
                let mut r = rt.borrow_mut();
                if let Some(g) = r.nodes.get_mut(id) {
                    g.published = Some(Snapshot {
                        props,
                        state,
                        subs: subs.clone(),
                    });
                }
            }
            finish_update(rt, id, Some(subs), value);
            let mut cx = EventCx { rt, id };
            if was_instantiating {
                component.did_instantiate(&mut cx);
            } else if let Some(prev) = prev {
                component.did_update(&mut cx, prev);
            }
        }
    }
}

/// Tears one instance down: `will_dispose`, then children depth-first,
/// then the upstream subscription, then the arena slot. Events already
/// queued for the instance are dropped when they surface.
pub(crate) fn dispose_governor(rt: &Rc<RefCell<Runtime>>, id: GovernorId) {
    let hook = {
        let r = rt.borrow();
        let Some(g) = r.nodes.get(id) else { return };
        if g.phase == Phase::Disposed {
            return;
        }
        match &g.kind {
            GovernorKind::Component { component } => Some((
                component.clone(),
                Cx {
                    rt: Rc::downgrade(rt),
                    id,
                    props: g.props.clone(),
                    state: g.state.clone(),
                    subs: g.subs.clone(),
                },
            )),
            _ => None,
        }
    };
    if let Some((component, cx)) = hook {
        component.will_dispose(&cx);
    }
    let (children, upstream, depth) = {
        let mut r = rt.borrow_mut();
        let Some(g) = r.nodes.get_mut(id) else { return };
        if g.phase == Phase::Disposed {
            return;
        }
        g.phase = Phase::Disposed;
        g.observers.clear();
        (
            std::mem::replace(&mut g.children, Children::None),
            g.upstream.take(),
            g.depth,
        )
    };
    for cid in children.ids() {
        dispose_governor(rt, cid);
    }
    if let Some(sub) = upstream {
        sub.unsubscribe();
    }
    let mut r = rt.borrow_mut();
    r.dirty.remove(&(Reverse(depth), id));
    r.nodes.remove(id);
}

/// Writes the element payload into an existing matched governor and
/// settles it now. Reuse preserves internal state; this is the
/// update-in-place arm of the diff.
fn update_in_place(rt: &Rc<RefCell<Runtime>>, id: GovernorId, elem: Element) {
    let Element { kind, key } = elem;
    let (props, new_kind) = match kind {
        ElementKind::Combine(children) => (Value::Record(children), None),
        ElementKind::CombineArray(items) => (Value::List(items), None),
        ElementKind::Map { from, to } => (*from, Some(GovernorKind::Map { to })),
        ElementKind::FlatMap { from, to } => (*from, Some(GovernorKind::FlatMap { to })),
        ElementKind::Constant(v) => (*v, None),
        ElementKind::Subscribe(store) => (Value::Store(store), None),
        ElementKind::Component { component, props } => {
            (merge_defaults(component.default_props(), *props), None)
        }
    };
    {
        let mut r = rt.borrow_mut();
        let Some(g) = r.nodes.get_mut(id) else { return };
        g.props = props;
        if let Some(k) = new_kind {
            g.kind = k;
        }
        g.key = key;
        g.dirty |= Dirty::PROPS;
    }
    update_governor(rt, id);
}

fn child_matches(rt: &Rc<RefCell<Runtime>>, id: GovernorId, elem: &Element) -> bool {
    let r = rt.borrow();
    r.nodes
        .get(id)
        .map(|g| g.key == elem.key && g.matches_element(elem))
        .unwrap_or(false)
}

/// Diffs a component's (or map's) single child slot against a new node
/// description.
fn reconcile_single(rt: &Rc<RefCell<Runtime>>, parent: GovernorId, node: &Value) {
    let elem = normalize(node);
    let prev = {
        let r = rt.borrow();
        match r.nodes.get(parent).map(|g| &g.children) {
            Some(Children::Single(c)) => Some(*c),
            _ => None,
        }
    };
    match prev {
        Some(cid) if child_matches(rt, cid, &elem) => update_in_place(rt, cid, elem),
        Some(cid) => {
            dispose_governor(rt, cid);
            let fresh = create_governor(rt, Some(parent), elem);
            set_children(rt, parent, Children::Single(fresh));
        }
        None => {
            let fresh = create_governor(rt, Some(parent), elem);
            set_children(rt, parent, Children::Single(fresh));
        }
    }
}

fn clear_single(rt: &Rc<RefCell<Runtime>>, parent: GovernorId) {
    let prev = {
        let r = rt.borrow();
        match r.nodes.get(parent).map(|g| &g.children) {
            Some(Children::Single(c)) => Some(*c),
            _ => None,
        }
    };
    if let Some(cid) = prev {
        dispose_governor(rt, cid);
        set_children(rt, parent, Children::None);
    }
}

/// Diffs a combine's keyed children: matched keys update in place,
/// vanished keys dispose depth-first, new keys instantiate. A matching
/// key with a different type is dispose + recreate, never an in-place
/// type change.
fn reconcile_keyed(rt: &Rc<RefCell<Runtime>>, parent: GovernorId, desc: BTreeMap<String, Value>) {
    let prev: Vec<(String, GovernorId)> = {
        let mut r = rt.borrow_mut();
        match r.nodes.get_mut(parent) {
            Some(g) => match std::mem::replace(&mut g.children, Children::None) {
                Children::Keyed(kids) => kids,
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    };
    let mut leftover: BTreeMap<String, GovernorId> = prev.into_iter().collect();
    let mut next: Vec<(String, GovernorId)> = Vec::with_capacity(desc.len());
    for (k, node) in desc {
        let elem = normalize(&node);
        let child = match leftover.remove(&k) {
            Some(cid) if child_matches(rt, cid, &elem) => {
                update_in_place(rt, cid, elem);
                cid
            }
            Some(cid) => {
                log::trace!("combine child `{k}` changed type; replacing");
                dispose_governor(rt, cid);
                create_governor(rt, Some(parent), elem)
            }
            None => create_governor(rt, Some(parent), elem),
        };
        next.push((k, child));
    }
    for (_, cid) in leftover {
        dispose_governor(rt, cid);
    }
    set_children(rt, parent, Children::Keyed(next));
}

/// Diffs a combine_array's children. Explicit keys match across
/// positions (state travels with the key); unkeyed children match by
/// index only.
fn reconcile_indexed(rt: &Rc<RefCell<Runtime>>, parent: GovernorId, items: Vec<Value>) {
    let mut leftover: Vec<(ChildKey, GovernorId)> = {
        let mut r = rt.borrow_mut();
        match r.nodes.get_mut(parent) {
            Some(g) => match std::mem::replace(&mut g.children, Children::None) {
                Children::Indexed(kids) => kids,
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    };
    let mut next: Vec<(ChildKey, GovernorId)> = Vec::with_capacity(items.len());
    for (i, node) in items.into_iter().enumerate() {
        let elem = normalize(&node);
        let ck = elem
            .key
            .clone()
            .map(ChildKey::Key)
            .unwrap_or(ChildKey::Index(i));
        let found = leftover.iter().position(|(k, _)| *k == ck);
        let child = match found {
            Some(pos) => {
                let (_, cid) = leftover.remove(pos);
                if child_matches(rt, cid, &elem) {
                    update_in_place(rt, cid, elem);
                    cid
                } else {
                    dispose_governor(rt, cid);
                    create_governor(rt, Some(parent), elem)
                }
            }
            None => create_governor(rt, Some(parent), elem),
        };
        next.push((ck, child));
    }
    for (_, cid) in leftover {
        dispose_governor(rt, cid);
    }
    set_children(rt, parent, Children::Indexed(next));
}

fn reconcile_routed_from(rt: &Rc<RefCell<Runtime>>, parent: GovernorId, from: &Value) {
    let elem = normalize(from);
    let prev = {
        let r = rt.borrow();
        match r.nodes.get(parent).map(|g| &g.children) {
            Some(Children::Routed { from, target }) => Some((*from, *target)),
            _ => None,
        }
    };
    match prev {
        Some((fid, _)) if child_matches(rt, fid, &elem) => update_in_place(rt, fid, elem),
        Some((fid, target)) => {
            dispose_governor(rt, fid);
            let fresh = create_governor(rt, Some(parent), elem);
            set_children(rt, parent, Children::Routed { from: fresh, target });
        }
        None => {
            let fresh = create_governor(rt, Some(parent), elem);
            set_children(
                rt,
                parent,
                Children::Routed {
                    from: fresh,
                    target: None,
                },
            );
        }
    }
}

fn reconcile_routed_target(rt: &Rc<RefCell<Runtime>>, parent: GovernorId, elem: Element) {
    let (from, prev_target) = {
        let r = rt.borrow();
        match r.nodes.get(parent).map(|g| &g.children) {
            Some(Children::Routed { from, target }) => (*from, *target),
            _ => return,
        }
    };
    match prev_target {
        Some(tid) if child_matches(rt, tid, &elem) => update_in_place(rt, tid, elem),
        Some(tid) => {
            dispose_governor(rt, tid);
            let fresh = create_governor(rt, Some(parent), elem);
            set_children(
                rt,
                parent,
                Children::Routed {
                    from,
                    target: Some(fresh),
                },
            );
        }
        None => {
            let fresh = create_governor(rt, Some(parent), elem);
            set_children(
                rt,
                parent,
                Children::Routed {
                    from,
                    target: Some(fresh),
                },
            );
        }
    }
}

/// Reads the upstream store's committed value and registers a linked
/// observer feeding governor `id`.
fn attach_upstream(
    rt: &Rc<RefCell<Runtime>>,
    id: GovernorId,
    store: &Store,
) -> (Subscription, Value) {
    let value = store.get().unwrap_or_else(|_| {
        log::warn!("subscribed to a disposed store; output pinned to Null");
        Value::Null
    });
    let token = {
        let mut up = store.rt.borrow_mut();
        let token = up.take_token();
        if let Some(g) = up.nodes.get_mut(store.id) {
            g.observers.push(ObserverEntry {
                token,
                observer: Observer::Linked {
                    rt: Rc::downgrade(rt),
                    target: id,
                },
            });
        }
        token
    };
    (
        Subscription {
            rt: Rc::downgrade(&store.rt),
            id: store.id,
            token,
            active: Cell::new(true),
        },
        value,
    )
}

/// Settles the bookkeeping after a re-derivation: store subs and the
/// working value, clear dirt, and propagate upward only when the value
/// actually changed.
fn finish_update(rt: &Rc<RefCell<Runtime>>, id: GovernorId, subs: Option<Value>, value: Value) {
    let mut r = rt.borrow_mut();
    let Some(g) = r.nodes.get_mut(id) else { return };
    if let Some(s) = subs {
        g.subs = s;
    }
    let changed = g.value != value;
    g.value = value;
    g.dirty = Dirty::empty();
    if g.phase != Phase::Disposed {
        g.phase = Phase::Idle;
    }
    let depth = g.depth;
    let parent = g.parent;
    r.dirty.remove(&(Reverse(depth), id));
    if changed {
        r.touched.push(id);
        if let Some(p) = parent {
            runtime::mark_subs_dirty(&mut r, p);
        }
    }
}

fn set_children(rt: &Rc<RefCell<Runtime>>, id: GovernorId, children: Children) {
    let mut r = rt.borrow_mut();
    if let Some(g) = r.nodes.get_mut(id) {
        g.children = children;
    }
}

fn read<R>(rt: &Rc<RefCell<Runtime>>, id: GovernorId, f: impl FnOnce(&Governor) -> R) -> R
where
    R: Default,
{
    let r = rt.borrow();
    r.nodes.get(id).map(f).unwrap_or_default()
}

fn single_child_value(rt: &Rc<RefCell<Runtime>>, id: GovernorId) -> Value {
    let r = rt.borrow();
    match r.nodes.get(id).map(|g| &g.children) {
        Some(Children::Single(c)) => r.nodes.get(*c).map(|g| g.value.clone()).unwrap_or_default(),
        _ => Value::Null,
    }
}

fn collect_keyed(rt: &Rc<RefCell<Runtime>>, id: GovernorId) -> Value {
    let r = rt.borrow();
    match r.nodes.get(id).map(|g| &g.children) {
        Some(Children::Keyed(kids)) => Value::Record(
            kids.iter()
                .map(|(k, c)| {
                    (
                        k.clone(),
                        r.nodes.get(*c).map(|g| g.value.clone()).unwrap_or_default(),
                    )
                })
                .collect(),
        ),
        _ => Value::Record(BTreeMap::new()),
    }
}

fn collect_indexed(rt: &Rc<RefCell<Runtime>>, id: GovernorId) -> Value {
    let r = rt.borrow();
    match r.nodes.get(id).map(|g| &g.children) {
        Some(Children::Indexed(kids)) => Value::List(
            kids.iter()
                .map(|(_, c)| r.nodes.get(*c).map(|g| g.value.clone()).unwrap_or_default())
                .collect(),
        ),
        _ => Value::List(Vec::new()),
    }
}
