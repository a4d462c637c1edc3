use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use slotmap::SlotMap;

use crate::component::{EventCx, merge_defaults};
use crate::element::Element;
use crate::governor::{Dirty, Governor, GovernorId, GovernorKind, Phase};
use crate::reconcile;
use crate::store::ObserverEntry;
use crate::value::Value;

/// One governor tree's shared mutable core: the instance arena plus the
/// transaction coordinator's queues. All entry points (actions, root
/// props pushes, upstream notifications) funnel through [`enter`]; the
/// outermost entry drains everything to a fixed point and commits once.
pub(crate) struct Runtime {
    pub nodes: SlotMap<GovernorId, Governor>,
    pub root: GovernorId,
    /// Open transaction holds: the flushing entry plus any upstream
    /// brackets. Mutations arriving while this is nonzero are folded.
    pub tx_depth: usize,
    pub queue: VecDeque<Mutation>,
    /// Dirty instances, ordered deepest-first so children settle before
    /// their parents re-publish.
    pub dirty: BTreeSet<(Reverse<u32>, GovernorId)>,
    /// Instances whose working value changed this transaction.
    pub touched: Vec<GovernorId>,
    pub next_token: u64,
    pub pending_dispose: bool,
    pub disposed: bool,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            nodes: SlotMap::with_key(),
            root: GovernorId::default(),
            tx_depth: 0,
            queue: VecDeque::new(),
            dirty: BTreeSet::new(),
            touched: Vec::new(),
            next_token: 1,
            pending_dispose: false,
            disposed: false,
        }
    }

    pub fn take_token(&mut self) -> u64 {
        let t = self.next_token;
        self.next_token += 1;
        t
    }
}

/// A pending mutation queued into the open transaction.
pub(crate) enum Mutation {
    /// An action delivering an event to its component.
    Event {
        target: GovernorId,
        name: Rc<str>,
        payload: Value,
    },
    /// A props push onto a (root) component.
    Props { target: GovernorId, props: Value },
    /// A committed value arriving from an upstream store.
    Upstream { target: GovernorId, value: Value },
}

/// Transaction entry point. Queues the mutation; if no transaction is
/// open, runs one to completion (drain + commit) before returning.
pub(crate) fn enter(rt: &Rc<RefCell<Runtime>>, mutation: Mutation) {
    {
        let mut r = rt.borrow_mut();
        if r.disposed {
            log::debug!("mutation on a disposed tree dropped");
            return;
        }
        r.queue.push_back(mutation);
        if r.tx_depth > 0 {
            return;
        }
        r.tx_depth = 1;
    }
    flush(rt);
    commit(rt);
}

/// Opens an upstream transaction bracket: mutations delivered until the
/// matching [`end_bracket`] fold into one transaction here.
pub(crate) fn begin_bracket(rt: &Rc<RefCell<Runtime>>) {
    rt.borrow_mut().tx_depth += 1;
}

pub(crate) fn end_bracket(rt: &Rc<RefCell<Runtime>>) {
    let run = {
        let mut r = rt.borrow_mut();
        r.tx_depth = r.tx_depth.saturating_sub(1);
        if r.tx_depth == 0 && !r.disposed {
            r.tx_depth = 1;
            true
        } else {
            false
        }
    };
    if run {
        flush(rt);
        commit(rt);
    }
}

/// Drains queued mutations and the dirty set to a fixed point. Hooks may
/// enqueue further mutations mid-drain; those fold in. A tree that never
/// settles (a hook that dirties unconditionally) is cut off with an
/// error instead of spinning forever.
pub(crate) fn flush(rt: &Rc<RefCell<Runtime>>) {
    let cap = {
        let r = rt.borrow();
        r.nodes.len() * 64 + 1024
    };
    let mut steps = 0usize;
    loop {
        steps += 1;
        if steps > cap {
            log::error!("transaction failed to settle after {cap} steps; dropping remaining work");
            let mut r = rt.borrow_mut();
            r.queue.clear();
            r.dirty.clear();
            break;
        }
        let next = { rt.borrow_mut().queue.pop_front() };
        if let Some(m) = next {
            apply_mutation(rt, m);
            continue;
        }
        let next_dirty = {
            let mut r = rt.borrow_mut();
            r.dirty.pop_first().map(|(_, id)| id)
        };
        let Some(id) = next_dirty else { break };
        reconcile::update_governor(rt, id);
    }
}

/// Closes the transaction: promotes working values to committed and
/// notifies observers of each changed store exactly once. Linked
/// observers are bracketed so one commit here folds into one transaction
/// in each downstream tree, however many links feed it.
pub(crate) fn commit(rt: &Rc<RefCell<Runtime>>) {
    let mut notes: Vec<(smallvec::SmallVec<[ObserverEntry; 2]>, Value)> = Vec::new();
    let run_teardown;
    {
        let mut r = rt.borrow_mut();
        let touched = std::mem::take(&mut r.touched);
        let mut seen: BTreeSet<GovernorId> = BTreeSet::new();
        for id in touched {
            if !seen.insert(id) {
                continue;
            }
            let Some(g) = r.nodes.get_mut(id) else {
                continue;
            };
            if g.value != g.committed {
                g.committed = g.value.clone();
                if !g.observers.is_empty() {
                    notes.push((g.observers.clone(), g.committed.clone()));
                }
            }
        }
        r.tx_depth = 0;
        run_teardown = r.pending_dispose;
        r.pending_dispose = false;
    }
    for (entries, _) in &notes {
        for e in entries {
            e.observer.bracket_begin();
        }
    }
    for (entries, value) in &notes {
        for e in entries {
            e.observer.deliver(value);
        }
    }
    for (entries, _) in &notes {
        for e in entries {
            e.observer.bracket_end();
        }
    }
    if run_teardown {
        teardown(rt);
    }
}

/// Tears the whole tree down. Requested mid-transaction, it is deferred
/// to the commit boundary; otherwise it runs now, depth-first from the
/// root, releasing upstream subscriptions as it goes.
pub(crate) fn teardown(rt: &Rc<RefCell<Runtime>>) {
    let root = {
        let mut r = rt.borrow_mut();
        if r.disposed {
            return;
        }
        if r.tx_depth > 0 {
            r.pending_dispose = true;
            return;
        }
        // Block re-entrant transactions while tearing down.
        r.tx_depth = 1;
        r.root
    };
    reconcile::dispose_governor(rt, root);
    let mut r = rt.borrow_mut();
    r.nodes.clear();
    r.queue.clear();
    r.dirty.clear();
    r.touched.clear();
    r.tx_depth = 0;
    r.disposed = true;
}

/// Builds the root governor inside an initial transaction, drains any
/// hook-induced mutations, and commits.
pub(crate) fn instantiate_root(rt: &Rc<RefCell<Runtime>>, elem: Element) -> GovernorId {
    {
        rt.borrow_mut().tx_depth = 1;
    }
    let root = reconcile::create_governor(rt, None, elem);
    {
        rt.borrow_mut().root = root;
    }
    flush(rt);
    commit(rt);
    root
}

fn apply_mutation(rt: &Rc<RefCell<Runtime>>, mutation: Mutation) {
    match mutation {
        Mutation::Event {
            target,
            name,
            payload,
        } => {
            let component = {
                let r = rt.borrow();
                match r.nodes.get(target) {
                    Some(g) if g.phase != Phase::Disposed => match &g.kind {
                        GovernorKind::Component { component } => Some(component.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            };
            match component {
                Some(c) => {
                    let mut cx = EventCx { rt, id: target };
                    c.receive(&mut cx, &name, payload);
                }
                None => log::debug!("event `{name}` dropped: target is gone or not a component"),
            }
        }
        Mutation::Props { target, props } => {
            let component = {
                let r = rt.borrow();
                match r.nodes.get(target) {
                    Some(g) if g.phase != Phase::Disposed => match &g.kind {
                        GovernorKind::Component { component } => Some(component.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            };
            let merged = match &component {
                Some(c) => merge_defaults(c.default_props(), props),
                None => props,
            };
            let mut r = rt.borrow_mut();
            let Some(g) = r.nodes.get_mut(target) else {
                return;
            };
            if g.phase == Phase::Disposed {
                return;
            }
            g.props = merged;
            g.dirty |= Dirty::PROPS;
            let depth = g.depth;
            r.dirty.insert((Reverse(depth), target));
        }
        Mutation::Upstream { target, value } => {
            let mut r = rt.borrow_mut();
            let Some(g) = r.nodes.get_mut(target) else {
                return;
            };
            if g.phase == Phase::Disposed {
                return;
            }
            if g.value != value {
                g.value = value;
                let parent = g.parent;
                r.touched.push(target);
                if let Some(p) = parent {
                    mark_subs_dirty(&mut r, p);
                }
            }
        }
    }
}

/// Marks `id` as needing a re-publish because a child's output changed.
pub(crate) fn mark_subs_dirty(r: &mut Runtime, id: GovernorId) {
    let Some(g) = r.nodes.get_mut(id) else {
        return;
    };
    if g.phase == Phase::Disposed {
        return;
    }
    g.dirty |= Dirty::SUBS;
    let depth = g.depth;
    r.dirty.insert((Reverse(depth), id));
}
