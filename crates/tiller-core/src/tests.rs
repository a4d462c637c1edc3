#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use crate::element::{combine, combine_array, component, constant, flat_map, map, sfc};
    use crate::normalize::normalize;
    use crate::prelude::*;

    /// Counts notifications and keeps the last delivered value, like the
    /// observer a UI binding would attach.
    struct Harness {
        count: Rc<RefCell<usize>>,
        last: Rc<RefCell<Value>>,
        sub: Subscription,
    }

    fn watch(store: &Store) -> Harness {
        let count = Rc::new(RefCell::new(0usize));
        let last = Rc::new(RefCell::new(store.get().unwrap()));
        let sub = store
            .subscribe({
                let count = count.clone();
                let last = last.clone();
                move |v| {
                    *count.borrow_mut() += 1;
                    *last.borrow_mut() = v.clone();
                }
            })
            .unwrap();
        Harness { count, last, sub }
    }

    impl Harness {
        fn notifications(&self) -> usize {
            *self.count.borrow()
        }

        fn value(&self) -> Value {
            self.last.borrow().clone()
        }
    }

    fn action_at(value: &Value, path: &[&str]) -> Action {
        let null = Value::Null;
        let mut cur = value;
        for key in path {
            cur = cur.get(key).unwrap_or(&null);
        }
        cur.as_action().cloned().unwrap()
    }

    struct Counter;

    impl Component for Counter {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::Int(0)
        }

        fn publish(&self, cx: &Cx) -> Value {
            Value::record([
                ("count", cx.state().clone()),
                ("increment", cx.action("increment")),
                ("add2", cx.action("add2")),
            ])
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, _payload: Value) {
            match event {
                "increment" => {
                    cx.update_state(|s| *s = Value::Int(s.as_int().unwrap_or(0) + 1));
                }
                "add2" => {
                    // Two state writes in one event still settle as one
                    // publish and one notification.
                    cx.update_state(|s| *s = Value::Int(s.as_int().unwrap_or(0) + 1));
                    cx.update_state(|s| *s = Value::Int(s.as_int().unwrap_or(0) + 1));
                }
                _ => {}
            }
        }
    }

    fn increment(store: &Store, path: &[&str]) {
        let mut full = path.to_vec();
        full.push("increment");
        action_at(&store.get().unwrap(), &full).invoke(());
    }

    #[test]
    fn test_constant_combine_get() {
        let store = instantiate(combine([
            ("a", Value::from(constant(1))),
            ("b", Value::Int(2)),
        ]));
        assert_eq!(
            store.get().unwrap(),
            Value::record([("a", Value::Int(1)), ("b", Value::Int(2))]),
        );
    }

    #[test]
    fn test_normalize_idempotent() {
        let plain = normalize(&Value::Int(5));
        assert_eq!(plain, constant(5));
        assert_eq!(normalize(&Value::Element(plain.clone())), plain);

        let record = Value::record([("a", Value::Int(1)), ("b", Value::from("x"))]);
        let elem = normalize(&record);
        assert_eq!(normalize(&Value::Element(elem.clone())), elem);

        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let elem = normalize(&list);
        assert_eq!(normalize(&Value::Element(elem.clone())), elem);

        let store = instantiate(constant(1));
        let elem = normalize(&Value::Store(store.clone()));
        assert_eq!(elem, crate::element::subscribe(&store));
        assert_eq!(normalize(&Value::Element(elem.clone())), elem);
    }

    #[test]
    fn test_counter_in_combine() {
        let store = instantiate(combine([
            ("a", Value::from(constant(1))),
            ("b", component(Counter, ()).into()),
        ]));
        let harness = watch(&store);

        let out = store.get().unwrap();
        assert_eq!(out.get("a"), Some(&Value::Int(1)));
        assert_eq!(
            out.get("b").and_then(|b| b.get("count")),
            Some(&Value::Int(0)),
        );

        increment(&store, &["b"]);
        assert_eq!(
            store.get().unwrap().get("b").and_then(|b| b.get("count")),
            Some(&Value::Int(1)),
        );
        assert_eq!(harness.notifications(), 1);
        assert_eq!(
            harness.value().get("a"),
            Some(&Value::Int(1)),
            "untouched keys survive a sibling update",
        );
    }

    #[test]
    fn test_two_state_writes_one_notification() {
        let store = instantiate(component(Counter, ()));
        let harness = watch(&store);

        action_at(&store.get().unwrap(), &["increment"]).invoke(());
        assert_eq!(harness.notifications(), 1);

        // "add2" mutates state twice inside one receive.
        action_at(&store.get().unwrap(), &["add2"]).invoke(());
        assert_eq!(harness.notifications(), 2);
        assert_eq!(store.get().unwrap().get("count"), Some(&Value::Int(3)));
    }

    struct Bump;

    impl Component for Bump {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::Int(0)
        }

        fn subscribe(&self, cx: &Cx) -> Option<Value> {
            Some(
                combine([
                    ("counter", component(Counter, ())),
                    ("gen", constant(cx.state().clone())),
                ])
                .into(),
            )
        }

        fn publish(&self, cx: &Cx) -> Value {
            let mut out = cx.subs().as_record().cloned().unwrap_or_default();
            out.insert("bump".into(), cx.action("bump"));
            Value::Record(out)
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, _payload: Value) {
            if event == "bump" {
                cx.update_state(|s| *s = Value::Int(s.as_int().unwrap_or(0) + 1));
            }
        }
    }

    #[test]
    fn test_identity_preserved_across_resubscribe() {
        let store = instantiate(component(Bump, ()));

        increment(&store, &["counter"]);
        assert_eq!(
            store.get().unwrap().get("counter").and_then(|c| c.get("count")),
            Some(&Value::Int(1)),
        );

        // Re-subscribing with the same keys and types must reuse the
        // counter in place: its state survives.
        action_at(&store.get().unwrap(), &["bump"]).invoke(());
        let out = store.get().unwrap();
        assert_eq!(out.get("gen"), Some(&Value::Int(1)));
        assert_eq!(
            out.get("counter").and_then(|c| c.get("count")),
            Some(&Value::Int(1)),
            "counter state must not reset on parent re-subscribe",
        );
    }

    /// Shows or hides a keyed subtree, including a subscription to an
    /// external store.
    struct Gate {
        probe_drops: Rc<RefCell<usize>>,
        ext: Store,
    }

    impl Component for Gate {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::Bool(true)
        }

        fn subscribe(&self, cx: &Cx) -> Option<Value> {
            if cx.state().as_bool().unwrap_or(false) {
                Some(
                    combine([
                        (
                            "probe",
                            component(
                                Probe {
                                    drops: self.probe_drops.clone(),
                                },
                                (),
                            )
                            .into(),
                        ),
                        ("ext", Value::Store(self.ext.clone())),
                    ])
                    .into(),
                )
            } else {
                Some(combine([("still", Value::Int(1))]).into())
            }
        }

        fn publish(&self, cx: &Cx) -> Value {
            let mut out = cx.subs().as_record().cloned().unwrap_or_default();
            out.insert("hide".into(), cx.action("hide"));
            Value::Record(out)
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, _payload: Value) {
            if event == "hide" {
                cx.set_state(false);
            }
        }
    }

    struct Probe {
        drops: Rc<RefCell<usize>>,
    }

    impl Component for Probe {
        fn publish(&self, _cx: &Cx) -> Value {
            Value::from("alive")
        }

        fn will_dispose(&self, _cx: &Cx) {
            *self.drops.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_dispose_on_key_removal() {
        let ext = instantiate(component(Counter, ()));
        let drops = Rc::new(RefCell::new(0usize));
        let store = instantiate(component(
            Gate {
                probe_drops: drops.clone(),
                ext: ext.clone(),
            },
            (),
        ));
        let harness = watch(&store);

        assert_eq!(
            store.get().unwrap().get("probe"),
            Some(&Value::from("alive")),
        );

        action_at(&store.get().unwrap(), &["hide"]).invoke(());
        assert_eq!(*drops.borrow(), 1, "removed child disposed exactly once");
        assert_eq!(store.get().unwrap().get("still"), Some(&Value::Int(1)));
        assert_eq!(store.get().unwrap().get("ext"), None);

        // The released upstream subscription must no longer fire.
        let after_hide = harness.notifications();
        increment(&ext, &[]);
        assert_eq!(harness.notifications(), after_hide);
        assert_eq!(*drops.borrow(), 1);
    }

    struct Toggle;

    impl Component for Toggle {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::Bool(true)
        }

        fn publish(&self, cx: &Cx) -> Value {
            Value::record([
                ("use_a", cx.state().clone()),
                ("toggle", cx.action("toggle")),
            ])
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, _payload: Value) {
            if event == "toggle" {
                cx.update_state(|s| *s = Value::Bool(!s.as_bool().unwrap_or(false)));
            }
        }
    }

    #[test]
    fn test_flat_map_rerouting_between_stores() {
        let a = instantiate(component(Counter, ()));
        let b = instantiate(component(Counter, ()));
        let source = instantiate(component(Toggle, ()));

        let routed = instantiate(source.flat_map({
            let a = a.clone();
            let b = b.clone();
            move |v| {
                if v.get("use_a").and_then(Value::as_bool).unwrap_or(false) {
                    Value::Store(a.clone())
                } else {
                    Value::Store(b.clone())
                }
            }
        }));
        let harness = watch(&routed);

        assert_eq!(routed.get().unwrap(), a.get().unwrap());

        increment(&a, &[]);
        assert_eq!(
            routed.get().unwrap().get("count"),
            Some(&Value::Int(1)),
            "output tracks the routed store",
        );

        // Flip the route: output must equal B's value within the same
        // transaction, and A's subscription must be released.
        action_at(&source.get().unwrap(), &["toggle"]).invoke(());
        assert_eq!(routed.get().unwrap(), b.get().unwrap());

        let settled = harness.notifications();
        increment(&a, &[]);
        assert_eq!(routed.get().unwrap(), b.get().unwrap());
        assert_eq!(
            harness.notifications(),
            settled,
            "the old route must not feed the flat_map after re-routing",
        );

        increment(&b, &[]);
        assert_eq!(
            routed.get().unwrap().get("count"),
            Some(&Value::Int(1)),
        );
    }

    #[test]
    fn test_flat_map_rerouting_disposes_elements() {
        let drops = Rc::new(RefCell::new(0usize));
        let source = instantiate(component(Toggle, ()));

        let routed = instantiate(flat_map(source.clone(), {
            let drops = drops.clone();
            move |v| {
                if v.get("use_a").and_then(Value::as_bool).unwrap_or(false) {
                    component(Probe { drops: drops.clone() }, ()).into()
                } else {
                    constant(42).into()
                }
            }
        }));

        assert_eq!(routed.get().unwrap(), Value::from("alive"));
        assert_eq!(*drops.borrow(), 0);

        action_at(&source.get().unwrap(), &["toggle"]).invoke(());
        assert_eq!(routed.get().unwrap(), Value::Int(42));
        assert_eq!(*drops.borrow(), 1, "old target disposed on re-route");
    }

    #[test]
    fn test_no_glitch_diamond() {
        let source = instantiate(component(Counter, ()));
        let doubled = source.map(|v| {
            Value::Int(v.get("count").and_then(Value::as_int).unwrap_or(0) * 2)
        });
        let store = instantiate(combine([
            ("x", Value::Store(source.clone())),
            ("y", doubled.into()),
        ]));
        let harness = watch(&store);

        increment(&source, &[]);

        // One upstream commit reaches this tree through two links; both
        // must fold into a single downstream transaction.
        assert_eq!(harness.notifications(), 1);
        let out = harness.value();
        assert_eq!(out.get("x").and_then(|x| x.get("count")), Some(&Value::Int(1)));
        assert_eq!(out.get("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_map_does_not_flatten() {
        struct Test;
        impl Component for Test {
            fn publish(&self, cx: &Cx) -> Value {
                Value::record([("b", cx.props().get("a").cloned().unwrap_or_default())])
            }
        }

        let store = instantiate(map(
            component(Test, Value::record([("a", "test")])),
            |out| Value::record([("c", out.get("b").cloned().unwrap_or_default())]),
        ));
        assert_eq!(store.get().unwrap(), Value::record([("c", "test")]));

        // A transform that builds an element publishes the element itself.
        let store = instantiate(map(constant(1), |_| {
            combine([("x", Value::Int(1))]).into()
        }));
        assert!(matches!(store.get().unwrap(), Value::Element(_)));
    }

    #[test]
    fn test_store_map_through_stateless_component() {
        struct Inner;
        impl Component for Inner {
            fn publish(&self, _cx: &Cx) -> Value {
                Value::record([("name", "bob")])
            }
        }

        struct Outer;
        impl Component for Outer {
            fn subscribe(&self, _cx: &Cx) -> Option<Value> {
                Some(combine([("inner", component(Inner, ()))]).into())
            }
            fn publish(&self, cx: &Cx) -> Value {
                cx.subs().clone()
            }
        }

        let outer = instantiate(component(Outer, ()));
        let mapped = outer.map(|x| x.get("inner").cloned().unwrap_or_default());
        let flattened = instantiate(sfc(
            |props| props.get("children").cloned().unwrap_or_default(),
            Value::record([("children", mapped)]),
        ));
        assert_eq!(
            flattened.get().unwrap(),
            Value::record([("name", "bob")]),
        );
    }

    struct ListHolder;

    impl Component for ListHolder {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::Bool(false)
        }

        fn subscribe(&self, cx: &Cx) -> Option<Value> {
            let a = Value::from(component(Counter, ()).with_key("a"));
            let b = Value::from(component(Counter, ()).with_key("b"));
            let items = if cx.state().as_bool().unwrap_or(false) {
                vec![b, a]
            } else {
                vec![a, b]
            };
            Some(combine_array(items).into())
        }

        fn publish(&self, cx: &Cx) -> Value {
            Value::record([
                ("items", cx.subs().clone()),
                ("reverse", cx.action("reverse")),
            ])
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, _payload: Value) {
            if event == "reverse" {
                cx.update_state(|s| *s = Value::Bool(!s.as_bool().unwrap_or(false)));
            }
        }
    }

    #[test]
    fn test_keyed_array_state_follows_keys() {
        let store = instantiate(component(ListHolder, ()));

        // Increment the first item, which carries key "a".
        let first_inc = store
            .get()
            .unwrap()
            .get("items")
            .and_then(|l| l.at(0))
            .and_then(|c| c.get("increment"))
            .and_then(Value::as_action)
            .cloned()
            .unwrap();
        first_inc.invoke(());
        let items = store.get().unwrap().get("items").cloned().unwrap();
        assert_eq!(items.at(0).and_then(|c| c.get("count")), Some(&Value::Int(1)));
        assert_eq!(items.at(1).and_then(|c| c.get("count")), Some(&Value::Int(0)));

        action_at(&store.get().unwrap(), &["reverse"]).invoke(());
        let items = store.get().unwrap().get("items").cloned().unwrap();
        assert_eq!(
            items.at(0).and_then(|c| c.get("count")),
            Some(&Value::Int(0)),
            "key b moved to the front with its own state",
        );
        assert_eq!(
            items.at(1).and_then(|c| c.get("count")),
            Some(&Value::Int(1)),
            "key a kept its incremented state across the reorder",
        );
    }

    #[test]
    fn test_root_props_push() {
        struct Label;
        impl Component for Label {
            fn default_props(&self) -> Value {
                Value::record([("text", "default"), ("suffix", "!")])
            }
            fn publish(&self, cx: &Cx) -> Value {
                let text = cx.props().get("text").and_then(Value::as_str).unwrap_or("");
                let suffix = cx.props().get("suffix").and_then(Value::as_str).unwrap_or("");
                Value::from(format!("{text}{suffix}"))
            }
        }

        let store = instantiate(component(Label, Value::record([("text", "hi")])));
        let harness = watch(&store);
        assert_eq!(store.get().unwrap(), Value::from("hi!"));

        store.set_props(Value::record([("text", "yo")])).unwrap();
        assert_eq!(store.get().unwrap(), Value::from("yo!"));
        assert_eq!(harness.notifications(), 1);

        let plain = instantiate(combine([("a", Value::Int(1))]));
        assert!(matches!(
            plain.set_props(Value::Null),
            Err(TillerError::Shape(_)),
        ));
    }

    #[test]
    fn test_did_update_sees_previous_snapshot() {
        struct PrevProbe {
            seen: Rc<RefCell<Vec<Value>>>,
        }
        impl Component for PrevProbe {
            fn publish(&self, cx: &Cx) -> Value {
                cx.props().clone()
            }
            fn did_update(&self, _cx: &mut EventCx<'_>, prev: Snapshot) {
                self.seen.borrow_mut().push(prev.props);
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let store = instantiate(component(
            PrevProbe { seen: seen.clone() },
            Value::from("first"),
        ));
        store.set_props(Value::from("second")).unwrap();
        store.set_props(Value::from("third")).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![Value::from("first"), Value::from("second")],
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let store = instantiate(component(Counter, ()));
        let harness = watch(&store);

        increment(&store, &[]);
        assert_eq!(harness.notifications(), 1);

        harness.sub.unsubscribe();
        harness.sub.unsubscribe();

        increment(&store, &[]);
        assert_eq!(harness.notifications(), 1, "no delivery after unsubscribe");
    }

    #[test]
    fn test_dispose_semantics() {
        let store = instantiate(component(Counter, ()));
        let inc = action_at(&store.get().unwrap(), &["increment"]);

        store.dispose();
        store.dispose(); // idempotent

        assert!(matches!(store.get(), Err(TillerError::Disposed)));
        assert!(store.subscribe(|_| {}).is_err());

        // A late action on a disposed tree is discarded, not acted upon.
        inc.invoke(());
        assert!(matches!(store.get(), Err(TillerError::Disposed)));
    }

    #[test]
    fn test_dispose_tears_down_depth_first() {
        let drops = Rc::new(RefCell::new(0usize));
        let ext = instantiate(component(Counter, ()));
        let store = instantiate(component(
            Gate {
                probe_drops: drops.clone(),
                ext: ext.clone(),
            },
            (),
        ));

        store.dispose();
        assert_eq!(*drops.borrow(), 1);

        // The torn-down tree no longer observes the external store.
        increment(&ext, &[]);
        assert_eq!(
            ext.get().unwrap().get("count"),
            Some(&Value::Int(1)),
            "external store itself keeps working",
        );
    }

    // Port of the form model scenario: nested combines, actions that fan
    // out to child actions, and a data source wired in through flat_map.

    struct ModelPrimitive {
        validate: Option<Rc<dyn Fn(&Value) -> Value>>,
    }

    impl Component for ModelPrimitive {
        fn initial_state(&self, props: &Value) -> Value {
            Value::record([(
                "value",
                props.get("default_value").cloned().unwrap_or_default(),
            )])
        }

        fn publish(&self, cx: &Cx) -> Value {
            let value = cx.state().get("value").cloned().unwrap_or_default();
            let error = match &self.validate {
                Some(validate) => validate(&value),
                None => Value::Null,
            };
            Value::record([
                ("value", value),
                ("error", error),
                ("change", cx.action("change")),
            ])
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, payload: Value) {
            if event == "change" {
                cx.update_state(|state| {
                    if let Value::Record(map) = state {
                        map.insert("value".into(), payload);
                    }
                });
            }
        }
    }

    struct Model;

    impl Component for Model {
        fn default_props(&self) -> Value {
            Value::record([("default_value", Value::Record(BTreeMap::new()))])
        }

        fn subscribe(&self, cx: &Cx) -> Option<Value> {
            let defaults = cx
                .props()
                .get("default_value")
                .cloned()
                .unwrap_or_default();
            let field = |key: &str, validate: Rc<dyn Fn(&Value) -> Value>| {
                Value::from(component(
                    ModelPrimitive {
                        validate: Some(validate),
                    },
                    Value::record([(
                        "default_value",
                        defaults.get(key).cloned().unwrap_or_default(),
                    )]),
                ))
            };
            // A plain record is an implicit combine.
            Some(Value::record([
                (
                    "name",
                    field(
                        "name",
                        Rc::new(|v: &Value| {
                            if v.as_str().is_none_or(str::is_empty) {
                                Value::from("Please enter your name")
                            } else {
                                Value::Null
                            }
                        }),
                    ),
                ),
                (
                    "email",
                    field(
                        "email",
                        Rc::new(|v: &Value| {
                            if v.as_str().is_none_or(|s| !s.contains('@')) {
                                Value::from("Please enter an e-mail address")
                            } else {
                                Value::Null
                            }
                        }),
                    ),
                ),
            ]))
        }

        fn publish(&self, cx: &Cx) -> Value {
            let subs = cx.subs();
            let mut error = BTreeMap::new();
            for key in ["name", "email"] {
                if let Some(e) = subs.get(key).and_then(|f| f.get("error"))
                    && !e.is_null()
                {
                    error.insert(key.to_owned(), e.clone());
                }
            }
            let value = Value::record([
                (
                    "name",
                    subs.get("name").and_then(|f| f.get("value")).cloned().unwrap_or_default(),
                ),
                (
                    "email",
                    subs.get("email").and_then(|f| f.get("value")).cloned().unwrap_or_default(),
                ),
            ]);
            Value::record([
                ("children", subs.clone()),
                ("value", value),
                (
                    "error",
                    if error.is_empty() {
                        Value::Null
                    } else {
                        Value::Record(error)
                    },
                ),
                ("change", cx.action("change")),
            ])
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, payload: Value) {
            if event == "change" {
                let subs = cx.subs();
                for key in ["name", "email"] {
                    if let Some(v) = payload.get(key)
                        && let Some(change) = subs
                            .get(key)
                            .and_then(|f| f.get("change"))
                            .and_then(Value::as_action)
                    {
                        change.invoke(v.clone());
                    }
                }
            }
        }
    }

    #[test]
    fn test_model_initial_value_and_validation() {
        let store = instantiate(component(
            Model,
            Value::record([(
                "default_value",
                Value::record([("name", "James"), ("email", "james")]),
            )]),
        ));

        let out = store.get().unwrap();
        assert_eq!(
            out.get("value"),
            Some(&Value::record([("name", "James"), ("email", "james")])),
        );
        assert!(
            out.get("error")
                .and_then(|e| e.get("email"))
                .is_some(),
            "invalid email must surface an error",
        );
    }

    #[test]
    fn test_model_change_folds_into_one_notification() {
        let store = instantiate(component(
            Model,
            Value::record([(
                "default_value",
                Value::record([("name", "James"), ("email", "james")]),
            )]),
        ));
        let harness = watch(&store);

        action_at(&store.get().unwrap(), &["change"])
            .invoke(Value::record([("email", "james@jamesknelson.com")]));

        assert_eq!(harness.notifications(), 1);
        let out = harness.value();
        assert_eq!(out.get("error"), Some(&Value::Null));
        assert_eq!(
            out.get("value"),
            Some(&Value::record([
                ("name", "James"),
                ("email", "james@jamesknelson.com"),
            ])),
        );
    }

    struct DataSource;

    impl Component for DataSource {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::Null
        }

        fn subscribe(&self, cx: &Cx) -> Option<Value> {
            match cx.state() {
                Value::Null => None,
                node => Some(node.clone()),
            }
        }

        fn publish(&self, cx: &Cx) -> Value {
            Value::record([
                ("receive", cx.action("receive")),
                ("data", cx.subs().clone()),
            ])
        }

        fn receive(&self, cx: &mut EventCx<'_>, event: &str, payload: Value) {
            if event == "receive" {
                cx.set_state(payload);
            }
        }
    }

    fn data_source_data(source: &Store) -> Element {
        sfc(
            |props| match props.get("source") {
                Some(Value::Store(s)) => {
                    flat_map(s.clone(), |state| {
                        state.get("data").cloned().unwrap_or_default()
                    })
                    .into()
                }
                _ => Value::Null,
            },
            Value::record([("source", source.clone())]),
        )
    }

    struct FormController;

    impl FormController {
        fn receive_data_if_available(cx: &mut EventCx<'_>) {
            let awaiting = cx
                .state()
                .get("awaiting")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !awaiting {
                return;
            }
            let subs = cx.subs();
            let data = subs.get("data").cloned().unwrap_or_default();
            let nonempty = data.as_record().map(|m| !m.is_empty()).unwrap_or(false);
            if nonempty {
                cx.update_state(|s| {
                    if let Value::Record(m) = s {
                        m.insert("awaiting".into(), Value::Bool(false));
                    }
                });
                if let Some(change) = subs
                    .get("model")
                    .and_then(|m| m.get("change"))
                    .and_then(Value::as_action)
                {
                    change.invoke(data);
                }
            }
        }
    }

    impl Component for FormController {
        fn initial_state(&self, _props: &Value) -> Value {
            Value::record([("awaiting", true)])
        }

        fn subscribe(&self, cx: &Cx) -> Option<Value> {
            Some(
                combine([
                    ("data", cx.props().get("data").cloned().unwrap_or_default()),
                    ("model", component(Model, ()).into()),
                ])
                .into(),
            )
        }

        fn publish(&self, cx: &Cx) -> Value {
            cx.subs().clone()
        }

        fn did_instantiate(&self, cx: &mut EventCx<'_>) {
            Self::receive_data_if_available(cx);
        }

        fn did_update(&self, cx: &mut EventCx<'_>, _prev: Snapshot) {
            Self::receive_data_if_available(cx);
        }
    }

    #[test]
    fn test_form_controller_starts_empty() {
        struct Empty;
        impl Component for Empty {
            fn publish(&self, _cx: &Cx) -> Value {
                Value::Null
            }
        }

        let data = instantiate(component(Empty, ()));
        let store = instantiate(component(
            FormController,
            Value::record([("data", data.clone())]),
        ));

        let out = store.get().unwrap();
        assert_eq!(out.get("data"), Some(&Value::Null));
        assert!(
            out.get("model")
                .and_then(|m| m.get("error"))
                .and_then(|e| e.get("email"))
                .is_some(),
        );
    }

    #[test]
    fn test_form_controller_receives_data_through_flat_map() {
        let data_source = instantiate(component(DataSource, ()));
        let data = instantiate(data_source_data(&data_source));
        let store = instantiate(component(
            FormController,
            Value::record([("data", data.clone())]),
        ));
        let harness = watch(&store);

        let received = Value::record([
            ("name", "James"),
            ("email", "james@jamesknelson.com"),
        ]);
        action_at(&data_source.get().unwrap(), &["receive"]).invoke(received.clone());

        assert_eq!(harness.notifications(), 1);
        let out = harness.value();
        assert_eq!(out.get("data"), Some(&received));
        assert_eq!(
            out.get("model").and_then(|m| m.get("error")),
            Some(&Value::Null),
        );
        assert_eq!(
            out.get("model").and_then(|m| m.get("value")),
            Some(&received),
        );
    }
}
