use std::rc::Rc;

use tiller_core::*;

/// One editable form field: holds its own value, republishes a `change`
/// action and a validation error.
struct Field {
    validate: Rc<dyn Fn(&Value) -> Value>,
}

impl Component for Field {
    fn initial_state(&self, props: &Value) -> Value {
        props.get("default_value").cloned().unwrap_or_default()
    }

    fn publish(&self, cx: &Cx) -> Value {
        Value::record([
            ("value", cx.state().clone()),
            ("error", (self.validate)(cx.state())),
            ("change", cx.action("change")),
        ])
    }

    fn receive(&self, cx: &mut EventCx<'_>, event: &str, payload: Value) {
        if event == "change" {
            cx.set_state(payload);
        }
    }
}

/// The signup form: two fields combined into one value, with a `change`
/// action that fans out to the fields.
struct Signup;

impl Component for Signup {
    fn subscribe(&self, cx: &Cx) -> Option<Value> {
        let defaults = cx.props().get("defaults").cloned().unwrap_or_default();
        let field = |key: &str, validate: Rc<dyn Fn(&Value) -> Value>| {
            Value::from(component(
                Field { validate },
                Value::record([("default_value", defaults.get(key).cloned().unwrap_or_default())]),
            ))
        };
        Some(Value::record([
            (
                "name",
                field(
                    "name",
                    Rc::new(|v: &Value| {
                        if v.as_str().is_none_or(str::is_empty) {
                            Value::from("name is required")
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
                            Value::from("not an e-mail address")
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
        let field_value = |key: &str| {
            subs.get(key)
                .and_then(|f| f.get("value"))
                .cloned()
                .unwrap_or_default()
        };
        let mut errors = Vec::new();
        for key in ["name", "email"] {
            if let Some(e) = subs.get(key).and_then(|f| f.get("error"))
                && !e.is_null()
            {
                errors.push(e.clone());
            }
        }
        Value::record([
            (
                "value",
                Value::record([("name", field_value("name")), ("email", field_value("email"))]),
            ),
            ("errors", Value::List(errors)),
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

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let form = instantiate(component(
        Signup,
        Value::record([("defaults", Value::record([("name", "Ada")]))]),
    ));

    // A derived store: just the error list, recomputed per commit.
    let errors = instantiate(form.map(|v| v.get("errors").cloned().unwrap_or_default()));

    let _watch = form.subscribe(|v| {
        log::info!("form committed");
        println!("form  -> {:?}", v.get("value").unwrap_or(&Value::Null));
    })?;
    let _watch_errors = errors.subscribe(|v| {
        println!("check -> {v:?}");
    })?;

    println!("start -> {:?}", form.get()?.get("value").unwrap_or(&Value::Null));
    println!("check -> {:?}", errors.get()?);

    let change = form
        .get()?
        .get("change")
        .and_then(Value::as_action)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("form did not publish a change action"))?;

    // Each invoke is one transaction: the fields update, the form
    // republishes, and each subscriber hears exactly once.
    change.invoke(Value::record([("email", "ada@lovelace.dev")]));
    change.invoke(Value::record([("name", "Ada Lovelace"), ("email", "ada@analytical.engine")]));

    errors.dispose();
    form.dispose();
    Ok(())
}
