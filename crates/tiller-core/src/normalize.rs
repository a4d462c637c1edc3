use crate::element::{Element, combine, combine_array, constant, subscribe};
use crate::value::Value;

/// Canonicalizes one node description into an element.
///
/// Records and lists are treated as implicit `combine` / `combine_array`
/// elements whose children are their entries; a live store passes through
/// as a `subscribe` element; an element passes through unchanged; any
/// other value becomes a `constant`. Total and idempotent: normalizing
/// an already-normalized node yields an identical shape. One level only;
/// the children of an implicit combine are normalized when the combine
/// itself reconciles them.
pub fn normalize(node: &Value) -> Element {
    match node {
        Value::Element(e) => e.clone(),
        Value::Store(s) => subscribe(s),
        Value::Record(map) => combine(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
        Value::List(items) => combine_array(items.iter().cloned()),
        other => constant(other.clone()),
    }
}
