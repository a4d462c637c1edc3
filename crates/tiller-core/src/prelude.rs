pub use crate::component::{Component, Cx, EventCx, Snapshot};
pub use crate::element::{
    Element, Key, Transform, combine, combine_array, component, constant, flat_map, map, sfc,
    subscribe,
};
pub use crate::error::TillerError;
pub use crate::normalize::normalize;
pub use crate::store::{Store, Subscription, instantiate};
pub use crate::value::{Action, Value};
