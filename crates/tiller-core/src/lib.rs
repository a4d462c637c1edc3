//! # Governors, Stores, and Transactions
//!
//! Tiller turns a declarative node tree into a live dataflow: components
//! declare, via a `subscribe`/`publish` lifecycle, how an output value is
//! derived from props, internal state, and the outputs of nested
//! subscriptions. The runtime keeps every instance consistent as inputs
//! change and exposes the root's output as a [`Store`] with transactional
//! update semantics. There are three main pieces:
//!
//! - node constructors — `combine`, `combine_array`, `map`, `flat_map`,
//!   `constant`, `subscribe`, plus user [`Component`]s.
//! - the governor tree — the live instances reconciled against each new
//!   node description, reusing keyed children and disposing vanished ones.
//! - [`Store`] — synchronous reads plus subscriptions that fire exactly
//!   once per committed transaction, never mid-update.
//!
//! ## A counter inside a combine
//!
//! ```rust
//! use tiller_core::*;
//!
//! struct Counter;
//!
//! impl Component for Counter {
//!     fn initial_state(&self, _props: &Value) -> Value {
//!         Value::Int(0)
//!     }
//!
//!     fn publish(&self, cx: &Cx) -> Value {
//!         Value::record([
//!             ("count", cx.state().clone()),
//!             ("increment", cx.action("increment")),
//!         ])
//!     }
//!
//!     fn receive(&self, cx: &mut EventCx<'_>, event: &str, _payload: Value) {
//!         if event == "increment" {
//!             cx.update_state(|s| *s = Value::Int(s.as_int().unwrap_or(0) + 1));
//!         }
//!     }
//! }
//!
//! let store = instantiate(combine([
//!     ("label", Value::from("clicks")),
//!     ("counter", component(Counter, ()).into()),
//! ]));
//!
//! let out = store.get().unwrap();
//! assert_eq!(
//!     out.get("counter").and_then(|c| c.get("count")),
//!     Some(&Value::Int(0)),
//! );
//!
//! let increment = out
//!     .get("counter")
//!     .and_then(|c| c.get("increment"))
//!     .and_then(Value::as_action)
//!     .cloned()
//!     .unwrap();
//! increment.invoke(());
//! assert_eq!(
//!     store.get().unwrap().get("counter").and_then(|c| c.get("count")),
//!     Some(&Value::Int(1)),
//! );
//! ```
//!
//! ## Transactions
//!
//! Every mutation entry point (an [`Action`] invocation, a root props
//! push, an upstream store commit) runs inside a transaction. Mutations
//! arriving while one is open (a hook calling `set_state`, an action
//! invoked from `receive`) fold into it; observers are notified exactly
//! once per outer transaction that changed the committed value, so they
//! never see a half-updated tree. One upstream commit feeding a
//! downstream tree through several `subscribe` nodes still folds into a
//! single downstream transaction.
//!
//! ## Ownership
//!
//! A governor owns its children exclusively; disposal walks depth-first
//! and releases upstream subscriptions synchronously, so a disposed
//! subtree can never be poked by a late notification. A tree stays alive
//! as long as some [`Store`] handle (or a subscribing downstream tree)
//! holds it; `Store::dispose` tears it down eagerly.

pub mod component;
pub mod element;
pub mod error;
pub mod normalize;
pub mod prelude;
pub mod store;
pub mod tests;
pub mod value;

mod governor;
mod reconcile;
mod runtime;

pub use component::*;
pub use element::*;
pub use error::*;
pub use normalize::*;
pub use prelude::*;
pub use store::*;
pub use value::*;
