use thiserror::Error;

/// Errors surfaced by the store API.
///
/// User lifecycle hooks are infallible by signature; a panic inside one
/// unwinds to the external caller before anything is committed, so these
/// variants cover only engine-detected misuse.
#[derive(Debug, Error)]
pub enum TillerError {
    /// The store (or its whole tree) has already been torn down.
    #[error("store has been disposed")]
    Disposed,

    /// A node was handed to an operation that cannot accept its shape,
    /// e.g. a root props push onto a non-component root.
    #[error("node shape not usable here: {0}")]
    Shape(String),

    /// An operation ran outside the lifecycle window that allows it.
    #[error("lifecycle not ready: {0}")]
    LifecycleOrder(&'static str),
}
