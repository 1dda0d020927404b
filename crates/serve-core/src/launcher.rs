//! The contract the event loop consumes for starting a worker's program.
//! `serve`'s `launcher` module provides the production implementation
//! (`sh -c <command>`); this crate only needs to know that the call never
//! returns.

/// Executes the worker's program. Must only be called in the forked child,
/// after its stdio has been wired to the connection and its stderr pipe.
/// If the underlying exec primitive fails, implementations must not return
/// to the caller — they should report the failure and terminate the
/// process themselves.
pub trait Launcher {
    fn exec_in_child(&self) -> !;
}
