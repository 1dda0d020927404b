//! Address parsing and listener construction. `serve-core` knows nothing
//! about address families; this crate is the production implementation of
//! its `ListenerProvider` contract.

pub mod address;
pub mod listener;

pub use address::Address;
pub use listener::{Listener, SocketKind};
