//! The supervisor core: a single-threaded, readiness-driven event loop that
//! accepts connections, forks a worker per connection, and relays each
//! worker's stderr back to the supervisor's own stdout, line by line and
//! tagged by pid.
//!
//! This crate knows nothing about address families or command-line syntax;
//! it consumes a [`listener::ListenerProvider`] and a [`launcher::Launcher`]
//! and drives them through [`supervisor::Supervisor`].

pub mod demux;
pub mod driver;
pub mod error;
pub mod fdutil;
pub mod launcher;
pub mod listener;
pub mod reaper;
pub mod supervisor;
pub mod worker;

pub use error::SupervisorError;
pub use launcher::Launcher;
pub use listener::ListenerProvider;
pub use supervisor::{compute_mproc, ResumeOutcome, Supervisor};
