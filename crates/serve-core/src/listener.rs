//! The contract the event loop consumes from whatever supplies the listening
//! socket. `serve-net` provides the production implementation (address
//! parsing, socket families); tests substitute a fake.

use nix::errno::Errno;
use std::os::fd::{BorrowedFd, OwnedFd};

pub trait ListenerProvider {
    /// The listener's fd, borrowed for use in a `poll(2)` set.
    fn poll_fd(&self) -> BorrowedFd<'_>;

    /// Accepts one connection. On success returns the connection fd and a
    /// family-specific remote-address string (the `REMOTE` value). On
    /// failure returns the raw errno with no cleanup required by the
    /// caller.
    fn accept_remote(&self) -> Result<(OwnedFd, String), Errno>;
}

/// Pure, branch-free classification of an `accept(2)` failure: `true` if the
/// loop should treat it as transient (survive, count as progress so the
/// driver doesn't sleep) rather than propagating it as a fatal iteration
/// error.
pub fn is_transient_accept_error(errno: Errno) -> bool {
    matches!(errno, Errno::ECONNABORTED | Errno::EINTR | Errno::EMFILE)
}
