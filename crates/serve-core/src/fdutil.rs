//! Nonblocking / close-on-exec descriptor helpers.
//!
//! The one thing worth getting wrong here is the pipe: its read end stays
//! blocking (it is only ever touched after `poll(2)` says it is readable),
//! while its write end is nonblocking so a child flushing stderr can never
//! stall on a slow supervisor. A plain `pipe2(O_NONBLOCK)` would make both
//! ends nonblocking and is the wrong primitive.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockProtocol, SockType};
use nix::unistd::pipe;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Sets `O_NONBLOCK` on an already-open fd. Used for fds that could not be
/// created with the flag atomically (the pipe write end).
pub fn make_nonblocking(fd: RawFd) -> Result<(), Errno> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Creates a pipe whose write end is nonblocking and whose read end is left
/// blocking. On failure after a successful `pipe()`, both ends are closed
/// and the original errno is returned rather than whatever `close` produces.
pub fn nb_half_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    let (read_end, write_end) = pipe()?;
    if let Err(err) = make_nonblocking(write_end.as_raw_fd()) {
        drop(read_end);
        drop(write_end);
        return Err(err);
    }
    Ok((read_end, write_end))
}

/// Creates a socket that is both nonblocking and close-on-exec, using the
/// atomic `SOCK_NONBLOCK | SOCK_CLOEXEC` creation flags. Every POSIX 2017
/// target this crate supports (Linux, modern BSDs) accepts these flags
/// directly at `socket(2)`, so there is no fallback path that sets the fd
/// flags after the fact.
pub fn qualified_socket(
    domain: AddressFamily,
    ty: SockType,
    proto: impl Into<Option<SockProtocol>>,
) -> Result<OwnedFd, Errno> {
    socket(
        domain,
        ty,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        proto,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::OFlag;
    use nix::sys::socket::SockProtocol;

    #[test]
    fn half_pipe_is_asymmetric() {
        let (read_end, write_end) = nb_half_pipe().unwrap();
        let write_flags = fcntl(write_end.as_raw_fd(), FcntlArg::F_GETFL).unwrap();
        let read_flags = fcntl(read_end.as_raw_fd(), FcntlArg::F_GETFL).unwrap();
        assert!(OFlag::from_bits_truncate(write_flags).contains(OFlag::O_NONBLOCK));
        assert!(!OFlag::from_bits_truncate(read_flags).contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn socket_is_nonblocking_and_cloexec() {
        let fd = qualified_socket(AddressFamily::Inet, SockType::Stream, SockProtocol::Tcp).unwrap();
        let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).unwrap();
        assert!(OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK));
        let fd_flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
        assert!(nix::fcntl::FdFlag::from_bits_truncate(fd_flags).contains(nix::fcntl::FdFlag::FD_CLOEXEC));
    }
}
