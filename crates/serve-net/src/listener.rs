//! Production [`ListenerProvider`]: binds a socket for one of the address
//! families the grammar in [`crate::address`] recognizes, and knows how to
//! turn an accepted connection's peer into the `REMOTE` string a worker
//! sees.

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::sys::socket::{
    bind, AddressFamily, Backlog, SockFlag, SockProtocol, SockaddrIn, SockaddrIn6, UnixAddr,
};
use serve_core::fdutil::qualified_socket;
use serve_core::ListenerProvider;
use std::net::SocketAddrV4;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use crate::address::Address;

/// `-t`: the socket type the listener is created with. `-p` (protocol) is
/// accepted by the CLI but never changes this — see `serve::cli`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Dgram,
    SeqPacket,
}

impl SocketKind {
    pub fn parse(s: &str) -> Result<SocketKind> {
        match s {
            "stream" => Ok(SocketKind::Stream),
            "dgram" => Ok(SocketKind::Dgram),
            "seqpacket" => Ok(SocketKind::SeqPacket),
            other => Err(anyhow!("unknown socket type {other:?}")),
        }
    }

    fn to_nix(self) -> nix::sys::socket::SockType {
        match self {
            SocketKind::Stream => nix::sys::socket::SockType::Stream,
            SocketKind::Dgram => nix::sys::socket::SockType::Datagram,
            SocketKind::SeqPacket => nix::sys::socket::SockType::SeqPacket,
        }
    }
}

impl Default for SocketKind {
    fn default() -> Self {
        SocketKind::Stream
    }
}

/// What `accept_remote` should report back as `REMOTE` for connections on
/// this listener. Carries the listener's own configured value for families
/// (Unix, X.25) where the peer side has no useful address of its own.
enum RemoteKind {
    Inet,
    Inet6,
    Configured(String),
}

pub struct Listener {
    fd: OwnedFd,
    remote: RemoteKind,
}

impl Listener {
    /// Binds, marks listening, and wires up the nonblocking/close-on-exec
    /// socket for `addr`. `backlog` is assumed already clamped to
    /// `[0, SOMAXCONN]` by the caller (`serve::cli`).
    pub fn bind(addr: &Address, backlog: i32, ty: SocketKind) -> Result<Listener> {
        let (fd, remote) = match addr {
            Address::Inet(ip, port) => {
                let fd = qualified_socket(AddressFamily::Inet, ty.to_nix(), SockProtocol::Tcp)
                    .context("creating inet socket")?;
                let sockaddr = SockaddrIn::from(SocketAddrV4::new(*ip, *port));
                bind(fd.as_raw_fd(), &sockaddr).context("binding inet socket")?;
                (fd, RemoteKind::Inet)
            }
            Address::Inet6(ip, port) => {
                let fd = qualified_socket(AddressFamily::Inet6, ty.to_nix(), SockProtocol::Tcp)
                    .context("creating inet6 socket")?;
                let sockaddr = SockaddrIn6::from(std::net::SocketAddrV6::new(*ip, *port, 0, 0));
                bind(fd.as_raw_fd(), &sockaddr).context("binding inet6 socket")?;
                (fd, RemoteKind::Inet6)
            }
            Address::Unix(path) => {
                // A stale socket file from a previous run's unclean exit
                // would otherwise make bind fail with EADDRINUSE.
                let _ = std::fs::remove_file(path);
                let fd = qualified_socket(AddressFamily::Unix, ty.to_nix(), None)
                    .context("creating unix socket")?;
                let sockaddr = UnixAddr::new(path.as_str()).context("unix path invalid")?;
                bind(fd.as_raw_fd(), &sockaddr).context("binding unix socket")?;
                (fd, RemoteKind::Configured(path.clone()))
            }
            Address::Vsock { cid, port } => {
                let fd = qualified_socket(AddressFamily::Vsock, ty.to_nix(), None)
                    .context("creating vsock socket")?;
                let sockaddr = nix::sys::socket::VsockAddr::new(*cid, *port);
                bind(fd.as_raw_fd(), &sockaddr).context("binding vsock socket")?;
                (fd, RemoteKind::Configured(format!("{port} {cid}")))
            }
            Address::X25(_) => {
                return Err(anyhow!(
                    "x25 has no sockaddr support on this platform; the grammar accepts it for completeness but binding is not implemented"
                ))
            }
        };

        let backlog = Backlog::new(backlog).context("invalid backlog")?;
        nix::sys::socket::listen(&fd, backlog).context("listen")?;

        Ok(Listener { fd, remote })
    }
}

impl ListenerProvider for Listener {
    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    fn accept_remote(&self) -> Result<(OwnedFd, String), Errno> {
        // The connection is handed to the worker raw over its stdin/stdout
        // (dup2'd in `supervisor::add_worker`); O_NONBLOCK is a property of
        // the open file description, not the fd, so accepting nonblocking
        // here would leak into the worker's stdio across the dup2.
        let conn = nix::sys::socket::accept4(self.fd.as_raw_fd(), SockFlag::SOCK_CLOEXEC)?;
        let conn = unsafe { OwnedFd::from_raw_fd(conn) };

        let remote_str = match &self.remote {
            RemoteKind::Configured(s) => s.clone(),
            RemoteKind::Inet => {
                let addr: SockaddrIn = nix::sys::socket::getpeername(conn.as_raw_fd())?;
                format!("{} {}", addr.ip(), addr.port())
            }
            RemoteKind::Inet6 => {
                let addr: SockaddrIn6 = nix::sys::socket::getpeername(conn.as_raw_fd())?;
                format!("{} {}", addr.ip(), addr.port())
            }
        };

        Ok((conn, remote_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpStream};
    use std::time::Duration;

    #[test]
    fn binds_and_accepts_inet_loopback() {
        let addr = Address::Inet(Ipv4Addr::LOCALHOST, 0);
        let listener = Listener::bind(&addr, 16, SocketKind::Stream).unwrap();
        let bound: SockaddrIn = nix::sys::socket::getsockname(listener.fd.as_raw_fd()).unwrap();
        let port = bound.port();

        let client = std::thread::spawn(move || TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap());

        let (conn, remote) = loop {
            match listener.accept_remote() {
                Ok(pair) => break pair,
                Err(Errno::EAGAIN) => std::thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("accept failed: {e}"),
            }
        };
        client.join().unwrap();
        assert!(remote.starts_with("127.0.0.1 "));
        drop(conn);
    }

    #[test]
    fn rejects_x25_bind() {
        let addr = Address::X25("123".to_string());
        assert!(Listener::bind(&addr, 16, SocketKind::Stream).is_err());
    }

    #[test]
    fn binds_unix_socket_and_creates_path() {
        let path = format!("/tmp/serve-net-test-{}-{}.sock", std::process::id(), line!());
        let addr = Address::Unix(path.clone());
        let listener = Listener::bind(&addr, 16, SocketKind::Stream).unwrap();
        assert!(std::path::Path::new(&path).exists());
        drop(listener);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn socket_kind_rejects_unknown() {
        assert!(SocketKind::parse("rdm").is_err());
        assert_eq!(SocketKind::parse("dgram").unwrap(), SocketKind::Dgram);
    }
}
