//! The event loop: one call to [`Supervisor::resume`] is one iteration of
//! reap, poll, accept, forward. This is the only place all five concerns —
//! accept, fork/exec, pipe I/O, child reaping, and descriptor lifetime —
//! have to interleave correctly.

use crate::error::SupervisorError;
use crate::launcher::Launcher;
use crate::listener::{is_transient_accept_error, ListenerProvider};
use crate::worker::WorkerTable;
use crate::{demux, fdutil, reaper};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{close, dup2, fork, ForkResult, Pid};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// Result of one `resume()` call. `None` licenses the driver to yield the
/// scheduler; `Some` means at least one unit of progress happened (a line
/// emitted, a connection accepted, a child reaped); `Error` is fatal to
/// this iteration only — the driver reports it and keeps going.
pub enum ResumeOutcome {
    None,
    Some,
    Error(SupervisorError),
}

const POLL_AT_CAP_TIMEOUT_MS: u16 = 50;

pub struct Supervisor<P, L> {
    provider: P,
    launcher: L,
    workers: WorkerTable,
    mproc: usize,
}

/// `min(requested, _SC_OPEN_MAX - 2)`, the two reserved descriptors being
/// the listener and whichever standard stream the supervisor itself still
/// needs.
pub fn compute_mproc(requested: usize) -> usize {
    let open_max = nix::unistd::sysconf(nix::unistd::SysconfVar::OPEN_MAX)
        .ok()
        .flatten()
        .unwrap_or(1024) as usize;
    requested.min(open_max.saturating_sub(2))
}

impl<P: ListenerProvider, L: Launcher> Supervisor<P, L> {
    pub fn new(provider: P, launcher: L, mproc: usize) -> Self {
        Supervisor {
            provider,
            launcher,
            workers: WorkerTable::new(),
            mproc,
        }
    }

    pub fn nproc(&self) -> usize {
        self.workers.nproc()
    }

    /// One iteration: reap, poll, accept, forward stderr.
    pub fn resume(&mut self) -> ResumeOutcome {
        let mut progress = false;

        let reaped = reaper::reap_sweep(&mut self.workers, |pid, residual| {
            eprintln!("{pid}: {}", String::from_utf8_lossy(residual));
        });
        if !reaped.is_empty() {
            progress = true;
            for r in reaped {
                println!("Process {} exited ({})", r.pid, r.status);
            }
        }

        // Poll descriptors are built from raw fd numbers rather than
        // `PollFd::new(owned.as_fd(), ...)` directly: a `PollFd` borrows its
        // fd for the call's lifetime, and that borrow would otherwise span
        // the `&mut self.workers` accesses needed below to dispatch
        // readiness back to each worker. The fds themselves stay open for
        // the duration (owned by `self.provider`/`self.workers`), so
        // borrowing them unsafely just for the `poll(2)` call is sound.
        let include_listener = self.workers.nproc() < self.mproc;
        let listener_raw: RawFd = self.provider.poll_fd().as_raw_fd();
        let worker_raw_fds: Vec<RawFd> =
            self.workers.iter().map(|w| w.pipe_read.as_raw_fd()).collect();

        let mut fds: Vec<PollFd> = Vec::with_capacity(1 + worker_raw_fds.len());
        if include_listener {
            fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(listener_raw) },
                PollFlags::POLLIN,
            ));
        }
        for raw in &worker_raw_fds {
            fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(*raw) },
                PollFlags::POLLIN,
            ));
        }

        let poll_result = if include_listener {
            poll(&mut fds, nix::poll::PollTimeout::NONE)
        } else {
            poll(&mut fds, POLL_AT_CAP_TIMEOUT_MS)
        };

        if let Err(err) = poll_result {
            if err == Errno::EINTR {
                return ResumeOutcome::None;
            }
            return ResumeOutcome::Error(SupervisorError::Poll(err));
        }

        let worker_fds_start = if include_listener { 1 } else { 0 };

        if include_listener {
            let listener_readable = fds[0]
                .revents()
                .map(|r| r.contains(PollFlags::POLLIN))
                .unwrap_or(false);
            if listener_readable {
                match self.provider.accept_remote() {
                    Ok((sock, remote)) => {
                        if let Err(err) = self.add_worker(sock, remote) {
                            return ResumeOutcome::Error(SupervisorError::AddWorker(err));
                        }
                        progress = true;
                    }
                    Err(err) if is_transient_accept_error(err) => {
                        progress = true;
                    }
                    Err(err) => return ResumeOutcome::Error(SupervisorError::Accept(err)),
                }
            }
        }

        for (i, pfd) in fds[worker_fds_start..].iter().enumerate() {
            let Some(revents) = pfd.revents() else {
                continue;
            };
            if revents.contains(PollFlags::POLLERR) {
                if let Some(w) = self.workers.get_mut(i) {
                    eprintln!("{}: stderr pipe error", w.pid);
                }
                continue;
            }
            if revents.contains(PollFlags::POLLIN) {
                if let Some(w) = self.workers.get_mut(i) {
                    let pid = w.pid;
                    match demux::pump(w, |line| {
                        println!("{pid}: {}", String::from_utf8_lossy(line));
                    }) {
                        Ok(result) => {
                            if result.lines_emitted > 0 {
                                progress = true;
                            }
                        }
                        Err(err) => {
                            eprintln!("{pid}: {err}");
                        }
                    }
                }
            }
        }

        if progress {
            ResumeOutcome::Some
        } else {
            ResumeOutcome::None
        }
    }

    /// The fork dance: wires a fresh half-nonblocking pipe for stderr, forks,
    /// and in the child dup2's the connection socket onto stdin/stdout and
    /// the pipe's write end onto stderr before handing off to the launcher.
    fn add_worker(&mut self, sock: OwnedFd, remote: String) -> Result<(), Errno> {
        let (pipe_read, pipe_write) = fdutil::nb_half_pipe()?;
        self.workers.ensure_capacity();

        match unsafe { fork() }? {
            ForkResult::Child => {
                // Every fd this child doesn't need must be closed before
                // exec: these pipe read ends and the listener aren't
                // close-on-exec (plain `pipe(2)`), and the child process
                // replaces this one, so nothing else will ever close them.
                for w in self.workers.iter() {
                    let _ = close(w.pipe_read.as_raw_fd());
                }
                let _ = close(self.provider.poll_fd().as_raw_fd());

                std::env::set_var("REMOTE", &remote);

                let dup_failed = dup2(sock.as_raw_fd(), 0).is_err()
                    || dup2(sock.as_raw_fd(), 1).is_err()
                    || dup2(pipe_write.as_raw_fd(), 2).is_err();
                if dup_failed {
                    eprintln!("serve: failed to wire worker stdio");
                    std::process::exit(1);
                }
                drop(sock);
                drop(pipe_read);
                drop(pipe_write);

                self.launcher.exec_in_child();
            }
            ForkResult::Parent { child } => {
                drop(pipe_write);
                self.workers.append(child, pipe_read, &remote);
                drop(sock);
                Ok(())
            }
        }
    }
}

impl<P, L> Supervisor<P, L> {
    /// Pid of every still-live worker, for tests and diagnostics.
    pub fn worker_pids(&self) -> Vec<Pid> {
        self.workers.iter().map(|w| w.pid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerProvider;
    use nix::sys::socket::{
        accept, bind, connect, listen, socket, AddressFamily, Backlog, SockFlag, SockType,
        SockaddrIn,
    };
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::os::fd::{AsFd, FromRawFd};

    /// A loopback TCP listener, built directly with `nix` (not `serve-net`,
    /// to keep this crate's dev-dependencies from cycling back through a
    /// crate that itself depends on it).
    struct LoopbackProvider {
        fd: OwnedFd,
    }

    impl LoopbackProvider {
        fn bind() -> (Self, u16) {
            let fd = fdutil::qualified_socket(AddressFamily::Inet, SockType::Stream, None).unwrap();
            let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
            bind(fd.as_raw_fd(), &addr).unwrap();
            listen(&fd, Backlog::new(16).unwrap()).unwrap();
            let bound: SockaddrIn = nix::sys::socket::getsockname(fd.as_raw_fd()).unwrap();
            (LoopbackProvider { fd }, bound.port())
        }
    }

    impl ListenerProvider for LoopbackProvider {
        fn poll_fd(&self) -> BorrowedFd<'_> {
            self.fd.as_fd()
        }

        fn accept_remote(&self) -> Result<(OwnedFd, String), Errno> {
            let raw = accept(self.fd.as_raw_fd())?;
            let conn = unsafe { OwnedFd::from_raw_fd(raw) };
            fdutil::make_nonblocking(conn.as_raw_fd())?;
            Ok((conn, "127.0.0.1 0".to_string()))
        }
    }

    struct EchoLauncher;

    impl Launcher for EchoLauncher {
        fn exec_in_child(&self) -> ! {
            let err = nix::unistd::execvp(
                &std::ffi::CString::new("sh").unwrap(),
                &[
                    std::ffi::CString::new("sh").unwrap(),
                    std::ffi::CString::new("-c").unwrap(),
                    std::ffi::CString::new("cat >/dev/null; printf 'done\\n' 1>&2").unwrap(),
                ],
            )
            .unwrap_err();
            eprintln!("exec failed: {err}");
            std::process::exit(127);
        }
    }

    #[test]
    fn accepts_forks_and_reports_a_new_worker() {
        let (provider, port) = LoopbackProvider::bind();
        let mut supervisor = Supervisor::new(provider, EchoLauncher, 4);

        let _client = std::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();

        let mut admitted = false;
        for _ in 0..200 {
            if let ResumeOutcome::Some = supervisor.resume() {
                if supervisor.nproc() == 1 {
                    admitted = true;
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(admitted, "expected exactly one worker to be admitted");
    }

    #[test]
    fn compute_mproc_reserves_two_descriptors() {
        let open_max = nix::unistd::sysconf(nix::unistd::SysconfVar::OPEN_MAX)
            .ok()
            .flatten()
            .unwrap_or(1024) as usize;
        assert_eq!(compute_mproc(usize::MAX), open_max - 2);
        assert_eq!(compute_mproc(1), 1);
    }
}
