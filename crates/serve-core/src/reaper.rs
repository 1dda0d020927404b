//! Nonblocking child reaping. Walks the worker table in ascending index
//! order, reaping any worker whose child has exited, flushing its residual
//! (unterminated) stderr to the supervisor's own stderr, and compacting the
//! table with swap-with-last removal.
//!
//! Because removal swaps in the last live worker, the occupant of a freed
//! slot must be re-examined before the sweep advances — it hasn't been
//! checked yet this pass.

use crate::worker::WorkerTable;
use libc::{c_int, pid_t, WNOHANG};
use nix::unistd::Pid;

/// One worker was reaped this sweep.
pub struct Reaped {
    pub pid: Pid,
    pub status: c_int,
}

/// Repeatedly calls `waitpid(pid, WNOHANG)` for each live worker (in index
/// order, re-checking the slot after a swap-remove) and removes any that
/// have exited. Residual stderr is flushed via `on_residual` (supervisor
/// stderr, per spec); each reaped worker is reported via the returned list
/// (supervisor stdout, per spec).
pub fn reap_sweep(table: &mut WorkerTable, mut on_residual: impl FnMut(Pid, &[u8])) -> Vec<Reaped> {
    let mut reaped = Vec::new();
    let mut index = 0;
    while index < table.len() {
        let pid = table.get_mut(index).expect("index < len").pid;
        match try_wait(pid) {
            None => index += 1,
            Some(status) => {
                let worker = table.get_mut(index).expect("index < len");
                if !worker.buf.is_empty() {
                    on_residual(pid, &worker.buf);
                    worker.buf.clear();
                }
                table.remove(index);
                reaped.push(Reaped { pid, status });
                // Do not advance `index`: the slot now holds a different
                // worker (or the table shrank past it) and must be
                // re-examined on the next loop iteration.
            }
        }
    }
    reaped
}

/// Nonblocking `waitpid`. Returns `Some(status)` with the raw wait status
/// word if `pid` has terminated, `None` if it is still alive.
fn try_wait(pid: Pid) -> Option<c_int> {
    let mut status: c_int = 0;
    let ret = unsafe { libc::waitpid(pid.as_raw() as pid_t, &mut status, WNOHANG) };
    if ret <= 0 {
        None
    } else {
        Some(status)
    }
}
