//! The worker table: one record per live subprocess, compacted by
//! swap-with-last removal. Order across workers carries no semantic
//! meaning; only within-iteration index order matters for line ordering
//! (see `supervisor`).

use nix::unistd::Pid;
use std::os::fd::OwnedFd;

/// Per-worker stderr line buffer. Capacity is capped at [`MAX_LINE_CAP`]
/// bytes; past that a single unterminated line is too large and the
/// demultiplexer reports a non-fatal, per-worker error instead of growing
/// further.
pub const MAX_LINE_CAP: usize = 65_534;

/// A worker is identified by its pid and owns the read end of a pipe whose
/// write end is the child's stderr, plus whatever partial line has
/// accumulated since the last newline.
pub struct Worker {
    pub pid: Pid,
    pub pipe_read: OwnedFd,
    pub buf: Vec<u8>,
}

impl Worker {
    pub(crate) fn new(pid: Pid, pipe_read: OwnedFd) -> Self {
        Worker {
            pid,
            pipe_read,
            buf: Vec::new(),
        }
    }
}

/// Dynamic collection of live workers. Growth doubles capacity (first
/// growth goes to 1); removal is O(1) swap-with-last.
#[derive(Default)]
pub struct WorkerTable {
    workers: Vec<Worker>,
}

impl WorkerTable {
    pub fn new() -> Self {
        WorkerTable {
            workers: Vec::new(),
        }
    }

    pub fn nproc(&self) -> usize {
        self.workers.len()
    }

    pub fn cproc(&self) -> usize {
        self.workers.capacity()
    }

    /// Grows the backing storage if it is full. First growth goes to
    /// capacity 1; afterwards capacity doubles. `Vec::reserve_exact` is used
    /// rather than `push`'s implicit growth so the doubling schedule is an
    /// observable, testable property rather than an allocator implementation
    /// detail.
    pub fn ensure_capacity(&mut self) {
        if self.workers.len() < self.workers.capacity() {
            return;
        }
        let new_cap = match self.workers.capacity() {
            0 => 1,
            n => n.saturating_mul(2),
        };
        let additional = new_cap - self.workers.capacity();
        self.workers.reserve_exact(additional);
    }

    /// Installs a new worker record. Capacity must already have been
    /// ensured by the caller via [`ensure_capacity`](Self::ensure_capacity).
    pub fn append(&mut self, pid: Pid, pipe_read: OwnedFd, remote: &str) {
        self.workers.push(Worker::new(pid, pipe_read));
        println!("Process {pid} created ({remote})");
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Worker> {
        self.workers.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Removes worker `index` by swapping in the last live worker and
    /// shrinking by one. Dropping the removed `Worker` closes its pipe read
    /// end. Returns the pid that now occupies `index` after compaction (if
    /// any), since the reaper must re-examine it before advancing.
    pub fn remove(&mut self, index: usize) -> Option<Pid> {
        self.workers.swap_remove(index);
        self.workers.get(index).map(|w| w.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    fn fake_pipe_read() -> OwnedFd {
        pipe().unwrap().0
    }

    #[test]
    fn capacity_doubles() {
        let mut table = WorkerTable::new();
        assert_eq!(table.cproc(), 0);
        table.ensure_capacity();
        assert_eq!(table.cproc(), 1);
        table.append(Pid::from_raw(1), fake_pipe_read(), "x");
        table.ensure_capacity();
        assert_eq!(table.cproc(), 2);
        table.append(Pid::from_raw(2), fake_pipe_read(), "x");
        table.ensure_capacity();
        assert_eq!(table.cproc(), 4);
    }

    #[test]
    fn swap_remove_preserves_multiset() {
        let mut table = WorkerTable::new();
        for i in 1..=4 {
            table.ensure_capacity();
            table.append(Pid::from_raw(i), fake_pipe_read(), "x");
        }
        table.remove(0); // pid 1 removed, pid 4 now occupies slot 0
        let pids: Vec<i32> = table.iter().map(|w| w.pid.as_raw()).collect();
        assert_eq!(pids.len(), 3);
        assert!(!pids.contains(&1));
        assert!(pids.contains(&4));
    }

    #[test]
    fn growth_then_drain_is_leak_free() {
        let mut table = WorkerTable::new();
        for i in 1..=8 {
            table.ensure_capacity();
            table.append(Pid::from_raw(i), fake_pipe_read(), "x");
        }
        while !table.is_empty() {
            table.remove(0);
        }
        assert_eq!(table.nproc(), 0);
    }
}
