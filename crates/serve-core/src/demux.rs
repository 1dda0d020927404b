//! The stderr demultiplexer: reads a worker's pipe in small chunks, splits
//! complete lines off the front of its buffer, and leaves any unterminated
//! remainder for the next call (or for the reaper to flush at exit).
//!
//! We line-buffer the child from outside rather than asking it to
//! line-buffer itself, because the child is an arbitrary user program. This
//! yields a uniform, pid-tagged stream on the supervisor's stdout
//! regardless of what the worker does with its own stderr.

use crate::worker::{Worker, MAX_LINE_CAP};
use nix::errno::Errno;
use nix::unistd::read;
use std::os::fd::AsRawFd;

/// Bytes read per `pump` call. Small and fixed, matching the per-iteration
/// fairness the event loop wants: one worker's flood of stderr cannot starve
/// the others within a single `resume()`.
const READ_CHUNK: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("stderr line exceeds {MAX_LINE_CAP} bytes without a newline")]
    CapExhausted,
    #[error("reading worker stderr: {0}")]
    Io(#[from] Errno),
}

/// Outcome of one `pump` call.
pub struct PumpResult {
    /// Number of complete lines emitted this call.
    pub lines_emitted: usize,
    /// True if the pipe reported EOF (peer closed the write end).
    pub eof: bool,
}

/// Reads up to one chunk from `worker`'s pipe and emits every complete line
/// that results, via `emit`. Partial (unterminated) content remains
/// buffered in `worker.buf`.
pub fn pump(worker: &mut Worker, mut emit: impl FnMut(&[u8])) -> Result<PumpResult, DemuxError> {
    let before = worker.buf.len();

    if before + READ_CHUNK > worker.buf.capacity() {
        if before > MAX_LINE_CAP - READ_CHUNK {
            return Err(DemuxError::CapExhausted);
        }
        worker.buf.reserve_exact(before + READ_CHUNK - worker.buf.capacity());
    }

    let mut chunk = [0u8; READ_CHUNK];
    let n = match read(worker.pipe_read.as_raw_fd(), &mut chunk) {
        Ok(n) => n,
        Err(Errno::EAGAIN | Errno::EWOULDBLOCK) => 0,
        Err(err) => return Err(DemuxError::Io(err)),
    };

    if n == 0 {
        // EOF or a spurious wakeup with nothing to read: the line currently
        // buffered, if any, is left for the reaper to flush.
        return Ok(PumpResult {
            lines_emitted: 0,
            eof: true,
        });
    }

    worker.buf.extend_from_slice(&chunk[..n]);

    let mut lines_emitted = 0;
    loop {
        let Some(nl) = worker.buf.iter().position(|&b| b == b'\n') else {
            break;
        };
        emit(&worker.buf[..nl]);
        worker.buf.drain(..=nl);
        lines_emitted += 1;
    }

    Ok(PumpResult {
        lines_emitted,
        eof: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;
    use nix::unistd::{pipe, write, Pid};
    use std::os::fd::AsFd;

    fn worker_with_pipe() -> (Worker, std::os::fd::OwnedFd) {
        let (r, w) = pipe().unwrap();
        crate::fdutil::make_nonblocking(r.as_raw_fd()).unwrap();
        let worker = Worker::new(Pid::from_raw(1234), r);
        (worker, w)
    }

    #[test]
    fn splits_multiple_lines() {
        let (mut worker, write_end) = worker_with_pipe();
        write(write_end.as_fd(), b"a\nb").unwrap();
        let mut lines: Vec<String> = vec![];
        let result = pump(&mut worker, |l| lines.push(String::from_utf8_lossy(l).into_owned())).unwrap();
        assert_eq!(result.lines_emitted, 1);
        assert_eq!(lines, vec!["a".to_string()]);
        assert_eq!(worker.buf, b"b");
    }

    #[test]
    fn accumulates_across_calls() {
        let (mut worker, write_end) = worker_with_pipe();
        write(write_end.as_fd(), b"a").unwrap();
        pump(&mut worker, |_| panic!("no complete line yet")).unwrap();
        assert_eq!(worker.buf, b"a");
        write(write_end.as_fd(), b"b\nc").unwrap();
        let mut lines = vec![];
        pump(&mut worker, |l| lines.push(l.to_vec())).unwrap();
        assert_eq!(lines, vec![b"ab".to_vec()]);
        assert_eq!(worker.buf, b"c");
    }

    #[test]
    fn cap_exhaustion_is_reported() {
        let (mut worker, write_end) = worker_with_pipe();
        worker.buf = vec![0u8; MAX_LINE_CAP - READ_CHUNK + 1];
        let _ = write(write_end.as_fd(), b"x");
        let err = pump(&mut worker, |_| {}).unwrap_err();
        assert!(matches!(err, DemuxError::CapExhausted));
    }
}
