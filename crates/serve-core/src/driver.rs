//! Installs a one-shot interrupt handler and drives `resume()` until
//! shutdown. The first terminal-interrupt signal schedules a graceful exit
//! at the next iteration boundary and restores the default disposition, so
//! a second signal kills the process immediately — in-flight children are
//! not otherwise signaled; that's outside this supervisor's job.

use crate::launcher::Launcher;
use crate::listener::ListenerProvider;
use crate::supervisor::{ResumeOutcome, Supervisor};
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs the one-shot `SIGINT` handler. Must be called once before
/// [`run`].
pub fn install_interrupt_handler() -> Result<(), nix::errno::Errno> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

/// Runs `resume()` until the interrupt flag is set, yielding the scheduler
/// whenever an iteration makes no progress so the loop doesn't spin.
/// Iteration errors are operational diagnostics, not protocol output, so
/// they go through `log` rather than directly to a standard stream.
pub fn run<P: ListenerProvider, L: Launcher>(supervisor: &mut Supervisor<P, L>, log: &slog::Logger) {
    while !SHUTDOWN.load(Ordering::SeqCst) {
        match supervisor.resume() {
            ResumeOutcome::Error(err) => {
                slog::warn!(log, "iteration error"; "error" => %err);
                nix::sched::sched_yield().ok();
            }
            ResumeOutcome::Some => {}
            ResumeOutcome::None => {
                nix::sched::sched_yield().ok();
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn reset_shutdown_flag_for_test() {
    SHUTDOWN.store(false, Ordering::SeqCst);
}
