use nix::errno::Errno;

/// Fatal-to-this-iteration failures from [`crate::supervisor::Supervisor::resume`].
/// Each variant preserves the errno that caused it, captured before any
/// cleanup ran, so the diagnostic the driver prints is accurate.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("poll: {0}")]
    Poll(Errno),
    #[error("accept: {0}")]
    Accept(Errno),
    #[error("admitting new worker: {0}")]
    AddWorker(Errno),
}
