//! Port for blocking on an external process's lifetime.

use thiserror::Error;

/// Failures while waiting for a process to exit.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The process could not be queried at all.
    #[error("cannot query process {pid}: {reason}")]
    QueryFailed { pid: u32, reason: String },

    /// The wait could not be carried out on this platform.
    #[error("wait on process {pid} failed: {reason}")]
    WaitFailed { pid: u32, reason: String },
}

/// Blocks until the process identified by `pid` has exited.
///
/// A pid that is already gone is a successful, immediate wait. The wait
/// itself is unbounded; callers own any timeout policy.
pub trait ProcessWaiter: Send + Sync {
    fn wait_for_exit(&self, pid: u32) -> Result<(), WaitError>;
}
