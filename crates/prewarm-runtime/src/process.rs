//! System adapter for blocking on an external process's exit.

use std::thread;
use std::time::Duration;

use prewarm_core::{ProcessWaiter, WaitError};
use tracing::debug;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Polls the OS until a process is gone.
///
/// The engine host process is not our child, so there is no handle to reap
/// and no exit code to collect; an existence probe loop is the portable way
/// to observe the exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessWaiter;

impl SystemProcessWaiter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessWaiter for SystemProcessWaiter {
    fn wait_for_exit(&self, pid: u32) -> Result<(), WaitError> {
        debug!(pid, "waiting for process exit");
        wait_for_exit_impl(pid)
    }
}

#[cfg(unix)]
fn wait_for_exit_impl(pid: u32) -> Result<(), WaitError> {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    // pid_t is signed; a larger id cannot be probed and its raw cast would
    // alias a process group.
    let Ok(raw_pid) = i32::try_from(pid) else {
        return Err(WaitError::WaitFailed {
            pid,
            reason: String::from("process id does not fit the platform pid type"),
        });
    };

    let nix_pid = Pid::from_raw(raw_pid);
    loop {
        // Null signal: existence probe, nothing is delivered.
        match signal::kill(nix_pid, None) {
            Ok(()) => {}
            // Alive but not ours to signal; keep polling.
            Err(Errno::EPERM) => {}
            Err(Errno::ESRCH) => return Ok(()),
            Err(err) => {
                return Err(WaitError::QueryFailed {
                    pid,
                    reason: err.to_string(),
                });
            }
        }
        thread::sleep(PROBE_INTERVAL);
    }
}

#[cfg(not(unix))]
fn wait_for_exit_impl(pid: u32) -> Result<(), WaitError> {
    use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

    let sys_pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    loop {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        if system.process(sys_pid).is_none() {
            return Ok(());
        }
        thread::sleep(PROBE_INTERVAL);
    }
}
