//! Pre-launch controller facade.
//!
//! [`PrelaunchController`] is what a host embeds: constructing one starts the
//! background launch, and the remaining methods are thin, non-blocking-or-
//! clearly-blocking operations over the shared state the worker maintains.
//! The facade never returns engine errors; failures become recorded faults
//! and the host observes them through [`telemetry`] and
//! [`engine_process_id`].
//!
//! [`telemetry`]: PrelaunchController::telemetry
//! [`engine_process_id`]: PrelaunchController::engine_process_id

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use prewarm_core::{
    EngineCreationArguments, EngineFactory, Milestone, PrelaunchTelemetry, ProcessWaiter,
};

use crate::process::SystemProcessWaiter;
use crate::store;
use crate::worker::{self, Shared, WorkerEvent};

/// Handle to one pre-launched engine instance.
///
/// One launch per controller: relaunching means building a new one. The
/// controller is `Send + Sync`; every method takes `&self` and may be called
/// from any thread. Dropping the controller closes the launch (without
/// waiting for the engine process) and joins the worker thread.
pub struct PrelaunchController {
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<WorkerEvent>,
    worker_thread: Mutex<Option<thread::JoinHandle<()>>>,
    cached_args: Mutex<Option<EngineCreationArguments>>,
}

impl PrelaunchController {
    /// Start a background launch using arguments cached at `args_path`.
    ///
    /// Never fails: anything that goes wrong, from an unreadable cache to a
    /// collaborator refusal, ends up as a fault in the telemetry and a zero
    /// process id.
    pub fn launch(args_path: impl Into<PathBuf>, factory: Arc<dyn EngineFactory>) -> Self {
        Self::launch_with_waiter(args_path, factory, Arc::new(SystemProcessWaiter::new()))
    }

    /// [`launch`](Self::launch) with an injected [`ProcessWaiter`], for hosts
    /// and tests that do not want the system adapter.
    pub fn launch_with_waiter(
        args_path: impl Into<PathBuf>,
        factory: Arc<dyn EngineFactory>,
        waiter: Arc<dyn ProcessWaiter>,
    ) -> Self {
        let args_path = args_path.into();
        let shared = Arc::new(Shared::new());
        info!(path = %args_path.display(), "pre-launch started");

        let (events_tx, worker_thread) =
            worker::spawn(args_path, factory, waiter, Arc::clone(&shared));

        Self {
            shared,
            events_tx,
            worker_thread: Mutex::new(worker_thread),
            cached_args: Mutex::new(None),
        }
    }

    /// Block until the launch attempt reaches a terminal state.
    ///
    /// Returns on success and on fault alike; callers distinguish the two
    /// through [`engine_process_id`](Self::engine_process_id) (zero means no
    /// engine) or the recorded faults. Safe to call from several threads and
    /// repeatedly; once terminal, it returns immediately.
    pub fn wait_for_launch(&self) {
        self.shared.record(Milestone::WaitForLaunchStarted);
        self.shared.gate.wait();
        self.shared.record(Milestone::WaitForLaunchCompleted);
    }

    /// Bounded [`wait_for_launch`](Self::wait_for_launch). Returns whether
    /// the launch was terminal before `timeout` elapsed.
    pub fn wait_for_launch_timeout(&self, timeout: Duration) -> bool {
        self.shared.record(Milestone::WaitForLaunchStarted);
        let terminal = self.shared.gate.wait_timeout(timeout);
        if terminal {
            self.shared.record(Milestone::WaitForLaunchCompleted);
        }
        terminal
    }

    /// Read the argument cache at `path`, memoizing the first success for
    /// the controller's lifetime; later calls return the memo without
    /// touching storage, even if the file has changed or vanished.
    ///
    /// Returns `None` when the cache is unreadable or malformed; the cause
    /// is recorded as a fault. A failed read is not memoized, so a later
    /// call may still succeed.
    pub fn read_cached_arguments(&self, path: impl AsRef<Path>) -> Option<EngineCreationArguments> {
        let mut memo = match self.cached_args.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(args) = memo.as_ref() {
            self.shared
                .record(Milestone::ForegroundReadCachedArgsCompleted);
            return Some(args.clone());
        }

        match store::read_arguments(path.as_ref()) {
            Ok(args) => {
                *memo = Some(args.clone());
                self.shared
                    .record(Milestone::ForegroundReadCachedArgsCompleted);
                Some(args)
            }
            Err(err) => {
                let err = anyhow::Error::new(err).context("reading cached engine arguments");
                self.shared.record_fault(format!("{err:#}"));
                None
            }
        }
    }

    /// Write `args` to the cache at `path` for the next launch.
    ///
    /// Fire-and-forget: a failure is recorded as a fault and otherwise
    /// swallowed. Does not refresh an existing read memo.
    pub fn cache_arguments(&self, path: impl AsRef<Path>, args: &EngineCreationArguments) {
        match store::write_arguments(path.as_ref(), args) {
            Ok(()) => self.shared.record(Milestone::CacheArgumentsCompleted),
            Err(err) => {
                let err = anyhow::Error::new(err).context("caching engine arguments");
                self.shared.record_fault(format!("{err:#}"));
            }
        }
    }

    /// Ask the worker to shut the launch down. Idempotent, non-blocking,
    /// safe before the launch is terminal.
    ///
    /// With `wait_for_engine_exit` the worker releases its handles and then
    /// blocks until the engine host process exits before finishing; without
    /// it the handles are released and the process is left to its own
    /// lifetime. When called repeatedly the last flag value wins.
    pub fn close(&self, wait_for_engine_exit: bool) {
        self.shared.record(Milestone::CloseStarted);
        self.shared
            .wait_for_engine_exit
            .store(wait_for_engine_exit, Ordering::Release);
        self.shared.close_requested.store(true, Ordering::Release);

        // Wake a pump blocked in recv. The worker may already be gone.
        let _ = self.events_tx.send(WorkerEvent::CloseRequested);
    }

    /// Block until the worker thread has exited. Idempotent; the guard is
    /// held across the join so concurrent callers cannot return early.
    pub fn wait_for_close(&self) {
        let mut worker_thread = match self.worker_thread.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = worker_thread.take() {
            if handle.join().is_err() {
                // The worker's own panic boundary normally records faults; a
                // join error means a panic escaped even that.
                self.shared
                    .record_fault("pre-launch worker thread terminated abnormally");
            }
        }
        self.shared.record(Milestone::WaitForCloseCompleted);
    }

    /// Identifier of the engine host process. Zero until a launch succeeds;
    /// remains readable after close.
    pub fn engine_process_id(&self) -> u32 {
        self.shared.engine_process_id.load(Ordering::Acquire)
    }

    /// Snapshot of the launch timeline and fault log.
    ///
    /// Background milestones are final once
    /// [`wait_for_launch`](Self::wait_for_launch) has returned.
    pub fn telemetry(&self) -> PrelaunchTelemetry {
        self.shared.lock_telemetry().clone()
    }
}

impl Drop for PrelaunchController {
    fn drop(&mut self) {
        let joinable = {
            let guard = match self.worker_thread.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.is_some()
        };
        // No worker thread outlives its controller.
        if joinable {
            debug!("controller dropped while the worker is alive; closing");
            self.close(false);
            self.wait_for_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{CompletionMode, FakeEngine, FakeEngineConfig};
    use tempfile::tempdir;

    fn sample_args() -> EngineCreationArguments {
        EngineCreationArguments::new()
            .with_engine_exe_path("/opt/engine/engine-host")
            .with_data_dir("/var/lib/engine/profile-a")
            .with_language("en-US")
    }

    #[test]
    fn test_controller_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PrelaunchController>();
    }

    #[test]
    fn test_read_cached_arguments_memoizes_first_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("args.json");
        store::write_arguments(&path, &sample_args()).unwrap();

        let controller = PrelaunchController::launch(&path, Arc::new(FakeEngine::new()));
        let first = controller.read_cached_arguments(&path).unwrap();

        // The memo answers even after the backing file is gone.
        std::fs::remove_file(&path).unwrap();
        let second = controller.read_cached_arguments(&path).unwrap();
        assert_eq!(first, second);

        controller.wait_for_launch();
        assert!(controller.telemetry().faults.is_empty());
    }

    #[test]
    fn test_failed_read_is_not_memoized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("args.json");

        // Launch against a valid cache elsewhere so only the foreground read
        // under test fails.
        let launch_path = dir.path().join("launch-args.json");
        store::write_arguments(&launch_path, &sample_args()).unwrap();
        let controller = PrelaunchController::launch(&launch_path, Arc::new(FakeEngine::new()));

        assert!(controller.read_cached_arguments(&path).is_none());
        assert_eq!(controller.telemetry().faults.len(), 1);

        store::write_arguments(&path, &sample_args()).unwrap();
        assert!(controller.read_cached_arguments(&path).is_some());
        assert_eq!(controller.telemetry().faults.len(), 1);
    }

    #[test]
    fn test_cache_arguments_failure_is_swallowed_and_recorded() {
        let dir = tempdir().unwrap();
        let launch_path = dir.path().join("launch-args.json");
        store::write_arguments(&launch_path, &sample_args()).unwrap();
        let controller = PrelaunchController::launch(&launch_path, Arc::new(FakeEngine::new()));

        // Writing to a directory path cannot succeed.
        controller.cache_arguments(dir.path(), &sample_args());

        let telemetry = controller.telemetry();
        assert_eq!(telemetry.faults.len(), 1);
        assert_eq!(telemetry.cache_arguments_completed, Duration::ZERO);
    }

    #[test]
    fn test_drop_shuts_down_a_deferred_launch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("args.json");
        store::write_arguments(&path, &sample_args()).unwrap();

        let engine = FakeEngine::with_config(FakeEngineConfig {
            completion_mode: CompletionMode::Deferred(Duration::from_millis(50)),
            ..FakeEngineConfig::default()
        });
        let controller = PrelaunchController::launch(&path, Arc::new(engine));

        // Dropping mid-launch must close and join without hanging.
        drop(controller);
    }
}
