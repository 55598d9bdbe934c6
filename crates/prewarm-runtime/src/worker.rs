//! Background pre-launch worker — owns the two-phase engine creation protocol.
//!
//! One dedicated OS thread per launch. Completion callbacks from the engine
//! collaborator may fire on arbitrary threads, so they are routed into an
//! `mpsc` queue and replayed here; every protocol transition then runs
//! single-threaded against an explicit [`Phase`], which keeps the state
//! machine free of locks and re-entrancy.
//!
//! The worker's contract with the facade: the [`ReadinessGate`] in [`Shared`]
//! opens on every exit path (success, fault, panic, close-before-ready), and
//! all engine handles are released before the thread exits.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info};

use prewarm_core::{
    Completion, EngineController, EngineCreationArguments, EngineEnvironment, EngineError,
    EngineFactory, EngineInstance, EnvironmentOptions, Milestone, PrelaunchTelemetry,
    ProcessWaiter, WindowTarget,
};

use crate::gate::ReadinessGate;
use crate::store;

// ── Events ─────────────────────────────────────────────────────────

/// An event delivered into the worker's pump.
pub(crate) enum WorkerEvent {
    /// The environment-creation completion fired.
    EnvironmentCreated(Result<Box<dyn EngineEnvironment>, EngineError>),

    /// The controller-creation completion fired.
    ControllerCreated(Result<Box<dyn EngineController>, EngineError>),

    /// The facade asked the worker to shut down; the shared flags carry the
    /// details, this event only wakes the pump.
    CloseRequested,
}

// ── Shared state ───────────────────────────────────────────────────

/// State shared between the facade and the worker thread.
pub(crate) struct Shared {
    pub(crate) telemetry: Mutex<PrelaunchTelemetry>,
    pub(crate) gate: ReadinessGate,
    pub(crate) close_requested: AtomicBool,
    pub(crate) wait_for_engine_exit: AtomicBool,
    /// Identifier of the engine host process. 0 until the launch succeeds.
    pub(crate) engine_process_id: AtomicU32,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            telemetry: Mutex::new(PrelaunchTelemetry::started_now()),
            gate: ReadinessGate::new(),
            close_requested: AtomicBool::new(false),
            wait_for_engine_exit: AtomicBool::new(false),
            engine_process_id: AtomicU32::new(0),
        }
    }

    pub(crate) fn record(&self, milestone: Milestone) {
        self.lock_telemetry().record(milestone);
    }

    pub(crate) fn record_fault(&self, description: impl Into<String>) {
        self.lock_telemetry().record_fault(description);
    }

    // A recorder panicking under the lock must not wedge every later reader;
    // the timeline stays coherent because each slot is a single write.
    pub(crate) fn lock_telemetry(&self) -> MutexGuard<'_, PrelaunchTelemetry> {
        match self.telemetry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Opens the readiness gate when dropped. Held for the whole worker run so
/// waiters are unblocked no matter how the thread exits.
struct GateGuard(Arc<Shared>);

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.0.gate.open();
    }
}

// ── Engine handle ownership ────────────────────────────────────────

/// Engine handles the worker currently owns. Dropping a handle releases it.
#[derive(Default)]
struct OwnedHandles {
    environment: Option<Box<dyn EngineEnvironment>>,
    controller: Option<Box<dyn EngineController>>,
    instance: Option<Box<dyn EngineInstance>>,
}

impl OwnedHandles {
    /// Release everything, reverse creation order: instance, controller,
    /// environment.
    fn release(&mut self) {
        drop(self.instance.take());
        drop(self.controller.take());
        drop(self.environment.take());
        debug!("engine handles released");
    }

    /// Capture any handle carried by a completion that lands after a close
    /// request; it still needs an orderly release.
    fn adopt_stale(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::EnvironmentCreated(Ok(environment)) => {
                self.environment = Some(environment);
            }
            WorkerEvent::ControllerCreated(Ok(controller)) => {
                self.controller = Some(controller);
            }
            _ => {}
        }
    }
}

// ── State machine ──────────────────────────────────────────────────

/// Where the creation protocol currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Environment requested, completion not yet seen.
    EnvironmentPending,
    /// Controller requested, completion not yet seen.
    ControllerPending,
    /// Engine instance up, process id published, gate open.
    Ready,
    /// A stage failed; the fault is recorded and the pump is winding down.
    Faulted,
}

struct PrelaunchWorker {
    args_path: PathBuf,
    factory: Arc<dyn EngineFactory>,
    waiter: Arc<dyn ProcessWaiter>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<WorkerEvent>,
    window: WindowTarget,
}

/// Spawn the worker thread for one launch.
///
/// Returns the pump's sender (the facade uses it to deliver close wakeups)
/// and the join handle. A spawn failure is absorbed: the fault is recorded,
/// the gate opens and `None` comes back in place of the handle.
pub(crate) fn spawn(
    args_path: PathBuf,
    factory: Arc<dyn EngineFactory>,
    waiter: Arc<dyn ProcessWaiter>,
    shared: Arc<Shared>,
) -> (mpsc::Sender<WorkerEvent>, Option<thread::JoinHandle<()>>) {
    let (events_tx, events_rx) = mpsc::channel();
    let worker = PrelaunchWorker {
        args_path,
        factory,
        waiter,
        shared: Arc::clone(&shared),
        events_tx: events_tx.clone(),
        window: WindowTarget::allocate(),
    };

    match thread::Builder::new()
        .name("prewarm-worker".into())
        .spawn(move || worker.run(&events_rx))
    {
        Ok(handle) => (events_tx, Some(handle)),
        Err(err) => {
            shared.record_fault(format!("failed to spawn pre-launch worker thread: {err}"));
            shared.gate.open();
            (events_tx, None)
        }
    }
}

impl PrelaunchWorker {
    /// Thread body. The panic boundary turns any panic in the pipeline into
    /// one recorded fault; the gate guard then signals waiters.
    fn run(self, events: &mpsc::Receiver<WorkerEvent>) {
        let shared = Arc::clone(&self.shared);
        let _open_on_exit = GateGuard(Arc::clone(&shared));

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run_inner(events))) {
            shared.record_fault(format!(
                "pre-launch worker panicked: {}",
                panic_message(payload.as_ref())
            ));
        }
        debug!("pre-launch worker thread exiting");
    }

    fn run_inner(self, events: &mpsc::Receiver<WorkerEvent>) {
        self.shared.record(Milestone::BackgroundLaunchStarted);

        let args = match store::read_arguments(&self.args_path) {
            Ok(args) => {
                self.shared.record(Milestone::ReadCachedArgsCompleted);
                args
            }
            Err(err) => {
                self.shared.record(Milestone::ReadCachedArgsCompleted);
                self.fault(anyhow::Error::new(err).context("reading cached engine arguments"));
                return;
            }
        };

        // The render-target token was minted at spawn; this marks the point
        // in the pipeline where it is handed over.
        self.shared.record(Milestone::WindowCreated);

        if self.shared.close_requested.load(Ordering::Acquire) {
            debug!("close requested before the engine request was issued; worker exiting");
            return;
        }

        if let Err(err) = self.request_environment(&args) {
            self.fault(err);
            return;
        }

        let mut handles = OwnedHandles::default();
        let mut phase = Phase::EnvironmentPending;

        while let Ok(event) = events.recv() {
            if self.shared.close_requested.load(Ordering::Acquire) {
                handles.adopt_stale(event);
                break;
            }
            phase = self.handle_event(phase, event, &mut handles);
            if phase == Phase::Faulted || self.shared.close_requested.load(Ordering::Acquire) {
                break;
            }
        }

        // Handles go first so the engine process is free to exit before any
        // wait on it.
        handles.release();

        if self.shared.wait_for_engine_exit.load(Ordering::Acquire) {
            let pid = self.shared.engine_process_id.load(Ordering::Acquire);
            if pid == 0 {
                debug!("process-exit wait requested but no engine process was created; skipping");
            } else if let Err(err) = self.waiter.wait_for_exit(pid) {
                self.fault(anyhow::Error::new(err).context("waiting for engine process exit"));
            }
        }
    }

    /// Advance the state machine by one event. Runs only on the worker
    /// thread.
    fn handle_event(&self, phase: Phase, event: WorkerEvent, handles: &mut OwnedHandles) -> Phase {
        match (phase, event) {
            (Phase::EnvironmentPending, WorkerEvent::EnvironmentCreated(result)) => {
                self.shared.record(Milestone::EnvironmentCreated);
                match result {
                    Ok(environment) => {
                        let issued = self.request_controller(environment.as_ref());
                        handles.environment = Some(environment);
                        match issued {
                            Ok(()) => Phase::ControllerPending,
                            Err(err) => {
                                self.fault(err);
                                Phase::Faulted
                            }
                        }
                    }
                    Err(err) => {
                        self.fault(anyhow::Error::new(err).context("engine environment creation"));
                        Phase::Faulted
                    }
                }
            }

            (Phase::ControllerPending, WorkerEvent::ControllerCreated(result)) => {
                self.shared.record(Milestone::ControllerCreated);
                match result {
                    Ok(controller) => match self.adopt_controller(controller, handles) {
                        Ok(()) => Phase::Ready,
                        Err(err) => {
                            self.fault(err);
                            Phase::Faulted
                        }
                    },
                    Err(err) => {
                        self.fault(anyhow::Error::new(err).context("engine controller creation"));
                        Phase::Faulted
                    }
                }
            }

            // The pump loop exits on the shared flag; the event itself only
            // wakes a blocked recv.
            (phase, WorkerEvent::CloseRequested) => phase,

            // A completion for a stage this phase no longer expects. Dropping
            // the carried handle (if any) releases it.
            (phase, WorkerEvent::EnvironmentCreated(_) | WorkerEvent::ControllerCreated(_)) => {
                debug!(?phase, "completion arrived out of phase; ignored");
                phase
            }
        }
    }

    /// Issue the environment request; its completion lands in the pump.
    fn request_environment(&self, args: &EngineCreationArguments) -> Result<()> {
        let events = self.events_tx.clone();
        let done: Completion<Box<dyn EngineEnvironment>> = Box::new(move |result| {
            // The pump may already be gone when a slow completion lands.
            let _ = events.send(WorkerEvent::EnvironmentCreated(result));
        });
        let options = EnvironmentOptions::from(args);
        self.factory
            .create_environment(&args.engine_exe_path, &args.data_dir, &options, done)
            .context("issuing engine environment request")?;
        Ok(())
    }

    /// Issue the controller request; its completion lands in the pump.
    fn request_controller(&self, environment: &dyn EngineEnvironment) -> Result<()> {
        let events = self.events_tx.clone();
        let done: Completion<Box<dyn EngineController>> = Box::new(move |result| {
            let _ = events.send(WorkerEvent::ControllerCreated(result));
        });
        environment
            .create_controller(self.window, done)
            .context("issuing engine controller request")?;
        Ok(())
    }

    /// Take ownership of a created controller, query its instance and the
    /// host process id, publish the id and open the gate.
    fn adopt_controller(
        &self,
        controller: Box<dyn EngineController>,
        handles: &mut OwnedHandles,
    ) -> Result<()> {
        let instance = controller.instance().context("obtaining engine instance")?;
        let pid = instance
            .host_process_id()
            .context("querying engine host process id")?;

        handles.controller = Some(controller);
        handles.instance = Some(instance);

        // Publish before opening the gate so a woken waiter always sees the
        // final id.
        self.shared.engine_process_id.store(pid, Ordering::Release);
        self.shared.gate.open();

        info!(
            pid,
            elapsed = ?self.shared.lock_telemetry().since_launch(),
            "engine instance ready"
        );
        Ok(())
    }

    fn fault(&self, err: anyhow::Error) {
        self.shared.record_fault(format!("{err:#}"));
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prewarm_core::{CreationStage, WaitError};
    use std::time::Duration;

    struct StubInstance {
        pid: u32,
    }

    impl EngineInstance for StubInstance {
        fn host_process_id(&self) -> Result<u32, EngineError> {
            Ok(self.pid)
        }
    }

    struct StubController {
        pid: u32,
    }

    impl EngineController for StubController {
        fn instance(&self) -> Result<Box<dyn EngineInstance>, EngineError> {
            Ok(Box::new(StubInstance { pid: self.pid }))
        }
    }

    /// Completes controller creation inline with a fixed pid.
    struct StubEnvironment {
        pid: u32,
    }

    impl EngineEnvironment for StubEnvironment {
        fn create_controller(
            &self,
            _window: WindowTarget,
            done: Completion<Box<dyn EngineController>>,
        ) -> Result<(), EngineError> {
            done(Ok(Box::new(StubController { pid: self.pid })));
            Ok(())
        }
    }

    struct RejectingFactory;

    impl EngineFactory for RejectingFactory {
        fn create_environment(
            &self,
            _exe_path: &str,
            _data_dir: &str,
            _options: &EnvironmentOptions,
            _done: Completion<Box<dyn EngineEnvironment>>,
        ) -> Result<(), EngineError> {
            Err(EngineError::request_rejected(
                CreationStage::Environment,
                "not under test",
            ))
        }
    }

    struct NeverWaiter;

    impl ProcessWaiter for NeverWaiter {
        fn wait_for_exit(&self, _pid: u32) -> Result<(), WaitError> {
            Ok(())
        }
    }

    /// A worker wired to fresh shared state, without spawning a thread.
    fn test_worker() -> (PrelaunchWorker, mpsc::Receiver<WorkerEvent>) {
        let (events_tx, events_rx) = mpsc::channel();
        let worker = PrelaunchWorker {
            args_path: PathBuf::from("unused.json"),
            factory: Arc::new(RejectingFactory),
            waiter: Arc::new(NeverWaiter),
            shared: Arc::new(Shared::new()),
            events_tx,
            window: WindowTarget::allocate(),
        };
        (worker, events_rx)
    }

    #[test]
    fn test_two_completions_drive_the_protocol_to_ready() {
        let (worker, events_rx) = test_worker();
        let mut handles = OwnedHandles::default();

        let phase = worker.handle_event(
            Phase::EnvironmentPending,
            WorkerEvent::EnvironmentCreated(Ok(Box::new(StubEnvironment { pid: 4242 }))),
            &mut handles,
        );
        assert_eq!(phase, Phase::ControllerPending);

        // StubEnvironment completed inline, so the controller event is
        // already queued.
        let event = events_rx.try_recv().unwrap();
        let phase = worker.handle_event(phase, event, &mut handles);

        assert_eq!(phase, Phase::Ready);
        assert_eq!(
            worker.shared.engine_process_id.load(Ordering::Acquire),
            4242
        );
        assert!(worker.shared.gate.is_open());
        assert!(worker.shared.lock_telemetry().faults.is_empty());
    }

    #[test]
    fn test_environment_failure_records_one_fault_and_milestone() {
        let (worker, _events_rx) = test_worker();
        let mut handles = OwnedHandles::default();

        std::thread::sleep(Duration::from_millis(2));
        let phase = worker.handle_event(
            Phase::EnvironmentPending,
            WorkerEvent::EnvironmentCreated(Err(EngineError::creation_failed(
                CreationStage::Environment,
                "code 0x8007139f",
            ))),
            &mut handles,
        );

        assert_eq!(phase, Phase::Faulted);
        let telemetry = worker.shared.lock_telemetry();
        assert_eq!(telemetry.faults.len(), 1);
        assert!(telemetry.faults[0].contains("0x8007139f"));
        assert!(telemetry.environment_created > Duration::ZERO);
        assert_eq!(worker.shared.engine_process_id.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_completion_out_of_phase_is_ignored() {
        let (worker, _events_rx) = test_worker();
        let mut handles = OwnedHandles::default();

        let phase = worker.handle_event(
            Phase::Faulted,
            WorkerEvent::ControllerCreated(Err(EngineError::creation_failed(
                CreationStage::Controller,
                "late",
            ))),
            &mut handles,
        );

        assert_eq!(phase, Phase::Faulted);
        assert!(worker.shared.lock_telemetry().faults.is_empty());
    }

    #[test]
    fn test_close_event_does_not_advance_the_phase() {
        let (worker, _events_rx) = test_worker();
        let mut handles = OwnedHandles::default();

        let phase = worker.handle_event(Phase::Ready, WorkerEvent::CloseRequested, &mut handles);
        assert_eq!(phase, Phase::Ready);
    }

    #[test]
    fn test_gate_guard_opens_on_drop() {
        let shared = Arc::new(Shared::new());
        {
            let _guard = GateGuard(Arc::clone(&shared));
            assert!(!shared.gate.is_open());
        }
        assert!(shared.gate.is_open());
    }

    struct Tracked {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    struct TrackedEnvironment(Tracked);

    impl EngineEnvironment for TrackedEnvironment {
        fn create_controller(
            &self,
            _window: WindowTarget,
            _done: Completion<Box<dyn EngineController>>,
        ) -> Result<(), EngineError> {
            Err(EngineError::request_rejected(
                CreationStage::Controller,
                "not under test",
            ))
        }
    }

    struct TrackedController(Tracked);

    impl EngineController for TrackedController {
        fn instance(&self) -> Result<Box<dyn EngineInstance>, EngineError> {
            Err(EngineError::query_failed("not under test"))
        }
    }

    struct TrackedInstance(Tracked);

    impl EngineInstance for TrackedInstance {
        fn host_process_id(&self) -> Result<u32, EngineError> {
            Ok(1)
        }
    }

    #[test]
    fn test_release_drops_handles_in_reverse_creation_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tracked = |name| Tracked {
            name,
            log: Arc::clone(&log),
        };

        let mut handles = OwnedHandles {
            environment: Some(Box::new(TrackedEnvironment(tracked("environment")))),
            controller: Some(Box::new(TrackedController(tracked("controller")))),
            instance: Some(Box::new(TrackedInstance(tracked("instance")))),
        };
        handles.release();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["instance", "controller", "environment"]
        );
    }

    #[test]
    fn test_spawn_with_missing_args_file_faults_and_opens_gate() {
        let shared = Arc::new(Shared::new());
        let (events_tx, handle) = spawn(
            PathBuf::from("/definitely/absent/prewarm-args.json"),
            Arc::new(RejectingFactory),
            Arc::new(NeverWaiter),
            Arc::clone(&shared),
        );

        shared.gate.wait();
        assert_eq!(shared.engine_process_id.load(Ordering::Acquire), 0);
        assert_eq!(shared.lock_telemetry().faults.len(), 1);

        drop(events_tx);
        handle.unwrap().join().unwrap();
    }

    #[test]
    fn test_panic_message_reads_both_payload_shapes() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let text = String::from("formatted");
        let payload = panic::catch_unwind(AssertUnwindSafe(|| panic!("{text} 1"))).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");
    }
}
