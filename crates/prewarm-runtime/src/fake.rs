//! In-process fake of the engine collaborator.
//!
//! Implements the full two-phase creation protocol without any real engine:
//! completions can fire inline or from a timer thread, any stage can be
//! scripted to fail, and fabricated process ids come from a per-engine
//! registry keyed by data directory, mirroring how a real engine coalesces
//! instances that share a profile onto one host process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use prewarm_core::{
    Completion, CreationStage, EngineController, EngineEnvironment, EngineError, EngineFactory,
    EngineInstance, EnvironmentOptions, WindowTarget,
};

/// How a scripted completion is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Invoke the completion on the requesting thread, before the request
    /// call returns.
    Inline,
    /// Invoke the completion from a timer thread after the delay.
    Deferred(Duration),
}

/// Scripted behavior of a [`FakeEngine`].
#[derive(Debug, Clone)]
pub struct FakeEngineConfig {
    pub completion_mode: CompletionMode,
    /// Complete environment creation with this failure message.
    pub fail_environment: Option<String>,
    /// Complete controller creation with this failure message.
    pub fail_controller: Option<String>,
    /// Make the process-id query on the created instance fail.
    pub fail_process_query: bool,
}

impl Default for FakeEngineConfig {
    fn default() -> Self {
        Self {
            completion_mode: CompletionMode::Inline,
            fail_environment: None,
            fail_controller: None,
            fail_process_query: false,
        }
    }
}

/// Fabricated process ids, one per data directory.
struct PidRegistry {
    pids: Mutex<HashMap<String, u32>>,
    next: AtomicU32,
}

impl PidRegistry {
    fn new() -> Self {
        Self {
            pids: Mutex::new(HashMap::new()),
            // Far from real pids handed out early at boot, easy to spot in
            // logs.
            next: AtomicU32::new(1000),
        }
    }

    fn pid_for(&self, data_dir: &str) -> u32 {
        let mut pids = match self.pids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pids
            .entry(data_dir.to_string())
            .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Engine collaborator for tests and demos.
pub struct FakeEngine {
    config: FakeEngineConfig,
    registry: Arc<PidRegistry>,
}

impl FakeEngine {
    /// A fake that succeeds at every stage with inline completions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FakeEngineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: FakeEngineConfig) -> Self {
        Self {
            config,
            registry: Arc::new(PidRegistry::new()),
        }
    }

    /// Deliver `result` to `done` per the configured mode.
    fn complete<T: Send + 'static>(
        mode: CompletionMode,
        done: Completion<T>,
        result: Result<T, EngineError>,
    ) {
        match mode {
            CompletionMode::Inline => done(result),
            CompletionMode::Deferred(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    done(result);
                });
            }
        }
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for FakeEngine {
    fn create_environment(
        &self,
        _exe_path: &str,
        data_dir: &str,
        _options: &EnvironmentOptions,
        done: Completion<Box<dyn EngineEnvironment>>,
    ) -> Result<(), EngineError> {
        debug!(data_dir, "fake engine environment requested");

        let result = match &self.config.fail_environment {
            Some(reason) => Err(EngineError::creation_failed(
                CreationStage::Environment,
                reason.clone(),
            )),
            None => Ok(Box::new(FakeEnvironment {
                data_dir: data_dir.to_string(),
                config: self.config.clone(),
                registry: Arc::clone(&self.registry),
            }) as Box<dyn EngineEnvironment>),
        };
        Self::complete(self.config.completion_mode, done, result);
        Ok(())
    }
}

struct FakeEnvironment {
    data_dir: String,
    config: FakeEngineConfig,
    registry: Arc<PidRegistry>,
}

impl EngineEnvironment for FakeEnvironment {
    fn create_controller(
        &self,
        window: WindowTarget,
        done: Completion<Box<dyn EngineController>>,
    ) -> Result<(), EngineError> {
        debug!(
            data_dir = %self.data_dir,
            window = window.id(),
            "fake engine controller requested"
        );

        let result = match &self.config.fail_controller {
            Some(reason) => Err(EngineError::creation_failed(
                CreationStage::Controller,
                reason.clone(),
            )),
            None => Ok(Box::new(FakeController {
                pid: self.registry.pid_for(&self.data_dir),
                fail_process_query: self.config.fail_process_query,
            }) as Box<dyn EngineController>),
        };
        FakeEngine::complete(self.config.completion_mode, done, result);
        Ok(())
    }
}

struct FakeController {
    pid: u32,
    fail_process_query: bool,
}

impl EngineController for FakeController {
    fn instance(&self) -> Result<Box<dyn EngineInstance>, EngineError> {
        Ok(Box::new(FakeInstance {
            pid: self.pid,
            fail_query: self.fail_process_query,
        }))
    }
}

struct FakeInstance {
    pid: u32,
    fail_query: bool,
}

impl EngineInstance for FakeInstance {
    fn host_process_id(&self) -> Result<u32, EngineError> {
        if self.fail_query {
            return Err(EngineError::query_failed("scripted process-id failure"));
        }
        Ok(self.pid)
    }
}
