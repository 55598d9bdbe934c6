//! Ports for the external engine-creation collaborator.
//!
//! An engine instance comes up in two asynchronous phases: an environment is
//! created first, then a controller inside that environment; the controller
//! exposes the running resource. Each phase completes by invoking a
//! [`Completion`] callback, which an implementation may call from any thread.
//! The pre-launch worker routes completions into its own event queue so the
//! protocol transitions stay single-threaded.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::args::EngineCreationArguments;

/// Stage of the two-phase creation protocol, named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    Environment,
    Controller,
}

impl fmt::Display for CreationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str("environment"),
            Self::Controller => f.write_str("controller"),
        }
    }
}

/// Failures reported by or about the engine collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A creation request was issued and the collaborator completed it with
    /// a non-success result.
    #[error("engine {stage} creation failed: {reason}")]
    CreationFailed { stage: CreationStage, reason: String },

    /// A creation request could not even be issued.
    #[error("failed to issue engine {stage} request: {reason}")]
    RequestRejected { stage: CreationStage, reason: String },

    /// A query on an already-created handle failed.
    #[error("engine handle query failed: {0}")]
    QueryFailed(String),
}

impl EngineError {
    pub fn creation_failed(stage: CreationStage, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            stage,
            reason: reason.into(),
        }
    }

    pub fn request_rejected(stage: CreationStage, reason: impl Into<String>) -> Self {
        Self::RequestRejected {
            stage,
            reason: reason.into(),
        }
    }

    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed(reason.into())
    }
}

/// One-shot callback delivering the result of an asynchronous creation
/// request. Fires exactly once, possibly on a thread the collaborator owns.
pub type Completion<T> = Box<dyn FnOnce(Result<T, EngineError>) + Send + 'static>;

/// Options forwarded to environment creation, derived from the non-path
/// fields of [`EngineCreationArguments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOptions {
    pub extra_args: String,
    pub language: String,
    pub release_channels_mask: u8,
    pub channel_search_kind: u8,
    pub tracking_prevention_enabled: bool,
}

impl From<&EngineCreationArguments> for EnvironmentOptions {
    fn from(args: &EngineCreationArguments) -> Self {
        Self {
            extra_args: args.extra_args.clone(),
            language: args.language.clone(),
            release_channels_mask: args.release_channels_mask,
            channel_search_kind: args.channel_search_kind,
            tracking_prevention_enabled: args.tracking_prevention_enabled,
        }
    }
}

/// Opaque render-target token handed to controller creation.
///
/// The worker allocates one per launch. Implementations that render into a
/// real host surface resolve the id to whatever the platform needs; fakes
/// ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTarget {
    id: u64,
}

impl WindowTarget {
    /// Allocate a process-unique target token.
    #[must_use]
    pub fn allocate() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Numeric identity of the target.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

/// Entry point of the engine collaborator.
pub trait EngineFactory: Send + Sync {
    /// Begin asynchronous environment creation.
    ///
    /// `done` fires exactly once with the created environment or the failure
    /// the collaborator reported. Returns an error only when the request
    /// cannot be issued at all, in which case `done` never fires.
    fn create_environment(
        &self,
        exe_path: &str,
        data_dir: &str,
        options: &EnvironmentOptions,
        done: Completion<Box<dyn EngineEnvironment>>,
    ) -> Result<(), EngineError>;
}

/// A created engine environment, able to host controllers.
pub trait EngineEnvironment: Send {
    /// Begin asynchronous controller creation targeting `window`. Same
    /// completion contract as [`EngineFactory::create_environment`].
    fn create_controller(
        &self,
        window: WindowTarget,
        done: Completion<Box<dyn EngineController>>,
    ) -> Result<(), EngineError>;
}

/// A created controller owning one running engine resource.
pub trait EngineController: Send {
    /// The resource this controller manages.
    fn instance(&self) -> Result<Box<dyn EngineInstance>, EngineError>;
}

/// A running engine resource.
pub trait EngineInstance: Send {
    /// Identifier of the OS process hosting the resource; non-zero for a
    /// live resource. Hosts use it to confirm creation succeeded and to
    /// detect process coalescing across controllers.
    fn host_process_id(&self) -> Result<u32, EngineError>;
}
