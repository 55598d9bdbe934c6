//! Port definitions consumed by the runtime.
//!
//! Ports are the seams where the pre-launch core meets the outside world:
//! the engine-creation collaborator and the platform's process-lifetime
//! facility. Adapters live in `prewarm-runtime`; tests inject fakes.

pub mod engine;
pub mod process;

pub use engine::{
    Completion, CreationStage, EngineController, EngineEnvironment, EngineError, EngineFactory,
    EngineInstance, EnvironmentOptions, WindowTarget,
};
pub use process::{ProcessWaiter, WaitError};
