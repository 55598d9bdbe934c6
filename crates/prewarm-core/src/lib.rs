#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod args;
pub mod ports;
pub mod telemetry;

// Re-export commonly used types for convenience
pub use args::{ChannelSearchKind, EngineCreationArguments, ReleaseChannels};
pub use ports::{
    Completion, CreationStage, EngineController, EngineEnvironment, EngineError, EngineFactory,
    EngineInstance, EnvironmentOptions, ProcessWaiter, WaitError, WindowTarget,
};
pub use telemetry::{Milestone, PrelaunchTelemetry};
