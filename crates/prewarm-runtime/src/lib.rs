#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unsafe_code)]

pub mod controller;
pub mod fake;
pub mod gate;
pub mod process;
pub mod store;

mod worker;

// Re-export the facade a host embeds
pub use controller::PrelaunchController;

// Re-export the readiness primitive for hosts layering their own waits
pub use gate::ReadinessGate;

// Re-export the argument-cache entry points for direct access
pub use store::{StoreError, read_arguments, write_arguments};

// Re-export the system process-wait adapter
pub use process::SystemProcessWaiter;

// Re-export the in-process fake collaborator used by tests and demos
pub use fake::{CompletionMode, FakeEngine, FakeEngineConfig};
