//! Milestone timeline and fault log for one pre-launch run.
//!
//! Offsets are measured from a single launch epoch captured when the
//! controller is created. Background milestones are recorded by the worker
//! thread, foreground milestones by the controller façade; hosts read a
//! cloned snapshot at any time, with background milestones final only once
//! `wait_for_launch` has returned.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Named milestones recorded against the launch epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    BackgroundLaunchStarted,
    ReadCachedArgsCompleted,
    WindowCreated,
    EnvironmentCreated,
    ControllerCreated,
    WaitForLaunchStarted,
    WaitForLaunchCompleted,
    ForegroundReadCachedArgsCompleted,
    CacheArgumentsCompleted,
    CloseStarted,
    WaitForCloseCompleted,
}

impl Milestone {
    /// Stable name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BackgroundLaunchStarted => "background_launch_started",
            Self::ReadCachedArgsCompleted => "read_cached_args_completed",
            Self::WindowCreated => "window_created",
            Self::EnvironmentCreated => "environment_created",
            Self::ControllerCreated => "controller_created",
            Self::WaitForLaunchStarted => "wait_for_launch_started",
            Self::WaitForLaunchCompleted => "wait_for_launch_completed",
            Self::ForegroundReadCachedArgsCompleted => "foreground_read_cached_args_completed",
            Self::CacheArgumentsCompleted => "cache_arguments_completed",
            Self::CloseStarted => "close_started",
            Self::WaitForCloseCompleted => "wait_for_close_completed",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timeline of one pre-launch run.
///
/// Every milestone is a [`Duration`] offset from [`launch_start`]
/// (`Duration::ZERO` = not recorded yet), so a successful run satisfies the
/// causal ordering of the worker's stages. Faults accumulate as readable
/// strings; at most a handful occur per run.
///
/// [`launch_start`]: PrelaunchTelemetry::launch_start
#[derive(Debug, Clone)]
pub struct PrelaunchTelemetry {
    /// Epoch every milestone offset is measured from.
    pub launch_start: Instant,
    pub background_launch_started: Duration,
    pub read_cached_args_completed: Duration,
    pub window_created: Duration,
    pub environment_created: Duration,
    pub controller_created: Duration,
    pub wait_for_launch_started: Duration,
    pub wait_for_launch_completed: Duration,
    pub foreground_read_cached_args_completed: Duration,
    pub cache_arguments_completed: Duration,
    pub close_started: Duration,
    pub wait_for_close_completed: Duration,
    /// Description of every fault captured during the run.
    pub faults: Vec<String>,
}

impl PrelaunchTelemetry {
    /// Start a timeline: `launch_start` = now, every milestone unset.
    #[must_use]
    pub fn started_now() -> Self {
        Self {
            launch_start: Instant::now(),
            background_launch_started: Duration::ZERO,
            read_cached_args_completed: Duration::ZERO,
            window_created: Duration::ZERO,
            environment_created: Duration::ZERO,
            controller_created: Duration::ZERO,
            wait_for_launch_started: Duration::ZERO,
            wait_for_launch_completed: Duration::ZERO,
            foreground_read_cached_args_completed: Duration::ZERO,
            cache_arguments_completed: Duration::ZERO,
            close_started: Duration::ZERO,
            wait_for_close_completed: Duration::ZERO,
            faults: Vec::new(),
        }
    }

    /// Offset of the current moment from the launch epoch.
    #[must_use]
    pub fn since_launch(&self) -> Duration {
        self.launch_start.elapsed()
    }

    /// Record `milestone` at the current offset. Last write wins, though no
    /// caller overwrites in normal operation.
    pub fn record(&mut self, milestone: Milestone) {
        let offset = self.since_launch();
        debug!(milestone = %milestone, offset = ?offset, "milestone recorded");
        let slot = match milestone {
            Milestone::BackgroundLaunchStarted => &mut self.background_launch_started,
            Milestone::ReadCachedArgsCompleted => &mut self.read_cached_args_completed,
            Milestone::WindowCreated => &mut self.window_created,
            Milestone::EnvironmentCreated => &mut self.environment_created,
            Milestone::ControllerCreated => &mut self.controller_created,
            Milestone::WaitForLaunchStarted => &mut self.wait_for_launch_started,
            Milestone::WaitForLaunchCompleted => &mut self.wait_for_launch_completed,
            Milestone::ForegroundReadCachedArgsCompleted => {
                &mut self.foreground_read_cached_args_completed
            }
            Milestone::CacheArgumentsCompleted => &mut self.cache_arguments_completed,
            Milestone::CloseStarted => &mut self.close_started,
            Milestone::WaitForCloseCompleted => &mut self.wait_for_close_completed,
        };
        *slot = offset;
    }

    /// Append a fault description. Never fails; growth is unbounded because
    /// a run produces faults only in small numbers.
    pub fn record_fault(&mut self, description: impl Into<String>) {
        let description = description.into();
        warn!(fault = %description, "pre-launch fault recorded");
        self.faults.push(description);
    }
}
