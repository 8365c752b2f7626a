//! Stage-level progress reporting for pipeline runs.
//!
//! A run advances one step per [`Stage`]. Rendering is left to the caller
//! through [`ProgressCallback`]: an `indicatif` bar in the CLI, nothing in
//! tests.

use std::sync::Arc;

/// Receiver of stage updates from a run. Shared behind an [`Arc`].
pub trait ProgressCallback: Send + Sync {
    /// Number of stages the run will go through.
    fn set_total(&self, total: u64);

    /// Index of the stage now running.
    fn set_position(&self, pos: u64);

    /// Label of the stage now running.
    fn set_message(&self, msg: String);

    /// The run completed; `msg` summarizes it.
    fn finish(&self, msg: String);

    /// The work is over and nothing should stay on screen.
    fn finish_and_clear(&self);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Load,
    Clean,
    VehicleTypes,
    Facts,
    Hourly,
    DayOfWeek,
    ContributingFactors,
    Season,
}

impl Stage {
    pub const ALL: &[Self] = &[
        Self::Load,
        Self::Clean,
        Self::VehicleTypes,
        Self::Facts,
        Self::Hourly,
        Self::DayOfWeek,
        Self::ContributingFactors,
        Self::Season,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Load => "Loading source",
            Self::Clean => "Cleaning records",
            Self::VehicleTypes => "Counting vehicle types",
            Self::Facts => "Writing fact table",
            Self::Hourly => "Counting crashes per hour",
            Self::DayOfWeek => "Counting crashes per weekday",
            Self::ContributingFactors => "Aggregating contributing factors",
            Self::Season => "Rolling up seasons",
        }
    }

    /// Zero-based position of the stage in [`Stage::ALL`].
    #[must_use]
    pub const fn index(self) -> u64 {
        self as u64
    }

    /// Number of stages in a run.
    #[must_use]
    pub const fn count() -> u64 {
        Self::Season.index() + 1
    }
}

/// Moves `progress` to the start of `stage` and logs the transition.
pub fn enter(progress: &Arc<dyn ProgressCallback>, stage: Stage) {
    log::info!("{}...", stage.label());
    progress.set_position(stage.index());
    progress.set_message(stage.label().to_string());
}
