use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by the external collaborators (guns, virtual users,
/// sinks, annotators, barriers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias bound to the crate error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while configuring or running a load test.
///
/// Configuration errors are returned from [`Generator::new`](crate::Generator::new)
/// and prevent the generator from starting. Per-operation errors never escape
/// the engine as `Err`: they are rendered into [`Response::error`](crate::Response)
/// and flow through the same collection path as successful calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither a gun nor a virtual user was configured.
    #[error("either \"gun\" or \"vu\" implementation must be provided")]
    NoImpl,
    /// The schedule has no segments.
    #[error("no schedule segments were provided")]
    NoSchedule,
    /// No load type was chosen.
    #[error("schedule type must be either of LoadType::Rps or LoadType::Vu")]
    InvalidScheduleType,
    /// RPS load was selected without a gun.
    #[error("rps load schedule selected but gun implementation is missing")]
    NoGun,
    /// VU load was selected without a virtual user template.
    #[error("vu load schedule selected but vu implementation is missing")]
    NoVu,
    /// A segment starts from zero or a negative value.
    #[error("from must be > 0")]
    InvalidStartFrom,
    /// A segment has a zero duration.
    #[error("segment duration must be defined")]
    InvalidSegmentDuration,
    /// A label name is not `[a-zA-Z_][a-zA-Z0-9_]*`.
    #[error("invalid label name `{0}`, labels should be [a-z][A-Z][0-9] and _")]
    InvalidLabels(String),
    /// The sampler ratio is outside `0..=100`.
    #[error("successful call result record ratio must be in 0..=100, got {0}")]
    InvalidSamplerRatio(u8),

    /// A call did not finish within the call timeout.
    #[error("generator request call timeout")]
    CallTimeout,
    /// A virtual user setup did not finish within the setup timeout.
    #[error("generator request setup timeout")]
    SetupTimeout,
    /// A virtual user setup returned an error.
    #[error("generator request setup error: {0}")]
    Setup(String),
    /// A virtual user teardown did not finish within the teardown timeout.
    #[error("generator request teardown timeout")]
    TeardownTimeout,
    /// A virtual user teardown returned an error.
    #[error("generator request teardown error: {0}")]
    Teardown(String),
    /// The task running a call panicked.
    #[error("generator request call panicked: {0}")]
    CallPanicked(String),

    /// The results sink rejected data; the run cannot be observed anymore.
    #[error("failed to send data to sink: {0}")]
    Sink(#[source] BoxError),
    /// The distributed join barrier failed or never became ready.
    #[error("sync barrier failed: {0}")]
    SyncBarrier(#[source] BoxError),
    /// A generator of the profile could not be built.
    #[error("profile failed to bootstrap: {0}")]
    Bootstrap(#[source] Arc<Error>),
}

impl Error {
    /// True for errors that are detected before a generator starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::NoImpl
                | Error::NoSchedule
                | Error::InvalidScheduleType
                | Error::NoGun
                | Error::NoVu
                | Error::InvalidStartFrom
                | Error::InvalidSegmentDuration
                | Error::InvalidLabels(_)
                | Error::InvalidSamplerRatio(_)
        ) || matches!(self, Error::Bootstrap(err) if err.is_configuration())
    }
}
