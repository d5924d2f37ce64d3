use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters of a running generator.
///
/// Every field is independently atomic: the schedule loop, the execution
/// tasks, the collection task and callers polling for progress all touch the
/// same block without a lock.
#[derive(Debug, Default)]
pub struct Stats {
    pub current_rps: AtomicI64,
    /// Rate-limit unit in nanoseconds, set when the run finishes.
    pub current_time_unit: AtomicI64,
    pub current_vus: AtomicI64,
    /// Number of segments in the schedule.
    pub last_segment: AtomicI64,
    /// Number of segments started so far.
    pub current_segment: AtomicI64,
    pub samples_recorded: AtomicI64,
    pub samples_skipped: AtomicI64,
    pub run_started: AtomicBool,
    pub run_paused: AtomicBool,
    pub run_stopped: AtomicBool,
    pub run_failed: AtomicBool,
    pub success: AtomicI64,
    /// Failed responses, timeouts included.
    pub failed: AtomicI64,
    pub call_timeout: AtomicI64,
    /// Scheduled load duration in nanoseconds, set when the run finishes.
    pub duration: AtomicI64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy, the shape streamed to a sink.
    pub fn snapshot(&self, node_id: Option<&str>) -> StatsSnapshot {
        StatsSnapshot {
            node_id: node_id.unwrap_or_default().to_string(),
            current_rps: self.current_rps.load(Ordering::Relaxed),
            current_instances: self.current_vus.load(Ordering::Relaxed),
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            run_stopped: self.run_stopped.load(Ordering::Relaxed),
            run_failed: self.run_failed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            call_timeout: self.call_timeout.load(Ordering::Relaxed),
            load_duration: self.duration.load(Ordering::Relaxed),
            current_time_unit: self.current_time_unit.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`Stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub node_id: String,
    pub current_rps: i64,
    pub current_instances: i64,
    pub samples_recorded: i64,
    pub samples_skipped: i64,
    pub run_stopped: bool,
    pub run_failed: bool,
    pub failed: i64,
    pub success: i64,
    #[serde(rename = "callTimeout")]
    pub call_timeout: i64,
    pub load_duration: i64,
    pub current_time_unit: i64,
}
