//! Schedule — how load intensity changes over time
//!
//! A schedule is an ordered list of [`Segment`]s. Each segment holds a target
//! (requests per rate-limit unit for [`LoadType::Rps`](crate::LoadType::Rps),
//! concurrent virtual users for [`LoadType::Vu`](crate::LoadType::Vu)) for a
//! fixed duration. Segments are walked strictly in order; there is no
//! interpolation between them, a ramp is expressed as a series of steps:
//!
//! ```text
//! steps(10, 10, 4, 40s)
//!
//!  40 |                  ┌──────
//!  30 |           ┌──────┘
//!  20 |    ┌──────┘
//!  10 |────┘
//!     └────┴──────┴──────┴──────> t
//!     0   10s    20s    30s   40s
//! ```
//!
//! All helpers are pure: identical inputs always build identical schedules.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One piece of a schedule: a target held for `duration`.
///
/// Use `Segment::new(100, Duration::from_secs(10))` to hold 100 RPS (or 100
/// virtual users) for 10s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Target rate or virtual user count for the whole segment.
    pub from: i64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl Segment {
    pub fn new(from: i64, duration: Duration) -> Self {
        Self { from, duration }
    }

    /// Checks the segment invariants: `from > 0` and a non-zero duration.
    pub fn validate(&self) -> Result<()> {
        if self.from <= 0 {
            return Err(Error::InvalidStartFrom);
        }
        if self.duration.is_zero() {
            return Err(Error::InvalidSegmentDuration);
        }
        Ok(())
    }
}

/// A single segment holding `from` for `duration`.
pub fn plain(from: i64, duration: Duration) -> Vec<Segment> {
    vec![Segment::new(from, duration)]
}

/// `steps` segments splitting `total` evenly, each one `increase` above the
/// previous. A negative `increase` ramps down.
///
/// The integer division remainder of `total / steps` is dropped.
pub fn steps(from: i64, increase: i64, steps: u32, total: Duration) -> Vec<Segment> {
    if steps == 0 {
        return Vec::new();
    }
    let step_duration = total / steps;
    (0..steps as i64)
        .map(|i| Segment::new(from + increase * i, step_duration))
        .collect()
}

/// Concatenates schedules in order.
pub fn combine<I>(schedules: I) -> Vec<Segment>
where
    I: IntoIterator<Item = Vec<Segment>>,
{
    schedules.into_iter().flatten().collect()
}

/// Concatenates schedules and repeats the whole pattern `times` times.
///
/// # Panics
///
/// Panics when no schedules are given: a repeated empty pattern is always a
/// misconfiguration.
pub fn combine_and_repeat(times: usize, schedules: &[Vec<Segment>]) -> Vec<Segment> {
    assert!(
        !schedules.is_empty(),
        "combine_and_repeat: {}",
        Error::NoSchedule
    );
    let pattern: Vec<Segment> = schedules.iter().flatten().copied().collect();
    let mut out = Vec::with_capacity(pattern.len() * times);
    for _ in 0..times {
        out.extend_from_slice(&pattern);
    }
    out
}

/// Sum of all segment durations, the lifetime of a run.
pub fn total_duration(schedule: &[Segment]) -> Duration {
    schedule.iter().map(|s| s.duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_non_positive_from() {
        for from in [0, -1, i64::MIN] {
            let err = Segment::new(from, Duration::from_secs(1))
                .validate()
                .unwrap_err();
            assert!(matches!(err, Error::InvalidStartFrom));
        }
    }

    #[test]
    fn validate_rejects_zero_duration() {
        let err = Segment::new(1, Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidSegmentDuration));
    }

    #[test]
    fn plain_is_a_single_segment() {
        assert_eq!(
            plain(5, Duration::from_secs(3)),
            vec![Segment::new(5, Duration::from_secs(3))]
        );
    }

    #[test]
    fn steps_form_an_arithmetic_progression() {
        let s = steps(10, 5, 4, Duration::from_secs(40));
        assert_eq!(s.len(), 4);
        let froms: Vec<i64> = s.iter().map(|s| s.from).collect();
        assert_eq!(froms, vec![10, 15, 20, 25]);
        assert!(s.iter().all(|s| s.duration == Duration::from_secs(10)));
        assert_eq!(total_duration(&s), Duration::from_secs(40));
    }

    #[test]
    fn steps_can_ramp_down() {
        let s = steps(10, -1, 10, Duration::from_millis(1000));
        assert_eq!(s.first().map(|s| s.from), Some(10));
        assert_eq!(s.last().map(|s| s.from), Some(1));
        assert!(s.iter().all(|s| s.validate().is_ok()));
    }

    #[test]
    fn steps_drop_division_remainder() {
        let s = steps(1, 1, 3, Duration::from_nanos(10));
        assert_eq!(s.len(), 3);
        assert_eq!(total_duration(&s), Duration::from_nanos(9));
    }

    #[test]
    fn zero_steps_is_empty() {
        assert!(steps(1, 1, 0, Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn combine_keeps_order() {
        let s = combine([
            plain(1, Duration::from_secs(5)),
            steps(2, 1, 2, Duration::from_secs(2)),
        ]);
        let froms: Vec<i64> = s.iter().map(|s| s.from).collect();
        assert_eq!(froms, vec![1, 2, 3]);
    }

    #[test]
    fn combine_and_repeat_repeats_the_whole_pattern() {
        let a = plain(1, Duration::from_secs(1));
        let b = steps(5, 5, 2, Duration::from_secs(2));
        let s = combine_and_repeat(3, &[a, b]);
        assert_eq!(s.len(), 3 * (1 + 2));
        let froms: Vec<i64> = s.iter().map(|s| s.from).collect();
        assert_eq!(froms, vec![1, 5, 10, 1, 5, 10, 1, 5, 10]);
    }

    #[test]
    fn combine_and_repeat_zero_times_is_empty() {
        assert!(combine_and_repeat(0, &[plain(1, Duration::from_secs(1))]).is_empty());
    }

    #[test]
    #[should_panic(expected = "no schedule segments")]
    fn combine_and_repeat_without_schedules_panics() {
        combine_and_repeat(2, &[]);
    }

    #[test]
    fn helpers_are_deterministic() {
        let a = combine_and_repeat(2, &[steps(3, 2, 5, Duration::from_secs(7))]);
        let b = combine_and_repeat(2, &[steps(3, 2, 5, Duration::from_secs(7))]);
        assert_eq!(a, b);
    }

    #[test]
    fn segments_deserialize_with_human_durations() {
        let s: Vec<Segment> =
            serde_json::from_str(r#"[{"from": 10, "duration": "1s 500ms"}]"#).unwrap();
        assert_eq!(s, vec![Segment::new(10, Duration::from_millis(1500))]);
    }
}
