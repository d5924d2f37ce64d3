use std::sync::atomic::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    response::Response,
    stats::Stats,
};

/// How many successful responses are kept in memory and streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Percentage (0..=100) of successful responses to record.
    pub successful_call_result_record_ratio: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            successful_call_result_record_ratio: 100,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.successful_call_result_record_ratio > 100 {
            return Err(Error::InvalidSamplerRatio(
                self.successful_call_result_record_ratio,
            ));
        }
        Ok(())
    }
}

/// Decides which responses are retained.
///
/// Failures and timeouts are always recorded; successes are recorded at the
/// configured ratio. Every decision bumps either `samples_recorded` or
/// `samples_skipped`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sampler {
    cfg: SamplerConfig,
}

impl Sampler {
    pub fn new(cfg: SamplerConfig) -> Self {
        Self { cfg }
    }

    pub fn should_record(&self, res: &Response, stats: &Stats) -> bool {
        let record = if res.is_error() {
            true
        } else {
            match self.cfg.successful_call_result_record_ratio {
                0 => false,
                100.. => true,
                ratio => rand::thread_rng().gen_range(0..100u8) < ratio,
            }
        };
        if record {
            stats.samples_recorded.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.samples_skipped.fetch_add(1, Ordering::Relaxed);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIALS: i64 = 10_000;

    fn sampler(ratio: u8) -> Sampler {
        Sampler::new(SamplerConfig {
            successful_call_result_record_ratio: ratio,
        })
    }

    fn run_trials(s: &Sampler, res: &Response, stats: &Stats) -> i64 {
        (0..TRIALS).filter(|_| s.should_record(res, stats)).count() as i64
    }

    #[test]
    fn ratio_100_records_every_success() {
        let stats = Stats::new();
        let recorded = run_trials(&sampler(100), &Response::ok("x"), &stats);
        assert_eq!(recorded, TRIALS);
        assert_eq!(stats.samples_recorded.load(Ordering::Relaxed), TRIALS);
        assert_eq!(stats.samples_skipped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn ratio_0_skips_every_success() {
        let stats = Stats::new();
        let recorded = run_trials(&sampler(0), &Response::ok("x"), &stats);
        assert_eq!(recorded, 0);
        assert_eq!(stats.samples_skipped.load(Ordering::Relaxed), TRIALS);
    }

    #[test]
    fn errors_are_always_recorded() {
        let s = sampler(0);
        let stats = Stats::new();
        for res in [
            Response::failed("boom"),
            Response::timed_out("slow"),
            Response {
                error: "odd".into(),
                ..Default::default()
            },
        ] {
            assert_eq!(run_trials(&s, &res, &stats), TRIALS);
        }
        assert_eq!(stats.samples_recorded.load(Ordering::Relaxed), 3 * TRIALS);
    }

    #[test]
    fn partial_ratio_is_roughly_honoured() {
        let stats = Stats::new();
        let recorded = run_trials(&sampler(50), &Response::ok("x"), &stats);
        assert!((4_000..=6_000).contains(&recorded), "recorded {recorded}");
        assert_eq!(
            stats.samples_recorded.load(Ordering::Relaxed)
                + stats.samples_skipped.load(Ordering::Relaxed),
            TRIALS
        );
    }

    #[test]
    fn ratio_over_100_is_rejected() {
        let err = SamplerConfig {
            successful_call_result_record_ratio: 101,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSamplerRatio(101)));
    }
}
