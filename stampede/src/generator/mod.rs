//! Generator — one schedule driven against one attack implementation
//!
//! A [`Generator`] owns three kinds of tasks:
//!
//! - the **schedule loop** walks the segments and reconfigures the active
//!   strategy (a new rate limiter, or more/fewer virtual users);
//! - **execution tasks** perform the calls (the gun loop and one task per
//!   paced call, or one worker per virtual user);
//! - the **collection task** drains every response through one queue into
//!   the sampler, the stats and the result buffers, and forwards retained
//!   responses to the sink.
//!
//! A run-scoped [`CancellationToken`] ends the execution side: it fires when
//! the schedule's total duration elapses, on [`Generator::stop`], on the
//! first error with `fail_on_err`, or when the sink fails.
//! [`Generator::wait`] first joins the execution side, then stops and drains
//! the collection side, so the returned data is complete.
//!
//! # Example
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{Config, Generator, LoadType, MockGun, MockGunConfig, schedule};
//!
//! #[tokio::main]
//! async fn main() -> stampede::Result<()> {
//!     let generator = Generator::new(
//!         Config::builder()
//!             .load_type(LoadType::Rps)
//!             .schedule(schedule::plain(10, Duration::from_millis(300)))
//!             .gun(Arc::new(MockGun::new(MockGunConfig::default())))
//!             .build(),
//!     )?;
//!     let result = generator.run_and_wait().await;
//!     assert!(!result.failed);
//!     Ok(())
//! }
//! ```
mod collect;
mod rps;
mod vu;


use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, OnceCell, mpsc},
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, Span};

use crate::{
    attack::CallContext,
    config::{Config, LoadType},
    error::Result,
    ratelimit::RateLimiter,
    response::{Response, ResponseData},
    schedule::total_duration,
    stats::Stats,
};

#[cfg(feature = "internals")]
pub use collect::Collector;
#[cfg(not(feature = "internals"))]
use collect::Collector;
pub use collect::SINK_BUFFER_LEN;

/// Capacity of the queue every response travels through.
pub const RESPONSES_BUFFER_LEN: usize = 10_000;

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub data: Arc<ResponseData>,
    /// True if any call failed or timed out, or the run was stopped.
    pub failed: bool,
}

/// Handle to a load generator. Cloning is cheap and every clone controls the
/// same run.
#[derive(Clone)]
pub struct Generator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    cfg: Config,
    stats: Arc<Stats>,
    collector: Collector,
    span: Span,
    ctx: CallContext,
    receiver: Mutex<Option<mpsc::Receiver<Response>>>,
    /// Ends the execution side.
    run: CancellationToken,
    /// Ends the collection side once execution is over.
    data_stop: CancellationToken,
    /// Fired by the collection task after its final drain.
    collected: CancellationToken,
    responses: TaskTracker,
    data_tasks: TaskTracker,
    limiter: ArcSwapOption<RateLimiter>,
    limiter_changed: Notify,
    launched: AtomicBool,
    result: OnceCell<RunResult>,
}

impl Generator {
    /// Validates `cfg` and builds an idle generator.
    pub fn new(mut cfg: Config) -> Result<Self> {
        cfg.validate()?;

        let span = tracing::info_span!("generator", name = %cfg.gen_name);
        let stats = Arc::new(Stats::new());
        stats
            .last_segment
            .store(cfg.schedule.len() as i64, Ordering::Relaxed);
        let run = CancellationToken::new();
        let (tx, rx) = mpsc::channel(RESPONSES_BUFFER_LEN);
        let ctx = CallContext::new(
            cfg.gen_name.clone(),
            cfg.shared_data.clone(),
            tx,
            run.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                collector: Collector::new(&cfg, stats.clone(), run.clone()),
                cfg,
                stats,
                span,
                ctx,
                receiver: Mutex::new(Some(rx)),
                run,
                data_stop: CancellationToken::new(),
                collected: CancellationToken::new(),
                responses: TaskTracker::new(),
                data_tasks: TaskTracker::new(),
                limiter: ArcSwapOption::empty(),
                limiter_changed: Notify::new(),
                launched: AtomicBool::new(false),
                result: OnceCell::new(),
            }),
        })
    }

    /// Starts the run without waiting for it. Must be called inside a tokio
    /// runtime. Only the first call has an effect.
    pub fn run(&self) {
        let inner = &self.inner;
        let _guard = inner.span.enter();
        if inner.launched.swap(true, Ordering::AcqRel) {
            tracing::warn!("generator already started");
            return;
        }
        let Some(rx) = inner.receiver.lock().take() else {
            return;
        };

        let total = total_duration(&inner.cfg.schedule);
        inner.stats.run_started.store(true, Ordering::Relaxed);
        tracing::info!(load_type = ?inner.cfg.load_type, duration = ?total, "starting generator");

        let span = inner.span.clone();
        let run = inner.run.clone();
        inner.responses.spawn(
            async move {
                tokio::select! {
                    _ = sleep(total) => tracing::info!("load duration elapsed"),
                    _ = run.cancelled() => {}
                }
                run.cancel();
            }
            .instrument(span.clone()),
        );

        let sink_tx = inner.cfg.sink.clone().map(|sink| {
            let (tx, rx) = mpsc::channel(SINK_BUFFER_LEN);
            inner.data_tasks.spawn(
                collect::stream_responses(inner.clone(), sink.clone(), rx)
                    .instrument(span.clone()),
            );
            inner
                .data_tasks
                .spawn(collect::stream_stats(inner.clone(), sink).instrument(span.clone()));
            tx
        });
        inner
            .data_tasks
            .spawn(collect::collect(inner.clone(), rx, sink_tx).instrument(span.clone()));
        inner
            .responses
            .spawn(collect::log_stats(inner.clone()).instrument(span.clone()));

        match inner.cfg.load_type {
            Some(LoadType::Rps) => {
                inner
                    .responses
                    .spawn(rps::run_schedule(inner.clone()).instrument(span));
            }
            Some(LoadType::Vu) => {
                inner
                    .responses
                    .spawn(vu::run_schedule(inner.clone()).instrument(span));
            }
            None => {}
        }
    }

    /// Starts the run and waits for it to finish.
    pub async fn run_and_wait(&self) -> RunResult {
        self.run();
        self.wait().await
    }

    /// Waits until the run is over and every response has been collected.
    pub async fn wait(&self) -> RunResult {
        let inner = self.inner.clone();
        self.inner
            .result
            .get_or_init(|| inner.finish())
            .await
            .clone()
    }

    /// Cancels the run and waits for it to drain. The run is marked failed.
    /// Calling it again returns the same result.
    ///
    /// On a generator that already finished this returns the finished result
    /// as is: neither `run_stopped` nor `failed` is set.
    pub async fn stop(&self) -> RunResult {
        if let Some(result) = self.inner.result.get() {
            return result.clone();
        }
        if !self.inner.stats.run_stopped.swap(true, Ordering::AcqRel) {
            self.inner.stats.run_failed.store(true, Ordering::Relaxed);
            tracing::warn!(parent: &self.inner.span, "graceful stop");
            self.inner.run.cancel();
        }
        self.wait().await
    }

    /// Execution keeps its pace (slots are dropped, sessions stay open) but
    /// issues no calls until [`Generator::resume`].
    pub fn pause(&self) {
        tracing::warn!(parent: &self.inner.span, "generator was paused");
        self.inner.stats.run_paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        tracing::warn!(parent: &self.inner.span, "generator was resumed");
        self.inner.stats.run_paused.store(false, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.inner.cfg.gen_name
    }

    /// The validated configuration, defaults applied.
    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    pub fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    /// Retained samples; complete once [`Generator::wait`] returned.
    pub fn data(&self) -> Arc<ResponseData> {
        self.inner.collector.data()
    }

    /// Error messages of retained failures, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.inner.collector.errors()
    }
}

impl Inner {
    async fn finish(self: Arc<Self>) -> RunResult {
        // a generator waited on before it ran never starts
        self.launched.store(true, Ordering::Release);

        tracing::info!(parent: &self.span, "waiting for all responses to finish");
        self.responses.close();
        self.responses.wait().await;

        let stats = &self.stats;
        stats.duration.store(
            nanos(total_duration(&self.cfg.schedule)),
            Ordering::Relaxed,
        );
        stats.current_time_unit.store(
            nanos(self.cfg.rate_limit_unit_duration),
            Ordering::Relaxed,
        );

        self.data_stop.cancel();
        self.data_tasks.close();
        self.data_tasks.wait().await;
        if let Some(sink) = &self.cfg.sink {
            sink.close().await;
        }

        let failed = stats.run_failed.load(Ordering::Relaxed);
        tracing::info!(
            parent: &self.span,
            success = stats.success.load(Ordering::Relaxed),
            failed = stats.failed.load(Ordering::Relaxed),
            timeouts = stats.call_timeout.load(Ordering::Relaxed),
            run_failed = failed,
            "generator finished"
        );
        RunResult {
            data: self.collector.data(),
            failed,
        }
    }
}

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}
