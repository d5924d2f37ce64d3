use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    time::{Instant, interval_at},
};
use tokio_util::sync::CancellationToken;

use super::Inner;
use crate::{
    buffer::SliceBuffer,
    config::Config,
    error::{BoxError, Error},
    response::{Response, ResponseData},
    sampler::Sampler,
    sink::{LABEL_CALL_GROUP, LABEL_DATA_TYPE, LABEL_GEN_NAME, Labels, Sink, merge_labels},
    stats::Stats,
};

/// Capacity of the queue between the collection task and the sink.
pub const SINK_BUFFER_LEN: usize = 50_000;

/// Turns finished responses into stats, retained samples and errors.
///
/// Only the collection task calls [`Collector::store`]; the buffers it fills
/// are read once the generator has finished.
pub struct Collector {
    stats: Arc<Stats>,
    data: Arc<ResponseData>,
    errors: Mutex<SliceBuffer<String>>,
    sampler: Sampler,
    call_timeout: Duration,
    fail_on_err: bool,
    run: CancellationToken,
}

impl Collector {
    pub fn new(cfg: &Config, stats: Arc<Stats>, run: CancellationToken) -> Self {
        Self {
            stats,
            data: Arc::new(ResponseData::new(cfg.call_result_buf_len)),
            errors: Mutex::new(SliceBuffer::new(cfg.call_result_buf_len)),
            sampler: Sampler::new(cfg.sampler),
            call_timeout: cfg.call_timeout,
            fail_on_err: cfg.fail_on_err,
            run,
        }
    }

    /// Records one response. Returns it back when it was retained.
    ///
    /// A response slower than the call timeout that is not flagged as a
    /// timeout is dropped: the timed-out twin of the same call was already
    /// reported.
    pub fn store(&self, mut res: Response) -> Option<Arc<Response>> {
        let now = Instant::now();
        if res.duration.is_zero() {
            if let Some(started) = res.started_at {
                res.duration = now.saturating_duration_since(started);
            }
        }
        res.finished_at.get_or_insert(now);

        if res.duration > self.call_timeout && !res.timeout {
            tracing::debug!(duration = ?res.duration, "late response discarded");
            return None;
        }
        if !self.sampler.should_record(&res, &self.stats) {
            return None;
        }

        let res = Arc::new(res);
        if res.failed {
            self.stats.run_failed.store(true, Ordering::Relaxed);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            self.errors.lock().append(res.error.clone());
            self.data.push_failed(res.clone());
            tracing::error!(error = %res.error, "load generator request failed");
        } else if res.timeout {
            self.stats.run_failed.store(true, Ordering::Relaxed);
            self.stats.call_timeout.fetch_add(1, Ordering::Relaxed);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            self.errors.lock().append(res.error.clone());
            self.data.push_failed(res.clone());
            tracing::error!(error = %res.error, "load generator request timed out");
        } else {
            self.stats.success.fetch_add(1, Ordering::Relaxed);
            self.data.push_ok(res.clone());
        }

        if self.fail_on_err
            && !self.run.is_cancelled()
            && (self.stats.failed.load(Ordering::Relaxed) > 0
                || self.stats.call_timeout.load(Ordering::Relaxed) > 0)
        {
            tracing::warn!("generator has stopped on first error");
            self.run.cancel();
        }
        Some(res)
    }

    pub fn data(&self) -> Arc<ResponseData> {
        self.data.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().to_vec()
    }
}

/// Drains the response queue until the data tasks are told to stop, then
/// empties whatever is left.
pub(super) async fn collect(
    inner: Arc<Inner>,
    mut rx: mpsc::Receiver<Response>,
    sink_tx: Option<mpsc::Sender<Arc<Response>>>,
) {
    let forward = |res: Option<Arc<Response>>| {
        if let (Some(res), Some(tx)) = (res, sink_tx.as_ref()) {
            if tx.try_send(res).is_err() {
                tracing::debug!("sink queue full or closed, response not streamed");
            }
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = inner.data_stop.cancelled() => break,
            Some(res) = rx.recv() => forward(inner.collector.store(res)),
        }
    }
    while let Ok(res) = rx.try_recv() {
        forward(inner.collector.store(res));
    }
    inner.collected.cancel();
    tracing::debug!("collect data exited");
}

/// Streams retained responses until the collection task hangs up.
pub(super) async fn stream_responses(
    inner: Arc<Inner>,
    sink: Arc<dyn Sink>,
    mut rx: mpsc::Receiver<Arc<Response>>,
) {
    let base = base_labels(&inner.cfg);
    while let Some(res) = rx.recv().await {
        let labels = merge_labels(
            &base,
            [(LABEL_DATA_TYPE, "responses"), (LABEL_CALL_GROUP, res.group.as_str())],
        );
        let ts = res.finished_at.map_or_else(Utc::now, wall_clock);
        let payload = match serde_json::to_value(&*res) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, "response is not serializable, skipped");
                continue;
            }
        };
        if let Err(err) = sink.send(&labels, ts, payload).await {
            inner.sink_failed(err);
            return;
        }
    }
}

/// Streams a stats snapshot every poll interval and a last one once every
/// response has been collected.
pub(super) async fn stream_stats(inner: Arc<Inner>, sink: Arc<dyn Sink>) {
    let labels = merge_labels(&base_labels(&inner.cfg), [(LABEL_DATA_TYPE, "stats")]);
    let poll = inner.cfg.stats_poll_interval;
    let mut ticker = interval_at(Instant::now() + poll, poll);
    loop {
        let last = tokio::select! {
            _ = inner.collected.cancelled() => true,
            _ = ticker.tick() => false,
        };
        if let Err(err) = send_stats(&inner, sink.as_ref(), &labels).await {
            inner.sink_failed(err);
            return;
        }
        if last {
            return;
        }
    }
}

async fn send_stats(inner: &Inner, sink: &dyn Sink, labels: &Labels) -> Result<(), BoxError> {
    let snapshot = inner.stats.snapshot(inner.cfg.node_id.as_deref());
    sink.send(labels, Utc::now(), serde_json::to_value(snapshot)?)
        .await
}

/// Logs progress every poll interval while the run is live.
pub(super) async fn log_stats(inner: Arc<Inner>) {
    let poll = inner.cfg.stats_poll_interval;
    let mut ticker = interval_at(Instant::now() + poll, poll);
    loop {
        tokio::select! {
            _ = inner.run.cancelled() => return,
            _ = ticker.tick() => {
                let stats = &inner.stats;
                tracing::info!(
                    success = stats.success.load(Ordering::Relaxed),
                    failed = stats.failed.load(Ordering::Relaxed),
                    timeouts = stats.call_timeout.load(Ordering::Relaxed),
                    rps = stats.current_rps.load(Ordering::Relaxed),
                    vus = stats.current_vus.load(Ordering::Relaxed),
                    "load stats"
                );
            }
        }
    }
}

fn base_labels(cfg: &Config) -> Labels {
    merge_labels(&cfg.labels, [(LABEL_GEN_NAME, cfg.gen_name.as_str())])
}

/// Maps a monotonic instant in the past onto the wall clock.
fn wall_clock(at: Instant) -> DateTime<Utc> {
    Utc::now() - TimeDelta::from_std(at.elapsed()).unwrap_or(TimeDelta::zero())
}

impl Inner {
    /// A sink that cannot take data ends the run.
    pub(super) fn sink_failed(&self, err: BoxError) {
        let err = Error::Sink(err);
        tracing::error!(%err, "stopping generator");
        self.stats.run_stopped.store(true, Ordering::Relaxed);
        self.stats.run_failed.store(true, Ordering::Relaxed);
        self.run.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoadType, sampler::SamplerConfig, schedule};

    fn collector(cfg: Config) -> (Collector, CancellationToken) {
        let run = CancellationToken::new();
        (Collector::new(&cfg, Arc::new(Stats::new()), run.clone()), run)
    }

    fn config() -> Config {
        Config::builder()
            .load_type(LoadType::Rps)
            .schedule(schedule::plain(1, Duration::from_secs(1)))
            .call_timeout(Duration::from_millis(100))
            .call_result_buf_len(10)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn duration_is_measured_from_start() {
        let (c, _) = collector(config());
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(30)).await;
        let res = c
            .store(Response::ok("x").with_started_at(started))
            .unwrap();
        assert_eq!(res.duration, Duration::from_millis(30));
        assert!(res.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_responses_are_discarded_unless_timed_out() {
        let (c, _) = collector(config());
        let slow = Response {
            duration: Duration::from_millis(150),
            ..Response::ok("late")
        };
        assert!(c.store(slow).is_none());

        let timed_out = Response {
            duration: Duration::from_millis(150),
            ..Response::timed_out(Error::CallTimeout.to_string())
        };
        assert!(c.store(timed_out).is_some());
        assert_eq!(c.stats.call_timeout.load(Ordering::Relaxed), 1);
        assert_eq!(c.stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(c.errors(), vec!["generator request call timeout"]);
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_update_stats_and_buffers() {
        let (c, _) = collector(config());
        c.store(Response::ok("a"));
        c.store(Response::ok("b"));
        c.store(Response::failed("boom"));

        assert_eq!(c.stats.success.load(Ordering::Relaxed), 2);
        assert_eq!(c.stats.failed.load(Ordering::Relaxed), 1);
        assert!(c.stats.run_failed.load(Ordering::Relaxed));
        assert_eq!(
            c.data.ok_data(),
            vec![serde_json::Value::from("a"), serde_json::Value::from("b")]
        );
        assert_eq!(c.data.fail_responses().len(), 1);
        assert_eq!(c.errors(), vec!["boom"]);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_samples_are_not_counted() {
        let cfg = Config {
            sampler: SamplerConfig {
                successful_call_result_record_ratio: 0,
            },
            ..config()
        };
        let (c, _) = collector(cfg);
        assert!(c.store(Response::ok("a")).is_none());
        assert_eq!(c.stats.success.load(Ordering::Relaxed), 0);
        assert_eq!(c.stats.samples_skipped.load(Ordering::Relaxed), 1);
        assert!(c.data.ok_responses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_on_err_cancels_the_run() {
        let (c, run) = collector(Config {
            fail_on_err: true,
            ..config()
        });
        c.store(Response::ok("a"));
        assert!(!run.is_cancelled());
        c.store(Response::failed("boom"));
        assert!(run.is_cancelled());
    }

    #[test]
    fn gen_name_is_always_labelled() {
        let mut cfg = config();
        cfg.gen_name = "api".into();
        cfg.labels.insert("branch".into(), "main".into());
        let labels = base_labels(&cfg);
        assert_eq!(labels[LABEL_GEN_NAME], "api");
        assert_eq!(labels["branch"], "main");
    }
}
