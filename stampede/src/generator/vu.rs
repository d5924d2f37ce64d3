//! [`LoadType::Vu`](crate::LoadType::Vu): a pool of sequential sessions.
//!
//! Only the schedule loop touches the active list. Every worker owns one
//! virtual user: setup, then calls until stopped, then teardown.
use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use tokio::time::{Instant, sleep, timeout};
use tracing::{Instrument, Span};

use super::Inner;
use crate::{attack::VirtualUser, error::Error, response::Response};

/// How often a paused worker checks whether it may call again.
const PAUSE_POLL: Duration = Duration::from_millis(10);

pub(super) async fn run_schedule(inner: Arc<Inner>) {
    let Some(template) = inner.cfg.vu.clone() else {
        return;
    };
    let mut active: Vec<Arc<dyn VirtualUser>> = Vec::new();

    for (idx, segment) in inner.cfg.schedule.iter().enumerate() {
        inner
            .stats
            .current_segment
            .store(idx as i64 + 1, Ordering::Relaxed);
        let delta = segment.from - active.len() as i64;
        if delta < 0 {
            let excess = usize::try_from(delta.unsigned_abs())
                .unwrap_or(usize::MAX)
                .min(active.len());
            for vu in active.drain(..excess) {
                vu.stop();
            }
        } else {
            for _ in 0..delta {
                let vu: Arc<dyn VirtualUser> = Arc::from(template.clone_vu());
                inner
                    .responses
                    .spawn(worker(inner.clone(), vu.clone()).instrument(Span::current()));
                active.push(vu);
            }
        }
        inner
            .stats
            .current_vus
            .store(active.len() as i64, Ordering::Relaxed);
        tracing::info!(
            segment = idx,
            vus = active.len(),
            delta,
            duration = ?segment.duration,
            "schedule segment started"
        );

        tokio::select! {
            _ = inner.run.cancelled() => return,
            _ = sleep(segment.duration) => {}
        }
    }
    tracing::info!("finished all schedule segments");
}

async fn worker(inner: Arc<Inner>, vu: Arc<dyn VirtualUser>) {
    if !setup(&inner, &vu).await {
        return;
    }
    let stop = vu.stop_signal();

    loop {
        if inner.stats.run_paused.load(Ordering::Relaxed) {
            tokio::select! {
                _ = inner.run.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = sleep(PAUSE_POLL) => continue,
            }
        }

        let started = Instant::now();
        let call = {
            let (vu, ctx) = (vu.clone(), inner.ctx.clone());
            tokio::spawn(async move { vu.call(&ctx).await }.instrument(Span::current()))
        };
        tokio::select! {
            biased;
            _ = inner.run.cancelled() => break,
            _ = stop.cancelled() => break,
            res = timeout(inner.cfg.call_timeout, call) => match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    let res = Response::failed(Error::CallPanicked(err.to_string()).to_string());
                    inner.ctx.report(res.with_started_at(started)).await;
                }
                Err(_) => {
                    let res = Response::timed_out(Error::CallTimeout.to_string());
                    inner.ctx.report(res.with_started_at(started)).await;
                }
            },
        }
    }

    teardown(&inner, &vu).await;
}

/// Runs setup in its own task. A late result after the timeout is dropped.
async fn setup(inner: &Inner, vu: &Arc<dyn VirtualUser>) -> bool {
    let started = Instant::now();
    let task = {
        let (vu, ctx) = (vu.clone(), inner.ctx.clone());
        tokio::spawn(async move { vu.setup(&ctx).await }.instrument(Span::current()))
    };
    let res = match timeout(inner.cfg.setup_timeout, task).await {
        Ok(Ok(Ok(()))) => return true,
        Ok(Ok(Err(err))) => Response::failed(Error::Setup(err.to_string()).to_string()),
        Ok(Err(err)) => Response::failed(Error::Setup(err.to_string()).to_string()),
        Err(_) => Response::timed_out(Error::SetupTimeout.to_string()),
    };
    inner.ctx.report(res.with_started_at(started)).await;
    false
}

async fn teardown(inner: &Inner, vu: &Arc<dyn VirtualUser>) {
    let started = Instant::now();
    let task = {
        let (vu, ctx) = (vu.clone(), inner.ctx.clone());
        tokio::spawn(async move { vu.teardown(&ctx).await }.instrument(Span::current()))
    };
    let res = match timeout(inner.cfg.teardown_timeout, task).await {
        Ok(Ok(Ok(()))) => return,
        Ok(Ok(Err(err))) => Response::failed(Error::Teardown(err.to_string()).to_string()),
        Ok(Err(err)) => Response::failed(Error::Teardown(err.to_string()).to_string()),
        Err(_) => Response::timed_out(Error::TeardownTimeout.to_string()),
    };
    inner.ctx.report(res.with_started_at(started)).await;
}
