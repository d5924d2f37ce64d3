//! [`LoadType::Rps`](crate::LoadType::Rps): paced independent calls.
//!
//! The schedule loop installs a fresh [`RateLimiter`] for every segment. A
//! single gun loop takes slots from whichever limiter is current and fires
//! one call per slot in its own task, so a slow call never delays the next
//! slot.
use std::sync::{Arc, atomic::Ordering};

use tokio::time::{Instant, sleep, timeout};
use tracing::{Instrument, Span};

use super::Inner;
use crate::{attack::Gun, error::Error, ratelimit::RateLimiter, response::Response};

pub(super) async fn run_schedule(inner: Arc<Inner>) {
    let Some(gun) = inner.cfg.gun.clone() else {
        return;
    };
    let unit = inner.cfg.rate_limit_unit_duration;
    let mut firing = false;

    for (idx, segment) in inner.cfg.schedule.iter().enumerate() {
        inner
            .stats
            .current_segment
            .store(idx as i64 + 1, Ordering::Relaxed);
        inner
            .limiter
            .store(Some(Arc::new(RateLimiter::new(segment.from, unit))));
        inner.limiter_changed.notify_waiters();
        inner.stats.current_rps.store(segment.from, Ordering::Relaxed);
        tracing::info!(
            segment = idx,
            rps = segment.from,
            duration = ?segment.duration,
            "schedule segment started"
        );

        if !firing {
            inner
                .responses
                .spawn(gun_loop(inner.clone(), gun.clone()).instrument(Span::current()));
            firing = true;
        }

        tokio::select! {
            _ = inner.run.cancelled() => return,
            _ = sleep(segment.duration) => {}
        }
    }
    tracing::info!("finished all schedule segments");
}

async fn gun_loop(inner: Arc<Inner>, gun: Arc<dyn Gun>) {
    loop {
        // registered before loading so a swap in between is not missed
        let changed = inner.limiter_changed.notified();
        let Some(limiter) = inner.limiter.load_full() else {
            break;
        };
        tokio::select! {
            biased;
            _ = inner.run.cancelled() => break,
            _ = changed => continue,
            _ = limiter.take() => {}
        }
        // paused slots are consumed and dropped
        if inner.stats.run_paused.load(Ordering::Relaxed)
            || inner.stats.run_stopped.load(Ordering::Relaxed)
        {
            continue;
        }
        inner
            .responses
            .spawn(paced_call(inner.clone(), gun.clone()).instrument(Span::current()));
    }
    tracing::debug!("gun loop exited");
}

async fn paced_call(inner: Arc<Inner>, gun: Arc<dyn Gun>) {
    let started = Instant::now();
    let ctx = inner.ctx.clone();
    let call = tokio::spawn(async move { gun.call(&ctx).await }.instrument(Span::current()));

    let mut res = match timeout(inner.cfg.call_timeout, call).await {
        Ok(Ok(res)) => res,
        Ok(Err(err)) => Response::failed(Error::CallPanicked(err.to_string()).to_string()),
        Err(_) => Response::timed_out(Error::CallTimeout.to_string()),
    };
    if res.duration.is_zero() {
        res.duration = started.elapsed();
    }
    res.started_at.get_or_insert(started);
    res.finished_at.get_or_insert_with(Instant::now);
    inner.ctx.report(res).await;
}
