//! Attack implementations, the code that actually talks to the system under test
//!
//! Two capability sets are supported:
//!
//! - [`Gun`]: one independent request per call. Used with
//!   [`LoadType::Rps`](crate::LoadType::Rps); the generator decides when to
//!   fire and runs as many calls concurrently as the rate demands.
//! - [`VirtualUser`]: a stateful session (websocket, gRPC stream, a scripted
//!   user journey…). Used with [`LoadType::Vu`](crate::LoadType::Vu); every
//!   active virtual user calls sequentially in its own task and the schedule
//!   scales their number up and down.
//!
//! # Example
//! ```rust
//! use stampede::{CallContext, Gun, Response};
//!
//! struct Ping;
//!
//! #[async_trait::async_trait]
//! impl Gun for Ping {
//!     async fn call(&self, _ctx: &CallContext) -> Response {
//!         Response::ok("pong")
//!     }
//! }
//! ```
use std::{any::Any, future::Future, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{error::BoxError, response::Response};

/// Fires a single request. Must not block; keep heavy clients outside and
/// share them.
#[async_trait]
pub trait Gun: Send + Sync + 'static {
    async fn call(&self, ctx: &CallContext) -> Response;
}

/// A stateful session run as its own worker.
///
/// `call` is invoked in a loop until the worker is stopped. It reports its
/// results with [`CallContext::report`] (zero or more per call), which lets a
/// session emit responses for messages it receives asynchronously.
#[async_trait]
pub trait VirtualUser: Send + Sync + 'static {
    async fn call(&self, ctx: &CallContext);

    /// A fresh instance with its own stop signal.
    fn clone_vu(&self) -> Box<dyn VirtualUser>;

    async fn setup(&self, _ctx: &CallContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn teardown(&self, _ctx: &CallContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Asks the worker running this instance to tear down and exit.
    fn stop(&self);

    fn stop_signal(&self) -> CancellationToken;
}

/// Stop signal plumbing to embed in [`VirtualUser`] implementations.
#[derive(Debug, Clone, Default)]
pub struct VuControl {
    stop: CancellationToken,
}

impl VuControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }
}

/// What an attack implementation can see of the generator running it.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    generator: String,
    shared_data: Option<Arc<dyn Any + Send + Sync>>,
    responses: mpsc::Sender<Response>,
    run: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(
        generator: String,
        shared_data: Option<Arc<dyn Any + Send + Sync>>,
        responses: mpsc::Sender<Response>,
        run: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                generator,
                shared_data,
                responses,
                run,
            }),
        }
    }

    pub fn generator_name(&self) -> &str {
        &self.inner.generator
    }

    /// The generator's shared data, if it has the requested type.
    pub fn shared_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.shared_data.as_deref()?.downcast_ref::<T>()
    }

    /// Hands a response to the collection task.
    pub async fn report(&self, res: Response) {
        if self.inner.responses.send(res).await.is_err() {
            tracing::debug!("collection already finished, response dropped");
        }
    }

    /// Resolves once the run is over (deadline, stop or fail-fast).
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.run.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.run.is_cancelled()
    }
}

/// A [`Gun`] backed by an async closure.
///
/// ```rust
/// use stampede::{Response, attack::gun_fn};
///
/// let gun = gun_fn(|_ctx| async { Response::ok("hi") });
/// ```
pub struct FnGun<F>(F);

pub fn gun_fn<F, Fut>(f: F) -> FnGun<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    FnGun(f)
}

#[async_trait]
impl<F, Fut> Gun for FnGun<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    async fn call(&self, ctx: &CallContext) -> Response {
        (self.0)(ctx.clone()).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_context() -> (CallContext, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel(16);
        let ctx = CallContext::new(
            "test".into(),
            Some(Arc::new(42u32)),
            tx,
            CancellationToken::new(),
        );
        (ctx, rx)
    }

    #[test]
    fn shared_data_is_typed() {
        let (ctx, _rx) = test_context();
        assert_eq!(ctx.shared_data::<u32>(), Some(&42));
        assert_eq!(ctx.shared_data::<String>(), None);
        assert_eq!(ctx.generator_name(), "test");
    }

    #[tokio::test]
    async fn report_reaches_collector() {
        let (ctx, mut rx) = test_context();
        ctx.report(Response::ok("x")).await;
        assert_eq!(rx.recv().await, Some(Response::ok("x")));
    }

    #[tokio::test]
    async fn report_after_collector_is_gone_is_ignored() {
        let (ctx, rx) = test_context();
        drop(rx);
        ctx.report(Response::ok("x")).await;
    }

    #[tokio::test]
    async fn closures_can_be_guns() {
        let (ctx, _rx) = test_context();
        let gun = gun_fn(|ctx: CallContext| async move {
            Response::ok(ctx.generator_name().to_string())
        });
        assert_eq!(gun.call(&ctx).await, Response::ok("test"));
    }

    #[test]
    fn vu_control_signals_stop() {
        let control = VuControl::new();
        let signal = control.stop_signal();
        assert!(!signal.is_cancelled());
        control.stop();
        assert!(signal.is_cancelled());
    }
}
