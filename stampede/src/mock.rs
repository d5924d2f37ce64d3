//! Mock attack implementations
//!
//! Handy for smoke tests of the engine itself and for trying schedules out
//! without a system under test. Both mocks sleep for `call_sleep`, then fail
//! or run past the call timeout at the configured ratios.
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    attack::{CallContext, Gun, VirtualUser, VuControl},
    error::BoxError,
    response::Response,
};

pub const SUCCESS_DATA: &str = "successCallData";
pub const FAILED_DATA: &str = "failedCallData";
pub const MOCK_ERROR: &str = "error";

/// Extra time a "timed out" mock call sleeps on top of `call_sleep`.
const OVERSLEEP: Duration = Duration::from_millis(20);

fn roll(ratio: u8) -> bool {
    ratio > 0 && rand::thread_rng().gen_range(0..100u8) < ratio
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockGunConfig {
    /// Percentage of calls returning a failed response.
    pub fail_ratio: u8,
    /// Percentage of calls sleeping past `call_sleep`.
    pub timeout_ratio: u8,
    #[serde(with = "humantime_serde")]
    pub call_sleep: Duration,
}

#[derive(Debug, Clone)]
pub struct MockGun {
    cfg: MockGunConfig,
}

impl MockGun {
    pub fn new(cfg: MockGunConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Gun for MockGun {
    async fn call(&self, _ctx: &CallContext) -> Response {
        sleep(self.cfg.call_sleep).await;
        if roll(self.cfg.fail_ratio) {
            return Response::failed(MOCK_ERROR).with_data(FAILED_DATA);
        }
        if roll(self.cfg.timeout_ratio) {
            sleep(self.cfg.call_sleep + OVERSLEEP).await;
        }
        Response::ok(SUCCESS_DATA)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockVirtualUserConfig {
    pub fail_ratio: u8,
    pub timeout_ratio: u8,
    #[serde(with = "humantime_serde")]
    pub call_sleep: Duration,
    #[serde(with = "humantime_serde")]
    pub setup_sleep: Duration,
    pub setup_failure: bool,
    #[serde(with = "humantime_serde")]
    pub teardown_sleep: Duration,
    pub teardown_failure: bool,
}

/// A virtual user reporting one response per call.
#[derive(Debug)]
pub struct MockVirtualUser {
    cfg: MockVirtualUserConfig,
    control: VuControl,
}

impl MockVirtualUser {
    pub fn new(cfg: MockVirtualUserConfig) -> Self {
        Self {
            cfg,
            control: VuControl::new(),
        }
    }
}

#[async_trait]
impl VirtualUser for MockVirtualUser {
    async fn call(&self, ctx: &CallContext) {
        let started = Instant::now();
        sleep(self.cfg.call_sleep).await;
        if roll(self.cfg.fail_ratio) {
            let res = Response::failed(MOCK_ERROR).with_data(FAILED_DATA);
            ctx.report(res.with_started_at(started)).await;
            return;
        }
        if roll(self.cfg.timeout_ratio) {
            sleep(self.cfg.call_sleep + OVERSLEEP).await;
        }
        ctx.report(Response::ok(SUCCESS_DATA).with_started_at(started))
            .await;
    }

    fn clone_vu(&self) -> Box<dyn VirtualUser> {
        Box::new(Self::new(self.cfg.clone()))
    }

    async fn setup(&self, _ctx: &CallContext) -> Result<(), BoxError> {
        sleep(self.cfg.setup_sleep).await;
        if self.cfg.setup_failure {
            return Err("setup failure".into());
        }
        Ok(())
    }

    async fn teardown(&self, _ctx: &CallContext) -> Result<(), BoxError> {
        sleep(self.cfg.teardown_sleep).await;
        if self.cfg.teardown_failure {
            return Err("teardown failure".into());
        }
        Ok(())
    }

    fn stop(&self) {
        self.control.stop();
    }

    fn stop_signal(&self) -> CancellationToken {
        self.control.stop_signal()
    }
}
