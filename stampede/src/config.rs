//! Generator configuration
//!
//! [`Config`] is built with a typed builder in code, or deserialized from any
//! serde format for its plain-data fields. Implementation handles (gun,
//! virtual user, sink, shared data) can only be set through the builder.
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{Config, LoadType, MockGun, MockGunConfig, schedule};
//!
//! let cfg = Config::builder()
//!     .gen_name("checkout")
//!     .load_type(LoadType::Rps)
//!     .schedule(schedule::plain(50, Duration::from_secs(10)))
//!     .gun(Arc::new(MockGun::new(MockGunConfig::default())))
//!     .build();
//! ```
use std::{any::Any, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    attack::{Gun, VirtualUser},
    error::{Error, Result},
    sampler::SamplerConfig,
    schedule::Segment,
    sink::{Labels, Sink, validate_labels},
};

pub const DEFAULT_GEN_NAME: &str = "Generator";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STATS_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RATE_LIMIT_UNIT_DURATION: Duration = Duration::from_secs(1);
pub const DEFAULT_CALL_RESULT_BUF_LEN: usize = 50_000;

/// How a generator produces load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    /// Independent calls paced at `from` per rate-limit unit, needs a [`Gun`].
    Rps,
    /// `from` concurrent sessions, needs a [`VirtualUser`].
    Vu,
}

#[derive(TypedBuilder, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[builder(default = DEFAULT_GEN_NAME.to_string(), setter(into))]
    pub gen_name: String,
    #[builder(default, setter(strip_option))]
    pub load_type: Option<LoadType>,
    /// Extra labels attached to every sink entry.
    #[builder(default)]
    pub labels: Labels,
    #[builder(default)]
    pub schedule: Vec<Segment>,
    /// Time unit the segment rate is expressed in.
    #[builder(default = DEFAULT_RATE_LIMIT_UNIT_DURATION)]
    #[serde(with = "humantime_serde")]
    pub rate_limit_unit_duration: Duration,
    /// Capacity of every result buffer and of the error list.
    #[builder(default = DEFAULT_CALL_RESULT_BUF_LEN)]
    pub call_result_buf_len: usize,
    #[builder(default = DEFAULT_STATS_POLL_INTERVAL)]
    #[serde(with = "humantime_serde")]
    pub stats_poll_interval: Duration,
    #[builder(default = DEFAULT_CALL_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    #[builder(default = DEFAULT_SETUP_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub setup_timeout: Duration,
    #[builder(default = DEFAULT_TEARDOWN_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub teardown_timeout: Duration,
    /// Cancel the whole run on the first failed or timed-out response.
    #[builder(default)]
    pub fail_on_err: bool,
    #[builder(default)]
    pub sampler: SamplerConfig,
    /// Set by a distributed host, reported in stats snapshots.
    #[builder(default, setter(strip_option, into))]
    pub node_id: Option<String>,

    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub gun: Option<Arc<dyn Gun>>,
    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub vu: Option<Arc<dyn VirtualUser>>,
    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub sink: Option<Arc<dyn Sink>>,
    /// Any value guns and virtual users can read through
    /// [`CallContext::shared_data`](crate::CallContext::shared_data).
    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub shared_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("gen_name", &self.gen_name)
            .field("load_type", &self.load_type)
            .field("labels", &self.labels)
            .field("schedule", &self.schedule)
            .field("rate_limit_unit_duration", &self.rate_limit_unit_duration)
            .field("call_result_buf_len", &self.call_result_buf_len)
            .field("stats_poll_interval", &self.stats_poll_interval)
            .field("call_timeout", &self.call_timeout)
            .field("setup_timeout", &self.setup_timeout)
            .field("teardown_timeout", &self.teardown_timeout)
            .field("fail_on_err", &self.fail_on_err)
            .field("sampler", &self.sampler)
            .field("node_id", &self.node_id)
            .field("gun", &self.gun.is_some())
            .field("vu", &self.vu.is_some())
            .field("sink", &self.sink.is_some())
            .field("shared_data", &self.shared_data.is_some())
            .finish()
    }
}

impl Config {
    /// Fills zero values with defaults, then checks the configuration.
    pub fn validate(&mut self) -> Result<()> {
        self.apply_defaults();

        if self.gun.is_none() && self.vu.is_none() {
            return Err(Error::NoImpl);
        }
        if self.schedule.is_empty() {
            return Err(Error::NoSchedule);
        }
        match self.load_type {
            None => return Err(Error::InvalidScheduleType),
            Some(LoadType::Rps) if self.gun.is_none() => return Err(Error::NoGun),
            Some(LoadType::Vu) if self.vu.is_none() => return Err(Error::NoVu),
            Some(_) => {}
        }
        for segment in &self.schedule {
            segment.validate()?;
        }
        validate_labels(&self.labels)?;
        self.sampler.validate()
    }

    fn apply_defaults(&mut self) {
        fn or_default(d: &mut Duration, default: Duration) {
            if d.is_zero() {
                *d = default;
            }
        }
        if self.gen_name.is_empty() {
            self.gen_name = DEFAULT_GEN_NAME.to_string();
        }
        if self.call_result_buf_len == 0 {
            self.call_result_buf_len = DEFAULT_CALL_RESULT_BUF_LEN;
        }
        or_default(
            &mut self.rate_limit_unit_duration,
            DEFAULT_RATE_LIMIT_UNIT_DURATION,
        );
        or_default(&mut self.stats_poll_interval, DEFAULT_STATS_POLL_INTERVAL);
        or_default(&mut self.call_timeout, DEFAULT_CALL_TIMEOUT);
        or_default(&mut self.setup_timeout, DEFAULT_SETUP_TIMEOUT);
        or_default(&mut self.teardown_timeout, DEFAULT_TEARDOWN_TIMEOUT);
    }
}
