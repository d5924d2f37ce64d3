//! Stampede — a schedule-driven load generator for Rust.
//!
//! You describe *how much* load to apply over time with a schedule, and *what*
//! a single unit of load is with a small trait implementation. Stampede takes
//! care of pacing, concurrency, timeouts, result collection and streaming.
//!
//! # Architecture
//!
//! - [`Segment`]: a constant load level held for a duration. The [`schedule`]
//!   module builds sequences of them (plain, stepped, combined, repeated).
//! - [`Gun`]: one stateless request. Used with [`LoadType::Rps`], where the
//!   generator paces calls to a target rate per rate-limit unit.
//! - [`VirtualUser`]: a stateful session with setup, a call loop and
//!   teardown. Used with [`LoadType::Vu`], where the generator scales the
//!   number of concurrent sessions.
//! - [`Generator`]: runs one schedule against one implementation and
//!   collects [`Response`]s into [`Stats`] and bounded [`ResponseData`]
//!   buffers, optionally streaming them to a [`Sink`].
//! - [`Profile`]: several generators started, paused and awaited together,
//!   with optional start/end annotations and a start barrier.
//!
//! # Example
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{Config, Generator, LoadType, Response, gun_fn, schedule};
//!
//! #[tokio::main]
//! async fn main() -> stampede::Result<()> {
//!     let generator = Generator::new(
//!         Config::builder()
//!             .gen_name("ramp")
//!             .load_type(LoadType::Rps)
//!             // 10 rps for a while, then 20 rps
//!             .schedule(schedule::combine([
//!                 schedule::plain(10, Duration::from_millis(300)),
//!                 schedule::plain(20, Duration::from_millis(300)),
//!             ]))
//!             .gun(Arc::new(gun_fn(|_ctx| async move {
//!                 // a real gun would send a request here
//!                 Response::ok("pong")
//!             })))
//!             .build(),
//!     )?;
//!
//!     let result = generator.run_and_wait().await;
//!     assert!(!result.failed);
//!     println!("{} successful calls", result.data.ok_responses().len());
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `builtins`: mock guns and virtual users, in-memory and stdout sinks and a
//!   polling start barrier. (Enabled by default)
//! - `internals`: exposes the response collector and the rate limiter for
//!   custom engines and benchmarks.
//!
//! # Where to start
//!
//! - Read the docs for [`Generator`], [`Gun`] and [`VirtualUser`].
//! - See `examples/http.rs` for an HTTP gun.

/// Implementation traits and the per-call context
pub mod attack;
/// Bounded append buffers
pub mod buffer;
/// Generator configuration and validation
pub mod config;
/// Crate error type
pub mod error;
/// The load generation engine
pub mod generator;
/// Tracing subscriber setup
pub mod logging;
#[cfg(feature = "builtins")]
/// Mock implementations for demos and tests
pub mod mock;
/// Generators run and awaited together
pub mod profile;
/// Call results and retained samples
pub mod response;
/// Success sampling
pub mod sampler;
/// Segments describing load over time
pub mod schedule;
/// Destinations for streamed responses and stats
pub mod sink;
/// Live counters of a run
pub mod stats;

#[cfg(feature = "internals")]
/// Slot pacing for rate-based load
pub mod ratelimit;
#[cfg(not(feature = "internals"))]
mod ratelimit;

pub use attack::{CallContext, FnGun, Gun, VirtualUser, VuControl, gun_fn};
pub use config::{Config, LoadType};
pub use error::{BoxError, Error, Result};
pub use generator::{Generator, RunResult};
pub use logging::LogConfig;
pub use profile::{Annotation, Annotator, Profile, SyncBarrier};
pub use response::{Response, ResponseData};
pub use sampler::SamplerConfig;
pub use schedule::Segment;
pub use sink::{Labels, Sink};
pub use stats::{Stats, StatsSnapshot};

#[cfg(feature = "builtins")]
pub use mock::{MockGun, MockGunConfig, MockVirtualUser, MockVirtualUserConfig};
#[cfg(feature = "builtins")]
pub use profile::PredicateBarrier;
#[cfg(feature = "builtins")]
pub use sink::{MemorySink, StdoutSink};
