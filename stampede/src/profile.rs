//! Profiles: several generators forming one workload
//!
//! A [`Profile`] starts its generators together, waits for all of them and
//! broadcasts pause/resume. Construction errors are collected while adding
//! generators and surface from [`Profile::run`], so a whole workload can be
//! declared in one expression:
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{
//!     Config, Generator, LoadType, MockGun, MockGunConfig, MockVirtualUser,
//!     MockVirtualUserConfig, Profile, schedule,
//! };
//!
//! #[tokio::main]
//! async fn main() -> stampede::Result<()> {
//!     let mut profile = Profile::new()
//!         .add(Generator::new(
//!             Config::builder()
//!                 .gen_name("api")
//!                 .load_type(LoadType::Rps)
//!                 .schedule(schedule::plain(5, Duration::from_millis(200)))
//!                 .gun(Arc::new(MockGun::new(MockGunConfig::default())))
//!                 .build(),
//!         ))
//!         .add(Generator::new(
//!             Config::builder()
//!                 .gen_name("sessions")
//!                 .load_type(LoadType::Vu)
//!                 .schedule(schedule::plain(2, Duration::from_millis(200)))
//!                 .vu(Arc::new(MockVirtualUser::new(MockVirtualUserConfig {
//!                     call_sleep: Duration::from_millis(10),
//!                     ..Default::default()
//!                 })))
//!                 .build(),
//!         ));
//!     profile.run(true).await?;
//!     Ok(())
//! }
//! ```
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;

use crate::{
    error::{BoxError, Error, Result},
    generator::{Generator, RunResult},
};

/// A dashboard annotation marking the start or the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub time: DateTime<Utc>,
    pub time_end: Option<DateTime<Utc>>,
    pub text: String,
}

/// Posts annotations somewhere (a dashboard, a log). Failures are logged and
/// never affect the run.
#[async_trait]
pub trait Annotator: Send + Sync + 'static {
    async fn annotate(&self, annotation: Annotation) -> Result<(), BoxError>;
}

/// Blocks a profile until every cooperating replica is ready to start.
#[async_trait]
pub trait SyncBarrier: Send + Sync + 'static {
    async fn wait_ready(&self) -> Result<(), BoxError>;
}

pub struct Profile {
    id: String,
    generators: Vec<Generator>,
    bootstrap_err: Option<Arc<Error>>,
    annotator: Option<Arc<dyn Annotator>>,
    barrier: Option<Arc<dyn SyncBarrier>>,
    ended: AtomicBool,
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

impl Profile {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..5].to_string(),
            generators: Vec::new(),
            bootstrap_err: None,
            annotator: None,
            barrier: None,
            ended: AtomicBool::new(false),
        }
    }

    /// Short random id used in annotations.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds a generator. The first construction error is kept and every
    /// [`Profile::run`] fails with it.
    pub fn add(mut self, generator: Result<Generator>) -> Self {
        match generator {
            Ok(generator) => self.generators.push(generator),
            Err(err) => {
                tracing::error!(%err, "failed to bootstrap generator");
                self.bootstrap_err.get_or_insert_with(|| Arc::new(err));
            }
        }
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<dyn SyncBarrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    /// Starts every generator, then waits for all of them when `wait` is set.
    ///
    /// Nothing starts if a generator failed to build or the sync barrier
    /// fails.
    pub async fn run(&mut self, wait: bool) -> Result<()> {
        if let Some(err) = &self.bootstrap_err {
            return Err(Error::Bootstrap(err.clone()));
        }
        if let Some(barrier) = &self.barrier {
            tracing::info!(profile = %self.id, "waiting for sync barrier");
            barrier.wait_ready().await.map_err(Error::SyncBarrier)?;
        }

        let start = Utc::now();
        self.annotate(Annotation {
            time: start,
            time_end: None,
            text: self.annotation_text("Test Started", "Start time", start),
        })
        .await;

        tracing::info!(profile = %self.id, generators = self.generators.len(), "starting profile");
        for generator in &self.generators {
            generator.run();
        }
        if wait {
            self.wait().await;
        }
        Ok(())
    }

    /// Waits for every generator. The first wait posts the end annotation.
    pub async fn wait(&self) -> Vec<RunResult> {
        let results = join_all(self.generators.iter().map(Generator::wait)).await;
        if self.ended.swap(true, Ordering::AcqRel) {
            return results;
        }

        let end = Utc::now();
        self.annotate(Annotation {
            time: end,
            time_end: Some(end),
            text: self.annotation_text("Test Ended", "End time", end),
        })
        .await;
        results
    }

    pub fn pause(&self) {
        for generator in &self.generators {
            generator.pause();
        }
    }

    pub fn resume(&self) {
        for generator in &self.generators {
            generator.resume();
        }
    }

    async fn annotate(&self, annotation: Annotation) {
        let Some(annotator) = &self.annotator else {
            return;
        };
        if let Err(err) = annotator.annotate(annotation).await {
            tracing::warn!(%err, profile = %self.id, "could not post annotation");
        }
    }

    fn annotation_text(&self, title: &str, time_label: &str, time: DateTime<Utc>) -> String {
        let generators: String = self
            .generators
            .iter()
            .map(|g| format!("<li>{}</li>", g.name()))
            .collect();
        format!(
            "<body><h4>{title}</h4><div>profile id: {}</div><div>{time_label}: {}</div><br>\
             <h5>Generators:</h5><ul>{generators}</ul></body>",
            self.id,
            time.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

#[cfg(feature = "builtins")]
pub use builtins::PredicateBarrier;

#[cfg(feature = "builtins")]
mod builtins {
    use std::{future::Future, time::Duration};

    use super::*;

    /// Polls `predicate` every `interval` until it holds, giving up after
    /// `timeout`.
    pub struct PredicateBarrier<F> {
        predicate: F,
        interval: Duration,
        timeout: Duration,
    }

    impl<F, Fut> PredicateBarrier<F>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        pub fn new(predicate: F, interval: Duration, timeout: Duration) -> Self {
            Self {
                predicate,
                interval,
                timeout,
            }
        }
    }

    #[async_trait]
    impl<F, Fut> SyncBarrier for PredicateBarrier<F>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        async fn wait_ready(&self) -> Result<(), BoxError> {
            let poll = async {
                while !(self.predicate)().await {
                    tokio::time::sleep(self.interval).await;
                }
            };
            tokio::time::timeout(self.timeout, poll)
                .await
                .map_err(|_| format!("not ready after {:?}", self.timeout).into())
        }
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        Config, LoadType,
        mock::{MockGun, MockGunConfig, MockVirtualUser, MockVirtualUserConfig},
        schedule,
    };

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn rps(name: &str, rate: i64, duration: Duration) -> Result<Generator> {
        Generator::new(
            Config::builder()
                .gen_name(name)
                .load_type(LoadType::Rps)
                .schedule(schedule::plain(rate, duration))
                .stats_poll_interval(Duration::from_secs(1))
                .gun(Arc::new(MockGun::new(MockGunConfig {
                    call_sleep: ms(50),
                    ..Default::default()
                })))
                .build(),
        )
    }

    fn vu(name: &str, vus: i64, duration: Duration) -> Result<Generator> {
        Generator::new(
            Config::builder()
                .gen_name(name)
                .load_type(LoadType::Vu)
                .schedule(schedule::plain(vus, duration))
                .stats_poll_interval(Duration::from_secs(1))
                .vu(Arc::new(MockVirtualUser::new(MockVirtualUserConfig {
                    call_sleep: ms(50),
                    ..Default::default()
                })))
                .build(),
        )
    }

    #[derive(Default)]
    struct Recorder {
        annotations: Mutex<Vec<Annotation>>,
        fail: bool,
    }

    #[async_trait]
    impl Annotator for Recorder {
        async fn annotate(&self, annotation: Annotation) -> Result<(), BoxError> {
            if self.fail {
                return Err("dashboard is down".into());
            }
            self.annotations.lock().push(annotation);
            Ok(())
        }
    }

    #[test]
    fn id_is_short() {
        let profile = Profile::new();
        assert_eq!(profile.id().len(), 5);
        assert_ne!(profile.id(), Profile::new().id());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_generator_fails_bootstrap() {
        let mut profile = Profile::new()
            .add(rps("A", 2, Duration::from_secs(5)))
            .add(Generator::new(Config::default()));
        let err = profile.run(true).await.unwrap_err();
        assert!(matches!(&err, Error::Bootstrap(inner) if matches!(**inner, Error::NoImpl)));
        assert!(err.is_configuration());
        assert_eq!(profile.generators().len(), 1);
        assert!(
            !profile.generators()[0]
                .stats()
                .run_started
                .load(Ordering::Relaxed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_failure_is_sticky() {
        let mut profile = Profile::new()
            .add(rps("A", 2, Duration::from_secs(5)))
            .add(Generator::new(Config::default()));
        assert!(profile.run(false).await.is_err());
        let err = profile.run(true).await.unwrap_err();
        assert!(matches!(&err, Error::Bootstrap(inner) if matches!(**inner, Error::NoImpl)));
        assert!(
            !profile.generators()[0]
                .stats()
                .run_started
                .load(Ordering::Relaxed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn generators_run_in_parallel() {
        let mut profile = Profile::new()
            .add(rps("A", 2, Duration::from_secs(5)))
            .add(vu("B", 1, Duration::from_secs(5)));
        let start = tokio::time::Instant::now();
        profile.run(true).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(6));

        let a = &profile.generators()[0];
        assert_eq!(a.stats().current_rps.load(Ordering::Relaxed), 2);
        assert!(a.data().ok_responses().len() >= 10);
        assert!(a.data().ok_responses()[0].duration >= ms(50));
        assert!(a.errors().is_empty());

        let b = &profile.generators()[1];
        assert_eq!(b.stats().current_vus.load(Ordering::Relaxed), 1);
        assert!(b.data().ok_responses().len() > 90);
        assert!(b.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_reach_every_generator() {
        let mut profile = Profile::new()
            .add(rps("A", 10, Duration::from_secs(9)))
            .add(vu("B", 1, Duration::from_secs(9)));
        profile.run(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        profile.pause();
        assert!(
            profile
                .generators()
                .iter()
                .all(|g| g.stats().run_paused.load(Ordering::Relaxed))
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        profile.resume();

        let results = profile.wait().await;
        assert!(results.iter().all(|r| !r.failed));
        let a = results[0].data.ok_responses().len();
        let b = results[1].data.ok_responses().len();
        assert!((55..=63).contains(&a), "a {a}");
        assert!((110..=125).contains(&b), "b {b}");
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_end_are_annotated() {
        let recorder = Arc::new(Recorder::default());
        let mut profile = Profile::new()
            .add(rps("api", 1, ms(500)))
            .add(vu("sessions", 1, ms(500)))
            .with_annotator(recorder.clone());
        profile.run(true).await.unwrap();

        let annotations = recorder.annotations.lock().clone();
        assert_eq!(annotations.len(), 2);
        let (start, end) = (&annotations[0], &annotations[1]);
        assert!(start.text.contains("Test Started"));
        assert!(start.text.contains(profile.id()));
        assert!(start.text.contains("<li>api</li><li>sessions</li>"));
        assert_eq!(start.time_end, None);
        assert!(end.text.contains("Test Ended"));
        assert_eq!(end.time_end, Some(end.time));

        // collecting the results afterwards does not annotate the end again
        let results = profile.wait().await;
        assert_eq!(results.len(), 2);
        assert_eq!(recorder.annotations.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn annotation_failures_are_not_fatal() {
        let mut profile = Profile::new()
            .add(rps("api", 1, ms(200)))
            .with_annotator(Arc::new(Recorder {
                fail: true,
                ..Default::default()
            }));
        profile.run(true).await.unwrap();
        assert!(logs_contain("could not post annotation"));
        assert!(logs_contain("dashboard is down"));
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_gates_the_start() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let barrier = PredicateBarrier::new(
            move || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::Relaxed) >= 2 }
            },
            ms(100),
            Duration::from_secs(5),
        );
        let mut profile = Profile::new()
            .add(rps("api", 1, ms(200)))
            .with_barrier(Arc::new(barrier));
        profile.run(true).await.unwrap();
        assert_eq!(polls.load(Ordering::Relaxed), 3);
        assert!(profile.generators()[0].stats().success.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_timeout_prevents_the_start() {
        let barrier = PredicateBarrier::new(|| async { false }, ms(100), ms(500));
        let mut profile = Profile::new()
            .add(rps("api", 1, ms(200)))
            .with_barrier(Arc::new(barrier));
        let err = profile.run(true).await.unwrap_err();
        assert!(matches!(err, Error::SyncBarrier(_)));
        assert!(
            !profile.generators()[0]
                .stats()
                .run_started
                .load(Ordering::Relaxed)
        );
    }
}
