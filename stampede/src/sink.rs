//! Durable destinations for streamed responses and stats
//!
//! A [`Sink`] receives a label set, a timestamp and a JSON payload. Generators
//! stream every retained response (`test_data_type="responses"`) and a stats
//! snapshot every poll interval (`test_data_type="stats"`). A failing sink is
//! fatal: the generator stops itself rather than keep producing load nobody
//! can observe.
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{BoxError, Error, Result};

/// Label set attached to every sink entry.
pub type Labels = BTreeMap<String, String>;

pub const LABEL_GEN_NAME: &str = "gen_name";
pub const LABEL_DATA_TYPE: &str = "test_data_type";
pub const LABEL_CALL_GROUP: &str = "call_group";

#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn send(&self, labels: &Labels, ts: DateTime<Utc>, payload: Value)
    -> Result<(), BoxError>;

    /// Flushes buffered entries; called once when a generator finishes.
    async fn close(&self) {}
}

/// Label names follow the Prometheus data model: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn validate_labels(labels: &Labels) -> Result<()> {
    for name in labels.keys() {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidLabels(name.clone()));
        }
    }
    Ok(())
}

/// `base` plus `extra`, `extra` wins on conflicts.
pub fn merge_labels<'a, I>(base: &Labels, extra: I) -> Labels
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = base.clone();
    out.extend(extra.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
    out
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;
    use serde::Serialize;

    use super::*;

    /// Prints one JSON line per entry.
    pub struct StdoutSink;

    #[derive(Serialize)]
    struct Line<'a> {
        ts: DateTime<Utc>,
        labels: &'a Labels,
        payload: Value,
    }

    #[async_trait]
    impl Sink for StdoutSink {
        async fn send(
            &self,
            labels: &Labels,
            ts: DateTime<Utc>,
            payload: Value,
        ) -> Result<(), BoxError> {
            let line = serde_json::to_string(&Line {
                ts,
                labels,
                payload,
            })?;
            println!("{line}");
            Ok(())
        }
    }

    /// One recorded entry of a [`MemorySink`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct SinkEntry {
        pub labels: Labels,
        pub ts: DateTime<Utc>,
        pub payload: Value,
    }

    /// Keeps every entry in memory. Can be told to reject sends.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        entries: Mutex<Vec<SinkEntry>>,
        fail: AtomicBool,
        closed: AtomicBool,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        /// A sink whose every send fails.
        pub fn failing() -> Self {
            let sink = Self::default();
            sink.set_failing(true);
            sink
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::Relaxed);
        }

        pub fn entries(&self) -> Vec<SinkEntry> {
            self.entries.lock().clone()
        }

        /// Entries whose `test_data_type` label is `data_type`.
        pub fn entries_of(&self, data_type: &str) -> Vec<SinkEntry> {
            self.entries
                .lock()
                .iter()
                .filter(|e| e.labels.get(LABEL_DATA_TYPE).map(String::as_str) == Some(data_type))
                .cloned()
                .collect()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Sink for MemorySink {
        async fn send(
            &self,
            labels: &Labels,
            ts: DateTime<Utc>,
            payload: Value,
        ) -> Result<(), BoxError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err("memory sink rejected entry".into());
            }
            self.entries.lock().push(SinkEntry {
                labels: labels.clone(),
                ts,
                payload,
            });
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }
}
