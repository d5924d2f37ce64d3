use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::buffer::SliceBuffer;

/// Result of a single call, setup or teardown.
///
/// Guns return one `Response` per call; virtual users report theirs through
/// [`CallContext::report`](crate::CallContext::report). The engine fills in
/// `duration` and `finished_at` when they are missing and never looks inside
/// `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timeout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, with = "duration_nanos")]
    pub duration: Duration,
    /// Monotonic start time, used to compute `duration` when unset.
    #[serde(skip)]
    pub started_at: Option<Instant>,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Response {
    /// A successful response carrying `data`.
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// A failed response with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            failed: true,
            error: error.into(),
            ..Default::default()
        }
    }

    /// A timed-out response with an error message.
    pub fn timed_out(error: impl Into<String>) -> Self {
        Self {
            timeout: true,
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_started_at(mut self, started_at: Instant) -> Self {
        self.started_at = Some(started_at);
        self
    }

    /// True if this response must never be dropped by sampling.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty() || self.failed || self.timeout
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}

/// Retained results of a run.
///
/// Each buffer has its own lock so the collection task never holds more than
/// one at a time. Only the collection task writes; read after
/// [`Generator::wait`](crate::Generator::wait) returns.
#[derive(Debug)]
pub struct ResponseData {
    ok_data: Mutex<SliceBuffer<Value>>,
    ok_responses: Mutex<SliceBuffer<Arc<Response>>>,
    fail_responses: Mutex<SliceBuffer<Arc<Response>>>,
}

impl ResponseData {
    pub fn new(capacity: usize) -> Self {
        Self {
            ok_data: Mutex::new(SliceBuffer::new(capacity)),
            ok_responses: Mutex::new(SliceBuffer::new(capacity)),
            fail_responses: Mutex::new(SliceBuffer::new(capacity)),
        }
    }

    pub(crate) fn push_ok(&self, res: Arc<Response>) {
        self.ok_data
            .lock()
            .append(res.data.clone().unwrap_or(Value::Null));
        self.ok_responses.lock().append(res);
    }

    pub(crate) fn push_failed(&self, res: Arc<Response>) {
        self.fail_responses.lock().append(res);
    }

    /// Payloads of retained successful responses, oldest first.
    pub fn ok_data(&self) -> Vec<Value> {
        self.ok_data.lock().to_vec()
    }

    /// Retained successful responses, oldest first.
    pub fn ok_responses(&self) -> Vec<Arc<Response>> {
        self.ok_responses.lock().to_vec()
    }

    /// Retained failed and timed-out responses, oldest first.
    pub fn fail_responses(&self) -> Vec<Arc<Response>> {
        self.fail_responses.lock().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_detection() {
        assert!(!Response::ok("x").is_error());
        assert!(Response::failed("boom").is_error());
        assert!(Response::timed_out("slow").is_error());
        let only_message = Response {
            error: "odd".into(),
            ..Default::default()
        };
        assert!(only_message.is_error());
    }

    #[test]
    fn serializes_compactly() {
        let res = Response {
            duration: Duration::from_millis(5),
            started_at: Some(Instant::now()),
            ..Response::ok("payload").with_group("login")
        };
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["duration"], 5_000_000);
        assert_eq!(json["group"], "login");
        assert_eq!(json["data"], "payload");
        assert!(json.get("failed").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("started_at").is_none());

        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(5));
        assert_eq!(back.started_at, None);
    }

    #[test]
    fn data_buffers_are_bounded() {
        let data = ResponseData::new(2);
        for i in 0..3 {
            data.push_ok(Arc::new(Response::ok(i)));
        }
        data.push_ok(Arc::new(Response::default()));
        data.push_failed(Arc::new(Response::failed("e")));

        assert_eq!(data.ok_data(), vec![Value::from(2), Value::Null]);
        assert_eq!(data.ok_responses().len(), 2);
        assert_eq!(data.fail_responses()[0].error, "e");
    }
}
