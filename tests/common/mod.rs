//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use logcache::{CacheError, Entry, FetchRequest, LogTransport, MessageStream, Result, Timestamp};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Serves records from memory, newest first, honouring the request's time
/// range and page cap.
#[derive(Default)]
pub struct MockTransport {
    records: Mutex<Vec<Value>>,
    calls: Mutex<Vec<FetchRequest>>,
    failures: Mutex<usize>,
    delays: Mutex<VecDeque<Duration>>,
    stream: Mutex<Option<UnboundedReceiver<String>>>,
    whole_seconds: bool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport that sees request bounds as whole seconds, like the HTTP
    /// API: `from` rounds down, `to` rounds up and is inclusive.
    pub fn second_granular(times: &[i64]) -> Arc<Self> {
        let mock = Arc::new(Self {
            whole_seconds: true,
            ..Self::default()
        });
        mock.add_times(times);
        mock
    }

    /// Transport holding a record per time in `times`.
    pub fn with_times(times: &[i64]) -> Arc<Self> {
        let mock = Self::new();
        mock.add_times(times);
        mock
    }

    pub fn add(&self, record: Value) {
        self.records.lock().push(record);
    }

    pub fn add_times(&self, times: &[i64]) {
        for t in times {
            self.add(record(*t));
        }
    }

    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock() = records;
    }

    /// Fail the next `n` fetches.
    pub fn fail_next(&self, n: usize) {
        *self.failures.lock() = n;
    }

    /// Delay upcoming fetches, one duration per call.
    pub fn delay_next(&self, delays: &[Duration]) {
        self.delays.lock().extend(delays.iter().copied());
    }

    /// Enable the push stream; returns its sending end.
    pub fn push_channel(&self) -> UnboundedSender<String> {
        let (tx, rx) = unbounded();
        *self.stream.lock() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn respond(&self, request: &FetchRequest) -> Vec<Value> {
        let whole_seconds = self.whole_seconds;
        let from = request.from.map_or(Timestamp::MIN, |from| {
            if whole_seconds { Timestamp(from.secs_floor() * 1000) } else { from }
        });
        let to = request.to.map_or(Timestamp::MAX, |to| {
            if whole_seconds { Timestamp(to.secs_ceil() * 1000) } else { to }
        });

        let mut matching: Vec<Value> = self
            .records
            .lock()
            .iter()
            .filter(|r| {
                let t = time_of(r);
                from <= t && (t < to || (whole_seconds && t == to))
            })
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(time_of(r)));
        matching.truncate(request.limit);
        matching
    }
}

#[async_trait]
impl LogTransport for MockTransport {
    async fn fetch_range(&self, request: &FetchRequest) -> Result<Vec<Value>> {
        self.calls.lock().push(request.clone());

        let fail = {
            let mut failures = self.failures.lock();
            let fail = *failures > 0;
            *failures = failures.saturating_sub(1);
            fail
        };
        let response = self.respond(request);
        let delay = self.delays.lock().pop_front();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(CacheError::Transport("connection refused".to_string()));
        }
        Ok(response)
    }

    async fn open_stream(&self) -> Result<MessageStream> {
        match self.stream.lock().take() {
            Some(rx) => Ok(rx.boxed()),
            None => Err(CacheError::StreamUnavailable("no stream scripted".to_string())),
        }
    }
}

fn time_of(record: &Value) -> Timestamp {
    Timestamp::from_value(&record["timestamp"]).unwrap_or(Timestamp::MIN)
}

/// A record at `t`.
pub fn record(t: i64) -> Value {
    json!({ "timestamp": t, "msg": format!("m{}", t) })
}

pub fn times(entries: &[Entry]) -> Vec<i64> {
    entries.iter().map(|e| e.time().0).collect()
}

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Let spawned tasks run to quiescence. Needs a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
