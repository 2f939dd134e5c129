//! Live per-execution streams.
//!
//! Each execution gets a bounded channel. The worker never blocks on it:
//! progress and log records that do not fit are dropped and counted. Terminal
//! records (entry dump, summary) bypass the channel and are handed to the
//! reader after every buffered record. The stream ends (reader sees
//! [`StreamPoll::Closed`]) once the sender is dropped and the terminal records
//! are drained.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use autoflow_core::{Phase, TaskSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Progress of a running execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub percent: f32,
}

/// One line of a live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRecord {
    Progress(Progress),
    Summary(TaskSummary),
    EntryDump(Vec<Value>),
    Log(String),
}

impl StreamRecord {
    /// Line-delimited JSON form.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"log\":\"unserializable record: {e}\"}}"))
    }
}

/// Result of polling a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPoll {
    Record(StreamRecord),
    /// Nothing arrived within the timeout; the execution is still going.
    Timeout,
    /// The execution is complete and every record has been read.
    Closed,
}

type Tail = Arc<Mutex<VecDeque<StreamRecord>>>;

fn lock_tail(tail: &Tail) -> MutexGuard<'_, VecDeque<StreamRecord>> {
    tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Create a stream with room for `capacity` undelivered progress/log records.
pub fn channel(capacity: usize) -> (StreamSender, StreamReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let tail = Tail::default();
    (
        StreamSender {
            tx,
            tail: tail.clone(),
            dropped: AtomicU64::new(0),
        },
        StreamReader { rx, tail },
    )
}

/// Producer side, owned by the worker.
#[derive(Debug)]
pub struct StreamSender {
    tx: mpsc::Sender<StreamRecord>,
    tail: Tail,
    dropped: AtomicU64,
}

impl StreamSender {
    /// Non-blocking send. Must not log: it runs inside the log capture layer.
    pub fn send(&self, record: StreamRecord) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Queue a record that is never dropped. The reader sees it after the
    /// channel closes, in the order queued.
    pub fn send_terminal(&self, record: StreamRecord) {
        lock_tail(&self.tail).push_back(record);
    }

    /// Records dropped because the reader fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct StreamReader {
    rx: mpsc::Receiver<StreamRecord>,
    tail: Tail,
}

impl StreamReader {
    fn pop_tail(&self) -> Option<StreamRecord> {
        lock_tail(&self.tail).pop_front()
    }

    /// Wait up to `timeout` for the next record.
    pub async fn next_timeout(&mut self, timeout: Duration) -> StreamPoll {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(record)) => StreamPoll::Record(record),
            Ok(None) => match self.pop_tail() {
                Some(record) => StreamPoll::Record(record),
                None => StreamPoll::Closed,
            },
            Err(_) => StreamPoll::Timeout,
        }
    }

    /// Next record, or `None` once closed.
    pub async fn next(&mut self) -> Option<StreamRecord> {
        match self.rx.recv().await {
            Some(record) => Some(record),
            None => self.pop_tail(),
        }
    }

    /// Next buffered record without waiting.
    pub fn try_next(&mut self) -> Option<StreamRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            Err(mpsc::error::TryRecvError::Disconnected) => self.pop_tail(),
            Err(mpsc::error::TryRecvError::Empty) => None,
        }
    }

    /// Read until the stream closes.
    pub async fn collect(mut self) -> Vec<StreamRecord> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await {
            out.push(record);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_format() {
        let log = StreamRecord::Log("hello".into());
        assert_eq!(log.to_line(), r#"{"log":"hello"}"#);

        let progress = StreamRecord::Progress(Progress {
            status: "running".into(),
            phase: Some(Phase::Filter),
            plugin: Some("seen".into()),
            percent: 50.0,
        });
        let v: Value = serde_json::from_str(&progress.to_line()).unwrap();
        assert_eq!(v["progress"]["phase"], json!("filter"));
        assert_eq!(v["progress"]["plugin"], json!("seen"));

        let summary = StreamRecord::Summary(TaskSummary {
            accepted: 2,
            aborted: true,
            abort_reason: Some("boom".into()),
            ..TaskSummary::default()
        });
        let v: Value = serde_json::from_str(&summary.to_line()).unwrap();
        assert_eq!(v["summary"]["accepted"], json!(2));
        assert_eq!(v["summary"]["abort_reason"], json!("boom"));

        let dump = StreamRecord::EntryDump(vec![json!({"title": "a"})]);
        assert!(dump.to_line().starts_with(r#"{"entry_dump":"#));
    }

    #[tokio::test]
    async fn test_full_stream_drops_instead_of_blocking() {
        let (tx, mut rx) = channel(2);
        for i in 0..5 {
            tx.send(StreamRecord::Log(format!("line {i}")));
        }
        assert_eq!(tx.dropped(), 3);
        assert_eq!(rx.try_next(), Some(StreamRecord::Log("line 0".into())));
        assert_eq!(rx.try_next(), Some(StreamRecord::Log("line 1".into())));
        assert_eq!(rx.next_timeout(Duration::from_millis(10)).await, StreamPoll::Timeout);
        drop(tx);
        assert_eq!(rx.next_timeout(Duration::from_millis(10)).await, StreamPoll::Closed);
    }

    #[tokio::test]
    async fn test_terminal_records_survive_a_full_buffer() {
        let (tx, rx) = channel(1);
        tx.send(StreamRecord::Log("first".into()));
        tx.send(StreamRecord::Log("dropped".into()));
        tx.send_terminal(StreamRecord::EntryDump(vec![]));
        tx.send_terminal(StreamRecord::Summary(TaskSummary {
            accepted: 1,
            ..TaskSummary::default()
        }));
        assert_eq!(tx.dropped(), 1);
        drop(tx);

        let records = rx.collect().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], StreamRecord::Log("first".into()));
        assert_eq!(records[1], StreamRecord::EntryDump(vec![]));
        assert!(matches!(&records[2], StreamRecord::Summary(s) if s.accepted == 1));
    }

    #[tokio::test]
    async fn test_terminal_records_wait_for_close() {
        let (tx, mut rx) = channel(4);
        tx.send_terminal(StreamRecord::Summary(TaskSummary::default()));
        assert_eq!(rx.try_next(), None);
        assert_eq!(rx.next_timeout(Duration::from_millis(10)).await, StreamPoll::Timeout);
        drop(tx);
        assert!(matches!(rx.try_next(), Some(StreamRecord::Summary(_))));
        assert_eq!(rx.next_timeout(Duration::from_millis(10)).await, StreamPoll::Closed);
    }
}
