//! Bounded in-memory execution history.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use autoflow_core::{TaskOptions, TaskSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque execution id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Complete,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Complete => write!(f, "complete"),
        }
    }
}

/// How a completed execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Completed,
    Aborted,
    Error,
}

/// One queued or finished execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub task: String,
    pub status: ExecutionStatus,
    pub options: TaskOptions,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub result: Option<ExecutionResult>,
    pub message: Option<String>,
    pub summary: Option<TaskSummary>,
}

impl ExecutionRecord {
    pub fn pending(id: ExecutionId, task: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            id,
            task: task.into(),
            status: ExecutionStatus::Pending,
            options,
            created: Utc::now(),
            started: None,
            finished: None,
            result: None,
            message: None,
            summary: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ExecutionStatus::Complete
    }
}

/// Records in submission order. Once over capacity the oldest completed
/// records are evicted; pending and running ones are never evicted.
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    records: VecDeque<ExecutionRecord>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    /// Append a record; returns the ids evicted to make room.
    pub fn push(&mut self, record: ExecutionRecord) -> Vec<ExecutionId> {
        self.records.push_back(record);
        self.evict()
    }

    fn evict(&mut self) -> Vec<ExecutionId> {
        let mut evicted = Vec::new();
        while self.records.len() > self.capacity {
            let Some(pos) = self.records.iter().position(ExecutionRecord::is_complete) else {
                break;
            };
            if let Some(old) = self.records.remove(pos) {
                evicted.push(old.id);
            }
        }
        evicted
    }

    pub fn get(&self, id: ExecutionId) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Mutate a record in place; false if unknown.
    pub fn update(&mut self, id: ExecutionId, f: impl FnOnce(&mut ExecutionRecord)) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Mark complete; also retries eviction that was blocked by this record.
    pub fn complete(&mut self, id: ExecutionId, f: impl FnOnce(&mut ExecutionRecord)) -> Vec<ExecutionId> {
        self.update(id, |r| {
            f(r);
            r.status = ExecutionStatus::Complete;
            r.finished = Some(Utc::now());
        });
        self.evict()
    }

    pub fn list(&self) -> Vec<ExecutionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str) -> ExecutionRecord {
        ExecutionRecord::pending(ExecutionId::new(), task, TaskOptions::default())
    }

    #[test]
    fn test_evicts_oldest_completed_only() {
        let mut h = ExecutionHistory::new(2);
        let a = record("a");
        let b = record("b");
        let (a_id, b_id) = (a.id, b.id);
        h.push(a);
        h.push(b);

        // Over capacity but nothing complete: keep everything.
        let c = record("c");
        let c_id = c.id;
        assert!(h.push(c).is_empty());
        assert_eq!(h.len(), 3);

        let evicted = h.complete(b_id, |r| r.result = Some(ExecutionResult::Completed));
        assert_eq!(evicted, vec![b_id]);
        assert!(h.get(a_id).is_some());
        assert!(h.get(c_id).is_some());
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_complete_sets_status_and_time() {
        let mut h = ExecutionHistory::new(10);
        let r = record("a");
        let id = r.id;
        h.push(r);
        h.complete(id, |r| r.message = Some("done".into()));
        let r = h.get(id).unwrap();
        assert_eq!(r.status, ExecutionStatus::Complete);
        assert!(r.finished.is_some());
        assert_eq!(r.message.as_deref(), Some("done"));
        assert_eq!(h.count(ExecutionStatus::Complete), 1);
    }

    #[test]
    fn test_id_roundtrip() {
        let id = ExecutionId::new();
        assert_eq!(id.to_string().parse::<ExecutionId>().unwrap(), id);
        assert!("not-an-id".parse::<ExecutionId>().is_err());
    }
}
