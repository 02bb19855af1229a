//! Additional worker launch history, used to circuit-break unavailable
//! instance types
use chrono::{DateTime, Utc};

/// A record of a single launched additional worker, as reported by the
/// cloud pipeline API once the daemon polls the run back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub run_id: String,
    pub name: Option<String>,
    pub instance_type: Option<String>,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub has_insufficient_instance_capacity: bool,
}

/// A bounded ring buffer of the most recent [`WorkerRecord`]s
///
/// Mirrors the original's `self._records = self._records[-self._capacity:]`
/// truncation in `CloudPipelineWorkerRecorder.record`.
#[derive(Debug, Clone)]
pub struct WorkerRecords {
    records: Vec<WorkerRecord>,
    capacity: usize,
}

impl WorkerRecords {
    pub fn new(capacity: usize) -> Self {
        WorkerRecords {
            records: Vec::new(),
            capacity,
        }
    }

    /// Append a record, dropping the oldest entries past capacity
    pub fn push(&mut self, record: WorkerRecord) {
        self.records.push(record);
        if self.records.len() > self.capacity {
            let overflow = self.records.len() - self.capacity;
            self.records.drain(0..overflow);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run_id: &str) -> WorkerRecord {
        WorkerRecord {
            run_id: run_id.to_string(),
            name: None,
            instance_type: None,
            started: None,
            stopped: None,
            has_insufficient_instance_capacity: false,
        }
    }

    #[test]
    fn push_evicts_oldest_past_capacity() {
        let mut records = WorkerRecords::new(2);
        records.push(record("1"));
        records.push(record("2"));
        records.push(record("3"));
        let ids: Vec<&str> = records.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }
}
