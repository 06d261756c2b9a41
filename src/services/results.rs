use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::models::job::JobId;
use crate::models::result::JobResult;
use crate::services::registry::ResultSink;

/// Bounded store of terminal results, oldest evicted first.
pub struct ResultStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    results: HashMap<JobId, JobResult>,
    order: VecDeque<JobId>,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    pub fn insert(&self, result: JobResult) {
        let mut inner = self.inner.lock();
        let id = result.job_id.clone();
        if inner.results.insert(id.clone(), result).is_none() {
            inner.order.push_back(id);
        }
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.results.remove(&evicted);
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<JobResult> {
        self.inner.lock().results.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for ResultStore {
    fn record(&self, result: &JobResult) {
        self.insert(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::result::{JobOutcome, JobStatus};

    fn result(id: &str) -> JobResult {
        JobResult::from_outcome(JobId::from(id), JobOutcome::Cancelled, 0)
    }

    #[test]
    fn test_evicts_oldest() {
        let store = ResultStore::new(2);
        store.insert(result("a"));
        store.insert(result("b"));
        store.insert(result("c"));

        assert_eq!(store.len(), 2);
        assert!(store.get(&JobId::from("a")).is_none());
        assert_eq!(
            store.get(&JobId::from("c")).unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_records_as_result_sink() {
        let store = ResultStore::new(4);
        let sink: &dyn ResultSink = &store;
        sink.record(&result("s"));
        sink.record(&result("s"));

        assert_eq!(store.len(), 1);
        assert!(store.get(&JobId::from("s")).is_some());
    }
}
