//! Bounded analysis record cache.
//!
//! Capacity-bounded map with first-inserted-first-evicted replacement,
//! keyed by the analysis fingerprint (tenant total count, window size).

use crate::analytics::AnalysisRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub type Fingerprint = (u64, usize);

pub struct AnalysisCache {
    capacity: usize,
    records: HashMap<Fingerprint, Arc<AnalysisRecord>>,
    order: VecDeque<Fingerprint>,
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<AnalysisRecord>> {
        self.records.get(fingerprint).cloned()
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, record: Arc<AnalysisRecord>) {
        if self.records.insert(fingerprint, record).is_some() {
            // Replaced in place; insertion order unchanged.
            return;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.records.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
