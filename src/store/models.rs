//! Tenant Data Models
//! Mission: Define the append-only result log and its derived state

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ACTION_RESULT_SUBMITTED: &str = "result-submitted";
pub const ACTION_RESULTS_CLEARED: &str = "results-cleared";
pub const ACTION_USER_CREATED: &str = "user-created";
pub const ACTION_USER_DELETED: &str = "user-deleted";

/// One submitted result. Wire field names keep compatibility with the
/// clients of the system this replaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntry {
    #[serde(rename = "resultado")]
    pub value: i64,
    #[serde(rename = "fecha")]
    pub date: String,
    #[serde(rename = "hora")]
    pub time: String,
    pub timestamp: i64,
}

impl ResultEntry {
    /// Capture a value with the server-local date/time presentation.
    pub fn capture(value: i64) -> Self {
        let now = Local::now();
        Self {
            value,
            date: now.format("%d/%m/%Y").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            timestamp: now.timestamp_millis(),
        }
    }
}

/// Append-only audit marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_timestamp: Option<i64>,
}

impl HistoryEntry {
    pub fn now(action: &str, result_timestamp: Option<i64>) -> Self {
        Self {
            action: action.to_string(),
            timestamp: Local::now().timestamp_millis(),
            result_timestamp,
        }
    }
}

/// Full state of one tenant: the result log, the audit history, and the
/// derived value counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantState {
    pub username: String,
    pub results: Vec<ResultEntry>,
    pub history: Vec<HistoryEntry>,
    pub counters: BTreeMap<String, u64>,
    pub last_updated: i64,
}

impl TenantState {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            results: Vec::new(),
            history: Vec::new(),
            counters: BTreeMap::new(),
            last_updated: 0,
        }
    }

    /// Append one result, updating counters, history and the freshness
    /// timestamp in the same step.
    pub fn append_result(&mut self, value: i64) -> ResultEntry {
        let entry = ResultEntry::capture(value);
        *self.counters.entry(value.to_string()).or_insert(0) += 1;
        self.history.push(HistoryEntry::now(
            ACTION_RESULT_SUBMITTED,
            Some(entry.timestamp),
        ));
        self.last_updated = entry.timestamp;
        self.results.push(entry.clone());
        entry
    }

    /// Drop results and counters; history is retained.
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.counters.clear();
        let marker = HistoryEntry::now(ACTION_RESULTS_CLEARED, None);
        self.last_updated = marker.timestamp;
        self.history.push(marker);
    }

    pub fn record(&mut self, action: &str) {
        self.history.push(HistoryEntry::now(action, None));
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.history.is_empty()
    }

    /// True when the counters equal the multiset of result values.
    pub fn counters_consistent(&self) -> bool {
        let mut expected: BTreeMap<String, u64> = BTreeMap::new();
        for entry in &self.results {
            *expected.entry(entry.value.to_string()).or_insert(0) += 1;
        }
        expected == self.counters
    }

    pub fn statistics(&self) -> TenantStatistics {
        TenantStatistics {
            counters: self.counters.clone(),
            total_results: self.results.len(),
            last_updated: self.last_updated,
        }
    }
}

/// Snapshot of the derived counters for the statistics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatistics {
    pub counters: BTreeMap<String, u64>,
    pub total_results: usize,
    pub last_updated: i64,
}

/// Deep snapshot of a tenant plus the export timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantExport {
    pub username: String,
    pub results: Vec<ResultEntry>,
    pub history: Vec<HistoryEntry>,
    pub counters: BTreeMap<String, u64>,
    pub last_updated: i64,
    pub exported_at: i64,
}

/// Read snapshot handed to the analytics engine: the tail window, the
/// all-time total and the tenant freshness timestamp (the cache key inputs).
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub window: Vec<ResultEntry>,
    pub total: usize,
    pub last_updated: i64,
}
