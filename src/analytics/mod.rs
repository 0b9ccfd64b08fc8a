//! Analytics Engine
//! Mission: Turn a sliding window of results into a deterministic,
//! cacheable analysis record

pub mod cache;

use crate::store::models::{AnalysisInput, ResultEntry};
use cache::AnalysisCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

const CACHE_CAPACITY: usize = 10;

/// Dominance classification of a window's mean against its median.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dominant {
    High,
    Low,
    Neutral,
    Indeterminate,
}

impl Dominant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dominant::High => "high",
            Dominant::Low => "low",
            Dominant::Neutral => "neutral",
            Dominant::Indeterminate => "indeterminate",
        }
    }
}

/// Adjacent pair whose values differ by exactly one.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConsecutivePair {
    pub from: i64,
    pub to: i64,
}

/// Single-pass pattern scan output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatternReport {
    pub consecutive: Vec<ConsecutivePair>,
    pub repetitions: Vec<i64>,
}

/// Trend summary of the window.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub most_frequent: Option<i64>,
    pub most_frequent_count: u64,
    pub mean: f64,
    pub median: f64,
    pub dominant: Dominant,
}

/// Footer with all-time totals and the freshness timestamp.
/// `estimated_accuracy` is a heuristic with no empirical grounding and
/// must not be read as a calibrated probability.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsFooter {
    pub total_results: usize,
    pub dominant: Dominant,
    pub most_frequent: Option<i64>,
    pub estimated_accuracy: f64,
    pub last_update: i64,
}

/// Full derived analysis of one window. Never persisted; cacheable.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub window_size: usize,
    pub window: Vec<ResultEntry>,
    pub frequencies: BTreeMap<String, u64>,
    pub probabilities: BTreeMap<String, f64>,
    pub patterns: PatternReport,
    pub trends: TrendReport,
    pub suggestion: String,
    pub statistics: StatsFooter,
}

const FALLBACK_SUGGESTION: &str = "insufficient data to form an optimized suggestion";

/// Stateless window analysis plus a per-tenant record cache, keyed by the
/// fingerprint (tenant total count, window size).
pub struct AnalyticsEngine {
    caches: Mutex<HashMap<String, AnalysisCache>>,
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self {
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze the given window snapshot, serving from the tenant cache
    /// when the fingerprint matches. Cached records are the same `Arc` the
    /// first computation produced, so they serialize byte-identically.
    pub fn analyze(&self, tenant: &str, input: &AnalysisInput) -> Arc<AnalysisRecord> {
        let fingerprint = (input.total as u64, input.window.len());

        {
            let caches = self.caches.lock();
            if let Some(record) = caches.get(tenant).and_then(|c| c.get(&fingerprint)) {
                debug!(tenant, ?fingerprint, "Analysis cache hit");
                return record;
            }
        }

        let record = Arc::new(Self::compute(&input.window, input.total, input.last_updated));

        let mut caches = self.caches.lock();
        caches
            .entry(tenant.to_string())
            .or_insert_with(|| AnalysisCache::new(CACHE_CAPACITY))
            .insert(fingerprint, Arc::clone(&record));
        record
    }

    /// Drop every cached record for the tenant. Called after any mutation
    /// of the tenant's result sequence.
    pub fn invalidate(&self, tenant: &str) {
        self.caches.lock().remove(tenant);
    }

    /// Pure computation of an analysis record from an ordered window.
    pub fn compute(window: &[ResultEntry], total: usize, last_updated: i64) -> AnalysisRecord {
        let window_size = window.len();
        let values: Vec<i64> = window.iter().map(|entry| entry.value).collect();

        // Exact multiset count, numerically keyed for the tie-break below.
        let mut frequency: BTreeMap<i64, u64> = BTreeMap::new();
        for &value in &values {
            *frequency.entry(value).or_insert(0) += 1;
        }

        // One pass over adjacent pairs for both pattern families.
        let mut consecutive = Vec::new();
        let mut repetitions = Vec::new();
        for pair in values.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if (a as i128 - b as i128).abs() == 1 {
                consecutive.push(ConsecutivePair { from: a, to: b });
            }
            if a == b {
                repetitions.push(a);
            }
        }

        // Highest frequency wins; ties go to the smallest value. Ascending
        // iteration makes "keep the first strictly-greater count" exactly
        // that rule.
        let mut most_frequent: Option<i64> = None;
        let mut most_frequent_count: u64 = 0;
        for (&value, &count) in &frequency {
            if count > most_frequent_count {
                most_frequent = Some(value);
                most_frequent_count = count;
            }
        }

        let mean = if values.is_empty() {
            0.0
        } else {
            values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
        };
        let median = median_of(&values);

        let dominant = if values.is_empty() {
            Dominant::Indeterminate
        } else if mean > 1.1 * median {
            Dominant::High
        } else if mean < 0.9 * median {
            Dominant::Low
        } else {
            Dominant::Neutral
        };

        let frequencies: BTreeMap<String, u64> = frequency
            .iter()
            .map(|(value, &count)| (value.to_string(), count))
            .collect();
        let probabilities: BTreeMap<String, f64> = frequency
            .iter()
            .map(|(value, &count)| (value.to_string(), count as f64 / window_size as f64))
            .collect();

        let suggestion = build_suggestion(
            most_frequent,
            most_frequent_count,
            dominant,
            mean,
            consecutive.len(),
            repetitions.len(),
        );

        let statistics = StatsFooter {
            total_results: total,
            dominant,
            most_frequent,
            estimated_accuracy: 0.5 + (total as f64 / 100.0).min(1.0) * 0.3,
            last_update: last_updated,
        };

        AnalysisRecord {
            window_size,
            window: window.to_vec(),
            frequencies,
            probabilities,
            patterns: PatternReport {
                consecutive,
                repetitions,
            },
            trends: TrendReport {
                most_frequent,
                most_frequent_count,
                mean,
                median,
                dominant,
            },
            suggestion,
            statistics,
        }
    }
}

fn median_of(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

fn build_suggestion(
    most_frequent: Option<i64>,
    most_frequent_count: u64,
    dominant: Dominant,
    mean: f64,
    consecutive_count: usize,
    repetition_count: usize,
) -> String {
    let mut clauses = Vec::new();

    if let Some(value) = most_frequent {
        clauses.push(format!(
            "value {} appeared {} times (highest frequency)",
            value, most_frequent_count
        ));
    }
    if matches!(dominant, Dominant::High | Dominant::Low) {
        clauses.push(format!(
            "trend toward {} values (mean {:.2})",
            dominant.as_str(),
            mean
        ));
    }
    if consecutive_count > 0 {
        clauses.push(format!(
            "{} consecutive sequences detected",
            consecutive_count
        ));
    }
    if repetition_count > 0 {
        clauses.push(format!(
            "{} immediate repetitions detected",
            repetition_count
        ));
    }

    if clauses.is_empty() {
        FALLBACK_SUGGESTION.to_string()
    } else {
        clauses.join("; ")
    }
}
