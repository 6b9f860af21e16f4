//! Per-flag evaluation counters.
//!
//! Recording takes a short mutex on a map of plain counters, so the resolver
//! can feed it inline without affecting the evaluation result.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::resolver::Source;

#[derive(Debug, Default, Clone)]
struct FlagCounters {
    evaluations: u64,
    primary: u64,
    secondary: u64,
    offline: u64,
    adapter_attempts: u64,
    adapter_failures: u64,
    timeouts: u64,
    offline_errors: u64,
    total_latency: Duration,
    max_latency: Duration,
}

/// Point-in-time view of one flag's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagStats {
    pub evaluations: u64,
    pub primary: u64,
    pub secondary: u64,
    pub offline: u64,
    pub adapter_attempts: u64,
    pub adapter_failures: u64,
    pub timeouts: u64,
    pub offline_errors: u64,
    pub mean_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Share of evaluations answered by the secondary or offline tier.
    pub fallback_rate: f64,
    /// Adapter failures per adapter attempt.
    pub failure_rate: f64,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl From<&FlagCounters> for FlagStats {
    fn from(c: &FlagCounters) -> Self {
        let mean = if c.evaluations == 0 {
            0.0
        } else {
            c.total_latency.as_secs_f64() * 1000.0 / c.evaluations as f64
        };

        Self {
            evaluations: c.evaluations,
            primary: c.primary,
            secondary: c.secondary,
            offline: c.offline,
            adapter_attempts: c.adapter_attempts,
            adapter_failures: c.adapter_failures,
            timeouts: c.timeouts,
            offline_errors: c.offline_errors,
            mean_latency_ms: mean,
            max_latency_ms: c.max_latency.as_secs_f64() * 1000.0,
            fallback_rate: ratio(c.secondary + c.offline, c.evaluations),
            failure_rate: ratio(c.adapter_failures, c.adapter_attempts),
        }
    }
}

#[derive(Debug, Default)]
pub struct FlagMetrics {
    flags: Mutex<BTreeMap<String, FlagCounters>>,
}

impl FlagMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_counters(&self, flag_key: &str, update: impl FnOnce(&mut FlagCounters)) {
        // A poisoned lock only means a previous recorder panicked; counters stay usable.
        let mut flags = match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(flags.entry(flag_key.to_string()).or_default());
    }

    pub fn record_evaluation(&self, flag_key: &str, source: Source, latency: Duration) {
        self.with_counters(flag_key, |c| {
            c.evaluations += 1;
            match source {
                Source::Primary => c.primary += 1,
                Source::Secondary => c.secondary += 1,
                Source::Offline => c.offline += 1,
            }
            c.total_latency += latency;
            c.max_latency = c.max_latency.max(latency);
        });
    }

    /// Records one adapter call and whether it produced an answer.
    pub fn record_adapter_attempt(&self, flag_key: &str, failed: bool, timed_out: bool) {
        self.with_counters(flag_key, |c| {
            c.adapter_attempts += 1;
            if failed {
                c.adapter_failures += 1;
            }
            if timed_out {
                c.timeouts += 1;
            }
        });
    }

    pub fn record_offline_error(&self, flag_key: &str) {
        self.with_counters(flag_key, |c| c.offline_errors += 1);
    }

    pub fn flag(&self, flag_key: &str) -> Option<FlagStats> {
        let flags = match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flags.get(flag_key).map(FlagStats::from)
    }

    pub fn snapshot(&self) -> BTreeMap<String, FlagStats> {
        let flags = match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flags
            .iter()
            .map(|(key, counters)| (key.clone(), FlagStats::from(counters)))
            .collect()
    }

    pub fn reset(&self) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.clear();
        }
    }
}
