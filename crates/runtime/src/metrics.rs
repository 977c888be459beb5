// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-run execution profiling.
//!
//! [`ExecutionMetrics`] collects submission and synchronize timings plus
//! per-kind task counts for the most recent run of a model. Collection
//! is gated by `RuntimeConfig::enable_profiling`.

use compiled_model::TaskKind;
use std::collections::BTreeMap;
use std::time::Duration;

/// Timing and task-count data for one execution run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutionMetrics {
    /// Total wall-clock time of the run.
    pub total_duration: Duration,
    /// Time spent submitting tasks to their streams.
    pub distribute_duration: Duration,
    /// Time spent blocked in the stream synchronize.
    pub sync_duration: Duration,
    /// Tasks submitted during the run.
    pub tasks_distributed: usize,
    /// Submission count per task kind. BTreeMap for a stable summary
    /// ordering.
    pub kind_counts: BTreeMap<String, usize>,
    /// Completed runs of the owning model so far.
    pub runs: u64,
}

impl ExecutionMetrics {
    /// Creates an empty metrics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the per-run fields, keeping the run counter.
    pub fn begin_run(&mut self) {
        self.total_duration = Duration::ZERO;
        self.distribute_duration = Duration::ZERO;
        self.sync_duration = Duration::ZERO;
        self.tasks_distributed = 0;
        self.kind_counts.clear();
    }

    /// Records one submitted task.
    pub fn record_task(&mut self, kind: TaskKind) {
        self.tasks_distributed += 1;
        *self.kind_counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Finalises the run with its phase timings.
    pub fn finalise(&mut self, distribute: Duration, sync: Duration, total: Duration) {
        self.distribute_duration = distribute;
        self.sync_duration = sync;
        self.total_duration = total;
        self.runs += 1;
    }

    /// Tasks submitted per second of distribute time.
    pub fn tasks_per_second(&self) -> f64 {
        let secs = self.distribute_duration.as_secs_f64();
        if secs <= 0.0 || self.tasks_distributed == 0 {
            return 0.0;
        }
        self.tasks_distributed as f64 / secs
    }

    /// Returns a human-readable summary of the last run.
    pub fn summary(&self) -> String {
        let kinds: Vec<String> = self
            .kind_counts
            .iter()
            .map(|(kind, n)| format!("{n} {kind}"))
            .collect();
        format!(
            "Run #{}: {:.2}ms total ({:.2}ms distribute, {:.2}ms sync), {} tasks [{}]",
            self.runs,
            self.total_duration.as_secs_f64() * 1000.0,
            self.distribute_duration.as_secs_f64() * 1000.0,
            self.sync_duration.as_secs_f64() * 1000.0,
            self.tasks_distributed,
            kinds.join(", "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let m = ExecutionMetrics::new();
        assert_eq!(m.tasks_per_second(), 0.0);
        assert_eq!(m.runs, 0);
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = ExecutionMetrics::new();
        m.begin_run();
        m.record_task(TaskKind::DataCopy);
        m.record_task(TaskKind::DataCopy);
        m.record_task(TaskKind::EndGraph);
        m.finalise(
            Duration::from_millis(2),
            Duration::from_millis(5),
            Duration::from_millis(8),
        );

        assert_eq!(m.tasks_distributed, 3);
        assert_eq!(m.kind_counts["data-copy"], 2);
        assert_eq!(m.kind_counts["end-graph"], 1);
        assert_eq!(m.runs, 1);
        assert!(m.tasks_per_second() > 0.0);
    }

    #[test]
    fn test_begin_run_keeps_counter() {
        let mut m = ExecutionMetrics::new();
        m.begin_run();
        m.record_task(TaskKind::Noop);
        m.finalise(Duration::ZERO, Duration::ZERO, Duration::from_millis(1));

        m.begin_run();
        assert_eq!(m.tasks_distributed, 0);
        assert!(m.kind_counts.is_empty());
        assert_eq!(m.runs, 1);
    }

    #[test]
    fn test_summary() {
        let mut m = ExecutionMetrics::new();
        m.begin_run();
        m.record_task(TaskKind::DataCopy);
        m.record_task(TaskKind::EndGraph);
        m.finalise(
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_millis(3),
        );
        let s = m.summary();
        assert!(s.contains("Run #1"));
        assert!(s.contains("2 tasks"));
        assert!(s.contains("1 data-copy"));
    }
}
