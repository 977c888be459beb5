// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool usage statistics for diagnostics.
//!
//! [`PoolStats`] tracks how often stream acquisition was served by reuse
//! versus fresh creation. A low reuse ratio under a multi-model workload
//! usually means the models' (priority, flags) keys never coincide.

/// Cumulative statistics about stream-pool usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    /// Total acquisition requests.
    pub total_acquires: u64,
    /// Acquisitions served by an existing stream.
    pub reused: u64,
    /// Acquisitions that created a new stream.
    pub created: u64,
    /// Acquisitions that failed at the device.
    pub create_failures: u64,
    /// Streams destroyed so far.
    pub destroyed: u64,
}

impl PoolStats {
    /// Returns the reuse ratio as a fraction in `[0.0, 1.0]`.
    pub fn reuse_ratio(&self) -> f64 {
        let served = self.reused + self.created;
        if served == 0 {
            return 0.0;
        }
        self.reused as f64 / served as f64
    }

    pub(crate) fn record_reuse(&mut self) {
        self.total_acquires += 1;
        self.reused += 1;
    }

    pub(crate) fn record_create(&mut self) {
        self.total_acquires += 1;
        self.created += 1;
    }

    pub(crate) fn record_create_failure(&mut self) {
        self.total_acquires += 1;
        self.create_failures += 1;
    }

    pub(crate) fn record_destroy(&mut self) {
        self.destroyed += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "StreamPool: {} acquires ({} reused, {} created, {} failed), {} destroyed, {:.0}% reuse",
            self.total_acquires,
            self.reused,
            self.created,
            self.create_failures,
            self.destroyed,
            self.reuse_ratio() * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let s = PoolStats::default();
        assert_eq!(s.reuse_ratio(), 0.0);
    }

    #[test]
    fn test_reuse_ratio() {
        let mut s = PoolStats::default();
        s.record_create();
        s.record_reuse();
        s.record_reuse();
        s.record_reuse();
        assert!((s.reuse_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary() {
        let mut s = PoolStats::default();
        s.record_create();
        s.record_destroy();
        let out = s.summary();
        assert!(out.contains("1 created"));
        assert!(out.contains("1 destroyed"));
    }
}
