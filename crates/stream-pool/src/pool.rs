// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The shared hardware-stream pool.
//!
//! [`StreamPool`] bounds the number of live hardware command queues
//! across all concurrently loaded models. Streams are keyed by
//! `(priority, flags)`; an acquisition request is served by the
//! lowest-loaded existing stream with a matching key **that the
//! requesting model does not already own**, and only creates a fresh
//! stream when no such candidate exists.
//!
//! # Self-Ownership Exclusion
//!
//! The exclusion is load-bearing, not an optimization: two logically
//! parallel subgraphs of one model placed on the same physical queue
//! would execute serially, silently destroying the concurrency the
//! compiler planned for. A stream a model already owns is therefore
//! never a reuse candidate for that model, even if it is otherwise idle.
//!
//! # Determinism
//!
//! Candidates are ordered by ascending pending-task count, then by
//! creation sequence number. Identical acquisition sequences therefore
//! produce identical stream assignments, which keeps multi-stream
//! failures reproducible.

use crate::{PoolError, PoolStats};
use device_api::{DeviceDriver, RawStream};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Identifies one loaded model for stream-ownership accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ModelId(u64);

impl ModelId {
    /// Wraps a raw model id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// The pool key: streams are only shared between requests that agree on
/// both priority and creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StreamKey {
    pub priority: i32,
    pub flags: u32,
}

/// One pooled stream and its ownership bookkeeping.
struct PooledStream {
    raw: RawStream,
    key: StreamKey,
    /// Creation sequence number; the deterministic tie-break.
    seq: u64,
    /// Owning models and the task-count hint each contributed.
    owners: HashMap<ModelId, usize>,
}

impl PooledStream {
    fn pending_tasks(&self) -> usize {
        self.owners.values().sum()
    }
}

struct PoolInner {
    streams: Vec<PooledStream>,
    next_seq: u64,
    stats: PoolStats,
}

/// A reference-counted pool of hardware command streams.
pub struct StreamPool {
    device: Arc<dyn DeviceDriver>,
    inner: Mutex<PoolInner>,
}

impl StreamPool {
    /// Creates an empty pool over the given device.
    pub fn new(device: Arc<dyn DeviceDriver>) -> Self {
        Self {
            device,
            inner: Mutex::new(PoolInner {
                streams: Vec::new(),
                next_seq: 0,
                stats: PoolStats::default(),
            }),
        }
    }

    /// Acquires a stream for `model` with the given key.
    ///
    /// Reuses the lowest-loaded existing stream with a matching key not
    /// already owned by `model`; creates a new one otherwise.
    /// `hint_task_count` is the number of tasks the model expects to
    /// submit, used only as the load metric for future placements.
    pub fn acquire(
        &self,
        key: StreamKey,
        model: ModelId,
        hint_task_count: usize,
    ) -> Result<RawStream, PoolError> {
        let mut inner = self.lock();

        let candidate = inner
            .streams
            .iter_mut()
            .filter(|s| s.key == key && !s.owners.contains_key(&model))
            .min_by_key(|s| (s.pending_tasks(), s.seq));

        if let Some(stream) = candidate {
            stream.owners.insert(model, hint_task_count);
            let raw = stream.raw;
            inner.stats.record_reuse();
            tracing::debug!("{model}: reusing stream {raw} (key {key:?})");
            return Ok(raw);
        }

        let raw = match self.device.create_stream(key.priority, key.flags) {
            Ok(raw) => raw,
            Err(e) => {
                inner.stats.record_create_failure();
                return Err(PoolError::Create(e));
            }
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let mut owners = HashMap::new();
        owners.insert(model, hint_task_count);
        inner.streams.push(PooledStream {
            raw,
            key,
            seq,
            owners,
        });
        inner.stats.record_create();
        tracing::debug!("{model}: created stream {raw} (key {key:?}, seq {seq})");
        Ok(raw)
    }

    /// Releases `model`'s ownership of `stream`.
    ///
    /// The stream is destroyed once no model owns it. With `force`, it
    /// is destroyed immediately regardless of remaining owners — the
    /// abnormal-teardown path. Ownership bookkeeping is updated before
    /// the device call, so a failed destroy never leaves a dangling
    /// owner entry.
    pub fn release(
        &self,
        stream: RawStream,
        model: ModelId,
        force: bool,
    ) -> Result<(), PoolError> {
        let mut inner = self.lock();

        let idx = inner
            .streams
            .iter()
            .position(|s| s.raw == stream)
            .ok_or(PoolError::UnknownStream(stream.as_u64()))?;

        if inner.streams[idx].owners.remove(&model).is_none() && !force {
            return Err(PoolError::NotAnOwner {
                model: model.as_u64(),
                stream: stream.as_u64(),
            });
        }

        let idle = inner.streams[idx].owners.is_empty();
        if !idle && !force {
            tracing::debug!(
                "{model}: released stream {stream}, {} owners remain",
                inner.streams[idx].owners.len()
            );
            return Ok(());
        }

        if !idle {
            tracing::warn!(
                "{model}: force-destroying stream {stream} with {} owners remaining",
                inner.streams[idx].owners.len()
            );
        }
        inner.streams.remove(idx);
        inner.stats.record_destroy();
        self.device
            .destroy_stream(stream)
            .map_err(PoolError::Destroy)?;
        tracing::debug!("{model}: destroyed stream {stream}");
        Ok(())
    }

    /// Number of streams currently pooled.
    pub fn live_streams(&self) -> usize {
        self.lock().streams.len()
    }

    /// Returns a snapshot of pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("stream pool mutex poisoned")
    }
}

impl fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPool")
            .field("live_streams", &self.live_streams())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_api::{status, StubDevice};

    fn pool() -> (Arc<StubDevice>, StreamPool) {
        let dev = Arc::new(StubDevice::new());
        let pool = StreamPool::new(dev.clone());
        (dev, pool)
    }

    const KEY: StreamKey = StreamKey {
        priority: 0,
        flags: 0,
    };

    #[test]
    fn test_create_on_empty_pool() {
        let (dev, pool) = pool();
        let s = pool.acquire(KEY, ModelId::new(1), 4).unwrap();
        assert_eq!(dev.live_streams(), 1);
        assert_eq!(pool.live_streams(), 1);
        assert_eq!(s.as_u64(), 1);
    }

    #[test]
    fn test_self_ownership_exclusion() {
        // Two acquisitions from the same model must yield distinct
        // streams even with identical keys.
        let (dev, pool) = pool();
        let a = ModelId::new(1);
        let s1 = pool.acquire(KEY, a, 4).unwrap();
        let s2 = pool.acquire(KEY, a, 4).unwrap();
        assert_ne!(s1, s2);
        assert_eq!(dev.live_streams(), 2);
    }

    #[test]
    fn test_cross_model_reuse() {
        let (dev, pool) = pool();
        let s1 = pool.acquire(KEY, ModelId::new(1), 4).unwrap();
        let s2 = pool.acquire(KEY, ModelId::new(2), 4).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(dev.live_streams(), 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_key_mismatch_creates_new() {
        let (dev, pool) = pool();
        let _ = pool.acquire(KEY, ModelId::new(1), 4).unwrap();
        let other = StreamKey {
            priority: 1,
            flags: 0,
        };
        let _ = pool.acquire(other, ModelId::new(2), 4).unwrap();
        assert_eq!(dev.live_streams(), 2);
    }

    #[test]
    fn test_lowest_loaded_wins() {
        let (_dev, pool) = pool();
        let a = ModelId::new(1);
        // s1 carries 10 pending tasks, s2 carries 2.
        let s1 = pool.acquire(KEY, a, 10).unwrap();
        let s2 = pool.acquire(KEY, a, 2).unwrap();
        assert_ne!(s1, s2);

        let s3 = pool.acquire(KEY, ModelId::new(2), 1).unwrap();
        assert_eq!(s3, s2);
    }

    #[test]
    fn test_tie_break_is_creation_order() {
        let (_dev, pool) = pool();
        let a = ModelId::new(1);
        // Equal load on both candidates.
        let s1 = pool.acquire(KEY, a, 5).unwrap();
        let _s2 = pool.acquire(KEY, a, 5).unwrap();

        let s3 = pool.acquire(KEY, ModelId::new(2), 1).unwrap();
        assert_eq!(s3, s1, "earliest-created stream wins the tie");
    }

    #[test]
    fn test_release_refcounted_destroy() {
        let (dev, pool) = pool();
        let a = ModelId::new(1);
        let b = ModelId::new(2);
        let s = pool.acquire(KEY, a, 4).unwrap();
        let _ = pool.acquire(KEY, b, 4).unwrap();

        pool.release(s, a, false).unwrap();
        assert_eq!(dev.live_streams(), 1, "stream still owned by b");

        pool.release(s, b, false).unwrap();
        assert_eq!(dev.live_streams(), 0);
        assert_eq!(pool.live_streams(), 0);
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[test]
    fn test_force_release_with_owners() {
        let (dev, pool) = pool();
        let a = ModelId::new(1);
        let s = pool.acquire(KEY, a, 4).unwrap();
        let _ = pool.acquire(KEY, ModelId::new(2), 4).unwrap();

        pool.release(s, a, true).unwrap();
        assert_eq!(dev.live_streams(), 0, "force destroys despite owners");
    }

    #[test]
    fn test_release_not_an_owner() {
        let (_dev, pool) = pool();
        let s = pool.acquire(KEY, ModelId::new(1), 4).unwrap();
        let err = pool.release(s, ModelId::new(9), false).unwrap_err();
        assert!(matches!(err, PoolError::NotAnOwner { .. }));
    }

    #[test]
    fn test_release_unknown_stream() {
        let (_dev, pool) = pool();
        let err = pool
            .release(RawStream::new(404), ModelId::new(1), false)
            .unwrap_err();
        assert!(matches!(err, PoolError::UnknownStream(404)));
    }

    #[test]
    fn test_create_failure_surfaces() {
        let (dev, pool) = pool();
        dev.fail_once("create_stream", status::RESOURCE_EXHAUSTED);
        let err = pool.acquire(KEY, ModelId::new(1), 4).unwrap_err();
        assert!(matches!(err, PoolError::Create(_)));
        assert_eq!(pool.stats().create_failures, 1);
    }

    #[test]
    fn test_released_stream_becomes_reusable_by_former_owner() {
        let (_dev, pool) = pool();
        let a = ModelId::new(1);
        let b = ModelId::new(2);
        let s = pool.acquire(KEY, a, 4).unwrap();
        let _ = pool.acquire(KEY, b, 4).unwrap();

        // a releases, then asks again: the stream is no longer owned by
        // a, so it is a valid candidate again.
        pool.release(s, a, false).unwrap();
        let s2 = pool.acquire(KEY, a, 4).unwrap();
        assert_eq!(s, s2);
    }
}
