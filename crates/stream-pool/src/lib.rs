// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # stream-pool
//!
//! A reference-counted allocator for hardware command streams, shared
//! across all concurrently loaded models.
//!
//! # Key Components
//!
//! - [`StreamPool`] — keyed by `(priority, flags)`; serves acquisitions
//!   from the lowest-loaded existing stream the requesting model does
//!   not already own, with a deterministic creation-order tie-break.
//! - [`ModelId`] — ownership accounting handle for one loaded model.
//! - [`PoolStats`] — reuse/create/destroy counters.
//!
//! # Ownership Model
//!
//! ```text
//! acquire(key, model) ──► existing stream, key match, model ∉ owners?
//!        │                      │ yes: add owner            │ no
//!        ▼                      ▼                           ▼
//!   RawStream  ◄───────── reuse (refcount +1)      create on device
//!
//! release(stream, model) ──► remove owner ──► owners empty? destroy
//! ```
//!
//! A model never shares a stream with itself: reusing one queue for two
//! logically parallel subgraphs of the same model would serialize them.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use device_api::StubDevice;
//! use stream_pool::{ModelId, StreamKey, StreamPool};
//!
//! let pool = StreamPool::new(Arc::new(StubDevice::new()));
//! let key = StreamKey { priority: 0, flags: 0 };
//!
//! let a = pool.acquire(key, ModelId::new(1), 8).unwrap();
//! let b = pool.acquire(key, ModelId::new(2), 8).unwrap();
//! assert_eq!(a, b); // distinct models share one queue
//!
//! pool.release(a, ModelId::new(1), false).unwrap();
//! pool.release(b, ModelId::new(2), false).unwrap();
//! assert_eq!(pool.live_streams(), 0);
//! ```

mod error;
mod pool;
mod stats;

pub use error::PoolError;
pub use pool::{ModelId, StreamKey, StreamPool};
pub use stats::PoolStats;
