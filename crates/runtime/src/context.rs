// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The process-wide runtime context.
//!
//! Everything that used to be a global in comparable runtimes — the
//! task-kind factory, the stream pool, the model-id counter — lives in
//! one [`RuntimeContext`] constructed explicitly at process start and
//! passed (by `Arc`) into every entry point. Lifetime and teardown order
//! are then ordinary ownership, not static-initialization order.

use crate::{RuntimeConfig, TaskRegistry};
use device_api::DeviceDriver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream_pool::{ModelId, StreamPool};

/// Shared state for all models loaded in this process.
pub struct RuntimeContext {
    device: Arc<dyn DeviceDriver>,
    pool: StreamPool,
    registry: TaskRegistry,
    config: RuntimeConfig,
    next_model_id: AtomicU64,
}

impl RuntimeContext {
    /// Creates a context with the built-in task kinds registered.
    pub fn new(device: Arc<dyn DeviceDriver>, config: RuntimeConfig) -> Arc<Self> {
        Self::with_registry(device, config, TaskRegistry::builtin())
    }

    /// Creates a context with a caller-supplied task registry. Kinds
    /// must be registered before any model referencing them is loaded.
    pub fn with_registry(
        device: Arc<dyn DeviceDriver>,
        config: RuntimeConfig,
        registry: TaskRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool: StreamPool::new(device.clone()),
            registry,
            device,
            config,
            next_model_id: AtomicU64::new(1),
        })
    }

    /// The device driver.
    pub fn device(&self) -> &Arc<dyn DeviceDriver> {
        &self.device
    }

    /// The shared stream pool.
    pub fn pool(&self) -> &StreamPool {
        &self.pool
    }

    /// The task-kind registry. Out-of-crate kinds may be registered
    /// here before any model is loaded.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Hands out the next model id.
    pub(crate) fn allocate_model_id(&self) -> ModelId {
        ModelId::new(self.next_model_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("pool", &self.pool)
            .field("registered_kinds", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_api::StubDevice;

    #[test]
    fn test_model_ids_monotonic() {
        let ctx = RuntimeContext::new(Arc::new(StubDevice::new()), RuntimeConfig::default());
        let a = ctx.allocate_model_id();
        let b = ctx.allocate_model_id();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_builtin_kinds_registered() {
        let ctx = RuntimeContext::new(Arc::new(StubDevice::new()), RuntimeConfig::default());
        assert_eq!(ctx.registry().len(), 13);
    }
}
