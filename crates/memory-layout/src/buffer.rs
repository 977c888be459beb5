// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII device-memory guard and the owned/borrowed backing split.
//!
//! A model's memory span is either allocated by the runtime
//! ([`MemoryBacking::Owned`]) or supplied by the caller
//! ([`MemoryBacking::Borrowed`]). Encoding the distinction in the type
//! makes it impossible for the teardown path to free caller-owned
//! memory: dropping a `Borrowed` backing is a no-op by construction.

use crate::LayoutError;
use device_api::{DeviceDriver, DevicePtr, MemoryTier};
use std::sync::Arc;

/// An RAII guard around one device allocation.
///
/// The allocation is freed when the guard is dropped. A free failure at
/// drop time cannot be propagated, so it is logged and swallowed — the
/// pointer is gone either way.
pub struct DeviceBuffer {
    /// Wrapped in `Option` so `drop` can `take()` it.
    ptr: Option<DevicePtr>,
    size: u64,
    device: Arc<dyn DeviceDriver>,
}

impl DeviceBuffer {
    /// Allocates `size` bytes in the given tier.
    pub fn alloc(
        device: Arc<dyn DeviceDriver>,
        size: u64,
        tier: MemoryTier,
    ) -> Result<Self, LayoutError> {
        let ptr = device.alloc(size, tier).map_err(LayoutError::Alloc)?;
        tracing::debug!("allocated {size} bytes at {ptr} ({tier:?})");
        Ok(Self {
            ptr: Some(ptr),
            size,
            device,
        })
    }

    /// The allocation's base address.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr.expect("buffer already consumed")
    }

    /// The allocation's size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            if let Err(e) = self.device.free(ptr) {
                tracing::error!("device free of {ptr} failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

/// Physical backing for a model's memory span.
#[derive(Debug)]
pub enum MemoryBacking {
    /// Allocated by the runtime; freed on drop.
    Owned(DeviceBuffer),
    /// Supplied by the caller; never freed by the runtime.
    Borrowed { ptr: DevicePtr, size: u64 },
}

impl MemoryBacking {
    /// The span's base address.
    pub fn ptr(&self) -> DevicePtr {
        match self {
            MemoryBacking::Owned(buf) => buf.ptr(),
            MemoryBacking::Borrowed { ptr, .. } => *ptr,
        }
    }

    /// The span's size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            MemoryBacking::Owned(buf) => buf.size(),
            MemoryBacking::Borrowed { size, .. } => *size,
        }
    }

    /// Returns `true` if the runtime owns (and will free) this memory.
    pub fn is_owned(&self) -> bool {
        matches!(self, MemoryBacking::Owned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_api::{status, StubDevice};

    #[test]
    fn test_alloc_and_drop_frees() {
        let dev = Arc::new(StubDevice::new());
        let buf = DeviceBuffer::alloc(dev.clone(), 1024, MemoryTier::Global).unwrap();
        assert!(!buf.ptr().is_null());
        assert_eq!(buf.size(), 1024);
        assert_eq!(dev.live_allocations(), 1);

        drop(buf);
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_alloc_failure() {
        let dev = Arc::new(StubDevice::new());
        dev.fail_once("alloc", status::RESOURCE_EXHAUSTED);
        let err = DeviceBuffer::alloc(dev, 1024, MemoryTier::Global).unwrap_err();
        assert!(matches!(err, LayoutError::Alloc(_)));
    }

    #[test]
    fn test_borrowed_backing_not_freed() {
        let dev = Arc::new(StubDevice::new());
        let raw = dev.alloc(512, MemoryTier::Global).unwrap();

        let backing = MemoryBacking::Borrowed {
            ptr: raw,
            size: 512,
        };
        assert!(!backing.is_owned());
        assert_eq!(backing.ptr(), raw);
        drop(backing);

        // The caller's allocation must survive the backing's drop.
        assert_eq!(dev.live_allocations(), 1);
    }

    #[test]
    fn test_owned_backing() {
        let dev = Arc::new(StubDevice::new());
        let buf = DeviceBuffer::alloc(dev.clone(), 256, MemoryTier::Global).unwrap();
        let backing = MemoryBacking::Owned(buf);
        assert!(backing.is_owned());
        assert_eq!(backing.size(), 256);
        drop(backing);
        assert_eq!(dev.live_allocations(), 0);
    }
}
