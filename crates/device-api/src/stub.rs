// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! An in-memory device implementation for tests and development hosts.
//!
//! [`StubDevice`] fabricates handles and device addresses, keeps real
//! byte backing for every allocation (so host↔device copies round-trip
//! and tests can read back patched argument buffers), and records every
//! stream submission in order.
//!
//! # Failure Injection
//!
//! Tests drive error paths by arming failures per driver entry point:
//!
//! ```
//! use device_api::{status, DeviceDriver, StubDevice};
//!
//! let dev = StubDevice::new();
//! dev.fail_once("create_stream", status::RESOURCE_EXHAUSTED);
//! assert!(dev.create_stream(0, 0).is_err());
//! assert!(dev.create_stream(0, 0).is_ok()); // armed failure consumed
//! ```

use crate::{
    CacheOp, CondCmp, DeviceDriver, DeviceError, DevicePtr, DeviceResult, MemcpyKind,
    MemoryTier, RawEvent, RawLabel, RawStream, status,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded stream submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCall {
    Copy {
        dst: DevicePtr,
        src: DevicePtr,
        len: u64,
        kind: MemcpyKind,
    },
    EventRecord(RawEvent),
    EventWait(RawEvent),
    WaitValue {
        addr: DevicePtr,
        value: u64,
    },
    LabelSet(RawLabel),
    LabelSwitch {
        index_addr: DevicePtr,
        labels: Vec<RawLabel>,
    },
    LabelGoto(RawLabel),
    StreamSwitch {
        cond_addr: DevicePtr,
        rhs: u64,
        cmp: CondCmp,
        target: RawStream,
    },
    StreamActive(RawStream),
    EndGraph {
        dump: bool,
    },
    CacheOp {
        addr: DevicePtr,
        len: u64,
        op: CacheOp,
    },
    FusionBegin,
    FusionEnd,
    Memset {
        dst: DevicePtr,
        value: u8,
        len: u64,
    },
}

/// How an armed failure behaves.
#[derive(Debug, Clone, Copy)]
enum FailMode {
    /// Fail the next call, then disarm.
    Once(i32),
    /// Fail every call until cleared.
    Always(i32),
}

#[derive(Default)]
struct StubInner {
    next_handle: u64,
    next_addr: u64,
    live_streams: HashSet<u64>,
    live_events: HashSet<u64>,
    live_labels: HashSet<u64>,
    /// Allocation base → backing bytes. BTreeMap so an interior address
    /// can be resolved to its owning allocation by range lookup.
    allocations: BTreeMap<u64, Vec<u8>>,
    tiers: HashMap<u64, MemoryTier>,
    submissions: HashMap<u64, Vec<StubCall>>,
    failures: HashMap<&'static str, FailMode>,
    sync_count: u64,
}

impl StubInner {
    fn check(&mut self, op: &'static str) -> DeviceResult<()> {
        match self.failures.get(op).copied() {
            Some(FailMode::Once(code)) => {
                self.failures.remove(op);
                Err(DeviceError::new(op, code))
            }
            Some(FailMode::Always(code)) => Err(DeviceError::new(op, code)),
            None => Ok(()),
        }
    }

    fn fresh_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Resolves an address to (allocation base, offset within it).
    fn owning_allocation(&self, addr: DevicePtr) -> Option<(u64, usize)> {
        let raw = addr.as_u64();
        let (base, backing) = self.allocations.range(..=raw).next_back()?;
        let offset = raw - base;
        if offset < backing.len() as u64 {
            Some((*base, offset as usize))
        } else {
            None
        }
    }

    fn record(&mut self, stream: RawStream, op: &'static str, call: StubCall) -> DeviceResult<()> {
        if !self.live_streams.contains(&stream.as_u64()) {
            return Err(DeviceError::new(op, status::INVALID_HANDLE));
        }
        self.submissions.entry(stream.as_u64()).or_default().push(call);
        Ok(())
    }
}

/// An in-memory [`DeviceDriver`] with call recording and failure injection.
pub struct StubDevice {
    inner: Mutex<StubInner>,
}

impl StubDevice {
    /// Creates a stub device with no armed failures.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StubInner {
                // Leave address 0 unused so fabricated pointers are
                // never null.
                next_addr: 0x1000,
                ..Default::default()
            }),
        }
    }

    /// Arms a one-shot failure for the named driver entry point.
    pub fn fail_once(&self, op: &'static str, code: i32) {
        self.lock().failures.insert(op, FailMode::Once(code));
    }

    /// Arms a persistent failure for the named driver entry point.
    pub fn fail_always(&self, op: &'static str, code: i32) {
        self.lock().failures.insert(op, FailMode::Always(code));
    }

    /// Clears all armed failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Returns the ordered submissions recorded for `stream`.
    pub fn submissions(&self, stream: RawStream) -> Vec<StubCall> {
        self.lock()
            .submissions
            .get(&stream.as_u64())
            .cloned()
            .unwrap_or_default()
    }

    /// Number of streams currently alive.
    pub fn live_streams(&self) -> usize {
        self.lock().live_streams.len()
    }

    /// Number of events currently alive.
    pub fn live_events(&self) -> usize {
        self.lock().live_events.len()
    }

    /// Number of labels currently alive.
    pub fn live_labels(&self) -> usize {
        self.lock().live_labels.len()
    }

    /// Number of device allocations currently alive.
    pub fn live_allocations(&self) -> usize {
        self.lock().allocations.len()
    }

    /// Number of `synchronize_stream` calls observed.
    pub fn sync_count(&self) -> u64 {
        self.lock().sync_count
    }

    /// Reads `len` bytes of device memory for test assertions.
    ///
    /// # Panics
    /// Panics if the range does not fall inside one live allocation.
    pub fn read(&self, addr: DevicePtr, len: usize) -> Vec<u8> {
        let inner = self.lock();
        let (base, offset) = inner
            .owning_allocation(addr)
            .expect("read outside any live allocation");
        let backing = &inner.allocations[&base];
        assert!(
            offset + len <= backing.len(),
            "read of {len} bytes at offset {offset} overruns allocation of {} bytes",
            backing.len()
        );
        backing[offset..offset + len].to_vec()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubInner> {
        self.inner.lock().expect("stub device mutex poisoned")
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for StubDevice {
    fn create_stream(&self, _priority: i32, _flags: u32) -> DeviceResult<RawStream> {
        let mut inner = self.lock();
        inner.check("create_stream")?;
        let h = inner.fresh_handle();
        inner.live_streams.insert(h);
        Ok(RawStream::new(h))
    }

    fn destroy_stream(&self, stream: RawStream) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("destroy_stream")?;
        if !inner.live_streams.remove(&stream.as_u64()) {
            return Err(DeviceError::new("destroy_stream", status::INVALID_HANDLE));
        }
        inner.submissions.remove(&stream.as_u64());
        Ok(())
    }

    fn synchronize_stream(
        &self,
        stream: RawStream,
        _timeout: Option<Duration>,
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("synchronize_stream")?;
        if !inner.live_streams.contains(&stream.as_u64()) {
            return Err(DeviceError::new(
                "synchronize_stream",
                status::INVALID_HANDLE,
            ));
        }
        inner.sync_count += 1;
        Ok(())
    }

    fn create_event(&self) -> DeviceResult<RawEvent> {
        let mut inner = self.lock();
        inner.check("create_event")?;
        let h = inner.fresh_handle();
        inner.live_events.insert(h);
        Ok(RawEvent::new(h))
    }

    fn destroy_event(&self, event: RawEvent) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("destroy_event")?;
        if !inner.live_events.remove(&event.as_u64()) {
            return Err(DeviceError::new("destroy_event", status::INVALID_HANDLE));
        }
        Ok(())
    }

    fn create_label(&self) -> DeviceResult<RawLabel> {
        let mut inner = self.lock();
        inner.check("create_label")?;
        let h = inner.fresh_handle();
        inner.live_labels.insert(h);
        Ok(RawLabel::new(h))
    }

    fn destroy_label(&self, label: RawLabel) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("destroy_label")?;
        if !inner.live_labels.remove(&label.as_u64()) {
            return Err(DeviceError::new("destroy_label", status::INVALID_HANDLE));
        }
        Ok(())
    }

    fn alloc(&self, size: u64, tier: MemoryTier) -> DeviceResult<DevicePtr> {
        let mut inner = self.lock();
        inner.check("alloc")?;
        if size == 0 {
            return Err(DeviceError::new("alloc", status::INVALID_HANDLE));
        }
        // 256-byte aligned fake addresses, like real device allocators.
        let base = (inner.next_addr + 255) & !255;
        inner.next_addr = base + size;
        inner.allocations.insert(base, vec![0u8; size as usize]);
        inner.tiers.insert(base, tier);
        Ok(DevicePtr::new(base))
    }

    fn free(&self, ptr: DevicePtr) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("free")?;
        if inner.allocations.remove(&ptr.as_u64()).is_none() {
            return Err(DeviceError::new("free", status::INVALID_HANDLE));
        }
        inner.tiers.remove(&ptr.as_u64());
        Ok(())
    }

    fn memcpy_to_device(&self, dst: DevicePtr, src: &[u8]) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("memcpy_to_device")?;
        let (base, offset) = inner
            .owning_allocation(dst)
            .ok_or_else(|| DeviceError::new("memcpy_to_device", status::INVALID_HANDLE))?;
        let backing = inner.allocations.get_mut(&base).expect("resolved base");
        if offset + src.len() > backing.len() {
            return Err(DeviceError::new("memcpy_to_device", status::INVALID_HANDLE));
        }
        backing[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn memcpy_from_device(&self, dst: &mut [u8], src: DevicePtr) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("memcpy_from_device")?;
        let (base, offset) = inner
            .owning_allocation(src)
            .ok_or_else(|| DeviceError::new("memcpy_from_device", status::INVALID_HANDLE))?;
        let backing = &inner.allocations[&base];
        if offset + dst.len() > backing.len() {
            return Err(DeviceError::new(
                "memcpy_from_device",
                status::INVALID_HANDLE,
            ));
        }
        dst.copy_from_slice(&backing[offset..offset + dst.len()]);
        Ok(())
    }

    fn memcpy_device(&self, dst: DevicePtr, src: DevicePtr, len: u64) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("memcpy_device")?;
        let (src_base, src_off) = inner
            .owning_allocation(src)
            .ok_or_else(|| DeviceError::new("memcpy_device", status::INVALID_HANDLE))?;
        let bytes = inner.allocations[&src_base][src_off..src_off + len as usize].to_vec();
        let (dst_base, dst_off) = inner
            .owning_allocation(dst)
            .ok_or_else(|| DeviceError::new("memcpy_device", status::INVALID_HANDLE))?;
        let backing = inner.allocations.get_mut(&dst_base).expect("resolved base");
        backing[dst_off..dst_off + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    fn submit_copy(
        &self,
        stream: RawStream,
        dst: DevicePtr,
        src: DevicePtr,
        len: u64,
        kind: MemcpyKind,
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_copy")?;
        inner.record(stream, "submit_copy", StubCall::Copy { dst, src, len, kind })
    }

    fn submit_event_record(&self, stream: RawStream, event: RawEvent) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_event_record")?;
        inner.record(stream, "submit_event_record", StubCall::EventRecord(event))
    }

    fn submit_event_wait(&self, stream: RawStream, event: RawEvent) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_event_wait")?;
        inner.record(stream, "submit_event_wait", StubCall::EventWait(event))
    }

    fn submit_wait_value(
        &self,
        stream: RawStream,
        addr: DevicePtr,
        value: u64,
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_wait_value")?;
        inner.record(stream, "submit_wait_value", StubCall::WaitValue { addr, value })
    }

    fn submit_label_set(&self, stream: RawStream, label: RawLabel) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_label_set")?;
        inner.record(stream, "submit_label_set", StubCall::LabelSet(label))
    }

    fn submit_label_switch(
        &self,
        stream: RawStream,
        index_addr: DevicePtr,
        labels: &[RawLabel],
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_label_switch")?;
        inner.record(
            stream,
            "submit_label_switch",
            StubCall::LabelSwitch {
                index_addr,
                labels: labels.to_vec(),
            },
        )
    }

    fn submit_label_goto(&self, stream: RawStream, label: RawLabel) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_label_goto")?;
        inner.record(stream, "submit_label_goto", StubCall::LabelGoto(label))
    }

    fn submit_stream_switch(
        &self,
        stream: RawStream,
        cond_addr: DevicePtr,
        rhs: u64,
        cmp: CondCmp,
        target: RawStream,
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_stream_switch")?;
        inner.record(
            stream,
            "submit_stream_switch",
            StubCall::StreamSwitch {
                cond_addr,
                rhs,
                cmp,
                target,
            },
        )
    }

    fn submit_stream_active(&self, stream: RawStream, target: RawStream) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_stream_active")?;
        inner.record(stream, "submit_stream_active", StubCall::StreamActive(target))
    }

    fn submit_end_graph(&self, stream: RawStream, dump: bool) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_end_graph")?;
        inner.record(stream, "submit_end_graph", StubCall::EndGraph { dump })
    }

    fn submit_cache_op(
        &self,
        stream: RawStream,
        addr: DevicePtr,
        len: u64,
        op: CacheOp,
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_cache_op")?;
        inner.record(stream, "submit_cache_op", StubCall::CacheOp { addr, len, op })
    }

    fn submit_fusion_begin(&self, stream: RawStream) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_fusion_begin")?;
        inner.record(stream, "submit_fusion_begin", StubCall::FusionBegin)
    }

    fn submit_fusion_end(&self, stream: RawStream) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_fusion_end")?;
        inner.record(stream, "submit_fusion_end", StubCall::FusionEnd)
    }

    fn submit_memset(
        &self,
        stream: RawStream,
        dst: DevicePtr,
        value: u8,
        len: u64,
    ) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check("submit_memset")?;
        inner.record(stream, "submit_memset", StubCall::Memset { dst, value, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_lifecycle() {
        let dev = StubDevice::new();
        let s = dev.create_stream(0, 0).unwrap();
        assert_eq!(dev.live_streams(), 1);
        dev.destroy_stream(s).unwrap();
        assert_eq!(dev.live_streams(), 0);
    }

    #[test]
    fn test_destroy_unknown_stream() {
        let dev = StubDevice::new();
        let err = dev.destroy_stream(RawStream::new(99)).unwrap_err();
        assert_eq!(err.code, status::INVALID_HANDLE);
    }

    #[test]
    fn test_alloc_and_roundtrip() {
        let dev = StubDevice::new();
        let ptr = dev.alloc(64, MemoryTier::Global).unwrap();
        assert!(!ptr.is_null());
        assert_eq!(ptr.as_u64() % 256, 0);

        dev.memcpy_to_device(ptr.offset(8), &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        dev.memcpy_from_device(&mut out, ptr.offset(8)).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        dev.free(ptr).unwrap();
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_copy_out_of_range() {
        let dev = StubDevice::new();
        let ptr = dev.alloc(16, MemoryTier::Global).unwrap();
        let err = dev.memcpy_to_device(ptr.offset(10), &[0u8; 10]).unwrap_err();
        assert_eq!(err.code, status::INVALID_HANDLE);
    }

    #[test]
    fn test_device_to_device_copy() {
        let dev = StubDevice::new();
        let a = dev.alloc(32, MemoryTier::Global).unwrap();
        let b = dev.alloc(32, MemoryTier::Global).unwrap();
        dev.memcpy_to_device(a, &[7u8; 8]).unwrap();
        dev.memcpy_device(b, a, 8).unwrap();
        assert_eq!(dev.read(b, 8), vec![7u8; 8]);
    }

    #[test]
    fn test_submissions_recorded_in_order() {
        let dev = StubDevice::new();
        let s = dev.create_stream(0, 0).unwrap();
        let e = dev.create_event().unwrap();

        dev.submit_event_record(s, e).unwrap();
        dev.submit_end_graph(s, false).unwrap();

        let calls = dev.submissions(s);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], StubCall::EventRecord(e));
        assert_eq!(calls[1], StubCall::EndGraph { dump: false });
    }

    #[test]
    fn test_submit_to_dead_stream() {
        let dev = StubDevice::new();
        let s = dev.create_stream(0, 0).unwrap();
        dev.destroy_stream(s).unwrap();
        let err = dev.submit_end_graph(s, false).unwrap_err();
        assert_eq!(err.code, status::INVALID_HANDLE);
    }

    #[test]
    fn test_fail_once() {
        let dev = StubDevice::new();
        dev.fail_once("alloc", status::RESOURCE_EXHAUSTED);
        assert!(dev.alloc(16, MemoryTier::Global).is_err());
        assert!(dev.alloc(16, MemoryTier::Global).is_ok());
    }

    #[test]
    fn test_fail_always_and_clear() {
        let dev = StubDevice::new();
        dev.fail_always("create_event", status::INTERNAL);
        assert!(dev.create_event().is_err());
        assert!(dev.create_event().is_err());
        dev.clear_failures();
        assert!(dev.create_event().is_ok());
    }

    #[test]
    fn test_sync_counts() {
        let dev = StubDevice::new();
        let s = dev.create_stream(0, 0).unwrap();
        dev.synchronize_stream(s, None).unwrap();
        dev.synchronize_stream(s, Some(Duration::from_millis(5))).unwrap();
        assert_eq!(dev.sync_count(), 2);
    }

    #[test]
    fn test_zero_sized_alloc_rejected() {
        let dev = StubDevice::new();
        assert!(dev.alloc(0, MemoryTier::Global).is_err());
    }
}
