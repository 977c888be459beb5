// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`DeviceDriver`] trait: the versioned device-runtime API surface.
//!
//! The execution runtime never talks to hardware directly — everything
//! goes through this trait. Production deployments implement it over the
//! vendor driver's FFI; tests use [`StubDevice`](crate::StubDevice).
//!
//! # Call Classes
//!
//! - **Resource lifecycle** (`create_*` / `destroy_*` / `alloc` / `free`):
//!   synchronous host-side calls.
//! - **Immediate copies** (`memcpy_*`): synchronous, complete before
//!   returning.
//! - **Submissions** (`submit_*`): non-blocking; the command is enqueued
//!   on a stream and executes in stream order. Cross-stream ordering only
//!   exists through explicit event and label submissions.
//! - **`synchronize_stream`**: the only blocking call — waits until all
//!   previously submitted work on the stream is complete, optionally
//!   bounded by a timeout.

use crate::{DevicePtr, DeviceResult, RawEvent, RawLabel, RawStream};
use std::time::Duration;

/// Direction of a memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MemcpyKind {
    /// Host memory → device memory.
    HostToDevice,
    /// Device memory → host memory.
    DeviceToHost,
    /// Device memory → device memory.
    DeviceToDevice,
    /// Both endpoints are device addresses read indirectly at execution
    /// time (the addresses themselves live in device memory).
    AddressIndirect,
}

/// The memory tier an allocation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MemoryTier {
    /// Ordinary global device memory.
    Global,
    /// A staging tier close to the compute units. Not directly
    /// host-addressable: host writes must go through an explicit copy.
    Staging,
}

/// Cache-maintenance operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CacheOp {
    /// Pull the address range into cache ahead of use.
    Prefetch,
    /// Drop the address range from cache.
    Invalidate,
}

/// Comparison operator for device-resident conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CondCmp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

/// The device-runtime API the execution runtime is written against.
///
/// Implementations must be thread-safe: multiple models submit to their
/// own streams concurrently, and the stream pool creates and destroys
/// streams from whichever thread tears a model down.
pub trait DeviceDriver: Send + Sync {
    // ── Streams ────────────────────────────────────────────────

    /// Creates a hardware command stream.
    fn create_stream(&self, priority: i32, flags: u32) -> DeviceResult<RawStream>;

    /// Destroys a stream. All submitted work must have completed.
    fn destroy_stream(&self, stream: RawStream) -> DeviceResult<()>;

    /// Blocks until all work submitted to `stream` has completed.
    ///
    /// With a timeout, expiry is reported as a native timeout status;
    /// the outstanding device work is *not* retracted.
    fn synchronize_stream(
        &self,
        stream: RawStream,
        timeout: Option<Duration>,
    ) -> DeviceResult<()>;

    // ── Events and labels ──────────────────────────────────────

    /// Creates a cross-stream synchronization event.
    fn create_event(&self) -> DeviceResult<RawEvent>;

    /// Destroys an event.
    fn destroy_event(&self, event: RawEvent) -> DeviceResult<()>;

    /// Creates a device-resident control-flow label.
    fn create_label(&self) -> DeviceResult<RawLabel>;

    /// Destroys a label.
    fn destroy_label(&self, label: RawLabel) -> DeviceResult<()>;

    // ── Memory ─────────────────────────────────────────────────

    /// Allocates `size` bytes of device memory in the given tier.
    fn alloc(&self, size: u64, tier: MemoryTier) -> DeviceResult<DevicePtr>;

    /// Frees a device allocation.
    fn free(&self, ptr: DevicePtr) -> DeviceResult<()>;

    /// Synchronous host → device copy.
    fn memcpy_to_device(&self, dst: DevicePtr, src: &[u8]) -> DeviceResult<()>;

    /// Synchronous device → host copy.
    fn memcpy_from_device(&self, dst: &mut [u8], src: DevicePtr) -> DeviceResult<()>;

    /// Synchronous device → device copy.
    fn memcpy_device(&self, dst: DevicePtr, src: DevicePtr, len: u64) -> DeviceResult<()>;

    // ── Stream submissions (non-blocking) ──────────────────────

    /// Enqueues a memory copy on `stream`.
    fn submit_copy(
        &self,
        stream: RawStream,
        dst: DevicePtr,
        src: DevicePtr,
        len: u64,
        kind: MemcpyKind,
    ) -> DeviceResult<()>;

    /// Enqueues an event-record marker.
    fn submit_event_record(&self, stream: RawStream, event: RawEvent) -> DeviceResult<()>;

    /// Enqueues a wait for `event` to be recorded on another stream.
    fn submit_event_wait(&self, stream: RawStream, event: RawEvent) -> DeviceResult<()>;

    /// Enqueues a wait until the 64-bit value at `addr` equals `value`.
    fn submit_wait_value(
        &self,
        stream: RawStream,
        addr: DevicePtr,
        value: u64,
    ) -> DeviceResult<()>;

    /// Enqueues a label-set marker (branch target) on `stream`.
    fn submit_label_set(&self, stream: RawStream, label: RawLabel) -> DeviceResult<()>;

    /// Enqueues an indexed branch: the 32-bit value at `index_addr`
    /// selects which of `labels` execution continues from.
    fn submit_label_switch(
        &self,
        stream: RawStream,
        index_addr: DevicePtr,
        labels: &[RawLabel],
    ) -> DeviceResult<()>;

    /// Enqueues an unconditional jump to `label`.
    fn submit_label_goto(&self, stream: RawStream, label: RawLabel) -> DeviceResult<()>;

    /// Enqueues a conditional stream activation: if the 64-bit value at
    /// `cond_addr` compares `cmp` against `rhs`, `target` is activated.
    fn submit_stream_switch(
        &self,
        stream: RawStream,
        cond_addr: DevicePtr,
        rhs: u64,
        cmp: CondCmp,
        target: RawStream,
    ) -> DeviceResult<()>;

    /// Enqueues an unconditional activation of `target`.
    fn submit_stream_active(&self, stream: RawStream, target: RawStream) -> DeviceResult<()>;

    /// Enqueues the end-of-graph marker; with `dump` set the device also
    /// flushes its debug capture buffers.
    fn submit_end_graph(&self, stream: RawStream, dump: bool) -> DeviceResult<()>;

    /// Enqueues a cache-maintenance operation over `[addr, addr + len)`.
    fn submit_cache_op(
        &self,
        stream: RawStream,
        addr: DevicePtr,
        len: u64,
        op: CacheOp,
    ) -> DeviceResult<()>;

    /// Enqueues the start marker of a kernel-fusion region.
    fn submit_fusion_begin(&self, stream: RawStream) -> DeviceResult<()>;

    /// Enqueues the end marker of a kernel-fusion region.
    fn submit_fusion_end(&self, stream: RawStream) -> DeviceResult<()>;

    /// Enqueues a fill of `len` bytes at `dst` with `value`.
    fn submit_memset(
        &self,
        stream: RawStream,
        dst: DevicePtr,
        value: u8,
        len: u64,
    ) -> DeviceResult<()>;
}
