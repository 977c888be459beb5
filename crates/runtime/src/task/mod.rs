// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The task-dispatch subsystem: the [`TaskOp`] lifecycle contract, the
//! [`TaskRegistry`] factory, and the concrete task kinds.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──(parse_run_param?)──► Initialized ──► Distributed
//! ```
//!
//! - `parse_run_param` (optional): reports resource needs that are not
//!   statically known — argument-buffer size and placement — without
//!   touching live device state.
//! - `init`: binds the instance to its stream and argument buffer,
//!   resolves every address, and does one-time host-side precomputation.
//!   All reference and size errors surface here, as load failures.
//! - `distribute`: issues the task to its bound stream. Non-blocking;
//!   device failures are wrapped and returned, never retried. On
//!   success the instance reports whether it may be reissued without a
//!   fresh `init` (`redistributable`).
//!
//! # Registration
//!
//! Kinds are constructors in a [`TaskRegistry`] keyed by [`TaskKind`].
//! Registration is idempotent (first constructor wins) and open: kinds
//! defined outside this crate can be registered on a fresh context
//! before any model is loaded. Creating an unregistered kind yields
//! `None`, which the model loader reports as a compile/runtime mismatch.

mod cmo;
mod copy;
mod end_graph;
mod event;
mod fusion;
mod label;
mod noop;
mod stream_ctrl;

pub use cmo::CacheMaintTask;
pub use copy::DataCopyTask;
pub use end_graph::EndGraphTask;
pub use event::{EventRecordTask, EventWaitTask};
pub use fusion::{FusionStartTask, FusionStopTask};
pub use label::{LabelGotoTask, LabelSetTask, LabelSwitchTask};
pub use noop::NoopTask;
pub use stream_ctrl::{StreamActiveTask, StreamSwitchTask};

use crate::{ArgsBuffer, ArgsPlacement, ArgsRefreshInfo, IoAddrs, RuntimeConfig, RuntimeError};
use compiled_model::{OpDef, SegmentKind, TaskDef, TaskKind};
use device_api::{DeviceDriver, DevicePtr, RawEvent, RawLabel, RawStream};
use memory_layout::MemoryLayout;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The owning model's resource tables, lent to a task for one call.
///
/// Tasks hold indices into these tables, never back-pointers into the
/// model, so ownership stays acyclic: the model owns its tasks by value
/// and lends the tables per call.
pub struct TaskResources<'a> {
    pub device: &'a Arc<dyn DeviceDriver>,
    pub config: &'a RuntimeConfig,
    pub layout: &'a MemoryLayout,
    pub streams: &'a [RawStream],
    pub events: &'a [RawEvent],
    pub labels: &'a [RawLabel],
    pub ops: &'a [OpDef],
    pub io: &'a IoAddrs,
}

impl TaskResources<'_> {
    /// Resolves a stream id against the model's stream list.
    pub fn stream(&self, id: u32) -> Result<RawStream, RuntimeError> {
        self.streams.get(id as usize).copied().ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "stream id {id} out of range ({} bound)",
                self.streams.len()
            ))
        })
    }

    /// Resolves an event id against the model's event list.
    pub fn event(&self, id: u32) -> Result<RawEvent, RuntimeError> {
        self.events.get(id as usize).copied().ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "event id {id} out of range ({} created)",
                self.events.len()
            ))
        })
    }

    /// Resolves a label id against the model's label list.
    pub fn label(&self, id: u32) -> Result<RawLabel, RuntimeError> {
        self.labels.get(id as usize).copied().ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "label id {id} out of range ({} created)",
                self.labels.len()
            ))
        })
    }

    /// Resolves a task's op reference; a missing reference is a load
    /// failure.
    pub fn op(&self, index: Option<u32>) -> Result<&OpDef, RuntimeError> {
        let index = index.ok_or_else(|| {
            RuntimeError::InvalidArgument("task references no op".to_string())
        })?;
        self.ops.get(index as usize).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "op index {index} out of range ({} ops)",
                self.ops.len()
            ))
        })
    }

    /// Resolves a logical address to a live device pointer.
    pub fn resolve(&self, addr: compiled_model::LogicalAddr) -> Result<DevicePtr, RuntimeError> {
        crate::args::resolve_addr(self.layout, self.io, addr)
    }
}

/// Resource needs reported by `parse_run_param`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunParam {
    /// Argument-buffer byte length to allocate.
    pub args_len: usize,
    /// Which memory tier the buffer should live in.
    pub placement: ArgsPlacement,
    /// Input address slots the task consumes.
    pub num_input_slots: usize,
    /// Output address slots the task produces.
    pub num_output_slots: usize,
}

/// The per-instance lifecycle contract every task kind honors.
pub trait TaskOp: Send {
    /// The kind tag this instance dispatches.
    fn kind(&self) -> TaskKind;

    /// Reports resource needs not statically known. Must not touch live
    /// device state. `None` means no argument buffer is needed.
    fn parse_run_param(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
    ) -> Result<Option<TaskRunParam>, RuntimeError> {
        let _ = (def, res);
        Ok(None)
    }

    /// Binds the instance to its stream and argument buffer and resolves
    /// every address. Fails fast on any bad reference or size mismatch.
    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        args: Option<ArgsBuffer>,
    ) -> Result<(), RuntimeError>;

    /// Issues the task to its bound stream. Non-blocking.
    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError>;

    /// Whether `distribute` may be reissued without a fresh `init`.
    /// Meaningful only after a successful `distribute`.
    fn redistributable(&self) -> bool;

    /// The (offset, placement) pairs a caller must re-patch when it owns
    /// the refresh of a shared argument region. Empty for tasks with no
    /// live zero-copy bindings.
    fn args_refresh_infos(&self) -> Vec<ArgsRefreshInfo> {
        Vec::new()
    }

    /// Re-patches this task's argument buffer from the current segment
    /// bases and I/O table.
    fn update_host_args(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let _ = res;
        Ok(())
    }

    /// Whether a rebind of the given segment invalidates this task's
    /// patched addresses.
    fn references_segment(&self, kind: SegmentKind) -> bool {
        let _ = kind;
        false
    }
}

/// Constructor for one task kind.
pub type TaskCtor = fn() -> Box<dyn TaskOp>;

/// The task-kind factory.
pub struct TaskRegistry {
    ctors: Mutex<HashMap<TaskKind, TaskCtor>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            ctors: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a registry with every built-in kind installed.
    pub fn builtin() -> Self {
        let reg = Self::new();
        reg.register(TaskKind::DataCopy, || Box::new(DataCopyTask::new()));
        reg.register(TaskKind::EventRecord, || Box::new(EventRecordTask::new()));
        reg.register(TaskKind::EventWait, || Box::new(EventWaitTask::new()));
        reg.register(TaskKind::LabelSet, || Box::new(LabelSetTask::new()));
        reg.register(TaskKind::LabelSwitch, || Box::new(LabelSwitchTask::new()));
        reg.register(TaskKind::LabelGoto, || Box::new(LabelGotoTask::new()));
        reg.register(TaskKind::StreamSwitch, || Box::new(StreamSwitchTask::new()));
        reg.register(TaskKind::StreamActive, || Box::new(StreamActiveTask::new()));
        reg.register(TaskKind::EndGraph, || Box::new(EndGraphTask::new()));
        reg.register(TaskKind::Noop, || Box::new(NoopTask::new()));
        reg.register(TaskKind::CacheMaintenance, || Box::new(CacheMaintTask::new()));
        reg.register(TaskKind::FusionStart, || Box::new(FusionStartTask::new()));
        reg.register(TaskKind::FusionStop, || Box::new(FusionStopTask::new()));
        reg
    }

    /// Registers a constructor for `kind`. Idempotent: a second
    /// registration for the same kind is a silent no-op, keeping the
    /// first constructor.
    pub fn register(&self, kind: TaskKind, ctor: TaskCtor) {
        self.lock().entry(kind).or_insert(ctor);
    }

    /// Instantiates a task of the given kind. `None` for an
    /// unregistered kind — a compile/runtime mismatch the loader
    /// reports as a load failure.
    pub fn create(&self, kind: TaskKind) -> Option<Box<dyn TaskOp>> {
        self.lock().get(&kind).map(|ctor| ctor())
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskKind, TaskCtor>> {
        self.ctors.lock().expect("task registry mutex poisoned")
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Rounds a per-block transfer length up to the device cache line.
///
/// Governs correctness, not just bandwidth: a non-contiguous destination
/// transfers whole lines, so a block shorter than the line must still
/// move a full line.
pub fn min_transfer_len(block_len: u64, cache_line: u64) -> u64 {
    debug_assert!(cache_line.is_power_of_two());
    (block_len + cache_line - 1) & !(cache_line - 1)
}
