// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled task records.
//!
//! A compiled model is executed as an ordered list of [`TaskDef`]s. Each
//! record names the stream it runs on, optionally the op-table entry it
//! belongs to, and a kind-specific payload carrying the parameters the
//! compiler chose (addresses, lengths, event/label indices, branch
//! conditions).

use crate::{AddrFormat, LogicalAddr};
use device_api::{CacheOp, CondCmp};

/// Kind tags for compiled tasks. The discriminants are the stable wire
/// tags the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum TaskKind {
    DataCopy = 0,
    EventRecord = 1,
    EventWait = 2,
    LabelSet = 3,
    LabelSwitch = 4,
    LabelGoto = 5,
    StreamSwitch = 6,
    StreamActive = 7,
    EndGraph = 8,
    Noop = 9,
    CacheMaintenance = 10,
    FusionStart = 11,
    FusionStop = 12,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::DataCopy => "data-copy",
            TaskKind::EventRecord => "event-record",
            TaskKind::EventWait => "event-wait",
            TaskKind::LabelSet => "label-set",
            TaskKind::LabelSwitch => "label-switch",
            TaskKind::LabelGoto => "label-goto",
            TaskKind::StreamSwitch => "stream-switch",
            TaskKind::StreamActive => "stream-active",
            TaskKind::EndGraph => "end-graph",
            TaskKind::Noop => "noop",
            TaskKind::CacheMaintenance => "cache-maintenance",
            TaskKind::FusionStart => "fusion-start",
            TaskKind::FusionStop => "fusion-stop",
        };
        f.write_str(s)
    }
}

/// Destination stride layout for a non-contiguous copy.
///
/// The destination is written as `count` blocks of `block_len` bytes,
/// each block starting `stride` bytes after the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StrideDesc {
    /// Contiguous bytes per block.
    pub block_len: u64,
    /// Byte distance between consecutive block starts.
    pub stride: u64,
    /// Number of blocks.
    pub count: u64,
}

/// Payload of a plain data-copy task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DataCopyDef {
    pub src: LogicalAddr,
    pub dst: LogicalAddr,
    /// Total bytes to move.
    pub len: u64,
    /// `None` for a contiguous destination.
    pub dst_stride: Option<StrideDesc>,
    /// Packed layout for the addresses in this task's argument buffer.
    pub addr_format: AddrFormat,
}

/// Payload of an event-wait task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventWaitDef {
    pub event_id: u32,
    /// When set, the wait is on a device-resident memory value instead
    /// of the bare event: execution resumes once the 64-bit word at the
    /// address equals the value.
    pub value_gate: Option<(LogicalAddr, u64)>,
}

/// Payload of a label-switch (indexed branch) task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LabelSwitchDef {
    /// Device address holding the 32-bit branch index.
    pub index_addr: LogicalAddr,
    /// Branch targets; the index selects one.
    pub label_ids: Vec<u32>,
}

/// Payload of a conditional stream-switch task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamSwitchDef {
    /// Device address holding the 64-bit comparison operand.
    pub cond_addr: LogicalAddr,
    /// Right-hand side of the comparison.
    pub rhs: u64,
    pub cmp: CondCmp,
    /// Stream activated when the comparison holds.
    pub true_stream_id: u32,
}

/// Payload of a cache-maintenance task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheMaintDef {
    pub addr: LogicalAddr,
    /// Bytes covered by the operation.
    pub len: u64,
    pub op: CacheOp,
    /// Stride layout when the covered range is non-contiguous.
    pub dst_stride: Option<StrideDesc>,
}

/// Kind-specific task payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TaskPayload {
    DataCopy(DataCopyDef),
    EventRecord { event_id: u32 },
    EventWait(EventWaitDef),
    LabelSet { label_id: u32 },
    LabelSwitch(LabelSwitchDef),
    LabelGoto { label_id: u32 },
    StreamSwitch(StreamSwitchDef),
    StreamActive { target_stream_id: u32 },
    EndGraph { dump: bool },
    Noop,
    CacheMaintenance(CacheMaintDef),
    FusionStart,
    FusionStop,
}

impl TaskPayload {
    /// The kind tag of this payload.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::DataCopy(_) => TaskKind::DataCopy,
            TaskPayload::EventRecord { .. } => TaskKind::EventRecord,
            TaskPayload::EventWait(_) => TaskKind::EventWait,
            TaskPayload::LabelSet { .. } => TaskKind::LabelSet,
            TaskPayload::LabelSwitch(_) => TaskKind::LabelSwitch,
            TaskPayload::LabelGoto { .. } => TaskKind::LabelGoto,
            TaskPayload::StreamSwitch(_) => TaskKind::StreamSwitch,
            TaskPayload::StreamActive { .. } => TaskKind::StreamActive,
            TaskPayload::EndGraph { .. } => TaskKind::EndGraph,
            TaskPayload::Noop => TaskKind::Noop,
            TaskPayload::CacheMaintenance(_) => TaskKind::CacheMaintenance,
            TaskPayload::FusionStart => TaskKind::FusionStart,
            TaskPayload::FusionStop => TaskKind::FusionStop,
        }
    }
}

/// One compiled task record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskDef {
    /// Index into the model's stream list.
    pub stream_id: u32,
    /// Index into the op table, for tasks that belong to an op.
    pub op_index: Option<u32>,
    /// Kind-specific parameters.
    pub payload: TaskPayload,
}

impl TaskDef {
    /// Creates a task record with no owning op.
    pub fn new(stream_id: u32, payload: TaskPayload) -> Self {
        Self {
            stream_id,
            op_index: None,
            payload,
        }
    }

    /// Creates a task record owned by op-table entry `op_index`.
    pub fn with_op(stream_id: u32, op_index: u32, payload: TaskPayload) -> Self {
        Self {
            stream_id,
            op_index: Some(op_index),
            payload,
        }
    }

    /// The kind tag of this task.
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}
