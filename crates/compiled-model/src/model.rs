// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The compiled model: task list + op table + memory-layout metadata.
//!
//! # Type-State Pattern
//!
//! The model transitions through states enforced at compile time:
//!
//! ```text
//! CompiledModel<Unchecked>   — parsed, references not yet verified.
//!       │  .validate()
//!       ▼
//! CompiledModel<Validated>   — every stream/op/event/label reference and
//!                              every segment address checked in-range.
//! ```
//!
//! The runtime's `init` only accepts a `Validated` model, so a task
//! referencing a stream that does not exist is rejected before any device
//! resource is touched. The transition consumes the old state; the marker
//! types are zero-sized.

use crate::{
    LogicalAddr, ModelError, OpDef, SegmentKind, TaskDef, TaskKind, TaskPayload,
};
use std::fmt;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: model has been parsed but not validated.
#[derive(Debug, Clone)]
pub struct Unchecked;

/// Marker: model references have been verified.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for model states.
pub trait ModelState: fmt::Debug + Clone {}
impl ModelState for Unchecked {}
impl ModelState for Validated {}

// ── Descriptors ────────────────────────────────────────────────────

/// Declares one memory segment the model needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemSegmentDesc {
    pub kind: SegmentKind,
    pub size_bytes: u64,
    /// Required base alignment; must be a power of two.
    pub alignment: u64,
}

impl MemSegmentDesc {
    /// Creates a descriptor with the device's default 256-byte alignment.
    pub fn new(kind: SegmentKind, size_bytes: u64) -> Self {
        Self {
            kind,
            size_bytes,
            alignment: 256,
        }
    }
}

/// Declares one hardware stream the model needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct StreamDesc {
    pub priority: i32,
    pub flags: u32,
}

// ── CompiledModel ──────────────────────────────────────────────────

/// A compiled model as handed over by the compiler.
///
/// The generic parameter `S` encodes the validation state at compile
/// time. Fields are public: the serialization layer that produces this
/// structure is an external collaborator, and tests build models
/// directly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct CompiledModel<S: ModelState = Unchecked> {
    /// Human-readable model name.
    pub name: String,
    /// Stream declarations; task `stream_id`s index into this list.
    pub streams: Vec<StreamDesc>,
    /// Number of cross-stream events the task list references.
    pub num_events: u32,
    /// Number of control-flow labels the task list references.
    pub num_labels: u32,
    /// Memory segments, at most one per [`SegmentKind`].
    pub segments: Vec<MemSegmentDesc>,
    /// Op table; task `op_index`es index into this list.
    pub ops: Vec<OpDef>,
    /// The ordered task list.
    pub tasks: Vec<TaskDef>,
    /// State marker (zero-sized, compile-time only).
    #[serde(skip)]
    _state: std::marker::PhantomData<S>,
}

// ── Unchecked state ────────────────────────────────────────────────

impl CompiledModel<Unchecked> {
    /// Creates an empty model shell to be populated field by field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streams: Vec::new(),
            num_events: 0,
            num_labels: 0,
            segments: Vec::new(),
            ops: Vec::new(),
            tasks: Vec::new(),
            _state: std::marker::PhantomData,
        }
    }

    /// Parses a model from its JSON fixture form.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validates every cross-reference and transitions to `Validated`.
    ///
    /// # Checks
    /// - The task list is non-empty and at least one stream is declared.
    /// - Every `stream_id`, `op_index`, event id, and label id resolves.
    /// - Segment descriptors: at most one per kind, non-zero size,
    ///   power-of-two alignment.
    /// - Every segment-relative address in task payloads, op operands,
    ///   and zero-copy lists falls inside its declared segment.
    /// - No task follows an end-of-graph marker on the same stream.
    pub fn validate(self) -> Result<CompiledModel<Validated>, ModelError> {
        if self.tasks.is_empty() {
            return Err(ModelError::InvalidModel("model has no tasks".into()));
        }
        if self.streams.is_empty() {
            return Err(ModelError::InvalidModel("model declares no streams".into()));
        }

        self.check_segments()?;

        for op in &self.ops {
            op.validate()?;
            for addr in op.io_addrs() {
                self.check_addr(addr).map_err(|detail| ModelError::InvalidOp {
                    op: op.name.clone(),
                    detail,
                })?;
            }
        }

        let mut graph_ended: Vec<bool> = vec![false; self.streams.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            self.check_task(i, task)?;

            let sid = task.stream_id as usize;
            if graph_ended[sid] {
                return Err(ModelError::InvalidTask {
                    task: i,
                    detail: format!("stream {sid} already ended by an end-graph task"),
                });
            }
            if task.kind() == TaskKind::EndGraph {
                graph_ended[sid] = true;
            }
        }

        if !graph_ended[0] {
            tracing::warn!(
                "model '{}': primary stream has no end-graph task",
                self.name
            );
        }

        Ok(CompiledModel {
            name: self.name,
            streams: self.streams,
            num_events: self.num_events,
            num_labels: self.num_labels,
            segments: self.segments,
            ops: self.ops,
            tasks: self.tasks,
            _state: std::marker::PhantomData,
        })
    }

    fn check_segments(&self) -> Result<(), ModelError> {
        let mut seen = std::collections::HashSet::new();
        for seg in &self.segments {
            if !seen.insert(seg.kind) {
                return Err(ModelError::InvalidSegment {
                    kind: seg.kind,
                    detail: "declared more than once".into(),
                });
            }
            if seg.size_bytes == 0 {
                return Err(ModelError::InvalidSegment {
                    kind: seg.kind,
                    detail: "zero-sized segment".into(),
                });
            }
            if !seg.alignment.is_power_of_two() {
                return Err(ModelError::InvalidSegment {
                    kind: seg.kind,
                    detail: format!("alignment {} is not a power of two", seg.alignment),
                });
            }
        }
        Ok(())
    }

    fn check_task(&self, i: usize, task: &TaskDef) -> Result<(), ModelError> {
        let fail = |detail: String| ModelError::InvalidTask { task: i, detail };

        if task.stream_id as usize >= self.streams.len() {
            return Err(fail(format!(
                "stream id {} out of range ({} streams declared)",
                task.stream_id,
                self.streams.len()
            )));
        }
        if let Some(op) = task.op_index {
            if op as usize >= self.ops.len() {
                return Err(fail(format!(
                    "op index {op} out of range ({} ops declared)",
                    self.ops.len()
                )));
            }
        }

        let check_event = |id: u32| {
            if id >= self.num_events {
                Err(fail(format!(
                    "event id {id} out of range ({} declared)",
                    self.num_events
                )))
            } else {
                Ok(())
            }
        };
        let check_label = |id: u32| {
            if id >= self.num_labels {
                Err(fail(format!(
                    "label id {id} out of range ({} declared)",
                    self.num_labels
                )))
            } else {
                Ok(())
            }
        };
        let check_stream = |id: u32| {
            if id as usize >= self.streams.len() {
                Err(fail(format!(
                    "target stream id {id} out of range ({} streams declared)",
                    self.streams.len()
                )))
            } else {
                Ok(())
            }
        };

        match &task.payload {
            TaskPayload::DataCopy(def) => {
                def.addr_format
                    .validate()
                    .map_err(|e| fail(e.to_string()))?;
                self.check_addr(def.src).map_err(&fail)?;
                self.check_addr(def.dst).map_err(&fail)?;
                if def.len == 0 {
                    return Err(fail("zero-length copy".into()));
                }
            }
            TaskPayload::EventRecord { event_id } => check_event(*event_id)?,
            TaskPayload::EventWait(def) => {
                check_event(def.event_id)?;
                if let Some((addr, _)) = def.value_gate {
                    self.check_addr(addr).map_err(&fail)?;
                }
            }
            TaskPayload::LabelSet { label_id } | TaskPayload::LabelGoto { label_id } => {
                check_label(*label_id)?
            }
            TaskPayload::LabelSwitch(def) => {
                self.check_addr(def.index_addr).map_err(&fail)?;
                if def.label_ids.is_empty() {
                    return Err(fail("label switch with no targets".into()));
                }
                for id in &def.label_ids {
                    check_label(*id)?;
                }
            }
            TaskPayload::StreamSwitch(def) => {
                self.check_addr(def.cond_addr).map_err(&fail)?;
                check_stream(def.true_stream_id)?;
            }
            TaskPayload::StreamActive { target_stream_id } => check_stream(*target_stream_id)?,
            TaskPayload::CacheMaintenance(def) => {
                self.check_addr(def.addr).map_err(&fail)?;
                if def.len == 0 {
                    return Err(fail("zero-length cache operation".into()));
                }
            }
            TaskPayload::EndGraph { .. } | TaskPayload::Noop | TaskPayload::FusionStart
            | TaskPayload::FusionStop => {}
        }
        Ok(())
    }

    fn check_addr(&self, addr: LogicalAddr) -> Result<(), String> {
        match addr {
            LogicalAddr::Segment { kind, offset } => {
                let seg = self
                    .segments
                    .iter()
                    .find(|s| s.kind == kind)
                    .ok_or_else(|| format!("address references undeclared {kind} segment"))?;
                if offset >= seg.size_bytes {
                    return Err(format!(
                        "offset 0x{offset:x} outside {kind} segment of {} bytes",
                        seg.size_bytes
                    ));
                }
                Ok(())
            }
            LogicalAddr::Outside { .. } => Ok(()),
        }
    }
}

// ── Validated state ────────────────────────────────────────────────

impl CompiledModel<Validated> {
    /// Number of tasks in the list.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the op-table entry at `index`.
    pub fn op(&self, index: u32) -> Option<&OpDef> {
        self.ops.get(index as usize)
    }

    /// Returns the declared segment of the given kind.
    pub fn segment(&self, kind: SegmentKind) -> Option<&MemSegmentDesc> {
        self.segments.iter().find(|s| s.kind == kind)
    }

    /// Returns a summary string describing the model.
    pub fn summary(&self) -> String {
        let total_mem: u64 = self.segments.iter().map(|s| s.size_bytes).sum();
        format!(
            "Model '{}': {} tasks on {} streams, {} ops, {} events, {} labels, {:.2} MB declared memory",
            self.name,
            self.tasks.len(),
            self.streams.len(),
            self.ops.len(),
            self.num_events,
            self.num_labels,
            total_mem as f64 / (1024.0 * 1024.0),
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: ModelState> CompiledModel<S> {
    /// Serialises the model to its JSON fixture form.
    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<S: ModelState> fmt::Display for CompiledModel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "CompiledModel '{}' ({} tasks, {} streams):",
            self.name,
            self.tasks.len(),
            self.streams.len()
        )?;
        for (i, task) in self.tasks.iter().enumerate() {
            writeln!(f, "  #{i}: {} on stream {}", task.kind(), task.stream_id)?;
        }
        Ok(())
    }
}
