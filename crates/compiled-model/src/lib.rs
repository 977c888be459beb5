// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # compiled-model
//!
//! In-memory representation of a compiled model as handed over by the
//! compiler front-end: the ordered task list, the op table, memory
//! segment declarations, and the zero-copy address lists. The exact
//! on-disk/wire encoding is owned by an external serialization layer;
//! this crate owns the types and their validation.
//!
//! # Key Components
//!
//! - [`CompiledModel`] — the model container, with a type-state
//!   `Unchecked → Validated` transition that verifies every stream, op,
//!   event, label, and segment reference before the runtime binds any
//!   device resource.
//! - [`TaskDef`] / [`TaskPayload`] / [`TaskKind`] — compiled task
//!   records for every task kind the runtime dispatches.
//! - [`OpDef`] / [`TensorDesc`] — op-table entries with operand
//!   descriptors and zero-copy address lists.
//! - [`LogicalAddr`] / [`SegmentKind`] — the compiler's symbolic
//!   addressing, resolved to physical pointers only at bind time.
//! - [`AddrFormat`] — the packed byte layout of addresses inside an
//!   op's argument buffer.

mod addr;
mod error;
mod model;
mod op;
mod task;

pub use addr::{AddrFormat, AddrWidth, LogicalAddr, SegmentKind};
pub use error::ModelError;
pub use model::{CompiledModel, MemSegmentDesc, ModelState, StreamDesc, Unchecked, Validated};
pub use op::{OpDef, TensorDesc};
pub use task::{
    CacheMaintDef, DataCopyDef, EventWaitDef, LabelSwitchDef, StreamSwitchDef, StrideDesc,
    TaskDef, TaskKind, TaskPayload,
};
