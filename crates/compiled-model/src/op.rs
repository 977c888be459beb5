// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The op table: per-operator metadata the task kinds consult at Init.

use crate::{AddrFormat, LogicalAddr, ModelError};

/// Describes one operand tensor of an op.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorDesc {
    /// Shape dimensions.
    pub dims: Vec<u64>,
    /// Bytes per element.
    pub elem_size: u32,
    /// Where the tensor lives.
    pub addr: LogicalAddr,
}

impl TensorDesc {
    /// Creates a descriptor.
    pub fn new(dims: Vec<u64>, elem_size: u32, addr: LogicalAddr) -> Self {
        Self {
            dims,
            elem_size,
            addr,
        }
    }

    /// Number of elements.
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Total tensor size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.num_elements() * self.elem_size as u64
    }
}

/// One op-table entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OpDef {
    /// Operator name (e.g., `"conv2d_3"`).
    pub name: String,
    /// Input operand descriptors, in kernel argument order.
    pub inputs: Vec<TensorDesc>,
    /// Output operand descriptors, in kernel argument order.
    pub outputs: Vec<TensorDesc>,
    /// Declared argument-buffer byte length.
    pub args_size: u32,
    /// How addresses are packed into the argument buffer.
    pub addr_format: AddrFormat,
    /// The subset of operand addresses bound zero-copy (patched into the
    /// argument buffer rather than staged through private copies).
    pub zero_copy: Vec<LogicalAddr>,
}

impl OpDef {
    /// Total number of I/O address slots (inputs then outputs).
    pub fn num_io_slots(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    /// All operand addresses, inputs first, in argument order.
    pub fn io_addrs(&self) -> impl Iterator<Item = LogicalAddr> + '_ {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|t| t.addr)
    }

    /// Checks internal consistency of this entry.
    ///
    /// The declared argument buffer must be able to hold every I/O
    /// address slot under the declared packing, and every zero-copy
    /// address must actually belong to one of the operands.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.addr_format.validate().map_err(|e| ModelError::InvalidOp {
            op: self.name.clone(),
            detail: e.to_string(),
        })?;

        let needed = self.addr_format.span(self.num_io_slots());
        if needed > self.args_size as u64 {
            return Err(ModelError::InvalidOp {
                op: self.name.clone(),
                detail: format!(
                    "argument buffer of {} bytes cannot hold {} address slots ({needed} bytes needed)",
                    self.args_size,
                    self.num_io_slots()
                ),
            });
        }

        for zc in &self.zero_copy {
            if !self.io_addrs().any(|a| a == *zc) {
                return Err(ModelError::InvalidOp {
                    op: self.name.clone(),
                    detail: format!("zero-copy address {zc} is not an operand of this op"),
                });
            }
        }

        for (i, t) in self.inputs.iter().chain(self.outputs.iter()).enumerate() {
            if t.elem_size == 0 || t.num_elements() == 0 {
                return Err(ModelError::InvalidOp {
                    op: self.name.clone(),
                    detail: format!("operand {i} has zero size"),
                });
            }
        }

        Ok(())
    }
}
