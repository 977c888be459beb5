// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The cache-maintenance task: prefetch or invalidate an address range
//! ahead of (or after) the kernels that touch it.
//!
//! Cache operations act on whole lines. The covered length is therefore
//! rounded up to the device's declared line size — for a strided range,
//! per block — before submission; a partial-line prefetch that skipped
//! the rounding would leave the tail of the line stale.

use crate::task::{min_transfer_len, TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{CacheMaintDef, LogicalAddr, SegmentKind, TaskDef, TaskKind, TaskPayload};
use device_api::{CacheOp, DevicePtr, RawStream};

pub struct CacheMaintTask {
    stream: Option<RawStream>,
    addr_logical: Option<LogicalAddr>,
    addr: DevicePtr,
    effective_len: u64,
    op: CacheOp,
    redistributable: bool,
}

impl CacheMaintTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            addr_logical: None,
            addr: DevicePtr::NULL,
            effective_len: 0,
            op: CacheOp::Prefetch,
            redistributable: false,
        }
    }

    /// The covered length after cache-line rounding.
    pub fn effective_len(&self) -> u64 {
        self.effective_len
    }

    fn compute_len(def: &CacheMaintDef, cache_line: u64) -> Result<u64, RuntimeError> {
        match def.dst_stride {
            None => Ok(min_transfer_len(def.len, cache_line)),
            Some(s) => {
                if s.block_len == 0 || s.count == 0 {
                    return Err(RuntimeError::InvalidArgument(
                        "strided cache range with zero block length or count".into(),
                    ));
                }
                if s.block_len * s.count != def.len {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "stride descriptor covers {} bytes, payload declares {}",
                        s.block_len * s.count,
                        def.len
                    )));
                }
                Ok(min_transfer_len(s.block_len, cache_line) * s.count)
            }
        }
    }
}

impl Default for CacheMaintTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for CacheMaintTask {
    fn kind(&self) -> TaskKind {
        TaskKind::CacheMaintenance
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::CacheMaintenance(payload) = &def.payload else {
            return Err(RuntimeError::Internal(format!(
                "cache-maintenance task constructed for {} payload",
                def.kind()
            )));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.addr = res.resolve(payload.addr)?;
        self.addr_logical = Some(payload.addr);
        self.effective_len = Self::compute_len(payload, res.config.cache_line_bytes)?;
        self.op = payload.op;
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let stream = self
            .stream
            .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
        res.device
            .submit_cache_op(stream, self.addr, self.effective_len, self.op)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }

    fn update_host_args(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        if let Some(addr) = self.addr_logical {
            self.addr = res.resolve(addr)?;
        }
        Ok(())
    }

    fn references_segment(&self, kind: SegmentKind) -> bool {
        self.addr_logical.and_then(|a| a.segment_kind()) == Some(kind)
    }
}
