// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Stream-control tasks: `stream-switch` activates a target stream when
//! a device-resident comparison holds, `stream-active` activates it
//! unconditionally. Together with labels these are the only control-flow
//! constructs the compiler can span across streams.

use crate::task::{TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{LogicalAddr, SegmentKind, StreamSwitchDef, TaskDef, TaskKind, TaskPayload};
use device_api::{CondCmp, DevicePtr, RawStream};

/// Conditional branch: activates the target stream if the 64-bit value
/// at the condition address compares true against the right-hand side.
pub struct StreamSwitchTask {
    stream: Option<RawStream>,
    cond_addr_logical: Option<LogicalAddr>,
    cond_addr: DevicePtr,
    rhs: u64,
    cmp: CondCmp,
    target: Option<RawStream>,
    redistributable: bool,
}

impl StreamSwitchTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            cond_addr_logical: None,
            cond_addr: DevicePtr::NULL,
            rhs: 0,
            cmp: CondCmp::Equal,
            target: None,
            redistributable: false,
        }
    }
}

impl Default for StreamSwitchTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for StreamSwitchTask {
    fn kind(&self) -> TaskKind {
        TaskKind::StreamSwitch
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::StreamSwitch(StreamSwitchDef {
            cond_addr,
            rhs,
            cmp,
            true_stream_id,
        }) = &def.payload
        else {
            return Err(RuntimeError::Internal(format!(
                "stream-switch task constructed for {} payload",
                def.kind()
            )));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.cond_addr = res.resolve(*cond_addr)?;
        self.cond_addr_logical = Some(*cond_addr);
        self.rhs = *rhs;
        self.cmp = *cmp;
        self.target = Some(res.stream(*true_stream_id)?);
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let (Some(stream), Some(target)) = (self.stream, self.target) else {
            return Err(RuntimeError::Internal("distribute before init".into()));
        };
        res.device
            .submit_stream_switch(stream, self.cond_addr, self.rhs, self.cmp, target)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }

    fn update_host_args(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        if let Some(addr) = self.cond_addr_logical {
            self.cond_addr = res.resolve(addr)?;
        }
        Ok(())
    }

    fn references_segment(&self, kind: SegmentKind) -> bool {
        self.cond_addr_logical.and_then(|a| a.segment_kind()) == Some(kind)
    }
}

/// Unconditional activation of a target stream.
pub struct StreamActiveTask {
    stream: Option<RawStream>,
    target: Option<RawStream>,
    redistributable: bool,
}

impl StreamActiveTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            target: None,
            redistributable: false,
        }
    }
}

impl Default for StreamActiveTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for StreamActiveTask {
    fn kind(&self) -> TaskKind {
        TaskKind::StreamActive
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::StreamActive { target_stream_id } = &def.payload else {
            return Err(RuntimeError::Internal(format!(
                "stream-active task constructed for {} payload",
                def.kind()
            )));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.target = Some(res.stream(*target_stream_id)?);
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let (Some(stream), Some(target)) = (self.stream, self.target) else {
            return Err(RuntimeError::Internal("distribute before init".into()));
        };
        res.device.submit_stream_active(stream, target)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }
}
