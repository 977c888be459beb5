// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Label tasks: device-resident control flow. `label-set` marks a branch
//! target, `label-switch` branches by a device-resident index, and
//! `label-goto` jumps unconditionally.

use crate::task::{TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{LabelSwitchDef, LogicalAddr, SegmentKind, TaskDef, TaskKind, TaskPayload};
use device_api::{DevicePtr, RawLabel, RawStream};

macro_rules! payload_mismatch {
    ($def:expr, $name:literal) => {
        RuntimeError::Internal(format!(
            concat!($name, " task constructed for {} payload"),
            $def.kind()
        ))
    };
}

/// Marks a branch target on the bound stream.
pub struct LabelSetTask {
    stream: Option<RawStream>,
    label: Option<RawLabel>,
    redistributable: bool,
}

impl LabelSetTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            label: None,
            redistributable: false,
        }
    }
}

impl Default for LabelSetTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for LabelSetTask {
    fn kind(&self) -> TaskKind {
        TaskKind::LabelSet
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::LabelSet { label_id } = &def.payload else {
            return Err(payload_mismatch!(def, "label-set"));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.label = Some(res.label(*label_id)?);
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let (Some(stream), Some(label)) = (self.stream, self.label) else {
            return Err(RuntimeError::Internal("distribute before init".into()));
        };
        res.device.submit_label_set(stream, label)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }
}

/// Branches to one of several labels by a device-resident 32-bit index.
pub struct LabelSwitchTask {
    stream: Option<RawStream>,
    index_addr_logical: Option<LogicalAddr>,
    index_addr: DevicePtr,
    labels: Vec<RawLabel>,
    redistributable: bool,
}

impl LabelSwitchTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            index_addr_logical: None,
            index_addr: DevicePtr::NULL,
            labels: Vec::new(),
            redistributable: false,
        }
    }
}

impl Default for LabelSwitchTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for LabelSwitchTask {
    fn kind(&self) -> TaskKind {
        TaskKind::LabelSwitch
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::LabelSwitch(LabelSwitchDef {
            index_addr,
            label_ids,
        }) = &def.payload
        else {
            return Err(payload_mismatch!(def, "label-switch"));
        };
        if label_ids.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "label switch with no targets".into(),
            ));
        }
        self.stream = Some(res.stream(def.stream_id)?);
        self.index_addr = res.resolve(*index_addr)?;
        self.index_addr_logical = Some(*index_addr);
        self.labels = label_ids
            .iter()
            .map(|id| res.label(*id))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let stream = self
            .stream
            .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
        res.device
            .submit_label_switch(stream, self.index_addr, &self.labels)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }

    fn update_host_args(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        if let Some(addr) = self.index_addr_logical {
            self.index_addr = res.resolve(addr)?;
        }
        Ok(())
    }

    fn references_segment(&self, kind: SegmentKind) -> bool {
        self.index_addr_logical.and_then(|a| a.segment_kind()) == Some(kind)
    }
}

/// Unconditional jump to a label.
pub struct LabelGotoTask {
    stream: Option<RawStream>,
    label: Option<RawLabel>,
    redistributable: bool,
}

impl LabelGotoTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            label: None,
            redistributable: false,
        }
    }
}

impl Default for LabelGotoTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for LabelGotoTask {
    fn kind(&self) -> TaskKind {
        TaskKind::LabelGoto
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::LabelGoto { label_id } = &def.payload else {
            return Err(payload_mismatch!(def, "label-goto"));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.label = Some(res.label(*label_id)?);
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let (Some(stream), Some(label)) = (self.stream, self.label) else {
            return Err(RuntimeError::Internal("distribute before init".into()));
        };
        res.device.submit_label_goto(stream, label)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }
}
