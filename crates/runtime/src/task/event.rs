// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Event record and event-wait tasks: the only cross-stream ordering
//! primitives the runtime offers. The compiler inserts record/wait pairs
//! wherever one stream's work depends on another's.

use crate::task::{TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{EventWaitDef, LogicalAddr, SegmentKind, TaskDef, TaskKind, TaskPayload};
use device_api::{DevicePtr, RawEvent, RawStream};

/// Records an event on the bound stream.
pub struct EventRecordTask {
    stream: Option<RawStream>,
    event: Option<RawEvent>,
    redistributable: bool,
}

impl EventRecordTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            event: None,
            redistributable: false,
        }
    }
}

impl Default for EventRecordTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for EventRecordTask {
    fn kind(&self) -> TaskKind {
        TaskKind::EventRecord
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::EventRecord { event_id } = &def.payload else {
            return Err(RuntimeError::Internal(format!(
                "event-record task constructed for {} payload",
                def.kind()
            )));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.event = Some(res.event(*event_id)?);
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let (stream, event) = self.bound()?;
        res.device.submit_event_record(stream, event)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }
}

impl EventRecordTask {
    fn bound(&self) -> Result<(RawStream, RawEvent), RuntimeError> {
        match (self.stream, self.event) {
            (Some(s), Some(e)) => Ok((s, e)),
            _ => Err(RuntimeError::Internal("distribute before init".into())),
        }
    }
}

/// Waits for an event, or for a device-resident memory word to reach a
/// value when the compiler emitted a value gate.
pub struct EventWaitTask {
    stream: Option<RawStream>,
    event: Option<RawEvent>,
    gate_addr: Option<LogicalAddr>,
    gate: Option<(DevicePtr, u64)>,
    redistributable: bool,
}

impl EventWaitTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            event: None,
            gate_addr: None,
            gate: None,
            redistributable: false,
        }
    }
}

impl Default for EventWaitTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for EventWaitTask {
    fn kind(&self) -> TaskKind {
        TaskKind::EventWait
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::EventWait(EventWaitDef {
            event_id,
            value_gate,
        }) = &def.payload
        else {
            return Err(RuntimeError::Internal(format!(
                "event-wait task constructed for {} payload",
                def.kind()
            )));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.event = Some(res.event(*event_id)?);
        if let Some((addr, value)) = value_gate {
            self.gate = Some((res.resolve(*addr)?, *value));
            self.gate_addr = Some(*addr);
        }
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let stream = self
            .stream
            .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
        match self.gate {
            Some((addr, value)) => res.device.submit_wait_value(stream, addr, value)?,
            None => {
                let event = self
                    .event
                    .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
                res.device.submit_event_wait(stream, event)?;
            }
        }
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }

    fn update_host_args(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        if let (Some(addr), Some((_, value))) = (self.gate_addr, self.gate) {
            self.gate = Some((res.resolve(addr)?, value));
        }
        Ok(())
    }

    fn references_segment(&self, kind: SegmentKind) -> bool {
        self.gate_addr.and_then(|a| a.segment_kind()) == Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::Fixture;
    use device_api::StubCall;

    #[test]
    fn test_record_then_wait() {
        let fx = Fixture::new(2, 1, 0);

        let mut record = EventRecordTask::new();
        record
            .init(
                &TaskDef::new(0, TaskPayload::EventRecord { event_id: 0 }),
                &fx.res(),
                None,
            )
            .unwrap();
        record.distribute(&fx.res()).unwrap();

        let mut wait = EventWaitTask::new();
        wait.init(
            &TaskDef::new(
                1,
                TaskPayload::EventWait(EventWaitDef {
                    event_id: 0,
                    value_gate: None,
                }),
            ),
            &fx.res(),
            None,
        )
        .unwrap();
        wait.distribute(&fx.res()).unwrap();

        assert_eq!(
            fx.stub.submissions(fx.streams[0]),
            vec![StubCall::EventRecord(fx.events[0])]
        );
        assert_eq!(
            fx.stub.submissions(fx.streams[1]),
            vec![StubCall::EventWait(fx.events[0])]
        );
        assert!(record.redistributable());
        assert!(wait.redistributable());
    }

    #[test]
    fn test_wait_on_memory_value() {
        let fx = Fixture::new(1, 1, 0);
        let mut wait = EventWaitTask::new();
        wait.init(
            &TaskDef::new(
                0,
                TaskPayload::EventWait(EventWaitDef {
                    event_id: 0,
                    value_gate: Some((
                        LogicalAddr::segment(SegmentKind::Workspace, 0x8),
                        7,
                    )),
                }),
            ),
            &fx.res(),
            None,
        )
        .unwrap();
        wait.distribute(&fx.res()).unwrap();

        let expected = fx
            .layout
            .segment_base(SegmentKind::Workspace)
            .unwrap()
            .offset(0x8);
        assert_eq!(
            fx.stub.submissions(fx.streams[0]),
            vec![StubCall::WaitValue {
                addr: expected,
                value: 7
            }]
        );
        assert!(wait.references_segment(SegmentKind::Workspace));
    }

    #[test]
    fn test_missing_event_fails_init() {
        let fx = Fixture::new(1, 0, 0);
        let mut record = EventRecordTask::new();
        let err = record
            .init(
                &TaskDef::new(0, TaskPayload::EventRecord { event_id: 3 }),
                &fx.res(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }
}
