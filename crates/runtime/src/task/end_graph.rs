// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The end-of-graph marker: the last task of a stream. With the dump
//! flag set the device also flushes its debug capture buffers, which is
//! a one-shot effect — the flushed state is gone after the first issue,
//! so a dumping marker is not redistributable.

use crate::task::{TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{TaskDef, TaskKind, TaskPayload};
use device_api::RawStream;

pub struct EndGraphTask {
    stream: Option<RawStream>,
    dump: bool,
    redistributable: bool,
}

impl EndGraphTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            dump: false,
            redistributable: false,
        }
    }
}

impl Default for EndGraphTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for EndGraphTask {
    fn kind(&self) -> TaskKind {
        TaskKind::EndGraph
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::EndGraph { dump } = &def.payload else {
            return Err(RuntimeError::Internal(format!(
                "end-graph task constructed for {} payload",
                def.kind()
            )));
        };
        self.stream = Some(res.stream(def.stream_id)?);
        self.dump = *dump;
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let stream = self
            .stream
            .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
        res.device.submit_end_graph(stream, self.dump)?;
        self.redistributable = !self.dump;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::Fixture;
    use device_api::StubCall;

    #[test]
    fn test_end_graph_plain() {
        let fx = Fixture::new(1, 0, 0);
        let mut task = EndGraphTask::new();
        task.init(
            &TaskDef::new(0, TaskPayload::EndGraph { dump: false }),
            &fx.res(),
            None,
        )
        .unwrap();
        task.distribute(&fx.res()).unwrap();

        assert_eq!(
            fx.stub.submissions(fx.streams[0]),
            vec![StubCall::EndGraph { dump: false }]
        );
        assert!(task.redistributable());
    }

    #[test]
    fn test_dump_marker_is_one_shot() {
        let fx = Fixture::new(1, 0, 0);
        let mut task = EndGraphTask::new();
        task.init(
            &TaskDef::new(0, TaskPayload::EndGraph { dump: true }),
            &fx.res(),
            None,
        )
        .unwrap();
        task.distribute(&fx.res()).unwrap();

        assert_eq!(
            fx.stub.submissions(fx.streams[0]),
            vec![StubCall::EndGraph { dump: true }]
        );
        assert!(!task.redistributable());
    }
}
