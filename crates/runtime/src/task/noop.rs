// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The no-op task: a compiled placeholder that occupies a task-list slot
//! without any device-side effect. The compiler emits these to keep
//! task indices stable when an optimization pass removes work.

use crate::task::{TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{TaskDef, TaskKind, TaskPayload};
use device_api::RawStream;

pub struct NoopTask {
    stream: Option<RawStream>,
    redistributable: bool,
}

impl NoopTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            redistributable: false,
        }
    }
}

impl Default for NoopTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for NoopTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Noop
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        _args: Option<crate::ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let TaskPayload::Noop = &def.payload else {
            return Err(RuntimeError::Internal(format!(
                "no-op task constructed for {} payload",
                def.kind()
            )));
        };
        // The stream reference is still validated: a no-op with a bad
        // stream id is a compile/runtime mismatch like any other.
        self.stream = Some(res.stream(def.stream_id)?);
        Ok(())
    }

    fn distribute(&mut self, _res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        if self.stream.is_none() {
            return Err(RuntimeError::Internal("distribute before init".into()));
        }
        self.redistributable = true;
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

    #[test]
    fn test_noop_submits_nothing() {
        let fx = Fixture::new(1, 0, 0);
        let mut task = NoopTask::new();
        task.init(&TaskDef::new(0, TaskPayload::Noop), &fx.res(), None)
            .unwrap();
        task.distribute(&fx.res()).unwrap();

        assert!(fx.stub.submissions(fx.streams[0]).is_empty());
        assert!(task.redistributable());
    }

    #[test]
    fn test_bad_stream_still_fails_init() {
        let fx = Fixture::new(1, 0, 0);
        let mut task = NoopTask::new();
        let err = task
            .init(&TaskDef::new(4, TaskPayload::Noop), &fx.res(), None)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }
}
