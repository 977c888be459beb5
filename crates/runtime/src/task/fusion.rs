// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fusion start/stop markers bracketing a hardware kernel-fusion region.
//! Everything submitted between the pair on the same stream is fused by
//! the device into one launch; the markers themselves carry no payload.

use crate::task::{TaskOp, TaskResources};
use crate::RuntimeError;
use compiled_model::{TaskDef, TaskKind, TaskPayload};
use device_api::RawStream;

macro_rules! fusion_marker {
    ($(#[$doc:meta])* $name:ident, $kind:expr, $variant:pat, $submit:ident, $label:literal) => {
        $(#[$doc])*
        pub struct $name {
            stream: Option<RawStream>,
            redistributable: bool,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    stream: None,
                    redistributable: false,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl TaskOp for $name {
            fn kind(&self) -> TaskKind {
                $kind
            }

            fn init(
                &mut self,
                def: &TaskDef,
                res: &TaskResources<'_>,
                _args: Option<crate::ArgsBuffer>,
            ) -> Result<(), RuntimeError> {
                let $variant = &def.payload else {
                    return Err(RuntimeError::Internal(format!(
                        concat!($label, " task constructed for {} payload"),
                        def.kind()
                    )));
                };
                self.stream = Some(res.stream(def.stream_id)?);
                Ok(())
            }

            fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
                let stream = self
                    .stream
                    .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
                res.device.$submit(stream)?;
                self.redistributable = true;
                Ok(())
            }

            fn redistributable(&self) -> bool {
                self.redistributable
            }
        }
    };
}

fusion_marker! {
    /// Opens a kernel-fusion region on the bound stream.
    FusionStartTask,
    TaskKind::FusionStart,
    TaskPayload::FusionStart,
    submit_fusion_begin,
    "fusion-start"
}

fusion_marker! {
    /// Closes the kernel-fusion region opened by the matching start
    /// marker on the same stream.
    FusionStopTask,
    TaskKind::FusionStop,
    TaskPayload::FusionStop,
    submit_fusion_end,
    "fusion-stop"
}
