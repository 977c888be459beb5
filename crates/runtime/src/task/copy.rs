// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The plain data-copy task.
//!
//! Source and destination are resolved from logical addresses at init.
//! When the task belongs to an op, its argument buffer is populated with
//! the op's packed operand addresses through the zero-copy binder.
//!
//! # Transfer Granularity
//!
//! A non-contiguous destination transfers whole cache lines: each
//! block's length is rounded up to the device's declared line size
//! before the transfer-size/stride calculation. This governs the
//! correctness of partial-line writes, not just throughput.

use crate::task::{min_transfer_len, TaskOp, TaskResources, TaskRunParam};
use crate::{ArgsBinder, ArgsBuffer, ArgsPlacement, ArgsRefreshInfo, RuntimeError};
use compiled_model::{DataCopyDef, LogicalAddr, SegmentKind, TaskDef, TaskKind, TaskPayload};
use device_api::{DevicePtr, MemcpyKind, RawStream};

/// A compiled data-copy task bound to runtime resources.
pub struct DataCopyTask {
    stream: Option<RawStream>,
    src_addr: Option<LogicalAddr>,
    dst_addr: Option<LogicalAddr>,
    src: DevicePtr,
    dst: DevicePtr,
    effective_len: u64,
    kind: MemcpyKind,
    args: Option<ArgsBuffer>,
    binder: Option<ArgsBinder>,
    redistributable: bool,
}

impl DataCopyTask {
    pub fn new() -> Self {
        Self {
            stream: None,
            src_addr: None,
            dst_addr: None,
            src: DevicePtr::NULL,
            dst: DevicePtr::NULL,
            effective_len: 0,
            kind: MemcpyKind::DeviceToDevice,
            args: None,
            binder: None,
            redistributable: false,
        }
    }

    /// The transfer length after cache-line rounding. Exposed for the
    /// runtime's metrics and for tests of the granularity rule.
    pub fn effective_len(&self) -> u64 {
        self.effective_len
    }

    fn payload(def: &TaskDef) -> Result<&DataCopyDef, RuntimeError> {
        match &def.payload {
            TaskPayload::DataCopy(d) => Ok(d),
            other => Err(RuntimeError::Internal(format!(
                "data-copy task constructed for {} payload",
                other.kind()
            ))),
        }
    }

    /// Total bytes the device will move for this copy.
    fn compute_len(def: &DataCopyDef, cache_line: u64) -> Result<u64, RuntimeError> {
        match def.dst_stride {
            None => Ok(def.len),
            Some(s) => {
                if s.block_len == 0 || s.count == 0 {
                    return Err(RuntimeError::InvalidArgument(
                        "strided copy with zero block length or count".into(),
                    ));
                }
                if s.block_len > s.stride {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "stride {} narrower than block length {}",
                        s.stride, s.block_len
                    )));
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

impl Default for DataCopyTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOp for DataCopyTask {
    fn kind(&self) -> TaskKind {
        TaskKind::DataCopy
    }

    fn parse_run_param(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
    ) -> Result<Option<TaskRunParam>, RuntimeError> {
        Self::payload(def)?;
        let Some(_) = def.op_index else {
            return Ok(None);
        };
        let op = res.op(def.op_index)?;
        let placement = if op.args_size <= res.config.staging_args_bytes {
            ArgsPlacement::Staging
        } else {
            ArgsPlacement::Device
        };
        Ok(Some(TaskRunParam {
            args_len: op.args_size as usize,
            placement,
            num_input_slots: op.inputs.len(),
            num_output_slots: op.outputs.len(),
        }))
    }

    fn init(
        &mut self,
        def: &TaskDef,
        res: &TaskResources<'_>,
        args: Option<ArgsBuffer>,
    ) -> Result<(), RuntimeError> {
        let payload = Self::payload(def)?.clone();

        self.stream = Some(res.stream(def.stream_id)?);
        self.src = res.resolve(payload.src)?;
        self.dst = res.resolve(payload.dst)?;
        self.src_addr = Some(payload.src);
        self.dst_addr = Some(payload.dst);
        self.effective_len = Self::compute_len(&payload, res.config.cache_line_bytes)?;
        self.kind = if payload.src.is_outside() || payload.dst.is_outside() {
            MemcpyKind::AddressIndirect
        } else {
            MemcpyKind::DeviceToDevice
        };

        if def.op_index.is_some() {
            let op = res.op(def.op_index)?;
            let mut args = args.ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "op '{}': no argument buffer was allocated",
                    op.name
                ))
            })?;
            if args.len() != op.args_size as usize {
                return Err(RuntimeError::InvalidArgument(format!(
                    "op '{}': argument buffer is {} bytes, {} declared",
                    op.name,
                    args.len(),
                    op.args_size
                )));
            }
            let binder = ArgsBinder::from_op(op, res.layout)?;
            let max_len = args.len();
            binder.write_all(res.layout, res.io, args.host_mut(), max_len)?;
            args.upload(res.device.as_ref())?;
            self.binder = Some(binder);
            self.args = Some(args);
        }

        tracing::debug!(
            "data-copy bound: {} -> {} ({} bytes effective)",
            payload.src,
            payload.dst,
            self.effective_len
        );
        Ok(())
    }

    fn distribute(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        let stream = self
            .stream
            .ok_or_else(|| RuntimeError::Internal("distribute before init".into()))?;
        res.device
            .submit_copy(stream, self.dst, self.src, self.effective_len, self.kind)?;
        self.redistributable = true;
        Ok(())
    }

    fn redistributable(&self) -> bool {
        self.redistributable
    }

    fn args_refresh_infos(&self) -> Vec<ArgsRefreshInfo> {
        let mut infos = Vec::new();
        if let (Some(binder), Some(args)) = (&self.binder, &self.args) {
            binder.gen_refresh_infos(&mut infos, 0, args.placement());
        }
        infos
    }

    fn update_host_args(&mut self, res: &TaskResources<'_>) -> Result<(), RuntimeError> {
        if let Some(addr) = self.src_addr {
            self.src = res.resolve(addr)?;
        }
        if let Some(addr) = self.dst_addr {
            self.dst = res.resolve(addr)?;
        }
        if let (Some(binder), Some(args)) = (&self.binder, &mut self.args) {
            let max_len = args.len();
            binder.set_arg_io_addrs(res.layout, res.io, args.host_mut(), max_len)?;
            args.upload(res.device.as_ref())?;
        }
        Ok(())
    }

    fn references_segment(&self, kind: SegmentKind) -> bool {
        let endpoint = |a: Option<LogicalAddr>| a.and_then(|a| a.segment_kind()) == Some(kind);
        endpoint(self.src_addr)
            || endpoint(self.dst_addr)
            || self
                .binder
                .as_ref()
                .is_some_and(|b| b.references_segment(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::Fixture;
    use compiled_model::{AddrFormat, OpDef, StrideDesc, TensorDesc};
    use device_api::StubCall;

    fn copy_def(len: u64, dst_stride: Option<StrideDesc>) -> TaskPayload {
        TaskPayload::DataCopy(DataCopyDef {
            src: LogicalAddr::segment(SegmentKind::Weight, 0),
            dst: LogicalAddr::segment(SegmentKind::Workspace, 0),
            len,
            dst_stride,
            addr_format: AddrFormat::dense_u64(),
        })
    }

    #[test]
    fn test_contiguous_copy() {
        let fx = Fixture::new(1, 0, 0);
        let def = TaskDef::new(0, copy_def(512, None));

        let mut task = DataCopyTask::new();
        task.init(&def, &fx.res(), None).unwrap();
        assert_eq!(task.effective_len(), 512);

        task.distribute(&fx.res()).unwrap();
        assert!(task.redistributable());

        let calls = fx.stub.submissions(fx.streams[0]);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            StubCall::Copy { len, kind, .. } => {
                assert_eq!(*len, 512);
                assert_eq!(*kind, MemcpyKind::DeviceToDevice);
            }
            other => panic!("unexpected submission: {other:?}"),
        }
    }

    #[test]
    fn test_small_block_rounds_to_cache_line() {
        // 4 blocks of 100 bytes into a strided destination: each block
        // must move a full 256-byte line.
        let fx = Fixture::new(1, 0, 0);
        let def = TaskDef::new(
            0,
            copy_def(
                400,
                Some(StrideDesc {
                    block_len: 100,
                    stride: 1024,
                    count: 4,
                }),
            ),
        );

        let mut task = DataCopyTask::new();
        task.init(&def, &fx.res(), None).unwrap();
        assert_eq!(task.effective_len(), 256 * 4);
    }

    #[test]
    fn test_block_already_aligned_not_inflated() {
        let fx = Fixture::new(1, 0, 0);
        let def = TaskDef::new(
            0,
            copy_def(
                1024,
                Some(StrideDesc {
                    block_len: 512,
                    stride: 2048,
                    count: 2,
                }),
            ),
        );
        let mut task = DataCopyTask::new();
        task.init(&def, &fx.res(), None).unwrap();
        assert_eq!(task.effective_len(), 1024);
    }

    #[test]
    fn test_stride_descriptor_mismatch_rejected() {
        let fx = Fixture::new(1, 0, 0);
        // 3 × 100 ≠ 400.
        let def = TaskDef::new(
            0,
            copy_def(
                400,
                Some(StrideDesc {
                    block_len: 100,
                    stride: 256,
                    count: 3,
                }),
            ),
        );
        let mut task = DataCopyTask::new();
        let err = task.init(&def, &fx.res(), None).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }

    #[test]
    fn test_out_of_range_stream_fails_init() {
        let fx = Fixture::new(1, 0, 0);
        let def = TaskDef::new(9, copy_def(64, None));
        let mut task = DataCopyTask::new();
        let err = task.init(&def, &fx.res(), None).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }

    #[test]
    fn test_outside_endpoint_is_address_indirect() {
        let mut fx = Fixture::new(1, 0, 0);
        fx.io = crate::IoAddrs::with_slots(1);
        fx.io.set(0, DevicePtr::new(0xEE00)).unwrap();

        let def = TaskDef::new(
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::outside(0),
                dst: LogicalAddr::segment(SegmentKind::Workspace, 0),
                len: 64,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        );
        let mut task = DataCopyTask::new();
        task.init(&def, &fx.res(), None).unwrap();
        task.distribute(&fx.res()).unwrap();

        match &fx.stub.submissions(fx.streams[0])[0] {
            StubCall::Copy { kind, src, .. } => {
                assert_eq!(*kind, MemcpyKind::AddressIndirect);
                assert_eq!(*src, DevicePtr::new(0xEE00));
            }
            other => panic!("unexpected submission: {other:?}"),
        }
    }

    #[test]
    fn test_op_args_patched_and_uploaded() {
        let mut fx = Fixture::new(1, 0, 0);
        fx.io = crate::IoAddrs::with_slots(1);
        fx.io.set(0, DevicePtr::new(0xAB00)).unwrap();
        fx.ops.push(OpDef {
            name: "copy_op".into(),
            inputs: vec![TensorDesc::new(vec![16], 4, LogicalAddr::outside(0))],
            outputs: vec![TensorDesc::new(
                vec![16],
                4,
                LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0),
            )],
            args_size: 16,
            addr_format: AddrFormat::dense_u64(),
            zero_copy: vec![
                LogicalAddr::outside(0),
                LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0),
            ],
        });

        let def = TaskDef::with_op(
            0,
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::outside(0),
                dst: LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0),
                len: 64,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        );

        let mut task = DataCopyTask::new();
        let param = task.parse_run_param(&def, &fx.res()).unwrap().unwrap();
        assert_eq!(param.args_len, 16);
        assert_eq!(param.placement, ArgsPlacement::Staging);
        assert_eq!(param.num_input_slots, 1);

        let args = ArgsBuffer::alloc(fx.device.clone(), param.args_len, param.placement).unwrap();
        let args_ptr = args.device_ptr();
        task.init(&def, &fx.res(), Some(args)).unwrap();

        // The device-resident buffer holds the patched addresses.
        let bytes = fx.stub.read(args_ptr, 8);
        assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 0xAB00);

        // Two live bindings to refresh.
        assert_eq!(task.args_refresh_infos().len(), 2);
        assert!(task.references_segment(SegmentKind::FeatureMapRefreshable));
    }

    #[test]
    fn test_update_host_args_re_resolves_endpoints() {
        let mut fx = Fixture::new(1, 0, 0);
        let def = TaskDef::new(
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::segment(SegmentKind::Weight, 0),
                dst: LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0x10),
                len: 32,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        );
        let mut task = DataCopyTask::new();
        task.init(&def, &fx.res(), None).unwrap();
        task.distribute(&fx.res()).unwrap();

        fx.layout
            .update_base(
                SegmentKind::FeatureMapRefreshable,
                DevicePtr::new(0x55000),
                4096,
            )
            .unwrap();
        task.update_host_args(&fx.res()).unwrap();
        task.distribute(&fx.res()).unwrap();

        let calls = fx.stub.submissions(fx.streams[0]);
        match (&calls[0], &calls[1]) {
            (StubCall::Copy { dst: d1, .. }, StubCall::Copy { dst: d2, .. }) => {
                assert_ne!(d1, d2);
                assert_eq!(*d2, DevicePtr::new(0x55000 + 0x10));
            }
            other => panic!("unexpected submissions: {other:?}"),
        }
    }

    #[test]
    fn test_device_failure_wrapped_not_retried() {
        let fx = Fixture::new(1, 0, 0);
        let def = TaskDef::new(0, copy_def(64, None));
        let mut task = DataCopyTask::new();
        task.init(&def, &fx.res(), None).unwrap();

        fx.stub.fail_once("submit_copy", 77);
        let err = task.distribute(&fx.res()).unwrap_err();
        match err {
            RuntimeError::DeviceCallFailed { op, code } => {
                assert_eq!(op, "submit_copy");
                assert_eq!(code, 77);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // No retry happened: nothing was submitted.
        assert!(fx.stub.submissions(fx.streams[0]).is_empty());
        assert!(!task.redistributable());
    }
}
