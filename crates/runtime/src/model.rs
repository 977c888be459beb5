// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The per-model resource container and orchestrator.
//!
//! [`ModelRuntime::init`] binds a validated compiled model to live
//! device resources in a fixed order: memory layout first, then pooled
//! streams, then events and labels, then one task instance per compiled
//! task record. A failure at any point releases everything acquired so
//! far — there is no partially loaded model.
//!
//! Teardown releases resources strictly in the order stream-unbind →
//! stream-destroy → memory-release. The device requires this sequencing:
//! destroying backing memory while a stream still references it is
//! undefined.
//!
//! ```text
//! init ──► layout.bind ──► pool.acquire×N ──► events/labels ──► task init×M
//!                                                  │ any failure
//!                                                  ▼
//!                                          release_resources()
//! ```

use crate::task::{TaskOp, TaskResources};
use crate::{ArgsBuffer, ArgsRefreshInfo, ExecutionMetrics, IoAddrs, RuntimeContext, RuntimeError};
use compiled_model::{CompiledModel, LogicalAddr, OpDef, SegmentKind, TaskPayload, Validated};
use device_api::{DevicePtr, RawEvent, RawLabel, RawStream};
use memory_layout::MemoryLayout;
use std::sync::Arc;
use std::time::Instant;
use stream_pool::{ModelId, StreamKey};

/// Number of caller-supplied I/O address slots a model requires.
///
/// The slot count is the highest `outside` slot referenced anywhere in
/// the op table or the task payloads, plus one.
pub fn num_outside_slots(model: &CompiledModel<Validated>) -> usize {
    let mut max: Option<usize> = None;
    let mut note = |addr: LogicalAddr| {
        if let LogicalAddr::Outside { slot } = addr {
            max = Some(max.map_or(slot, |m| m.max(slot)));
        }
    };

    for op in &model.ops {
        for addr in op.io_addrs() {
            note(addr);
        }
    }
    for task in &model.tasks {
        match &task.payload {
            TaskPayload::DataCopy(d) => {
                note(d.src);
                note(d.dst);
            }
            TaskPayload::EventWait(d) => {
                if let Some((addr, _)) = d.value_gate {
                    note(addr);
                }
            }
            TaskPayload::LabelSwitch(d) => note(d.index_addr),
            TaskPayload::StreamSwitch(d) => note(d.cond_addr),
            TaskPayload::CacheMaintenance(d) => note(d.addr),
            _ => {}
        }
    }
    max.map_or(0, |m| m + 1)
}

/// One loaded model: its memory layout, device resources, and bound
/// task instances, executable any number of times without re-binding.
pub struct ModelRuntime {
    ctx: Arc<RuntimeContext>,
    id: ModelId,
    model: CompiledModel<Validated>,
    layout: MemoryLayout,
    streams: Vec<RawStream>,
    events: Vec<RawEvent>,
    labels: Vec<RawLabel>,
    tasks: Vec<Box<dyn TaskOp>>,
    io: IoAddrs,
    metrics: ExecutionMetrics,
    released: bool,
}

impl ModelRuntime {
    /// Loads a validated model, binding it to device resources.
    ///
    /// With `outer_memory` the caller's region backs the layout span
    /// instead of a runtime-owned allocation; the runtime then never
    /// frees it. `io_addrs` supplies one device address per outside
    /// slot the model references, in slot order.
    ///
    /// Any failure releases every resource acquired so far and surfaces
    /// as a load failure: the model is never partially loaded.
    pub fn init(
        ctx: Arc<RuntimeContext>,
        model: CompiledModel<Validated>,
        outer_memory: Option<(DevicePtr, u64)>,
        io_addrs: &[DevicePtr],
    ) -> Result<Self, RuntimeError> {
        let id = ctx.allocate_model_id();
        tracing::info!("{id}: loading {}", model.summary());

        let slots = num_outside_slots(&model);
        if io_addrs.len() != slots {
            return Err(RuntimeError::InvalidArgument(format!(
                "model '{}' references {slots} I/O slots, {} addresses supplied",
                model.name,
                io_addrs.len()
            )));
        }
        let mut io = IoAddrs::with_slots(slots);
        for (slot, ptr) in io_addrs.iter().enumerate() {
            io.set(slot, *ptr)?;
        }

        let mut layout = MemoryLayout::compute(ctx.device().clone(), &model.segments)?;
        layout.bind(outer_memory)?;

        let mut rt = Self {
            ctx,
            id,
            model,
            layout,
            streams: Vec::new(),
            events: Vec::new(),
            labels: Vec::new(),
            tasks: Vec::new(),
            io,
            metrics: ExecutionMetrics::new(),
            released: false,
        };
        if let Err(e) = rt.bind_resources() {
            tracing::warn!("{}: load failed ({e}), releasing partial resources", rt.id);
            rt.release_resources();
            return Err(e);
        }
        tracing::info!(
            "{}: loaded, {} tasks bound to {} streams",
            rt.id,
            rt.tasks.len(),
            rt.streams.len()
        );
        Ok(rt)
    }

    fn bind_resources(&mut self) -> Result<(), RuntimeError> {
        for (i, desc) in self.model.streams.iter().enumerate() {
            let hint = self
                .model
                .tasks
                .iter()
                .filter(|t| t.stream_id as usize == i)
                .count();
            let key = StreamKey {
                priority: desc.priority,
                flags: desc.flags,
            };
            let raw = self.ctx.pool().acquire(key, self.id, hint)?;
            self.streams.push(raw);
        }

        let device = self.ctx.device();
        for _ in 0..self.model.num_events {
            self.events.push(device.create_event()?);
        }
        for _ in 0..self.model.num_labels {
            self.labels.push(device.create_label()?);
        }

        if self.ctx.config().zero_workspace {
            if let (Some(base), Some(size)) = (
                self.layout.segment_base(SegmentKind::Workspace),
                self.layout.segment_size(SegmentKind::Workspace),
            ) {
                device.submit_memset(self.streams[0], base, 0, size)?;
            }
        }

        self.build_tasks()
    }

    fn build_tasks(&mut self) -> Result<(), RuntimeError> {
        let res = TaskResources {
            device: self.ctx.device(),
            config: self.ctx.config(),
            layout: &self.layout,
            streams: &self.streams,
            events: &self.events,
            labels: &self.labels,
            ops: &self.model.ops,
            io: &self.io,
        };

        for (i, def) in self.model.tasks.iter().enumerate() {
            let mut task = self.ctx.registry().create(def.kind()).ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "task #{i}: no implementation registered for kind '{}'",
                    def.kind()
                ))
            })?;

            let args = match task.parse_run_param(def, &res)? {
                Some(param) if param.args_len > 0 => Some(ArgsBuffer::alloc(
                    self.ctx.device().clone(),
                    param.args_len,
                    param.placement,
                )?),
                _ => None,
            };

            if let Err(e) = task.init(def, &res, args) {
                tracing::warn!("task #{i} ({}) failed to init: {e}", def.kind());
                return Err(e);
            }
            self.tasks.push(task);
        }
        Ok(())
    }

    /// Submits every task to its bound stream in task-list order and
    /// blocks until the primary stream reports completion.
    ///
    /// A submission failure aborts the run and is returned; the model
    /// stays loaded and is eligible for another `run` call.
    pub fn run(&mut self) -> Result<ExecutionMetrics, RuntimeError> {
        let run_start = Instant::now();
        self.metrics.begin_run();

        let distribute_start = Instant::now();
        self.distribute_all()?;
        let distribute = distribute_start.elapsed();

        let sync_start = Instant::now();
        self.synchronize()?;
        let sync = sync_start.elapsed();

        self.metrics.finalise(distribute, sync, run_start.elapsed());
        tracing::info!("{}: {}", self.id, self.metrics.summary());
        Ok(self.metrics.clone())
    }

    /// Submits every task without waiting for completion. Non-blocking;
    /// pair with [`ModelRuntime::synchronize`].
    pub fn distribute_all(&mut self) -> Result<(), RuntimeError> {
        let res = TaskResources {
            device: self.ctx.device(),
            config: self.ctx.config(),
            layout: &self.layout,
            streams: &self.streams,
            events: &self.events,
            labels: &self.labels,
            ops: &self.model.ops,
            io: &self.io,
        };
        let profiling = self.ctx.config().enable_profiling;

        for (i, task) in self.tasks.iter_mut().enumerate() {
            if let Err(e) = task.distribute(&res) {
                tracing::warn!("task #{i} ({}) failed to distribute: {e}", task.kind());
                return Err(e);
            }
            if profiling {
                self.metrics.record_task(task.kind());
            }
        }
        Ok(())
    }

    /// Blocks until all work submitted to the primary stream completes,
    /// bounded by the configured synchronize timeout.
    pub fn synchronize(&self) -> Result<(), RuntimeError> {
        let stream = self.primary_stream()?;
        let timeout = self.ctx.config().sync_timeout();
        self.ctx.device().synchronize_stream(stream, timeout)?;
        Ok(())
    }

    /// Rebinds one memory segment to a new physical base and re-patches
    /// the argument buffers of every task referencing it. Tasks bound to
    /// unaffected segments are left untouched.
    pub fn update_memory_base(
        &mut self,
        kind: SegmentKind,
        base: DevicePtr,
        size: u64,
    ) -> Result<(), RuntimeError> {
        self.layout.update_base(kind, base, size)?;
        let refreshed = self.refresh_tasks(|task| task.references_segment(kind))?;
        tracing::debug!(
            "{}: rebased {kind} segment, refreshed {refreshed} tasks",
            self.id
        );
        Ok(())
    }

    /// Rebinds the caller-supplied I/O addresses for the next run and
    /// re-patches every task. The address count must match the model's
    /// slot count exactly.
    pub fn bind_io(&mut self, addrs: &[DevicePtr]) -> Result<(), RuntimeError> {
        if addrs.len() != self.io.len() {
            return Err(RuntimeError::InvalidArgument(format!(
                "model '{}' has {} I/O slots, {} addresses supplied",
                self.model.name,
                self.io.len(),
                addrs.len()
            )));
        }
        for (slot, ptr) in addrs.iter().enumerate() {
            self.io.set(slot, *ptr)?;
        }
        self.refresh_tasks(|_| true)?;
        Ok(())
    }

    fn refresh_tasks(
        &mut self,
        affected: impl Fn(&dyn TaskOp) -> bool,
    ) -> Result<usize, RuntimeError> {
        let res = TaskResources {
            device: self.ctx.device(),
            config: self.ctx.config(),
            layout: &self.layout,
            streams: &self.streams,
            events: &self.events,
            labels: &self.labels,
            ops: &self.model.ops,
            io: &self.io,
        };
        let mut refreshed = 0;
        for task in self.tasks.iter_mut() {
            if affected(task.as_ref()) {
                task.update_host_args(&res)?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Explicit staging copy into a model address — the fallback path
    /// for operands whose zero-copy binding was disabled.
    pub fn copy_input(&self, addr: LogicalAddr, bytes: &[u8]) -> Result<(), RuntimeError> {
        let ptr = crate::args::resolve_addr(&self.layout, &self.io, addr)?;
        self.ctx.device().memcpy_to_device(ptr, bytes)?;
        Ok(())
    }

    /// Explicit staging copy out of a model address — the fallback path
    /// for operands whose zero-copy binding was disabled.
    pub fn copy_output(&self, addr: LogicalAddr, out: &mut [u8]) -> Result<(), RuntimeError> {
        let ptr = crate::args::resolve_addr(&self.layout, &self.io, addr)?;
        self.ctx.device().memcpy_from_device(out, ptr)?;
        Ok(())
    }

    // ── Query surface ──────────────────────────────────────────

    /// The model's id.
    pub fn id(&self) -> ModelId {
        self.id
    }

    /// The model's name.
    pub fn name(&self) -> &str {
        &self.model.name
    }

    /// The acquired stream handles, indexed by compiled stream id.
    pub fn streams(&self) -> &[RawStream] {
        &self.streams
    }

    /// The created event handles.
    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    /// The created label handles.
    pub fn labels(&self) -> &[RawLabel] {
        &self.labels
    }

    /// Looks up an op-table entry.
    pub fn op(&self, index: u32) -> Option<&OpDef> {
        self.model.op(index)
    }

    /// The model's bound memory layout.
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Whether a segment's base may be rebased between runs.
    pub fn is_refreshable(&self, kind: SegmentKind) -> bool {
        self.layout.is_refreshable(kind)
    }

    /// Declared size of every memory segment.
    pub fn memory_sizes(&self) -> Vec<(SegmentKind, u64)> {
        self.model
            .segments
            .iter()
            .map(|s| (s.kind, s.size_bytes))
            .collect()
    }

    /// Shapes of the model's caller-supplied input tensors.
    pub fn input_shapes(&self) -> Vec<Vec<u64>> {
        self.model
            .ops
            .iter()
            .flat_map(|op| op.inputs.iter())
            .filter(|t| t.addr.is_outside())
            .map(|t| t.dims.clone())
            .collect()
    }

    /// Shapes of the model's caller-supplied output tensors.
    pub fn output_shapes(&self) -> Vec<Vec<u64>> {
        self.model
            .ops
            .iter()
            .flat_map(|op| op.outputs.iter())
            .filter(|t| t.addr.is_outside())
            .map(|t| t.dims.clone())
            .collect()
    }

    /// Metrics of the most recent run.
    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    /// Aggregated (offset, placement) refresh pairs over all tasks, for
    /// callers that own the refresh step of a shared argument region.
    pub fn args_refresh_infos(&self) -> Vec<ArgsRefreshInfo> {
        self.tasks
            .iter()
            .flat_map(|t| t.args_refresh_infos())
            .collect()
    }

    fn primary_stream(&self) -> Result<RawStream, RuntimeError> {
        self.streams
            .first()
            .copied()
            .ok_or_else(|| RuntimeError::Internal("model has no bound streams".into()))
    }

    /// Releases every bound resource in the required order:
    /// stream-unbind → stream-destroy → event/label destroy →
    /// memory-release. Idempotent; also runs from `Drop` as a safety
    /// net.
    pub fn release_resources(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for raw in std::mem::take(&mut self.streams) {
            if let Err(e) = self.ctx.pool().release(raw, self.id, false) {
                tracing::error!("{}: stream release failed: {e}", self.id);
            }
        }

        let device = self.ctx.device();
        for event in self.events.drain(..) {
            if let Err(e) = device.destroy_event(event) {
                tracing::error!("{}: event destroy failed: {e}", self.id);
            }
        }
        for label in self.labels.drain(..) {
            if let Err(e) = device.destroy_label(label) {
                tracing::error!("{}: label destroy failed: {e}", self.id);
            }
        }

        // Dropping the tasks frees their argument buffers; only then is
        // the layout span released.
        self.tasks.clear();
        self.layout.release();
        tracing::info!("{}: unloaded", self.id);
    }
}

impl Drop for ModelRuntime {
    fn drop(&mut self) {
        self.release_resources();
    }
}

impl std::fmt::Debug for ModelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntime")
            .field("id", &self.id)
            .field("name", &self.model.name)
            .field("tasks", &self.tasks.len())
            .field("streams", &self.streams.len())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use compiled_model::{
        AddrFormat, DataCopyDef, MemSegmentDesc, StreamDesc, TaskDef,
    };
    use device_api::{status, DeviceDriver, StubCall, StubDevice};

    fn two_task_model() -> CompiledModel<Validated> {
        let mut m = CompiledModel::new("two-task");
        m.streams.push(StreamDesc::default());
        m.segments.push(MemSegmentDesc::new(SegmentKind::Weight, 4096));
        m.segments
            .push(MemSegmentDesc::new(SegmentKind::Workspace, 4096));
        m.tasks.push(TaskDef::new(
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::segment(SegmentKind::Weight, 0),
                dst: LogicalAddr::segment(SegmentKind::Workspace, 0),
                len: 256,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        ));
        m.tasks
            .push(TaskDef::new(0, TaskPayload::EndGraph { dump: false }));
        m.validate().unwrap()
    }

    fn ctx() -> (Arc<StubDevice>, Arc<RuntimeContext>) {
        let stub = Arc::new(StubDevice::new());
        let ctx = RuntimeContext::new(stub.clone(), RuntimeConfig::default());
        (stub, ctx)
    }

    #[test]
    fn test_init_and_run() {
        let (stub, ctx) = ctx();
        let mut rt = ModelRuntime::init(ctx.clone(), two_task_model(), None, &[]).unwrap();

        assert_eq!(ctx.pool().live_streams(), 1);
        assert_eq!(rt.streams().len(), 1);

        let metrics = rt.run().unwrap();
        assert_eq!(metrics.tasks_distributed, 2);
        assert_eq!(stub.sync_count(), 1);

        let calls = stub.submissions(rt.streams()[0]);
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], StubCall::Copy { len: 256, .. }));
        assert!(matches!(calls[1], StubCall::EndGraph { dump: false }));
    }

    #[test]
    fn test_rerun_without_rebind() {
        let (stub, ctx) = ctx();
        let mut rt = ModelRuntime::init(ctx, two_task_model(), None, &[]).unwrap();

        rt.run().unwrap();
        rt.run().unwrap();

        assert_eq!(rt.metrics().runs, 2);
        assert_eq!(stub.submissions(rt.streams()[0]).len(), 4);
    }

    #[test]
    fn test_init_failure_releases_everything() {
        let (stub, ctx) = ctx();
        // A model that needs events, with event creation failing.
        let mut unchecked = CompiledModel::new("ev");
        unchecked.streams.push(StreamDesc::default());
        unchecked
            .segments
            .push(MemSegmentDesc::new(SegmentKind::Workspace, 1024));
        unchecked.num_events = 2;
        unchecked.tasks.push(TaskDef::new(
            0,
            TaskPayload::EventRecord { event_id: 0 },
        ));
        unchecked
            .tasks
            .push(TaskDef::new(0, TaskPayload::EndGraph { dump: false }));
        let model = unchecked.validate().unwrap();

        stub.fail_once("create_event", status::RESOURCE_EXHAUSTED);
        let err = ModelRuntime::init(ctx.clone(), model, None, &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::DeviceCallFailed { .. }));

        // Load atomicity: nothing remains bound.
        assert_eq!(ctx.pool().live_streams(), 0);
        assert_eq!(stub.live_streams(), 0);
        assert_eq!(stub.live_events(), 0);
        assert_eq!(stub.live_allocations(), 0);
    }

    #[test]
    fn test_distribute_failure_leaves_model_loaded() {
        let (stub, ctx) = ctx();
        let mut rt = ModelRuntime::init(ctx, two_task_model(), None, &[]).unwrap();

        stub.fail_once("submit_copy", 55);
        let err = rt.run().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::DeviceCallFailed { op: "submit_copy", code: 55 }
        ));

        // Still loaded and runnable.
        rt.run().unwrap();
    }

    #[test]
    fn test_update_memory_base_refreshes_referencing_tasks() {
        let (stub, ctx) = ctx();
        let mut unchecked = CompiledModel::new("refresh");
        unchecked.streams.push(StreamDesc::default());
        unchecked
            .segments
            .push(MemSegmentDesc::new(SegmentKind::Weight, 4096));
        unchecked.segments.push(MemSegmentDesc::new(
            SegmentKind::FeatureMapRefreshable,
            4096,
        ));
        unchecked.tasks.push(TaskDef::new(
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::segment(SegmentKind::Weight, 0),
                dst: LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0x20),
                len: 64,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        ));
        unchecked
            .tasks
            .push(TaskDef::new(0, TaskPayload::EndGraph { dump: false }));
        let mut rt =
            ModelRuntime::init(ctx, unchecked.validate().unwrap(), None, &[]).unwrap();

        rt.run().unwrap();
        rt.update_memory_base(
            SegmentKind::FeatureMapRefreshable,
            DevicePtr::new(0x990000),
            4096,
        )
        .unwrap();
        rt.run().unwrap();

        let calls = stub.submissions(rt.streams()[0]);
        match (&calls[0], &calls[2]) {
            (StubCall::Copy { dst: d1, .. }, StubCall::Copy { dst: d2, .. }) => {
                assert_ne!(d1, d2);
                assert_eq!(*d2, DevicePtr::new(0x990000 + 0x20));
            }
            other => panic!("unexpected submissions: {other:?}"),
        }
    }

    #[test]
    fn test_io_slot_count_mismatch_rejected() {
        let (_stub, ctx) = ctx();
        // Model references no outside slots; supplying one is an error.
        let err = ModelRuntime::init(
            ctx,
            two_task_model(),
            None,
            &[DevicePtr::new(0x1000)],
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }

    #[test]
    fn test_outer_memory_not_freed_on_teardown() {
        let (stub, ctx) = ctx();
        let outer = stub.alloc(64 * 1024, device_api::MemoryTier::Global).unwrap();

        let rt = ModelRuntime::init(
            ctx,
            two_task_model(),
            Some((outer, 64 * 1024)),
            &[],
        )
        .unwrap();
        drop(rt);

        // Only the caller's allocation survives.
        assert_eq!(stub.live_allocations(), 1);
        assert_eq!(stub.live_streams(), 0);
    }

    #[test]
    fn test_copy_input_output_roundtrip() {
        let (_stub, ctx) = ctx();
        let rt = ModelRuntime::init(ctx, two_task_model(), None, &[]).unwrap();

        let addr = LogicalAddr::segment(SegmentKind::Workspace, 0x40);
        rt.copy_input(addr, &[9, 8, 7, 6]).unwrap();
        let mut out = [0u8; 4];
        rt.copy_output(addr, &mut out).unwrap();
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn test_drop_is_teardown_safety_net() {
        let (stub, ctx) = ctx();
        let rt = ModelRuntime::init(ctx.clone(), two_task_model(), None, &[]).unwrap();
        drop(rt);

        assert_eq!(ctx.pool().live_streams(), 0);
        assert_eq!(stub.live_streams(), 0);
        assert_eq!(stub.live_allocations(), 0);
    }

    #[test]
    fn test_zero_workspace_submits_memset() {
        let stub = Arc::new(StubDevice::new());
        let config = RuntimeConfig {
            zero_workspace: true,
            ..Default::default()
        };
        let ctx = RuntimeContext::new(stub.clone(), config);
        let rt = ModelRuntime::init(ctx, two_task_model(), None, &[]).unwrap();

        let calls = stub.submissions(rt.streams()[0]);
        assert!(matches!(
            calls[0],
            StubCall::Memset { value: 0, len: 4096, .. }
        ));
    }

    #[test]
    fn test_num_outside_slots() {
        let mut m = CompiledModel::new("io");
        m.streams.push(StreamDesc::default());
        m.segments
            .push(MemSegmentDesc::new(SegmentKind::Workspace, 1024));
        m.tasks.push(TaskDef::new(
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::outside(2),
                dst: LogicalAddr::segment(SegmentKind::Workspace, 0),
                len: 16,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        ));
        m.tasks
            .push(TaskDef::new(0, TaskPayload::EndGraph { dump: false }));
        let m = m.validate().unwrap();
        assert_eq!(num_outside_slots(&m), 3);
        assert_eq!(num_outside_slots(&two_task_model()), 0);
    }
}
