// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The caller-facing loaded-model registry.
//!
//! [`ModelManager`] owns every loaded [`ModelRuntime`] behind one
//! registry mutex and exposes the execution API: load, unload, run
//! (synchronous), run-with-callback (asynchronous), memory rebasing, and
//! the shape/metrics query surface.
//!
//! Failures are returned as [`RuntimeError`] values; no panic crosses
//! this boundary. A failed run leaves its model loaded — only the
//! caller decides whether to retry, rebind, or unload.

use crate::{ExecutionMetrics, ModelRuntime, RuntimeContext, RuntimeError};
use compiled_model::{CompiledModel, SegmentKind, Validated};
use device_api::DevicePtr;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use stream_pool::ModelId;

/// Registry of loaded models, shared across caller threads.
pub struct ModelManager {
    ctx: Arc<RuntimeContext>,
    models: Mutex<HashMap<ModelId, Arc<Mutex<ModelRuntime>>>>,
}

impl ModelManager {
    /// Creates a manager over the given runtime context.
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            ctx,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying runtime context.
    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Loads a validated model with no caller-supplied memory or I/O
    /// addresses.
    pub fn load(&self, model: CompiledModel<Validated>) -> Result<ModelId, RuntimeError> {
        self.load_with(model, None, &[])
    }

    /// Loads a validated model, optionally backed by caller-supplied
    /// memory, with one device address per outside I/O slot.
    pub fn load_with(
        &self,
        model: CompiledModel<Validated>,
        outer_memory: Option<(DevicePtr, u64)>,
        io_addrs: &[DevicePtr],
    ) -> Result<ModelId, RuntimeError> {
        let rt = ModelRuntime::init(self.ctx.clone(), model, outer_memory, io_addrs)?;
        let id = rt.id();
        self.lock().insert(id, Arc::new(Mutex::new(rt)));
        Ok(id)
    }

    /// Unloads a model, releasing its resources in teardown order.
    /// Blocks until any in-flight run of the model has finished.
    pub fn unload(&self, id: ModelId) -> Result<(), RuntimeError> {
        let entry = self.lock().remove(&id).ok_or_else(|| unknown_model(id))?;
        entry.lock().expect("model mutex poisoned").release_resources();
        Ok(())
    }

    /// Runs a model synchronously: binds `inputs` to its I/O slots,
    /// submits every task, and blocks until device completion.
    ///
    /// Outputs land in the caller-supplied output addresses (zero-copy)
    /// or are fetched afterwards via the model's explicit-copy fallback.
    pub fn run(
        &self,
        id: ModelId,
        inputs: &[DevicePtr],
    ) -> Result<ExecutionMetrics, RuntimeError> {
        let entry = self.model(id)?;
        let mut rt = entry.lock().expect("model mutex poisoned");
        if !inputs.is_empty() {
            rt.bind_io(inputs)?;
        }
        rt.run()
    }

    /// Runs a model asynchronously: returns immediately, invoking
    /// `callback` with the run result from a worker thread once the
    /// device completes.
    ///
    /// Must be called from within a tokio runtime. No ordering is
    /// promised between the callbacks of different models.
    pub fn execute_async(
        &self,
        id: ModelId,
        inputs: Vec<DevicePtr>,
        callback: impl FnOnce(Result<ExecutionMetrics, RuntimeError>) + Send + 'static,
    ) -> Result<(), RuntimeError> {
        let entry = self.model(id)?;
        // Detached on purpose: completion is reported through the
        // callback, not the join handle.
        let _ = tokio::task::spawn_blocking(move || {
            let mut rt = entry.lock().expect("model mutex poisoned");
            let result = if inputs.is_empty() {
                rt.run()
            } else {
                rt.bind_io(&inputs).and_then(|_| rt.run())
            };
            drop(rt);
            callback(result);
        });
        Ok(())
    }

    /// Rebinds one of a model's memory segments to a new physical base
    /// and refreshes every affected task before the next run.
    pub fn update_memory_base(
        &self,
        id: ModelId,
        kind: SegmentKind,
        base: DevicePtr,
        size: u64,
    ) -> Result<(), RuntimeError> {
        let entry = self.model(id)?;
        let mut rt = entry.lock().expect("model mutex poisoned");
        rt.update_memory_base(kind, base, size)
    }

    /// Shapes of a model's caller-supplied input tensors.
    pub fn input_shapes(&self, id: ModelId) -> Result<Vec<Vec<u64>>, RuntimeError> {
        Ok(self.model(id)?.lock().expect("model mutex poisoned").input_shapes())
    }

    /// Shapes of a model's caller-supplied output tensors.
    pub fn output_shapes(&self, id: ModelId) -> Result<Vec<Vec<u64>>, RuntimeError> {
        Ok(self.model(id)?.lock().expect("model mutex poisoned").output_shapes())
    }

    /// Metrics of a model's most recent run.
    pub fn metrics(&self, id: ModelId) -> Result<ExecutionMetrics, RuntimeError> {
        Ok(self
            .model(id)?
            .lock()
            .expect("model mutex poisoned")
            .metrics()
            .clone())
    }

    /// Number of models currently loaded.
    pub fn num_loaded(&self) -> usize {
        self.lock().len()
    }

    fn model(&self, id: ModelId) -> Result<Arc<Mutex<ModelRuntime>>, RuntimeError> {
        self.lock().get(&id).cloned().ok_or_else(|| unknown_model(id))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ModelId, Arc<Mutex<ModelRuntime>>>> {
        self.models.lock().expect("model registry mutex poisoned")
    }
}

fn unknown_model(id: ModelId) -> RuntimeError {
    RuntimeError::InvalidArgument(format!("{id} is not loaded"))
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("loaded", &self.num_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use compiled_model::{
        AddrFormat, DataCopyDef, LogicalAddr, MemSegmentDesc, StreamDesc, TaskDef, TaskPayload,
    };
    use device_api::StubDevice;

    fn two_task_model(name: &str) -> CompiledModel<Validated> {
        let mut m = CompiledModel::new(name);
        m.streams.push(StreamDesc::default());
        m.segments.push(MemSegmentDesc::new(SegmentKind::Weight, 4096));
        m.segments
            .push(MemSegmentDesc::new(SegmentKind::Workspace, 4096));
        m.tasks.push(TaskDef::new(
            0,
            TaskPayload::DataCopy(DataCopyDef {
                src: LogicalAddr::segment(SegmentKind::Weight, 0),
                dst: LogicalAddr::segment(SegmentKind::Workspace, 0),
                len: 128,
                dst_stride: None,
                addr_format: AddrFormat::dense_u64(),
            }),
        ));
        m.tasks
            .push(TaskDef::new(0, TaskPayload::EndGraph { dump: false }));
        m.validate().unwrap()
    }

    fn manager() -> (Arc<StubDevice>, ModelManager) {
        let stub = Arc::new(StubDevice::new());
        let ctx = RuntimeContext::new(stub.clone(), RuntimeConfig::default());
        (stub, ModelManager::new(ctx))
    }

    #[test]
    fn test_load_run_unload() {
        let (stub, mgr) = manager();
        let id = mgr.load(two_task_model("m")).unwrap();
        assert_eq!(mgr.num_loaded(), 1);

        let metrics = mgr.run(id, &[]).unwrap();
        assert_eq!(metrics.tasks_distributed, 2);

        mgr.unload(id).unwrap();
        assert_eq!(mgr.num_loaded(), 0);
        assert_eq!(stub.live_streams(), 0);
        assert_eq!(stub.live_allocations(), 0);
    }

    #[test]
    fn test_unknown_model_rejected() {
        let (_stub, mgr) = manager();
        let bogus = ModelId::new(404);
        assert!(mgr.run(bogus, &[]).is_err());
        assert!(mgr.unload(bogus).is_err());
        assert!(mgr.metrics(bogus).is_err());
    }

    #[test]
    fn test_two_models_share_pool() {
        let (stub, mgr) = manager();
        let a = mgr.load(two_task_model("a")).unwrap();
        let b = mgr.load(two_task_model("b")).unwrap();

        // Distinct models with identical stream keys share one queue.
        assert_eq!(stub.live_streams(), 1);

        mgr.run(a, &[]).unwrap();
        mgr.run(b, &[]).unwrap();

        mgr.unload(a).unwrap();
        assert_eq!(stub.live_streams(), 1, "stream still owned by b");
        mgr.unload(b).unwrap();
        assert_eq!(stub.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_execute_async_callback() {
        let (_stub, mgr) = manager();
        let id = mgr.load(two_task_model("async")).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        mgr.execute_async(id, Vec::new(), move |result| {
            tx.send(result.map(|m| m.tasks_distributed)).ok();
        })
        .unwrap();

        let distributed = rx.await.unwrap().unwrap();
        assert_eq!(distributed, 2);
    }

    #[test]
    fn test_metrics_query() {
        let (_stub, mgr) = manager();
        let id = mgr.load(two_task_model("q")).unwrap();
        mgr.run(id, &[]).unwrap();
        let m = mgr.metrics(id).unwrap();
        assert_eq!(m.runs, 1);
        assert_eq!(m.kind_counts["end-graph"], 1);
    }
}
