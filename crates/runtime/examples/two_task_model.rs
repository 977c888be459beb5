// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: load and run a minimal compiled model on the stub device.
//!
//! Builds a two-task model (one data-copy, one end-of-graph marker),
//! loads it twice to show stream sharing across models, runs both, then
//! rebases the refreshable feature-map and runs again.
//!
//! ```bash
//! cargo run -p runtime --example two_task_model
//! ```

use compiled_model::{
    AddrFormat, CompiledModel, DataCopyDef, LogicalAddr, MemSegmentDesc, SegmentKind,
    StreamDesc, TaskDef, TaskPayload, Validated,
};
use device_api::{DevicePtr, StubDevice};
use runtime::{ModelManager, RuntimeConfig, RuntimeContext};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let stub = Arc::new(StubDevice::new());
    let ctx = RuntimeContext::new(stub.clone(), RuntimeConfig::default());
    let manager = ModelManager::new(ctx);

    // Load the same compiled model twice: the pool hands both loads the
    // same hardware stream.
    let a = manager.load(build_model("model-a"))?;
    let b = manager.load(build_model("model-b"))?;
    println!(
        "loaded 2 models, device streams alive: {}",
        stub.live_streams()
    );

    let metrics = manager.run(a, &[])?;
    println!("model-a: {}", metrics.summary());
    let metrics = manager.run(b, &[])?;
    println!("model-b: {}", metrics.summary());

    // Rotate model-a's feature-map to a new physical base; its copy task
    // is re-patched before the next run, without re-loading.
    manager.update_memory_base(
        a,
        SegmentKind::FeatureMapRefreshable,
        DevicePtr::new(0x4000_0000),
        1 << 16,
    )?;
    let metrics = manager.run(a, &[])?;
    println!("model-a after rebase: {}", metrics.summary());

    manager.unload(a)?;
    manager.unload(b)?;
    println!(
        "unloaded, device streams alive: {} | pool: {}",
        stub.live_streams(),
        manager.context().pool().stats().summary()
    );

    Ok(())
}

fn build_model(name: &str) -> CompiledModel<Validated> {
    let mut m = CompiledModel::new(name);
    m.streams.push(StreamDesc::default());
    m.segments.push(MemSegmentDesc::new(SegmentKind::Weight, 1 << 16));
    m.segments.push(MemSegmentDesc::new(
        SegmentKind::FeatureMapRefreshable,
        1 << 16,
    ));
    m.tasks.push(TaskDef::new(
        0,
        TaskPayload::DataCopy(DataCopyDef {
            src: LogicalAddr::segment(SegmentKind::Weight, 0),
            dst: LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0),
            len: 4096,
            dst_stride: None,
            addr_format: AddrFormat::dense_u64(),
        }),
    ));
    m.tasks
        .push(TaskDef::new(0, TaskPayload::EndGraph { dump: false }));
    m.validate().expect("example model is well-formed")
}
