// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-layout
//!
//! Logical memory-segment layout for loaded models: packs the segments
//! the compiler declared (weights, fixed and refreshable feature-map,
//! workspace) into one non-overlapping span, binds the span to physical
//! device memory — runtime-owned or caller-supplied — and resolves the
//! compiler's logical addresses to live device pointers.
//!
//! # Key Components
//!
//! - [`MemoryLayout`] — layout computation, binding, resolution, and
//!   per-segment rebinding with a generation counter.
//! - [`DeviceBuffer`] — RAII guard over one device allocation.
//! - [`MemoryBacking`] — the owned/borrowed split that keeps teardown
//!   from ever freeing caller-owned memory.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use compiled_model::{LogicalAddr, MemSegmentDesc, SegmentKind};
//! use device_api::StubDevice;
//! use memory_layout::MemoryLayout;
//!
//! let dev = Arc::new(StubDevice::new());
//! let mut layout = MemoryLayout::compute(
//!     dev,
//!     &[
//!         MemSegmentDesc::new(SegmentKind::Weight, 4096),
//!         MemSegmentDesc::new(SegmentKind::Workspace, 1024),
//!     ],
//! )
//! .unwrap();
//!
//! layout.bind(None).unwrap();
//! let ptr = layout
//!     .resolve(LogicalAddr::segment(SegmentKind::Workspace, 0x10))
//!     .unwrap();
//! assert!(!ptr.is_null());
//! ```

mod buffer;
mod error;
mod layout;

pub use buffer::{DeviceBuffer, MemoryBacking};
pub use error::LayoutError;
pub use layout::MemoryLayout;
