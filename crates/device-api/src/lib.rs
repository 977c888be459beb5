// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-api
//!
//! The versioned device-runtime boundary the execution runtime is written
//! against. Everything the runtime asks of the hardware — stream, event
//! and label lifecycle, device memory, synchronous copies, and in-stream
//! command submission — goes through the [`DeviceDriver`] trait.
//!
//! # Key Components
//!
//! - [`DeviceDriver`] — the driver trait. Submissions are non-blocking
//!   and stream-ordered; only `synchronize_stream` blocks.
//! - [`DevicePtr`], [`RawStream`], [`RawEvent`], [`RawLabel`] — typed
//!   native handles.
//! - [`DeviceError`] — wraps the native status code 1:1 together with the
//!   failing entry point's name.
//! - [`StubDevice`] — an in-memory driver with real byte backing, ordered
//!   call recording, and per-entry-point failure injection. Every crate
//!   in the workspace tests against it.
//!
//! # Example
//! ```
//! use device_api::{DeviceDriver, MemoryTier, StubDevice};
//!
//! let dev = StubDevice::new();
//! let stream = dev.create_stream(0, 0).unwrap();
//! let buf = dev.alloc(256, MemoryTier::Global).unwrap();
//!
//! dev.memcpy_to_device(buf, &[0xAB; 16]).unwrap();
//! dev.submit_memset(stream, buf, 0, 16).unwrap();
//! dev.synchronize_stream(stream, None).unwrap();
//!
//! dev.free(buf).unwrap();
//! dev.destroy_stream(stream).unwrap();
//! ```

mod driver;
mod error;
mod handles;
mod stub;

pub use driver::{CacheOp, CondCmp, DeviceDriver, MemcpyKind, MemoryTier};
pub use error::{status, DeviceError, DeviceResult};
pub use handles::{DevicePtr, RawEvent, RawLabel, RawStream};
pub use stub::{StubCall, StubDevice};
