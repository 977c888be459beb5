// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the execution runtime.
//!
//! The taxonomy follows where a failure can be detected:
//!
//! - [`RuntimeError::InvalidArgument`] — bad references, malformed
//!   descriptors, size mismatches. Always caught at `init` or
//!   `parse_run_param`, never at `distribute`.
//! - [`RuntimeError::ResourceExhausted`] — no stream or memory left.
//!   Caught at `init`.
//! - [`RuntimeError::DeviceCallFailed`] — a native device call returned
//!   a non-success status at `distribute` or synchronize time. Carries
//!   the native code verbatim.
//! - [`RuntimeError::Internal`] — invariant violations; program defects.

use compiled_model::ModelError;
use device_api::DeviceError;
use memory_layout::LayoutError;
use stream_pool::PoolError;

/// Coarse classification of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidArgument,
    ResourceExhausted,
    DeviceCallFailed,
    Internal,
}

/// Errors that can occur while loading or running a model.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A reference or descriptor the compiler produced does not hold up
    /// against the runtime's resource tables.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A device resource could not be obtained.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A native device call failed; `code` is the native status, 1:1.
    #[error("device call '{op}' failed with native status {code}")]
    DeviceCallFailed { op: &'static str, code: i32 },

    /// An invariant was violated. This is a program defect.
    #[error("internal error: {0}")]
    Internal(String),

    /// Compiled-model validation failure.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Stream-pool failure.
    #[error("stream pool error: {0}")]
    Pool(#[from] PoolError),

    /// Memory-layout failure.
    #[error("memory layout error: {0}")]
    Layout(#[from] LayoutError),
}

impl From<DeviceError> for RuntimeError {
    fn from(e: DeviceError) -> Self {
        RuntimeError::DeviceCallFailed {
            op: e.op,
            code: e.code,
        }
    }
}

impl RuntimeError {
    /// Maps this error (including wrapped leaf-crate errors) onto the
    /// four-way taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RuntimeError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            RuntimeError::ResourceExhausted(_) => ErrorCategory::ResourceExhausted,
            RuntimeError::DeviceCallFailed { .. } => ErrorCategory::DeviceCallFailed,
            RuntimeError::Internal(_) => ErrorCategory::Internal,
            RuntimeError::Model(_) => ErrorCategory::InvalidArgument,
            RuntimeError::Pool(e) => match e {
                PoolError::Create(_) => ErrorCategory::ResourceExhausted,
                PoolError::Destroy(_) => ErrorCategory::DeviceCallFailed,
                PoolError::UnknownStream(_) | PoolError::NotAnOwner { .. } => {
                    ErrorCategory::InvalidArgument
                }
            },
            RuntimeError::Layout(e) => match e {
                LayoutError::Alloc(_) => ErrorCategory::ResourceExhausted,
                LayoutError::Overlap(_) => ErrorCategory::Internal,
                _ => ErrorCategory::InvalidArgument,
            },
        }
    }
}
