// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error type for the device-runtime boundary.
//!
//! Every driver call returns a native status code. Non-success codes are
//! wrapped into [`DeviceError`] with the operation name attached; the code
//! itself is carried verbatim so no native status is ever swallowed on
//! its way up to the caller.

/// Well-known native status codes.
///
/// The device runtime defines many more; the runtime only needs to name
/// the ones it produces itself (the stub device and the synchronize
/// timeout path).
pub mod status {
    /// The call succeeded.
    pub const SUCCESS: i32 = 0;
    /// Generic internal driver failure.
    pub const INTERNAL: i32 = 1;
    /// A resource limit was hit (streams, events, memory).
    pub const RESOURCE_EXHAUSTED: i32 = 2;
    /// An invalid handle or address was passed.
    pub const INVALID_HANDLE: i32 = 3;
    /// A bounded synchronize expired before the device completed.
    pub const TIMEOUT: i32 = 4;
}

/// A failed device-runtime call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("device call '{op}' failed with native status {code}")]
pub struct DeviceError {
    /// Name of the driver entry point that failed.
    pub op: &'static str,
    /// The native status code, carried 1:1.
    pub code: i32,
}

impl DeviceError {
    /// Creates an error for the named operation.
    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }

    /// Creates a timeout error for a bounded synchronize.
    pub fn timeout(op: &'static str) -> Self {
        Self {
            op,
            code: status::TIMEOUT,
        }
    }

    /// Returns `true` if this error reports a synchronize timeout.
    pub fn is_timeout(&self) -> bool {
        self.code == status::TIMEOUT
    }
}

/// Result alias for driver calls.
pub type DeviceResult<T> = Result<T, DeviceError>;
