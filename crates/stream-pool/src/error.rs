// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for stream-pool operations.

use device_api::DeviceError;

/// Errors that can occur while acquiring or releasing pooled streams.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The device refused to create a new stream.
    #[error("stream creation failed: {0}")]
    Create(#[source] DeviceError),

    /// The device refused to destroy a stream.
    #[error("stream destruction failed: {0}")]
    Destroy(#[source] DeviceError),

    /// The handle is not managed by this pool.
    #[error("stream handle {0} is not pooled")]
    UnknownStream(u64),

    /// A model released a stream it never acquired.
    #[error("model {model} does not own stream {stream}")]
    NotAnOwner { model: u64, stream: u64 },
}
