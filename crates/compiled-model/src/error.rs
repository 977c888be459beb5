// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for compiled-model parsing and validation.

use crate::SegmentKind;

/// Errors raised while parsing or validating a compiled model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model as a whole is malformed.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// A task record references something that does not exist.
    #[error("invalid task #{task}: {detail}")]
    InvalidTask { task: usize, detail: String },

    /// An op-table entry is malformed.
    #[error("invalid op '{op}': {detail}")]
    InvalidOp { op: String, detail: String },

    /// A memory-segment descriptor is malformed.
    #[error("invalid {kind} segment: {detail}")]
    InvalidSegment {
        kind: SegmentKind,
        detail: String,
    },

    /// JSON fixture parse failure.
    #[error("model deserialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
