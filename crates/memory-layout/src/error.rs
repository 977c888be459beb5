// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory layout and address resolution.

use compiled_model::SegmentKind;
use device_api::DeviceError;

/// Errors that can occur while laying out, binding, or resolving model
/// memory.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// The device refused the backing allocation.
    #[error("device allocation failed: {0}")]
    Alloc(#[source] DeviceError),

    /// Caller-supplied memory is too small for the layout.
    #[error("outer memory of {provided} bytes cannot back {needed} bytes")]
    OuterTooSmall { provided: u64, needed: u64 },

    /// The layout has no segment of the requested kind.
    #[error("{kind} segment is not part of this layout")]
    UnknownSegment { kind: SegmentKind },

    /// The segment exists but has no physical base yet.
    #[error("{kind} segment has no physical base bound")]
    Unbound { kind: SegmentKind },

    /// A logical offset falls outside its segment.
    #[error("offset 0x{offset:x} outside {kind} segment of {size} bytes")]
    OutOfRange {
        kind: SegmentKind,
        offset: u64,
        size: u64,
    },

    /// Attempted to rebind a segment whose base is fixed for the life
    /// of the model.
    #[error("{kind} segment is not rebindable")]
    NotRefreshable { kind: SegmentKind },

    /// Caller-supplied I/O addresses are resolved by the argument
    /// binder, never through the layout.
    #[error("caller-supplied address slot {0} cannot be resolved through the layout")]
    OutsideAddr(usize),

    /// Segments overlap in logical-offset space. This is an invariant
    /// violation — a program defect, not a caller error.
    #[error("segment layout overlap: {0}")]
    Overlap(String),
}
