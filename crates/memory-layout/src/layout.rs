// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Logical memory layout and logical→physical address resolution.
//!
//! The compiler declares segments by kind and size; [`MemoryLayout`]
//! packs them into one logical span (alignment-rounded, non-overlapping)
//! and binds the span to physical memory — either a runtime-owned device
//! allocation or a caller-supplied region. [`SegmentKind::External`]
//! segments are never part of the span: their physical base always comes
//! from the caller.
//!
//! ```text
//! compute(descs)            bind(outer?)             resolve(addr)
//!   offsets assigned   ──►    span backed,      ──►    base + offset,
//!   overlap-checked           bases derived            range-checked
//! ```
//!
//! Rebinding: a refreshable feature-map (or external) segment may move
//! to a new physical base between runs via [`MemoryLayout::update_base`].
//! Every rebind bumps a generation counter, which the argument binder
//! compares to decide whether patched addresses are stale.

use crate::{DeviceBuffer, LayoutError, MemoryBacking};
use compiled_model::{LogicalAddr, MemSegmentDesc, SegmentKind};
use device_api::{DeviceDriver, DevicePtr, MemoryTier};
use std::sync::Arc;

/// One laid-out segment.
#[derive(Debug)]
struct Segment {
    desc: MemSegmentDesc,
    /// Byte offset inside the span. Unused for `External` segments.
    logical_offset: u64,
    /// Physical base; null until bound.
    base: DevicePtr,
}

/// The memory layout of one loaded model.
pub struct MemoryLayout {
    device: Arc<dyn DeviceDriver>,
    segments: Vec<Segment>,
    backing: Option<MemoryBacking>,
    total_span: u64,
    generation: u64,
}

impl MemoryLayout {
    /// Computes the layout for the declared segments.
    ///
    /// Non-external segments are packed in declaration order, each base
    /// rounded up to its alignment. No physical memory is touched.
    pub fn compute(
        device: Arc<dyn DeviceDriver>,
        descs: &[MemSegmentDesc],
    ) -> Result<Self, LayoutError> {
        let mut segments = Vec::with_capacity(descs.len());
        let mut cursor: u64 = 0;

        for desc in descs {
            let logical_offset = if desc.kind == SegmentKind::External {
                0
            } else {
                let aligned = round_up(cursor, desc.alignment);
                cursor = aligned + desc.size_bytes;
                aligned
            };
            segments.push(Segment {
                desc: *desc,
                logical_offset,
                base: DevicePtr::NULL,
            });
        }

        let layout = Self {
            device,
            segments,
            backing: None,
            total_span: cursor,
            generation: 0,
        };
        layout.verify_no_overlap()?;
        Ok(layout)
    }

    /// Checks the non-overlap invariant over all span segments.
    ///
    /// Packing assigns disjoint ranges, so a failure here is a program
    /// defect and is logged loudly before being returned.
    fn verify_no_overlap(&self) -> Result<(), LayoutError> {
        let mut spans: Vec<(u64, u64, SegmentKind)> = self
            .segments
            .iter()
            .filter(|s| s.desc.kind != SegmentKind::External)
            .map(|s| (s.logical_offset, s.logical_offset + s.desc.size_bytes, s.desc.kind))
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            if pair[0].1 > pair[1].0 {
                let msg = format!(
                    "{} [0x{:x}, 0x{:x}) overlaps {} [0x{:x}, 0x{:x})",
                    pair[0].2, pair[0].0, pair[0].1, pair[1].2, pair[1].0, pair[1].1
                );
                tracing::error!("memory layout invariant violated: {msg}");
                return Err(LayoutError::Overlap(msg));
            }
        }
        Ok(())
    }

    /// Binds the span to physical memory.
    ///
    /// With `outer` the caller's region backs the span and is never
    /// freed by this layout; otherwise a device allocation is made and
    /// owned. Every non-external segment's base is derived from the
    /// span base.
    pub fn bind(&mut self, outer: Option<(DevicePtr, u64)>) -> Result<(), LayoutError> {
        let backing = match outer {
            Some((ptr, size)) => {
                if size < self.total_span {
                    return Err(LayoutError::OuterTooSmall {
                        provided: size,
                        needed: self.total_span,
                    });
                }
                tracing::debug!("binding layout to caller memory at {ptr} ({size} bytes)");
                MemoryBacking::Borrowed { ptr, size }
            }
            None => {
                let buf =
                    DeviceBuffer::alloc(self.device.clone(), self.total_span.max(1), MemoryTier::Global)?;
                MemoryBacking::Owned(buf)
            }
        };

        let span_base = backing.ptr();
        for seg in &mut self.segments {
            if seg.desc.kind != SegmentKind::External {
                seg.base = span_base.offset(seg.logical_offset);
            }
        }
        self.backing = Some(backing);
        self.generation += 1;
        Ok(())
    }

    /// Rebinds one segment to a new physical base.
    ///
    /// Only refreshable feature-map and external segments may move; all
    /// other kinds keep their base for the life of the model.
    pub fn update_base(
        &mut self,
        kind: SegmentKind,
        base: DevicePtr,
        size: u64,
    ) -> Result<(), LayoutError> {
        if !Self::kind_is_refreshable(kind) {
            return Err(LayoutError::NotRefreshable { kind });
        }
        let seg = self.segment_mut(kind)?;
        if size < seg.desc.size_bytes {
            return Err(LayoutError::OuterTooSmall {
                provided: size,
                needed: seg.desc.size_bytes,
            });
        }
        seg.base = base;
        self.generation += 1;
        tracing::debug!("rebound {kind} segment to {base}");
        Ok(())
    }

    /// Resolves a logical address to a live device pointer.
    ///
    /// Caller-supplied (`Outside`) addresses are resolved by the
    /// argument binder from the per-run I/O table, never here.
    pub fn resolve(&self, addr: LogicalAddr) -> Result<DevicePtr, LayoutError> {
        match addr {
            LogicalAddr::Segment { kind, offset } => {
                let seg = self.segment(kind)?;
                if seg.base.is_null() {
                    return Err(LayoutError::Unbound { kind });
                }
                if offset >= seg.desc.size_bytes {
                    return Err(LayoutError::OutOfRange {
                        kind,
                        offset,
                        size: seg.desc.size_bytes,
                    });
                }
                Ok(seg.base.offset(offset))
            }
            LogicalAddr::Outside { slot } => Err(LayoutError::OutsideAddr(slot)),
        }
    }

    /// Returns `true` if the given kind's base may move between runs.
    pub fn kind_is_refreshable(kind: SegmentKind) -> bool {
        matches!(
            kind,
            SegmentKind::FeatureMapRefreshable | SegmentKind::External
        )
    }

    /// Returns `true` if this layout has a segment of the given kind
    /// and that segment's base may move between runs.
    pub fn is_refreshable(&self, kind: SegmentKind) -> bool {
        Self::kind_is_refreshable(kind) && self.segment(kind).is_ok()
    }

    /// The physical base of a segment, if bound.
    pub fn segment_base(&self, kind: SegmentKind) -> Option<DevicePtr> {
        self.segment(kind)
            .ok()
            .map(|s| s.base)
            .filter(|b| !b.is_null())
    }

    /// The declared size of a segment.
    pub fn segment_size(&self, kind: SegmentKind) -> Option<u64> {
        self.segment(kind).ok().map(|s| s.desc.size_bytes)
    }

    /// Total bytes of the packed (non-external) span.
    pub fn total_span(&self) -> u64 {
        self.total_span
    }

    /// Monotonic rebind counter; bumps on `bind` and `update_base`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` if the layout owns its backing memory.
    pub fn owns_backing(&self) -> bool {
        self.backing.as_ref().is_some_and(|b| b.is_owned())
    }

    /// Releases the backing memory (owned memory is freed, borrowed
    /// memory is left to the caller) and nulls every span base.
    ///
    /// This is the final step of model teardown: streams must already
    /// have been unbound and destroyed.
    pub fn release(&mut self) {
        if self.backing.take().is_some() {
            for seg in &mut self.segments {
                if seg.desc.kind != SegmentKind::External {
                    seg.base = DevicePtr::NULL;
                }
            }
            tracing::debug!("released layout backing ({} bytes span)", self.total_span);
        }
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| format!("{} {} B", s.desc.kind, s.desc.size_bytes))
            .collect();
        format!(
            "MemoryLayout: span {} B [{}], generation {}",
            self.total_span,
            parts.join(", "),
            self.generation,
        )
    }

    fn segment(&self, kind: SegmentKind) -> Result<&Segment, LayoutError> {
        self.segments
            .iter()
            .find(|s| s.desc.kind == kind)
            .ok_or(LayoutError::UnknownSegment { kind })
    }

    fn segment_mut(&mut self, kind: SegmentKind) -> Result<&mut Segment, LayoutError> {
        self.segments
            .iter_mut()
            .find(|s| s.desc.kind == kind)
            .ok_or(LayoutError::UnknownSegment { kind })
    }
}

impl std::fmt::Debug for MemoryLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLayout")
            .field("total_span", &self.total_span)
            .field("bound", &self.backing.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
