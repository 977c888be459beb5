// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Argument buffers and the zero-copy address binder.
//!
//! A task's argument buffer is a small device-resident byte block whose
//! layout the compiler fixed: operand addresses packed at known offsets
//! (see [`AddrFormat`]). The binder translates each logical operand
//! address into a live device pointer and writes it at its recorded
//! offset in the **host mirror**; the device copy is updated by an
//! explicit host→device upload, never written directly, because the
//! buffer may live in a staging tier the host CPU cannot address.
//!
//! # Zero-Copy and Its Fallback
//!
//! A binding is *live* when its address may change between runs — a
//! caller-supplied I/O slot, or an offset into a refreshable segment —
//! and it was listed for zero-copy by the compiler. Live bindings are
//! re-patched on every refresh. A zero-copy request against a fixed
//! (non-refreshable) segment cannot be honored by pointer patching; the
//! binding is demoted to copy-only and the runtime stages data through
//! the fixed address with explicit copies instead, trading a memcpy for
//! pointer stability.

use crate::RuntimeError;
use compiled_model::{AddrWidth, LogicalAddr, OpDef};
use device_api::{DeviceDriver, DevicePtr, MemoryTier};
use memory_layout::{DeviceBuffer, MemoryLayout};
use std::sync::Arc;

/// Which memory tier an argument buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgsPlacement {
    /// Global device memory.
    Device,
    /// The staging tier close to the compute units.
    Staging,
}

impl ArgsPlacement {
    fn tier(self) -> MemoryTier {
        match self {
            ArgsPlacement::Device => MemoryTier::Global,
            ArgsPlacement::Staging => MemoryTier::Staging,
        }
    }
}

/// One (offset, placement) pair a caller must re-patch when it owns the
/// refresh step for a shared argument region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgsRefreshInfo {
    /// Byte offset of the patched field.
    pub offset: u64,
    /// Where the buffer holding that field lives.
    pub placement: ArgsPlacement,
}

/// Caller-supplied I/O addresses, indexed by outside slot.
#[derive(Debug, Clone, Default)]
pub struct IoAddrs {
    addrs: Vec<DevicePtr>,
}

impl IoAddrs {
    /// Creates a table with `n` unset slots.
    pub fn with_slots(n: usize) -> Self {
        Self {
            addrs: vec![DevicePtr::NULL; n],
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Returns `true` if the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Sets the address for a slot.
    pub fn set(&mut self, slot: usize, ptr: DevicePtr) -> Result<(), RuntimeError> {
        let len = self.addrs.len();
        let entry = self.addrs.get_mut(slot).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "I/O slot {slot} out of range ({len} slots)"
            ))
        })?;
        *entry = ptr;
        Ok(())
    }

    /// Resolves a slot to its address; unset slots are an error.
    pub fn get(&self, slot: usize) -> Result<DevicePtr, RuntimeError> {
        let ptr = self.addrs.get(slot).copied().ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "I/O slot {slot} out of range ({} slots)",
                self.addrs.len()
            ))
        })?;
        if ptr.is_null() {
            return Err(RuntimeError::InvalidArgument(format!(
                "I/O slot {slot} has no address bound"
            )));
        }
        Ok(ptr)
    }
}

/// Resolves a logical address against the layout or the I/O table.
pub fn resolve_addr(
    layout: &MemoryLayout,
    io: &IoAddrs,
    addr: LogicalAddr,
) -> Result<DevicePtr, RuntimeError> {
    match addr {
        LogicalAddr::Segment { .. } => Ok(layout.resolve(addr)?),
        LogicalAddr::Outside { slot } => io.get(slot),
    }
}

/// A device-resident argument buffer with its host mirror.
pub struct ArgsBuffer {
    dev: DeviceBuffer,
    host: Vec<u8>,
    placement: ArgsPlacement,
}

impl ArgsBuffer {
    /// Allocates a buffer of `len` bytes in the given placement.
    pub fn alloc(
        device: Arc<dyn DeviceDriver>,
        len: usize,
        placement: ArgsPlacement,
    ) -> Result<Self, RuntimeError> {
        let dev = DeviceBuffer::alloc(device, len as u64, placement.tier())?;
        Ok(Self {
            dev,
            host: vec![0u8; len],
            placement,
        })
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.host.len()
    }

    /// Returns `true` if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// The device-resident copy's address.
    pub fn device_ptr(&self) -> DevicePtr {
        self.dev.ptr()
    }

    /// The buffer's placement tier.
    pub fn placement(&self) -> ArgsPlacement {
        self.placement
    }

    /// Immutable view of the host mirror.
    pub fn host(&self) -> &[u8] {
        &self.host
    }

    /// Mutable view of the host mirror.
    pub fn host_mut(&mut self) -> &mut [u8] {
        &mut self.host
    }

    /// Copies the host mirror to the device-resident buffer.
    pub fn upload(&self, device: &dyn DeviceDriver) -> Result<(), RuntimeError> {
        device.memcpy_to_device(self.dev.ptr(), &self.host)?;
        Ok(())
    }
}

impl std::fmt::Debug for ArgsBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgsBuffer")
            .field("len", &self.host.len())
            .field("placement", &self.placement)
            .finish()
    }
}

/// One operand-address field inside an argument buffer.
#[derive(Debug, Clone)]
struct Binding {
    addr: LogicalAddr,
    /// Byte offset inside the argument buffer.
    offset: u64,
    width: AddrWidth,
    /// Live bindings are re-patched on refresh; static ones are written
    /// once at init and never move.
    live: bool,
    /// A zero-copy request demoted to the explicit-copy fallback.
    copy_only: bool,
}

/// Translates logical operand addresses into argument-buffer bytes.
pub struct ArgsBinder {
    bindings: Vec<Binding>,
    /// Owning op name, for diagnostics.
    owner: String,
}

impl ArgsBinder {
    /// Records, for each operand of `op`, the argument-buffer offset its
    /// address must be written to, and classifies each binding against
    /// the layout's refresh capability.
    pub fn from_op(op: &OpDef, layout: &MemoryLayout) -> Result<Self, RuntimeError> {
        op.addr_format.validate()?;

        let mut bindings = Vec::with_capacity(op.num_io_slots());
        for (i, addr) in op.io_addrs().enumerate() {
            let wants_zero_copy = op.zero_copy.contains(&addr);
            let refreshable = match addr {
                LogicalAddr::Outside { .. } => true,
                LogicalAddr::Segment { kind, .. } => layout.is_refreshable(kind),
            };
            if wants_zero_copy && !refreshable {
                tracing::debug!(
                    "op '{}': zero-copy disabled for {addr} (fixed-address segment)",
                    op.name
                );
            }
            bindings.push(Binding {
                addr,
                offset: op.addr_format.slot_offset(i),
                width: op.addr_format.width,
                live: wants_zero_copy && refreshable,
                copy_only: wants_zero_copy && !refreshable,
            });
        }

        Ok(Self {
            bindings,
            owner: op.name.clone(),
        })
    }

    /// Writes every operand address into the host mirror. The one-time
    /// init pass; static addresses are final after this.
    pub fn write_all(
        &self,
        layout: &MemoryLayout,
        io: &IoAddrs,
        host_mirror: &mut [u8],
        max_len: usize,
    ) -> Result<(), RuntimeError> {
        for b in &self.bindings {
            self.patch(b, layout, io, host_mirror, max_len)?;
        }
        Ok(())
    }

    /// Re-patches the live bindings from the current segment bases and
    /// I/O table. Copy-only and static bindings are left untouched.
    pub fn set_arg_io_addrs(
        &self,
        layout: &MemoryLayout,
        io: &IoAddrs,
        host_mirror: &mut [u8],
        max_len: usize,
    ) -> Result<(), RuntimeError> {
        for b in self.bindings.iter().filter(|b| b.live) {
            self.patch(b, layout, io, host_mirror, max_len)?;
        }
        Ok(())
    }

    /// Appends the (offset, placement) pairs a caller must apply when it
    /// owns the refresh step. Offsets are relative to `base_offset` in
    /// the caller's shared argument region.
    pub fn gen_refresh_infos(
        &self,
        out: &mut Vec<ArgsRefreshInfo>,
        base_offset: u64,
        placement: ArgsPlacement,
    ) {
        for b in self.bindings.iter().filter(|b| b.live) {
            out.push(ArgsRefreshInfo {
                offset: base_offset + b.offset,
                placement,
            });
        }
    }

    /// Returns `true` if any live binding addresses the given segment.
    pub fn references_segment(&self, kind: compiled_model::SegmentKind) -> bool {
        self.bindings
            .iter()
            .filter(|b| b.live)
            .any(|b| b.addr.segment_kind() == Some(kind))
    }

    /// Returns `true` if any binding survives as true zero-copy.
    pub fn has_live_bindings(&self) -> bool {
        self.bindings.iter().any(|b| b.live)
    }

    /// The operand addresses demoted to the explicit-copy fallback.
    pub fn copy_only_addrs(&self) -> impl Iterator<Item = LogicalAddr> + '_ {
        self.bindings
            .iter()
            .filter(|b| b.copy_only)
            .map(|b| b.addr)
    }

    fn patch(
        &self,
        b: &Binding,
        layout: &MemoryLayout,
        io: &IoAddrs,
        host_mirror: &mut [u8],
        max_len: usize,
    ) -> Result<(), RuntimeError> {
        let ptr = resolve_addr(layout, io, b.addr)?;
        let width = b.width.bytes() as usize;
        let end = b.offset as usize + width;
        if end > max_len || end > host_mirror.len() {
            return Err(RuntimeError::InvalidArgument(format!(
                "op '{}': address field at offset {} overruns argument buffer of {} bytes",
                self.owner,
                b.offset,
                host_mirror.len().min(max_len)
            )));
        }
        match b.width {
            AddrWidth::U64 => {
                host_mirror[b.offset as usize..end].copy_from_slice(&ptr.as_u64().to_le_bytes());
            }
            AddrWidth::U32 => {
                let v = u32::try_from(ptr.as_u64()).map_err(|_| {
                    RuntimeError::InvalidArgument(format!(
                        "op '{}': address {ptr} does not fit a 32-bit field",
                        self.owner
                    ))
                })?;
                host_mirror[b.offset as usize..end].copy_from_slice(&v.to_le_bytes());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArgsBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgsBinder")
            .field("owner", &self.owner)
            .field("bindings", &self.bindings.len())
            .field("live", &self.bindings.iter().filter(|b| b.live).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compiled_model::{AddrFormat, MemSegmentDesc, SegmentKind, TensorDesc};
    use device_api::StubDevice;

    fn layout(dev: &Arc<StubDevice>) -> MemoryLayout {
        let mut l = MemoryLayout::compute(
            dev.clone(),
            &[
                MemSegmentDesc::new(SegmentKind::Weight, 4096),
                MemSegmentDesc::new(SegmentKind::FeatureMapRefreshable, 4096),
                MemSegmentDesc::new(SegmentKind::FeatureMapFixed, 4096),
            ],
        )
        .unwrap();
        l.bind(None).unwrap();
        l
    }

    fn op(zero_copy: Vec<LogicalAddr>) -> OpDef {
        OpDef {
            name: "conv_0".into(),
            inputs: vec![
                TensorDesc::new(vec![8], 4, LogicalAddr::outside(0)),
                TensorDesc::new(vec![8], 4, LogicalAddr::segment(SegmentKind::Weight, 0x100)),
            ],
            outputs: vec![TensorDesc::new(
                vec![8],
                4,
                LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0x40),
            )],
            args_size: 64,
            addr_format: AddrFormat::dense_u64(),
            zero_copy,
        }
    }

    fn read_u64(buf: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
    }

    #[test]
    fn test_write_all_packs_addresses() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let binder = ArgsBinder::from_op(&op(vec![]), &l).unwrap();

        let mut io = IoAddrs::with_slots(1);
        io.set(0, DevicePtr::new(0xAA00)).unwrap();

        let mut host = vec![0u8; 64];
        binder.write_all(&l, &io, &mut host, 64).unwrap();

        assert_eq!(read_u64(&host, 0), 0xAA00);
        let weight_base = l.segment_base(SegmentKind::Weight).unwrap();
        assert_eq!(read_u64(&host, 8), weight_base.as_u64() + 0x100);
    }

    #[test]
    fn test_refresh_only_touches_live_bindings() {
        let dev = Arc::new(StubDevice::new());
        let mut l = layout(&dev);
        let binder = ArgsBinder::from_op(
            &op(vec![
                LogicalAddr::outside(0),
                LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0x40),
            ]),
            &l,
        )
        .unwrap();

        let mut io = IoAddrs::with_slots(1);
        io.set(0, DevicePtr::new(0xAA00)).unwrap();
        let mut host = vec![0u8; 64];
        binder.write_all(&l, &io, &mut host, 64).unwrap();
        let weight_field_before = read_u64(&host, 8);

        // Move the refreshable segment and the I/O address, then refresh.
        l.update_base(SegmentKind::FeatureMapRefreshable, DevicePtr::new(0x770000), 4096)
            .unwrap();
        io.set(0, DevicePtr::new(0xBB00)).unwrap();
        binder.set_arg_io_addrs(&l, &io, &mut host, 64).unwrap();

        assert_eq!(read_u64(&host, 0), 0xBB00);
        assert_eq!(read_u64(&host, 16), 0x770000 + 0x40);
        // The static weight field must be untouched.
        assert_eq!(read_u64(&host, 8), weight_field_before);
    }

    #[test]
    fn test_zero_copy_demoted_on_fixed_segment() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let mut o = op(vec![]);
        o.inputs[1] = TensorDesc::new(
            vec![8],
            4,
            LogicalAddr::segment(SegmentKind::FeatureMapFixed, 0),
        );
        o.zero_copy = vec![LogicalAddr::segment(SegmentKind::FeatureMapFixed, 0)];

        let binder = ArgsBinder::from_op(&o, &l).unwrap();
        assert!(!binder.has_live_bindings());
        let demoted: Vec<_> = binder.copy_only_addrs().collect();
        assert_eq!(demoted.len(), 1);
        assert_eq!(demoted[0].segment_kind(), Some(SegmentKind::FeatureMapFixed));
    }

    #[test]
    fn test_gen_refresh_infos() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let binder = ArgsBinder::from_op(
            &op(vec![
                LogicalAddr::outside(0),
                LogicalAddr::segment(SegmentKind::FeatureMapRefreshable, 0x40),
            ]),
            &l,
        )
        .unwrap();

        let mut infos = Vec::new();
        binder.gen_refresh_infos(&mut infos, 0x200, ArgsPlacement::Staging);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].offset, 0x200);
        assert_eq!(infos[1].offset, 0x200 + 16);
        assert!(infos.iter().all(|i| i.placement == ArgsPlacement::Staging));
    }

    #[test]
    fn test_references_segment() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let binder = ArgsBinder::from_op(
            &op(vec![LogicalAddr::segment(
                SegmentKind::FeatureMapRefreshable,
                0x40,
            )]),
            &l,
        )
        .unwrap();
        assert!(binder.references_segment(SegmentKind::FeatureMapRefreshable));
        assert!(!binder.references_segment(SegmentKind::Weight));
    }

    #[test]
    fn test_patch_overrun_rejected() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let binder = ArgsBinder::from_op(&op(vec![]), &l).unwrap();
        let io = {
            let mut io = IoAddrs::with_slots(1);
            io.set(0, DevicePtr::new(0x1)).unwrap();
            io
        };
        let mut host = vec![0u8; 16]; // too small for 3 slots
        let err = binder.write_all(&l, &io, &mut host, 16).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }

    #[test]
    fn test_unset_io_slot_rejected() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let binder = ArgsBinder::from_op(&op(vec![]), &l).unwrap();
        let io = IoAddrs::with_slots(1); // slot 0 never set
        let mut host = vec![0u8; 64];
        assert!(binder.write_all(&l, &io, &mut host, 64).is_err());
    }

    #[test]
    fn test_args_buffer_upload() {
        let dev = Arc::new(StubDevice::new());
        let mut args =
            ArgsBuffer::alloc(dev.clone(), 32, ArgsPlacement::Device).unwrap();
        args.host_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        args.upload(dev.as_ref()).unwrap();
        assert_eq!(dev.read(args.device_ptr(), 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_u32_field_overflow() {
        let dev = Arc::new(StubDevice::new());
        let l = layout(&dev);
        let mut o = op(vec![]);
        o.addr_format = AddrFormat {
            width: AddrWidth::U32,
            stride_bytes: 4,
            base_offset: 0,
        };
        let binder = ArgsBinder::from_op(&o, &l).unwrap();
        let mut io = IoAddrs::with_slots(1);
        io.set(0, DevicePtr::new(u64::from(u32::MAX) + 10)).unwrap();
        let mut host = vec![0u8; 64];
        let err = binder.write_all(&l, &io, &mut host, 64).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }
}
