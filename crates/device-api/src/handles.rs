// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Typed native handles.
//!
//! The device runtime hands back opaque 64-bit handles for every resource
//! it creates. Wrapping each in its own newtype prevents a stream handle
//! from ever being passed where an event handle is expected — a class of
//! bug that raw integers make silent.

use std::fmt;

/// A physical device memory address.
///
/// `DevicePtr(0)` is the null pointer; a freshly declared memory segment
/// has a null base until it is bound to live device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DevicePtr(u64);

impl DevicePtr {
    /// The null device pointer.
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Wraps a raw device address.
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw address value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the null pointer.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns this pointer advanced by `bytes`.
    ///
    /// # Panics
    /// Panics on address overflow — a device address space never wraps,
    /// so overflow here is a caller arithmetic bug.
    pub fn offset(&self, bytes: u64) -> Self {
        Self(self.0.checked_add(bytes).expect("device address overflow"))
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

macro_rules! native_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw native handle value.
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw handle value.
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

native_handle! {
    /// A native hardware command-queue handle.
    RawStream
}

native_handle! {
    /// A native cross-stream synchronization event handle.
    RawEvent
}

native_handle! {
    /// A native device-resident control-flow label handle.
    RawLabel
}
