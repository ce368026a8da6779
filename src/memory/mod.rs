//! Memory the streaming unit loads from and stores to.
//!
//! The engine only sees the [`Memory`] trait: element-sized, little-endian
//! loads and stores that always succeed. [`HostMemory`] is a sparse
//! implementation for scenarios and tests, and [`Recorder`] wraps any memory
//! to log its accesses.

pub mod host;
pub mod trace;

pub use host::{HostMemory, MemoryRegion};
pub use trace::{Access, AccessKind, Recorder};

use crate::streaming::ElementWidth;

/// Byte-addressed memory as seen by a stream register.
pub trait Memory {
    /// Read `width` bytes at `address`, zero-extended.
    fn load(&mut self, width: ElementWidth, address: u64) -> u64;

    /// Write the low `width` bytes of `bits` at `address`.
    fn store(&mut self, width: ElementWidth, address: u64, bits: u64);
}

impl<M: Memory + ?Sized> Memory for &mut M {
    fn load(&mut self, width: ElementWidth, address: u64) -> u64 {
        (**self).load(width, address)
    }

    fn store(&mut self, width: ElementWidth, address: u64, bits: u64) {
        (**self).store(width, address, bits)
    }
}

impl<M: Memory + ?Sized> Memory for Box<M> {
    fn load(&mut self, width: ElementWidth, address: u64) -> u64 {
        (**self).load(width, address)
    }

    fn store(&mut self, width: ElementWidth, address: u64, bits: u64) {
        (**self).store(width, address, bits)
    }
}
