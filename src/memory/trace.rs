//! Access recording.

use std::fmt;

use super::Memory;
use crate::streaming::ElementWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Load,
    Store,
}

/// One element-sized memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub kind: AccessKind,
    pub width: ElementWidth,
    pub address: u64,
    /// Value loaded or stored, zero-extended.
    pub bits: u64,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.kind {
            AccessKind::Load => "LD",
            AccessKind::Store => "ST",
        };
        write!(f, "{} {:>6} {:#018x} = {:#x}", op, self.width.to_string(), self.address, self.bits)
    }
}

/// Memory wrapper that records every access in order.
#[derive(Debug, Default)]
pub struct Recorder<M> {
    inner: M,
    accesses: Vec<Access>,
}

impl<M: Memory> Recorder<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            accesses: Vec::new(),
        }
    }

    pub fn accesses(&self) -> &[Access] {
        &self.accesses
    }

    /// Addresses touched, in order.
    pub fn addresses(&self) -> Vec<u64> {
        self.accesses.iter().map(|a| a.address).collect()
    }

    pub fn clear(&mut self) {
        self.accesses.clear();
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Memory> Memory for Recorder<M> {
    fn load(&mut self, width: ElementWidth, address: u64) -> u64 {
        let bits = self.inner.load(width, address);
        log::trace!("LD {} @ {:#x} = {:#x}", width, address, bits);
        self.accesses.push(Access {
            kind: AccessKind::Load,
            width,
            address,
            bits,
        });
        bits
    }

    fn store(&mut self, width: ElementWidth, address: u64, bits: u64) {
        let bits = bits & width.mask();
        log::trace!("ST {} @ {:#x} = {:#x}", width, address, bits);
        self.inner.store(width, address, bits);
        self.accesses.push(Access {
            kind: AccessKind::Store,
            width,
            address,
            bits,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostMemory;

    #[test]
    fn test_records_in_order() {
        let mut mem = Recorder::new(HostMemory::new());
        mem.store(ElementWidth::W16, 0x10, 0x12345);
        let value = mem.load(ElementWidth::W16, 0x10);

        assert_eq!(value, 0x2345);
        assert_eq!(
            mem.accesses(),
            &[
                Access { kind: AccessKind::Store, width: ElementWidth::W16, address: 0x10, bits: 0x2345 },
                Access { kind: AccessKind::Load, width: ElementWidth::W16, address: 0x10, bits: 0x2345 },
            ]
        );
        assert_eq!(mem.addresses(), vec![0x10, 0x10]);

        mem.clear();
        assert!(mem.accesses().is_empty());
        assert_eq!(mem.into_inner().read_values(ElementWidth::W16, 0x10, 1), vec![0x2345]);
    }

    #[test]
    fn test_display() {
        let access = Access { kind: AccessKind::Load, width: ElementWidth::W32, address: 0x1000, bits: 7 };
        let line = access.to_string();
        assert!(line.starts_with("LD"));
        assert!(line.contains("0x0000000000001000"));
        assert!(line.ends_with("= 0x7"));
    }
}
