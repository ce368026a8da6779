//! Sparse simulated memory.
//!
//! # Usage
//!
//! ```
//! use uve_emu::memory::{HostMemory, Memory};
//! use uve_emu::streaming::ElementWidth;
//!
//! let mut mem = HostMemory::new();
//! mem.allocate_region("a", 0x1000, 64);
//! mem.write_values(ElementWidth::W32, 0x1000, &[1, 2, 3, 4]);
//!
//! assert_eq!(mem.load(ElementWidth::W32, 0x1008), 3);
//! assert_eq!(mem.read_values(ElementWidth::W32, 0x1000, 2), vec![1, 2]);
//! ```

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use super::Memory;
use crate::streaming::ElementWidth;

/// A named address range, used for dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Human-readable name (e.g. "a", "indices")
    pub name: String,
    /// First byte of the region
    pub base_address: u64,
    /// Size in bytes
    pub size: usize,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, base_address: u64, size: usize) -> Self {
        Self {
            name: name.into(),
            base_address,
            size,
        }
    }

    /// Check if an address falls within this region.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_address && addr < self.base_address.saturating_add(self.size as u64)
    }
}

/// Simulated memory.
///
/// Uses sparse storage (BTreeMap) so any 64-bit address can be touched
/// without allocating the whole range. Memory is allocated in 4KB pages and
/// unallocated bytes read as zero.
pub struct HostMemory {
    /// Sparse storage: page_address -> page_data
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,

    /// Named regions for dumps
    regions: Vec<MemoryRegion>,

    /// Statistics
    total_bytes_written: u64,
    total_bytes_read: u64,
}

impl HostMemory {
    /// Page size for sparse storage (4KB)
    pub const PAGE_SIZE: usize = 4096;

    /// Page address mask (lower 12 bits are offset)
    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    /// Create a new empty memory.
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            regions: Vec::new(),
            total_bytes_written: 0,
            total_bytes_read: 0,
        }
    }

    /// Register a named region. Pages are still allocated on demand.
    ///
    /// Regions may overlap; a dump lists each of them.
    pub fn allocate_region(&mut self, name: impl Into<String>, base_address: u64, size: usize) {
        self.regions.push(MemoryRegion::new(name, base_address, size));
    }

    /// Get a region by name.
    pub fn region(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Find the first region containing an address.
    pub fn region_at(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn get_or_create_page(&mut self, addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages
            .entry(page_addr)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }

    fn get_page(&self, addr: u64) -> Option<&[u8; Self::PAGE_SIZE]> {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages.get(&page_addr).map(|b| b.as_ref())
    }

    /// Write a byte slice to memory.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let mut current_addr = addr;
        let mut remaining = data;

        while !remaining.is_empty() {
            let page = self.get_or_create_page(current_addr);
            let offset = (current_addr & (Self::PAGE_SIZE as u64 - 1)) as usize;
            let to_write = remaining.len().min(Self::PAGE_SIZE - offset);

            page[offset..offset + to_write].copy_from_slice(&remaining[..to_write]);

            current_addr = current_addr.wrapping_add(to_write as u64);
            remaining = &remaining[to_write..];
        }

        self.total_bytes_written += data.len() as u64;
    }

    /// Read bytes from memory into a buffer.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) {
        let mut current_addr = addr;
        let mut offset_in_buf = 0;

        while offset_in_buf < buf.len() {
            let page_offset = (current_addr & (Self::PAGE_SIZE as u64 - 1)) as usize;
            let to_read = (buf.len() - offset_in_buf).min(Self::PAGE_SIZE - page_offset);
            let dest = &mut buf[offset_in_buf..offset_in_buf + to_read];

            match self.get_page(current_addr) {
                Some(page) => dest.copy_from_slice(&page[page_offset..page_offset + to_read]),
                // Unallocated pages read as zero
                None => dest.fill(0),
            }

            current_addr = current_addr.wrapping_add(to_read as u64);
            offset_in_buf += to_read;
        }
    }

    /// Write consecutive elements of `width`, each truncated to the width.
    pub fn write_values(&mut self, width: ElementWidth, addr: u64, values: &[u64]) {
        let n = width.bytes();
        let mut bytes = vec![0u8; values.len() * n];
        for (chunk, &value) in bytes.chunks_exact_mut(n).zip(values) {
            LittleEndian::write_uint(chunk, value & width.mask(), n);
        }
        self.write_bytes(addr, &bytes);
    }

    /// Read `count` consecutive elements of `width`, zero-extended.
    pub fn read_values(&self, width: ElementWidth, addr: u64, count: usize) -> Vec<u64> {
        let n = width.bytes();
        let mut bytes = vec![0u8; count * n];
        self.read_bytes(addr, &mut bytes);
        bytes.chunks_exact(n).map(|chunk| LittleEndian::read_uint(chunk, n)).collect()
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.pages.len() * Self::PAGE_SIZE
    }

    /// Hexdump a memory range for debugging.
    pub fn hexdump(&self, addr: u64, len: usize) -> String {
        let mut result = String::new();
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf);

        for (i, chunk) in buf.chunks(16).enumerate() {
            let line_addr = addr.wrapping_add((i * 16) as u64);
            result.push_str(&format!("{:016x}: ", line_addr));

            for (j, byte) in chunk.iter().enumerate() {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str(&format!("{:02x} ", byte));
            }

            // Padding for short lines
            for j in chunk.len()..16 {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str("   ");
            }

            result.push_str(" |");
            for &byte in chunk {
                result.push(if (0x20..0x7f).contains(&byte) { byte as char } else { '.' });
            }
            result.push_str("|\n");
        }

        result
    }
}

impl Memory for HostMemory {
    fn load(&mut self, width: ElementWidth, address: u64) -> u64 {
        let n = width.bytes();
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf[..n]);
        self.total_bytes_read += n as u64;
        LittleEndian::read_uint(&buf[..n], n)
    }

    fn store(&mut self, width: ElementWidth, address: u64, bits: u64) {
        let n = width.bytes();
        let mut buf = [0u8; 8];
        LittleEndian::write_uint(&mut buf[..n], bits & width.mask(), n);
        self.write_bytes(address, &buf[..n]);
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory")
            .field("allocated_pages", &self.pages.len())
            .field("allocated_bytes", &self.allocated_bytes())
            .field("regions", &self.regions.len())
            .field("total_bytes_written", &self.total_bytes_written)
            .field("total_bytes_read", &self.total_bytes_read)
            .finish()
    }
}
