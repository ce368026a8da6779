//! uve-emu library
//!
//! Streaming-register engine for a RISC-V vector streaming extension:
//! stream descriptors, their iteration, and the register files that hold them.

pub mod config;
pub mod memory;
pub mod scenario;
pub mod streaming;
