//! Streaming-register engine.
//!
//! This module provides:
//! - Dimensions and their iteration state
//! - Static, dynamic and scatter-gather descriptor modifiers
//! - Stream registers generic over the lane width
//! - Predicate registers
//! - The streaming unit that owns the register files
//!
//! # Architecture Overview
//!
//! ```text
//!                    StreamingUnit
//!   +------------------------------------------------+
//!   |  u0 .. u31   AnyStreamRegister (8/16/32/64-bit)|
//!   |     |                                          |
//!   |     +-- dims[0] (outermost) .. dims[n-1]       |
//!   |     +-- static / dynamic modifiers per dim     |
//!   |     +-- scatter-gather modifiers               |
//!   |     +-- element buffer (64 bytes)              |
//!   |                                                |
//!   |  p0 .. p15   PredicateRegister (p0 = all ones) |
//!   |  EOD table   [register][dimension] -> bool     |
//!   +------------------------------------------------+
//!          |  load / store            ^ indirect values
//!          v                          |
//!        Memory               other stream registers
//! ```
//!
//! An address is the base address plus, for each dimension,
//! `iter_offset + iter_stride * iter_index * element_width`.
//!
//! # Example
//!
//! ```
//! use uve_emu::memory::HostMemory;
//! use uve_emu::streaming::{ElementWidth, PredicateMode, RegisterKind, StreamingUnit};
//!
//! let mut memory = HostMemory::new();
//! memory.write_values(ElementWidth::W32, 0x1000, &[10, 20, 30, 40]);
//!
//! let mut unit = StreamingUnit::new();
//! unit.make_stream_register::<u32>(1, RegisterKind::Load, PredicateMode::Merging).unwrap();
//!
//! let reg = unit.any_register_mut(1).unwrap();
//! reg.start_configuration(0x1000);
//! reg.add_dimension(0, 4, 1).unwrap();
//! reg.configure_vector_coupled_dimension(None).unwrap();
//! unit.end_configuration(1, &mut memory).unwrap();
//!
//! let lanes = unit.get_elements::<u32, _>(1, true, &mut memory).unwrap();
//! assert_eq!(&lanes[..4], &[10, 20, 30, 40]);
//! assert!(unit.stream_finished(1).unwrap());
//! ```

pub mod dimension;
pub mod element;
pub mod error;
pub mod modifier;
pub mod predicate;
pub mod register;
pub mod unit;

pub use dimension::Dimension;
pub use element::{Element, ElementWidth, LaneType, LaneValue};
pub use error::StreamError;
pub use modifier::{
    DynamicBehaviour, DynamicModifier, IndirectSource, IndirectValue, ScatterGatherModifier,
    StaticBehaviour, StaticModifier, Target,
};
pub use predicate::{PredicateMode, PredicateRegister};
pub use register::{RegisterKind, RegisterMode, RegisterStatus, StreamContext, StreamRegister};
pub use unit::{AnyStreamRegister, EodTable, StreamingUnit};

/// Stream register size in bytes.
pub const REGISTER_LENGTH: usize = 64;

/// Stream registers in the unit.
pub const REGISTER_COUNT: usize = 32;

/// Predicate registers in the unit.
pub const PREDICATE_COUNT: usize = 16;

/// Dimensions one descriptor can hold.
pub const MAX_DIMENSIONS: usize = 8;

/// Modifiers one descriptor can hold, across all kinds.
pub const MAX_MODIFIERS: usize = MAX_DIMENSIONS - 1;
