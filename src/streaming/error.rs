//! Errors raised by the streaming unit.
//!
//! Every variant is a usage error by the collaborator driving the unit
//! (instruction semantics, a scenario, a test). Stream exhaustion is not an
//! error; it is reported through [`RegisterStatus::Finished`].
//!
//! [`RegisterStatus::Finished`]: super::RegisterStatus::Finished

use thiserror::Error;

use super::element::{ElementWidth, LaneType};
use super::register::RegisterKind;

/// Streaming unit usage error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Stream register index beyond the register file.
    #[error("stream register u{index} does not exist (register file has {count} registers)")]
    RegisterOutOfRange {
        /// Requested index.
        index: usize,
        /// Register file size.
        count: usize,
    },

    /// Predicate register index beyond the predicate file.
    #[error("predicate register p{index} does not exist (predicate file has {count} registers)")]
    PredicateOutOfRange {
        /// Requested index.
        index: usize,
        /// Predicate file size.
        count: usize,
    },

    /// Attempt to rewrite p0.
    #[error("predicate register p0 is hard-wired to all ones")]
    HardwiredPredicate,

    /// Predicate mask of the wrong length.
    #[error("predicate mask has {actual} lanes, expected {expected}")]
    PredicateLength {
        /// Required mask length.
        expected: usize,
        /// Supplied mask length.
        actual: usize,
    },

    /// Predicate mask byte outside {0, 1}.
    #[error("predicate lane {lane} holds {value}, must be 0 or 1")]
    PredicateValue {
        /// Offending lane.
        lane: usize,
        /// Offending value.
        value: u8,
    },

    /// Dimension count would exceed the descriptor capacity.
    #[error("u{register}: cannot append more than {max} dimensions")]
    TooManyDimensions {
        /// Register being configured.
        register: usize,
        /// Dimension capacity.
        max: usize,
    },

    /// Modifier count would exceed the descriptor capacity.
    #[error("u{register}: cannot append more than {max} modifiers")]
    TooManyModifiers {
        /// Register being configured.
        register: usize,
        /// Modifier capacity.
        max: usize,
    },

    /// Static or dynamic modifier appended before any dimension.
    #[error("u{register}: modifier needs a dimension to attach to")]
    NoDimension {
        /// Register being configured.
        register: usize,
    },

    /// A dimension index that the register does not have.
    #[error("u{register}: dimension {dimension} does not exist ({count} configured)")]
    DimensionOutOfRange {
        /// Register queried or configured.
        register: usize,
        /// Requested dimension.
        dimension: usize,
        /// Configured dimensions.
        count: usize,
    },

    /// Modifier pointing at a dimension that does not exist.
    #[error("modifier targets dimension {dimension}, only {count} configured")]
    TargetOutOfRange {
        /// Targeted dimension.
        dimension: usize,
        /// Configured dimensions.
        count: usize,
    },

    /// Descriptor change after `end_configuration`.
    #[error("u{register}: configuration already ended, call start_configuration first")]
    ConfigurationClosed {
        /// Register being configured.
        register: usize,
    },

    /// Load/store semantics on a register of the wrong kind.
    #[error("u{register}: cannot {operation} a {kind:?} register")]
    WrongKind {
        /// Register used.
        register: usize,
        /// Attempted operation.
        operation: &'static str,
        /// Configured kind.
        kind: RegisterKind,
    },

    /// Load or store with update on an exhausted stream.
    #[error("u{register}: stream has already finished")]
    StreamFinished {
        /// Register used.
        register: usize,
    },

    /// Valid-element count larger than the register capacity.
    #[error("u{register}: valid element count {count} exceeds vector length {vlen}")]
    ValidIndexOutOfRange {
        /// Register used.
        register: usize,
        /// Requested count.
        count: usize,
        /// Register capacity.
        vlen: usize,
    },

    /// More elements supplied than the register holds.
    #[error("u{register}: {count} elements supplied, register holds {vlen}")]
    TooManyElements {
        /// Register used.
        register: usize,
        /// Supplied element count.
        count: usize,
        /// Register capacity.
        vlen: usize,
    },

    /// Typed access with the wrong lane width.
    #[error("u{register}: holds {actual} lanes, accessed as {expected}")]
    WidthMismatch {
        /// Register used.
        register: usize,
        /// Width requested by the caller.
        expected: ElementWidth,
        /// Width the register was built with.
        actual: ElementWidth,
    },

    /// Modifier source that is not a load-type stream.
    #[error("u{register}: {kind:?} register cannot supply indirect values")]
    NotIndirectSource {
        /// Source register.
        register: usize,
        /// Its configured kind.
        kind: RegisterKind,
    },

    /// Modifier source that is already mid-operation higher up the call chain.
    #[error("u{register}: indirect fetch cycles back into a register being updated")]
    IndirectCycle {
        /// Source register.
        register: usize,
    },

    /// Lane interpretation that does not exist for a width.
    #[error("{lane:?} lanes are not defined for {width} elements")]
    UnsupportedLane {
        /// Requested interpretation.
        lane: LaneType,
        /// Lane width.
        width: ElementWidth,
    },
}
