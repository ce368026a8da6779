//! Stream registers.
//!
//! A stream register walks a multi-dimensional strided descriptor and moves
//! elements between memory and its element buffer. Dimension 0 is the first
//! one added and the outermost; the last one added is the innermost and varies
//! fastest. Iteration works like an odometer: the innermost dimension
//! advances, and when a dimension runs past its size it carries into the next
//! outer one.
//!
//! # Lifecycle
//!
//! ```text
//! NotConfigured --end_configuration--> Running --outermost exhausted--> Finished
//! ```
//!
//! A finished register reports [`RegisterKind::NoStream`] and rejects further
//! loads and stores with update.
//!
//! # Bursts
//!
//! One load or store call is a burst. A burst transfers elements until the
//! buffer is full (or, for stores, every valid element is written), the
//! stream finishes, or the vector-coupled dimension and every dimension inside
//! it are exhausted. After each burst the end-of-dimension flags are published
//! and the iteration is advanced once more so the next burst starts at the
//! right position.

use smallvec::SmallVec;

use super::dimension::Dimension;
use super::element::{Element, ElementWidth};
use super::error::StreamError;
use super::modifier::{DynamicModifier, IndirectSource, IndirectValue, ScatterGatherModifier, StaticModifier};
use super::predicate::PredicateMode;
use super::{MAX_DIMENSIONS, MAX_MODIFIERS, REGISTER_LENGTH};

/// What a register is configured to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterKind {
    /// Plain vector register, or a finished stream.
    #[default]
    NoStream,
    /// Loads user-visible data.
    Load,
    /// Loads values that drive another register's modifiers.
    IndirectSource,
    /// Stores elements supplied by the caller.
    Store,
}

/// Configuration/iteration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterStatus {
    #[default]
    NotConfigured,
    Running,
    Finished,
}

/// How many elements one burst moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterMode {
    /// One element per burst.
    #[default]
    Scalar,
    /// Up to a full register per burst.
    Vector,
}

/// Everything a stream register needs from outside itself during a burst.
///
/// The streaming unit implements this over its memory interface, its other
/// registers (as indirect sources) and its end-of-dimension table.
pub trait StreamContext: IndirectSource {
    /// Read one element of `width` at `address`, zero-extended.
    fn load(&mut self, width: ElementWidth, address: u64) -> u64;

    /// Write the low `width` bytes of `bits` at `address`.
    fn store(&mut self, width: ElementWidth, address: u64, bits: u64);

    /// Snapshot the end-of-dimension flags of `register`.
    fn publish_end_of_dimension(&mut self, register: usize, dimensions: &[Dimension]);
}

/// A stream register with lanes of type `E`.
#[derive(Debug, Clone)]
pub struct StreamRegister<E: Element> {
    index: usize,
    kind: RegisterKind,
    status: RegisterStatus,
    mode: RegisterMode,
    predicate_mode: PredicateMode,
    base_address: u64,

    elements: Vec<E>,
    valid_elements: usize,
    /// Elements moved by the most recent burst.
    transferred: usize,

    dimensions: SmallVec<[Dimension; MAX_DIMENSIONS]>,
    /// Static modifiers keyed by the dimension whose carry fires them.
    static_modifiers: Vec<(usize, StaticModifier)>,
    /// Dynamic modifiers keyed by the dimension whose carry fires them.
    dynamic_modifiers: Vec<(usize, DynamicModifier)>,
    scatter_gather: Vec<ScatterGatherModifier>,
    /// `None` couples the innermost dimension.
    vector_dimension: Option<usize>,
}

impl<E: Element> StreamRegister<E> {
    /// Create an unconfigured register for slot `index`.
    pub fn new(index: usize, kind: RegisterKind, predicate_mode: PredicateMode) -> Self {
        Self {
            index,
            kind,
            status: RegisterStatus::NotConfigured,
            mode: RegisterMode::Scalar,
            predicate_mode,
            base_address: 0,
            elements: vec![E::default(); Self::VLEN],
            valid_elements: 0,
            transferred: 0,
            dimensions: SmallVec::new(),
            static_modifiers: Vec::new(),
            dynamic_modifiers: Vec::new(),
            scatter_gather: Vec::new(),
            vector_dimension: None,
        }
    }

    /// Lanes per register.
    pub const VLEN: usize = REGISTER_LENGTH / E::WIDTH.bytes();

    // --- Configuration ---

    /// Begin a new descriptor at `base_address`, dropping the old one.
    pub fn start_configuration(&mut self, base_address: u64) {
        self.status = RegisterStatus::NotConfigured;
        self.mode = RegisterMode::Scalar;
        self.base_address = base_address;
        self.dimensions.clear();
        self.static_modifiers.clear();
        self.dynamic_modifiers.clear();
        self.scatter_gather.clear();
        self.vector_dimension = None;
    }

    /// Append a dimension inside the existing ones.
    ///
    /// `offset` and `stride` are in elements.
    pub fn add_dimension(&mut self, offset: i64, size: u64, stride: i64) -> Result<(), StreamError> {
        self.ensure_configurable()?;
        if self.dimensions.len() >= MAX_DIMENSIONS {
            return Err(StreamError::TooManyDimensions {
                register: self.index,
                max: MAX_DIMENSIONS,
            });
        }
        let offset = offset.wrapping_mul(E::WIDTH.bytes() as i64);
        self.dimensions.push(Dimension::new(offset, size, stride));
        Ok(())
    }

    /// Attach a static modifier to the most recently added dimension.
    pub fn add_static_modifier(&mut self, modifier: StaticModifier) -> Result<(), StreamError> {
        let at = self.modifier_slot()?;
        self.static_modifiers.push((at, modifier));
        Ok(())
    }

    /// Attach a dynamic modifier to the most recently added dimension.
    pub fn add_dynamic_modifier(&mut self, modifier: DynamicModifier) -> Result<(), StreamError> {
        let at = self.modifier_slot()?;
        self.dynamic_modifiers.push((at, modifier));
        Ok(())
    }

    /// Attach a scatter-gather modifier; it fires on its own target dimension.
    pub fn add_scatter_gather_modifier(&mut self, modifier: ScatterGatherModifier) -> Result<(), StreamError> {
        self.ensure_configurable()?;
        self.ensure_modifier_capacity()?;
        self.scatter_gather.push(modifier);
        Ok(())
    }

    /// Switch to vector mode and pick the dimension that bounds a burst.
    ///
    /// `None` selects the innermost dimension. The index is checked when the
    /// configuration ends.
    pub fn configure_vector_coupled_dimension(&mut self, dimension: Option<usize>) -> Result<(), StreamError> {
        self.ensure_configurable()?;
        self.mode = RegisterMode::Vector;
        if self.kind != RegisterKind::Load {
            self.valid_elements = Self::VLEN;
        }
        self.vector_dimension = dimension;
        Ok(())
    }

    /// Close the descriptor and prime the dynamic modifiers.
    ///
    /// Every dynamic modifier fires once, outermost attachment first, so the
    /// first pass already sees its indirect values.
    pub fn end_configuration<C>(&mut self, ctx: &mut C) -> Result<(), StreamError>
    where
        C: StreamContext + ?Sized,
    {
        self.ensure_configurable()?;
        self.validate_targets()?;

        self.status = RegisterStatus::Running;
        let width = E::WIDTH.bytes();
        for i in 0..self.dimensions.len() {
            for (_, modifier) in self.dynamic_modifiers.iter_mut().filter(|(at, _)| *at == i) {
                modifier.apply(&mut self.dimensions, width, ctx)?;
            }
        }
        ctx.publish_end_of_dimension(self.index, &self.dimensions);

        log::debug!(
            "u{}: configured {:?} {} stream base={:#x} dims={} static={} dynamic={} sg={} mode={:?}",
            self.index,
            self.kind,
            E::WIDTH,
            self.base_address,
            self.dimensions.len(),
            self.static_modifiers.len(),
            self.dynamic_modifiers.len(),
            self.scatter_gather.len(),
            self.mode
        );
        Ok(())
    }

    fn ensure_configurable(&self) -> Result<(), StreamError> {
        if self.status != RegisterStatus::NotConfigured {
            return Err(StreamError::ConfigurationClosed { register: self.index });
        }
        Ok(())
    }

    fn ensure_modifier_capacity(&self) -> Result<(), StreamError> {
        if self.modifier_count() >= MAX_MODIFIERS {
            return Err(StreamError::TooManyModifiers {
                register: self.index,
                max: MAX_MODIFIERS,
            });
        }
        Ok(())
    }

    /// Dimension a carry-driven modifier attaches to.
    fn modifier_slot(&self) -> Result<usize, StreamError> {
        self.ensure_configurable()?;
        self.ensure_modifier_capacity()?;
        self.dimensions
            .len()
            .checked_sub(1)
            .ok_or(StreamError::NoDimension { register: self.index })
    }

    fn validate_targets(&self) -> Result<(), StreamError> {
        let count = self.dimensions.len();
        let targets = self
            .static_modifiers
            .iter()
            .map(|(_, m)| m.target_dim())
            .chain(self.dynamic_modifiers.iter().map(|(_, m)| m.target_dim()))
            .chain(self.scatter_gather.iter().map(|m| m.target_dim()));
        for dimension in targets {
            if dimension >= count {
                return Err(StreamError::TargetOutOfRange { dimension, count });
            }
        }
        if let Some(dimension) = self.vector_dimension.filter(|&d| d >= count) {
            return Err(StreamError::DimensionOutOfRange {
                register: self.index,
                dimension,
                count,
            });
        }
        Ok(())
    }

    // --- Data ---

    /// Current buffer contents, running a load burst first if requested.
    ///
    /// Only `Load` registers burst here; an update request on a `Store`
    /// register is an error, on any other kind it is ignored.
    pub fn get_elements<C>(&mut self, causes_update: bool, ctx: &mut C) -> Result<&[E], StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if causes_update {
            self.ensure_not_finished()?;
            match self.kind {
                RegisterKind::Load => self.update_as_load(ctx)?,
                RegisterKind::Store => {
                    return Err(StreamError::WrongKind {
                        register: self.index,
                        operation: "load from",
                        kind: self.kind,
                    })
                }
                RegisterKind::NoStream | RegisterKind::IndirectSource => {}
            }
        }
        Ok(self.elements.as_slice())
    }

    /// Overwrite the buffer, then run a store burst if requested.
    ///
    /// Lanes past `values.len()` are zeroed.
    pub fn set_elements<C>(&mut self, values: &[E], causes_update: bool, ctx: &mut C) -> Result<(), StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if values.len() > Self::VLEN {
            return Err(StreamError::TooManyElements {
                register: self.index,
                count: values.len(),
                vlen: Self::VLEN,
            });
        }
        if causes_update {
            self.ensure_not_finished()?;
            if matches!(self.kind, RegisterKind::Load | RegisterKind::IndirectSource) {
                return Err(StreamError::WrongKind {
                    register: self.index,
                    operation: "store to",
                    kind: self.kind,
                });
            }
        }

        let (head, tail) = self.elements.split_at_mut(values.len());
        head.copy_from_slice(values);
        tail.fill(E::default());

        if causes_update && self.kind == RegisterKind::Store {
            self.update_as_store(ctx)?;
        }
        Ok(())
    }

    /// Run one load burst and return the first lane as an indirect value.
    ///
    /// Returns `None` when the burst loaded nothing.
    pub fn read_indirect_value<C>(&mut self, ctx: &mut C) -> Result<Option<IndirectValue>, StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if !matches!(self.kind, RegisterKind::IndirectSource | RegisterKind::Load) {
            return Err(StreamError::NotIndirectSource {
                register: self.index,
                kind: self.kind,
            });
        }
        self.update_as_load(ctx)?;
        if self.valid_elements == 0 {
            return Ok(None);
        }
        Ok(Some(IndirectValue {
            value: self.elements[0].to_signed(),
            exhausted: self.has_stream_finished(),
        }))
    }

    fn ensure_not_finished(&self) -> Result<(), StreamError> {
        if self.has_stream_finished() {
            return Err(StreamError::StreamFinished { register: self.index });
        }
        Ok(())
    }

    /// Switch scalar/vector. Non-load registers also reset their valid count.
    pub fn set_mode(&mut self, mode: RegisterMode) {
        self.mode = mode;
        if self.kind != RegisterKind::Load {
            self.valid_elements = match mode {
                RegisterMode::Scalar => 1,
                RegisterMode::Vector => Self::VLEN,
            };
        }
    }

    pub fn set_valid_index(&mut self, count: usize) -> Result<(), StreamError> {
        if count > Self::VLEN {
            return Err(StreamError::ValidIndexOutOfRange {
                register: self.index,
                count,
                vlen: Self::VLEN,
            });
        }
        self.valid_elements = count;
        Ok(())
    }

    pub fn set_predicate_mode(&mut self, mode: PredicateMode) {
        self.predicate_mode = mode;
    }

    // --- Queries ---

    pub fn has_stream_finished(&self) -> bool {
        self.status == RegisterStatus::Finished
    }

    pub fn is_end_of_dimension(&self, dimension: usize) -> Result<bool, StreamError> {
        self.dimensions
            .get(dimension)
            .map(Dimension::is_end_of_dimension)
            .ok_or(StreamError::DimensionOutOfRange {
                register: self.index,
                dimension,
                count: self.dimensions.len(),
            })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn status(&self) -> RegisterStatus {
        self.status
    }

    pub fn mode(&self) -> RegisterMode {
        self.mode
    }

    pub fn predicate_mode(&self) -> PredicateMode {
        self.predicate_mode
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn valid_elements(&self) -> usize {
        self.valid_elements
    }

    /// Elements the most recent load or store burst actually moved.
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    pub fn element_width(&self) -> ElementWidth {
        E::WIDTH
    }

    pub fn vlen(&self) -> usize {
        Self::VLEN
    }

    /// Register size in bytes.
    pub fn register_length(&self) -> usize {
        REGISTER_LENGTH
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Buffer contents without running a burst.
    pub fn elements(&self) -> &[E] {
        &self.elements
    }

    /// Total modifiers of every kind.
    pub fn modifier_count(&self) -> usize {
        self.static_modifiers.len() + self.dynamic_modifiers.len() + self.scatter_gather.len()
    }

    // --- Iteration ---

    /// No dimensions left to walk: the outermost one is exhausted.
    fn is_stream_done(&self) -> bool {
        self.dimensions.first().map_or(true, Dimension::is_end_of_dimension)
    }

    fn coupled_dimension(&self) -> usize {
        self.vector_dimension
            .unwrap_or_else(|| self.dimensions.len().saturating_sub(1))
    }

    fn finish_stream<C>(&mut self, ctx: &mut C)
    where
        C: StreamContext + ?Sized,
    {
        if self.status != RegisterStatus::Finished {
            log::debug!("u{}: stream finished", self.index);
        }
        self.status = RegisterStatus::Finished;
        self.kind = RegisterKind::NoStream;
        for dim in self.dimensions.iter_mut() {
            dim.set_end_of_dimension(true);
        }
        ctx.publish_end_of_dimension(self.index, &self.dimensions);
    }

    /// Sum the dimension contributions onto the base address.
    ///
    /// A dimension at its last position whose inner dimensions are all done
    /// is flagged here, before the advance that would otherwise flag it.
    fn generate_address(&mut self) -> u64 {
        let width = E::WIDTH.bytes();
        let mut address = self.base_address as i64;
        for i in (0..self.dimensions.len()).rev() {
            let inner_done = self.dimensions[i + 1..].iter().all(Dimension::is_end_of_dimension);
            let dim = &mut self.dimensions[i];
            if dim.is_last_iteration() && inner_done {
                dim.set_end_of_dimension(true);
            }
            address = address.wrapping_add(dim.calc_address(width));
        }
        address as u64
    }

    /// Address of the current position, or `None` if the burst must stop.
    ///
    /// Pending scatter-gather modifiers fire here, innermost first. A burst
    /// stops once the vector-coupled dimension and every dimension inside it
    /// are done; the next [`update_iteration`](Self::update_iteration) carries
    /// past that boundary.
    fn try_generate_address<C>(&mut self, ctx: &mut C) -> Result<Option<u64>, StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if self.is_stream_done() {
            self.finish_stream(ctx);
            return Ok(None);
        }

        let width = E::WIDTH.bytes();
        let coupled = self.coupled_dimension();
        let mut can_generate = true;

        for i in (0..self.dimensions.len()).rev() {
            for modifier in self.scatter_gather.iter_mut().filter(|m| m.target_dim() == i && !m.is_applied()) {
                modifier.apply(&mut self.dimensions[i], width, ctx)?;
            }
            if self.dimensions[i].is_empty() {
                for dim in self.dimensions[i..].iter_mut() {
                    dim.set_end_of_dimension(true);
                }
                can_generate = false;
            }
            if i == coupled && self.dimensions[i..].iter().all(Dimension::is_end_of_dimension) {
                can_generate = false;
                break;
            }
        }

        let address = self.generate_address();
        Ok(can_generate.then_some(address))
    }

    /// Advance one position, carrying outward through exhausted dimensions.
    ///
    /// On each carry out of dimension `i`: targets of static modifiers
    /// attached to `i` get their live values back (their position is kept),
    /// `i` restarts, and `i - 1` advances. If that
    /// advance moved, the static and dynamic modifiers attached to `i - 1`
    /// fire.
    fn update_iteration<C>(&mut self, ctx: &mut C) -> Result<(), StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if self.is_stream_done() {
            self.finish_stream(ctx);
            return Ok(());
        }

        let width = E::WIDTH.bytes();
        let last = self.dimensions.len() - 1;
        let mut moved = self.dimensions[last].advance();

        for i in (1..=last).rev() {
            if !self.dimensions[i].is_end_of_dimension() {
                continue;
            }
            log::trace!("u{}: carry out of dim {}", self.index, i);

            if moved {
                for (_, modifier) in self.static_modifiers.iter().filter(|(at, _)| *at == i) {
                    if let Some(target) = self.dimensions.get_mut(modifier.target_dim()) {
                        target.restore_live_values();
                    }
                }
            }

            self.dimensions[i].set_end_of_dimension(false);
            moved = self.dimensions[i - 1].advance();

            if moved {
                for (_, modifier) in self.static_modifiers.iter().filter(|(at, _)| *at == i - 1) {
                    modifier.apply(&mut self.dimensions, width)?;
                }
                for (_, modifier) in self.dynamic_modifiers.iter_mut().filter(|(at, _)| *at == i - 1) {
                    if self.dimensions[i - 1].is_last_iteration() {
                        self.dimensions[i - 1].restore_live_values();
                    }
                    modifier.apply(&mut self.dimensions, width, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn clear_scatter_gather(&mut self) {
        for modifier in self.scatter_gather.iter_mut() {
            modifier.set_applied(false);
        }
    }

    /// Fill the buffer from memory: one element in scalar mode, up to a full
    /// register in vector mode.
    fn update_as_load<C>(&mut self, ctx: &mut C) -> Result<(), StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if !matches!(self.kind, RegisterKind::Load | RegisterKind::IndirectSource) {
            return Err(StreamError::WrongKind {
                register: self.index,
                operation: "load from",
                kind: self.kind,
            });
        }
        self.transferred = 0;
        if self.is_stream_done() {
            self.valid_elements = 0;
            self.finish_stream(ctx);
            return Ok(());
        }

        self.valid_elements = 0;
        let max = match self.mode {
            RegisterMode::Scalar => 1,
            RegisterMode::Vector => Self::VLEN,
        };

        let mut count = 0;
        while count < max {
            let Some(address) = self.try_generate_address(ctx)? else {
                break;
            };
            let bits = ctx.load(E::WIDTH, address);
            log::trace!("u{}: load [{}] @ {:#x} = {:#x}", self.index, count, address, bits);
            self.elements[count] = E::from_bits(bits);
            self.valid_elements += 1;
            self.transferred += 1;
            self.clear_scatter_gather();
            count += 1;

            if self.try_generate_address(ctx)?.is_some() && count < max {
                self.update_iteration(ctx)?;
            } else {
                break;
            }
        }

        ctx.publish_end_of_dimension(self.index, &self.dimensions);
        self.update_iteration(ctx)?;

        log::debug!(
            "u{}: load burst valid={} status={:?}",
            self.index,
            self.valid_elements,
            self.status
        );
        Ok(())
    }

    /// Drain the first `valid_elements` lanes to memory.
    fn update_as_store<C>(&mut self, ctx: &mut C) -> Result<(), StreamError>
    where
        C: StreamContext + ?Sized,
    {
        if self.kind != RegisterKind::Store {
            return Err(StreamError::WrongKind {
                register: self.index,
                operation: "store to",
                kind: self.kind,
            });
        }
        self.transferred = 0;
        if self.is_stream_done() {
            self.finish_stream(ctx);
            return Ok(());
        }

        let mut count = 0;
        while count < self.valid_elements {
            let Some(address) = self.try_generate_address(ctx)? else {
                break;
            };
            let bits = self.elements[count].to_bits();
            log::trace!("u{}: store [{}] @ {:#x} = {:#x}", self.index, count, address, bits);
            ctx.store(E::WIDTH, address, bits);
            self.clear_scatter_gather();
            count += 1;
            self.transferred = count;

            if self.try_generate_address(ctx)?.is_some() && count < self.valid_elements {
                self.update_iteration(ctx)?;
            } else {
                break;
            }
        }

        ctx.publish_end_of_dimension(self.index, &self.dimensions);
        self.update_iteration(ctx)?;

        log::debug!("u{}: store burst wrote={} status={:?}", self.index, count, self.status);
        Ok(())
    }
}
