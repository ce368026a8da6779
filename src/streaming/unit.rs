//! The streaming unit: register file, predicate file and end-of-dimension
//! table.
//!
//! Registers reach each other only through the unit. While one register runs
//! a burst it is lifted out of its slot, and the rest of the file is exposed
//! to it through a `Bus` that implements [`StreamContext`]. A dynamic or
//! scatter-gather modifier that needs an indirect value asks the bus, which
//! lifts the source register out in turn and runs one load burst on it. A
//! register that is already lifted cannot be reached again, so an indirect
//! fetch that loops back is reported as [`StreamError::IndirectCycle`].

use std::mem;

use super::dimension::Dimension;
use super::element::{Element, ElementWidth};
use super::error::StreamError;
use super::modifier::{DynamicModifier, IndirectSource, IndirectValue, ScatterGatherModifier, StaticModifier};
use super::predicate::{PredicateMode, PredicateRegister};
use super::register::{RegisterKind, RegisterMode, RegisterStatus, StreamContext, StreamRegister};
use super::{MAX_DIMENSIONS, PREDICATE_COUNT, REGISTER_COUNT};
use crate::memory::Memory;

/// End-of-dimension snapshot, `[register][dimension]`.
pub type EodTable = [[bool; MAX_DIMENSIONS]; REGISTER_COUNT];

/// A stream register of any lane width.
#[derive(Debug, Clone)]
pub enum AnyStreamRegister {
    U8(StreamRegister<u8>),
    U16(StreamRegister<u16>),
    U32(StreamRegister<u32>),
    U64(StreamRegister<u64>),
}

macro_rules! dispatch {
    ($any:expr, $reg:ident => $body:expr) => {
        match $any {
            AnyStreamRegister::U8($reg) => $body,
            AnyStreamRegister::U16($reg) => $body,
            AnyStreamRegister::U32($reg) => $body,
            AnyStreamRegister::U64($reg) => $body,
        }
    };
}

impl AnyStreamRegister {
    /// Fresh register of the given width.
    pub fn with_width(width: ElementWidth, index: usize, kind: RegisterKind, predicate_mode: PredicateMode) -> Self {
        match width {
            ElementWidth::W8 => Self::U8(StreamRegister::new(index, kind, predicate_mode)),
            ElementWidth::W16 => Self::U16(StreamRegister::new(index, kind, predicate_mode)),
            ElementWidth::W32 => Self::U32(StreamRegister::new(index, kind, predicate_mode)),
            ElementWidth::W64 => Self::U64(StreamRegister::new(index, kind, predicate_mode)),
        }
    }

    /// Unconfigured 8-bit slot, also used while a register is lifted out.
    fn empty(index: usize) -> Self {
        Self::U8(StreamRegister::new(index, RegisterKind::NoStream, PredicateMode::Merging))
    }

    pub fn index(&self) -> usize {
        dispatch!(self, r => r.index())
    }

    pub fn kind(&self) -> RegisterKind {
        dispatch!(self, r => r.kind())
    }

    pub fn status(&self) -> RegisterStatus {
        dispatch!(self, r => r.status())
    }

    pub fn mode(&self) -> RegisterMode {
        dispatch!(self, r => r.mode())
    }

    pub fn predicate_mode(&self) -> PredicateMode {
        dispatch!(self, r => r.predicate_mode())
    }

    pub fn element_width(&self) -> ElementWidth {
        dispatch!(self, r => r.element_width())
    }

    pub fn vlen(&self) -> usize {
        dispatch!(self, r => r.vlen())
    }

    pub fn valid_elements(&self) -> usize {
        dispatch!(self, r => r.valid_elements())
    }

    pub fn transferred(&self) -> usize {
        dispatch!(self, r => r.transferred())
    }

    pub fn has_stream_finished(&self) -> bool {
        dispatch!(self, r => r.has_stream_finished())
    }

    pub fn is_end_of_dimension(&self, dimension: usize) -> Result<bool, StreamError> {
        dispatch!(self, r => r.is_end_of_dimension(dimension))
    }

    pub fn dimensions(&self) -> &[Dimension] {
        dispatch!(self, r => r.dimensions())
    }

    /// Buffer lanes, zero-extended.
    pub fn elements_bits(&self) -> Vec<u64> {
        dispatch!(self, r => r.elements().iter().map(|e| e.to_bits()).collect())
    }

    pub fn start_configuration(&mut self, base_address: u64) {
        dispatch!(self, r => r.start_configuration(base_address))
    }

    pub fn add_dimension(&mut self, offset: i64, size: u64, stride: i64) -> Result<(), StreamError> {
        dispatch!(self, r => r.add_dimension(offset, size, stride))
    }

    pub fn add_static_modifier(&mut self, modifier: StaticModifier) -> Result<(), StreamError> {
        dispatch!(self, r => r.add_static_modifier(modifier))
    }

    pub fn add_dynamic_modifier(&mut self, modifier: DynamicModifier) -> Result<(), StreamError> {
        dispatch!(self, r => r.add_dynamic_modifier(modifier))
    }

    pub fn add_scatter_gather_modifier(&mut self, modifier: ScatterGatherModifier) -> Result<(), StreamError> {
        dispatch!(self, r => r.add_scatter_gather_modifier(modifier))
    }

    pub fn configure_vector_coupled_dimension(&mut self, dimension: Option<usize>) -> Result<(), StreamError> {
        dispatch!(self, r => r.configure_vector_coupled_dimension(dimension))
    }

    pub fn set_mode(&mut self, mode: RegisterMode) {
        dispatch!(self, r => r.set_mode(mode))
    }

    pub fn set_valid_index(&mut self, count: usize) -> Result<(), StreamError> {
        dispatch!(self, r => r.set_valid_index(count))
    }

    pub fn set_predicate_mode(&mut self, mode: PredicateMode) {
        dispatch!(self, r => r.set_predicate_mode(mode))
    }

    fn end_configuration<C: StreamContext + ?Sized>(&mut self, ctx: &mut C) -> Result<(), StreamError> {
        dispatch!(self, r => r.end_configuration(ctx))
    }

    fn read_indirect_value<C: StreamContext + ?Sized>(&mut self, ctx: &mut C) -> Result<Option<IndirectValue>, StreamError> {
        dispatch!(self, r => r.read_indirect_value(ctx))
    }

    fn get_elements_bits<C: StreamContext + ?Sized>(&mut self, causes_update: bool, ctx: &mut C) -> Result<Vec<u64>, StreamError> {
        dispatch!(self, r => Ok(r.get_elements(causes_update, ctx)?.iter().map(|e| e.to_bits()).collect()))
    }

    fn set_elements_bits<C: StreamContext + ?Sized>(
        &mut self,
        values: &[u64],
        causes_update: bool,
        ctx: &mut C,
    ) -> Result<(), StreamError> {
        dispatch!(self, r => set_lanes_from_bits(r, values, causes_update, ctx))
    }

    fn typed<E: Element>(&self) -> Result<&StreamRegister<E>, StreamError> {
        E::from_any(self).ok_or(StreamError::WidthMismatch {
            register: self.index(),
            expected: E::WIDTH,
            actual: self.element_width(),
        })
    }

    fn typed_mut<E: Element>(&mut self) -> Result<&mut StreamRegister<E>, StreamError> {
        let (register, actual) = (self.index(), self.element_width());
        E::from_any_mut(self).ok_or(StreamError::WidthMismatch {
            register,
            expected: E::WIDTH,
            actual,
        })
    }
}

fn set_lanes_from_bits<E, C>(
    register: &mut StreamRegister<E>,
    values: &[u64],
    causes_update: bool,
    ctx: &mut C,
) -> Result<(), StreamError>
where
    E: Element,
    C: StreamContext + ?Sized,
{
    let lanes: Vec<E> = values.iter().map(|&bits| E::from_bits(bits)).collect();
    register.set_elements(&lanes, causes_update, ctx)
}

/// View of the unit handed to a register while it runs.
struct Bus<'a, M: Memory + ?Sized> {
    registers: &'a mut [AnyStreamRegister],
    eod_table: &'a mut EodTable,
    memory: &'a mut M,
    /// Registers currently lifted out of their slots.
    lent: u32,
}

impl<M: Memory + ?Sized> IndirectSource for Bus<'_, M> {
    fn read_indirect(&mut self, source: usize) -> Result<Option<IndirectValue>, StreamError> {
        let count = self.registers.len();
        if source >= count {
            return Err(StreamError::RegisterOutOfRange { index: source, count });
        }
        let bit = 1u32 << source;
        if self.lent & bit != 0 {
            return Err(StreamError::IndirectCycle { register: source });
        }
        if self.registers[source].has_stream_finished() {
            log::trace!("indirect read: u{} already finished", source);
            return Ok(None);
        }

        let mut register = mem::replace(&mut self.registers[source], AnyStreamRegister::empty(source));
        let result = {
            let mut bus = Bus {
                registers: &mut *self.registers,
                eod_table: &mut *self.eod_table,
                memory: &mut *self.memory,
                lent: self.lent | bit,
            };
            register.read_indirect_value(&mut bus)
        };
        self.registers[source] = register;
        result
    }
}

impl<M: Memory + ?Sized> StreamContext for Bus<'_, M> {
    fn load(&mut self, width: ElementWidth, address: u64) -> u64 {
        self.memory.load(width, address)
    }

    fn store(&mut self, width: ElementWidth, address: u64, bits: u64) {
        self.memory.store(width, address, bits);
    }

    fn publish_end_of_dimension(&mut self, register: usize, dimensions: &[Dimension]) {
        if let Some(row) = self.eod_table.get_mut(register) {
            publish_row(row, dimensions);
        }
    }
}

fn publish_row(row: &mut [bool; MAX_DIMENSIONS], dimensions: &[Dimension]) {
    for (d, flag) in row.iter_mut().enumerate() {
        *flag = dimensions.get(d).is_some_and(Dimension::is_end_of_dimension);
    }
}

/// Register file of stream and predicate registers.
#[derive(Debug)]
pub struct StreamingUnit {
    registers: Vec<AnyStreamRegister>,
    predicates: Vec<PredicateRegister>,
    eod_table: EodTable,
}

impl Default for StreamingUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingUnit {
    /// Empty unit. Predicate p0 is all ones.
    pub fn new() -> Self {
        let mut predicates = vec![PredicateRegister::default(); PREDICATE_COUNT];
        predicates[0] = PredicateRegister::all_ones();
        Self {
            registers: (0..REGISTER_COUNT).map(AnyStreamRegister::empty).collect(),
            predicates,
            eod_table: [[false; MAX_DIMENSIONS]; REGISTER_COUNT],
        }
    }

    fn check_register(&self, index: usize) -> Result<(), StreamError> {
        if index >= REGISTER_COUNT {
            return Err(StreamError::RegisterOutOfRange {
                index,
                count: REGISTER_COUNT,
            });
        }
        Ok(())
    }

    // --- Register construction ---

    /// Replace slot `index` with an unconfigured register of lane type `E`.
    pub fn make_stream_register<E: Element>(
        &mut self,
        index: usize,
        kind: RegisterKind,
        predicate_mode: PredicateMode,
    ) -> Result<(), StreamError> {
        self.check_register(index)?;
        self.registers[index] = E::into_any(StreamRegister::new(index, kind, predicate_mode));
        Ok(())
    }

    /// [`make_stream_register`](Self::make_stream_register) with the width
    /// chosen at runtime.
    pub fn make_stream_register_with_width(
        &mut self,
        index: usize,
        width: ElementWidth,
        kind: RegisterKind,
        predicate_mode: PredicateMode,
    ) -> Result<(), StreamError> {
        self.check_register(index)?;
        self.registers[index] = AnyStreamRegister::with_width(width, index, kind, predicate_mode);
        Ok(())
    }

    /// Install a predicate. p0 cannot be replaced.
    pub fn make_predicate_register(&mut self, mask: &[u8], index: usize, mode: PredicateMode) -> Result<(), StreamError> {
        if index == 0 {
            return Err(StreamError::HardwiredPredicate);
        }
        if index >= PREDICATE_COUNT {
            return Err(StreamError::PredicateOutOfRange {
                index,
                count: PREDICATE_COUNT,
            });
        }
        self.predicates[index] = PredicateRegister::new(mask, mode)?;
        Ok(())
    }

    /// Make slot `index` usable as a plain destination of `width`.
    ///
    /// Only an unconfigured slot is rebuilt; a configured one is left as is.
    pub fn prepare_destination<M>(&mut self, index: usize, width: ElementWidth, memory: &mut M) -> Result<(), StreamError>
    where
        M: Memory + ?Sized,
    {
        self.check_register(index)?;
        if self.registers[index].status() != RegisterStatus::NotConfigured {
            return Ok(());
        }
        self.registers[index] = AnyStreamRegister::with_width(width, index, RegisterKind::NoStream, PredicateMode::Merging);
        self.end_configuration(index, memory)
    }

    // --- Register access ---

    pub fn any_register(&self, index: usize) -> Result<&AnyStreamRegister, StreamError> {
        self.check_register(index)?;
        Ok(&self.registers[index])
    }

    /// Mutable access, for configuration.
    pub fn any_register_mut(&mut self, index: usize) -> Result<&mut AnyStreamRegister, StreamError> {
        self.check_register(index)?;
        Ok(&mut self.registers[index])
    }

    pub fn register<E: Element>(&self, index: usize) -> Result<&StreamRegister<E>, StreamError> {
        self.any_register(index)?.typed()
    }

    pub fn register_mut<E: Element>(&mut self, index: usize) -> Result<&mut StreamRegister<E>, StreamError> {
        self.any_register_mut(index)?.typed_mut()
    }

    pub fn predicate(&self, index: usize) -> Result<&PredicateRegister, StreamError> {
        self.predicates.get(index).ok_or(StreamError::PredicateOutOfRange {
            index,
            count: PREDICATE_COUNT,
        })
    }

    // --- Operations that may touch memory or other registers ---

    /// Lift register `index` out, run `op` on it against the rest of the
    /// unit, and put it back whatever the outcome.
    fn operate<M, T, F>(&mut self, index: usize, memory: &mut M, op: F) -> Result<T, StreamError>
    where
        M: Memory + ?Sized,
        F: FnOnce(&mut AnyStreamRegister, &mut Bus<'_, M>) -> Result<T, StreamError>,
    {
        self.check_register(index)?;
        let mut register = mem::replace(&mut self.registers[index], AnyStreamRegister::empty(index));
        let result = {
            let mut bus = Bus {
                registers: &mut self.registers,
                eod_table: &mut self.eod_table,
                memory,
                lent: 1 << index,
            };
            op(&mut register, &mut bus)
        };
        self.registers[index] = register;
        result
    }

    /// Close the configuration of register `index`, firing its dynamic
    /// modifiers once.
    pub fn end_configuration<M>(&mut self, index: usize, memory: &mut M) -> Result<(), StreamError>
    where
        M: Memory + ?Sized,
    {
        self.operate(index, memory, |register, bus| register.end_configuration(bus))
    }

    /// Read the buffer of register `index`, running a load burst first if
    /// requested.
    pub fn get_elements<E, M>(&mut self, index: usize, causes_update: bool, memory: &mut M) -> Result<Vec<E>, StreamError>
    where
        E: Element,
        M: Memory + ?Sized,
    {
        self.operate(index, memory, |register, bus| {
            let elements = register.typed_mut::<E>()?.get_elements(causes_update, bus)?;
            Ok(elements.to_vec())
        })
    }

    /// Write the buffer of register `index`, running a store burst if
    /// requested.
    pub fn set_elements<E, M>(&mut self, index: usize, values: &[E], causes_update: bool, memory: &mut M) -> Result<(), StreamError>
    where
        E: Element,
        M: Memory + ?Sized,
    {
        self.operate(index, memory, |register, bus| {
            register.typed_mut::<E>()?.set_elements(values, causes_update, bus)
        })
    }

    /// Width-erased [`get_elements`](Self::get_elements); lanes are zero-extended.
    pub fn get_elements_bits<M>(&mut self, index: usize, causes_update: bool, memory: &mut M) -> Result<Vec<u64>, StreamError>
    where
        M: Memory + ?Sized,
    {
        self.operate(index, memory, |register, bus| register.get_elements_bits(causes_update, bus))
    }

    /// Width-erased [`set_elements`](Self::set_elements); values are truncated to the lane.
    pub fn set_elements_bits<M>(&mut self, index: usize, values: &[u64], causes_update: bool, memory: &mut M) -> Result<(), StreamError>
    where
        M: Memory + ?Sized,
    {
        self.operate(index, memory, |register, bus| register.set_elements_bits(values, causes_update, bus))
    }

    /// Pull one indirect value from register `source`.
    ///
    /// Runs one load burst on the source and returns its first lane as a
    /// signed value. `None` when the source had already finished or loaded
    /// nothing.
    pub fn read_indirect<M>(&mut self, source: usize, memory: &mut M) -> Result<Option<IndirectValue>, StreamError>
    where
        M: Memory + ?Sized,
    {
        self.check_register(source)?;
        let mut bus = Bus {
            registers: &mut self.registers,
            eod_table: &mut self.eod_table,
            memory,
            lent: 0,
        };
        bus.read_indirect(source)
    }

    // --- End-of-dimension table ---

    /// Snapshot register `index`'s end-of-dimension flags into the table.
    pub fn update_eod_table(&mut self, index: usize) -> Result<(), StreamError> {
        self.check_register(index)?;
        publish_row(&mut self.eod_table[index], self.registers[index].dimensions());
        Ok(())
    }

    /// Last published end-of-dimension flag of `(index, dimension)`.
    pub fn end_of_dimension(&self, index: usize, dimension: usize) -> Result<bool, StreamError> {
        self.check_register(index)?;
        self.eod_table[index]
            .get(dimension)
            .copied()
            .ok_or(StreamError::DimensionOutOfRange {
                register: index,
                dimension,
                count: MAX_DIMENSIONS,
            })
    }

    pub fn stream_finished(&self, index: usize) -> Result<bool, StreamError> {
        Ok(self.any_register(index)?.has_stream_finished())
    }

    pub fn eod_table(&self) -> &EodTable {
        &self.eod_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::trace::{AccessKind, Recorder};
    use crate::memory::HostMemory;
    use crate::streaming::modifier::{DynamicBehaviour, Target};

    fn memory_with(width: ElementWidth, address: u64, values: &[u64]) -> HostMemory {
        let mut memory = HostMemory::new();
        memory.write_values(width, address, values);
        memory
    }

    /// Memory where each 64-bit word at 0x1000.. holds its own address.
    fn echo_words(count: u64) -> HostMemory {
        let words: Vec<u64> = (0..count).map(|i| 0x1000 + 8 * i).collect();
        memory_with(ElementWidth::W64, 0x1000, &words)
    }

    fn configure_source(unit: &mut StreamingUnit, index: usize, base: u64, count: u64, width: ElementWidth) {
        unit.make_stream_register_with_width(index, width, RegisterKind::IndirectSource, PredicateMode::Merging)
            .unwrap();
        let source = unit.any_register_mut(index).unwrap();
        source.start_configuration(base);
        source.add_dimension(0, count, 1).unwrap();
    }

    #[test]
    fn test_new_unit() {
        let unit = StreamingUnit::new();
        assert!(unit.predicate(0).unwrap().predicate().iter().all(|&b| b == 1));
        assert!(unit.predicate(1).unwrap().predicate().iter().all(|&b| b == 0));
        assert!(unit.eod_table().iter().flatten().all(|&f| !f));
        assert_eq!(unit.any_register(31).unwrap().status(), RegisterStatus::NotConfigured);
    }

    #[test]
    fn test_predicate_construction_errors() {
        let mut unit = StreamingUnit::new();
        let mask = [0u8; 64];

        assert_eq!(
            unit.make_predicate_register(&mask, 0, PredicateMode::Merging),
            Err(StreamError::HardwiredPredicate)
        );
        assert_eq!(
            unit.make_predicate_register(&mask, 16, PredicateMode::Merging),
            Err(StreamError::PredicateOutOfRange { index: 16, count: 16 })
        );
        assert!(matches!(
            unit.make_predicate_register(&[0; 63], 2, PredicateMode::Merging),
            Err(StreamError::PredicateLength { .. })
        ));

        let mut bad = mask;
        bad[5] = 3;
        assert!(matches!(
            unit.make_predicate_register(&bad, 2, PredicateMode::Merging),
            Err(StreamError::PredicateValue { lane: 5, value: 3 })
        ));
        assert!(unit.predicate(0).unwrap().lane_enabled(0, 1));
    }

    #[test]
    fn test_merging_predicate_touches_one_lane() {
        let mut unit = StreamingUnit::new();
        let mut mask = [0u8; 64];
        mask[1] = 1;
        unit.make_predicate_register(&mask, 3, PredicateMode::Merging).unwrap();

        let pred = unit.predicate(3).unwrap();
        assert_eq!(pred.mode(), PredicateMode::Merging);

        // A merging write: disabled lanes keep their previous value
        let mut destination = [7u8; 64];
        let result = [9u8; 64];
        for lane in 0..64 {
            if pred.lane_enabled(lane, 1) {
                destination[lane] = result[lane];
            }
        }
        assert_eq!(destination[1], 9);
        assert!(destination.iter().enumerate().all(|(i, &v)| i == 1 || v == 7));
    }

    #[test]
    fn test_register_index_and_width_errors() {
        let mut unit = StreamingUnit::new();
        assert_eq!(
            unit.make_stream_register::<u8>(32, RegisterKind::Load, PredicateMode::Merging),
            Err(StreamError::RegisterOutOfRange { index: 32, count: 32 })
        );

        unit.make_stream_register::<u32>(2, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        assert_eq!(unit.any_register(2).unwrap().element_width(), ElementWidth::W32);
        assert_eq!(unit.any_register(2).unwrap().vlen(), 16);
        assert!(unit.register::<u32>(2).is_ok());
        assert!(matches!(
            unit.register::<u64>(2),
            Err(StreamError::WidthMismatch {
                register: 2,
                expected: ElementWidth::W64,
                actual: ElementWidth::W32
            })
        ));
    }

    #[test]
    fn test_store_then_load_round_trip() {
        let mut unit = StreamingUnit::new();
        let mut memory = HostMemory::new();
        let values: Vec<u64> = vec![11, 22, 33, 44, 55, 66, 77, 88];

        unit.make_stream_register::<u64>(4, RegisterKind::Store, PredicateMode::Merging)
            .unwrap();
        let store = unit.register_mut::<u64>(4).unwrap();
        store.start_configuration(0x2000);
        store.add_dimension(0, 8, 1).unwrap();
        store.configure_vector_coupled_dimension(None).unwrap();
        unit.end_configuration(4, &mut memory).unwrap();
        unit.set_elements(4, &values, true, &mut memory).unwrap();
        assert!(unit.stream_finished(4).unwrap());

        unit.make_stream_register::<u64>(5, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let load = unit.any_register_mut(5).unwrap();
        load.start_configuration(0x2000);
        load.add_dimension(0, 8, 1).unwrap();
        load.configure_vector_coupled_dimension(None).unwrap();
        unit.end_configuration(5, &mut memory).unwrap();

        assert_eq!(unit.get_elements::<u64, _>(5, true, &mut memory).unwrap(), values);
        assert_eq!(unit.any_register(5).unwrap().valid_elements(), 8);
    }

    #[test]
    fn test_dynamic_size_from_indirect_source() {
        let mut unit = StreamingUnit::new();
        let mut memory = echo_words(24);
        memory.write_values(ElementWidth::W32, 0x100, &[2, 1, 3]);

        configure_source(&mut unit, 1, 0x100, 3, ElementWidth::W32);
        unit.end_configuration(1, &mut memory).unwrap();

        unit.make_stream_register::<u64>(2, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let target = unit.any_register_mut(2).unwrap();
        target.start_configuration(0x1000);
        target.add_dimension(0, 3, 8).unwrap();
        target
            .add_dynamic_modifier(DynamicModifier::new(Target::Size, DynamicBehaviour::Set, 1, 1))
            .unwrap();
        target.add_dimension(0, 4, 1).unwrap();
        target.configure_vector_coupled_dimension(None).unwrap();
        unit.end_configuration(2, &mut memory).unwrap();
        assert_eq!(unit.register::<u64>(2).unwrap().dimensions()[1].iter_size(), 2);

        let mut rows = Vec::new();
        while !unit.stream_finished(2).unwrap() {
            let elements = unit.get_elements::<u64, _>(2, true, &mut memory).unwrap();
            let valid = unit.any_register(2).unwrap().valid_elements();
            rows.push(elements[..valid].to_vec());
        }
        assert_eq!(rows, vec![vec![0x1000, 0x1008], vec![0x1040], vec![0x1080, 0x1088, 0x1090]]);
        assert!(unit.stream_finished(1).unwrap());

        let again = unit.get_elements::<u64, _>(2, true, &mut memory);
        assert_eq!(again, Err(StreamError::StreamFinished { register: 2 }));
    }

    #[test]
    fn test_dynamic_modifier_with_finished_source() {
        let mut unit = StreamingUnit::new();
        let mut memory = Recorder::new(memory_with(ElementWidth::W32, 0x100, &[5]));

        configure_source(&mut unit, 1, 0x100, 1, ElementWidth::W32);
        unit.end_configuration(1, &mut memory).unwrap();
        assert_eq!(
            unit.read_indirect(1, &mut memory).unwrap(),
            Some(IndirectValue { value: 5, exhausted: true })
        );
        assert_eq!(unit.read_indirect(1, &mut memory).unwrap(), None);

        unit.make_stream_register::<u64>(2, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let target = unit.any_register_mut(2).unwrap();
        target.start_configuration(0x1000);
        target.add_dimension(0, 2, 8).unwrap();
        target
            .add_dynamic_modifier(DynamicModifier::new(Target::Size, DynamicBehaviour::Set, 1, 1))
            .unwrap();
        target.add_dimension(0, 4, 1).unwrap();
        unit.end_configuration(2, &mut memory).unwrap();

        assert!(unit.end_of_dimension(2, 1).unwrap());
        assert_eq!(unit.register::<u64>(2).unwrap().dimensions()[1].iter_size(), 4);
        let loads = memory.accesses().iter().filter(|a| a.kind == AccessKind::Load).count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_scatter_gather_gathers_by_index() {
        let mut unit = StreamingUnit::new();
        let mut memory = memory_with(ElementWidth::W64, 0x1000, &[100, 101, 102, 103]);
        memory.write_values(ElementWidth::W8, 0x100, &[3, 0, 2]);

        configure_source(&mut unit, 1, 0x100, 3, ElementWidth::W8);
        unit.end_configuration(1, &mut memory).unwrap();

        unit.make_stream_register::<u64>(2, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let target = unit.any_register_mut(2).unwrap();
        target.start_configuration(0x1000);
        target.add_dimension(0, 3, 0).unwrap();
        target
            .add_scatter_gather_modifier(ScatterGatherModifier::new(DynamicBehaviour::Set, 1, 0))
            .unwrap();
        target.configure_vector_coupled_dimension(None).unwrap();
        unit.end_configuration(2, &mut memory).unwrap();

        let elements = unit.get_elements::<u64, _>(2, true, &mut memory).unwrap();
        assert_eq!(unit.any_register(2).unwrap().valid_elements(), 3);
        assert_eq!(&elements[..3], &[103, 100, 102]);
        assert!(unit.stream_finished(2).unwrap());
    }

    #[test]
    fn test_scatter_gather_scatters_by_index() {
        let mut unit = StreamingUnit::new();
        let mut memory = memory_with(ElementWidth::W8, 0x100, &[3, 0, 2]);

        configure_source(&mut unit, 1, 0x100, 3, ElementWidth::W8);
        unit.end_configuration(1, &mut memory).unwrap();

        unit.make_stream_register::<u64>(2, RegisterKind::Store, PredicateMode::Merging)
            .unwrap();
        let target = unit.any_register_mut(2).unwrap();
        target.start_configuration(0x1000);
        target.add_dimension(0, 3, 0).unwrap();
        target
            .add_scatter_gather_modifier(ScatterGatherModifier::new(DynamicBehaviour::Set, 1, 0))
            .unwrap();
        target.configure_vector_coupled_dimension(None).unwrap();
        unit.end_configuration(2, &mut memory).unwrap();

        unit.set_elements::<u64, _>(2, &[7, 8, 9], true, &mut memory).unwrap();
        assert_eq!(memory.read_values(ElementWidth::W64, 0x1000, 4), vec![8, 0, 9, 7]);
        assert_eq!(unit.any_register(2).unwrap().transferred(), 3);
        assert!(unit.stream_finished(2).unwrap());
        assert!(unit.stream_finished(1).unwrap());
    }

    #[test]
    fn test_indirect_errors() {
        let mut unit = StreamingUnit::new();
        let mut memory = HostMemory::new();

        assert!(matches!(
            unit.read_indirect(40, &mut memory),
            Err(StreamError::RegisterOutOfRange { index: 40, .. })
        ));

        unit.make_stream_register::<u32>(3, RegisterKind::Store, PredicateMode::Merging)
            .unwrap();
        assert!(matches!(
            unit.read_indirect(3, &mut memory),
            Err(StreamError::NotIndirectSource { register: 3, .. })
        ));

        // A register feeding its own modifier
        unit.make_stream_register::<u32>(6, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let reg = unit.any_register_mut(6).unwrap();
        reg.start_configuration(0);
        reg.add_dimension(0, 4, 1).unwrap();
        reg.add_dynamic_modifier(DynamicModifier::new(Target::Offset, DynamicBehaviour::Add, 6, 0))
            .unwrap();
        assert_eq!(
            unit.end_configuration(6, &mut memory),
            Err(StreamError::IndirectCycle { register: 6 })
        );

        // The register is back in its slot after the failure
        assert_eq!(unit.any_register(6).unwrap().kind(), RegisterKind::Load);
    }

    #[test]
    fn test_eod_table_tracks_bursts() {
        let mut unit = StreamingUnit::new();
        let mut memory = echo_words(8);

        unit.make_stream_register::<u64>(7, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let reg = unit.any_register_mut(7).unwrap();
        reg.start_configuration(0x1000);
        reg.add_dimension(0, 2, 4).unwrap();
        reg.add_dimension(0, 2, 1).unwrap();
        reg.configure_vector_coupled_dimension(None).unwrap();
        unit.end_configuration(7, &mut memory).unwrap();
        assert!(!unit.end_of_dimension(7, 0).unwrap());

        let first = unit.get_elements::<u64, _>(7, true, &mut memory).unwrap();
        assert_eq!(&first[..2], &[0x1000, 0x1008]);
        // Published before the carry that restarted the inner dimension
        assert!(unit.end_of_dimension(7, 1).unwrap());
        assert!(!unit.end_of_dimension(7, 0).unwrap());

        unit.get_elements::<u64, _>(7, true, &mut memory).unwrap();
        assert!(unit.stream_finished(7).unwrap());
        assert!(unit.end_of_dimension(7, 0).unwrap());
        assert!(unit.end_of_dimension(7, 1).unwrap());
        assert!(!unit.end_of_dimension(7, 2).unwrap());
        assert!(matches!(
            unit.end_of_dimension(7, 8),
            Err(StreamError::DimensionOutOfRange { .. })
        ));

        // Repeated queries agree
        for _ in 0..3 {
            assert!(unit.end_of_dimension(7, 0).unwrap());
        }
    }

    #[test]
    fn test_update_eod_table_snapshot() {
        let mut unit = StreamingUnit::new();
        unit.make_stream_register::<u8>(9, RegisterKind::Load, PredicateMode::Merging)
            .unwrap();
        let reg = unit.any_register_mut(9).unwrap();
        reg.start_configuration(0);
        reg.add_dimension(0, 0, 1).unwrap();

        unit.update_eod_table(9).unwrap();
        assert!(unit.end_of_dimension(9, 0).unwrap());
        assert!(unit.update_eod_table(32).is_err());
    }

    #[test]
    fn test_prepare_destination() {
        let mut unit = StreamingUnit::new();
        let mut memory = HostMemory::new();

        unit.prepare_destination(4, ElementWidth::W16, &mut memory).unwrap();
        assert_eq!(unit.any_register(4).unwrap().element_width(), ElementWidth::W16);
        assert_eq!(unit.any_register(4).unwrap().status(), RegisterStatus::Running);

        unit.set_elements::<u16, _>(4, &[1, 2, 3], false, &mut memory).unwrap();
        unit.prepare_destination(4, ElementWidth::W64, &mut memory).unwrap();
        assert_eq!(&unit.register::<u16>(4).unwrap().elements()[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_width_erased_access() {
        let mut unit = StreamingUnit::new();
        let mut memory = HostMemory::new();
        unit.prepare_destination(0, ElementWidth::W8, &mut memory).unwrap();

        unit.set_elements_bits(0, &[0x1FF, 2], false, &mut memory).unwrap();
        let lanes = unit.get_elements_bits(0, false, &mut memory).unwrap();
        assert_eq!(&lanes[..3], &[0xFF, 2, 0]);
        assert_eq!(unit.any_register(0).unwrap().elements_bits().len(), 64);
    }
}
