//! Descriptor modifiers.
//!
//! Modifiers perturb the live state of a target dimension while a stream
//! iterates:
//!
//! - [`StaticModifier`]: fixed displacement, fires once per carry into the
//!   dimension it is attached to.
//! - [`DynamicModifier`]: value read from another stream register, fires once
//!   per carry into the dimension it is attached to (and once when the
//!   configuration ends).
//! - [`ScatterGatherModifier`]: value read from another stream register, fires
//!   once per generated address and only rewrites the offset.
//!
//! Indirect values are pulled through the [`IndirectSource`] trait, which the
//! streaming unit implements over its register file. A modifier only knows its
//! source by register index.

use serde::Deserialize;

use super::dimension::Dimension;
use super::error::StreamError;

/// Field of a dimension a modifier rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Offset,
    Size,
    Stride,
}

/// Behaviour of a static modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaticBehaviour {
    Increment,
    Decrement,
}

/// Behaviour of a dynamic or scatter-gather modifier.
///
/// `Add`, `Subtract` and `Set` start from the configured value, `Increment`
/// and `Decrement` from the live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicBehaviour {
    Add,
    Subtract,
    Set,
    Increment,
    Decrement,
}

impl DynamicBehaviour {
    #[inline]
    fn combine(self, live: i64, configured: i64, value: i64) -> i64 {
        match self {
            Self::Add => configured.wrapping_add(value),
            Self::Subtract => configured.wrapping_sub(value),
            Self::Set => value,
            Self::Increment => live.wrapping_add(value),
            Self::Decrement => live.wrapping_sub(value),
        }
    }
}

/// One value read from an indirect source register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectValue {
    /// First loaded lane, sign-extended.
    pub value: i64,
    /// The source finished while producing this value.
    pub exhausted: bool,
}

/// Supplier of indirect values, addressed by stream register index.
pub trait IndirectSource {
    /// Run one load burst on `source` and return its first lane.
    ///
    /// Returns `Ok(None)` when the source has already finished or the burst
    /// produced no element.
    fn read_indirect(&mut self, source: usize) -> Result<Option<IndirectValue>, StreamError>;
}

fn target_mut(dims: &mut [Dimension], index: usize) -> Result<&mut Dimension, StreamError> {
    let count = dims.len();
    dims.get_mut(index).ok_or(StreamError::TargetOutOfRange { dimension: index, count })
}

/// Fixed displacement applied on every carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticModifier {
    target: Target,
    behaviour: StaticBehaviour,
    displacement: i64,
    target_dim: usize,
}

impl StaticModifier {
    pub fn new(target: Target, behaviour: StaticBehaviour, displacement: i64, target_dim: usize) -> Self {
        Self { target, behaviour, displacement, target_dim }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    /// Apply the displacement to the target dimension.
    ///
    /// Offsets are scaled by the lane width and never drop below 0. Sizes
    /// clamp at 0, which raises end-of-dimension; any non-zero size clears it.
    pub fn apply(&self, dims: &mut [Dimension], element_width: usize) -> Result<(), StreamError> {
        let change = match self.behaviour {
            StaticBehaviour::Increment => self.displacement,
            StaticBehaviour::Decrement => self.displacement.wrapping_neg(),
        };
        let dim = target_mut(dims, self.target_dim)?;

        match self.target {
            Target::Offset => {
                dim.iter_offset = dim.iter_offset.wrapping_add(change.wrapping_mul(element_width as i64)).max(0);
            }
            Target::Size => {
                let size = (dim.iter_size as i64).saturating_add(change);
                if size <= 0 {
                    dim.iter_size = 0;
                    dim.set_end_of_dimension(true);
                } else {
                    dim.iter_size = size as u64;
                    dim.set_end_of_dimension(false);
                }
            }
            Target::Stride => {
                dim.iter_stride = dim.iter_stride.wrapping_add(change);
            }
        }
        log::trace!("static modifier {:?} {:?} {} -> dim {}", self.target, self.behaviour, self.displacement, self.target_dim);
        Ok(())
    }
}

/// Register-driven modifier applied on every carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicModifier {
    target: Target,
    behaviour: DynamicBehaviour,
    source: usize,
    target_dim: usize,
    source_exhausted: bool,
    applied: bool,
}

impl DynamicModifier {
    pub fn new(target: Target, behaviour: DynamicBehaviour, source: usize, target_dim: usize) -> Self {
        Self {
            target,
            behaviour,
            source,
            target_dim,
            source_exhausted: false,
            applied: false,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    /// Register the values are read from.
    pub fn source(&self) -> usize {
        self.source
    }

    /// Whether the last firing rewrote the target.
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Fetch one value from the source and rewrite the target field.
    ///
    /// When the source ran dry on a previous firing, or has nothing left now,
    /// the target dimension is marked done instead and left otherwise intact.
    pub fn apply<S>(&mut self, dims: &mut [Dimension], element_width: usize, source: &mut S) -> Result<(), StreamError>
    where
        S: IndirectSource + ?Sized,
    {
        // Validate before a value is consumed from the source
        target_mut(dims, self.target_dim)?;

        let fetched = if self.source_exhausted {
            self.source_exhausted = false;
            None
        } else {
            source.read_indirect(self.source)?
        };

        let dim = target_mut(dims, self.target_dim)?;
        let Some(IndirectValue { value, exhausted }) = fetched else {
            log::trace!("dynamic modifier: u{} exhausted, closing dim {}", self.source, self.target_dim);
            dim.set_end_of_dimension(true);
            self.applied = false;
            return Ok(());
        };

        match self.target {
            Target::Offset => {
                let scaled = value.wrapping_mul(element_width as i64);
                dim.iter_offset = self.behaviour.combine(dim.iter_offset, dim.offset(), scaled);
            }
            Target::Size => {
                let size = self.behaviour.combine(dim.iter_size as i64, dim.size() as i64, value);
                dim.iter_size = size.max(0) as u64;
                if dim.iter_size != 0 {
                    dim.set_end_of_dimension(false);
                }
            }
            Target::Stride => {
                dim.iter_stride = self.behaviour.combine(dim.iter_stride, dim.stride(), value);
            }
        }
        log::trace!(
            "dynamic modifier {:?} {:?} value={} from u{} -> dim {}",
            self.target, self.behaviour, value, self.source, self.target_dim
        );

        self.source_exhausted = exhausted;
        self.applied = true;
        Ok(())
    }
}

/// Register-driven offset rewrite applied once per generated address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterGatherModifier {
    behaviour: DynamicBehaviour,
    source: usize,
    target_dim: usize,
    source_exhausted: bool,
    applied: bool,
}

impl ScatterGatherModifier {
    pub fn new(behaviour: DynamicBehaviour, source: usize, target_dim: usize) -> Self {
        Self {
            behaviour,
            source,
            target_dim,
            source_exhausted: false,
            applied: false,
        }
    }

    /// Always [`Target::Offset`].
    pub fn target(&self) -> Target {
        Target::Offset
    }

    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    pub fn source(&self) -> usize {
        self.source
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Re-arm for the next element.
    pub fn set_applied(&mut self, applied: bool) {
        self.applied = applied;
    }

    /// Fetch one value and rewrite the offset of `dim`.
    ///
    /// Once the source is exhausted every further firing marks `dim` done.
    pub fn apply<S>(&mut self, dim: &mut Dimension, element_width: usize, source: &mut S) -> Result<(), StreamError>
    where
        S: IndirectSource + ?Sized,
    {
        let fetched = if self.source_exhausted {
            None
        } else {
            source.read_indirect(self.source)?
        };

        let Some(IndirectValue { value, exhausted }) = fetched else {
            self.source_exhausted = true;
            dim.set_end_of_dimension(true);
            return Ok(());
        };

        let scaled = value.wrapping_mul(element_width as i64);
        dim.iter_offset = self.behaviour.combine(dim.iter_offset, dim.offset(), scaled);
        log::trace!("scatter-gather {:?} value={} from u{} -> offset {}", self.behaviour, value, self.source, dim.iter_offset);

        self.source_exhausted = exhausted;
        self.applied = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out queued values; reports exhaustion with the last one.
    struct Queue(VecDeque<i64>, usize);

    impl Queue {
        fn new(values: &[i64]) -> Self {
            Self(values.iter().copied().collect(), 0)
        }
    }

    impl IndirectSource for Queue {
        fn read_indirect(&mut self, _source: usize) -> Result<Option<IndirectValue>, StreamError> {
            self.1 += 1;
            Ok(self.0.pop_front().map(|value| IndirectValue { value, exhausted: self.0.is_empty() }))
        }
    }

    #[test]
    fn test_static_size_decrement_to_zero() {
        let mut dims = vec![Dimension::new(0, 2, 1), Dimension::new(0, 3, 1)];
        let m = StaticModifier::new(Target::Size, StaticBehaviour::Decrement, 2, 1);

        m.apply(&mut dims, 8).unwrap();
        assert_eq!(dims[1].iter_size(), 1);
        assert!(!dims[1].is_end_of_dimension());

        m.apply(&mut dims, 8).unwrap();
        assert_eq!(dims[1].iter_size(), 0);
        assert!(dims[1].is_end_of_dimension());
    }

    #[test]
    fn test_static_size_increase_reopens() {
        let mut dims = vec![Dimension::new(0, 0, 1)];
        assert!(dims[0].is_end_of_dimension());

        StaticModifier::new(Target::Size, StaticBehaviour::Increment, 4, 0)
            .apply(&mut dims, 1)
            .unwrap();
        assert_eq!(dims[0].iter_size(), 4);
        assert!(!dims[0].is_end_of_dimension());
        assert_eq!(dims[0].iter_index(), 0);
    }

    #[test]
    fn test_static_offset_clamps_at_zero() {
        let mut dims = vec![Dimension::new(8, 4, 1)];
        let m = StaticModifier::new(Target::Offset, StaticBehaviour::Decrement, 1, 0);

        m.apply(&mut dims, 4).unwrap();
        assert_eq!(dims[0].iter_offset(), 4);
        m.apply(&mut dims, 4).unwrap();
        m.apply(&mut dims, 4).unwrap();
        assert_eq!(dims[0].iter_offset(), 0);
    }

    #[test]
    fn test_static_stride_is_unscaled() {
        let mut dims = vec![Dimension::new(0, 4, 1)];
        StaticModifier::new(Target::Stride, StaticBehaviour::Increment, 2, 0)
            .apply(&mut dims, 8)
            .unwrap();
        assert_eq!(dims[0].iter_stride(), 3);
    }

    #[test]
    fn test_static_bad_target() {
        let mut dims = vec![Dimension::new(0, 4, 1)];
        let result = StaticModifier::new(Target::Size, StaticBehaviour::Increment, 1, 3).apply(&mut dims, 1);
        assert!(matches!(result, Err(StreamError::TargetOutOfRange { dimension: 3, count: 1 })));
    }

    #[test]
    fn test_dynamic_behaviours() {
        let mut src = Queue::new(&[5, 5, 5, 5, 5, 5]);
        let mut dims = vec![Dimension::new(16, 10, 2)];

        DynamicModifier::new(Target::Offset, DynamicBehaviour::Add, 1, 0)
            .apply(&mut dims, 4, &mut src)
            .unwrap();
        assert_eq!(dims[0].iter_offset(), 16 + 20);

        DynamicModifier::new(Target::Size, DynamicBehaviour::Subtract, 1, 0)
            .apply(&mut dims, 4, &mut src)
            .unwrap();
        assert_eq!(dims[0].iter_size(), 5);

        DynamicModifier::new(Target::Size, DynamicBehaviour::Increment, 1, 0)
            .apply(&mut dims, 4, &mut src)
            .unwrap();
        assert_eq!(dims[0].iter_size(), 10);

        DynamicModifier::new(Target::Stride, DynamicBehaviour::Set, 1, 0)
            .apply(&mut dims, 4, &mut src)
            .unwrap();
        assert_eq!(dims[0].iter_stride(), 5);

        DynamicModifier::new(Target::Stride, DynamicBehaviour::Decrement, 1, 0)
            .apply(&mut dims, 4, &mut src)
            .unwrap();
        assert_eq!(dims[0].iter_stride(), 0);
    }

    #[test]
    fn test_dynamic_exhaustion_closes_target() {
        let mut src = Queue::new(&[3]);
        let mut dims = vec![Dimension::new(0, 2, 1), Dimension::new(0, 1, 1)];
        let mut m = DynamicModifier::new(Target::Size, DynamicBehaviour::Set, 7, 1);

        // Last value is still applied
        m.apply(&mut dims, 1, &mut src).unwrap();
        assert_eq!(dims[1].iter_size(), 3);
        assert!(m.is_applied());

        // Next firing closes the dimension without reading
        m.apply(&mut dims, 1, &mut src).unwrap();
        assert!(dims[1].is_end_of_dimension());
        assert_eq!(dims[1].iter_size(), 3);
        assert!(!m.is_applied());
        assert_eq!(src.1, 1);
    }

    #[test]
    fn test_dynamic_finished_source_does_not_mutate() {
        let mut src = Queue::new(&[]);
        let mut dims = vec![Dimension::new(0, 4, 1)];
        let mut m = DynamicModifier::new(Target::Offset, DynamicBehaviour::Set, 2, 0);

        m.apply(&mut dims, 8, &mut src).unwrap();
        assert!(dims[0].is_end_of_dimension());
        assert_eq!(dims[0].iter_offset(), 0);
        assert!(!m.is_applied());
    }

    #[test]
    fn test_scatter_gather_offsets() {
        let mut src = Queue::new(&[4, 1]);
        let mut dim = Dimension::new(0, 2, 0);
        let mut m = ScatterGatherModifier::new(DynamicBehaviour::Set, 3, 0);

        m.apply(&mut dim, 2, &mut src).unwrap();
        assert_eq!(dim.iter_offset(), 8);
        assert!(m.is_applied());

        m.set_applied(false);
        m.apply(&mut dim, 2, &mut src).unwrap();
        assert_eq!(dim.iter_offset(), 2);

        // Source ran dry with the previous value
        m.apply(&mut dim, 2, &mut src).unwrap();
        assert!(dim.is_end_of_dimension());
        assert_eq!(src.1, 2);
        assert_eq!(m.target(), Target::Offset);
    }
}
