//! Predicate registers.
//!
//! A predicate is a 64-byte mask, one byte per 8-bit lane slot, each byte 0
//! or 1. Wider lanes read the byte at the top of their slot: lane `i` of a
//! `w`-byte element is enabled by mask byte `(i + 1) * w - 1`.
//!
//! The streaming unit only stores and serves predicates. Applying them
//! (zeroing or merging disabled lanes) is up to the elementwise collaborators.

use super::error::StreamError;
use super::REGISTER_LENGTH;

/// What happens to lanes a predicate disables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateMode {
    /// Disabled lanes are written as zero.
    #[default]
    Zeroing,
    /// Disabled lanes keep the destination's previous value.
    Merging,
}

/// Per-lane boolean mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateRegister {
    mask: [u8; Self::VLEN],
    mode: PredicateMode,
}

impl Default for PredicateRegister {
    fn default() -> Self {
        Self {
            mask: [0; Self::VLEN],
            mode: PredicateMode::Merging,
        }
    }
}

impl PredicateRegister {
    /// Mask length in lanes (one byte each).
    pub const VLEN: usize = REGISTER_LENGTH;

    /// Build a predicate, checking length and that every byte is 0 or 1.
    pub fn new(mask: &[u8], mode: PredicateMode) -> Result<Self, StreamError> {
        if mask.len() != Self::VLEN {
            return Err(StreamError::PredicateLength {
                expected: Self::VLEN,
                actual: mask.len(),
            });
        }
        if let Some((lane, &value)) = mask.iter().enumerate().find(|(_, &v)| v > 1) {
            return Err(StreamError::PredicateValue { lane, value });
        }

        let mut register = Self { mask: [0; Self::VLEN], mode };
        register.mask.copy_from_slice(mask);
        Ok(register)
    }

    /// Predicate with every lane enabled.
    pub fn all_ones() -> Self {
        Self {
            mask: [1; Self::VLEN],
            mode: PredicateMode::Merging,
        }
    }

    /// Raw mask bytes.
    pub fn predicate(&self) -> &[u8] {
        &self.mask
    }

    /// Whether lane `lane` of `width`-byte elements is enabled.
    ///
    /// Lanes beyond the register are disabled.
    #[inline]
    pub fn lane_enabled(&self, lane: usize, width: usize) -> bool {
        (lane + 1)
            .checked_mul(width)
            .and_then(|end| end.checked_sub(1))
            .and_then(|byte| self.mask.get(byte))
            .is_some_and(|&b| b != 0)
    }

    pub fn mode(&self) -> PredicateMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PredicateMode) {
        self.mode = mode;
    }
}
