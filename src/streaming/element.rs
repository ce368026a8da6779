//! Lane widths and lane interpretation.
//!
//! Stream registers store raw unsigned lanes of 8, 16, 32 or 64 bits. How a
//! lane is read (signed integer, unsigned integer, floating point) is decided
//! by whoever consumes it, so the interpretation is an explicit [`LaneType`]
//! rather than something inferred from the storage type.

use std::fmt;

use serde::Deserialize;

use super::error::StreamError;
use super::register::StreamRegister;
use super::unit::AnyStreamRegister;

/// Width of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum ElementWidth {
    /// 8-bit lanes.
    W8,
    /// 16-bit lanes.
    W16,
    /// 32-bit lanes.
    W32,
    /// 64-bit lanes.
    W64,
}

impl ElementWidth {
    /// All widths, narrowest first.
    pub const ALL: [ElementWidth; 4] = [Self::W8, Self::W16, Self::W32, Self::W64];

    /// Lane size in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    /// Lane size in bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// Width for a byte count, if it is one of 1, 2, 4, 8.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(Self::W8),
            2 => Some(Self::W16),
            4 => Some(Self::W32),
            8 => Some(Self::W64),
            _ => None,
        }
    }

    /// Mask selecting the low `bits()` bits of a raw value.
    #[inline]
    pub const fn mask(self) -> u64 {
        match self {
            Self::W64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }
}

impl TryFrom<u8> for ElementWidth {
    type Error = String;

    fn try_from(bytes: u8) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes as usize)
            .ok_or_else(|| format!("element width must be 1, 2, 4 or 8 bytes, got {}", bytes))
    }
}

impl fmt::Display for ElementWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Storage type of a stream register lane.
///
/// Implemented for `u8`, `u16`, `u32` and `u64`. The conversions into and out
/// of [`AnyStreamRegister`] let the streaming unit hand out typed registers
/// from its width-erased register file.
pub trait Element: Copy + Default + fmt::Debug + PartialEq + 'static {
    /// Lane width of this storage type.
    const WIDTH: ElementWidth;

    /// Truncate raw memory bits to a lane.
    fn from_bits(bits: u64) -> Self;

    /// Zero-extend a lane to raw bits.
    fn to_bits(self) -> u64;

    /// Read the lane as a two's complement integer of its own width.
    fn to_signed(self) -> i64;

    /// Wrap a typed register into the register file variant.
    fn into_any(register: StreamRegister<Self>) -> AnyStreamRegister;

    /// Borrow the typed register if the variant matches this width.
    fn from_any(any: &AnyStreamRegister) -> Option<&StreamRegister<Self>>;

    /// Mutably borrow the typed register if the variant matches this width.
    fn from_any_mut(any: &mut AnyStreamRegister) -> Option<&mut StreamRegister<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $signed:ty, $width:ident, $variant:ident) => {
        impl Element for $ty {
            const WIDTH: ElementWidth = ElementWidth::$width;

            #[inline]
            fn from_bits(bits: u64) -> Self {
                bits as $ty
            }

            #[inline]
            fn to_bits(self) -> u64 {
                self as u64
            }

            #[inline]
            fn to_signed(self) -> i64 {
                self as $signed as i64
            }

            fn into_any(register: StreamRegister<Self>) -> AnyStreamRegister {
                AnyStreamRegister::$variant(register)
            }

            fn from_any(any: &AnyStreamRegister) -> Option<&StreamRegister<Self>> {
                match any {
                    AnyStreamRegister::$variant(register) => Some(register),
                    _ => None,
                }
            }

            fn from_any_mut(any: &mut AnyStreamRegister) -> Option<&mut StreamRegister<Self>> {
                match any {
                    AnyStreamRegister::$variant(register) => Some(register),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, i8, W8, U8);
impl_element!(u16, i16, W16, U16);
impl_element!(u32, i32, W32, U32);
impl_element!(u64, i64, W64, U64);

/// How the bits of a lane are interpreted by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneType {
    /// Two's complement integer.
    Signed,
    /// Unsigned integer.
    #[default]
    Unsigned,
    /// IEEE-754 binary32 for 32-bit lanes, binary64 for 64-bit lanes.
    Float,
}

impl LaneType {
    /// Decode raw lane bits.
    pub fn decode(self, bits: u64, width: ElementWidth) -> Result<LaneValue, StreamError> {
        let bits = bits & width.mask();
        match self {
            Self::Unsigned => Ok(LaneValue::Unsigned(bits)),
            Self::Signed => {
                let shift = 64 - width.bits();
                Ok(LaneValue::Signed(((bits << shift) as i64) >> shift))
            }
            Self::Float => match width {
                ElementWidth::W32 => Ok(LaneValue::Float(f32::from_bits(bits as u32) as f64)),
                ElementWidth::W64 => Ok(LaneValue::Float(f64::from_bits(bits))),
                _ => Err(StreamError::UnsupportedLane { lane: self, width }),
            },
        }
    }
}

/// A decoded lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaneValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl LaneValue {
    /// Encode into raw lane bits of the given width.
    ///
    /// Integers are truncated to the lane. Floats need a 32- or 64-bit lane.
    pub fn to_bits(self, width: ElementWidth) -> Result<u64, StreamError> {
        match self {
            Self::Signed(v) => Ok(v as u64 & width.mask()),
            Self::Unsigned(v) => Ok(v & width.mask()),
            Self::Float(v) => match width {
                ElementWidth::W32 => Ok((v as f32).to_bits() as u64),
                ElementWidth::W64 => Ok(v.to_bits()),
                _ => Err(StreamError::UnsupportedLane { lane: LaneType::Float, width }),
            },
        }
    }
}

impl fmt::Display for LaneValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signed(v) => write!(f, "{}", v),
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
        }
    }
}
