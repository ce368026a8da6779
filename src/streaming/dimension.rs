//! One axis of a strided iteration space.
//!
//! A dimension holds its configured descriptor (offset, size, stride) and a
//! live copy that iteration and modifiers mutate. Offsets are kept in bytes;
//! strides are in elements and scaled by the lane width when an address is
//! computed:
//!
//! ```text
//! address contribution = iter_offset + iter_stride * iter_index * element_width
//! ```
//!
//! # End-of-dimension flag
//!
//! The flag marks the dimension's iteration space as exhausted for the current
//! pass. It is set by [`Dimension::advance`] when the index runs past the
//! size, eagerly by the stream register when the last position is generated,
//! and by modifiers. Clearing it always restarts the position at index 0.

/// A dimension descriptor plus its live iteration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    offset: i64,
    size: u64,
    stride: i64,

    pub(crate) iter_offset: i64,
    pub(crate) iter_size: u64,
    pub(crate) iter_stride: i64,
    iter_index: u64,
    end_of_dimension: bool,
}

impl Dimension {
    /// Create a dimension. `offset` is in bytes, `stride` in elements.
    pub fn new(offset: i64, size: u64, stride: i64) -> Self {
        Self {
            offset,
            size,
            stride,
            iter_offset: offset,
            iter_size: size,
            iter_stride: stride,
            iter_index: 0,
            end_of_dimension: size == 0,
        }
    }

    /// Restore the live values from the descriptor and restart at index 0.
    pub fn reset_iteration(&mut self) {
        self.restore_live_values();
        self.iter_index = 0;
    }

    /// Restore live offset, size and stride without moving the position.
    ///
    /// The end-of-dimension flag is recomputed from the restored size.
    pub fn restore_live_values(&mut self) {
        self.iter_offset = self.offset;
        self.iter_size = self.size;
        self.iter_stride = self.stride;
        self.end_of_dimension = self.iter_size == 0;
    }

    /// Step to the next position.
    ///
    /// Returns false and leaves the state untouched when the live size is 0.
    /// Running past the last position raises the end-of-dimension flag.
    pub fn advance(&mut self) -> bool {
        if self.iter_size == 0 {
            return false;
        }
        self.iter_index += 1;
        if self.iter_index >= self.iter_size {
            self.set_end_of_dimension(true);
        }
        true
    }

    /// Whether the current position is the last one (always true when empty).
    #[inline]
    pub fn is_last_iteration(&self) -> bool {
        self.iter_index + 1 >= self.iter_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.iter_size == 0
    }

    #[inline]
    pub fn is_end_of_dimension(&self) -> bool {
        self.end_of_dimension
    }

    /// Force the end-of-dimension flag. Clearing it restarts at index 0.
    pub fn set_end_of_dimension(&mut self, done: bool) {
        self.end_of_dimension = done;
        if !done {
            self.iter_index = 0;
        }
    }

    /// Byte offset this dimension contributes at its current position.
    #[inline]
    pub fn calc_address(&self, element_width: usize) -> i64 {
        self.iter_offset
            .wrapping_add(self.iter_stride.wrapping_mul(self.iter_index as i64).wrapping_mul(element_width as i64))
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stride(&self) -> i64 {
        self.stride
    }

    pub fn iter_offset(&self) -> i64 {
        self.iter_offset
    }

    pub fn iter_size(&self) -> u64 {
        self.iter_size
    }

    pub fn iter_stride(&self) -> i64 {
        self.iter_stride
    }

    pub fn iter_index(&self) -> u64 {
        self.iter_index
    }
}
