//! ABI: Value Encoding and Decoding
//!
//! Handles marshaling data between the host and the guest interpreter.
//!
//! - Text crosses the boundary as UTF-32, one 32-bit slot per code point
//! - Call frames are sequences of 64-bit little-endian words, each value
//!   introduced by a [`TypeTag`] word
//! - Function descriptors are sequences of 32-bit slots

mod descriptor;
mod frame;
mod text;
mod value;

pub use descriptor::{descriptor_slots, encode_descriptor, DESCRIPTOR_HEADER_SLOTS};
pub use frame::{FrameReader, WORD_SIZE};
pub use text::{decode_utf32, encode_utf32, utf32_slot_count, SLOT_SIZE};
pub use value::{ArgType, Signature, TypeTag, Value};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbiError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: TypeTag, got: TypeTag },

    #[error("Invalid type tag: {0}")]
    InvalidTag(i64),

    #[error("Invalid code point {value:#x} at slot {index}")]
    InvalidCodePoint { index: usize, value: u32 },

    #[error("Out of bounds: {len} bytes at offset {offset} exceed {limit}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        limit: usize,
    },

    #[error("Frame too short: word {index} requested, frame holds {words}")]
    FrameTooShort { index: usize, words: usize },

    #[error("Integer {0} does not fit in 32 bits")]
    IntOutOfRange(i64),

    #[error("Invalid count: {0}")]
    InvalidCount(i64),

    #[error("Unsupported value kind: {0}")]
    Unsupported(TypeTag),
}

/// A byte offset into the guest's linear memory.
///
/// Pointer zero is the guest's null; allocation never hands it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestPtr(u32);

impl GuestPtr {
    pub const NULL: GuestPtr = GuestPtr(0);

    pub fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Interpret a raw pointer handed over by the guest. Negative values are
    /// not addresses and map to `None`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The pointer as the guest's `i32` parameter type.
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl std::fmt::Display for GuestPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Borrow `len` bytes at `offset` out of a memory view, checking bounds.
pub(crate) fn checked_range(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], AbiError> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(AbiError::OutOfBounds {
            offset,
            len,
            limit: bytes.len(),
        })?;
    Ok(&bytes[offset..end])
}
