//! Call frame decoding
//!
//! A frame is a run of 64-bit little-endian words in guest memory:
//!
//! ```text
//! word 0      value count
//! then        per value: tag word, payload words
//!               int     value
//!               real    IEEE-754 bits of the same word
//!               string  length, pointer
//! ```

use super::{checked_range, decode_utf32, AbiError, GuestPtr, TypeTag, Value};

/// Bytes per frame word
pub const WORD_SIZE: usize = 8;

/// Cursor over one call frame.
///
/// Borrows the memory view for its whole life, so it cannot outlive the
/// external call it was built for.
pub struct FrameReader<'a> {
    memory: &'a [u8],
    frame: &'a [u8],
    cursor: usize,
}

impl<'a> FrameReader<'a> {
    /// Frame of `words` words at `ptr`. A null pointer or a zero size is an
    /// empty frame whose count is zero.
    pub fn new(memory: &'a [u8], ptr: GuestPtr, words: usize) -> Result<Self, AbiError> {
        let frame = if ptr.is_null() || words == 0 {
            &memory[..0]
        } else {
            let len = words.checked_mul(WORD_SIZE).ok_or(AbiError::OutOfBounds {
                offset: ptr.offset(),
                len: usize::MAX,
                limit: memory.len(),
            })?;
            checked_range(memory, ptr.offset(), len)?
        };
        Ok(Self {
            memory,
            frame,
            cursor: 1,
        })
    }

    pub fn words(&self) -> usize {
        self.frame.len() / WORD_SIZE
    }

    /// Index of the next word to be consumed.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// The value count from the frame header.
    pub fn count(&self) -> Result<usize, AbiError> {
        if self.frame.is_empty() {
            return Ok(0);
        }
        let raw = i64::from_le_bytes(self.word(0)?);
        usize::try_from(raw).map_err(|_| AbiError::InvalidCount(raw))
    }

    fn word(&self, index: usize) -> Result<[u8; WORD_SIZE], AbiError> {
        let start = index * WORD_SIZE;
        self.frame
            .get(start..start + WORD_SIZE)
            .and_then(|w| w.try_into().ok())
            .ok_or(AbiError::FrameTooShort {
                index,
                words: self.words(),
            })
    }

    fn next_word(&mut self) -> Result<[u8; WORD_SIZE], AbiError> {
        let word = self.word(self.cursor)?;
        self.cursor += 1;
        Ok(word)
    }

    fn next_i64(&mut self) -> Result<i64, AbiError> {
        self.next_word().map(i64::from_le_bytes)
    }

    pub fn read_tag(&mut self) -> Result<TypeTag, AbiError> {
        TypeTag::from_wire(self.next_i64()?)
    }

    /// Decode the payload for `tag`, the tag word having been consumed.
    pub fn read_payload(&mut self, tag: TypeTag) -> Result<Value, AbiError> {
        match tag {
            TypeTag::Int32 => self.read_int32().map(Value::Int32),
            TypeTag::Float64 => self.read_float64().map(Value::Float64),
            TypeTag::String => self.read_string().map(Value::String),
            TypeTag::Array => Err(AbiError::Unsupported(TypeTag::Array)),
        }
    }

    /// Tag word followed by its payload.
    pub fn read_value(&mut self) -> Result<Value, AbiError> {
        let tag = self.read_tag()?;
        self.read_payload(tag)
    }

    fn read_int32(&mut self) -> Result<i32, AbiError> {
        let raw = self.next_i64()?;
        i32::try_from(raw).map_err(|_| AbiError::IntOutOfRange(raw))
    }

    // The guest stores reals in the same word slots as integers; the bits
    // are reinterpreted in place.
    fn read_float64(&mut self) -> Result<f64, AbiError> {
        self.next_word().map(f64::from_le_bytes)
    }

    fn read_string(&mut self) -> Result<String, AbiError> {
        let len = self.next_i64()?;
        let ptr = self.next_i64()?;
        let len = usize::try_from(len).map_err(|_| AbiError::InvalidCount(len))?;
        let ptr = u32::try_from(ptr)
            .map(GuestPtr::new)
            .map_err(|_| AbiError::OutOfBounds {
                offset: ptr as usize,
                len,
                limit: self.memory.len(),
            })?;
        decode_utf32(self.memory, ptr, len)
    }
}
