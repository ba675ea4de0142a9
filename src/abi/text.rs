//! UTF-32 text codec

use super::{checked_range, AbiError, GuestPtr};

/// Bytes per text slot
pub const SLOT_SIZE: usize = 4;

/// Slots needed to store `text` including the terminating zero slot.
pub fn utf32_slot_count(text: &str) -> usize {
    text.chars().count() + 1
}

/// Encode `text` as little-endian UTF-32 followed by a zero slot.
///
/// Iteration is by Unicode scalar value, so characters outside the basic
/// plane take a single slot.
pub fn encode_utf32(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(utf32_slot_count(text) * SLOT_SIZE);
    for ch in text.chars() {
        out.extend_from_slice(&(ch as u32).to_le_bytes());
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// Decode exactly `len` slots starting at `ptr` from a memory view.
///
/// The terminator is never consulted, so zero code points inside the range
/// are kept.
pub fn decode_utf32(memory: &[u8], ptr: GuestPtr, len: usize) -> Result<String, AbiError> {
    let byte_len = len.checked_mul(SLOT_SIZE).ok_or(AbiError::OutOfBounds {
        offset: ptr.offset(),
        len: usize::MAX,
        limit: memory.len(),
    })?;
    let bytes = checked_range(memory, ptr.offset(), byte_len)?;

    let mut text = String::with_capacity(len);
    for (index, slot) in bytes.chunks_exact(SLOT_SIZE).enumerate() {
        let value = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
        let ch = char::from_u32(value).ok_or(AbiError::InvalidCodePoint { index, value })?;
        text.push(ch);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(offset: usize, text: &str) -> Vec<u8> {
        let mut memory = vec![0xAAu8; offset];
        memory.extend(encode_utf32(text));
        memory
    }

    #[test]
    fn astral_characters_take_one_slot() {
        let text = "a\u{1F431}b";
        assert_eq!(utf32_slot_count(text), 4);
        let memory = at(8, text);
        assert_eq!(memory.len(), 8 + 16);
        assert_eq!(decode_utf32(&memory, GuestPtr::new(8), 3).unwrap(), text);
    }

    #[test]
    fn terminator_is_written() {
        let bytes = encode_utf32("hi");
        assert_eq!(&bytes[8..], &[0, 0, 0, 0]);
    }

    #[test]
    fn embedded_nul_survives_explicit_length() {
        let text = "ne\0ko";
        let memory = at(0, text);
        assert_eq!(decode_utf32(&memory, GuestPtr::NULL, 5).unwrap(), text);
    }

    #[test]
    fn empty_string() {
        let memory = at(4, "");
        assert_eq!(decode_utf32(&memory, GuestPtr::new(4), 0).unwrap(), "");
    }

    #[test]
    fn surrogate_is_rejected() {
        let mut memory = Vec::new();
        memory.extend_from_slice(&0x41u32.to_le_bytes());
        memory.extend_from_slice(&0xD800u32.to_le_bytes());
        assert_eq!(
            decode_utf32(&memory, GuestPtr::NULL, 2),
            Err(AbiError::InvalidCodePoint {
                index: 1,
                value: 0xD800
            })
        );
    }

    #[test]
    fn length_past_end_is_rejected() {
        let memory = at(0, "abc");
        assert!(matches!(
            decode_utf32(&memory, GuestPtr::new(4), 10),
            Err(AbiError::OutOfBounds { .. })
        ));
    }
}
