//! Function descriptor layout
//!
//! ```text
//! slot 0          name pointer (UTF-32, zero terminated)
//! slot 1          argument count
//! slot 2          return count
//! slot 3..        argument tags, then return tags
//! ```
//!
//! All slots are 32-bit little-endian.

use super::{GuestPtr, TypeTag, SLOT_SIZE};

/// Slots before the tag list
pub const DESCRIPTOR_HEADER_SLOTS: usize = 3;

pub fn descriptor_slots(args: &[TypeTag], rets: &[TypeTag]) -> usize {
    DESCRIPTOR_HEADER_SLOTS + args.len() + rets.len()
}

pub fn encode_descriptor(name: GuestPtr, args: &[TypeTag], rets: &[TypeTag]) -> Vec<u8> {
    let mut out = Vec::with_capacity(descriptor_slots(args, rets) * SLOT_SIZE);
    out.extend_from_slice(&name.as_u32().to_le_bytes());
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    out.extend_from_slice(&(rets.len() as u32).to_le_bytes());
    for tag in args.iter().chain(rets.iter()) {
        out.extend_from_slice(&tag.to_wire().to_le_bytes());
    }
    out
}
