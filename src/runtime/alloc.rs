//! Guest allocator proxy

use super::{Arena, BridgeError};
use crate::abi::{encode_utf32, utf32_slot_count, GuestPtr, SLOT_SIZE};
use tracing::trace;
use wasmtime::{AsContextMut, TypedFunc};

/// Host-side handle to the guest's exported allocator.
///
/// This is the only way the host obtains writable space in the arena. Sizes
/// are in 32-bit slots. Memory handed out is never freed by the host.
#[derive(Clone)]
pub struct GuestAllocator {
    malloc: TypedFunc<i32, i32>,
    arena: Arena,
}

impl GuestAllocator {
    pub(crate) fn new(malloc: TypedFunc<i32, i32>, arena: Arena) -> Self {
        Self { malloc, arena }
    }

    pub fn arena(&self) -> Arena {
        self.arena
    }

    /// Allocate `slots` 32-bit slots.
    ///
    /// A null or negative pointer from the guest, or a block reaching past
    /// the end of the arena, is reported as `AllocationFailed`.
    pub fn allocate(
        &self,
        mut store: impl AsContextMut,
        slots: usize,
    ) -> Result<GuestPtr, BridgeError> {
        let request = i32::try_from(slots)
            .map_err(|_| BridgeError::AllocationFailed { slots, raw: 0 })?;
        let raw = self
            .malloc
            .call(&mut store, request)
            .map_err(BridgeError::from_guest)?;

        let ptr = GuestPtr::from_raw(raw)
            .filter(|ptr| !ptr.is_null())
            .ok_or(BridgeError::AllocationFailed { slots, raw })?;

        let fits = slots
            .checked_mul(SLOT_SIZE)
            .and_then(|len| ptr.offset().checked_add(len))
            .is_some_and(|end| end <= self.arena.size(&store));
        if !fits {
            return Err(BridgeError::AllocationFailed { slots, raw });
        }

        trace!(slots, %ptr, "guest allocation");
        Ok(ptr)
    }

    /// Copy `text` into freshly allocated guest memory as zero-terminated
    /// UTF-32.
    pub fn write_string(
        &self,
        mut store: impl AsContextMut,
        text: &str,
    ) -> Result<GuestPtr, BridgeError> {
        let ptr = self.allocate(&mut store, utf32_slot_count(text))?;
        self.arena.write(&mut store, ptr, &encode_utf32(text))?;
        Ok(ptr)
    }
}
