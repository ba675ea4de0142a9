//! The linear memory region shared with the guest

use super::{BridgeError, RuntimeError};
use crate::abi::{decode_utf32, AbiError, GuestPtr};
use wasmtime::{AsContext, AsContextMut, Memory, MemoryType, StoreContext};

/// Size of one linear memory page
pub const PAGE_SIZE: usize = 64 * 1024;

/// Host handle to the guest's linear memory.
///
/// The handle holds no pointer into the memory itself. Every accessor
/// borrows a fresh view from the store, so a relocation by `memory.grow`
/// can never leave a stale view behind.
#[derive(Debug, Clone, Copy)]
pub struct Arena {
    memory: Memory,
}

impl Arena {
    /// Create a fixed-size memory of `pages` pages. One extra page of
    /// headroom is allowed as the maximum.
    pub fn create(mut store: impl AsContextMut, pages: u32) -> Result<Self, RuntimeError> {
        let ty = MemoryType::new(pages, Some(pages + 1));
        let memory = Memory::new(&mut store, ty)
            .map_err(|e| RuntimeError::MemoryError(format!("{e:#}")))?;
        Ok(Self { memory })
    }

    pub fn memory(&self) -> Memory {
        self.memory
    }

    /// Current size in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(&store)
    }

    pub fn view<'a, T: 'a>(&self, store: impl Into<StoreContext<'a, T>>) -> &'a [u8] {
        self.memory.data(store)
    }

    pub fn write(
        &self,
        mut store: impl AsContextMut,
        ptr: GuestPtr,
        bytes: &[u8],
    ) -> Result<(), BridgeError> {
        if self.memory.write(&mut store, ptr.offset(), bytes).is_err() {
            return Err(AbiError::OutOfBounds {
                offset: ptr.offset(),
                len: bytes.len(),
                limit: self.size(&store),
            }
            .into());
        }
        Ok(())
    }

    pub fn read(
        &self,
        store: impl AsContext,
        ptr: GuestPtr,
        len: usize,
    ) -> Result<Vec<u8>, BridgeError> {
        let mut buffer = vec![0u8; len];
        if self.memory.read(&store, ptr.offset(), &mut buffer).is_err() {
            return Err(AbiError::OutOfBounds {
                offset: ptr.offset(),
                len,
                limit: self.size(&store),
            }
            .into());
        }
        Ok(buffer)
    }

    /// Decode `len` UTF-32 slots at `ptr`.
    pub fn read_string(
        &self,
        store: impl AsContext,
        ptr: GuestPtr,
        len: usize,
    ) -> Result<String, BridgeError> {
        Ok(decode_utf32(self.memory.data(&store), ptr, len)?)
    }
}
