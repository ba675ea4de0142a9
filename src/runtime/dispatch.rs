//! External call dispatch
//!
//! Entered from the guest's `core.extFunctionCall` import. Resolves the id,
//! checks the call shape, decodes the argument frame and runs the
//! registered callback.

use super::{BridgeError, ErrorReporter, GuestAllocator, Hooks, HostFunctionErrorKind, Session};
use crate::abi::{AbiError, FrameReader, GuestPtr, TypeTag, Value};
use std::fmt;
use tracing::{error, trace};
use wasmtime::Caller;

/// The call succeeded.
pub const STATUS_OK: i32 = 0;
/// The call expects results or passes arrays, which the bridge does not
/// support. The guest keeps running.
pub const STATUS_UNSUPPORTED: i32 = -1;
/// The callback reported a failure. The guest keeps running.
pub const STATUS_CALLBACK_FAILED: i32 = -2;

/// What a callback may do while the guest is suspended in an external call.
///
/// Allocation and memory access go through the session's arena. There is
/// no way to run guest steps from here.
pub struct CallCtx<'a, 'c> {
    caller: &'a mut Caller<'c, Session>,
    function: &'a str,
}

impl<'a, 'c> CallCtx<'a, 'c> {
    /// Name of the function being called.
    pub fn function(&self) -> &str {
        self.function
    }

    pub fn session(&self) -> &Session {
        self.caller.data()
    }

    pub fn hooks(&self) -> &Hooks {
        self.caller.data().hooks()
    }

    /// Write `text` to the session's output sink.
    pub fn print(&self, text: &str) {
        self.hooks().put_str(text);
    }

    pub fn allocate(&mut self, slots: usize) -> Result<GuestPtr, BridgeError> {
        let allocator = self.allocator()?;
        allocator.allocate(&mut *self.caller, slots)
    }

    /// Copy `text` into the arena as zero-terminated UTF-32.
    pub fn alloc_string(&mut self, text: &str) -> Result<GuestPtr, BridgeError> {
        let allocator = self.allocator()?;
        allocator.write_string(&mut *self.caller, text)
    }

    pub fn read_string(&self, ptr: GuestPtr, len: usize) -> Result<String, BridgeError> {
        let arena = self.caller.data().arena()?;
        arena.read_string(&*self.caller, ptr, len)
    }

    pub fn write(&mut self, ptr: GuestPtr, bytes: &[u8]) -> Result<(), BridgeError> {
        let arena = self.caller.data().arena()?;
        arena.write(&mut *self.caller, ptr, bytes)
    }

    /// A recoverable failure of the current call.
    pub fn fail(&self, message: impl fmt::Display) -> BridgeError {
        BridgeError::Callback {
            function: self.function.to_string(),
            message: message.to_string(),
        }
    }

    fn allocator(&self) -> Result<GuestAllocator, BridgeError> {
        self.caller.data().allocator()
    }
}

/// Decode an argument frame against the registered argument tags.
///
/// The value count must equal `expected.len()` and every tag in the frame
/// must equal the registered tag at its position.
pub fn decode_arguments(
    function: &str,
    expected: &[TypeTag],
    memory: &[u8],
    ptr: GuestPtr,
    words: usize,
) -> Result<Vec<Value>, BridgeError> {
    let frame_error = |source: AbiError| BridgeError::Frame {
        function: function.to_string(),
        source,
    };

    let mut reader = FrameReader::new(memory, ptr, words).map_err(frame_error)?;
    let found = reader.count().map_err(frame_error)?;
    if found != expected.len() {
        return Err(BridgeError::ArityMismatch {
            function: function.to_string(),
            expected: expected.len(),
            found,
        });
    }

    let mut values = Vec::with_capacity(found);
    for (position, &tag) in expected.iter().enumerate() {
        let found = reader.read_tag().map_err(frame_error)?;
        if found != tag {
            return Err(BridgeError::TagMismatch {
                function: function.to_string(),
                position,
                expected: tag,
                found,
            });
        }
        values.push(reader.read_payload(tag).map_err(frame_error)?);
    }
    Ok(values)
}

fn frame_words(function: &str, raw: i32) -> Result<usize, BridgeError> {
    usize::try_from(raw).map_err(|_| BridgeError::Frame {
        function: function.to_string(),
        source: AbiError::InvalidCount(raw.into()),
    })
}

fn external_call(
    caller: &mut Caller<'_, Session>,
    id: i32,
    args_ptr: i32,
    args_words: i32,
    rets_ptr: i32,
    rets_words: i32,
) -> Result<(), BridgeError> {
    if caller.data().in_external_call {
        return Err(BridgeError::Reentrant(id));
    }
    let entry = caller
        .data()
        .table
        .get(id)
        .ok_or(BridgeError::UnknownFunction(id))?;
    let function = entry.name.as_str();

    // Guest pointers are unsigned.
    let args_ptr = GuestPtr::new(args_ptr as u32);
    let rets_ptr = GuestPtr::new(rets_ptr as u32);
    let args_words = frame_words(function, args_words)?;
    let rets_words = frame_words(function, rets_words)?;

    let arena = caller.data().arena()?;
    let memory = arena.view(&*caller);

    let returns = FrameReader::new(memory, rets_ptr, rets_words)
        .and_then(|frame| frame.count())
        .map_err(|source| BridgeError::Frame {
            function: function.to_string(),
            source,
        })?;
    if returns > 0 || !entry.signature.rets.is_empty() {
        return Err(BridgeError::UnsupportedShape {
            function: function.to_string(),
            reason: format!("return values are not supported ({returns} requested)"),
        });
    }
    if entry.signature.uses_array() {
        return Err(BridgeError::UnsupportedShape {
            function: function.to_string(),
            reason: "array arguments are not supported".to_string(),
        });
    }

    let args = decode_arguments(function, &entry.signature.args, memory, args_ptr, args_words)?;
    trace!(function, id, ?args, "external call");

    caller.data_mut().in_external_call = true;
    let mut ctx = CallCtx {
        caller: &mut *caller,
        function,
    };
    let result = (entry.callback)(&mut ctx, &args);
    caller.data_mut().in_external_call = false;
    result
}

/// Body of the `core.extFunctionCall` import.
///
/// Fatal errors trap the guest with the [`BridgeError`] as the trap payload.
/// Recoverable ones go to the error handler and come back to the guest as a
/// negative status.
pub(crate) fn handle_external_call(
    mut caller: Caller<'_, Session>,
    reporter: &ErrorReporter,
    id: i32,
    args_ptr: i32,
    args_words: i32,
    rets_ptr: i32,
    rets_words: i32,
) -> wasmtime::Result<i32> {
    match external_call(&mut caller, id, args_ptr, args_words, rets_ptr, rets_words) {
        Ok(()) => Ok(STATUS_OK),
        Err(err) if err.is_fatal() => {
            error!(id, error = %err, "external call aborted the guest");
            Err(err.into())
        }
        Err(err) => {
            let kind = match &err {
                BridgeError::Callback { .. } => HostFunctionErrorKind::Callback(err.to_string()),
                _ => HostFunctionErrorKind::Dispatch(err.to_string()),
            };
            reporter.report("extFunctionCall", kind);
            Ok(err.status_code())
        }
    }
}
