//! Guest Runtime
//!
//! Handles guest loading, host import linking, the external-function
//! bridge and execution.

mod alloc;
mod dispatch;
mod guest;
mod host;
mod imports;
mod interface_check;
mod memory;
mod registry;
mod scheduler;
mod session;

pub use alloc::GuestAllocator;
pub use dispatch::{
    decode_arguments, CallCtx, STATUS_CALLBACK_FAILED, STATUS_OK, STATUS_UNSUPPORTED,
};
pub use guest::Guest;
pub use host::{
    ErrorHandler, ErrorReporter, HostFunctionError, HostFunctionErrorKind,
    HostFunctionProvider, HostLinkerBuilder, InterfaceBuilder, LinkerError,
};
pub use imports::{format_fixed, js_round, link_host, CoreImports, JsImports, MathImports};
pub use interface_check::{inspect_guest, ExportCheck, ExportStatus, GuestReport};
pub use memory::{Arena, PAGE_SIZE};
pub use registry::{
    Callback, ExternalFunction, FunctionEntry, FunctionId, FunctionProvider, FunctionTable,
    MAX_FUNCTION_ID,
};
pub use scheduler::{BatchOutcome, RunOutcome, RunSummary, Scheduler, StopHandle};
pub use session::{Hooks, RunState, Session};

use crate::abi::{AbiError, TypeTag};
use crate::config::{BridgeConfig, ConfigError};
use thiserror::Error;
use wasmtime::{Engine, Linker, Module, Store};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("WASM error: {0}")]
    WasmError(String),

    #[error("Guest export '{name}' ({role}) unusable: {reason}")]
    MissingExport {
        role: &'static str,
        name: String,
        reason: String,
    },

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Guest trapped: {0}")]
    Trap(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Link(#[from] LinkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Classify an error coming back out of a guest call. Host functions
    /// that abort with a [`BridgeError`] surface as `Bridge`, anything else
    /// the guest did is a `Trap`.
    pub(crate) fn from_trap(err: wasmtime::Error) -> Self {
        match err.downcast::<BridgeError>() {
            Ok(bridge) => RuntimeError::Bridge(bridge),
            Err(other) => RuntimeError::Trap(format!("{other:#}")),
        }
    }
}

/// Errors raised while crossing the host/guest boundary.
///
/// [`is_fatal`](Self::is_fatal) decides propagation: fatal errors trap the
/// guest and abort the current batch, the rest are reported and the single
/// registration or call fails.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Guest rejected registration of '{name}' (code {code})")]
    RegistrationRejected { name: String, code: i32 },

    #[error("Guest assigned function id {0} twice")]
    DuplicateId(u32),

    #[error("Guest assigned function id {0}, outside the supported range")]
    IdOutOfRange(i32),

    #[error("Unknown external function id {0}")]
    UnknownFunction(i32),

    #[error("Argument {position} of '{function}': registered as {expected}, frame has {found}")]
    TagMismatch {
        function: String,
        position: usize,
        expected: TypeTag,
        found: TypeTag,
    },

    #[error("'{function}' takes {expected} argument(s), frame has {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("Malformed call frame for '{function}': {source}")]
    Frame {
        function: String,
        #[source]
        source: AbiError,
    },

    #[error("Unsupported call to '{function}': {reason}")]
    UnsupportedShape { function: String, reason: String },

    #[error("Guest allocation of {slots} slots failed (returned {raw})")]
    AllocationFailed { slots: usize, raw: i32 },

    #[error("External function '{function}' failed: {message}")]
    Callback { function: String, message: String },

    #[error("Nested external call to function id {0}")]
    Reentrant(i32),

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error("Arena not attached to session")]
    NoArena,

    #[error("Guest call failed: {0}")]
    Guest(String),
}

impl BridgeError {
    /// Recover the bridge error carried by a trap out of a nested guest
    /// call such as the allocator.
    pub(crate) fn from_guest(err: wasmtime::Error) -> Self {
        match err.downcast::<BridgeError>() {
            Ok(bridge) => bridge,
            Err(other) => BridgeError::Guest(format!("{other:#}")),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BridgeError::RegistrationRejected { .. }
                | BridgeError::DuplicateId(_)
                | BridgeError::IdOutOfRange(_)
                | BridgeError::UnsupportedShape { .. }
                | BridgeError::Callback { .. }
        )
    }

    /// Status returned to the guest when a call fails without trapping.
    pub fn status_code(&self) -> i32 {
        match self {
            BridgeError::UnsupportedShape { .. } => STATUS_UNSUPPORTED,
            _ => STATUS_CALLBACK_FAILED,
        }
    }
}

/// The guest runtime
pub struct Runtime {
    engine: Engine,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            engine: Engine::default(),
        }
    }

    /// Load a guest interpreter module from bytes
    pub fn load_guest(&self, wasm_bytes: &[u8]) -> Result<GuestModule<'_>, RuntimeError> {
        let module = Module::new(&self.engine, wasm_bytes)
            .map_err(|e| RuntimeError::WasmError(format!("{e:#}")))?;
        Ok(GuestModule {
            module,
            engine: &self.engine,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled guest module, ready to be instantiated
pub struct GuestModule<'a> {
    module: Module,
    engine: &'a Engine,
}

impl<'a> GuestModule<'a> {
    /// Instantiate the guest with the standard host imports and boot it:
    /// banner, heap setup, initialize.
    pub fn instantiate(&self, config: &BridgeConfig, hooks: Hooks) -> Result<Guest, RuntimeError> {
        self.instantiate_with_host(config, hooks, |_| Ok(()))
    }

    /// Like [`instantiate`](Self::instantiate), with a hook to register
    /// additional imports or an error handler before the standard imports
    /// are linked.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let guest = module.instantiate_with_host(&config, hooks, |builder| {
    ///     builder.on_error(|err| eprintln!("{err}"));
    ///     builder.interface("debug")?
    ///         .func_raw("trace", |x: i32| println!("trace {x}"))?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn instantiate_with_host<F>(
        &self,
        config: &BridgeConfig,
        hooks: Hooks,
        configure: F,
    ) -> Result<Guest, RuntimeError>
    where
        F: FnOnce(&mut HostLinkerBuilder<'_, Session>) -> Result<(), LinkerError>,
    {
        config.validate()?;

        let mut store = Store::new(self.engine, Session::new(hooks));
        let arena = Arena::create(&mut store, config.heap_pages)?;
        store.data_mut().attach_arena(arena);

        let mut linker = Linker::new(self.engine);
        let mut builder = HostLinkerBuilder::new(self.engine, &mut linker);
        configure(&mut builder)?;
        link_host(&mut builder, &store, arena)?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| RuntimeError::WasmError(format!("{e:#}")))?;

        Guest::boot(store, instance, config.clone())
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }
}
