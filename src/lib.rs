//! nekohost: host runtime for the Neko Basic interpreter
//!
//! Runs the interpreter as a WebAssembly guest and lets host code expose
//! external functions that BASIC programs call like built-in statements.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               nekohost                  │
//! │                                         │
//! │  abi      - UTF-32 text, call frames,   │
//! │             function descriptors        │
//! │  runtime  - imports, registration,      │
//! │             dispatch, scheduling        │
//! │  console  - text grid, CLS / COLOR      │
//! │                                         │
//! ├─────────────────────────────────────────┤
//! │        WASM Execution (wasmtime)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let runtime = Runtime::new();
//! let module = runtime.load_guest(&std::fs::read("NekoBasic.wasm")?)?;
//! let hooks = Hooks::new().on_output(|c| print!("{}", char::from_u32(c).unwrap_or('?')));
//! let mut guest = module.instantiate(&BridgeConfig::default(), hooks)?;
//!
//! guest.register(ExternalFunction::procedure1("BEEP", |_, hz: i32| {
//!     tracing::info!(hz, "beep");
//!     Ok(())
//! }))?;
//! guest.set_source(0, "main.bas", "BEEP 440")?;
//!
//! Scheduler::new(guest).run().await?;
//! ```

pub mod abi;
pub mod config;
pub mod console;
pub mod runtime;

pub use abi::{TypeTag, Value};
pub use config::BridgeConfig;
pub use console::TextConsole;
pub use runtime::{
    BridgeError, CallCtx, ExternalFunction, FunctionProvider, Guest, Hooks, Runtime, RuntimeError,
    Scheduler,
};
