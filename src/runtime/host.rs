//! Host Function Registration API
//!
//! Builder for the imports the guest links against, grouped by interface
//! (the wasm import module name).
//!
//! # Example
//!
//! ```ignore
//! let guest = module.instantiate_with_host(&config, hooks, |builder| {
//!     builder.interface("debug")?
//!         .func_raw("trace", |caller: Caller<'_, Session>, x: i32| {
//!             tracing::debug!(x, "guest trace");
//!         })?;
//!     Ok(())
//! })?;
//! ```

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;
use wasmtime::{AsContext, Engine, Linker, Memory};

// ============================================================================
// Error Handling Infrastructure
// ============================================================================

/// Error that occurred inside a host import without trapping the guest.
#[derive(Debug, Clone)]
pub struct HostFunctionError {
    /// The import module name (e.g., "core")
    pub interface: String,
    /// The function name (e.g., "extFunctionCall")
    pub function: String,
    pub kind: HostFunctionErrorKind,
}

impl fmt::Display for HostFunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host function error in {}::{}: {}",
            self.interface, self.function, self.kind
        )
    }
}

impl std::error::Error for HostFunctionError {}

#[derive(Debug, Clone)]
pub enum HostFunctionErrorKind {
    /// Failed to read text or a frame from guest memory
    Decode(String),
    /// An external call was refused without trapping
    Dispatch(String),
    /// Guest allocation for a result failed
    Allocation(String),
    /// A registered callback reported failure
    Callback(String),
}

impl fmt::Display for HostFunctionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode failed: {}", e),
            Self::Dispatch(e) => write!(f, "dispatch refused: {}", e),
            Self::Allocation(e) => write!(f, "allocation failed: {}", e),
            Self::Callback(e) => write!(f, "callback failed: {}", e),
        }
    }
}

/// Handler for host function errors.
///
/// Called for every failure a host import absorbs, for logging or metrics.
pub type ErrorHandler = Arc<dyn Fn(&HostFunctionError) + Send + Sync>;

fn default_error_handler(err: &HostFunctionError) {
    error!(
        interface = %err.interface,
        function = %err.function,
        "{}",
        err.kind
    );
}

/// Reports errors on behalf of one interface.
///
/// Cloned into host closures, which outlive the builder.
#[derive(Clone)]
pub struct ErrorReporter {
    interface: String,
    handler: Option<ErrorHandler>,
}

impl ErrorReporter {
    pub fn report(&self, function: &str, kind: HostFunctionErrorKind) {
        let error = HostFunctionError {
            interface: self.interface.clone(),
            function: function.to_string(),
            kind,
        };
        match &self.handler {
            Some(handler) => handler(&error),
            None => default_error_handler(&error),
        }
    }
}

/// Errors from linker operations
#[derive(Error, Debug)]
pub enum LinkerError {
    #[error("Function registration failed: {0}")]
    FunctionRegistration(String),

    #[error("Memory error: {0}")]
    MemoryError(String),
}

/// Builder for registering host functions with a Linker.
///
/// Generic over `T` which is the store data type.
pub struct HostLinkerBuilder<'a, T> {
    linker: &'a mut Linker<T>,
    engine: &'a Engine,
    error_handler: Option<ErrorHandler>,
}

impl<'a, T> HostLinkerBuilder<'a, T> {
    pub fn new(engine: &'a Engine, linker: &'a mut Linker<T>) -> Self {
        Self {
            linker,
            engine,
            error_handler: None,
        }
    }

    /// Set a custom error handler for host function errors.
    ///
    /// Applies to interfaces started after this call.
    ///
    /// # Example
    ///
    /// ```ignore
    /// builder.on_error(|err| {
    ///     tracing::warn!("host function error: {}", err);
    /// });
    /// ```
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&HostFunctionError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Start defining functions of the import module `name`.
    pub fn interface(&mut self, name: &str) -> Result<InterfaceBuilder<'_, 'a, T>, LinkerError> {
        if name.is_empty() {
            return Err(LinkerError::FunctionRegistration(
                "interface name must not be empty".into(),
            ));
        }
        let error_handler = self.error_handler.clone();
        Ok(InterfaceBuilder {
            linker: self,
            module_name: name.to_string(),
            error_handler,
        })
    }

    /// Register a provider's functions.
    pub fn register_provider<P: HostFunctionProvider<T>>(
        &mut self,
        provider: &P,
    ) -> Result<&mut Self, LinkerError> {
        provider.register(self)?;
        Ok(self)
    }

    /// Provide a host-created memory as the import `module.name`.
    pub fn define_memory(
        &mut self,
        store: impl AsContext<Data = T>,
        module: &str,
        name: &str,
        memory: Memory,
    ) -> Result<&mut Self, LinkerError> {
        self.linker
            .define(&store, module, name, memory)
            .map_err(|e| LinkerError::MemoryError(e.to_string()))?;
        Ok(self)
    }

    /// Get the underlying wasmtime Linker for advanced operations
    pub fn inner(&mut self) -> &mut Linker<T> {
        self.linker
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }
}

/// Builder for registering functions within one import module.
pub struct InterfaceBuilder<'a, 'b, T> {
    linker: &'a mut HostLinkerBuilder<'b, T>,
    module_name: String,
    error_handler: Option<ErrorHandler>,
}

impl<'a, 'b, T: 'static> InterfaceBuilder<'a, 'b, T> {
    /// Register a host function with direct WASM-level parameters.
    ///
    /// # Example
    ///
    /// ```ignore
    /// interface.func_raw("putchar", |caller: Caller<'_, Session>, c: i32| {
    ///     caller.data().hooks().put_char(c as u32);
    /// })?;
    /// ```
    pub fn func_raw<Params, Results>(
        &mut self,
        name: &str,
        func: impl wasmtime::IntoFunc<T, Params, Results>,
    ) -> Result<&mut Self, LinkerError> {
        self.linker
            .linker
            .func_wrap(&self.module_name, name, func)
            .map_err(|e| LinkerError::FunctionRegistration(e.to_string()))?;
        Ok(self)
    }

    /// Get the module/interface name
    pub fn name(&self) -> &str {
        &self.module_name
    }

    /// An error reporter for functions of this interface.
    pub fn reporter(&self) -> ErrorReporter {
        ErrorReporter {
            interface: self.module_name.clone(),
            handler: self.error_handler.clone(),
        }
    }
}

/// Trait for types that provide host functions.
///
/// # Example
///
/// ```ignore
/// struct TraceProvider;
///
/// impl HostFunctionProvider<Session> for TraceProvider {
///     fn register(&self, builder: &mut HostLinkerBuilder<'_, Session>) -> Result<(), LinkerError> {
///         builder.interface("debug")?
///             .func_raw("trace", |_: Caller<'_, Session>, x: i32| tracing::debug!(x))?;
///         Ok(())
///     }
/// }
/// ```
pub trait HostFunctionProvider<T> {
    fn register(&self, builder: &mut HostLinkerBuilder<'_, T>) -> Result<(), LinkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wasmtime::{Caller, MemoryType, Store};

    #[test]
    fn test_interface_builder_creation() {
        let engine = Engine::default();
        let mut linker = Linker::<()>::new(&engine);
        let mut builder = HostLinkerBuilder::new(&engine, &mut linker);

        assert!(builder.interface("js").is_ok());
        assert!(builder.interface("Math").is_ok());
        assert!(builder.interface("").is_err());
    }

    #[test]
    fn test_func_raw_registration() -> Result<(), LinkerError> {
        let engine = Engine::default();
        let mut linker = Linker::<()>::new(&engine);
        let mut builder = HostLinkerBuilder::new(&engine, &mut linker);

        builder
            .interface("test")?
            .func_raw("add", |_caller: Caller<'_, ()>, a: i32, b: i32| a + b)?;

        // Same name twice is a registration error
        assert!(builder
            .interface("test")?
            .func_raw("add", |_caller: Caller<'_, ()>, a: i32| a)
            .is_err());
        Ok(())
    }

    struct TestProvider;

    impl HostFunctionProvider<()> for TestProvider {
        fn register(&self, builder: &mut HostLinkerBuilder<'_, ()>) -> Result<(), LinkerError> {
            builder
                .interface("test")?
                .func_raw("noop", |_: Caller<'_, ()>| {})?;
            Ok(())
        }
    }

    #[test]
    fn test_provider_registration() {
        let engine = Engine::default();
        let mut linker = Linker::<()>::new(&engine);
        let mut builder = HostLinkerBuilder::new(&engine, &mut linker);

        let result = builder.register_provider(&TestProvider);
        assert!(result.is_ok());
    }

    #[test]
    fn test_define_memory() {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, Some(2))).unwrap();
        let mut linker = Linker::<()>::new(&engine);
        let mut builder = HostLinkerBuilder::new(&engine, &mut linker);

        assert!(builder.define_memory(&store, "env", "memory", memory).is_ok());
        assert!(linker.get(&mut store, "env", "memory").is_some());
    }

    #[test]
    fn test_reporter_uses_custom_handler() {
        let engine = Engine::default();
        let mut linker = Linker::<()>::new(&engine);
        let mut builder = HostLinkerBuilder::new(&engine, &mut linker);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        builder.on_error(move |err| sink.lock().unwrap().push(err.to_string()));

        let reporter = builder.interface("core").unwrap().reporter();
        reporter.report(
            "loadTextFile",
            HostFunctionErrorKind::Decode("bad slot".into()),
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["host function error in core::loadTextFile: decode failed: bad slot"]
        );
    }
}
