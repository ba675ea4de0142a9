//! A booted guest interpreter instance

use super::registry::register_function;
use super::{
    Arena, BridgeError, ExternalFunction, FunctionId, FunctionProvider, GuestAllocator, RunState,
    RuntimeError, Session,
};
use crate::abi::GuestPtr;
use crate::config::BridgeConfig;
use tracing::{debug, info, warn};
use wasmtime::{Instance, Store, TypedFunc, Val, WasmParams, WasmResults};

struct EntryPoints {
    initialize: TypedFunc<(), ()>,
    set_source: TypedFunc<(i32, i32, i32), i32>,
    execute_one_step: TypedFunc<(), i32>,
    register: TypedFunc<i32, i32>,
}

/// A guest instance together with its store and session.
pub struct Guest {
    store: Store<Session>,
    instance: Instance,
    entry: EntryPoints,
    config: BridgeConfig,
}

fn typed_export<P, R>(
    store: &mut Store<Session>,
    instance: &Instance,
    role: &'static str,
    name: &str,
) -> Result<TypedFunc<P, R>, RuntimeError>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| RuntimeError::MissingExport {
            role,
            name: name.to_string(),
            reason: format!("{e:#}"),
        })
}

impl Guest {
    /// Resolve the entry points, print the banner, set up the guest heap
    /// and run the guest's initializer.
    pub(crate) fn boot(
        mut store: Store<Session>,
        instance: Instance,
        config: BridgeConfig,
    ) -> Result<Self, RuntimeError> {
        let names = &config.exports;
        let malloc = typed_export::<i32, i32>(&mut store, &instance, "malloc", &names.malloc)?;
        let entry = EntryPoints {
            initialize: typed_export(&mut store, &instance, "initialize", &names.initialize)?,
            set_source: typed_export(&mut store, &instance, "set_source", &names.set_source)?,
            execute_one_step: typed_export(
                &mut store,
                &instance,
                "execute_one_step",
                &names.execute_one_step,
            )?,
            register: typed_export(
                &mut store,
                &instance,
                "register_function",
                &names.register_function,
            )?,
        };

        let arena = store.data().arena()?;
        store
            .data_mut()
            .attach_allocator(GuestAllocator::new(malloc, arena));

        if let Some(banner) = &config.banner {
            let hooks = store.data().hooks();
            hooks.put_str(banner);
            hooks.vsync();
        }

        setup_heap(&mut store, &instance, &config, arena)?;
        entry
            .initialize
            .call(&mut store, ())
            .map_err(RuntimeError::from_trap)?;
        info!(heap_pages = config.heap_pages, "guest initialized");

        Ok(Self {
            store,
            instance,
            entry,
            config,
        })
    }

    pub fn session(&self) -> &Session {
        self.store.data()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn run_state(&self) -> RunState {
        self.store.data().run_state()
    }

    pub fn set_run_state(&mut self, state: RunState) {
        self.store.data_mut().set_run_state(state);
    }

    /// Register one external function with the guest.
    pub fn register(&mut self, func: ExternalFunction) -> Result<FunctionId, BridgeError> {
        register_function(&mut self.store, &self.entry.register, func)
    }

    /// Register functions in order, stopping at the first error.
    /// Registrations made before the error stay in effect.
    pub fn register_all(
        &mut self,
        funcs: impl IntoIterator<Item = ExternalFunction>,
    ) -> Result<Vec<FunctionId>, BridgeError> {
        funcs.into_iter().map(|func| self.register(func)).collect()
    }

    /// Register every function of `provider`.
    pub fn install(
        &mut self,
        provider: &dyn FunctionProvider,
    ) -> Result<Vec<FunctionId>, BridgeError> {
        self.register_all(provider.external_functions())
    }

    /// Register every function of `provider`, skipping the ones the guest
    /// refuses. Only fatal errors are returned; a refused function is
    /// logged and left unavailable.
    pub fn install_available(
        &mut self,
        provider: &dyn FunctionProvider,
    ) -> Result<Vec<FunctionId>, BridgeError> {
        let mut ids = Vec::new();
        for func in provider.external_functions() {
            let name = func.name().to_string();
            match self.register(func) {
                Ok(id) => ids.push(id),
                Err(err) if !err.is_fatal() => {
                    warn!(function = %name, error = %err, "external function unavailable");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(ids)
    }

    /// Hand a program to the guest. On rejection the session is stopped
    /// and the vsync hook fires so any diagnostics get shown.
    pub fn set_source(
        &mut self,
        slot: i32,
        filename: &str,
        source: &str,
    ) -> Result<bool, RuntimeError> {
        let filename_ptr = self.alloc_string(filename)?;
        let source_ptr = self.alloc_string(source)?;
        let accepted = self
            .entry
            .set_source
            .call(
                &mut self.store,
                (slot, filename_ptr.as_i32(), source_ptr.as_i32()),
            )
            .map_err(RuntimeError::from_trap)?;

        if accepted == 0 {
            warn!(slot, filename, "guest rejected source");
            self.set_run_state(RunState::Stopped);
            self.store.data().hooks().vsync();
            return Ok(false);
        }
        debug!(slot, filename, chars = source.chars().count(), "source loaded");
        Ok(true)
    }

    /// Run one interpreter step. `Ok(false)` once the program has halted.
    pub fn execute_one_step(&mut self) -> Result<bool, RuntimeError> {
        let more = self
            .entry
            .execute_one_step
            .call(&mut self.store, ())
            .map_err(RuntimeError::from_trap)?;
        Ok(more != 0)
    }

    pub fn allocate(&mut self, slots: usize) -> Result<GuestPtr, BridgeError> {
        self.store
            .data()
            .allocator()?
            .allocate(&mut self.store, slots)
    }

    pub fn alloc_string(&mut self, text: &str) -> Result<GuestPtr, BridgeError> {
        self.store
            .data()
            .allocator()?
            .write_string(&mut self.store, text)
    }

    pub fn read_string(&self, ptr: GuestPtr, len: usize) -> Result<String, BridgeError> {
        self.arena()?.read_string(&self.store, ptr, len)
    }

    pub fn write_memory(&mut self, ptr: GuestPtr, bytes: &[u8]) -> Result<(), BridgeError> {
        self.arena()?.write(&mut self.store, ptr, bytes)
    }

    pub fn read_memory(&self, ptr: GuestPtr, len: usize) -> Result<Vec<u8>, BridgeError> {
        self.arena()?.read(&self.store, ptr, len)
    }

    /// Arena size in bytes.
    pub fn memory_size(&self) -> usize {
        self.arena().map_or(0, |arena| arena.size(&self.store))
    }

    /// Call any guest export by name with untyped values.
    pub fn call_raw(&mut self, name: &str, params: &[Val]) -> Result<Vec<Val>, RuntimeError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| RuntimeError::FunctionNotFound(name.to_string()))?;
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];
        func.call(&mut self.store, params, &mut results)
            .map_err(RuntimeError::from_trap)?;
        Ok(results)
    }

    fn arena(&self) -> Result<Arena, BridgeError> {
        self.store.data().arena()
    }
}

/// Call the guest's heap setup with the region between `__heap_base` and
/// the end of the arena. Skipped when either export is absent.
fn setup_heap(
    store: &mut Store<Session>,
    instance: &Instance,
    config: &BridgeConfig,
    arena: Arena,
) -> Result<(), RuntimeError> {
    let Some(name) = &config.exports.setup_heap else {
        return Ok(());
    };
    if instance.get_func(&mut *store, name).is_none() {
        debug!(export = %name, "guest has no heap setup");
        return Ok(());
    }
    let Some(Val::I32(base)) = instance
        .get_global(&mut *store, &config.exports.heap_base)
        .map(|global| global.get(&mut *store))
    else {
        debug!(global = %config.exports.heap_base, "guest exports no heap base");
        return Ok(());
    };

    let setup = typed_export::<(i32, i32), ()>(store, instance, "setup_heap", name)?;
    let size = arena.size(&*store).saturating_sub(base as u32 as usize);
    debug!(base, size, "setting up guest heap");
    setup
        .call(&mut *store, (base, size as u32 as i32))
        .map_err(RuntimeError::from_trap)
}
