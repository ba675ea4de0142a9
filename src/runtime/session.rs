//! Per-session host state
//!
//! A [`Session`] is the data of the wasmtime store, so every host import
//! reaches it through its `Caller`. It owns the function table; nothing in
//! the bridge is global.

use super::{Arena, BridgeError, FunctionTable, GuestAllocator};
use std::sync::Arc;
use tracing::debug;

/// Receives guest output one code point at a time.
pub type OutputSink = Arc<dyn Fn(u32) + Send + Sync>;
/// Called before every scheduler batch and after the guest halts.
pub type VsyncHook = Arc<dyn Fn() + Send + Sync>;
/// Called when the run state changes.
pub type StateChangeHook = Arc<dyn Fn(RunState) + Send + Sync>;
/// Resolves a file name requested by the guest to its text.
pub type TextLoader = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
}

/// Host callbacks for a session. All of them are optional.
#[derive(Clone, Default)]
pub struct Hooks {
    output: Option<OutputSink>,
    vsync: Option<VsyncHook>,
    state_change: Option<StateChangeHook>,
    load_text: Option<TextLoader>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_output(mut self, sink: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.output = Some(Arc::new(sink));
        self
    }

    pub fn on_vsync(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.vsync = Some(Arc::new(hook));
        self
    }

    pub fn on_state_change(mut self, hook: impl Fn(RunState) + Send + Sync + 'static) -> Self {
        self.state_change = Some(Arc::new(hook));
        self
    }

    pub fn on_load_text(
        mut self,
        loader: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.load_text = Some(Arc::new(loader));
        self
    }

    pub fn put_char(&self, code_point: u32) {
        if let Some(sink) = &self.output {
            sink(code_point);
        }
    }

    pub fn put_str(&self, text: &str) {
        if let Some(sink) = &self.output {
            for ch in text.chars() {
                sink(ch as u32);
            }
        }
    }

    pub fn vsync(&self) {
        if let Some(hook) = &self.vsync {
            hook();
        }
    }

    pub fn load_text(&self, name: &str) -> Option<String> {
        self.load_text.as_ref().and_then(|loader| loader(name))
    }

    fn state_changed(&self, state: RunState) {
        if let Some(hook) = &self.state_change {
            hook(state);
        }
    }
}

/// Store data shared by every host import of one guest instance.
pub struct Session {
    pub(crate) table: FunctionTable,
    pub(crate) hooks: Hooks,
    pub(crate) in_external_call: bool,
    arena: Option<Arena>,
    allocator: Option<GuestAllocator>,
    state: RunState,
}

impl Session {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            table: FunctionTable::new(),
            hooks,
            in_external_call: false,
            arena: None,
            allocator: None,
            state: RunState::Stopped,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.table
    }

    pub fn run_state(&self) -> RunState {
        self.state
    }

    /// Update the run state, notifying the hook only on a transition.
    pub(crate) fn set_run_state(&mut self, state: RunState) {
        if self.state != state {
            debug!(?state, "run state changed");
            self.hooks.state_changed(state);
            self.state = state;
        }
    }

    pub(crate) fn attach_arena(&mut self, arena: Arena) {
        self.arena = Some(arena);
    }

    pub(crate) fn attach_allocator(&mut self, allocator: GuestAllocator) {
        self.allocator = Some(allocator);
    }

    pub fn arena(&self) -> Result<Arena, BridgeError> {
        self.arena.ok_or(BridgeError::NoArena)
    }

    pub fn allocator(&self) -> Result<GuestAllocator, BridgeError> {
        self.allocator
            .clone()
            .ok_or_else(|| BridgeError::Guest("guest allocator not resolved".into()))
    }
}
