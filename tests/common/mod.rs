//! Shared fixtures: a tiny reference guest written in WAT.
//!
//! The guest speaks the interpreter ABI without interpreting anything. Its
//! "program" is the UTF-32 source text itself, one character per step:
//!
//! - `0` halts
//! - `!` calls external function 1 with empty frames
//! - `?` calls external function 99, which is never registered
//! - anything else goes to `js.putchar`
//!
//! `malloc` is a bump allocator from offset 1024, 8-byte aligned, that
//! returns 0 once memory is exhausted. Registration hands out ids 1 to 15
//! and then answers 0.

#![allow(dead_code)]

use nekohost::abi::GuestPtr;
use nekohost::runtime::{Hooks, Runtime};
use nekohost::{BridgeConfig, Guest};
use std::sync::{Arc, Mutex};
use wasmtime::Val;

pub const REFERENCE_GUEST: &str = r#"
(module
  (import "env" "memory" (memory 1))
  (import "js" "putchar" (func $putchar (param i32)))
  (import "js" "floatToString" (func $float_to_string (param f64 i32) (result i32)))
  (import "core" "extFunctionCall" (func $ext (param i32 i32 i32 i32 i32) (result i32)))
  (import "core" "loadTextFile" (func $load_text (param i32 i32) (result i32)))
  (import "core" "date" (func $date (result i32)))
  (import "Math" "round" (func $round (param f64) (result f64)))

  (global $heap (mut i32) (i32.const 1024))
  (global $next_id (mut i32) (i32.const 1))
  (global $cursor (mut i32) (i32.const 0))
  (global $last_status (mut i32) (i32.const 0))
  (global $last_desc (mut i32) (i32.const 0))
  (global $initialized (mut i32) (i32.const 0))
  (global $setup_base (mut i32) (i32.const 0))
  (global $setup_size (mut i32) (i32.const 0))
  (global (export "__heap_base") i32 (i32.const 2048))

  (func (export "NekoBasicMalloc") (param $slots i32) (result i32)
    (local $ptr i32)
    (local $end i32)
    (local.set $ptr (global.get $heap))
    (local.set $end
      (i32.and
        (i32.add
          (i32.add (local.get $ptr) (i32.shl (local.get $slots) (i32.const 2)))
          (i32.const 7))
        (i32.const -8)))
    (if (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
      (then (return (i32.const 0))))
    (global.set $heap (local.get $end))
    (local.get $ptr))

  (func (export "_Z9setupHeapPvm") (param $base i32) (param $size i32)
    (global.set $setup_base (local.get $base))
    (global.set $setup_size (local.get $size)))

  (func (export "NekoBasicInitialize")
    (global.set $initialized (i32.const 1)))

  (func (export "NekoBasicRegisterExtFunction") (param $desc i32) (result i32)
    (local $id i32)
    (global.set $last_desc (local.get $desc))
    (if (i32.ge_u (global.get $next_id) (i32.const 16))
      (then (return (i32.const 0))))
    (local.set $id (global.get $next_id))
    (global.set $next_id (i32.add (local.get $id) (i32.const 1)))
    (local.get $id))

  (func (export "NekoBasicSetSource") (param $slot i32) (param $file i32) (param $src i32) (result i32)
    (if (i32.gt_u (local.get $slot) (i32.const 3))
      (then (return (i32.const 0))))
    (global.set $cursor (local.get $src))
    (i32.const 1))

  (func (export "NekoBasicExecuteOneStep") (result i32)
    (local $c i32)
    (if (i32.eqz (global.get $cursor))
      (then (return (i32.const 0))))
    (local.set $c (i32.load (global.get $cursor)))
    (if (i32.eqz (local.get $c))
      (then (return (i32.const 0))))
    (global.set $cursor (i32.add (global.get $cursor) (i32.const 4)))
    (if (i32.eq (local.get $c) (i32.const 33))
      (then
        (global.set $last_status
          (call $ext (i32.const 1) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))
        (return (i32.const 1))))
    (if (i32.eq (local.get $c) (i32.const 63))
      (then
        (global.set $last_status
          (call $ext (i32.const 99) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))
        (return (i32.const 1))))
    (call $putchar (local.get $c))
    (i32.const 1))

  (func (export "call_ext") (param i32 i32 i32 i32 i32) (result i32)
    (call $ext (local.get 0) (local.get 1) (local.get 2) (local.get 3) (local.get 4)))

  (func (export "float_to_string") (param f64 i32) (result i32)
    (call $float_to_string (local.get 0) (local.get 1)))

  (func (export "load_text") (param i32 i32) (result i32)
    (call $load_text (local.get 0) (local.get 1)))

  (func (export "date") (result i32)
    (call $date))

  (func (export "math_round") (param f64) (result f64)
    (call $round (local.get 0)))

  (func (export "last_status") (result i32) (global.get $last_status))
  (func (export "last_descriptor") (result i32) (global.get $last_desc))
  (func (export "initialized") (result i32) (global.get $initialized))
  (func (export "heap_setup") (result i32 i32)
    (global.get $setup_base)
    (global.get $setup_size))
)
"#;

/// Two pages of arena, no banner and no pause between batches.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        heap_pages: 2,
        frame_interval_ms: 0,
        banner: None,
        ..BridgeConfig::default()
    }
}

pub fn guest_bytes(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("parse WAT")
}

pub fn boot_with(wat: &str, config: &BridgeConfig, hooks: Hooks) -> Guest {
    let runtime = Runtime::new();
    let module = runtime.load_guest(&guest_bytes(wat)).expect("load guest");
    module.instantiate(config, hooks).expect("instantiate guest")
}

pub fn boot(hooks: Hooks) -> Guest {
    boot_with(REFERENCE_GUEST, &test_config(), hooks)
}

/// Records every code point written to the output sink.
#[derive(Clone, Default)]
pub struct Transcript(Arc<Mutex<String>>);

impl Transcript {
    pub fn hooks(&self) -> Hooks {
        let sink = self.clone();
        Hooks::new().on_output(move |c| {
            sink.0
                .lock()
                .unwrap()
                .push(char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
        })
    }

    pub fn text(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

/// Counts invocations of a hook.
#[derive(Clone, Default)]
pub struct Counter(Arc<Mutex<usize>>);

impl Counter {
    pub fn bump(&self) {
        *self.0.lock().unwrap() += 1;
    }

    pub fn get(&self) -> usize {
        *self.0.lock().unwrap()
    }
}

/// Write a call frame of 64-bit words into freshly allocated guest memory.
pub fn write_frame(guest: &mut Guest, words: &[i64]) -> GuestPtr {
    let ptr = guest.allocate(words.len() * 2).expect("allocate frame");
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    guest.write_memory(ptr, &bytes).expect("write frame");
    ptr
}

/// Call `core.extFunctionCall` through the guest's `call_ext` export.
pub fn call_ext(
    guest: &mut Guest,
    id: i32,
    args: GuestPtr,
    args_words: usize,
    rets: GuestPtr,
    rets_words: usize,
) -> Result<i32, nekohost::RuntimeError> {
    let results = guest.call_raw(
        "call_ext",
        &[
            Val::I32(id),
            Val::I32(args.as_i32()),
            Val::I32(args_words as i32),
            Val::I32(rets.as_i32()),
            Val::I32(rets_words as i32),
        ],
    )?;
    Ok(results[0].unwrap_i32())
}

pub fn call_i32(guest: &mut Guest, name: &str) -> i32 {
    guest.call_raw(name, &[]).expect("call export")[0].unwrap_i32()
}
