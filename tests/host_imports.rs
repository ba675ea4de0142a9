mod common;

use common::*;
use nekohost::abi::GuestPtr;
use nekohost::runtime::Hooks;
use nekohost::BridgeConfig;
use wasmtime::Val;

fn load_text(guest: &mut nekohost::Guest, name: &str, len: i32) -> i32 {
    let name_ptr = guest.alloc_string(name).unwrap();
    guest
        .call_raw("load_text", &[Val::I32(name_ptr.as_i32()), Val::I32(len)])
        .unwrap()[0]
        .unwrap_i32()
}

#[test]
fn boot_sets_up_heap_and_initializes() {
    let mut guest = boot(Hooks::new());

    let setup = guest.call_raw("heap_setup", &[]).unwrap();
    assert_eq!(setup[0].unwrap_i32(), 2048);
    assert_eq!(setup[1].unwrap_i32(), 2 * 65_536 - 2048);
    assert_eq!(call_i32(&mut guest, "initialized"), 1);
    assert_eq!(guest.memory_size(), 2 * 65_536);
}

#[test]
fn heap_setup_can_be_disabled() {
    let mut config = test_config();
    config.exports.setup_heap = None;
    let mut guest = boot_with(REFERENCE_GUEST, &config, Hooks::new());

    let setup = guest.call_raw("heap_setup", &[]).unwrap();
    assert_eq!(setup[0].unwrap_i32(), 0);
    assert_eq!(setup[1].unwrap_i32(), 0);
    assert_eq!(call_i32(&mut guest, "initialized"), 1);
}

#[test]
fn banner_is_flushed_at_boot() {
    let transcript = Transcript::default();
    let vsyncs = Counter::default();
    let tick = vsyncs.clone();
    let config = BridgeConfig {
        banner: Some("Neko Basic\nOK\n".into()),
        ..test_config()
    };

    boot_with(
        REFERENCE_GUEST,
        &config,
        transcript.hooks().on_vsync(move || tick.bump()),
    );

    assert_eq!(transcript.text(), "Neko Basic\nOK\n");
    assert_eq!(vsyncs.get(), 1);
}

#[test]
fn float_to_string_allocates_fixed_text() {
    let mut guest = boot(Hooks::new());

    let ptr = guest
        .call_raw("float_to_string", &[Val::F64(3.14159f64.to_bits()), Val::I32(2)])
        .unwrap()[0]
        .unwrap_i32();

    let ptr = GuestPtr::from_raw(ptr).unwrap();
    assert_eq!(guest.read_string(ptr, 4).unwrap(), "3.14");
    let terminator = guest
        .read_memory(GuestPtr::new(ptr.as_u32() + 16), 4)
        .unwrap();
    assert_eq!(terminator, vec![0; 4]);
}

#[test]
fn load_text_uses_the_loader() {
    let hooks = Hooks::new().on_load_text(|name| (name == "data.txt").then(|| "10 PRINT".into()));
    let mut guest = boot(hooks);

    let ptr = load_text(&mut guest, "data.txt", 8);
    assert_ne!(ptr, 0);
    let ptr = GuestPtr::from_raw(ptr).unwrap();
    assert_eq!(guest.read_string(ptr, 8).unwrap(), "10 PRINT");

    assert_eq!(load_text(&mut guest, "other.txt", 9), 0);
}

#[test]
fn load_text_without_loader_or_with_bad_length() {
    let mut guest = boot(Hooks::new());
    assert_eq!(load_text(&mut guest, "data.txt", 8), 0);

    let hooks = Hooks::new().on_load_text(|_| Some("x".into()));
    let mut guest = boot(hooks);
    assert_eq!(load_text(&mut guest, "data.txt", -1), 0);
}

#[test]
fn date_is_a_calendar_day() {
    let mut guest = boot(Hooks::new());
    let date = call_i32(&mut guest, "date");

    let (year, month, day) = (date / 10_000, date / 100 % 100, date % 100);
    assert!(year >= 2000, "{date}");
    assert!((1..=12).contains(&month), "{date}");
    assert!((1..=31).contains(&day), "{date}");
}

#[test]
fn math_round_rounds_half_up() {
    let mut guest = boot(Hooks::new());
    let mut round = |x: f64| {
        guest.call_raw("math_round", &[Val::F64(x.to_bits())]).unwrap()[0].unwrap_f64()
    };

    assert_eq!(round(2.5), 3.0);
    assert_eq!(round(-2.5), -2.0);
    assert_eq!(round(-2.6), -3.0);
}
