//! Host imports expected by the guest interpreter
//!
//! - `env.memory`: the arena
//! - `js`: console output and number formatting
//! - `core`: the external-function bridge, clock and text files
//! - `Math`: libm-style numeric functions

use super::dispatch::handle_external_call;
use super::{
    Arena, HostFunctionErrorKind, HostFunctionProvider, HostLinkerBuilder, LinkerError, Session,
};
use crate::abi::GuestPtr;
use chrono::{Datelike, Local, Timelike};
use tracing::debug;
use wasmtime::{AsContext, Caller};

/// Enough fractional digits to print any finite `f64` exactly.
const EXACT_FRACTION_DIGITS: usize = 1100;

/// Format like JavaScript's `Number.prototype.toFixed`.
///
/// `digits` is clamped to `0..=100`. Ties round away from zero, judged on the
/// exact binary value, and magnitudes of 1e21 or more fall back to exponent
/// form. Negative zero prints without a sign.
pub fn format_fixed(value: f64, digits: i32) -> String {
    let digits = digits.clamp(0, 100) as usize;
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value.abs() >= 1e21 {
        return format!("{value:e}").replacen('e', "e+", 1);
    }

    let exact = format!("{:.*}", EXACT_FRACTION_DIGITS, value.abs());
    let (int_part, fraction) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let mut number: Vec<u8> = int_part
        .bytes()
        .chain(fraction.bytes().take(digits))
        .collect();
    let mut int_len = int_part.len();

    if fraction.as_bytes().get(digits).is_some_and(|d| *d >= b'5') {
        let carried = number.iter_mut().rev().all(|d| {
            if *d == b'9' {
                *d = b'0';
                true
            } else {
                *d += 1;
                false
            }
        });
        if carried {
            number.insert(0, b'1');
            int_len += 1;
        }
    }

    let mut out = String::with_capacity(number.len() + 2);
    if value < 0.0 {
        out.push('-');
    }
    out.extend(number[..int_len].iter().map(|d| *d as char));
    if digits > 0 {
        out.push('.');
        out.extend(number[int_len..].iter().map(|d| *d as char));
    }
    out
}

/// Round half up, like JavaScript's `Math.round`.
pub fn js_round(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

/// Link the arena and every standard import.
pub fn link_host(
    builder: &mut HostLinkerBuilder<'_, Session>,
    store: impl AsContext<Data = Session>,
    arena: Arena,
) -> Result<(), LinkerError> {
    builder
        .define_memory(&store, "env", "memory", arena.memory())?
        .register_provider(&JsImports)?
        .register_provider(&CoreImports)?
        .register_provider(&MathImports)?;
    Ok(())
}

/// The `js` import module.
pub struct JsImports;

impl HostFunctionProvider<Session> for JsImports {
    fn register(&self, builder: &mut HostLinkerBuilder<'_, Session>) -> Result<(), LinkerError> {
        let mut js = builder.interface("js")?;
        let reporter = js.reporter();

        js.func_raw("putchar", |caller: Caller<'_, Session>, code_point: i32| {
            caller.data().hooks().put_char(code_point as u32);
        })?
        .func_raw("printDouble", |caller: Caller<'_, Session>, value: f64| {
            caller.data().hooks().put_str(&format_fixed(value, 6));
        })?
        .func_raw(
            "floatToString",
            move |mut caller: Caller<'_, Session>,
                  value: f64,
                  digits: i32|
                  -> wasmtime::Result<i32> {
                let allocator = caller.data().allocator()?;
                match allocator.write_string(&mut caller, &format_fixed(value, digits)) {
                    Ok(ptr) => Ok(ptr.as_i32()),
                    Err(err) => {
                        reporter.report(
                            "floatToString",
                            HostFunctionErrorKind::Allocation(err.to_string()),
                        );
                        Err(err.into())
                    }
                }
            },
        )?;
        Ok(())
    }
}

/// The `core` import module.
pub struct CoreImports;

impl HostFunctionProvider<Session> for CoreImports {
    fn register(&self, builder: &mut HostLinkerBuilder<'_, Session>) -> Result<(), LinkerError> {
        let mut core = builder.interface("core")?;
        let dispatch_reporter = core.reporter();
        let loader_reporter = core.reporter();

        core.func_raw(
            "extFunctionCall",
            move |caller: Caller<'_, Session>,
                  id: i32,
                  args: i32,
                  args_words: i32,
                  rets: i32,
                  rets_words: i32|
                  -> wasmtime::Result<i32> {
                handle_external_call(
                    caller,
                    &dispatch_reporter,
                    id,
                    args,
                    args_words,
                    rets,
                    rets_words,
                )
            },
        )?
        .func_raw("date", |_: Caller<'_, Session>| -> i32 {
            let now = Local::now();
            now.year() * 10_000 + now.month() as i32 * 100 + now.day() as i32
        })?
        .func_raw("time", |_: Caller<'_, Session>| -> i32 {
            let now = Local::now();
            (now.hour() * 10_000 + now.minute() * 100 + now.second()) as i32
        })?
        .func_raw(
            "loadTextFile",
            move |mut caller: Caller<'_, Session>, name: i32, len: i32| -> wasmtime::Result<i32> {
                let arena = caller.data().arena()?;
                let Ok(len) = usize::try_from(len) else {
                    loader_reporter.report(
                        "loadTextFile",
                        HostFunctionErrorKind::Decode(format!("negative name length {len}")),
                    );
                    return Ok(0);
                };
                let name = match arena.read_string(&caller, GuestPtr::new(name as u32), len) {
                    Ok(name) => name,
                    Err(err) => {
                        loader_reporter
                            .report("loadTextFile", HostFunctionErrorKind::Decode(err.to_string()));
                        return Ok(0);
                    }
                };

                let Some(text) = caller.data().hooks().load_text(&name) else {
                    debug!(%name, "text file not available");
                    return Ok(0);
                };
                let allocator = caller.data().allocator()?;
                let ptr = allocator.write_string(&mut caller, &text)?;
                debug!(%name, chars = text.chars().count(), "loaded text file");
                Ok(ptr.as_i32())
            },
        )?;
        Ok(())
    }
}

/// The `Math` import module.
pub struct MathImports;

impl HostFunctionProvider<Session> for MathImports {
    fn register(&self, builder: &mut HostLinkerBuilder<'_, Session>) -> Result<(), LinkerError> {
        let unary: [(&str, fn(f64) -> f64); 17] = [
            ("floor", f64::floor),
            ("round", js_round),
            ("ceil", f64::ceil),
            ("sqrt", f64::sqrt),
            ("exp", f64::exp),
            ("log", f64::ln),
            ("log10", f64::log10),
            ("log2", f64::log2),
            ("sin", f64::sin),
            ("cos", f64::cos),
            ("tan", f64::tan),
            ("asin", f64::asin),
            ("acos", f64::acos),
            ("atan", f64::atan),
            ("sinh", f64::sinh),
            ("cosh", f64::cosh),
            ("tanh", f64::tanh),
        ];

        let mut math = builder.interface("Math")?;
        for (name, f) in unary {
            math.func_raw(name, move |_: Caller<'_, Session>, x: f64| f(x))?;
        }
        math.func_raw("random", |_: Caller<'_, Session>| rand::random::<f64>())?
            .func_raw("pow", |_: Caller<'_, Session>, x: f64, y: f64| x.powf(y))?
            .func_raw("atan2", |_: Caller<'_, Session>, y: f64, x: f64| y.atan2(x))?
            .func_raw("isinf", |_: Caller<'_, Session>, x: f64| x.is_infinite() as i32)?
            .func_raw("isNan", |_: Caller<'_, Session>, x: f64| x.is_nan() as i32)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_formatting() {
        assert_eq!(format_fixed(3.14159, 2), "3.14");
        assert_eq!(format_fixed(2.0, 0), "2");
        assert_eq!(format_fixed(-1.5, 3), "-1.500");
        assert_eq!(format_fixed(1.0 / 3.0, 6), "0.333333");
    }

    #[test]
    fn fixed_formatting_rounds_ties_away_from_zero() {
        assert_eq!(format_fixed(0.5, 0), "1");
        assert_eq!(format_fixed(2.5, 0), "3");
        assert_eq!(format_fixed(-2.5, 0), "-3");
        assert_eq!(format_fixed(1.25, 1), "1.3");
        assert_eq!(format_fixed(0.125, 2), "0.13");
        assert_eq!(format_fixed(99.5, 0), "100");
        assert_eq!(format_fixed(9.96, 1), "10.0");
        // 1.005 is stored just below the tie
        assert_eq!(format_fixed(1.005, 2), "1.00");
        assert_eq!(format_fixed(-0.001, 2), "-0.00");
    }

    #[test]
    fn fixed_formatting_large_values_use_exponent_form() {
        assert_eq!(format_fixed(1e21, 2), "1e+21");
        assert_eq!(format_fixed(-1.5e22, 0), "-1.5e+22");
        assert_eq!(format_fixed(999_999_999_999_999_900_000.0, 0), "999999999999999868928");
    }

    #[test]
    fn fixed_formatting_edge_values() {
        assert_eq!(format_fixed(f64::NAN, 2), "NaN");
        assert_eq!(format_fixed(f64::INFINITY, 2), "Infinity");
        assert_eq!(format_fixed(f64::NEG_INFINITY, 2), "-Infinity");
        assert_eq!(format_fixed(-0.0, 1), "0.0");
        assert_eq!(format_fixed(7.25, -3), "7");
        assert_eq!(format_fixed(1.0, 1000).len(), 102);
    }

    #[test]
    fn round_half_up() {
        assert_eq!(js_round(2.5), 3.0);
        assert_eq!(js_round(-2.5), -2.0);
        assert_eq!(js_round(-2.6), -3.0);
        assert_eq!(js_round(0.49), 0.0);
        assert!(js_round(f64::NAN).is_nan());
        assert_eq!(js_round(f64::INFINITY), f64::INFINITY);
    }
}
