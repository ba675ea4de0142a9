//! Guest inspection - check a compiled module against the entry points and
//! imports the bridge expects, without running it

use super::{link_host, Arena, GuestModule, Hooks, HostLinkerBuilder, RuntimeError, Session};
use crate::config::BridgeConfig;
use serde::Serialize;
use wasmtime::{ExternType, FuncType, Linker, Store, ValType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportStatus {
    Present,
    Missing,
    SignatureMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportCheck {
    pub role: &'static str,
    pub name: String,
    pub required: bool,
    #[serde(flatten)]
    pub status: ExportStatus,
}

impl ExportCheck {
    pub fn is_satisfied(&self) -> bool {
        match self.status {
            ExportStatus::Present => true,
            ExportStatus::Missing => !self.required,
            ExportStatus::SignatureMismatch { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestReport {
    pub exports: Vec<ExportCheck>,
    /// Imports the host does not provide, as `module.name`
    pub unresolved_imports: Vec<String>,
    /// Whether the guest takes its memory from `env.memory`
    pub imports_memory: bool,
}

impl GuestReport {
    /// True when the guest can be instantiated and booted.
    pub fn is_compatible(&self) -> bool {
        self.imports_memory
            && self.unresolved_imports.is_empty()
            && self.exports.iter().all(ExportCheck::is_satisfied)
    }
}

const I32: ValType = ValType::I32;

type ExpectedExport = (&'static str, String, bool, Vec<ValType>, Vec<ValType>);

/// Expected exports as (role, name, required, params, results).
fn expected_exports(config: &BridgeConfig) -> Vec<ExpectedExport> {
    let names = &config.exports;
    let mut expected = vec![
        ("malloc", names.malloc.clone(), true, vec![I32], vec![I32]),
        ("initialize", names.initialize.clone(), true, vec![], vec![]),
        ("set_source", names.set_source.clone(), true, vec![I32, I32, I32], vec![I32]),
        ("execute_one_step", names.execute_one_step.clone(), true, vec![], vec![I32]),
        ("register_function", names.register_function.clone(), true, vec![I32], vec![I32]),
    ];
    if let Some(setup_heap) = &names.setup_heap {
        expected.push(("setup_heap", setup_heap.clone(), false, vec![I32, I32], vec![]));
    }
    expected
}

fn val_type_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
}

fn signature_string<'a>(
    params: impl Iterator<Item = &'a ValType>,
    results: impl Iterator<Item = &'a ValType>,
) -> String {
    let join = |types: Vec<&'static str>| types.join(", ");
    format!(
        "({}) -> ({})",
        join(params.map(val_type_name).collect()),
        join(results.map(val_type_name).collect())
    )
}

fn func_signature(ty: &FuncType) -> String {
    let params: Vec<ValType> = ty.params().collect();
    let results: Vec<ValType> = ty.results().collect();
    signature_string(params.iter(), results.iter())
}

fn check_export(
    module: &wasmtime::Module,
    (role, name, required, params, results): ExpectedExport,
) -> ExportCheck {
    let expected = signature_string(params.iter(), results.iter());
    let status = match module.get_export(&name) {
        None => ExportStatus::Missing,
        Some(ExternType::Func(ty)) => {
            let actual = func_signature(&ty);
            if actual == expected {
                ExportStatus::Present
            } else {
                ExportStatus::SignatureMismatch { expected, actual }
            }
        }
        Some(other) => ExportStatus::SignatureMismatch {
            expected,
            actual: match other {
                ExternType::Global(_) => "global",
                ExternType::Table(_) => "table",
                ExternType::Memory(_) => "memory",
                _ => "non-function",
            }
            .to_string(),
        },
    };
    ExportCheck {
        role,
        name,
        required,
        status,
    }
}

/// Report which entry points the guest exports and which of its imports the
/// host would leave unresolved.
pub fn inspect_guest(
    module: &GuestModule<'_>,
    config: &BridgeConfig,
) -> Result<GuestReport, RuntimeError> {
    let wasm = module.module();
    let exports = expected_exports(config)
        .into_iter()
        .map(|expected| check_export(wasm, expected))
        .collect();

    // Throwaway store, only used to resolve imports against the real host.
    let mut store = Store::new(module.engine(), Session::new(Hooks::default()));
    let arena = Arena::create(&mut store, 1)?;
    let mut linker = Linker::new(module.engine());
    let mut builder = HostLinkerBuilder::new(module.engine(), &mut linker);
    link_host(&mut builder, &store, arena)?;

    let mut unresolved_imports = Vec::new();
    let mut imports_memory = false;
    for import in wasm.imports() {
        if let ExternType::Memory(_) = import.ty() {
            imports_memory |= import.module() == "env" && import.name() == "memory";
        }
        if linker.get_by_import(&mut store, &import).is_none() {
            unresolved_imports.push(format!("{}.{}", import.module(), import.name()));
        }
    }

    Ok(GuestReport {
        exports,
        unresolved_imports,
        imports_memory,
    })
}
