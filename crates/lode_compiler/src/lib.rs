//! lode compiler: typed AST -> HLIR -> MLIR, and the pipeline that hands
//! HLIR to the wasm backend.

mod context;
mod enums;
pub mod error;
mod lower;

pub use context::{ContextStore, VarKey};
pub use enums::{enum_table, register_enum};
pub use error::{CompileError, ErrorKind, Stage};
pub use lower::{build_function, lower_to_mlir, HlirBuilder};

use lode_codegen_wasm::{lower_module, WasmModule, WasmOptions};
use lode_config::{Manifest, WasmConfig};
use lode_syntax::ast::Program;
use lode_syntax::hlir::{self, EnumMap};
use lode_syntax::{mlir, Callables, TypeInfo, TypeInformation};
use tracing::{debug, info};

/// Which outputs to produce beyond HLIR.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub mlir: bool,
    pub wasm: Option<WasmOptions>,
}

impl CompileOptions {
    pub fn all() -> Self {
        Self {
            mlir: true,
            wasm: Some(WasmOptions::default()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompiledModule {
    /// In declaration order.
    pub hlir: Vec<hlir::Func>,
    pub mlir: Vec<mlir::Func>,
    pub wasm: Option<WasmModule>,
    /// Constructor table after every function was built.
    pub enums: EnumMap,
}

impl CompiledModule {
    pub fn hlir_text(&self) -> String {
        self.hlir.iter().map(|f| format!("{}\n", f)).collect()
    }

    pub fn mlir_text(&self) -> String {
        self.mlir.iter().map(|f| format!("{}\n", f)).collect()
    }
}

/// Runs the pipeline over a whole program. The first failing function aborts
/// compilation.
pub fn compile_program(
    program: &Program,
    types: &TypeInformation,
    opts: &CompileOptions,
) -> Result<CompiledModule, CompileError> {
    let mut enums = enum_table(program);
    let callables = Callables::from_program(program);
    debug!(
        enums = enums.len(),
        functions = program.functions().count(),
        "compiling program"
    );

    let mut funcs = Vec::new();
    for decl in program.functions() {
        let (func, discovered) = build_function(decl, types, &callables, &enums)?;
        enums.merge(&discovered);
        funcs.push(func);
    }

    let mut lowered = Vec::new();
    if opts.mlir {
        for f in &funcs {
            lowered.push(lower_to_mlir(f, &callables, types)?);
        }
    }

    let wasm = match &opts.wasm {
        Some(wasm_opts) => Some(lower_module(&funcs, types, wasm_opts).map_err(|e| {
            CompileError::new(&e.function, Stage::Wasm, ErrorKind::Wasm(e.error))
        })?),
        None => None,
    };

    info!(functions = funcs.len(), "compiled program");
    Ok(CompiledModule {
        hlir: funcs,
        mlir: lowered,
        wasm,
        enums,
    })
}

/// Default layouts with the manifest's `[types]` overrides applied.
pub fn type_information(manifest: &Manifest) -> TypeInformation {
    let mut types = TypeInformation::default();
    for (name, o) in &manifest.types {
        types.insert(name.as_str(), TypeInfo::new(o.size, o.signed));
    }
    types
}

pub fn wasm_options(config: &WasmConfig) -> WasmOptions {
    WasmOptions {
        memory_pages: config.memory_pages,
        import_module: config.import_module.clone(),
        export_memory: config.export_memory,
    }
}
