//! Wasm lowering for lode HLIR.
//!
//! Each function's locals are classified as wasm locals or linear-memory
//! slots in a bump-allocated frame; string literals go to an interned data
//! segment; runtime intrinsics are imported on first use. The result is a
//! [`WasmModule`] that renders to WAT text or encodes to a binary module.

mod classify;
mod data;
mod encode;
mod imports;
mod lower;
mod module;
mod wat;

pub use classify::{classify, for_each_register, Frame};
pub use data::DataSection;
pub use encode::encode;
pub use imports::{intrinsic_type, ImportTable};
pub use module::{
    DataSegment, FuncType, Function, Global, Import, Instr, Memory, NumOp, RelOp, ValType,
    WasmModule,
};
pub use wat::to_wat;

use lode_syntax::hlir;
use lode_syntax::{Register, RegisterInfo, TypeInformation};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

const PAGE_SIZE: u32 = 65536;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WasmError {
    #[error("call to unknown function `{0}`")]
    UnknownFunction(String),
    #[error("`{name}` takes {expected} argument words, got {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("register {0} has no metadata")]
    MissingRegister(String),
    #[error("no lowering for {0}")]
    Unsupported(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("wasm lowering of `{function}` failed: {error}")]
pub struct LowerError {
    pub function: String,
    pub error: WasmError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WasmOptions {
    /// Lower bound; the module grows it to fit the data segment.
    pub memory_pages: u32,
    pub import_module: String,
    pub export_memory: bool,
}

impl Default for WasmOptions {
    fn default() -> Self {
        Self {
            memory_pages: 1,
            import_module: "env".to_string(),
            export_memory: true,
        }
    }
}

/// Metadata of parameter word `id`, and whether it is passed by reference.
pub(crate) fn param_info(func: &hlir::Func, id: u32) -> Option<(bool, &RegisterInfo)> {
    [true, false].into_iter().find_map(|reference| {
        func.registers
            .get(&Register::Param { id, reference })
            .map(|info| (reference, info))
    })
}

/// Wasm signature of a user function: one param per word, a reference
/// param as an address, and multi-word results returned as the address of
/// the callee's return area.
pub fn func_type(func: &hlir::Func) -> Result<FuncType, WasmError> {
    let mut params = Vec::with_capacity(func.num_params as usize);
    for id in 0..func.num_params {
        let (reference, info) = param_info(func, id)
            .ok_or_else(|| WasmError::MissingRegister(Register::param(id).to_string()))?;
        params.push(if reference {
            ValType::I32
        } else {
            ValType::of_size(info.size())
        });
    }
    let results = match func.num_returns {
        0 => vec![],
        1 => {
            let info = func
                .registers
                .get(&Register::RetSlot(0))
                .ok_or_else(|| WasmError::MissingRegister(Register::RetSlot(0).to_string()))?;
            vec![ValType::of_size(info.size())]
        }
        _ => vec![ValType::I32],
    };
    Ok(FuncType::new(params, results))
}

/// Lowers every function of a module. Functions are exported under their
/// own names; intrinsics are imported from `opts.import_module`.
pub fn lower_module(
    funcs: &[hlir::Func],
    types: &TypeInformation,
    opts: &WasmOptions,
) -> Result<WasmModule, LowerError> {
    let mut sigs = BTreeMap::new();
    for f in funcs {
        let ty = func_type(f).map_err(|error| LowerError {
            function: f.name.clone(),
            error,
        })?;
        sigs.insert(f.name.clone(), ty);
    }

    let mut imports = ImportTable::new(opts.import_module.as_str());
    let mut data = DataSection::default();
    let mut lowered = Vec::with_capacity(funcs.len());
    let mut framed = false;
    for f in funcs {
        let frame = classify(f);
        framed |= !frame.is_empty();
        let func = lower::lower_function(f, frame, &sigs, types, &mut imports, &mut data)
            .map_err(|error| LowerError {
                function: f.name.clone(),
                error,
            })?;
        lowered.push(func);
    }

    let high_water = data.high_water();
    let uses_memory = framed
        || !data.is_empty()
        || lowered.iter().any(|f| {
            f.body
                .iter()
                .any(|i| matches!(i, Instr::Load { .. } | Instr::Store { .. }))
        });
    let memory = uses_memory.then(|| Memory {
        pages: opts
            .memory_pages
            .max(high_water.div_ceil(PAGE_SIZE))
            .max(1),
        export: opts.export_memory,
    });
    let global = framed.then_some(Global { init: high_water });

    let module = WasmModule {
        imports: imports.into_imports(),
        memory,
        data: data.into_segments(),
        global,
        funcs: lowered,
    };
    debug!(
        funcs = module.funcs.len(),
        imports = module.imports.len(),
        data_segments = module.data.len(),
        heap_base = high_water,
        memory = module.memory.is_some(),
        "lowered wasm module"
    );
    Ok(module)
}

impl WasmModule {
    pub fn to_wat(&self) -> String {
        wat::to_wat(self)
    }

    pub fn encode(&self) -> Result<Vec<u8>, WasmError> {
        encode::encode(self)
    }
}
