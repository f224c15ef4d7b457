//! Runtime intrinsics, imported the first time a function calls them.

use crate::module::{FuncType, Import, ValType};
use crate::WasmError;
use lode_syntax::is_intrinsic;

/// Fixed wasm signature of a runtime intrinsic.
pub fn intrinsic_type(name: &str) -> Option<FuncType> {
    use ValType::I32;
    let (params, results) = match name {
        "PrintString" => (vec![I32], vec![]),
        "PrintInt" => (vec![I32], vec![]),
        "PrintByteSlice" => (vec![I32, I32], vec![]),
        "len" => (vec![I32, I32], vec![I32]),
        "Write" => (vec![I32, I32, I32], vec![]),
        "Open" => (vec![I32, I32], vec![I32]),
        "Read" => (vec![I32, I32, I32], vec![I32]),
        "Create" => (vec![I32, I32], vec![I32]),
        "Close" => (vec![I32], vec![]),
        _ => return None,
    };
    Some(FuncType::new(params, results))
}

#[derive(Debug)]
pub struct ImportTable {
    module: String,
    imports: Vec<Import>,
}

impl ImportTable {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            imports: Vec::new(),
        }
    }

    /// Signature of intrinsic `name`, importing it on first use.
    pub fn require(&mut self, name: &str) -> Result<FuncType, WasmError> {
        if let Some(i) = self.imports.iter().find(|i| i.name == name) {
            return Ok(i.ty.clone());
        }
        let ty = intrinsic_type(name)
            .filter(|_| is_intrinsic(name))
            .ok_or_else(|| WasmError::UnknownFunction(name.to_string()))?;
        self.imports.push(Import {
            module: self.module.clone(),
            name: name.to_string(),
            ty: ty.clone(),
        });
        Ok(ty)
    }

    pub fn into_imports(self) -> Vec<Import> {
        self.imports
    }
}
