//! Lowering passes: typed AST -> HLIR, and HLIR -> MLIR.

mod call;
mod expr;
mod to_hlir;
mod to_mlir;

#[cfg(test)]
mod tests;

pub use to_hlir::{build_function, HlirBuilder};
pub use to_mlir::lower_to_mlir;
