//! Lode syntax: the typed AST handed over by the frontend, type layout,
//! callables, the register model and both IRs (HLIR, MLIR).

pub mod ast;
pub mod callables;
pub mod diagnostics;
pub mod hlir;
pub mod layout;
pub mod mlir;
pub mod register;
pub mod span;

pub use ast::*;
pub use callables::{is_intrinsic, Callables, ResolveError, INTRINSICS, PRINT_STRING};
pub use diagnostics::*;
pub use layout::{string_byte_len, unescape, LayoutError, TypeInfo, TypeInformation, Word};
pub use register::{Register, RegisterData, RegisterInfo};
pub use span::*;
