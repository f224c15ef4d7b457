//! Function name -> signatures, seeded with the runtime intrinsics.

use crate::ast::{FuncDecl, Program, Signature, Type, VarWithType};
use std::collections::BTreeMap;
use thiserror::Error;

/// Takes a single-word string reference rather than `(length, pointer)`.
pub const PRINT_STRING: &str = "PrintString";

/// Names the wasm backend imports instead of defining.
pub const INTRINSICS: [&str; 9] = [
    PRINT_STRING,
    "PrintInt",
    "PrintByteSlice",
    "len",
    "Write",
    "Open",
    "Read",
    "Create",
    "Close",
];

pub fn is_intrinsic(name: &str) -> bool {
    INTRINSICS.contains(&name)
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("undefined function `{0}`")]
    Undefined(String),
    #[error("`{name}` has {count} signatures; multiple dispatch is not supported")]
    Ambiguous { name: String, count: usize },
}

#[derive(Clone, Debug, Default)]
pub struct Callables {
    table: BTreeMap<String, Vec<Signature>>,
}

fn sig(name: &str, args: Vec<VarWithType>, returns: Vec<VarWithType>) -> Signature {
    Signature {
        name: name.to_string(),
        args,
        returns,
    }
}

impl Callables {
    pub fn with_intrinsics() -> Self {
        let int32 = Type::Sized {
            signed: true,
            bits: 32,
        };
        let bytes = Type::slice(Type::Byte);
        let v = VarWithType::new;
        let mut c = Callables::default();
        c.insert(sig(PRINT_STRING, vec![v("s", Type::Str)], vec![]));
        c.insert(sig("PrintInt", vec![v("n", Type::Int)], vec![]));
        c.insert(sig("PrintByteSlice", vec![v("b", bytes.clone())], vec![]));
        c.insert(sig(
            "len",
            vec![v("s", bytes.clone())],
            vec![v("", int32.clone())],
        ));
        c.insert(sig(
            "Write",
            vec![v("fd", int32.clone()), v("buf", bytes.clone())],
            vec![],
        ));
        c.insert(sig("Open", vec![v("name", Type::Str)], vec![v("", int32.clone())]));
        c.insert(sig(
            "Read",
            vec![v("fd", int32.clone()), v("buf", bytes)],
            vec![v("", int32.clone())],
        ));
        c.insert(sig("Create", vec![v("name", Type::Str)], vec![v("", int32.clone())]));
        c.insert(sig("Close", vec![v("fd", int32)], vec![]));
        c
    }

    /// Intrinsics plus every function the program declares.
    pub fn from_program(program: &Program) -> Self {
        let mut c = Self::with_intrinsics();
        for f in program.functions() {
            c.insert_decl(f);
        }
        c
    }

    pub fn insert(&mut self, signature: Signature) {
        self.table
            .entry(signature.name.clone())
            .or_default()
            .push(signature);
    }

    pub fn insert_decl(&mut self, decl: &FuncDecl) {
        self.insert(decl.signature());
    }

    pub fn get(&self, name: &str) -> &[Signature] {
        self.table.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single signature `name` refers to.
    pub fn resolve(&self, name: &str) -> Result<&Signature, ResolveError> {
        match self.get(name) {
            [] => Err(ResolveError::Undefined(name.to_string())),
            [one] => Ok(one),
            many => Err(ResolveError::Ambiguous {
                name: name.to_string(),
                count: many.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_resolve() {
        let c = Callables::with_intrinsics();
        for name in INTRINSICS {
            assert!(c.resolve(name).is_ok(), "{}", name);
        }
        assert_eq!(c.resolve("len").unwrap().returns.len(), 1);
    }

    #[test]
    fn unknown_and_overloaded_names_fail() {
        let mut c = Callables::with_intrinsics();
        assert_eq!(
            c.resolve("nope"),
            Err(ResolveError::Undefined("nope".to_string()))
        );
        c.insert(sig("PrintInt", vec![], vec![]));
        assert!(matches!(
            c.resolve("PrintInt"),
            Err(ResolveError::Ambiguous { count: 2, .. })
        ));
    }
}
