//! Virtual registers shared by HLIR and MLIR, and the metadata recorded for
//! each register that names storage.

use crate::ast::{Type, VarWithType};
use crate::layout::{TypeInfo, Word};
use std::collections::BTreeMap;
use std::fmt;

/// A virtual operand.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    IntLit(i64),
    /// Raw literal text, escapes preserved.
    StrLit(String),
    /// Stack-local slot, unique per function.
    Local(u32),
    /// Single-use scratch for compound expressions.
    Temp(u32),
    /// Positional function argument word.
    Param { id: u32, reference: bool },
    /// The function's own return word.
    RetSlot(u32),
    /// Word `ret` of the result of call number `call`.
    LastCallRet { call: u32, ret: u32 },
    /// Address of the inner register.
    Pointer(Box<Register>),
    /// Address of the first payload byte of the length-prefixed block the
    /// inner register points at.
    SliceBase(Box<Register>),
    /// Memory at `base + offset * scale`. `container` is the variable the
    /// base belongs to, which decides how the base is addressed.
    Offset {
        base: Box<Register>,
        offset: Box<Register>,
        scale: u32,
        container: VarWithType,
    },
}

impl Register {
    pub fn param(id: u32) -> Register {
        Register::Param {
            id,
            reference: false,
        }
    }

    pub fn pointer(inner: Register) -> Register {
        Register::Pointer(Box::new(inner))
    }

    pub fn slice_base(inner: Register) -> Register {
        Register::SliceBase(Box::new(inner))
    }

    pub fn offset(base: Register, offset: Register, scale: u32, container: VarWithType) -> Register {
        Register::Offset {
            base: Box::new(base),
            offset: Box::new(offset),
            scale,
            container,
        }
    }

    /// The register `n` words after this one in a multi-word value.
    ///
    /// Only registers with positional indices have neighbours; asking for the
    /// neighbour of anything else is a compiler bug.
    pub fn offset_by(&self, n: u32) -> Register {
        match self {
            Register::Local(i) => Register::Local(i + n),
            Register::Param { id, reference } => Register::Param {
                id: id + n,
                reference: *reference,
            },
            Register::RetSlot(i) => Register::RetSlot(i + n),
            Register::LastCallRet { call, ret } => Register::LastCallRet {
                call: *call,
                ret: ret + n,
            },
            other => panic!("register {:?} has no positional neighbours", other),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Register::IntLit(_) | Register::StrLit(_))
    }

    /// True for registers that name storage and therefore carry `RegisterInfo`.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Register::Local(_)
                | Register::Temp(_)
                | Register::Param { .. }
                | Register::RetSlot(_)
                | Register::LastCallRet { .. }
        )
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::IntLit(v) => write!(f, "{}", v),
            Register::StrLit(s) => write!(f, "\"{}\"", s),
            Register::Local(i) => write!(f, "LV{}", i),
            Register::Temp(i) => write!(f, "TV{}", i),
            Register::Param { id, reference: false } => write!(f, "P{}", id),
            Register::Param { id, reference: true } => write!(f, "P{}&", id),
            Register::RetSlot(i) => write!(f, "FR{}", i),
            Register::LastCallRet { call, ret } => write!(f, "LR{}.{}", call, ret),
            Register::Pointer(inner) => write!(f, "&{}", inner),
            Register::SliceBase(inner) => write!(f, "base({})", inner),
            Register::Offset {
                base,
                offset,
                scale,
                ..
            } => write!(f, "[{} + {}*{}]", base, offset, scale),
        }
    }
}

/// Metadata for a register that names storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterInfo {
    /// Source name, empty for synthetic registers.
    pub name: String,
    pub type_info: TypeInfo,
    /// Holds an address (string reference, slice base, reference parameter).
    pub pointer: bool,
    pub mutable: bool,
    /// Set on the length word of a slice stored inline as
    /// `(length, e0, e1, ...)`: how many element words follow.
    pub slice_capacity: Option<u32>,
    /// The source variable that caused this register to exist.
    pub creator: Option<VarWithType>,
    pub declared_type: Option<Type>,
}

impl RegisterInfo {
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_info,
            pointer: false,
            mutable: false,
            slice_capacity: None,
            creator: None,
            declared_type: None,
        }
    }

    pub fn from_word(name: impl Into<String>, word: Word) -> Self {
        Self {
            pointer: word.pointer,
            ..Self::new(name, word.info)
        }
    }

    pub fn with_creator(mut self, creator: &VarWithType) -> Self {
        self.declared_type = Some(creator.typ.clone());
        self.creator = Some(creator.clone());
        self
    }

    pub fn size(&self) -> u32 {
        self.type_info.size
    }

    pub fn signed(&self) -> bool {
        self.type_info.signed
    }
}

/// Register metadata for one function.
pub type RegisterData = BTreeMap<Register, RegisterInfo>;
