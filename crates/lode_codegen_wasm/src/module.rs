//! In-memory wasm module: what lowering produces and what the WAT renderer
//! and binary encoder consume.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValType {
    I32,
    I64,
}

impl ValType {
    /// Values wider than four bytes need 64-bit locals.
    pub fn of_size(bytes: u32) -> ValType {
        if bytes > 4 {
            ValType::I64
        } else {
            ValType::I32
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    LtS,
    LtU,
    LeS,
    LeU,
    GtS,
    GtU,
    GeS,
    GeU,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    I32Const(i32),
    I64Const(i64),
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    Num(ValType, NumOp),
    Rel(ValType, RelOp),
    I32Eqz,
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    /// Loads `bytes` bytes into a value of type `ty`.
    Load {
        ty: ValType,
        bytes: u32,
        signed: bool,
        offset: u32,
    },
    /// Stores the low `bytes` bytes of a `ty` value.
    Store {
        ty: ValType,
        bytes: u32,
        offset: u32,
    },
    /// Resolved to an index at encode time; imports come first.
    Call(String),
    /// Tail call: the current activation is gone before the callee runs.
    ReturnCall(String),
    Return,
    Unreachable,
    Drop,
    Block,
    Loop,
    If,
    Else,
    End,
    Br(u32),
    BrIf(u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
        Self { params, results }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub ty: FuncType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Memory {
    pub pages: u32,
    pub export: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSegment {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// The mutable i32 heap pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Global {
    pub init: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub ty: FuncType,
    /// Declared locals after the params.
    pub locals: Vec<ValType>,
    /// Without the closing `end`.
    pub body: Vec<Instr>,
    pub export: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WasmModule {
    pub imports: Vec<Import>,
    pub memory: Option<Memory>,
    pub data: Vec<DataSegment>,
    pub global: Option<Global>,
    pub funcs: Vec<Function>,
}

impl WasmModule {
    /// Index in the function index space: imports, then defined functions.
    pub fn func_index(&self, name: &str) -> Option<u32> {
        self.imports
            .iter()
            .map(|i| i.name.as_str())
            .chain(self.funcs.iter().map(|f| f.name.as_str()))
            .position(|n| n == name)
            .map(|i| i as u32)
    }

    pub fn func(&self, name: &str) -> Option<&Function> {
        self.funcs.iter().find(|f| f.name == name)
    }
}
