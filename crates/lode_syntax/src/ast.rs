//! Typed AST consumed by the backend (functions, statements, values, types).
//!
//! The frontend (parser, resolver, type checker) lives elsewhere; this is the
//! shape it hands over. Every value is already typed, so the backend never
//! infers anything beyond what it can read off a node.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A translation unit: the top-level items of one module.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Func(f) => Some(f),
            Item::TypeDefn(_) => None,
        })
    }

    pub fn type_definitions(&self) -> impl Iterator<Item = &TypeDefn> {
        self.items.iter().filter_map(|item| match item {
            Item::TypeDefn(t) => Some(t),
            Item::Func(_) => None,
        })
    }
}

/// Top-level item in a module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Item {
    Func(FuncDecl),
    TypeDefn(TypeDefn),
}

/// `type Name = ...` or `type Name enum { ... }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeDefn {
    pub name: String,
    pub typ: Type,
}

/// Function (or procedure) declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    pub args: Vec<VarWithType>,
    pub returns: Vec<VarWithType>,
    pub body: BlockStmt,
    #[serde(default)]
    pub span: Span,
}

impl FuncDecl {
    pub fn new(
        name: impl Into<String>,
        args: Vec<VarWithType>,
        returns: Vec<VarWithType>,
        stmts: Vec<Stmt>,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            returns,
            body: BlockStmt { stmts },
            span: Span::default(),
        }
    }

    pub fn signature(&self) -> Signature {
        Signature {
            name: self.name.clone(),
            args: self.args.clone(),
            returns: self.returns.clone(),
        }
    }
}

/// A callable's shape: what it takes and what it hands back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub args: Vec<VarWithType>,
    pub returns: Vec<VarWithType>,
}

impl Signature {
    pub fn get_args(&self) -> &[VarWithType] {
        &self.args
    }

    pub fn return_tuple(&self) -> &[VarWithType] {
        &self.returns
    }
}

/// A named, typed variable. `reference` marks a `mutable x int` parameter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarWithType {
    pub name: String,
    pub typ: Type,
    #[serde(default)]
    pub reference: bool,
}

impl VarWithType {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
            reference: false,
        }
    }

    pub fn reference(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
            reference: true,
        }
    }
}

impl fmt::Display for VarWithType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reference {
            write!(f, "mutable {} {}", self.name, self.typ)
        } else {
            write!(f, "{} {}", self.name, self.typ)
        }
    }
}

/// Type reference.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    Bool,
    Str,
    Byte,
    /// `intN` / `uintN`
    Sized { signed: bool, bits: u32 },
    /// User-defined type name over some base type.
    Alias { name: String, base: Box<Type> },
    Slice(Box<Type>),
    Array(Box<Type>, u32),
    Sum(Vec<Type>),
    Enum(EnumTypeDefn),
    Tuple(Vec<VarWithType>),
}

impl Type {
    pub fn slice(base: Type) -> Type {
        Type::Slice(Box::new(base))
    }

    pub fn array(base: Type, size: u32) -> Type {
        Type::Array(Box::new(base), size)
    }

    pub fn alias(name: impl Into<String>, base: Type) -> Type {
        Type::Alias {
            name: name.into(),
            base: Box::new(base),
        }
    }

    /// Strips user aliases down to the structural type underneath.
    pub fn resolved(&self) -> &Type {
        match self {
            Type::Alias { base, .. } => base.resolved(),
            other => other,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.resolved(), Type::Bool)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.resolved(), Type::Str)
    }

    pub fn is_slice(&self) -> bool {
        matches!(self.resolved(), Type::Slice(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.resolved(), Type::Array(..))
    }

    /// Element type of an array, slice or string (strings index to bytes).
    pub fn element(&self) -> Option<&Type> {
        match self.resolved() {
            Type::Slice(base) | Type::Array(base, _) => Some(base),
            Type::Str => Some(&Type::Byte),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumTypeDefn> {
        match self.resolved() {
            Type::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Stable textual name used to key bindings. Structural types without an
    /// alias degrade to their rendered form.
    pub fn canonical_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Bool => f.write_str("bool"),
            Type::Str => f.write_str("string"),
            Type::Byte => f.write_str("byte"),
            Type::Sized { signed: true, bits } => write!(f, "int{}", bits),
            Type::Sized { signed: false, bits } => write!(f, "uint{}", bits),
            Type::Alias { name, .. } => f.write_str(name),
            Type::Slice(base) => write!(f, "[]{}", base),
            Type::Array(base, size) => write!(f, "[{}]{}", size, base),
            Type::Sum(options) => {
                for (i, t) in options.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", t)?;
                }
                Ok(())
            }
            Type::Enum(e) => f.write_str(&e.name),
            Type::Tuple(fields) => {
                f.write_str("(")?;
                for (i, v) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// `enum { A, B(int), ... }` with constructors in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnumTypeDefn {
    pub name: String,
    pub options: Vec<EnumOption>,
}

impl EnumTypeDefn {
    pub fn option(&self, constructor: &str) -> Option<&EnumOption> {
        self.options.iter().find(|o| o.constructor == constructor)
    }

    pub fn has_payload(&self) -> bool {
        self.options.iter().any(|o| !o.params.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnumOption {
    pub constructor: String,
    #[serde(default)]
    pub params: Vec<Type>,
}

/// Block: `{ stmts }`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
}

impl From<Vec<Stmt>> for BlockStmt {
    fn from(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

/// Statement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Stmt {
    Let(LetStmt),
    Mut(MutStmt),
    Assign(AssignmentOperator),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileLoop),
    Match(MatchStmt),
    Assert(Assertion),
    Call(FuncCall),
}

impl Stmt {
    pub fn let_(var: VarWithType, value: Value) -> Stmt {
        Stmt::Let(LetStmt { var, value })
    }

    pub fn mut_(var: VarWithType, value: Value) -> Stmt {
        Stmt::Mut(MutStmt { var, value })
    }

    pub fn assign(variable: Value, value: Value) -> Stmt {
        Stmt::Assign(AssignmentOperator { variable, value })
    }

    pub fn ret(val: Option<Value>) -> Stmt {
        Stmt::Return(ReturnStmt { val })
    }

    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Stmt {
        Stmt::Call(FuncCall::new(name, args))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LetStmt {
    pub var: VarWithType,
    pub value: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutStmt {
    pub var: VarWithType,
    pub value: Value,
}

/// `x = e` or `x[i] = e`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignmentOperator {
    pub variable: Value,
    pub value: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub val: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Value,
    pub body: BlockStmt,
    #[serde(default)]
    pub else_: Option<BlockStmt>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WhileLoop {
    pub condition: Value,
    pub body: BlockStmt,
}

/// `match x { case A(a): ... }` or, with no scrutinee, `match { case cond: ... }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchStmt {
    #[serde(default)]
    pub condition: Option<Value>,
    pub cases: Vec<MatchCase>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchCase {
    /// Pattern value, or the boolean guard when the match has no scrutinee.
    pub variable: Value,
    /// Payload bindings for an enum constructor pattern.
    #[serde(default)]
    pub locals: Vec<VarWithType>,
    pub body: BlockStmt,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assertion {
    pub predicate: Value,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Value>,
}

impl FuncCall {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Geq,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Geq
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Value>,
    pub right: Box<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cast {
    pub val: Box<Value>,
    pub typ: Type,
}

/// `x[i]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayValue {
    pub base: VarWithType,
    pub index: Box<Value>,
}

/// `{ 1, 2, 3 }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayLiteral {
    pub elements: Vec<Value>,
    pub elem: Type,
}

/// Constructor applied to its payload: `Some(3)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumValue {
    pub constructor: String,
    pub params: Vec<Value>,
    pub typ: EnumTypeDefn,
}

/// Bare constructor: `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumConstructor {
    pub constructor: String,
    pub typ: EnumTypeDefn,
}

/// Expression.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    IntLit(i64),
    BoolLit(bool),
    /// Raw source text; escapes such as `\n` are kept as written.
    StringLit(String),
    Var(VarWithType),
    Binary(BinaryExpr),
    Cast(Cast),
    Index(ArrayValue),
    ArrayLit(ArrayLiteral),
    EnumValue(EnumValue),
    EnumOption(EnumConstructor),
    Call(FuncCall),
    Brackets(Box<Value>),
    Let(Box<LetStmt>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn int(v: i64) -> Value {
        Value::IntLit(v)
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::StringLit(s.into())
    }

    pub fn var(name: impl Into<String>, typ: Type) -> Value {
        Value::Var(VarWithType::new(name, typ))
    }

    pub fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
        Value::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Value {
        Value::Call(FuncCall::new(name, args))
    }

    pub fn index(base: VarWithType, index: Value) -> Value {
        Value::Index(ArrayValue {
            base,
            index: Box::new(index),
        })
    }

    pub fn array(elem: Type, elements: Vec<Value>) -> Value {
        Value::ArrayLit(ArrayLiteral { elements, elem })
    }

    /// Strips redundant brackets.
    pub fn unwrapped(&self) -> &Value {
        match self {
            Value::Brackets(inner) => inner.unwrapped(),
            other => other,
        }
    }
}
