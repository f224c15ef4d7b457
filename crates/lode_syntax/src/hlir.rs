//! HLIR: virtual registers, three-address arithmetic and structured control
//! flow (conditionals, pre-test loops, match jump tables).

use crate::ast::VarWithType;
use crate::register::{Register, RegisterData};
use crate::span::Span;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "ADD",
            ArithOp::Sub => "SUB",
            ArithOp::Mul => "MUL",
            ArithOp::Div => "DIV",
            ArithOp::Mod => "MOD",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Geq,
}

impl CompareOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CompareOp::Eq => "EQ",
            CompareOp::Neq => "NEQ",
            CompareOp::Lt => "LT",
            CompareOp::Lte => "LTE",
            CompareOp::Gt => "GT",
            CompareOp::Geq => "GEQ",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    Mov {
        src: Register,
        dst: Register,
    },
    Arith {
        op: ArithOp,
        left: Register,
        right: Register,
        dst: Register,
    },
    /// Writes 0 or 1 into `dst`.
    Compare {
        op: CompareOp,
        left: Register,
        right: Register,
        dst: Register,
    },
    Call {
        name: String,
        args: Vec<Register>,
        tail: bool,
    },
    Ret,
    If {
        cond: Condition,
        body: Vec<Opcode>,
        else_body: Vec<Opcode>,
    },
    /// Pre-test loop; `initializer` runs once before `cond` is first evaluated.
    Loop {
        initializer: Vec<Opcode>,
        cond: Condition,
        body: Vec<Opcode>,
    },
    /// The first case whose condition holds runs its body.
    JumpTable(Vec<ControlFlow>),
    Assert {
        predicate: Condition,
        message: String,
        span: Span,
    },
}

impl Opcode {
    pub fn mov(src: Register, dst: Register) -> Opcode {
        Opcode::Mov { src, dst }
    }
}

/// An embedded block whose final `register` is the boolean result.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub body: Vec<Opcode>,
    pub register: Register,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlFlow {
    pub condition: Condition,
    pub body: Vec<Opcode>,
}

/// Constructor name -> 0-based index within its enum, module-global.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnumMap {
    indices: BTreeMap<String, u32>,
}

impl EnumMap {
    pub fn insert(&mut self, constructor: impl Into<String>, index: u32) {
        self.indices.insert(constructor.into(), index);
    }

    pub fn get(&self, constructor: &str) -> Option<u32> {
        self.indices.get(constructor).copied()
    }

    pub fn merge(&mut self, other: &EnumMap) {
        for (k, v) in &other.indices {
            self.indices.insert(k.clone(), *v);
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.indices.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// One function lowered to HLIR together with its register metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Func {
    pub name: String,
    pub args: Vec<VarWithType>,
    pub returns: Vec<VarWithType>,
    pub body: Vec<Opcode>,
    pub registers: RegisterData,
    /// Parameter words (`Param(0..num_params)`).
    pub num_params: u32,
    /// Return words (`RetSlot(0..num_returns)`).
    pub num_returns: u32,
    pub num_locals: u32,
    pub num_temps: u32,
    /// Calls emitted; `LastCallRet` call numbers are `0..num_calls`.
    pub num_calls: u32,
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "func {} (params {}, returns {}, locals {}, temps {}):",
            self.name, self.num_params, self.num_returns, self.num_locals, self.num_temps
        )?;
        f.write_str(&render_ops(&self.body, 1))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(render_ops(std::slice::from_ref(self), 0).trim_end())
    }
}

fn join(args: &[Register]) -> String {
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders a block of opcodes, one per line, nesting bodies by two spaces.
pub fn render_ops(ops: &[Opcode], depth: usize) -> String {
    let mut out = String::new();
    for op in ops {
        render_op(&mut out, op, depth);
    }
    out
}

fn line(out: &mut String, depth: usize, text: impl fmt::Display) {
    let _ = writeln!(out, "{}{}", "  ".repeat(depth), text);
}

fn render_condition(out: &mut String, cond: &Condition, depth: usize) {
    out.push_str(&render_ops(&cond.body, depth + 1));
    line(out, depth + 1, format_args!("=> {}", cond.register));
}

fn render_op(out: &mut String, op: &Opcode, depth: usize) {
    match op {
        Opcode::Mov { src, dst } => line(out, depth, format_args!("MOV {}, {}", src, dst)),
        Opcode::Arith {
            op,
            left,
            right,
            dst,
        } => line(
            out,
            depth,
            format_args!("{} {}, {}, {}", op.mnemonic(), left, right, dst),
        ),
        Opcode::Compare {
            op,
            left,
            right,
            dst,
        } => line(
            out,
            depth,
            format_args!("{} {}, {}, {}", op.mnemonic(), left, right, dst),
        ),
        Opcode::Call { name, args, tail } => {
            let kw = if *tail { "TAILCALL" } else { "CALL" };
            line(out, depth, format_args!("{} {}({})", kw, name, join(args)))
        }
        Opcode::Ret => line(out, depth, "RET"),
        Opcode::If {
            cond,
            body,
            else_body,
        } => {
            line(out, depth, "IF");
            render_condition(out, cond, depth);
            line(out, depth, "THEN");
            out.push_str(&render_ops(body, depth + 1));
            if !else_body.is_empty() {
                line(out, depth, "ELSE");
                out.push_str(&render_ops(else_body, depth + 1));
            }
            line(out, depth, "END");
        }
        Opcode::Loop {
            initializer,
            cond,
            body,
        } => {
            line(out, depth, "LOOP");
            if !initializer.is_empty() {
                line(out, depth, "INIT");
                out.push_str(&render_ops(initializer, depth + 1));
            }
            line(out, depth, "WHILE");
            render_condition(out, cond, depth);
            line(out, depth, "DO");
            out.push_str(&render_ops(body, depth + 1));
            line(out, depth, "END");
        }
        Opcode::JumpTable(cases) => {
            line(out, depth, "JUMPTABLE");
            for (i, case) in cases.iter().enumerate() {
                line(out, depth, format_args!("CASE {}", i));
                render_condition(out, &case.condition, depth);
                line(out, depth, "THEN");
                out.push_str(&render_ops(&case.body, depth + 1));
            }
            line(out, depth, "END");
        }
        Opcode::Assert {
            predicate, message, ..
        } => {
            line(out, depth, format_args!("ASSERT {:?}", message));
            render_condition(out, predicate, depth);
        }
    }
}
