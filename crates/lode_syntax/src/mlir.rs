//! MLIR: flat labels and compare-and-jump, two-address additive arithmetic.

use crate::layout::TypeInfo;
use crate::register::Register;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpCond {
    Je,
    Jne,
    Jl,
    Jle,
    Jg,
    Jge,
}

impl JumpCond {
    pub fn mnemonic(self) -> &'static str {
        match self {
            JumpCond::Je => "JE",
            JumpCond::Jne => "JNE",
            JumpCond::Jl => "JL",
            JumpCond::Jle => "JLE",
            JumpCond::Jg => "JG",
            JumpCond::Jge => "JGE",
        }
    }

    /// The jump taken when the condition does not hold.
    pub fn negate(self) -> JumpCond {
        match self {
            JumpCond::Je => JumpCond::Jne,
            JumpCond::Jne => JumpCond::Je,
            JumpCond::Jl => JumpCond::Jge,
            JumpCond::Jge => JumpCond::Jl,
            JumpCond::Jg => JumpCond::Jle,
            JumpCond::Jle => JumpCond::Jg,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    Mov {
        src: Register,
        dst: Register,
    },
    /// `dst += src`
    Add {
        src: Register,
        dst: Register,
    },
    /// `dst -= src`
    Sub {
        src: Register,
        dst: Register,
    },
    Mul {
        left: Register,
        right: Register,
        dst: Register,
    },
    Div {
        left: Register,
        right: Register,
        dst: Register,
    },
    Mod {
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
    /// Aborts with `message` when `predicate` is zero.
    Assert {
        predicate: Register,
        message: String,
    },
    Label(String),
    Jmp(String),
    Jump {
        cond: JumpCond,
        label: String,
        left: Register,
        right: Register,
    },
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Mov { src, dst } => write!(f, "  MOV {}, {}", src, dst),
            Opcode::Add { src, dst } => write!(f, "  ADD {}, {}", src, dst),
            Opcode::Sub { src, dst } => write!(f, "  SUB {}, {}", src, dst),
            Opcode::Mul { left, right, dst } => write!(f, "  MUL {}, {}, {}", left, right, dst),
            Opcode::Div { left, right, dst } => write!(f, "  DIV {}, {}, {}", left, right, dst),
            Opcode::Mod { left, right, dst } => write!(f, "  MOD {}, {}, {}", left, right, dst),
            Opcode::Call { name, args, tail } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                let kw = if *tail { "TAILCALL" } else { "CALL" };
                write!(f, "  {} {}({})", kw, name, args.join(", "))
            }
            Opcode::Ret => f.write_str("  RET"),
            Opcode::Assert { predicate, message } => {
                write!(f, "  ASSERT {}, {:?}", predicate, message)
            }
            Opcode::Label(l) => write!(f, "{}:", l),
            Opcode::Jmp(l) => write!(f, "  JMP {}", l),
            Opcode::Jump {
                cond,
                label,
                left,
                right,
            } => write!(f, "  {} {}, {}, {}", cond.mnemonic(), left, right, label),
        }
    }
}

/// Word layouts of everything a function touches, in register index order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<TypeInfo>,
    pub returns: Vec<TypeInfo>,
    pub locals: Vec<TypeInfo>,
    pub temps: Vec<TypeInfo>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Func {
    pub name: String,
    pub signature: Signature,
    pub body: Vec<Opcode>,
    /// Largest `args + return words` over every call in the body.
    pub largest_func_call: u32,
}

impl Func {
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.body.iter().filter_map(|op| match op {
            Opcode::Label(l) => Some(l.as_str()),
            _ => None,
        })
    }
}

fn widths(infos: &[TypeInfo]) -> String {
    infos
        .iter()
        .map(|t| format!("{}{}", if t.signed { "i" } else { "u" }, t.size * 8))
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "func {} ({}) -> ({}) locals ({}) temps ({}) largest call {}",
            self.name,
            widths(&self.signature.params),
            widths(&self.signature.returns),
            widths(&self.signature.locals),
            widths(&self.signature.temps),
            self.largest_func_call
        )?;
        for op in &self.body {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}
