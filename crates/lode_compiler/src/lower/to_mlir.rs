//! HLIR -> MLIR: structured control flow becomes labels and compare-and-jump,
//! additive arithmetic becomes two-address.

use crate::error::{CompileError, ErrorKind, Stage};
use lode_syntax::hlir::{self, ArithOp, CompareOp, Condition};
use lode_syntax::mlir::{self, JumpCond, Opcode, Signature};
use lode_syntax::{Callables, Register, RegisterData, TypeInfo, TypeInformation};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Polarity {
    JumpOnSuccess,
    JumpOnFailure,
}

struct MlirLowering<'a> {
    registers: &'a RegisterData,
    callables: &'a Callables,
    types: &'a TypeInformation,
    branch_n: u32,
    largest_func_call: u32,
    out: Vec<Opcode>,
}

pub fn lower_to_mlir(
    func: &hlir::Func,
    callables: &Callables,
    types: &TypeInformation,
) -> Result<mlir::Func, CompileError> {
    let mut l = MlirLowering {
        registers: &func.registers,
        callables,
        types,
        branch_n: 0,
        largest_func_call: 0,
        out: Vec::new(),
    };
    l.block(&func.body)
        .map_err(|kind| CompileError::new(&func.name, Stage::Mlir, kind))?;
    let signature = Signature {
        params: l.param_infos(func.num_params),
        returns: l.infos(func.num_returns, Register::RetSlot),
        locals: l.infos(func.num_locals, Register::Local),
        temps: l.infos(func.num_temps, Register::Temp),
    };
    debug!(
        function = %func.name,
        ops = l.out.len(),
        branches = l.branch_n,
        "lowered to mlir"
    );
    Ok(mlir::Func {
        name: func.name.clone(),
        signature,
        body: l.out,
        largest_func_call: l.largest_func_call,
    })
}

fn jump_for(op: CompareOp) -> JumpCond {
    match op {
        CompareOp::Eq => JumpCond::Je,
        CompareOp::Neq => JumpCond::Jne,
        CompareOp::Lt => JumpCond::Jl,
        CompareOp::Lte => JumpCond::Jle,
        CompareOp::Gt => JumpCond::Jg,
        CompareOp::Geq => JumpCond::Jge,
    }
}

impl<'a> MlirLowering<'a> {
    fn infos(&self, n: u32, reg: impl Fn(u32) -> Register) -> Vec<TypeInfo> {
        (0..n)
            .map(|i| {
                let r = reg(i);
                match self.registers.get(&r) {
                    Some(info) => info.type_info,
                    None => panic!("missing register metadata for {:?}", r),
                }
            })
            .collect()
    }

    /// A reference parameter is passed as an address.
    fn param_infos(&self, n: u32) -> Vec<TypeInfo> {
        (0..n)
            .map(|id| {
                if self.registers.contains_key(&Register::Param { id, reference: true }) {
                    return TypeInfo::POINTER;
                }
                match self.registers.get(&Register::param(id)) {
                    Some(info) => info.type_info,
                    None => panic!("missing register metadata for parameter P{}", id),
                }
            })
            .collect()
    }

    fn next_branch(&mut self) -> u32 {
        let n = self.branch_n;
        self.branch_n += 1;
        n
    }

    fn block(&mut self, ops: &[hlir::Opcode]) -> Result<(), ErrorKind> {
        for op in ops {
            self.op(op)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &hlir::Opcode) -> Result<(), ErrorKind> {
        match op {
            hlir::Opcode::Mov { src, dst } => self.out.push(Opcode::Mov {
                src: src.clone(),
                dst: dst.clone(),
            }),
            hlir::Opcode::Arith {
                op,
                left,
                right,
                dst,
            } => self.arith(*op, left, right, dst),
            hlir::Opcode::Compare {
                op,
                left,
                right,
                dst,
            } => {
                // Materialized as 1/0 around a compare-and-jump.
                let n = self.next_branch();
                let done = format!("cmp{}done", n);
                self.out.push(Opcode::Mov {
                    src: Register::IntLit(1),
                    dst: dst.clone(),
                });
                self.out.push(Opcode::Jump {
                    cond: jump_for(*op),
                    label: done.clone(),
                    left: left.clone(),
                    right: right.clone(),
                });
                self.out.push(Opcode::Mov {
                    src: Register::IntLit(0),
                    dst: dst.clone(),
                });
                self.out.push(Opcode::Label(done));
            }
            hlir::Opcode::Call { name, args, tail } => {
                self.track_call(name, args.len())?;
                self.out.push(Opcode::Call {
                    name: name.clone(),
                    args: args.clone(),
                    tail: *tail,
                });
            }
            hlir::Opcode::Ret => self.out.push(Opcode::Ret),
            hlir::Opcode::If {
                cond,
                body,
                else_body,
            } => {
                let n = self.next_branch();
                let else_label = format!("if{}else", n);
                let done = format!("if{}elsedone", n);
                self.condition(cond, Polarity::JumpOnFailure, &else_label)?;
                self.block(body)?;
                self.out.push(Opcode::Jmp(done.clone()));
                self.out.push(Opcode::Label(else_label));
                self.block(else_body)?;
                self.out.push(Opcode::Label(done));
            }
            hlir::Opcode::Loop {
                initializer,
                cond,
                body,
            } => {
                let n = self.next_branch();
                let head = format!("loop{}cond", n);
                let end = format!("loop{}end", n);
                self.block(initializer)?;
                self.out.push(Opcode::Label(head.clone()));
                self.condition(cond, Polarity::JumpOnFailure, &end)?;
                self.block(body)?;
                self.out.push(Opcode::Jmp(head));
                self.out.push(Opcode::Label(end));
            }
            hlir::Opcode::JumpTable(cases) => {
                let n = self.next_branch();
                let done = format!("match{}done", n);
                let labels: Vec<String> = (0..cases.len())
                    .map(|i| format!("match{}v{}", n, i))
                    .collect();
                for (case, label) in cases.iter().zip(&labels) {
                    self.condition(&case.condition, Polarity::JumpOnSuccess, label)?;
                }
                self.out.push(Opcode::Jmp(done.clone()));
                for (case, label) in cases.iter().zip(labels) {
                    self.out.push(Opcode::Label(label));
                    self.block(&case.body)?;
                    self.out.push(Opcode::Jmp(done.clone()));
                }
                self.out.push(Opcode::Label(done));
            }
            hlir::Opcode::Assert {
                predicate, message, ..
            } => {
                let n = self.next_branch();
                let ok = format!("assert{}ok", n);
                self.condition(predicate, Polarity::JumpOnSuccess, &ok)?;
                self.out.push(Opcode::Assert {
                    predicate: Register::IntLit(0),
                    message: message.clone(),
                });
                self.out.push(Opcode::Label(ok));
            }
        }
        Ok(())
    }

    fn arith(&mut self, op: ArithOp, left: &Register, right: &Register, dst: &Register) {
        let (left, right, dst) = (left.clone(), right.clone(), dst.clone());
        match op {
            ArithOp::Add => {
                self.out.push(Opcode::Mov {
                    src: left,
                    dst: dst.clone(),
                });
                self.out.push(Opcode::Add { src: right, dst });
            }
            ArithOp::Sub => {
                self.out.push(Opcode::Mov {
                    src: left,
                    dst: dst.clone(),
                });
                self.out.push(Opcode::Sub { src: right, dst });
            }
            ArithOp::Mul => self.out.push(Opcode::Mul { left, right, dst }),
            ArithOp::Div => self.out.push(Opcode::Div { left, right, dst }),
            ArithOp::Mod => self.out.push(Opcode::Mod { left, right, dst }),
        }
    }

    /// Emits a condition body ending in a jump to `label`. A trailing
    /// comparison that produces the condition register fuses into the jump.
    fn condition(
        &mut self,
        cond: &Condition,
        polarity: Polarity,
        label: &str,
    ) -> Result<(), ErrorKind> {
        let fused = match cond.body.split_last() {
            Some((
                hlir::Opcode::Compare {
                    op,
                    left,
                    right,
                    dst,
                },
                rest,
            )) if *dst == cond.register => Some((rest, jump_for(*op), left, right)),
            _ => None,
        };
        let (cc, left, right) = match fused {
            Some((rest, cc, left, right)) => {
                self.block(rest)?;
                (cc, left.clone(), right.clone())
            }
            None => {
                self.block(&cond.body)?;
                (JumpCond::Jne, cond.register.clone(), Register::IntLit(0))
            }
        };
        let cond = match polarity {
            Polarity::JumpOnSuccess => cc,
            Polarity::JumpOnFailure => cc.negate(),
        };
        self.out.push(Opcode::Jump {
            cond,
            label: label.to_string(),
            left,
            right,
        });
        Ok(())
    }

    fn track_call(&mut self, name: &str, args: usize) -> Result<(), ErrorKind> {
        let sig = self.callables.resolve(name)?;
        let mut returns = 0;
        for r in &sig.returns {
            returns += self.types.words(&r.typ)?.len();
        }
        self.largest_func_call = self.largest_func_call.max((args + returns) as u32);
        Ok(())
    }
}
