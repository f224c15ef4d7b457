//! Call emission and argument construction.

use super::to_hlir::{describe, single, HlirBuilder, Ops};
use crate::error::ErrorKind;
use lode_syntax::ast::{FuncCall, Type, Value, VarWithType};
use lode_syntax::hlir::{ArithOp, Opcode};
use lode_syntax::{Register, RegisterInfo, TypeInfo, PRINT_STRING};

impl<'a> HlirBuilder<'a> {
    /// Emits a CALL and returns the registers naming its result words.
    /// `tail` is only set for a call that is the whole of a `return`.
    pub(super) fn call(
        &mut self,
        fc: &FuncCall,
        tail: bool,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        let callables = self.callables;
        let sig = callables.resolve(&fc.name)?;
        if sig.args.len() != fc.args.len() {
            return Err(ErrorKind::arity(
                format!("call to `{}`", fc.name),
                sig.args.len(),
                fc.args.len(),
            ));
        }
        let mut args = Vec::new();
        for (actual, formal) in fc.args.iter().zip(&sig.args) {
            if fc.name == PRINT_STRING {
                args.push(self.string_reference(actual, out)?);
            } else {
                args.extend(self.argument(actual, formal, out)?);
            }
        }
        out.push(Opcode::Call {
            name: fc.name.clone(),
            args,
            tail,
        });
        let call = self.num_calls;
        self.num_calls += 1;

        let mut results = Vec::new();
        for ret in &sig.returns {
            for w in self.types.words(&ret.typ)? {
                let r = Register::LastCallRet {
                    call,
                    ret: results.len() as u32,
                };
                self.registers
                    .insert(r.clone(), RegisterInfo::from_word(&ret.name, w).with_creator(ret));
                results.push(r);
            }
        }
        Ok(results)
    }

    fn argument(
        &mut self,
        actual: &Value,
        formal: &VarWithType,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        if !formal.reference {
            return self.coerce(actual, &formal.typ, out);
        }
        let Value::Var(v) = actual.unwrapped() else {
            return Err(ErrorKind::Unsupported(format!(
                "passing a {} to reference parameter `{}`",
                describe(actual),
                formal.name
            )));
        };
        match self.ctx.get_words(v)? {
            [w] => Ok(vec![Register::pointer(w.clone())]),
            words => Err(ErrorKind::Unsupported(format!(
                "reference to `{}` spanning {} words",
                v.name,
                words.len()
            ))),
        }
    }

    /// Evaluates `actual` in the word shape a value of type `ty` takes at a
    /// call or return boundary.
    pub(super) fn coerce(
        &mut self,
        actual: &Value,
        ty: &Type,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        if ty.is_string() || ty.is_slice() {
            return self.pair_of(actual, out);
        }
        let vals = self.value(actual, out)?;
        let expected = self.types.words(ty)?.len();
        if vals.len() != expected {
            return Err(ErrorKind::arity(
                format!("{} of type {}", describe(actual), ty),
                expected,
                vals.len(),
            ));
        }
        Ok(vals)
    }

    /// Single-word reference to a length-prefixed string: the address of
    /// its length word.
    fn string_reference(&mut self, actual: &Value, out: &mut Ops) -> Result<Register, ErrorKind> {
        let vals = self.value(actual, out)?;
        if let [_, ptr] = vals.as_slice() {
            let ptr = ptr.clone();
            let dst = self.new_temp(TypeInfo::POINTER);
            if let Some(info) = self.registers.get_mut(&dst) {
                info.pointer = true;
            }
            out.push(Opcode::Arith {
                op: ArithOp::Sub,
                left: ptr,
                right: Register::IntLit(self.types.length().size as i64),
                dst: dst.clone(),
            });
            return Ok(dst);
        }
        single(vals, "string argument")
    }
}
