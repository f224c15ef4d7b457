//! Expressions: each value evaluates to an ordered list of word registers.

use super::to_hlir::{single, HlirBuilder, Ops};
use crate::error::ErrorKind;
use lode_syntax::ast::{ArrayValue, BinaryExpr, BinaryOp, Cast, EnumTypeDefn, Type, Value, VarWithType};
use lode_syntax::hlir::{ArithOp, CompareOp, Opcode};
use lode_syntax::{string_byte_len, Register, RegisterInfo, TypeInfo};

impl<'a> HlirBuilder<'a> {
    pub(super) fn value(&mut self, v: &Value, out: &mut Ops) -> Result<Vec<Register>, ErrorKind> {
        match v {
            Value::IntLit(n) => Ok(vec![Register::IntLit(*n)]),
            Value::BoolLit(b) => Ok(vec![Register::IntLit(*b as i64)]),
            Value::StringLit(s) => Ok(vec![Register::StrLit(s.clone())]),
            Value::Var(var) => self.variable(var),
            Value::Binary(b) => self.binary(b, out).map(|r| vec![r]),
            Value::Cast(c) => self.cast(c, out),
            Value::Index(av) => self.index_register(av, out).map(|r| vec![r]),
            Value::ArrayLit(a) => {
                let mut regs = Vec::with_capacity(a.elements.len());
                for e in &a.elements {
                    regs.push(single(self.value(e, out)?, "array element")?);
                }
                Ok(regs)
            }
            Value::EnumValue(e) => self.enum_value(&e.typ, &e.constructor, &e.params, out),
            Value::EnumOption(e) => self.enum_value(&e.typ, &e.constructor, &[], out),
            Value::Call(fc) => self.call(fc, false, out),
            Value::Brackets(inner) => self.value(inner, out),
            Value::Let(l) => self.let_binding(&l.var, &l.value, false, out),
            Value::Tuple(items) => {
                let mut regs = Vec::new();
                for item in items {
                    regs.extend(self.value(item, out)?);
                }
                Ok(regs)
            }
        }
    }

    /// A stored slice reads as `(length, &first_element)`; everything else
    /// reads as its bound words.
    fn variable(&self, var: &VarWithType) -> Result<Vec<Register>, ErrorKind> {
        let regs = self.ctx.get_words(var)?;
        let capacity = self
            .registers
            .get(&regs[0])
            .and_then(|info| info.slice_capacity);
        match capacity {
            Some(0) => Ok(vec![regs[0].clone(), Register::IntLit(0)]),
            Some(_) => Ok(vec![regs[0].clone(), Register::pointer(regs[1].clone())]),
            None => Ok(regs.to_vec()),
        }
    }

    /// Layout of the value a register holds. Integer literals have none and
    /// adopt the other operand's.
    pub(super) fn type_info(&self, r: &Register) -> Option<TypeInfo> {
        match r {
            Register::IntLit(_) => None,
            Register::StrLit(_) | Register::Pointer(_) | Register::SliceBase(_) => {
                Some(TypeInfo::POINTER)
            }
            Register::Offset {
                scale, container, ..
            } => {
                let elem = container
                    .typ
                    .element()
                    .map(|e| self.types.scalar(e))
                    .filter(|info| info.size == *scale);
                Some(elem.unwrap_or(TypeInfo::new(*scale, true)))
            }
            other => Some(self.register_info(other).type_info),
        }
    }

    fn binary(&mut self, b: &BinaryExpr, out: &mut Ops) -> Result<Register, ErrorKind> {
        let left = single(self.value(&b.left, out)?, "left operand")?;
        let right = single(self.value(&b.right, out)?, "right operand")?;
        let compare = match b.op {
            BinaryOp::Eq => Some(CompareOp::Eq),
            BinaryOp::Neq => Some(CompareOp::Neq),
            BinaryOp::Lt => Some(CompareOp::Lt),
            BinaryOp::Lte => Some(CompareOp::Lte),
            BinaryOp::Gt => Some(CompareOp::Gt),
            BinaryOp::Geq => Some(CompareOp::Geq),
            _ => None,
        };
        if let Some(op) = compare {
            let dst = self.new_temp(TypeInfo::BOOL);
            out.push(Opcode::Compare {
                op,
                left,
                right,
                dst: dst.clone(),
            });
            return Ok(dst);
        }
        let op = match b.op {
            BinaryOp::Add => ArithOp::Add,
            BinaryOp::Sub => ArithOp::Sub,
            BinaryOp::Mul => ArithOp::Mul,
            BinaryOp::Div => ArithOp::Div,
            BinaryOp::Mod => ArithOp::Mod,
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Geq => unreachable!("comparison {:?} lowered above", b.op),
        };
        let info = match (self.type_info(&left), self.type_info(&right)) {
            (Some(l), Some(r)) => TypeInfo::new(l.size.max(r.size), l.signed),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => self.types.scalar(&Type::Int),
        };
        let dst = self.new_temp(info);
        out.push(Opcode::Arith {
            op,
            left,
            right,
            dst: dst.clone(),
        });
        Ok(dst)
    }

    /// Casts are identity except that strings and byte slices convert to
    /// `(length, pointer)`.
    fn cast(&mut self, c: &Cast, out: &mut Ops) -> Result<Vec<Register>, ErrorKind> {
        if c.typ.is_slice() || c.typ.is_string() {
            return self.pair_of(&c.val, out);
        }
        self.value(&c.val, out)
    }

    /// Evaluates a string, slice or array value into `(length, pointer)`.
    pub(super) fn pair_of(&mut self, v: &Value, out: &mut Ops) -> Result<Vec<Register>, ErrorKind> {
        match v.unwrapped() {
            Value::Var(x) if x.typ.is_array() => {
                let words = self.ctx.get_words(x)?;
                let ptr = words
                    .first()
                    .map_or(Register::IntLit(0), |w| Register::pointer(w.clone()));
                return Ok(vec![Register::IntLit(words.len() as i64), ptr]);
            }
            Value::ArrayLit(a) => {
                let vals = self.value(v, out)?;
                let n = vals.len() as i64;
                let first = self.spill(&a.elem, vals, out)?;
                let ptr = first.map_or(Register::IntLit(0), Register::pointer);
                return Ok(vec![Register::IntLit(n), ptr]);
            }
            _ => {}
        }
        let vals = self.value(v, out)?;
        self.string_pair(vals)
    }

    /// Converts a single-word string reference into `(length, pointer)`.
    /// The length word sits directly before the bytes.
    pub(super) fn string_pair(&mut self, vals: Vec<Register>) -> Result<Vec<Register>, ErrorKind> {
        match vals.as_slice() {
            [Register::StrLit(s)] => Ok(vec![
                Register::IntLit(string_byte_len(s) as i64),
                Register::slice_base(Register::StrLit(s.clone())),
            ]),
            [r] if self.registers.get(r).map_or(false, |i| i.pointer) => {
                let container = self
                    .register_info(r)
                    .creator
                    .clone()
                    .unwrap_or_else(|| VarWithType::new("", Type::Str));
                Ok(vec![
                    Register::offset(
                        r.clone(),
                        Register::IntLit(0),
                        self.types.length().size,
                        container,
                    ),
                    Register::slice_base(r.clone()),
                ])
            }
            [_, _] => Ok(vals),
            _ => Err(ErrorKind::arity("string or slice value", 2, vals.len())),
        }
    }

    /// Moves element values into fresh anonymous locals so their address can
    /// be taken. Returns the first element's register.
    fn spill(
        &mut self,
        elem: &Type,
        vals: Vec<Register>,
        out: &mut Ops,
    ) -> Result<Option<Register>, ErrorKind> {
        let info = self.types.element(elem)?;
        let n = vals.len() as u32;
        let mut first = None;
        let mut holder = None;
        for (i, v) in vals.into_iter().enumerate() {
            let r = self.ctx.next_anonymous_local();
            let creator = holder
                .get_or_insert_with(|| {
                    VarWithType::new(format!("${}", r), Type::array(elem.clone(), n))
                })
                .clone();
            self.registers.insert(
                r.clone(),
                RegisterInfo::new(format!("{}[{}]", creator.name, i), info).with_creator(&creator),
            );
            out.push(Opcode::mov(v, r.clone()));
            first.get_or_insert(r);
        }
        Ok(first)
    }

    /// Constructor index, then the payload, padded to the enum's widest
    /// constructor.
    fn enum_value(
        &mut self,
        typ: &EnumTypeDefn,
        constructor: &str,
        params: &[Value],
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        let index = self.enum_index(typ, constructor)?;
        let mut regs = vec![Register::IntLit(index as i64)];
        for p in params {
            regs.extend(self.value(p, out)?);
        }
        let width = self.types.enum_words(typ)?.len();
        if regs.len() > width {
            return Err(ErrorKind::arity(
                format!("constructor `{}`", constructor),
                width,
                regs.len(),
            ));
        }
        regs.resize(width, Register::IntLit(0));
        Ok(regs)
    }

    /// Declaration-order index of `constructor`; falls back to the module
    /// table when the type at hand does not list it.
    pub(super) fn enum_index(
        &mut self,
        typ: &EnumTypeDefn,
        constructor: &str,
    ) -> Result<u32, ErrorKind> {
        if let Some(i) = typ.options.iter().position(|o| o.constructor == constructor) {
            let i = i as u32;
            if self.enums.get(constructor).is_none() {
                self.enums.insert(constructor, i);
                self.discovered.insert(constructor, i);
            }
            return Ok(i);
        }
        self.enums
            .get(constructor)
            .ok_or_else(|| ErrorKind::UnknownConstructor {
                enum_name: typ.name.clone(),
                constructor: constructor.to_string(),
            })
    }

    /// `x[i]` as an Offset register. Arrays index from their first element;
    /// slices skip the length word; string references index past the length.
    pub(super) fn index_register(
        &mut self,
        av: &ArrayValue,
        out: &mut Ops,
    ) -> Result<Register, ErrorKind> {
        let words = self.ctx.get_words(&av.base)?.to_vec();
        let ty = av.base.typ.resolved();
        let elem = ty.element().ok_or_else(|| {
            ErrorKind::Unsupported(format!(
                "indexing `{}` of type {}",
                av.base.name, av.base.typ
            ))
        })?;
        let scale = self.types.element(elem)?.size;
        let index = single(self.value(&av.index, out)?, "index")?;
        // Array params arrive as one wasm param per element, so a constant
        // index names the element's own param.
        if let (Type::Array(..), [Register::Param { .. }, ..], Register::IntLit(i)) =
            (ty, words.as_slice(), &index)
        {
            return usize::try_from(*i)
                .ok()
                .and_then(|at| words.get(at))
                .cloned()
                .ok_or_else(|| {
                    ErrorKind::Unsupported(format!(
                        "index {} out of bounds for `{}`",
                        i, av.base.name
                    ))
                });
        }
        let base = match (ty, words.as_slice()) {
            (Type::Array(..), [first, ..]) => first.clone(),
            (Type::Str, [reference]) => Register::slice_base(reference.clone()),
            (Type::Str | Type::Slice(_), [len, rest @ ..]) => {
                let capacity = self.registers.get(len).and_then(|i| i.slice_capacity);
                match (capacity, rest.first()) {
                    (Some(0), _) | (_, None) => {
                        return Err(ErrorKind::Unsupported(format!(
                            "indexing empty slice `{}`",
                            av.base.name
                        )))
                    }
                    (_, Some(second)) => second.clone(),
                }
            }
            _ => {
                return Err(ErrorKind::Unsupported(format!(
                    "indexing `{}` of type {}",
                    av.base.name, av.base.typ
                )))
            }
        };
        Ok(Register::offset(base, index, scale, av.base.clone()))
    }
}
