//! Typed AST of one function -> HLIR opcodes plus register metadata.
//!
//! Expressions live in `expr.rs`, call argument construction in `call.rs`;
//! this file owns the builder state, the parameter prelude and statements.

use crate::context::ContextStore;
use crate::error::{CompileError, ErrorKind, Stage};
use lode_syntax::ast::{
    AssignmentOperator, Assertion, FuncDecl, IfStmt, MatchCase, MatchStmt, ReturnStmt, Stmt,
    Type, Value, VarWithType, WhileLoop,
};
use lode_syntax::hlir::{self, ArithOp, CompareOp, Condition, ControlFlow, EnumMap, Opcode};
use lode_syntax::layout::Word;
use lode_syntax::{Callables, Register, RegisterData, RegisterInfo, TypeInfo, TypeInformation};
use tracing::debug;

pub(super) type Ops = Vec<Opcode>;

pub struct HlirBuilder<'a> {
    pub(super) types: &'a TypeInformation,
    pub(super) callables: &'a Callables,
    /// Module table plus anything discovered while building.
    pub(super) enums: EnumMap,
    pub(super) discovered: EnumMap,
    pub(super) ctx: ContextStore,
    pub(super) registers: RegisterData,
    pub(super) num_calls: u32,
    pub(super) num_returns: u32,
}

/// Builds one function. Returns the HLIR function and the enum constructors
/// it resolved that the module table did not already hold.
pub fn build_function(
    decl: &FuncDecl,
    types: &TypeInformation,
    callables: &Callables,
    enums: &EnumMap,
) -> Result<(hlir::Func, EnumMap), CompileError> {
    let mut builder = HlirBuilder::new(types, callables, enums, decl.returns.clone());
    let (body, num_params) = builder
        .function(decl)
        .map_err(|kind| CompileError::new(&decl.name, Stage::Hlir, kind).at(decl.span))?;
    let func = hlir::Func {
        name: decl.name.clone(),
        args: decl.args.clone(),
        returns: decl.returns.clone(),
        body,
        num_params,
        num_returns: builder.num_returns,
        num_locals: builder.ctx.num_locals(),
        num_temps: builder.ctx.num_temps(),
        num_calls: builder.num_calls,
        registers: builder.registers,
    };
    debug!(
        function = %func.name,
        locals = func.num_locals,
        temps = func.num_temps,
        calls = func.num_calls,
        shadows = builder.ctx.shadow_count(),
        "built hlir"
    );
    Ok((func, builder.discovered))
}

pub(super) fn single(vals: Vec<Register>, context: &str) -> Result<Register, ErrorKind> {
    let found = vals.len();
    let mut it = vals.into_iter();
    match (it.next(), it.next()) {
        (Some(r), None) => Ok(r),
        _ => Err(ErrorKind::arity(context, 1, found)),
    }
}

/// Short name of an expression form, for error messages.
pub(super) fn describe(v: &Value) -> &'static str {
    match v {
        Value::IntLit(_) => "integer literal",
        Value::BoolLit(_) => "boolean literal",
        Value::StringLit(_) => "string literal",
        Value::Var(_) => "variable",
        Value::Binary(b) if b.op.is_comparison() => "comparison",
        Value::Binary(_) => "arithmetic expression",
        Value::Cast(_) => "cast",
        Value::Index(_) => "index expression",
        Value::ArrayLit(_) => "array literal",
        Value::EnumValue(_) | Value::EnumOption(_) => "enum value",
        Value::Call(_) => "call",
        Value::Brackets(inner) => describe(inner),
        Value::Let(_) => "let expression",
        Value::Tuple(_) => "tuple",
    }
}

impl<'a> HlirBuilder<'a> {
    pub fn new(
        types: &'a TypeInformation,
        callables: &'a Callables,
        enums: &EnumMap,
        returns: Vec<VarWithType>,
    ) -> Self {
        Self {
            types,
            callables,
            enums: enums.clone(),
            discovered: EnumMap::default(),
            ctx: ContextStore::new(returns),
            registers: RegisterData::new(),
            num_calls: 0,
            num_returns: 0,
        }
    }

    fn function(&mut self, decl: &FuncDecl) -> Result<(Ops, u32), ErrorKind> {
        let num_params = self.prelude(decl)?;
        let mut body = Vec::new();
        self.block(&decl.body.stmts, &mut body)?;
        Ok((body, num_params))
    }

    /// Params first (one per word), then return slots.
    fn prelude(&mut self, decl: &FuncDecl) -> Result<u32, ErrorKind> {
        let mut id = 0;
        for arg in &decl.args {
            let words = self.param_words(arg)?;
            let regs = self.ctx.param_register(arg, id, words.len() as u32);
            for (r, w) in regs.into_iter().zip(&words) {
                self.registers
                    .insert(r, RegisterInfo::from_word(&arg.name, *w).with_creator(arg));
            }
            id += words.len() as u32;
        }
        for ret in &decl.returns {
            for w in self.types.words(&ret.typ)? {
                let slot = Register::RetSlot(self.num_returns);
                self.registers
                    .insert(slot, RegisterInfo::from_word(&ret.name, w).with_creator(ret));
                self.num_returns += 1;
            }
        }
        Ok(id)
    }

    /// A reference parameter is one address word; its info keeps the layout
    /// of the value it points at.
    fn param_words(&self, arg: &VarWithType) -> Result<Vec<Word>, ErrorKind> {
        let words = self.types.words(&arg.typ)?;
        if !arg.reference {
            return Ok(words);
        }
        match words.as_slice() {
            [w] => Ok(vec![Word {
                info: w.info,
                pointer: true,
            }]),
            _ => Err(ErrorKind::Unsupported(format!(
                "reference parameter `{}` of multi-word type {}",
                arg.name, arg.typ
            ))),
        }
    }

    pub(super) fn register_info(&self, r: &Register) -> &RegisterInfo {
        self.registers
            .get(r)
            .unwrap_or_else(|| panic!("missing register metadata for {:?}", r))
    }

    pub(super) fn new_temp(&mut self, info: TypeInfo) -> Register {
        let t = self.ctx.next_temp();
        self.registers.insert(t.clone(), RegisterInfo::new("", info));
        t
    }

    pub(super) fn block(&mut self, stmts: &[Stmt], out: &mut Ops) -> Result<(), ErrorKind> {
        for s in stmts {
            self.stmt(s, out)?;
        }
        Ok(())
    }

    /// Builds a nested body; bindings it introduces are dropped afterwards.
    fn scoped(&mut self, stmts: &[Stmt]) -> Result<Ops, ErrorKind> {
        let saved = self.ctx.clone_values();
        let mut ops = Vec::new();
        let res = self.block(stmts, &mut ops);
        self.ctx.restore_values(saved);
        res.map(|_| ops)
    }

    fn stmt(&mut self, s: &Stmt, out: &mut Ops) -> Result<(), ErrorKind> {
        match s {
            Stmt::Let(l) => {
                self.let_binding(&l.var, &l.value, false, out)?;
            }
            Stmt::Mut(m) => {
                self.let_binding(&m.var, &m.value, true, out)?;
            }
            Stmt::Assign(a) => self.assign(a, out)?,
            Stmt::Return(r) => self.ret(r, out)?,
            Stmt::If(i) => self.if_stmt(i, out)?,
            Stmt::While(w) => self.while_loop(w, out)?,
            Stmt::Match(m) => self.match_stmt(m, out)?,
            Stmt::Assert(a) => self.assertion(a, out)?,
            Stmt::Call(c) => {
                self.call(c, false, out)?;
            }
        }
        Ok(())
    }

    pub(super) fn let_binding(
        &mut self,
        var: &VarWithType,
        value: &Value,
        mutable: bool,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        if self.ctx.shadows_loop_entry(var) {
            return self.loop_shadow(var, value, mutable, out);
        }
        let vals = self.value(value, out)?;
        self.bind_new(var, value, vals, mutable, out)
    }

    /// Inside a loop, a shadow of a binding visible at loop entry gets its
    /// locals before the right-hand side is evaluated; the loop initializer
    /// seeds them from the outer binding.
    fn loop_shadow(
        &mut self,
        var: &VarWithType,
        value: &Value,
        mutable: bool,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        let old = self.ctx.get_words(var)?.to_vec();
        let mut new = Vec::with_capacity(old.len());
        for (i, o) in old.iter().enumerate() {
            let r = if i == 0 {
                self.ctx.next_local(var)
            } else {
                self.ctx.next_anonymous_local()
            };
            let mut info = self.register_info(o).clone().with_creator(var);
            info.mutable = mutable;
            self.registers.insert(r.clone(), info);
            new.push(r);
        }
        self.ctx.set_local(var, new.clone());
        for (o, n) in old.iter().zip(&new) {
            self.ctx.push_initializer(Opcode::mov(o.clone(), n.clone()));
        }
        let vals = self.value(value, out)?;
        if vals.len() != new.len() {
            return Err(ErrorKind::arity(
                format!("let `{}`", var.name),
                new.len(),
                vals.len(),
            ));
        }
        for (v, n) in vals.into_iter().zip(&new) {
            out.push(Opcode::mov(v, n.clone()));
        }
        Ok(new)
    }

    /// Allocates fresh locals for `var` and moves `vals` into them.
    fn bind_new(
        &mut self,
        var: &VarWithType,
        source: &Value,
        vals: Vec<Register>,
        mutable: bool,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        let regs = match var.typ.resolved() {
            Type::Slice(elem) if self.is_array_source(source) => {
                let elem = (**elem).clone();
                self.store_slice(var, &elem, vals, mutable, out)?
            }
            ty => {
                let words = if ty.is_string() && vals.len() == 1 {
                    vec![Word {
                        info: TypeInfo::POINTER,
                        pointer: true,
                    }]
                } else {
                    self.types.words(&var.typ)?
                };
                if words.len() != vals.len() {
                    return Err(ErrorKind::arity(
                        format!("let `{}`", var.name),
                        words.len(),
                        vals.len(),
                    ));
                }
                let is_array = ty.is_array();
                let mut regs = Vec::with_capacity(words.len());
                for (i, (w, v)) in words.into_iter().zip(vals).enumerate() {
                    let r = if i == 0 {
                        self.ctx.next_local(var)
                    } else {
                        self.ctx.next_anonymous_local()
                    };
                    let name = if is_array {
                        format!("{}[{}]", var.name, i)
                    } else {
                        var.name.clone()
                    };
                    let mut info = RegisterInfo::from_word(name, w).with_creator(var);
                    info.mutable = mutable;
                    self.registers.insert(r.clone(), info);
                    out.push(Opcode::mov(v, r.clone()));
                    regs.push(r);
                }
                regs
            }
        };
        self.ctx.set_local(var, regs.clone());
        Ok(regs)
    }

    /// Stored slice form: a length local followed by one local per element.
    fn store_slice(
        &mut self,
        var: &VarWithType,
        elem: &Type,
        vals: Vec<Register>,
        mutable: bool,
        out: &mut Ops,
    ) -> Result<Vec<Register>, ErrorKind> {
        let elem_info = self.types.element(elem)?;
        let len = self.ctx.next_local(var);
        let mut info = RegisterInfo::new(var.name.as_str(), self.types.length()).with_creator(var);
        info.slice_capacity = Some(vals.len() as u32);
        info.mutable = mutable;
        self.registers.insert(len.clone(), info);
        out.push(Opcode::mov(Register::IntLit(vals.len() as i64), len.clone()));
        let mut regs = vec![len];
        for (i, v) in vals.into_iter().enumerate() {
            let r = self.ctx.next_anonymous_local();
            let mut info =
                RegisterInfo::new(format!("{}[{}]", var.name, i), elem_info).with_creator(var);
            info.mutable = mutable;
            self.registers.insert(r.clone(), info);
            out.push(Opcode::mov(v, r.clone()));
            regs.push(r);
        }
        Ok(regs)
    }

    pub(super) fn is_array_source(&self, v: &Value) -> bool {
        match v.unwrapped() {
            Value::ArrayLit(_) => true,
            Value::Var(x) => x.typ.is_array(),
            Value::Cast(c) => self.is_array_source(&c.val),
            _ => false,
        }
    }

    fn assign(&mut self, a: &AssignmentOperator, out: &mut Ops) -> Result<(), ErrorKind> {
        match a.variable.unwrapped() {
            Value::Var(v) => {
                let dst = self.ctx.get_words(v)?.to_vec();
                let mut vals = self.value(&a.value, out)?;
                if v.typ.is_string() {
                    // A string reference points at the length word in front
                    // of the data the pair points to.
                    if let ([reference], [_, data]) = (dst.as_slice(), vals.as_slice()) {
                        out.push(Opcode::Arith {
                            op: ArithOp::Sub,
                            left: data.clone(),
                            right: Register::IntLit(self.types.length().size as i64),
                            dst: reference.clone(),
                        });
                        return Ok(());
                    }
                    if dst.len() == 2 && vals.len() == 1 {
                        vals = self.string_pair(vals)?;
                    }
                }
                if dst.len() != vals.len() {
                    return Err(ErrorKind::arity(
                        format!("assignment to `{}`", v.name),
                        dst.len(),
                        vals.len(),
                    ));
                }
                for (src, d) in vals.into_iter().zip(dst) {
                    out.push(Opcode::mov(src, d));
                }
                Ok(())
            }
            Value::Index(av) => {
                let dst = self.index_register(av, out)?;
                let src = single(self.value(&a.value, out)?, "indexed assignment")?;
                out.push(Opcode::mov(src, dst));
                Ok(())
            }
            other => Err(ErrorKind::Unsupported(format!(
                "assignment to a {}",
                describe(other)
            ))),
        }
    }

    fn ret(&mut self, r: &ReturnStmt, out: &mut Ops) -> Result<(), ErrorKind> {
        let Some(val) = &r.val else {
            out.push(Opcode::Ret);
            return Ok(());
        };
        if let Value::Call(fc) = val.unwrapped() {
            self.call(fc, true, out)?;
            out.push(Opcode::Ret);
            return Ok(());
        }
        let returns = self.ctx.returns().to_vec();
        let vals = match (val.unwrapped(), returns.as_slice()) {
            (Value::Tuple(items), rs) if rs.len() > 1 && items.len() == rs.len() => {
                let mut vals = Vec::new();
                for (item, ret) in items.iter().zip(rs) {
                    vals.extend(self.coerce(item, &ret.typ, out)?);
                }
                vals
            }
            (_, [ret]) => self.coerce(val, &ret.typ, out)?,
            _ => self.value(val, out)?,
        };
        if vals.len() != self.num_returns as usize {
            return Err(ErrorKind::arity(
                "return",
                self.num_returns as usize,
                vals.len(),
            ));
        }
        for (i, v) in vals.into_iter().enumerate() {
            out.push(Opcode::mov(v, Register::RetSlot(i as u32)));
        }
        out.push(Opcode::Ret);
        Ok(())
    }

    /// Evaluates a boolean expression into its own block.
    pub(super) fn condition(&mut self, v: &Value) -> Result<Condition, ErrorKind> {
        if !self.is_boolean(v) {
            return Err(ErrorKind::NonBooleanCondition(describe(v).to_string()));
        }
        let mut body = Vec::new();
        let register = single(self.value(v, &mut body)?, "condition")?;
        Ok(Condition { body, register })
    }

    fn is_boolean(&self, v: &Value) -> bool {
        match v.unwrapped() {
            Value::BoolLit(_) => true,
            Value::Binary(b) => b.op.is_comparison(),
            Value::Var(x) => x.typ.is_bool(),
            Value::Cast(c) => c.typ.is_bool(),
            Value::Let(l) => l.var.typ.is_bool(),
            Value::Index(av) => av.base.typ.element().map_or(false, Type::is_bool),
            Value::Call(fc) => self
                .callables
                .resolve(&fc.name)
                .map_or(false, |sig| matches!(sig.returns.as_slice(), [r] if r.typ.is_bool())),
            _ => false,
        }
    }

    fn if_stmt(&mut self, i: &IfStmt, out: &mut Ops) -> Result<(), ErrorKind> {
        let saved = self.ctx.clone_values();
        let cond = self.condition(&i.condition)?;
        let body = self.scoped(&i.body.stmts)?;
        let else_body = match &i.else_ {
            Some(b) => self.scoped(&b.stmts)?,
            None => Vec::new(),
        };
        self.ctx.restore_values(saved);
        out.push(Opcode::If {
            cond,
            body,
            else_body,
        });
        Ok(())
    }

    fn while_loop(&mut self, w: &WhileLoop, out: &mut Ops) -> Result<(), ErrorKind> {
        let saved = self.ctx.clone_values();
        self.ctx.enter_loop();
        let cond = self.condition(&w.condition)?;
        let body = self.scoped(&w.body.stmts)?;
        let initializer = self.ctx.exit_loop();
        self.ctx.restore_values(saved);
        out.push(Opcode::Loop {
            initializer,
            cond,
            body,
        });
        Ok(())
    }

    fn match_stmt(&mut self, m: &MatchStmt, out: &mut Ops) -> Result<(), ErrorKind> {
        let saved = self.ctx.clone_values();
        let mut cases = Vec::with_capacity(m.cases.len());
        match &m.condition {
            Some(scrutinee) => {
                let regs = self.value(scrutinee, out)?;
                let Some(tag) = regs.first().cloned() else {
                    return Err(ErrorKind::arity("match scrutinee", 1, 0));
                };
                for case in &m.cases {
                    let mut body = Vec::new();
                    let pattern = self.case_value(case, &mut body)?;
                    let register = self.new_temp(TypeInfo::BOOL);
                    body.push(Opcode::Compare {
                        op: CompareOp::Eq,
                        left: tag.clone(),
                        right: pattern,
                        dst: register.clone(),
                    });
                    let arm_saved = self.ctx.clone_values();
                    let mut arm = Vec::new();
                    let res = self
                        .bind_payload(case, &regs)
                        .and_then(|_| self.block(&case.body.stmts, &mut arm));
                    self.ctx.restore_values(arm_saved);
                    res?;
                    cases.push(ControlFlow {
                        condition: Condition { body, register },
                        body: arm,
                    });
                }
            }
            None => {
                for case in &m.cases {
                    let condition = self.condition(&case.variable)?;
                    let body = self.scoped(&case.body.stmts)?;
                    cases.push(ControlFlow { condition, body });
                }
            }
        }
        self.ctx.restore_values(saved);
        out.push(Opcode::JumpTable(cases));
        Ok(())
    }

    /// The word a case compares the scrutinee's first word against.
    fn case_value(&mut self, case: &MatchCase, body: &mut Ops) -> Result<Register, ErrorKind> {
        match case.variable.unwrapped() {
            Value::EnumOption(e) => Ok(Register::IntLit(
                self.enum_index(&e.typ, &e.constructor)? as i64,
            )),
            Value::EnumValue(e) => Ok(Register::IntLit(
                self.enum_index(&e.typ, &e.constructor)? as i64,
            )),
            other => single(self.value(other, body)?, "match case"),
        }
    }

    /// Binds each payload local to its words within the scrutinee.
    fn bind_payload(&mut self, case: &MatchCase, regs: &[Register]) -> Result<(), ErrorKind> {
        if case.locals.is_empty() {
            return Ok(());
        }
        let (typ, constructor) = match case.variable.unwrapped() {
            Value::EnumOption(e) => (&e.typ, &e.constructor),
            Value::EnumValue(e) => (&e.typ, &e.constructor),
            other => {
                return Err(ErrorKind::Unsupported(format!(
                    "payload bindings on a {} case",
                    describe(other)
                )))
            }
        };
        let offsets = self.types.payload_offsets(typ, constructor)?;
        if offsets.len() != case.locals.len() {
            return Err(ErrorKind::arity(
                format!("payload of `{}`", constructor),
                offsets.len(),
                case.locals.len(),
            ));
        }
        for (local, (at, width)) in case.locals.iter().zip(offsets) {
            let words = regs
                .get(1 + at..1 + at + width)
                .ok_or_else(|| ErrorKind::arity("match scrutinee", 1 + at + width, regs.len()))?;
            self.ctx.set_local(local, words.to_vec());
        }
        Ok(())
    }

    fn assertion(&mut self, a: &Assertion, out: &mut Ops) -> Result<(), ErrorKind> {
        let predicate = self.condition(&a.predicate)?;
        out.push(Opcode::Assert {
            predicate,
            message: a.message.clone().unwrap_or_default(),
            span: a.span,
        });
        Ok(())
    }
}
