//! HLIR function -> wasm instructions.

use crate::classify::{for_each_register, Frame};
use crate::data::DataSection;
use crate::imports::ImportTable;
use crate::module::{FuncType, Function, Instr, NumOp, RelOp, ValType};
use crate::WasmError;
use lode_syntax::hlir::{self, ArithOp, CompareOp, Condition, ControlFlow, Opcode};
use lode_syntax::{Register, RegisterInfo, TypeInfo, TypeInformation, PRINT_STRING};
use std::collections::BTreeMap;
use tracing::trace;

/// Global index of the heap pointer.
const HEAP_PTR: u32 = 0;
/// Stride of words in a multi-word return area.
const RET_STRIDE: u32 = 8;
/// Bytes of the length word in front of string data.
const LENGTH_WORD: i32 = 8;

pub(crate) fn lower_function(
    func: &hlir::Func,
    frame: Frame,
    sigs: &BTreeMap<String, FuncType>,
    types: &TypeInformation,
    imports: &mut ImportTable,
    data: &mut DataSection,
) -> Result<Function, WasmError> {
    let ty = sigs
        .get(&func.name)
        .cloned()
        .ok_or_else(|| WasmError::UnknownFunction(func.name.clone()))?;
    let mut lower = FnLower {
        func,
        frame,
        ty,
        sigs,
        types,
        imports,
        data,
        slots: BTreeMap::new(),
        locals: Vec::new(),
        frame_local: None,
        scratch: BTreeMap::new(),
        ret_addr: None,
        body: Vec::new(),
        calls: 0,
    };
    lower.assign_slots()?;
    lower.ops(&func.body)?;
    if lower.ty.results.is_empty() {
        lower.epilogue();
    } else {
        lower.body.push(Instr::Unreachable);
    }
    let mut body = lower.prologue()?;
    body.append(&mut lower.body);
    trace!(
        function = %func.name,
        locals = lower.locals.len(),
        frame = lower.frame.size,
        "lowered function"
    );
    Ok(Function {
        name: func.name.clone(),
        ty: lower.ty,
        locals: lower.locals,
        body,
        export: true,
    })
}

struct FnLower<'f, 'm> {
    func: &'f hlir::Func,
    frame: Frame,
    ty: FuncType,
    sigs: &'m BTreeMap<String, FuncType>,
    types: &'m TypeInformation,
    imports: &'m mut ImportTable,
    data: &'m mut DataSection,
    /// Register -> wasm local index, for registers held in wasm locals.
    slots: BTreeMap<Register, u32>,
    /// Declared locals after the params.
    locals: Vec<ValType>,
    frame_local: Option<u32>,
    scratch: BTreeMap<ValType, u32>,
    ret_addr: Option<u32>,
    body: Vec<Instr>,
    calls: u32,
}

impl<'f, 'm> FnLower<'f, 'm> {
    fn info(&self, r: &Register) -> Result<&'f RegisterInfo, WasmError> {
        self.func
            .registers
            .get(r)
            .ok_or_else(|| WasmError::MissingRegister(r.to_string()))
    }

    fn declare(&mut self, vt: ValType) -> u32 {
        let index = self.ty.params.len() as u32 + self.locals.len() as u32;
        self.locals.push(vt);
        index
    }

    /// Wasm locals for register-held values in register order, so locals
    /// come first by index, then temps, then return slots.
    fn assign_slots(&mut self) -> Result<(), WasmError> {
        let func = self.func;
        let mut seen = Vec::new();
        let mut visit = |r: &'f Register| collect(r, &mut seen);
        for_each_register(&func.body, &mut visit);
        seen.sort();
        seen.dedup();
        for r in seen {
            if self.memory_slot(r).is_none() {
                self.slot(r)?;
            }
        }
        if !self.frame.is_empty() {
            self.frame_local = Some(self.declare(ValType::I32));
        }
        Ok(())
    }

    fn slot(&mut self, r: &Register) -> Result<u32, WasmError> {
        if let Some(&i) = self.slots.get(r) {
            return Ok(i);
        }
        let vt = ValType::of_size(self.info(r)?.size());
        let i = self.declare(vt);
        self.slots.insert(r.clone(), i);
        Ok(i)
    }

    fn scratch(&mut self, vt: ValType) -> u32 {
        if let Some(&i) = self.scratch.get(&vt) {
            return i;
        }
        let i = self.declare(vt);
        self.scratch.insert(vt, i);
        i
    }

    fn memory_slot(&self, r: &Register) -> Option<u32> {
        match r {
            Register::Local(i) => self.frame.offset(*i),
            Register::Param {
                id,
                reference: false,
            } => self.frame.param_offset(*id),
            _ => None,
        }
    }

    fn frame_base(&mut self) -> Result<(), WasmError> {
        let local = self
            .frame_local
            .ok_or_else(|| WasmError::Unsupported("frame access without a frame".to_string()))?;
        self.body.push(Instr::LocalGet(local));
        Ok(())
    }

    /// Allocates the frame and copies in the params that live there.
    fn prologue(&self) -> Result<Vec<Instr>, WasmError> {
        let Some(local) = self.frame_local else {
            return Ok(Vec::new());
        };
        let mut out = vec![
            Instr::GlobalGet(HEAP_PTR),
            Instr::LocalTee(local),
            Instr::I32Const(self.frame.size as i32),
            Instr::Num(ValType::I32, NumOp::Add),
            Instr::GlobalSet(HEAP_PTR),
        ];
        for (&id, &at) in &self.frame.params {
            let size = self.info(&Register::param(id))?.size();
            out.push(Instr::LocalGet(local));
            out.push(Instr::LocalGet(id));
            out.push(Instr::Store {
                ty: ValType::of_size(size),
                bytes: size,
                offset: at,
            });
        }
        Ok(out)
    }

    /// Releases the frame; every return path goes through here.
    fn epilogue(&mut self) {
        if let Some(local) = self.frame_local {
            self.body.push(Instr::LocalGet(local));
            self.body.push(Instr::GlobalSet(HEAP_PTR));
        }
    }

    /// Layout of the value `r` reads as. Integer literals have none.
    fn operand_info(&self, r: &Register) -> Result<Option<TypeInfo>, WasmError> {
        Ok(match r {
            Register::IntLit(_) => None,
            Register::StrLit(_) | Register::Pointer(_) | Register::SliceBase(_) => {
                Some(TypeInfo::POINTER)
            }
            Register::Offset {
                scale, container, ..
            } => Some(self.element_info(*scale, container)),
            other => Some(self.info(other)?.type_info),
        })
    }

    fn element_info(&self, scale: u32, container: &lode_syntax::VarWithType) -> TypeInfo {
        container
            .typ
            .element()
            .map(|e| self.types.scalar(e))
            .filter(|info| info.size == scale)
            .unwrap_or(TypeInfo::new(scale, true))
    }

    /// Wasm type a register stores into.
    fn dst_type(&self, r: &Register) -> Result<ValType, WasmError> {
        let info = self
            .operand_info(r)?
            .ok_or_else(|| WasmError::Unsupported(format!("store to literal {}", r)))?;
        Ok(ValType::of_size(info.size))
    }

    fn convert(&mut self, have: ValType, signed: bool, want: ValType) {
        match (have, want) {
            (ValType::I32, ValType::I64) if signed => self.body.push(Instr::I64ExtendI32S),
            (ValType::I32, ValType::I64) => self.body.push(Instr::I64ExtendI32U),
            (ValType::I64, ValType::I32) => self.body.push(Instr::I32WrapI64),
            _ => {}
        }
    }

    /// Pushes the value of `r` as a `want`.
    fn get(&mut self, r: &Register, want: ValType) -> Result<(), WasmError> {
        let (have, signed) = self.push(r, want)?;
        self.convert(have, signed, want);
        Ok(())
    }

    fn push(&mut self, r: &Register, hint: ValType) -> Result<(ValType, bool), WasmError> {
        match r {
            Register::IntLit(n) => {
                self.body.push(match hint {
                    ValType::I32 => Instr::I32Const(*n as i32),
                    ValType::I64 => Instr::I64Const(*n),
                });
                Ok((hint, true))
            }
            Register::StrLit(s) => {
                let addr = self.data.intern(s);
                self.body.push(Instr::I32Const(addr as i32));
                Ok((ValType::I32, false))
            }
            Register::Pointer(inner) => {
                self.address_of(inner)?;
                Ok((ValType::I32, false))
            }
            Register::SliceBase(inner) => {
                self.get(inner, ValType::I32)?;
                self.body.push(Instr::I32Const(LENGTH_WORD));
                self.body.push(Instr::Num(ValType::I32, NumOp::Add));
                Ok((ValType::I32, false))
            }
            Register::Offset {
                base,
                offset,
                scale,
                container,
            } => {
                let info = self.element_info(*scale, container);
                let at = self.address(base, offset, *scale)?;
                Ok(self.load(info, at))
            }
            Register::Param { id, reference } => {
                let info = self.info(r)?.type_info;
                if let Some(at) = self.memory_slot(r) {
                    self.frame_base()?;
                    return Ok(self.load(info, at));
                }
                self.body.push(Instr::LocalGet(*id));
                if *reference {
                    return Ok(self.load(info, 0));
                }
                Ok((ValType::of_size(info.size), info.signed))
            }
            _ => {
                let info = self.info(r)?.type_info;
                if let Some(at) = self.memory_slot(r) {
                    self.frame_base()?;
                    return Ok(self.load(info, at));
                }
                let slot = self.slot(r)?;
                self.body.push(Instr::LocalGet(slot));
                Ok((ValType::of_size(info.size), info.signed))
            }
        }
    }

    fn load(&mut self, info: TypeInfo, offset: u32) -> (ValType, bool) {
        let ty = ValType::of_size(info.size);
        self.body.push(Instr::Load {
            ty,
            bytes: info.size,
            signed: info.signed,
            offset,
        });
        (ty, info.signed)
    }

    /// Pushes the address of `inner`.
    fn address_of(&mut self, inner: &Register) -> Result<(), WasmError> {
        if let Some(at) = self.memory_slot(inner) {
            self.frame_base()?;
            if at > 0 {
                self.body.push(Instr::I32Const(at as i32));
                self.body.push(Instr::Num(ValType::I32, NumOp::Add));
            }
            return Ok(());
        }
        match inner {
            Register::Param {
                id,
                reference: true,
            } => {
                self.body.push(Instr::LocalGet(*id));
                Ok(())
            }
            other => Err(WasmError::Unsupported(format!("address of {}", other))),
        }
    }

    /// Pushes the dynamic part of `base + offset * scale` and returns the
    /// static part, for use as a load/store offset.
    fn address(&mut self, base: &Register, offset: &Register, scale: u32) -> Result<u32, WasmError> {
        let mut at = match self.memory_slot(base) {
            Some(at) if !self.info(base)?.pointer => {
                self.frame_base()?;
                at
            }
            _ => {
                self.get(base, ValType::I32)?;
                0
            }
        };
        match offset {
            Register::IntLit(k) if *k >= 0 && (*k as u64) * (scale as u64) < u32::MAX as u64 => {
                at += *k as u32 * scale;
            }
            _ => {
                self.get(offset, ValType::I32)?;
                if scale != 1 {
                    self.body.push(Instr::I32Const(scale as i32));
                    self.body.push(Instr::Num(ValType::I32, NumOp::Mul));
                }
                self.body.push(Instr::Num(ValType::I32, NumOp::Add));
            }
        }
        Ok(at)
    }

    /// Stores the value on top of the stack, already converted to
    /// `dst_type(dst)`, into `dst`.
    fn store(&mut self, dst: &Register) -> Result<(), WasmError> {
        let vt = self.dst_type(dst)?;
        match dst {
            Register::Param {
                id,
                reference: false,
            } => match self.memory_slot(dst) {
                Some(at) => {
                    let bytes = self.info(dst)?.size();
                    let tmp = self.scratch(vt);
                    self.body.push(Instr::LocalSet(tmp));
                    self.frame_base()?;
                    self.body.push(Instr::LocalGet(tmp));
                    self.body.push(Instr::Store {
                        ty: vt,
                        bytes,
                        offset: at,
                    });
                }
                None => self.body.push(Instr::LocalSet(*id)),
            },
            Register::Param {
                id,
                reference: true,
            } => {
                let bytes = self.info(dst)?.size();
                let tmp = self.scratch(vt);
                self.body.push(Instr::LocalSet(tmp));
                self.body.push(Instr::LocalGet(*id));
                self.body.push(Instr::LocalGet(tmp));
                self.body.push(Instr::Store {
                    ty: vt,
                    bytes,
                    offset: 0,
                });
            }
            Register::Offset {
                base,
                offset,
                scale,
                ..
            } => {
                let tmp = self.scratch(vt);
                self.body.push(Instr::LocalSet(tmp));
                let at = self.address(base, offset, *scale)?;
                self.body.push(Instr::LocalGet(tmp));
                self.body.push(Instr::Store {
                    ty: vt,
                    bytes: *scale,
                    offset: at,
                });
            }
            r if r.is_storage() => {
                if let Some(at) = self.memory_slot(r) {
                    let bytes = self.info(r)?.size();
                    let tmp = self.scratch(vt);
                    self.body.push(Instr::LocalSet(tmp));
                    self.frame_base()?;
                    self.body.push(Instr::LocalGet(tmp));
                    self.body.push(Instr::Store {
                        ty: vt,
                        bytes,
                        offset: at,
                    });
                } else {
                    let slot = self.slot(r)?;
                    self.body.push(Instr::LocalSet(slot));
                }
            }
            other => return Err(WasmError::Unsupported(format!("store to {}", other))),
        }
        Ok(())
    }

    /// Operand width and signedness for a two-operand instruction.
    fn operation_type(&self, left: &Register, right: &Register) -> Result<(ValType, bool), WasmError> {
        let l = self.operand_info(left)?;
        let r = self.operand_info(right)?;
        let size = l.map_or(0, |i| i.size).max(r.map_or(0, |i| i.size));
        let signed = l.or(r).map_or(true, |i| i.signed);
        let ty = if size == 0 {
            ValType::of_size(self.types.scalar(&lode_syntax::Type::Int).size)
        } else {
            ValType::of_size(size)
        };
        Ok((ty, signed))
    }

    fn ops(&mut self, ops: &[Opcode]) -> Result<(), WasmError> {
        let mut after_tail = false;
        for op in ops {
            if std::mem::take(&mut after_tail) && matches!(op, Opcode::Ret) {
                continue;
            }
            after_tail = matches!(op, Opcode::Call { tail: true, .. });
            self.op(op)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Opcode) -> Result<(), WasmError> {
        match op {
            Opcode::Mov { src, dst } => {
                let vt = self.dst_type(dst)?;
                self.get(src, vt)?;
                self.store(dst)
            }
            Opcode::Arith {
                op,
                left,
                right,
                dst,
            } => {
                let (ty, signed) = self.operation_type(left, right)?;
                self.get(left, ty)?;
                self.get(right, ty)?;
                let num = match (op, signed) {
                    (ArithOp::Add, _) => NumOp::Add,
                    (ArithOp::Sub, _) => NumOp::Sub,
                    (ArithOp::Mul, _) => NumOp::Mul,
                    (ArithOp::Div, true) => NumOp::DivS,
                    (ArithOp::Div, false) => NumOp::DivU,
                    (ArithOp::Mod, true) => NumOp::RemS,
                    (ArithOp::Mod, false) => NumOp::RemU,
                };
                self.body.push(Instr::Num(ty, num));
                let want = self.dst_type(dst)?;
                self.convert(ty, signed, want);
                self.store(dst)
            }
            Opcode::Compare {
                op,
                left,
                right,
                dst,
            } => {
                self.compare(*op, left, right)?;
                let want = self.dst_type(dst)?;
                self.convert(ValType::I32, false, want);
                self.store(dst)
            }
            Opcode::Call { name, args, tail } => self.call(name, args, *tail),
            Opcode::Ret => self.ret(),
            Opcode::If {
                cond,
                body,
                else_body,
            } => {
                self.condition(cond)?;
                self.body.push(Instr::If);
                self.ops(body)?;
                if !else_body.is_empty() {
                    self.body.push(Instr::Else);
                    self.ops(else_body)?;
                }
                self.body.push(Instr::End);
                Ok(())
            }
            Opcode::Loop {
                initializer,
                cond,
                body,
            } => {
                self.ops(initializer)?;
                self.body.push(Instr::Block);
                self.body.push(Instr::Loop);
                self.condition(cond)?;
                self.body.push(Instr::I32Eqz);
                self.body.push(Instr::BrIf(1));
                self.ops(body)?;
                self.body.push(Instr::Br(0));
                self.body.push(Instr::End);
                self.body.push(Instr::End);
                Ok(())
            }
            Opcode::JumpTable(cases) => self.jump_table(cases),
            Opcode::Assert {
                predicate, message, ..
            } => {
                self.condition(predicate)?;
                self.body.push(Instr::I32Eqz);
                self.body.push(Instr::If);
                if !message.is_empty() {
                    self.imports.require(PRINT_STRING)?;
                    let addr = self.data.intern(message);
                    self.body.push(Instr::I32Const(addr as i32));
                    self.body.push(Instr::Call(PRINT_STRING.to_string()));
                }
                self.body.push(Instr::Unreachable);
                self.body.push(Instr::End);
                Ok(())
            }
        }
    }

    /// First matching case wins; cases nest as `if .. else if ..`.
    fn jump_table(&mut self, cases: &[ControlFlow]) -> Result<(), WasmError> {
        let Some((first, rest)) = cases.split_first() else {
            return Ok(());
        };
        self.condition(&first.condition)?;
        self.body.push(Instr::If);
        self.ops(&first.body)?;
        if !rest.is_empty() {
            self.body.push(Instr::Else);
            self.jump_table(rest)?;
        }
        self.body.push(Instr::End);
        Ok(())
    }

    /// Pushes the condition's truth value as an i32. A trailing comparison
    /// into the condition register is evaluated in place.
    fn condition(&mut self, cond: &Condition) -> Result<(), WasmError> {
        if let Some((Opcode::Compare {
            op,
            left,
            right,
            dst,
        }, init)) = cond.body.split_last()
        {
            if *dst == cond.register {
                self.ops(init)?;
                return self.compare(*op, left, right);
            }
        }
        self.ops(&cond.body)?;
        let (have, _) = self.push(&cond.register, ValType::I32)?;
        if have == ValType::I64 {
            self.body.push(Instr::I64Const(0));
            self.body.push(Instr::Rel(ValType::I64, RelOp::Ne));
        }
        Ok(())
    }

    fn compare(&mut self, op: CompareOp, left: &Register, right: &Register) -> Result<(), WasmError> {
        let (ty, signed) = self.operation_type(left, right)?;
        self.get(left, ty)?;
        self.get(right, ty)?;
        let rel = match (op, signed) {
            (CompareOp::Eq, _) => RelOp::Eq,
            (CompareOp::Neq, _) => RelOp::Ne,
            (CompareOp::Lt, true) => RelOp::LtS,
            (CompareOp::Lt, false) => RelOp::LtU,
            (CompareOp::Lte, true) => RelOp::LeS,
            (CompareOp::Lte, false) => RelOp::LeU,
            (CompareOp::Gt, true) => RelOp::GtS,
            (CompareOp::Gt, false) => RelOp::GtU,
            (CompareOp::Geq, true) => RelOp::GeS,
            (CompareOp::Geq, false) => RelOp::GeU,
        };
        self.body.push(Instr::Rel(ty, rel));
        Ok(())
    }

    fn callee_type(&mut self, name: &str) -> Result<FuncType, WasmError> {
        match self.sigs.get(name) {
            Some(ty) => Ok(ty.clone()),
            None => self.imports.require(name),
        }
    }

    /// Result words of call number `call`, in order.
    fn result_words(&self, call: u32) -> Vec<(Register, &'f RegisterInfo)> {
        (0..)
            .map(|ret| Register::LastCallRet { call, ret })
            .map_while(|r| self.func.registers.get(&r).map(|info| (r, info)))
            .collect()
    }

    fn call(&mut self, name: &str, args: &[Register], tail: bool) -> Result<(), WasmError> {
        let ty = self.callee_type(name)?;
        if ty.params.len() != args.len() {
            return Err(WasmError::ArgumentCount {
                name: name.to_string(),
                expected: ty.params.len(),
                found: args.len(),
            });
        }
        for (arg, want) in args.iter().zip(&ty.params) {
            self.get(arg, *want)?;
        }
        if tail {
            return self.tail_call(name, &ty, args);
        }
        self.body.push(Instr::Call(name.to_string()));
        let call = self.calls;
        self.calls += 1;
        let words = self.result_words(call);

        match (ty.results.as_slice(), words.as_slice()) {
            ([], _) => {}
            ([_], [] | [_]) => match words.first() {
                Some((r, _)) if self.slots.contains_key(r) => {
                    let slot = self.slots[r];
                    self.body.push(Instr::LocalSet(slot));
                }
                _ => self.body.push(Instr::Drop),
            },
            ([_], _) => {
                let addr = match self.ret_addr {
                    Some(i) => i,
                    None => {
                        let i = self.declare(ValType::I32);
                        self.ret_addr = Some(i);
                        i
                    }
                };
                self.body.push(Instr::LocalSet(addr));
                for (i, (r, info)) in words.iter().enumerate() {
                    let Some(&slot) = self.slots.get(r) else {
                        continue;
                    };
                    self.body.push(Instr::LocalGet(addr));
                    self.load(info.type_info, RET_STRIDE * i as u32);
                    self.body.push(Instr::LocalSet(slot));
                }
            }
            _ => {
                return Err(WasmError::Unsupported(format!(
                    "call to `{}` with {} results",
                    name,
                    ty.results.len()
                )))
            }
        }
        Ok(())
    }

    /// Releases the frame and leaves through `return_call`. An argument that
    /// points into the frame, or a result needing conversion, keeps the
    /// frame alive across a plain call instead.
    fn tail_call(&mut self, name: &str, ty: &FuncType, args: &[Register]) -> Result<(), WasmError> {
        let call = self.calls;
        self.calls += 1;
        let words = self.result_words(call);
        let results = self.ty.results.clone();
        let (callee_multi, caller_multi) = (words.len() > 1, self.func.num_returns > 1);
        match (ty.results.as_slice(), results.as_slice()) {
            ([], []) => {}
            ([_], [_]) if callee_multi == caller_multi => {}
            _ => {
                return Err(WasmError::Unsupported(format!(
                    "tail call to `{}` with a different result shape",
                    name
                )))
            }
        }
        let borrows_frame = args.iter().any(|a| match a {
            Register::Pointer(inner) => self.memory_slot(inner).is_some(),
            _ => false,
        });
        if ty.results == results && !borrows_frame {
            self.epilogue();
            self.body.push(Instr::ReturnCall(name.to_string()));
            return Ok(());
        }
        self.body.push(Instr::Call(name.to_string()));
        if let ([have], [want]) = (ty.results.as_slice(), results.as_slice()) {
            let signed = words.first().map_or(true, |(_, i)| i.signed());
            self.convert(*have, signed, *want);
        }
        self.epilogue();
        self.body.push(Instr::Return);
        Ok(())
    }

    fn ret(&mut self) -> Result<(), WasmError> {
        match self.func.num_returns {
            0 => {}
            1 => {
                let want = self.ty.results[0];
                self.get(&Register::RetSlot(0), want)?;
            }
            n => {
                let area = self.frame.ret_area.ok_or_else(|| {
                    WasmError::Unsupported("multi-word return without a return area".to_string())
                })?;
                for i in 0..n {
                    let slot = Register::RetSlot(i);
                    let info = self.info(&slot)?.type_info;
                    let vt = ValType::of_size(info.size);
                    self.frame_base()?;
                    self.get(&slot, vt)?;
                    self.body.push(Instr::Store {
                        ty: vt,
                        bytes: info.size,
                        offset: area + RET_STRIDE * i,
                    });
                }
                self.frame_base()?;
                self.body.push(Instr::I32Const(area as i32));
                self.body.push(Instr::Num(ValType::I32, NumOp::Add));
            }
        }
        self.epilogue();
        self.body.push(Instr::Return);
        Ok(())
    }
}

/// Collects registers held in wasm locals, looking through address forms.
fn collect<'f>(r: &'f Register, out: &mut Vec<&'f Register>) {
    match r {
        Register::Local(_) | Register::Temp(_) | Register::RetSlot(_) | Register::LastCallRet { .. } => {
            out.push(r)
        }
        Register::Pointer(inner) | Register::SliceBase(inner) => collect(inner, out),
        Register::Offset { base, offset, .. } => {
            collect(base, out);
            collect(offset, out);
        }
        _ => {}
    }
}
