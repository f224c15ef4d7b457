//! Register classification: which HLIR locals must live in linear memory,
//! and where in the function's frame each of them sits.

use crate::data::align8;
use lode_syntax::hlir::{self, Condition, Opcode};
use lode_syntax::{Register, RegisterData};
use std::collections::{BTreeMap, BTreeSet};

/// Byte layout of a function's memory frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    /// Memory-backed local index -> byte offset from the frame base.
    pub slots: BTreeMap<u32, u32>,
    /// By-value param id -> offset of its copy, made in the prologue.
    pub params: BTreeMap<u32, u32>,
    /// Where multi-word results are written before returning.
    pub ret_area: Option<u32>,
    pub size: u32,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn offset(&self, local: u32) -> Option<u32> {
        self.slots.get(&local).copied()
    }

    pub fn param_offset(&self, id: u32) -> Option<u32> {
        self.params.get(&id).copied()
    }
}

/// Calls `f` on every register operand in `ops`, nested bodies included.
pub fn for_each_register<'a>(ops: &'a [Opcode], f: &mut impl FnMut(&'a Register)) {
    for op in ops {
        match op {
            Opcode::Mov { src, dst } => {
                f(src);
                f(dst);
            }
            Opcode::Arith {
                left, right, dst, ..
            }
            | Opcode::Compare {
                left, right, dst, ..
            } => {
                f(left);
                f(right);
                f(dst);
            }
            Opcode::Call { args, .. } => args.iter().for_each(&mut *f),
            Opcode::Ret => {}
            Opcode::If {
                cond,
                body,
                else_body,
            } => {
                condition(cond, f);
                for_each_register(body, f);
                for_each_register(else_body, f);
            }
            Opcode::Loop {
                initializer,
                cond,
                body,
            } => {
                for_each_register(initializer, f);
                condition(cond, f);
                for_each_register(body, f);
            }
            Opcode::JumpTable(cases) => {
                for case in cases {
                    condition(&case.condition, f);
                    for_each_register(&case.body, f);
                }
            }
            Opcode::Assert { predicate, .. } => condition(predicate, f),
        }
    }
}

fn condition<'a>(cond: &'a Condition, f: &mut impl FnMut(&'a Register)) {
    for_each_register(&cond.body, f);
    f(&cond.register);
}

fn is_pointer(registers: &RegisterData, r: &Register) -> bool {
    registers.get(r).map_or(false, |info| info.pointer)
}

/// Locals and by-value params whose address is needed.
#[derive(Default)]
struct Roots {
    locals: BTreeSet<u32>,
    params: BTreeSet<u32>,
}

impl Roots {
    /// `r` is the base of an Offset or the target of a Pointer.
    fn insert(&mut self, r: &Register, registers: &RegisterData, through_pointer: bool) {
        if through_pointer && is_pointer(registers, r) {
            return;
        }
        match *r {
            Register::Local(i) => {
                self.locals.insert(i);
            }
            Register::Param {
                id,
                reference: false,
            } => {
                self.params.insert(id);
            }
            _ => {}
        }
    }
}

fn mark(r: &Register, registers: &RegisterData, roots: &mut Roots) {
    match r {
        Register::Offset { base, offset, .. } => {
            roots.insert(base, registers, true);
            mark(base, registers, roots);
            mark(offset, registers, roots);
        }
        Register::Pointer(inner) => {
            roots.insert(inner, registers, false);
            mark(inner, registers, roots);
        }
        Register::SliceBase(inner) => mark(inner, registers, roots),
        _ => {}
    }
}

/// The contiguous run of registers around `index` sharing its creator, so
/// an indexed aggregate moves to memory whole.
fn region(
    func: &hlir::Func,
    index: u32,
    count: u32,
    reg: fn(u32) -> Register,
) -> std::ops::RangeInclusive<u32> {
    let creator = |i: u32| {
        func.registers
            .get(&reg(i))
            .and_then(|info| info.creator.as_ref())
    };
    let Some(owner) = creator(index) else {
        return index..=index;
    };
    let mut lo = index;
    while lo > 0 && creator(lo - 1) == Some(owner) {
        lo -= 1;
    }
    let mut hi = index;
    while hi + 1 < count && creator(hi + 1) == Some(owner) {
        hi += 1;
    }
    lo..=hi
}

/// Packs `indices` from `offset` on. Each creator's run starts 8-aligned and
/// is packed by register size.
fn place(
    func: &hlir::Func,
    indices: BTreeSet<u32>,
    reg: fn(u32) -> Register,
    offset: &mut u32,
    out: &mut BTreeMap<u32, u32>,
) {
    let creator = |i: u32| {
        func.registers
            .get(&reg(i))
            .and_then(|info| info.creator.as_ref())
    };
    let mut prev: Option<u32> = None;
    for index in indices {
        let contiguous = prev.map_or(false, |p| p + 1 == index && creator(p) == creator(index));
        if !contiguous {
            *offset = align8(*offset);
        }
        out.insert(index, *offset);
        *offset += func
            .registers
            .get(&reg(index))
            .map_or(lode_syntax::layout::DEFAULT_WORD_SIZE, |i| i.size());
        prev = Some(index);
    }
}

/// Lays out the memory-backed locals of `func` in ascending index order,
/// then the params that need an address, then the multi-word return area.
pub fn classify(func: &hlir::Func) -> Frame {
    let mut roots = Roots::default();
    let mut visit = |r: &Register| mark(r, &func.registers, &mut roots);
    for_each_register(&func.body, &mut visit);

    let mut locals = BTreeSet::new();
    for root in roots.locals {
        locals.extend(region(func, root, func.num_locals, Register::Local));
    }
    let mut params = BTreeSet::new();
    for root in roots.params {
        params.extend(region(func, root, func.num_params, Register::param));
    }

    let mut frame = Frame::default();
    let mut offset = 0;
    place(func, locals, Register::Local, &mut offset, &mut frame.slots);
    place(func, params, Register::param, &mut offset, &mut frame.params);
    if func.num_returns > 1 {
        let at = align8(offset);
        frame.ret_area = Some(at);
        offset = at + 8 * func.num_returns;
    }
    frame.size = align8(offset);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_syntax::ast::{Type, VarWithType};
    use lode_syntax::{RegisterInfo, TypeInfo};

    fn func(body: Vec<Opcode>, registers: RegisterData, num_locals: u32) -> hlir::Func {
        hlir::Func {
            name: "f".to_string(),
            args: vec![],
            returns: vec![],
            body,
            registers,
            num_params: 0,
            num_returns: 0,
            num_locals,
            num_temps: 0,
            num_calls: 0,
        }
    }

    #[test]
    fn indexed_arrays_move_to_memory_whole() {
        let n = VarWithType::new("n", Type::array(Type::Int, 3));
        let other = VarWithType::new("k", Type::Int);
        let mut regs = RegisterData::new();
        for i in 0..3 {
            regs.insert(
                Register::Local(i),
                RegisterInfo::new(format!("n[{}]", i), TypeInfo::INT).with_creator(&n),
            );
        }
        regs.insert(
            Register::Local(3),
            RegisterInfo::new("k", TypeInfo::INT).with_creator(&other),
        );
        let body = vec![Opcode::mov(
            Register::offset(Register::Local(0), Register::Local(3), 8, n.clone()),
            Register::Local(3),
        )];
        let frame = classify(&func(body, regs, 4));
        assert_eq!(frame.slots.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(frame.offset(2), Some(16));
        assert_eq!(frame.size, 24);
    }

    #[test]
    fn pointer_locals_are_read_not_addressed() {
        let s = VarWithType::new("s", Type::Str);
        let mut regs = RegisterData::new();
        let mut info = RegisterInfo::new("s", TypeInfo::POINTER).with_creator(&s);
        info.pointer = true;
        regs.insert(Register::Local(0), info);
        let body = vec![Opcode::mov(
            Register::offset(Register::Local(0), Register::IntLit(0), 8, s.clone()),
            Register::Temp(0),
        )];
        assert!(classify(&func(body, regs, 1)).is_empty());
    }

    #[test]
    fn address_of_marks_the_target() {
        let x = VarWithType::new("x", Type::Int);
        let mut regs = RegisterData::new();
        regs.insert(
            Register::Local(0),
            RegisterInfo::new("x", TypeInfo::INT).with_creator(&x),
        );
        let body = vec![Opcode::Call {
            name: "inc".to_string(),
            args: vec![Register::pointer(Register::Local(0))],
            tail: false,
        }];
        let frame = classify(&func(body, regs, 1));
        assert_eq!(frame.offset(0), Some(0));
        assert_eq!(frame.size, 8);
    }

    #[test]
    fn variably_indexed_array_params_are_copied_whole() {
        let a = VarWithType::new("a", Type::array(Type::Int, 2));
        let k = VarWithType::new("k", Type::Int);
        let mut regs = RegisterData::new();
        for id in 0..2 {
            regs.insert(
                Register::param(id),
                RegisterInfo::new("a", TypeInfo::INT).with_creator(&a),
            );
        }
        regs.insert(
            Register::param(2),
            RegisterInfo::new("k", TypeInfo::INT).with_creator(&k),
        );
        regs.insert(Register::Temp(0), RegisterInfo::new("", TypeInfo::INT));
        let body = vec![Opcode::mov(
            Register::offset(Register::param(0), Register::param(2), 8, a.clone()),
            Register::Temp(0),
        )];
        let mut f = func(body, regs, 0);
        f.num_params = 3;
        let frame = classify(&f);
        assert!(frame.slots.is_empty());
        assert_eq!(frame.param_offset(0), Some(0));
        assert_eq!(frame.param_offset(1), Some(8));
        assert_eq!(frame.param_offset(2), None);
        assert_eq!(frame.size, 16);
    }

    #[test]
    fn params_passed_by_reference_get_a_frame_copy() {
        let y = VarWithType::new("y", Type::Int);
        let mut regs = RegisterData::new();
        regs.insert(
            Register::param(0),
            RegisterInfo::new("y", TypeInfo::INT).with_creator(&y),
        );
        let body = vec![Opcode::Call {
            name: "inc".to_string(),
            args: vec![Register::pointer(Register::param(0))],
            tail: false,
        }];
        let mut f = func(body, regs, 0);
        f.num_params = 1;
        let frame = classify(&f);
        assert_eq!(frame.param_offset(0), Some(0));
        assert_eq!(frame.size, 8);
    }
}
