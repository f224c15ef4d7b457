//! Binary encoding through wasm-encoder.

use crate::module::{FuncType, Instr, NumOp, RelOp, ValType, WasmModule};
use crate::WasmError;
use std::collections::BTreeMap;
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection,
    Function, FunctionSection, GlobalSection, GlobalType, ImportSection, Instruction, MemArg,
    MemorySection, MemoryType, Module, TypeSection,
};

fn val(ty: ValType) -> wasm_encoder::ValType {
    match ty {
        ValType::I32 => wasm_encoder::ValType::I32,
        ValType::I64 => wasm_encoder::ValType::I64,
    }
}

/// Deduplicated type section, indexed in first-use order.
struct Types {
    section: TypeSection,
    index: BTreeMap<FuncType, u32>,
}

impl Types {
    fn new() -> Self {
        Self {
            section: TypeSection::new(),
            index: BTreeMap::new(),
        }
    }

    fn of(&mut self, ty: &FuncType) -> u32 {
        if let Some(&i) = self.index.get(ty) {
            return i;
        }
        let i = self.index.len() as u32;
        self.section.function(
            ty.params.iter().copied().map(val),
            ty.results.iter().copied().map(val),
        );
        self.index.insert(ty.clone(), i);
        i
    }
}

pub fn encode(module: &WasmModule) -> Result<Vec<u8>, WasmError> {
    let mut types = Types::new();
    let import_types: Vec<u32> = module.imports.iter().map(|i| types.of(&i.ty)).collect();
    let func_types: Vec<u32> = module.funcs.iter().map(|f| types.of(&f.ty)).collect();

    let mut out = Module::new();
    out.section(&types.section);

    let mut imports = ImportSection::new();
    for (import, ty) in module.imports.iter().zip(&import_types) {
        imports.import(&import.module, &import.name, EntityType::Function(*ty));
    }
    if !module.imports.is_empty() {
        out.section(&imports);
    }

    let mut functions = FunctionSection::new();
    for ty in &func_types {
        functions.function(*ty);
    }
    out.section(&functions);

    if let Some(mem) = &module.memory {
        let mut memories = MemorySection::new();
        memories.memory(MemoryType {
            minimum: mem.pages as u64,
            maximum: None,
            memory64: false,
            shared: false,
        });
        out.section(&memories);
    }

    if let Some(g) = &module.global {
        let mut globals = GlobalSection::new();
        globals.global(
            GlobalType {
                val_type: wasm_encoder::ValType::I32,
                mutable: true,
            },
            &ConstExpr::i32_const(g.init as i32),
        );
        out.section(&globals);
    }

    let mut exports = ExportSection::new();
    if module.memory.map_or(false, |m| m.export) {
        exports.export("memory", ExportKind::Memory, 0);
    }
    for f in module.funcs.iter().filter(|f| f.export) {
        let index = module
            .func_index(&f.name)
            .ok_or_else(|| WasmError::UnknownFunction(f.name.clone()))?;
        exports.export(&f.name, ExportKind::Func, index);
    }
    out.section(&exports);

    let mut code = CodeSection::new();
    for f in &module.funcs {
        let mut locals: Vec<(u32, wasm_encoder::ValType)> = Vec::new();
        for l in &f.locals {
            match locals.last_mut() {
                Some((n, ty)) if *ty == val(*l) => *n += 1,
                _ => locals.push((1, val(*l))),
            }
        }
        let mut func = Function::new(locals);
        for instr in &f.body {
            func.instruction(&instruction(module, instr)?);
        }
        func.instruction(&Instruction::End);
        code.function(&func);
    }
    out.section(&code);

    if !module.data.is_empty() {
        let mut data = DataSection::new();
        for seg in &module.data {
            data.active(
                0,
                &ConstExpr::i32_const(seg.offset as i32),
                seg.bytes.iter().copied(),
            );
        }
        out.section(&data);
    }

    Ok(out.finish())
}

fn memarg(offset: u32, bytes: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align: bytes.max(1).trailing_zeros(),
        memory_index: 0,
    }
}

fn instruction<'a>(module: &WasmModule, instr: &Instr) -> Result<Instruction<'a>, WasmError> {
    use ValType::{I32, I64};
    Ok(match instr {
        Instr::I32Const(n) => Instruction::I32Const(*n),
        Instr::I64Const(n) => Instruction::I64Const(*n),
        Instr::LocalGet(i) => Instruction::LocalGet(*i),
        Instr::LocalSet(i) => Instruction::LocalSet(*i),
        Instr::LocalTee(i) => Instruction::LocalTee(*i),
        Instr::GlobalGet(i) => Instruction::GlobalGet(*i),
        Instr::GlobalSet(i) => Instruction::GlobalSet(*i),
        Instr::Num(I32, op) => match op {
            NumOp::Add => Instruction::I32Add,
            NumOp::Sub => Instruction::I32Sub,
            NumOp::Mul => Instruction::I32Mul,
            NumOp::DivS => Instruction::I32DivS,
            NumOp::DivU => Instruction::I32DivU,
            NumOp::RemS => Instruction::I32RemS,
            NumOp::RemU => Instruction::I32RemU,
        },
        Instr::Num(I64, op) => match op {
            NumOp::Add => Instruction::I64Add,
            NumOp::Sub => Instruction::I64Sub,
            NumOp::Mul => Instruction::I64Mul,
            NumOp::DivS => Instruction::I64DivS,
            NumOp::DivU => Instruction::I64DivU,
            NumOp::RemS => Instruction::I64RemS,
            NumOp::RemU => Instruction::I64RemU,
        },
        Instr::Rel(I32, op) => match op {
            RelOp::Eq => Instruction::I32Eq,
            RelOp::Ne => Instruction::I32Ne,
            RelOp::LtS => Instruction::I32LtS,
            RelOp::LtU => Instruction::I32LtU,
            RelOp::LeS => Instruction::I32LeS,
            RelOp::LeU => Instruction::I32LeU,
            RelOp::GtS => Instruction::I32GtS,
            RelOp::GtU => Instruction::I32GtU,
            RelOp::GeS => Instruction::I32GeS,
            RelOp::GeU => Instruction::I32GeU,
        },
        Instr::Rel(I64, op) => match op {
            RelOp::Eq => Instruction::I64Eq,
            RelOp::Ne => Instruction::I64Ne,
            RelOp::LtS => Instruction::I64LtS,
            RelOp::LtU => Instruction::I64LtU,
            RelOp::LeS => Instruction::I64LeS,
            RelOp::LeU => Instruction::I64LeU,
            RelOp::GtS => Instruction::I64GtS,
            RelOp::GtU => Instruction::I64GtU,
            RelOp::GeS => Instruction::I64GeS,
            RelOp::GeU => Instruction::I64GeU,
        },
        Instr::I32Eqz => Instruction::I32Eqz,
        Instr::I32WrapI64 => Instruction::I32WrapI64,
        Instr::I64ExtendI32S => Instruction::I64ExtendI32S,
        Instr::I64ExtendI32U => Instruction::I64ExtendI32U,
        Instr::Load {
            ty,
            bytes,
            signed,
            offset,
        } => {
            let m = memarg(*offset, *bytes);
            match (ty, bytes, signed) {
                (I32, 1, true) => Instruction::I32Load8S(m),
                (I32, 1, false) => Instruction::I32Load8U(m),
                (I32, 2, true) => Instruction::I32Load16S(m),
                (I32, 2, false) => Instruction::I32Load16U(m),
                (I32, _, _) => Instruction::I32Load(memarg(*offset, 4)),
                (I64, 1, true) => Instruction::I64Load8S(m),
                (I64, 1, false) => Instruction::I64Load8U(m),
                (I64, 2, true) => Instruction::I64Load16S(m),
                (I64, 2, false) => Instruction::I64Load16U(m),
                (I64, 4, true) => Instruction::I64Load32S(m),
                (I64, 4, false) => Instruction::I64Load32U(m),
                (I64, _, _) => Instruction::I64Load(memarg(*offset, 8)),
            }
        }
        Instr::Store { ty, bytes, offset } => {
            let m = memarg(*offset, *bytes);
            match (ty, bytes) {
                (I32, 1) => Instruction::I32Store8(m),
                (I32, 2) => Instruction::I32Store16(m),
                (I32, _) => Instruction::I32Store(memarg(*offset, 4)),
                (I64, 1) => Instruction::I64Store8(m),
                (I64, 2) => Instruction::I64Store16(m),
                (I64, 4) => Instruction::I64Store32(m),
                (I64, _) => Instruction::I64Store(memarg(*offset, 8)),
            }
        }
        Instr::Call(name) => Instruction::Call(
            module
                .func_index(name)
                .ok_or_else(|| WasmError::UnknownFunction(name.clone()))?,
        ),
        Instr::ReturnCall(name) => Instruction::ReturnCall(
            module
                .func_index(name)
                .ok_or_else(|| WasmError::UnknownFunction(name.clone()))?,
        ),
        Instr::Return => Instruction::Return,
        Instr::Unreachable => Instruction::Unreachable,
        Instr::Drop => Instruction::Drop,
        Instr::Block => Instruction::Block(BlockType::Empty),
        Instr::Loop => Instruction::Loop(BlockType::Empty),
        Instr::If => Instruction::If(BlockType::Empty),
        Instr::Else => Instruction::Else,
        Instr::End => Instruction::End,
        Instr::Br(d) => Instruction::Br(*d),
        Instr::BrIf(d) => Instruction::BrIf(*d),
    })
}
