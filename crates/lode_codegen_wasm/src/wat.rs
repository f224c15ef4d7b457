//! WebAssembly text rendering.

use crate::module::{FuncType, Function, Instr, NumOp, RelOp, ValType, WasmModule};
use std::fmt::Write;

pub fn to_wat(module: &WasmModule) -> String {
    let mut out = String::from("(module\n");
    for import in &module.imports {
        let _ = writeln!(
            out,
            "  (import \"{}\" \"{}\" (func ${}{}))",
            import.module,
            import.name,
            import.name,
            signature(&import.ty)
        );
    }
    if let Some(mem) = &module.memory {
        let export = if mem.export {
            " (export \"memory\")"
        } else {
            ""
        };
        let _ = writeln!(out, "  (memory{} {})", export, mem.pages);
    }
    for seg in &module.data {
        let _ = writeln!(
            out,
            "  (data (i32.const {}) \"{}\")",
            seg.offset,
            escape(&seg.bytes)
        );
    }
    if let Some(g) = &module.global {
        let _ = writeln!(
            out,
            "  (global $heap_ptr (mut i32) (i32.const {}))",
            g.init
        );
    }
    for f in &module.funcs {
        function(&mut out, f);
    }
    out.push_str(")\n");
    out
}

fn signature(ty: &FuncType) -> String {
    let mut s = String::new();
    if !ty.params.is_empty() {
        s.push_str(" (param");
        for p in &ty.params {
            s.push(' ');
            s.push_str(p.name());
        }
        s.push(')');
    }
    if !ty.results.is_empty() {
        s.push_str(" (result");
        for r in &ty.results {
            s.push(' ');
            s.push_str(r.name());
        }
        s.push(')');
    }
    s
}

fn function(out: &mut String, f: &Function) {
    let _ = write!(out, "  (func ${}", f.name);
    if f.export {
        let _ = write!(out, " (export \"{}\")", f.name);
    }
    out.push_str(&signature(&f.ty));
    if !f.locals.is_empty() {
        out.push_str(" (local");
        for l in &f.locals {
            out.push(' ');
            out.push_str(l.name());
        }
        out.push(')');
    }
    out.push('\n');
    let mut depth = 2;
    for instr in &f.body {
        if matches!(instr, Instr::End | Instr::Else) {
            depth -= 1;
        }
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), text(instr));
        if matches!(instr, Instr::Block | Instr::Loop | Instr::If | Instr::Else) {
            depth += 1;
        }
    }
    out.push_str("  )\n");
}

/// Printable ASCII stays as is; everything else is `\hh`.
fn escape(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' | b'\\' => {
                let _ = write!(s, "\\{:02x}", b);
            }
            0x20..=0x7e => s.push(b as char),
            _ => {
                let _ = write!(s, "\\{:02x}", b);
            }
        }
    }
    s
}

fn num(op: NumOp) -> &'static str {
    match op {
        NumOp::Add => "add",
        NumOp::Sub => "sub",
        NumOp::Mul => "mul",
        NumOp::DivS => "div_s",
        NumOp::DivU => "div_u",
        NumOp::RemS => "rem_s",
        NumOp::RemU => "rem_u",
    }
}

fn rel(op: RelOp) -> &'static str {
    match op {
        RelOp::Eq => "eq",
        RelOp::Ne => "ne",
        RelOp::LtS => "lt_s",
        RelOp::LtU => "lt_u",
        RelOp::LeS => "le_s",
        RelOp::LeU => "le_u",
        RelOp::GtS => "gt_s",
        RelOp::GtU => "gt_u",
        RelOp::GeS => "ge_s",
        RelOp::GeU => "ge_u",
    }
}

fn memarg(offset: u32) -> String {
    if offset == 0 {
        String::new()
    } else {
        format!(" offset={}", offset)
    }
}

/// `i64.load32_s`, `i32.store8`, ... A full-width access has no suffix.
fn width(ty: ValType, bytes: u32) -> String {
    match (ty, bytes) {
        (_, 1 | 2) | (ValType::I64, 4) => (bytes * 8).to_string(),
        _ => String::new(),
    }
}

pub(crate) fn text(instr: &Instr) -> String {
    match instr {
        Instr::I32Const(n) => format!("i32.const {}", n),
        Instr::I64Const(n) => format!("i64.const {}", n),
        Instr::LocalGet(i) => format!("local.get {}", i),
        Instr::LocalSet(i) => format!("local.set {}", i),
        Instr::LocalTee(i) => format!("local.tee {}", i),
        Instr::GlobalGet(i) => format!("global.get {}", i),
        Instr::GlobalSet(i) => format!("global.set {}", i),
        Instr::Num(ty, op) => format!("{}.{}", ty.name(), num(*op)),
        Instr::Rel(ty, op) => format!("{}.{}", ty.name(), rel(*op)),
        Instr::I32Eqz => "i32.eqz".to_string(),
        Instr::I32WrapI64 => "i32.wrap_i64".to_string(),
        Instr::I64ExtendI32S => "i64.extend_i32_s".to_string(),
        Instr::I64ExtendI32U => "i64.extend_i32_u".to_string(),
        Instr::Load {
            ty,
            bytes,
            signed,
            offset,
        } => {
            let w = width(*ty, *bytes);
            let sign = match (w.is_empty(), signed) {
                (true, _) => "",
                (false, true) => "_s",
                (false, false) => "_u",
            };
            format!("{}.load{}{}{}", ty.name(), w, sign, memarg(*offset))
        }
        Instr::Store { ty, bytes, offset } => {
            format!("{}.store{}{}", ty.name(), width(*ty, *bytes), memarg(*offset))
        }
        Instr::Call(name) => format!("call ${}", name),
        Instr::ReturnCall(name) => format!("return_call ${}", name),
        Instr::Return => "return".to_string(),
        Instr::Unreachable => "unreachable".to_string(),
        Instr::Drop => "drop".to_string(),
        Instr::Block => "block".to_string(),
        Instr::Loop => "loop".to_string(),
        Instr::If => "if".to_string(),
        Instr::Else => "else".to_string(),
        Instr::End => "end".to_string(),
        Instr::Br(d) => format!("br {}", d),
        Instr::BrIf(d) => format!("br_if {}", d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_access_names() {
        let load = Instr::Load {
            ty: ValType::I64,
            bytes: 1,
            signed: false,
            offset: 16,
        };
        assert_eq!(text(&load), "i64.load8_u offset=16");
        let store = Instr::Store {
            ty: ValType::I32,
            bytes: 4,
            offset: 0,
        };
        assert_eq!(text(&store), "i32.store");
        assert_eq!(text(&Instr::I32WrapI64), "i32.wrap_i64");
    }

    #[test]
    fn data_escapes_non_printable_bytes() {
        assert_eq!(escape(b"hi\n\"x\""), "hi\\0a\\22x\\22");
        assert_eq!(escape(&14u64.to_le_bytes()), "\\0e\\00\\00\\00\\00\\00\\00\\00");
    }
}
