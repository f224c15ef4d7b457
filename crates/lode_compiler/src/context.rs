//! Variable bindings for one function: fresh local/temp allocation, branch
//! snapshots and the loop-shadow initializer.

use crate::error::ErrorKind;
use lode_syntax::hlir::Opcode;
use lode_syntax::{Register, VarWithType};
use std::collections::BTreeMap;

/// Binding key: variable name plus the canonical name of its type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarKey {
    pub name: String,
    pub type_name: String,
}

impl VarKey {
    pub fn of(var: &VarWithType) -> Self {
        assert!(
            !var.name.is_empty(),
            "empty variable name in binding lookup (type {})",
            var.typ
        );
        Self {
            name: var.name.clone(),
            type_name: var.typ.canonical_name(),
        }
    }
}

/// Every word register of each visible binding.
pub type Bindings = BTreeMap<VarKey, Vec<Register>>;

#[derive(Debug, Default)]
struct LoopScope {
    entry: Bindings,
    initializer: Vec<Opcode>,
}

#[derive(Debug, Default)]
pub struct ContextStore {
    values: Bindings,
    next_local: u32,
    next_temp: u32,
    num_params: u32,
    shadow_count: u32,
    loops: Vec<LoopScope>,
    returns: Vec<VarWithType>,
}

impl ContextStore {
    pub fn new(returns: Vec<VarWithType>) -> Self {
        Self {
            returns,
            ..Self::default()
        }
    }

    pub fn returns(&self) -> &[VarWithType] {
        &self.returns
    }

    /// First word of the binding.
    pub fn get(&self, var: &VarWithType) -> Result<Register, ErrorKind> {
        Ok(self.get_words(var)?[0].clone())
    }

    pub fn get_words(&self, var: &VarWithType) -> Result<&[Register], ErrorKind> {
        self.values
            .get(&VarKey::of(var))
            .filter(|regs| !regs.is_empty())
            .map(Vec::as_slice)
            .ok_or_else(|| ErrorKind::UndefinedVariable(var.name.clone()))
    }

    pub fn safe_get(&self, var: &VarWithType) -> Option<Register> {
        self.get(var).ok()
    }

    /// Allocates a fresh local for `var` without binding it. Allocating for
    /// a name that is already bound counts as a shadow.
    pub fn next_local(&mut self, var: &VarWithType) -> Register {
        if self.values.contains_key(&VarKey::of(var)) {
            self.shadow_count += 1;
        }
        let r = Register::Local(self.next_local);
        self.next_local += 1;
        r
    }

    /// Allocates a local for a synthetic value that has no binding.
    pub fn next_anonymous_local(&mut self) -> Register {
        let r = Register::Local(self.next_local);
        self.next_local += 1;
        r
    }

    pub fn next_temp(&mut self) -> Register {
        let r = Register::Temp(self.next_temp);
        self.next_temp += 1;
        r
    }

    /// Binds `var` to already-existing registers.
    pub fn set_local(&mut self, var: &VarWithType, registers: Vec<Register>) {
        self.values.insert(VarKey::of(var), registers);
    }

    /// Registers `words` parameter words for `var` starting at `first`.
    ///
    /// # Panics
    /// When a local has already been allocated; parameters come first.
    pub fn param_register(&mut self, var: &VarWithType, first: u32, words: u32) -> Vec<Register> {
        assert!(
            self.next_local == 0,
            "parameter `{}` registered after {} locals were allocated",
            var.name,
            self.next_local
        );
        let regs: Vec<Register> = (first..first + words)
            .map(|id| Register::Param {
                id,
                reference: var.reference,
            })
            .collect();
        self.num_params = self.num_params.max(first + words);
        self.set_local(var, regs.clone());
        regs
    }

    pub fn clone_values(&self) -> Bindings {
        self.values.clone()
    }

    pub fn restore_values(&mut self, values: Bindings) {
        self.values = values;
    }

    pub fn enter_loop(&mut self) {
        self.loops.push(LoopScope {
            entry: self.values.clone(),
            initializer: Vec::new(),
        });
    }

    /// Leaves the innermost loop and hands back its initializer.
    pub fn exit_loop(&mut self) -> Vec<Opcode> {
        self.loops
            .pop()
            .map(|scope| scope.initializer)
            .unwrap_or_default()
    }

    /// True when a `let` of `var` inside the innermost loop would shadow the
    /// binding that was visible when the loop was entered.
    pub fn shadows_loop_entry(&self, var: &VarWithType) -> bool {
        let Some(scope) = self.loops.last() else {
            return false;
        };
        let key = VarKey::of(var);
        match (scope.entry.get(&key), self.values.get(&key)) {
            (Some(entry), Some(current)) => entry == current,
            _ => false,
        }
    }

    pub fn push_initializer(&mut self, op: Opcode) {
        if let Some(scope) = self.loops.last_mut() {
            scope.initializer.push(op);
        }
    }

    pub fn num_locals(&self) -> u32 {
        self.next_local
    }

    pub fn num_temps(&self) -> u32 {
        self.next_temp
    }

    pub fn num_params(&self) -> u32 {
        self.num_params
    }

    pub fn shadow_count(&self) -> u32 {
        self.shadow_count
    }
}
