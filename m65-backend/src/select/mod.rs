//! Instruction selection
//!
//! Lowers one IR function to 6502 instructions over virtual byte registers.
//! Every 16-bit value is split into a low and a high vreg; no 16-bit
//! instruction is assumed. For each IR node the selector builds the
//! applicable candidate sequences against a copy of the machine state and
//! keeps the cheapest by `Cost`, so load and flag elision count towards the
//! comparison.
//!
//! The result still contains `Virtual` and `Frame` operands; the register
//! allocator removes both.

mod arith;
mod call;
mod compare;
mod cost;
mod operands;
mod state;

#[cfg(test)]
mod tests;

pub use cost::Cost;
pub use state::{Loc, MachineState, Seq};

use log::{debug, trace};
use m65_codegen::{AsmInst, ClobberSet, Opcode, Operand, VReg};
use m65_common::{CompilerError, Result, TargetLimits, TempId};
use m65_ir::{Function, IrNode, IrType, MemRef, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::abi::{AbiEngine, FunctionAbi};
use crate::naming::NameGenerator;
use crate::runtime::Routine;

/// What a `JSR` in selected code reaches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Function(String),
    /// Through the trampoline of `bank`
    Trampoline { bank: u8, callee: String },
    Runtime(Routine),
    /// A ROM routine at a fixed address
    Fixed { address: u16, clobbers: ClobberSet },
}

/// Output of instruction selection for one function
#[derive(Debug, Clone)]
pub struct SelectedFunction {
    pub name: String,
    pub code: Vec<AsmInst>,
    /// Call sites by instruction index
    pub calls: BTreeMap<usize, CallTarget>,
    /// Runtime routines the code transfers to
    pub runtime: BTreeSet<Routine>,
    /// Frame bytes used by `Local` memory references
    pub locals: u8,
    /// Number of virtual registers handed out
    pub vregs: u32,
}

impl SelectedFunction {
    /// Every function or routine name control may reach from this code
    pub fn callees(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.runtime.iter().map(|r| r.name()).collect();
        for target in self.calls.values() {
            match target {
                CallTarget::Function(name) => {
                    names.insert(name.clone());
                }
                CallTarget::Trampoline { bank, callee } => {
                    names.insert(Routine::Trampoline(*bank).name());
                    names.insert(callee.clone());
                }
                CallTarget::Runtime(routine) => {
                    names.insert(routine.name());
                }
                CallTarget::Fixed { .. } => {}
            }
        }
        names
    }
}

/// Instruction selector for one compilation
pub struct InstructionSelector<'a> {
    engine: &'a AbiEngine,
    abis: &'a BTreeMap<String, FunctionAbi>,
    limits: &'a TargetLimits,
}

impl<'a> InstructionSelector<'a> {
    pub fn new(
        engine: &'a AbiEngine,
        abis: &'a BTreeMap<String, FunctionAbi>,
        limits: &'a TargetLimits,
    ) -> Self {
        Self { engine, abis, limits }
    }

    /// Select instructions for a function with a body
    pub fn select(&self, function: &Function) -> Result<SelectedFunction> {
        let abi = self.abis.get(function.name()).ok_or_else(|| {
            CompilerError::internal(format!("function '{}' was never bound", function.name()))
        })?;
        debug!("selecting {} ({} IR nodes)", function.name(), function.body.len());
        let lowering = Lowering::new(self, function, abi);
        let selected = lowering.run()?;
        debug!(
            "selected {}: {} instructions, {} vregs, {} calls",
            selected.name,
            selected.code.iter().filter(|i| !i.is_pseudo()).count(),
            selected.vregs,
            selected.calls.len()
        );
        Ok(selected)
    }
}

/// Virtual registers and type of an IR temporary
#[derive(Debug, Clone)]
struct TempInfo {
    vregs: Vec<VReg>,
    ty: IrType,
}

/// Hidden incoming values copied out of the argument slots
#[derive(Debug, Clone, Default)]
struct Hidden {
    sret: Option<[VReg; 2]>,
    va_count: Option<VReg>,
    va_ptr: Option<[VReg; 2]>,
}

/// Per-function selection state
struct Lowering<'s, 'a> {
    selector: &'s InstructionSelector<'a>,
    function: &'s Function,
    abi: &'s FunctionAbi,
    names: NameGenerator,
    out: Seq,
    temps: BTreeMap<TempId, TempInfo>,
    uses: BTreeMap<TempId, usize>,
    hidden: Hidden,
}

impl<'s, 'a> Lowering<'s, 'a> {
    fn new(selector: &'s InstructionSelector<'a>, function: &'s Function, abi: &'s FunctionAbi) -> Self {
        let ptr = selector.engine.layout().ptr_lo();
        Self {
            selector,
            function,
            abi,
            names: NameGenerator::new(function.name()),
            out: Seq::new(ptr, 0),
            temps: BTreeMap::new(),
            uses: BTreeMap::new(),
            hidden: Hidden::default(),
        }
    }

    fn name(&self) -> &str {
        self.function.name()
    }

    fn target(&self) -> &str {
        self.selector.engine.target()
    }

    fn unsupported(&self, node: &IrNode) -> CompilerError {
        CompilerError::unsupported(self.name(), node.describe(), self.target())
    }

    fn invalid(&self, message: impl Into<String>) -> CompilerError {
        CompilerError::invalid_ir(self.name(), message)
    }

    fn run(mut self) -> Result<SelectedFunction> {
        self.count_uses();
        self.bind_temps()?;
        self.copy_incoming()?;

        let function = self.function;
        let body = &function.body;
        let mut i = 0;
        while i < body.len() {
            let node = &body[i];
            let next = body.get(i + 1);
            trace!("  {}", node);
            i += self.lower_node(node, next, i + 1 == body.len())?;
        }
        let exit = self.names.exit_label();
        self.out.label(&exit);

        let locals = self.frame_locals()?;
        Ok(SelectedFunction {
            name: self.function.name().to_string(),
            code: self.out.code,
            calls: self.out.calls.into_iter().collect(),
            runtime: self.out.runtime,
            locals,
            vregs: self.out.next_vreg,
        })
    }

    /// Keep the cheapest candidate
    fn commit_cheapest(&mut self, candidates: Vec<Seq>) -> Result<()> {
        let costs: Vec<Cost> = candidates.iter().map(Seq::cost).collect();
        let best = cost::cheapest(&costs)
            .ok_or_else(|| CompilerError::internal("no candidate pattern produced"))?;
        if candidates.len() > 1 {
            trace!("    candidate costs {:?}, chose #{}", costs, best);
        }
        let chosen = candidates
            .into_iter()
            .nth(best)
            .ok_or_else(|| CompilerError::internal("candidate index out of range"))?;
        self.out.commit(chosen);
        Ok(())
    }

    fn count_uses(&mut self) {
        let mut uses: BTreeMap<TempId, usize> = BTreeMap::new();
        let mut mark = |v: &Value| match v {
            Value::Temp(t) => *uses.entry(*t).or_default() += 1,
            Value::Memory(m) => {
                if let Some(t) = m.base_temp() {
                    *uses.entry(t).or_default() += 1;
                }
            }
            Value::Constant(_) => {}
        };
        for node in &self.function.body {
            match node {
                IrNode::Copy { value, .. } => mark(value),
                IrNode::Binary { lhs, rhs, .. } | IrNode::Branch { lhs, rhs, .. } => {
                    mark(lhs);
                    mark(rhs);
                }
                IrNode::Store { value, dest, .. } | IrNode::StoreField { value, dest, .. } => {
                    mark(value);
                    mark(&Value::Memory(dest.clone()));
                }
                IrNode::Call { args, sret, .. } => {
                    for arg in args {
                        mark(&arg.value);
                    }
                    if let Some(dest) = sret {
                        mark(&Value::Memory(dest.clone()));
                    }
                }
                IrNode::AsmCall { a, x, y, .. } => {
                    for v in [a, x, y].into_iter().flatten() {
                        mark(v);
                    }
                }
                IrNode::Return(Some(v)) => mark(v),
                IrNode::SetJmp { buffer, .. } => mark(&Value::Memory(buffer.clone())),
                IrNode::LongJmp { buffer, value } => {
                    mark(&Value::Memory(buffer.clone()));
                    mark(value);
                }
                IrNode::VaArg { cursor, .. } => mark(&Value::Temp(*cursor)),
                IrNode::LoadField { src, .. } => mark(&Value::Memory(src.clone())),
                IrNode::Return(None)
                | IrNode::Jump(_)
                | IrNode::Label(_)
                | IrNode::VaStart { .. }
                | IrNode::VaCount { .. } => {}
            }
        }
        self.uses = uses;
    }

    fn uses(&self, temp: TempId) -> usize {
        self.uses.get(&temp).copied().unwrap_or(0)
    }

    /// Give every temporary its virtual registers up front
    fn bind_temps(&mut self) -> Result<()> {
        let params: Vec<(TempId, IrType)> = self
            .function
            .params
            .iter()
            .copied()
            .zip(self.abi.params().iter().map(|p| p.ty))
            .collect();
        for (temp, ty) in params {
            self.define_temp(temp, ty)?;
        }
        let function = self.function;
        for node in &function.body {
            let defined = match node {
                IrNode::Copy { result, ty, .. } | IrNode::Binary { result, ty, .. } => Some((*result, *ty)),
                IrNode::Call { result: Some(r), ty, .. } => Some((*r, *ty)),
                IrNode::AsmCall { result: Some(r), .. } => Some((*r, IrType::U8)),
                IrNode::SetJmp { result, .. } => Some((*result, IrType::I16)),
                IrNode::VaStart { cursor } => Some((*cursor, IrType::Ptr)),
                IrNode::VaArg { result, ty, .. } => Some((*result, *ty)),
                IrNode::VaCount { result } => Some((*result, IrType::U8)),
                IrNode::LoadField { result, .. } => Some((*result, IrType::U8)),
                _ => None,
            };
            if let Some((temp, ty)) = defined {
                if !ty.is_supported_scalar() {
                    return Err(self.unsupported(node));
                }
                self.define_temp(temp, ty)?;
            }
        }
        Ok(())
    }

    fn define_temp(&mut self, temp: TempId, ty: IrType) -> Result<()> {
        if let Some(info) = self.temps.get(&temp) {
            if info.ty.size_in_bytes() != ty.size_in_bytes() {
                return Err(self.invalid(format!(
                    "%{} redefined as {} after {}",
                    temp, ty, info.ty
                )));
            }
            return Ok(());
        }
        let vregs = (0..ty.size_in_bytes()).map(|_| self.out.new_vreg()).collect();
        self.temps.insert(temp, TempInfo { vregs, ty });
        Ok(())
    }

    fn temp(&self, temp: TempId) -> Result<&TempInfo> {
        self.temps
            .get(&temp)
            .ok_or_else(|| self.invalid(format!("use of undefined temporary %{}", temp)))
    }

    /// Destination bytes of a temporary
    fn dst(&self, temp: TempId) -> Result<Vec<Loc>> {
        Ok(self.temp(temp)?.vregs.iter().map(|v| Loc::vreg(*v)).collect())
    }

    /// Copy used parameters and hidden values out of the argument slots
    fn copy_incoming(&mut self) -> Result<()> {
        let layout = self.selector.engine.layout().clone();
        let function = self.function;
        let mut s = self.out.fork();

        let abi = self.abi;
        for (temp, slot) in function.params.iter().zip(abi.params()) {
            if self.uses(*temp) == 0 {
                continue;
            }
            let vregs = self.temp(*temp)?.vregs.clone();
            for (k, v) in vregs.iter().enumerate() {
                s.op(Opcode::Lda, Operand::ZeroPage(layout.arg(slot.slot + k as u8)));
                s.op(Opcode::Sta, Operand::Virtual(*v));
            }
        }

        let body = &function.body;
        let uses_sret = body.iter().any(|n| node_mentions(n, |m| matches!(m, MemRef::ReturnSlot { .. })));
        let uses_va_start = body.iter().any(|n| matches!(n, IrNode::VaStart { .. }));
        let uses_va_count = body.iter().any(|n| matches!(n, IrNode::VaCount { .. }));

        if uses_sret {
            let slot = self
                .abi
                .sret_slot()
                .ok_or_else(|| self.invalid("return slot used by a function that does not return a structure"))?;
            let pair = [s.new_vreg(), s.new_vreg()];
            for (k, v) in pair.iter().enumerate() {
                s.op(Opcode::Lda, Operand::ZeroPage(layout.arg(slot + k as u8)));
                s.op(Opcode::Sta, Operand::Virtual(*v));
            }
            self.hidden.sret = Some(pair);
        }
        if uses_va_start || uses_va_count {
            let (count_slot, ptr_slot) = match (self.abi.va_count_slot(), self.abi.va_ptr_slot()) {
                (Some(c), Some(p)) => (c, p),
                _ => return Err(self.invalid("variadic access in a function that is not variadic")),
            };
            if uses_va_count {
                let v = s.new_vreg();
                s.op(Opcode::Lda, Operand::ZeroPage(layout.arg(count_slot)));
                s.op(Opcode::Sta, Operand::Virtual(v));
                self.hidden.va_count = Some(v);
            }
            if uses_va_start {
                let pair = [s.new_vreg(), s.new_vreg()];
                for (k, v) in pair.iter().enumerate() {
                    s.op(Opcode::Lda, Operand::ZeroPage(layout.arg(ptr_slot + k as u8)));
                    s.op(Opcode::Sta, Operand::Virtual(*v));
                }
                self.hidden.va_ptr = Some(pair);
            }
        }
        self.out.commit(s);
        Ok(())
    }

    /// Frame bytes needed by `Local` references
    fn frame_locals(&self) -> Result<u8> {
        let mut top: u16 = 0;
        for node in &self.function.body {
            let size = node_access_size(node);
            let mut bump = |m: &MemRef| {
                if let MemRef::Local { offset } = m {
                    top = top.max(*offset as u16 + size);
                }
            };
            visit_memrefs(node, &mut bump);
        }
        u8::try_from(top).map_err(|_| self.invalid("local frame larger than 255 bytes"))
    }

    /// Lower one node; returns how many nodes were consumed
    fn lower_node(&mut self, node: &IrNode, next: Option<&IrNode>, is_last: bool) -> Result<usize> {
        match node {
            IrNode::Copy { result, value, ty } => {
                self.lower_copy(node, *result, value, *ty)?;
            }
            IrNode::Binary { result, op, lhs, rhs, ty } => {
                return self.lower_binary(node, *result, *op, lhs, rhs, *ty, next);
            }
            IrNode::Store { value, dest, ty } => self.lower_store(node, value, dest, *ty)?,
            IrNode::Call { result, callee, args, ty, sret } => {
                self.lower_call(node, *result, callee, args, *ty, sret.as_ref())?
            }
            IrNode::AsmCall { address, a, x, y, clobbers, result } => {
                self.lower_asm_call(*address, [a.as_ref(), x.as_ref(), y.as_ref()], clobbers, *result)?
            }
            IrNode::Branch { op, lhs, rhs, ty, true_label, false_label } => {
                self.lower_branch(node, *op, lhs, rhs, *ty, *true_label, *false_label, next)?
            }
            IrNode::Jump(label) => {
                if next != Some(&IrNode::Label(*label)) {
                    let name = self.names.ir_label(*label);
                    self.out.jmp(&name);
                }
            }
            IrNode::Label(label) => {
                let name = self.names.ir_label(*label);
                self.out.label(&name);
            }
            IrNode::Return(value) => self.lower_return(value.as_ref(), is_last)?,
            IrNode::SetJmp { result, buffer } => self.lower_setjmp(node, *result, buffer)?,
            IrNode::LongJmp { buffer, value } => self.lower_longjmp(node, buffer, value)?,
            IrNode::VaStart { cursor } => self.lower_va_start(*cursor)?,
            IrNode::VaArg { result, cursor, ty } => self.lower_va_arg(node, *result, *cursor, *ty)?,
            IrNode::VaCount { result } => self.lower_va_count(*result)?,
            IrNode::LoadField { result, src, field } => self.lower_load_field(node, *result, src, field)?,
            IrNode::StoreField { value, dest, field } => self.lower_store_field(node, value, dest, field)?,
        }
        Ok(1)
    }
}

/// Call `f` on every memory reference a node mentions
fn visit_memrefs(node: &IrNode, f: &mut dyn FnMut(&MemRef)) {
    fn value(v: &Value, f: &mut dyn FnMut(&MemRef)) {
        if let Value::Memory(m) = v {
            f(m);
        }
    }
    match node {
        IrNode::Copy { value: v, .. } => value(v, f),
        IrNode::Binary { lhs, rhs, .. } | IrNode::Branch { lhs, rhs, .. } => {
            value(lhs, f);
            value(rhs, f);
        }
        IrNode::Store { value: v, dest, .. } | IrNode::StoreField { value: v, dest, .. } => {
            value(v, f);
            f(dest);
        }
        IrNode::Call { args, sret, .. } => {
            for arg in args {
                value(&arg.value, f);
            }
            if let Some(dest) = sret {
                f(dest);
            }
        }
        IrNode::AsmCall { a, x, y, .. } => {
            for v in [a, x, y].into_iter().flatten() {
                value(v, f);
            }
        }
        IrNode::Return(Some(v)) => value(v, f),
        IrNode::SetJmp { buffer, .. } => f(buffer),
        IrNode::LongJmp { buffer, value: v } => {
            f(buffer);
            value(v, f);
        }
        IrNode::LoadField { src, .. } => f(src),
        _ => {}
    }
}

fn node_mentions(node: &IrNode, pred: impl Fn(&MemRef) -> bool) -> bool {
    let mut found = false;
    visit_memrefs(node, &mut |m| found |= pred(m));
    found
}

/// Bytes a node reads or writes through each memory reference
fn node_access_size(node: &IrNode) -> u16 {
    match node {
        IrNode::Copy { ty, .. } | IrNode::Binary { ty, .. } | IrNode::Store { ty, .. } | IrNode::Branch { ty, .. } => {
            ty.size_in_bytes().max(1)
        }
        IrNode::Call { args, ty, .. } => args
            .iter()
            .map(|a| a.ty.size_in_bytes())
            .chain(std::iter::once(ty.size_in_bytes()))
            .max()
            .unwrap_or(1)
            .max(1),
        IrNode::Return(_) | IrNode::LongJmp { .. } => 2,
        _ => 1,
    }
}
