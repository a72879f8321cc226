//! Liveness over the selected instruction stream
//!
//! Backward dataflow at instruction granularity. Besides virtual registers
//! it tracks the physical registers and the N/Z and C flags, so the
//! allocator can tell when a rewrite would destroy something still needed.
//!
//! In a function that calls `__setjmp`, every call reachable from the
//! resume point may come back there through `longjmp`, so those calls get
//! the resume point as an extra successor.

use m65_codegen::{isa, Address, AsmInst, Opcode, Operand, Reg, VReg};
use m65_common::{CompilerError, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::naming;
use crate::runtime::Routine;
use crate::select::CallTarget;

/// Something that can be live
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Item {
    Reg(Reg),
    Nz,
    Carry,
    V(VReg),
}

/// Inclusive instruction range over which a vreg is live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    fn cover(&mut self, i: usize) {
        self.start = self.start.min(i);
        self.end = self.end.max(i);
    }
}

/// Where control goes after an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
enum Next {
    At(usize),
    /// Falls off the end of the body into the epilogue
    Exit,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: Vec<BTreeSet<Item>>,
    live_out: Vec<BTreeSet<Item>>,
    uses: Vec<BTreeSet<Item>>,
    defs: Vec<BTreeSet<Item>>,
    successors: Vec<Vec<Next>>,
}

/// Items an instruction reads and writes
fn use_def(inst: &AsmInst, call: Option<&CallTarget>) -> (BTreeSet<Item>, BTreeSet<Item>) {
    let mut uses = BTreeSet::new();
    let mut defs = BTreeSet::new();
    let (op, operand) = match inst {
        AsmInst::Op(op, operand) => (*op, operand),
        _ => return (uses, defs),
    };

    if op == Opcode::Jsr {
        let args: &[Reg] = match call {
            Some(CallTarget::Fixed { .. }) => &Reg::ALL,
            Some(CallTarget::Trampoline { .. }) => &[Reg::A, Reg::X],
            _ => &[],
        };
        uses.extend(args.iter().map(|r| Item::Reg(*r)));
        defs.extend(Reg::ALL.iter().map(|r| Item::Reg(*r)));
        defs.insert(Item::Nz);
        defs.insert(Item::Carry);
        return (uses, defs);
    }

    let e = isa::effects(inst);
    for reg in Reg::ALL {
        if e.reads(reg) {
            uses.insert(Item::Reg(reg));
        }
        if e.writes(reg) {
            defs.insert(Item::Reg(reg));
        }
    }
    if e.reads_nz {
        uses.insert(Item::Nz);
    }
    if e.writes_nz {
        defs.insert(Item::Nz);
    }
    if e.reads_carry {
        uses.insert(Item::Carry);
    }
    if e.writes_carry {
        defs.insert(Item::Carry);
    }
    if let Operand::Virtual(v) = operand {
        if isa::reads_memory_operand(op) {
            uses.insert(Item::V(*v));
        }
        if isa::writes_memory_operand(op) {
            defs.insert(Item::V(*v));
        }
    }
    (uses, defs)
}

fn successors(code: &[AsmInst], labels: &BTreeMap<&str, usize>, i: usize) -> Result<Vec<Next>> {
    let fall = if i + 1 < code.len() { Next::At(i + 1) } else { Next::Exit };
    let target = |name: &str| {
        labels
            .get(name)
            .map(|&at| Next::At(at))
            .ok_or_else(|| CompilerError::internal(format!("branch to undefined label '{}'", name)))
    };
    Ok(match &code[i] {
        AsmInst::Op(op, Operand::Relative(label)) if op.is_branch() => vec![target(label)?, fall],
        AsmInst::Op(Opcode::Jmp, Operand::Absolute(Address::Label(label))) => vec![target(label)?],
        AsmInst::Op(Opcode::Jmp | Opcode::Rts | Opcode::Rti | Opcode::Brk, _) => Vec::new(),
        _ => vec![fall],
    })
}

/// Whether control may leave instruction `i` through a `longjmp`
fn may_longjmp(inst: &AsmInst, call: Option<&CallTarget>) -> bool {
    match inst {
        AsmInst::Op(Opcode::Jsr, _) => matches!(
            call,
            Some(CallTarget::Function(_) | CallTarget::Trampoline { .. })
        ),
        AsmInst::Op(Opcode::Jmp, Operand::Absolute(address)) => address.symbol_name() == Some(naming::LONGJMP),
        _ => false,
    }
}

/// Give every call that may longjmp back to a `setjmp` in this function an
/// edge to the instruction after that `setjmp`
fn add_resume_edges(code: &[AsmInst], calls: &BTreeMap<usize, CallTarget>, succ: &mut [Vec<Next>]) {
    let resumes: Vec<Next> = calls
        .iter()
        .filter(|(_, target)| matches!(target, CallTarget::Runtime(Routine::SetJmp)))
        .map(|(&at, _)| if at + 1 < code.len() { Next::At(at + 1) } else { Next::Exit })
        .collect();
    if resumes.is_empty() {
        return;
    }

    // Instructions executed after some setjmp has captured its buffer
    let mut reached = vec![false; code.len()];
    let mut work: Vec<usize> = resumes
        .iter()
        .filter_map(|r| match r {
            Next::At(j) => Some(*j),
            Next::Exit => None,
        })
        .collect();
    while let Some(i) = work.pop() {
        if std::mem::replace(&mut reached[i], true) {
            continue;
        }
        for next in &succ[i] {
            if let Next::At(j) = next {
                work.push(*j);
            }
        }
    }

    for (i, inst) in code.iter().enumerate() {
        if reached[i] && may_longjmp(inst, calls.get(&i)) {
            for resume in &resumes {
                if !succ[i].contains(resume) {
                    succ[i].push(resume.clone());
                }
            }
        }
    }
}

impl Liveness {
    /// Solve liveness; `exit` is what the epilogue reads
    pub fn compute(code: &[AsmInst], calls: &BTreeMap<usize, CallTarget>, exit: &[Reg]) -> Result<Self> {
        let labels: BTreeMap<&str, usize> = code
            .iter()
            .enumerate()
            .filter_map(|(i, inst)| match inst {
                AsmInst::Label(name) => Some((name.as_str(), i)),
                _ => None,
            })
            .collect();

        let n = code.len();
        let mut uses = Vec::with_capacity(n);
        let mut defs = Vec::with_capacity(n);
        let mut succ = Vec::with_capacity(n);
        for (i, inst) in code.iter().enumerate() {
            let (u, d) = use_def(inst, calls.get(&i));
            uses.push(u);
            defs.push(d);
            succ.push(successors(code, &labels, i)?);
        }
        add_resume_edges(code, calls, &mut succ);
        let exit: BTreeSet<Item> = exit.iter().map(|r| Item::Reg(*r)).collect();

        let mut live_in = vec![BTreeSet::new(); n];
        let mut live_out = vec![BTreeSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for i in (0..n).rev() {
                let mut out = BTreeSet::new();
                for next in &succ[i] {
                    match next {
                        Next::At(j) => out.extend(live_in[*j].iter().copied()),
                        Next::Exit => out.extend(exit.iter().copied()),
                    }
                }
                let mut inn: BTreeSet<Item> = out.difference(&defs[i]).copied().collect();
                inn.extend(uses[i].iter().copied());
                if inn != live_in[i] || out != live_out[i] {
                    live_in[i] = inn;
                    live_out[i] = out;
                    changed = true;
                }
            }
        }

        Ok(Self {
            live_in,
            live_out,
            uses,
            defs,
            successors: succ,
        })
    }

    pub fn live_in(&self, i: usize) -> &BTreeSet<Item> {
        &self.live_in[i]
    }

    pub fn live_out(&self, i: usize) -> &BTreeSet<Item> {
        &self.live_out[i]
    }

    pub fn is_live_out(&self, i: usize, item: Item) -> bool {
        self.live_out[i].contains(&item)
    }

    pub fn writes(&self, i: usize, item: Item) -> bool {
        self.defs[i].contains(&item)
    }

    /// Live range of every vreg, widened over loops
    pub fn intervals(&self) -> BTreeMap<VReg, Interval> {
        let mut intervals: BTreeMap<VReg, Interval> = BTreeMap::new();
        for i in 0..self.live_in.len() {
            let present = self.live_in[i]
                .iter()
                .chain(&self.uses[i])
                .chain(&self.defs[i])
                .chain(&self.live_out[i]);
            for item in present {
                if let Item::V(v) = item {
                    intervals
                        .entry(*v)
                        .or_insert(Interval { start: i, end: i })
                        .cover(i);
                }
            }
        }

        // A value live at the head of a loop stays live over all of it
        for (i, next) in self.successors.iter().enumerate() {
            for n in next {
                if let Next::At(head) = n {
                    if *head > i {
                        continue;
                    }
                    for item in &self.live_in[*head] {
                        if let Item::V(v) = item {
                            if let Some(iv) = intervals.get_mut(v) {
                                iv.cover(*head);
                                iv.cover(i);
                            }
                        }
                    }
                }
            }
        }
        intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(n: u32) -> Operand {
        Operand::Virtual(VReg(n))
    }

    #[test]
    fn test_straight_line_interval() {
        let code = vec![
            AsmInst::op(Opcode::Lda, Operand::imm(1)),
            AsmInst::op(Opcode::Sta, v(0)),
            AsmInst::op(Opcode::Lda, Operand::imm(2)),
            AsmInst::op(Opcode::Clc, Operand::Implied),
            AsmInst::op(Opcode::Adc, v(0)),
        ];
        let live = Liveness::compute(&code, &BTreeMap::new(), &[Reg::A]).unwrap();
        assert_eq!(live.intervals()[&VReg(0)], Interval { start: 1, end: 4 });
        assert!(live.is_live_out(4, Item::Reg(Reg::A)));
        assert!(!live.is_live_out(1, Item::Reg(Reg::A)));
    }

    #[test]
    fn test_loop_keeps_value_live_over_body() {
        let code = vec![
            AsmInst::op(Opcode::Lda, Operand::imm(5)),
            AsmInst::op(Opcode::Sta, v(0)),
            AsmInst::label("f_L0"),
            AsmInst::op(Opcode::Lda, Operand::imm(0)),
            AsmInst::op(Opcode::Sta, v(1)),
            AsmInst::op(Opcode::Dec, v(0)),
            AsmInst::branch(Opcode::Bne, "f_L0"),
            AsmInst::label("f_exit"),
        ];
        let live = Liveness::compute(&code, &BTreeMap::new(), &[]).unwrap();
        let intervals = live.intervals();
        assert_eq!(intervals[&VReg(0)], Interval { start: 1, end: 6 });
        // v1 is dead on arrival
        assert_eq!(intervals[&VReg(1)], Interval { start: 4, end: 4 });
        assert!(live.is_live_out(5, Item::Nz));
    }

    #[test]
    fn test_fixed_call_reads_registers() {
        let code = vec![
            AsmInst::op(Opcode::Ldx, Operand::imm(0x10)),
            AsmInst::op(Opcode::Jsr, Operand::abs(0xE456)),
        ];
        let mut calls = BTreeMap::new();
        calls.insert(
            1,
            CallTarget::Fixed {
                address: 0xE456,
                clobbers: Default::default(),
            },
        );
        let live = Liveness::compute(&code, &calls, &[]).unwrap();
        assert!(live.is_live_out(0, Item::Reg(Reg::X)));

        let plain = Liveness::compute(&code, &BTreeMap::new(), &[]).unwrap();
        assert!(!plain.is_live_out(0, Item::Reg(Reg::X)));
    }

    #[test]
    fn test_value_live_at_setjmp_resume_survives_later_calls() {
        let code = vec![
            AsmInst::op(Opcode::Lda, Operand::imm(1)),
            AsmInst::op(Opcode::Sta, v(0)),
            AsmInst::op(Opcode::Jsr, Operand::symbol(naming::SETJMP)),
            AsmInst::op(Opcode::Sta, v(1)),
            AsmInst::op(Opcode::Lda, v(1)),
            AsmInst::branch(Opcode::Bne, "f_L0"),
            AsmInst::op(Opcode::Jsr, Operand::symbol("thrower")),
            AsmInst::op(Opcode::Lda, Operand::imm(0)),
            AsmInst::jmp("f_exit"),
            AsmInst::label("f_L0"),
            AsmInst::op(Opcode::Lda, v(0)),
            AsmInst::label("f_exit"),
        ];
        let mut calls = BTreeMap::new();
        calls.insert(6, CallTarget::Function("thrower".to_string()));
        let plain = Liveness::compute(&code, &calls, &[Reg::A]).unwrap();
        assert!(!plain.is_live_out(6, Item::V(VReg(0))));

        calls.insert(2, CallTarget::Runtime(Routine::SetJmp));
        let live = Liveness::compute(&code, &calls, &[Reg::A]).unwrap();
        assert!(live.is_live_out(6, Item::V(VReg(0))));
        assert_eq!(live.intervals()[&VReg(0)], Interval { start: 1, end: 10 });
    }

    #[test]
    fn test_calls_before_setjmp_get_no_resume_edge() {
        let code = vec![
            AsmInst::op(Opcode::Jsr, Operand::symbol("init")),
            AsmInst::op(Opcode::Lda, Operand::imm(1)),
            AsmInst::op(Opcode::Sta, v(0)),
            AsmInst::op(Opcode::Jsr, Operand::symbol(naming::SETJMP)),
            AsmInst::op(Opcode::Lda, v(0)),
        ];
        let mut calls = BTreeMap::new();
        calls.insert(0, CallTarget::Function("init".to_string()));
        calls.insert(3, CallTarget::Runtime(Routine::SetJmp));
        let live = Liveness::compute(&code, &calls, &[Reg::A]).unwrap();
        assert!(!live.is_live_out(0, Item::V(VReg(0))));
    }

    #[test]
    fn test_undefined_label_is_internal_error() {
        let code = vec![AsmInst::jmp("nowhere")];
        assert!(matches!(
            Liveness::compute(&code, &BTreeMap::new(), &[]),
            Err(CompilerError::Internal { .. })
        ));
    }
}
