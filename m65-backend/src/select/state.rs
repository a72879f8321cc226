//! Candidate code sequences and the machine state tracked while emitting
//!
//! The selector knows, at each point of straight-line code, what A holds,
//! what the N/Z flags describe, which pointer PTR holds and the constant in
//! Y. Redundant `LDA`s and zero compares are skipped on that basis. The
//! state is forgotten at every label and call.

use m65_codegen::{isa, AsmInst, Imm, Opcode, Operand, VReg};
use m65_common::{CompilerError, Result};
use std::collections::BTreeSet;

use super::cost::Cost;
use super::CallTarget;

/// A byte the selector can read or write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
    /// Immediate, virtual register, zero-page, absolute or frame byte
    Direct(Operand),
    /// `(PTR),Y` with PTR loaded from a pointer held in two vregs
    Indirect { ptr: [VReg; 2], offset: u8 },
}

impl Loc {
    pub fn vreg(v: VReg) -> Self {
        Loc::Direct(Operand::Virtual(v))
    }

    pub fn imm(value: u8) -> Self {
        Loc::Direct(Operand::imm(value))
    }

    pub fn as_imm(&self) -> Option<u8> {
        match self {
            Loc::Direct(Operand::Immediate(Imm::Byte(b))) => Some(*b),
            _ => None,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, Loc::Indirect { .. })
    }
}

/// What the selector knows about the machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineState {
    /// Operands whose value A currently holds
    a: Vec<Operand>,
    /// Operand whose value N/Z currently describe
    nz: Option<Operand>,
    /// Pointer currently copied into PTR
    ptr: Option<[VReg; 2]>,
    /// Constant in Y
    y: Option<u8>,
}

impl MachineState {
    pub fn a_holds(&self, operand: &Operand) -> bool {
        self.a.contains(operand)
    }

    pub fn flags_describe(&self, operand: &Operand) -> bool {
        self.nz.as_ref() == Some(operand)
    }

    fn forget(&mut self) {
        *self = MachineState::default();
    }

    /// Track one emitted instruction
    fn observe(&mut self, inst: &AsmInst, ptr_cell: u8) {
        let (op, operand) = match inst {
            AsmInst::Label(_) => return self.forget(),
            AsmInst::Comment(_) => return,
            AsmInst::Op(op, operand) => (*op, operand),
        };
        if op == Opcode::Jsr || op == Opcode::Brk {
            return self.forget();
        }

        let effects = isa::effects(inst);
        let trackable = matches!(operand, Operand::Virtual(_) | Operand::Immediate(Imm::Byte(_)));

        // A memory write kills every fact about that memory
        if isa::writes_memory_operand(op) && operand.is_memory() {
            self.a.retain(|held| held != operand);
            if self.nz.as_ref() == Some(operand) {
                self.nz = None;
            }
            match operand {
                Operand::Virtual(v) if self.ptr.is_some_and(|p| p.contains(v)) => self.ptr = None,
                Operand::ZeroPage(zp) if *zp == ptr_cell || *zp == ptr_cell.wrapping_add(1) => {
                    self.ptr = None
                }
                _ => {}
            }
        }

        match op {
            Opcode::Lda => {
                self.a = if trackable { vec![operand.clone()] } else { Vec::new() };
                self.nz = trackable.then(|| operand.clone());
            }
            Opcode::Sta => {
                if let Operand::Virtual(_) = operand {
                    // A and memory agree now; flags are unchanged
                    self.a.push(operand.clone());
                }
            }
            Opcode::Ldy => {
                self.y = match operand {
                    Operand::Immediate(Imm::Byte(b)) => Some(*b),
                    _ => None,
                };
                self.nz = None;
            }
            Opcode::Inc | Opcode::Dec | Opcode::Asl | Opcode::Lsr | Opcode::Rol | Opcode::Ror
                if operand.is_memory() =>
            {
                self.nz = matches!(operand, Operand::Virtual(_)).then(|| operand.clone());
            }
            _ => {
                if effects.writes(m65_codegen::Reg::A) {
                    self.a.clear();
                }
                if effects.writes_nz {
                    self.nz = None;
                }
                if effects.writes(m65_codegen::Reg::Y) {
                    self.y = None;
                }
            }
        }
    }
}

/// A candidate code sequence, built against a copy of the machine state
#[derive(Debug, Clone)]
pub struct Seq {
    pub code: Vec<AsmInst>,
    pub calls: Vec<(usize, CallTarget)>,
    pub runtime: BTreeSet<crate::runtime::Routine>,
    pub state: MachineState,
    pub next_vreg: u32,
    ptr_cell: u8,
}

impl Seq {
    pub fn new(ptr_cell: u8, next_vreg: u32) -> Self {
        Self {
            code: Vec::new(),
            calls: Vec::new(),
            runtime: BTreeSet::new(),
            state: MachineState::default(),
            next_vreg,
            ptr_cell,
        }
    }

    /// Empty sequence continuing from this one's state
    pub fn fork(&self) -> Self {
        Self {
            code: Vec::new(),
            calls: Vec::new(),
            runtime: BTreeSet::new(),
            state: self.state.clone(),
            next_vreg: self.next_vreg,
            ptr_cell: self.ptr_cell,
        }
    }

    /// Append a chosen candidate
    pub fn commit(&mut self, other: Seq) {
        let base = self.code.len();
        self.code.extend(other.code);
        self.calls
            .extend(other.calls.into_iter().map(|(i, target)| (base + i, target)));
        self.runtime.extend(other.runtime);
        self.state = other.state;
        self.next_vreg = other.next_vreg;
    }

    pub fn cost(&self) -> Cost {
        Cost::of(&self.code)
    }

    pub fn new_vreg(&mut self) -> VReg {
        let v = VReg(self.next_vreg);
        self.next_vreg += 1;
        v
    }

    pub fn push(&mut self, inst: AsmInst) {
        self.state.observe(&inst, self.ptr_cell);
        self.code.push(inst);
    }

    pub fn op(&mut self, op: Opcode, operand: Operand) {
        self.push(AsmInst::op(op, operand));
    }

    pub fn implied(&mut self, op: Opcode) {
        self.push(AsmInst::implied(op));
    }

    pub fn label(&mut self, name: &str) {
        self.push(AsmInst::label(name));
    }

    pub fn branch(&mut self, op: Opcode, label: &str) {
        self.push(AsmInst::branch(op, label));
    }

    pub fn jmp(&mut self, label: &str) {
        self.push(AsmInst::jmp(label));
    }

    /// `JSR` recorded as a call site
    pub fn call(&mut self, name: &str, target: CallTarget) {
        self.calls.push((self.code.len(), target));
        self.push(AsmInst::jsr(name));
    }

    /// `JSR $addr` to a fixed routine
    pub fn call_address(&mut self, address: u16, target: CallTarget) {
        self.calls.push((self.code.len(), target));
        self.push(AsmInst::op(Opcode::Jsr, Operand::abs(address)));
    }

    fn set_y(&mut self, value: u8) {
        if self.state.y != Some(value) {
            self.op(Opcode::Ldy, Operand::imm(value));
        }
    }

    /// Copy a pointer pair into PTR unless it is already there
    fn setup_ptr(&mut self, ptr: [VReg; 2]) {
        if self.state.ptr == Some(ptr) {
            return;
        }
        self.load_a_operand(Operand::Virtual(ptr[0]));
        self.op(Opcode::Sta, Operand::ZeroPage(self.ptr_cell));
        self.load_a_operand(Operand::Virtual(ptr[1]));
        self.op(Opcode::Sta, Operand::ZeroPage(self.ptr_cell.wrapping_add(1)));
        self.state.ptr = Some(ptr);
    }

    fn load_a_operand(&mut self, operand: Operand) {
        if !self.state.a_holds(&operand) {
            self.op(Opcode::Lda, operand);
        }
    }

    /// A = byte, skipped when A already holds it
    pub fn load_a(&mut self, loc: &Loc) {
        match loc {
            Loc::Direct(operand) => self.load_a_operand(operand.clone()),
            Loc::Indirect { ptr, offset } => {
                self.setup_ptr(*ptr);
                self.set_y(*offset);
                self.op(Opcode::Lda, Operand::IndirectY(self.ptr_cell));
            }
        }
    }

    /// Byte = A
    pub fn store_a(&mut self, loc: &Loc) -> Result<()> {
        match loc {
            Loc::Direct(operand) if operand.is_memory() => {
                self.op(Opcode::Sta, operand.clone());
                Ok(())
            }
            Loc::Direct(operand) => Err(CompilerError::internal(format!(
                "store to non-memory operand {}",
                operand
            ))),
            Loc::Indirect { ptr, offset } => {
                if self.state.ptr != Some(*ptr) {
                    let scratch = self.new_vreg();
                    self.op(Opcode::Sta, Operand::Virtual(scratch));
                    self.setup_ptr(*ptr);
                    self.op(Opcode::Lda, Operand::Virtual(scratch));
                }
                self.set_y(*offset);
                self.op(Opcode::Sta, Operand::IndirectY(self.ptr_cell));
                Ok(())
            }
        }
    }

    /// `op byte` for an ALU instruction reading its operand
    ///
    /// Indirect operands must already be addressed by PTR.
    pub fn alu(&mut self, op: Opcode, loc: &Loc) -> Result<()> {
        match loc {
            Loc::Direct(operand) => {
                self.op(op, operand.clone());
                Ok(())
            }
            Loc::Indirect { ptr, offset } if self.state.ptr == Some(*ptr) => {
                self.set_y(*offset);
                self.op(op, Operand::IndirectY(self.ptr_cell));
                Ok(())
            }
            Loc::Indirect { .. } => Err(CompilerError::internal(format!(
                "{} operand through a pointer that is not loaded",
                op
            ))),
        }
    }

    /// Make N/Z describe a byte
    pub fn test_nz(&mut self, loc: &Loc) {
        if let Loc::Direct(operand) = loc {
            if self.state.flags_describe(operand) {
                return;
            }
            self.op(Opcode::Lda, operand.clone());
            return;
        }
        self.load_a(loc);
    }

    /// Copy a byte to a fresh vreg so it can be used as an ALU operand
    pub fn materialize(&mut self, loc: &Loc) -> Result<Loc> {
        if !loc.is_indirect() {
            return Ok(loc.clone());
        }
        let v = self.new_vreg();
        self.load_a(loc);
        self.store_a(&Loc::vreg(v))?;
        Ok(Loc::vreg(v))
    }
}
