//! Runtime support routines
//!
//! Hand-written routines placed in the common area: one trampoline per
//! called bank plus the shared trampoline return path, and the
//! `setjmp`/`longjmp` pair. They are ordinary instruction lists so every
//! interface emits them the same way as compiled code.
//!
//! Bank-select writes always happen with interrupts masked (`PHP`/`SEI` ...
//! `PLP`) so a handler never observes the shadow and the hardware register
//! disagreeing.

use m65_codegen::{Address, AsmInst, ByteSel, ClobberSet, JumpBuffer, Opcode, Operand, ZeroPageLayout};

use crate::naming;

/// A runtime routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Routine {
    /// Entry into bank N; callee address minus one in A (lo) / X (hi)
    Trampoline(u8),
    /// Restores the caller's bank after a trampolined call
    TrampolineReturn,
    SetJmp,
    LongJmp,
}

impl Routine {
    pub fn name(&self) -> String {
        match self {
            Routine::Trampoline(bank) => naming::trampoline(*bank),
            Routine::TrampolineReturn => naming::TRAMPOLINE_RETURN.to_string(),
            Routine::SetJmp => naming::SETJMP.to_string(),
            Routine::LongJmp => naming::LONGJMP.to_string(),
        }
    }

    /// Routines this one transfers control to
    pub fn dependencies(&self) -> Vec<Routine> {
        match self {
            Routine::Trampoline(_) => vec![Routine::TrampolineReturn],
            _ => Vec::new(),
        }
    }

    pub fn code(&self, layout: &ZeroPageLayout, bank_select: u16) -> Vec<AsmInst> {
        let shadow = Operand::ZeroPage(layout.bank_shadow);
        let select = Operand::abs(bank_select);
        let arg0 = layout.arg(0);
        let op = AsmInst::op;
        let implied = AsmInst::implied;
        let name = self.name();

        let mut code = vec![AsmInst::label(&name)];
        match self {
            Routine::Trampoline(bank) => {
                let ret = naming::TRAMPOLINE_RETURN;
                code.extend([
                    implied(Opcode::Tay),
                    // caller's bank, then the return path, under the callee
                    op(Opcode::Lda, shadow.clone()),
                    implied(Opcode::Pha),
                    op(Opcode::Lda, Operand::symbol_byte(ret, -1, ByteSel::Hi)),
                    implied(Opcode::Pha),
                    op(Opcode::Lda, Operand::symbol_byte(ret, -1, ByteSel::Lo)),
                    implied(Opcode::Pha),
                    // callee address for the RTS below
                    implied(Opcode::Txa),
                    implied(Opcode::Pha),
                    implied(Opcode::Tya),
                    implied(Opcode::Pha),
                    implied(Opcode::Php),
                    implied(Opcode::Sei),
                    op(Opcode::Lda, Operand::imm(*bank)),
                    op(Opcode::Sta, shadow),
                    op(Opcode::Sta, select),
                    implied(Opcode::Plp),
                    implied(Opcode::Rts),
                ]);
            }
            Routine::TrampolineReturn => {
                code.extend([
                    implied(Opcode::Tay),
                    implied(Opcode::Pla),
                    implied(Opcode::Php),
                    implied(Opcode::Sei),
                    op(Opcode::Sta, shadow),
                    op(Opcode::Sta, select),
                    implied(Opcode::Plp),
                    implied(Opcode::Tya),
                    implied(Opcode::Rts),
                ]);
            }
            Routine::SetJmp => {
                let buf = Operand::IndirectY(arg0);
                let ldy = |i: u8| op(Opcode::Ldy, Operand::imm(i));
                code.extend([
                    implied(Opcode::Pha),
                    implied(Opcode::Tya),
                    ldy(JumpBuffer::Y),
                    op(Opcode::Sta, buf.clone()),
                    implied(Opcode::Txa),
                    implied(Opcode::Dey),
                    op(Opcode::Sta, buf.clone()),
                    implied(Opcode::Pla),
                    implied(Opcode::Dey),
                    op(Opcode::Sta, buf.clone()),
                    implied(Opcode::Tsx),
                    implied(Opcode::Txa),
                    ldy(JumpBuffer::SP),
                    op(Opcode::Sta, buf.clone()),
                    op(Opcode::Lda, Operand::AbsoluteX(Address::Abs(0x0101))),
                    implied(Opcode::Iny),
                    op(Opcode::Sta, buf.clone()),
                    op(Opcode::Lda, Operand::AbsoluteX(Address::Abs(0x0102))),
                    implied(Opcode::Iny),
                    op(Opcode::Sta, buf.clone()),
                    op(Opcode::Lda, shadow),
                    ldy(JumpBuffer::BANK),
                    op(Opcode::Sta, buf),
                    op(Opcode::Lda, Operand::imm(0)),
                    implied(Opcode::Tax),
                    implied(Opcode::Rts),
                ]);
            }
            Routine::LongJmp => {
                let buf = Operand::IndirectY(arg0);
                let ldy = |i: u8| op(Opcode::Ldy, Operand::imm(i));
                let nonzero = format!("{}_nz", name);
                code.extend([
                    ldy(JumpBuffer::SP),
                    op(Opcode::Lda, buf.clone()),
                    implied(Opcode::Tax),
                    implied(Opcode::Txs),
                    implied(Opcode::Iny),
                    op(Opcode::Lda, buf.clone()),
                    op(Opcode::Sta, Operand::AbsoluteX(Address::Abs(0x0101))),
                    implied(Opcode::Iny),
                    op(Opcode::Lda, buf.clone()),
                    op(Opcode::Sta, Operand::AbsoluteX(Address::Abs(0x0102))),
                    ldy(JumpBuffer::BANK),
                    op(Opcode::Lda, buf.clone()),
                    implied(Opcode::Php),
                    implied(Opcode::Sei),
                    op(Opcode::Sta, shadow),
                    op(Opcode::Sta, select),
                    implied(Opcode::Plp),
                    ldy(JumpBuffer::Y),
                    op(Opcode::Lda, buf),
                    implied(Opcode::Tay),
                    op(Opcode::Lda, Operand::ZeroPage(layout.arg(2))),
                    AsmInst::branch(Opcode::Bne, &nonzero),
                    op(Opcode::Lda, Operand::imm(1)),
                    AsmInst::label(&nonzero),
                    op(Opcode::Ldx, Operand::imm(0)),
                    implied(Opcode::Rts),
                ]);
            }
        }
        code
    }

    /// Everything the routine writes
    pub fn clobbers(&self, layout: &ZeroPageLayout, bank_select: u16) -> ClobberSet {
        ClobberSet::written_by(&self.code(layout, bank_select))
    }
}

/// Close a set of routines over their dependencies
pub fn with_dependencies(routines: impl IntoIterator<Item = Routine>) -> Vec<Routine> {
    let mut all = std::collections::BTreeSet::new();
    for routine in routines {
        all.extend(routine.dependencies());
        all.insert(routine);
    }
    all.into_iter().collect()
}
