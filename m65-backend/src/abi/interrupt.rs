//! Interrupt handler save/restore sequences
//!
//! A non-recursive handler runs with its interrupt source masked, so one
//! static save area per handler is enough; it saves exactly the registers
//! and zero-page cells in its clobber set. A recursive handler unmasks
//! interrupts and may be re-entered, so it pushes the full register set
//! (P, A, X, Y) and its zero-page cells on the stack.

use m65_codegen::{Address, AsmInst, ClobberSet, Opcode, Operand, Reg};

use super::frame::EntryShape;
use crate::naming;

/// What a handler saves and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePlan {
    /// Save into `__isr_save_<name>`
    Static {
        area: String,
        regs: Vec<Reg>,
        zero_page: Vec<u8>,
    },
    /// Push on the hardware stack; always P, A, X and Y
    Stacked { zero_page: Vec<u8> },
}

impl SavePlan {
    pub fn static_area(name: &str, saves: &ClobberSet) -> Self {
        SavePlan::Static {
            area: naming::isr_save_area(name),
            regs: saves.regs.iter().copied().collect(),
            zero_page: saves.zero_page.iter().copied().collect(),
        }
    }

    pub fn stacked(saves: &ClobberSet) -> Self {
        SavePlan::Stacked {
            zero_page: saves.zero_page.iter().copied().collect(),
        }
    }

    /// Bytes of static storage needed
    pub fn area_size(&self) -> u16 {
        match self {
            SavePlan::Static { regs, zero_page, .. } => (regs.len() + zero_page.len()) as u16,
            SavePlan::Stacked { .. } => 0,
        }
    }

    pub fn prologue(&self) -> EntryShape {
        let mut shape = EntryShape::default();
        match self {
            SavePlan::Static { area, regs, zero_page } => {
                let mut k = 0;
                for reg in regs {
                    let store = match reg {
                        Reg::A => Opcode::Sta,
                        Reg::X => Opcode::Stx,
                        Reg::Y => Opcode::Sty,
                    };
                    shape.push(AsmInst::op(store, slot(area, k)));
                    k += 1;
                }
                for cell in zero_page {
                    shape.push(AsmInst::op(Opcode::Lda, Operand::ZeroPage(*cell)));
                    shape.push(AsmInst::op(Opcode::Sta, slot(area, k)));
                    k += 1;
                }
            }
            SavePlan::Stacked { zero_page } => {
                shape.push(AsmInst::implied(Opcode::Php));
                shape.push(AsmInst::implied(Opcode::Pha));
                shape.push(AsmInst::implied(Opcode::Txa));
                shape.push(AsmInst::implied(Opcode::Pha));
                shape.push(AsmInst::implied(Opcode::Tya));
                shape.push(AsmInst::implied(Opcode::Pha));
                for cell in zero_page {
                    shape.push(AsmInst::op(Opcode::Lda, Operand::ZeroPage(*cell)));
                    shape.push(AsmInst::implied(Opcode::Pha));
                }
            }
        }
        shape
    }

    /// Restore sequence ending in `RTI`
    pub fn epilogue(&self) -> EntryShape {
        let mut shape = EntryShape::default();
        match self {
            SavePlan::Static { area, regs, zero_page } => {
                for (i, cell) in zero_page.iter().enumerate() {
                    shape.push(AsmInst::op(Opcode::Lda, slot(area, regs.len() + i)));
                    shape.push(AsmInst::op(Opcode::Sta, Operand::ZeroPage(*cell)));
                }
                // A last: it carried the zero-page copies
                for (k, reg) in regs.iter().enumerate().rev() {
                    let load = match reg {
                        Reg::A => Opcode::Lda,
                        Reg::X => Opcode::Ldx,
                        Reg::Y => Opcode::Ldy,
                    };
                    shape.push(AsmInst::op(load, slot(area, k)));
                }
            }
            SavePlan::Stacked { zero_page } => {
                for cell in zero_page.iter().rev() {
                    shape.push(AsmInst::implied(Opcode::Pla));
                    shape.push(AsmInst::op(Opcode::Sta, Operand::ZeroPage(*cell)));
                }
                shape.push(AsmInst::implied(Opcode::Pla));
                shape.push(AsmInst::implied(Opcode::Tay));
                shape.push(AsmInst::implied(Opcode::Pla));
                shape.push(AsmInst::implied(Opcode::Tax));
                shape.push(AsmInst::implied(Opcode::Pla));
                shape.push(AsmInst::implied(Opcode::Plp));
            }
        }
        shape.push(AsmInst::implied(Opcode::Rti));
        shape
    }

    /// Registers saved on entry, in save order; `None` stands for P
    pub fn saved_registers(&self) -> Vec<Option<Reg>> {
        match self {
            SavePlan::Static { regs, .. } => regs.iter().map(|r| Some(*r)).collect(),
            SavePlan::Stacked { .. } => vec![None, Some(Reg::A), Some(Reg::X), Some(Reg::Y)],
        }
    }

    pub fn saved_zero_page(&self) -> &[u8] {
        match self {
            SavePlan::Static { zero_page, .. } | SavePlan::Stacked { zero_page } => zero_page,
        }
    }
}

fn slot(area: &str, k: usize) -> Operand {
    Operand::Absolute(Address::Symbol {
        name: area.to_string(),
        addend: k as i32,
    })
}
