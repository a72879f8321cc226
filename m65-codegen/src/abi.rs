//! 6502 ABI data model
//!
//! Fixed facts of the calling convention that both the backend and the test
//! simulator need: where arguments live in zero page, the layout of a
//! `jmp_buf`, and the clobber sets the ABI engine computes for functions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::asm::{AsmInst, Operand, Reg};
use crate::isa;

/// Zero-page conventions
///
/// ```text
/// $80-$8F  argument slots (sret pointer, parameters, variadic count/pointer)
/// $90-$91  PTR: scratch pointer for (zp),Y accesses
/// $92      shadow of the bank select register
/// $93-     pseudo-register pool
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroPageLayout {
    pub arg_base: u8,
    pub arg_slots: u8,
    pub ptr: u8,
    pub bank_shadow: u8,
    pub pool_base: u8,
    pub pool_size: u8,
}

impl Default for ZeroPageLayout {
    fn default() -> Self {
        Self {
            arg_base: 0x80,
            arg_slots: 16,
            ptr: 0x90,
            bank_shadow: 0x92,
            pool_base: 0x93,
            pool_size: 64,
        }
    }
}

impl ZeroPageLayout {
    /// Address of argument slot `index`
    pub fn arg(&self, index: u8) -> u8 {
        self.arg_base.wrapping_add(index)
    }

    pub fn ptr_lo(&self) -> u8 {
        self.ptr
    }

    pub fn ptr_hi(&self) -> u8 {
        self.ptr.wrapping_add(1)
    }

    /// Every argument slot
    pub fn arg_cells(&self) -> Vec<u8> {
        (0..self.arg_slots).map(|i| self.arg(i)).collect()
    }

    /// Pseudo-register pool in allocation order
    pub fn pool(&self) -> Vec<u8> {
        (0..self.pool_size as u16)
            .map(|i| self.pool_base as u16 + i)
            .filter(|addr| *addr <= 0xFF)
            .map(|addr| addr as u8)
            .collect()
    }

    /// Slots an interrupt handler may not hand out before saving them
    pub fn interrupt_reserved(&self) -> BTreeSet<u8> {
        let mut reserved: BTreeSet<u8> = self.arg_cells().into_iter().collect();
        reserved.insert(self.ptr_lo());
        reserved.insert(self.ptr_hi());
        reserved
    }

    /// Check that the regions do not overlap
    pub fn validate(&self) -> Result<(), String> {
        let args_end = self.arg_base as u16 + self.arg_slots as u16;
        let ptr = self.ptr as u16;
        let shadow = self.bank_shadow as u16;
        let pool = self.pool_base as u16..self.pool_base as u16 + self.pool_size as u16;
        if args_end > 0x100 || pool.end > 0x100 {
            return Err("zero-page region extends past $FF".to_string());
        }
        let in_args = |a: u16| a >= self.arg_base as u16 && a < args_end;
        if in_args(ptr) || in_args(ptr + 1) || in_args(shadow) {
            return Err("PTR or bank shadow overlaps the argument slots".to_string());
        }
        if pool.contains(&ptr) || pool.contains(&(ptr + 1)) || pool.contains(&shadow) {
            return Err("PTR or bank shadow overlaps the pseudo-register pool".to_string());
        }
        if self.arg_base as u16 >= pool.start && (self.arg_base as u16) < pool.end {
            return Err("argument slots overlap the pseudo-register pool".to_string());
        }
        if shadow == ptr || shadow == ptr + 1 {
            return Err("bank shadow overlaps PTR".to_string());
        }
        Ok(())
    }
}

/// Byte layout of a `jmp_buf`
pub struct JumpBuffer;

impl JumpBuffer {
    pub const SP: u8 = 0;
    pub const RET_LO: u8 = 1;
    pub const RET_HI: u8 = 2;
    pub const A: u8 = 3;
    pub const X: u8 = 4;
    pub const Y: u8 = 5;
    pub const BANK: u8 = 6;
    pub const SIZE: u16 = 7;
}

/// How a function hands back its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    Void,
    /// In A
    Byte,
    /// Low byte in A, high byte in X
    Word,
    /// Written through the hidden pointer in the first argument slots
    Struct { size: u16 },
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnKind::Void => write!(f, "void"),
            ReturnKind::Byte => write!(f, "A"),
            ReturnKind::Word => write!(f, "A/X"),
            ReturnKind::Struct { size } => write!(f, "sret[{}]", size),
        }
    }
}

/// Registers and zero-page cells a routine may overwrite
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClobberSet {
    pub regs: BTreeSet<Reg>,
    pub zero_page: BTreeSet<u8>,
}

impl ClobberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything a routine could touch under the given layout
    pub fn everything(layout: &ZeroPageLayout) -> Self {
        let mut set = Self::registers();
        set.zero_page.extend(layout.arg_cells());
        set.zero_page.insert(layout.ptr_lo());
        set.zero_page.insert(layout.ptr_hi());
        set.zero_page.insert(layout.bank_shadow);
        set.zero_page.extend(layout.pool());
        set
    }

    /// A, X and Y
    pub fn registers() -> Self {
        Self {
            regs: Reg::ALL.iter().copied().collect(),
            zero_page: BTreeSet::new(),
        }
    }

    /// Registers and cells written by a straight list of instructions
    ///
    /// Calls are not followed; the ABI engine adds callee sets separately.
    pub fn written_by(code: &[AsmInst]) -> Self {
        let mut set = Self::new();
        for inst in code {
            let effects = isa::effects(inst);
            if let AsmInst::Op(op, operand) = inst {
                if *op == crate::asm::Opcode::Jsr {
                    continue;
                }
                for reg in Reg::ALL {
                    if effects.writes(reg) {
                        set.regs.insert(reg);
                    }
                }
                if let Operand::ZeroPage(zp) = operand {
                    if isa::writes_memory_operand(*op) {
                        set.zero_page.insert(*zp);
                    }
                }
            }
        }
        set
    }

    pub fn insert_reg(&mut self, reg: Reg) {
        self.regs.insert(reg);
    }

    pub fn insert_zero_page(&mut self, cell: u8) {
        self.zero_page.insert(cell);
    }

    /// Merge another set in; returns true if anything was added
    pub fn union_with(&mut self, other: &ClobberSet) -> bool {
        let before = self.regs.len() + self.zero_page.len();
        self.regs.extend(other.regs.iter().copied());
        self.zero_page.extend(other.zero_page.iter().copied());
        before != self.regs.len() + self.zero_page.len()
    }

    pub fn contains_reg(&self, reg: Reg) -> bool {
        self.regs.contains(&reg)
    }

    pub fn contains_zero_page(&self, cell: u8) -> bool {
        self.zero_page.contains(&cell)
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty() && self.zero_page.is_empty()
    }
}

impl fmt::Display for ClobberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.regs.iter().map(|r| r.to_string()).collect();
        parts.extend(self.zero_page.iter().map(|zp| format!("${:02X}", zp)));
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{AsmInst, Opcode, Operand};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_layout_is_consistent() {
        let layout = ZeroPageLayout::default();
        assert_eq!(layout.validate(), Ok(()));
        assert_eq!(layout.arg(0), 0x80);
        assert_eq!(layout.arg(15), 0x8F);
        assert_eq!(layout.ptr_hi(), 0x91);
        assert_eq!(layout.pool().first(), Some(&0x93));
        assert_eq!(layout.pool().len(), 64);
    }

    #[test]
    fn test_overlapping_layout_is_rejected() {
        let layout = ZeroPageLayout {
            ptr: 0x85,
            ..ZeroPageLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_interrupt_reserved_slots() {
        let layout = ZeroPageLayout::default();
        let reserved = layout.interrupt_reserved();
        assert!(reserved.contains(&0x80));
        assert!(reserved.contains(&0x90));
        assert!(reserved.contains(&0x91));
        assert!(!reserved.contains(&0x93));
    }

    #[test]
    fn test_jump_buffer_layout() {
        assert_eq!(JumpBuffer::SP, 0);
        assert_eq!(JumpBuffer::RET_LO, 1);
        assert_eq!(JumpBuffer::RET_HI, 2);
        assert_eq!(JumpBuffer::BANK, 6);
        assert_eq!(JumpBuffer::SIZE, 7);
    }

    #[test]
    fn test_written_by_collects_registers_and_cells() {
        let code = vec![
            AsmInst::op(Opcode::Lda, Operand::imm(1)),
            AsmInst::op(Opcode::Sta, Operand::ZeroPage(0x93)),
            AsmInst::implied(Opcode::Tax),
            AsmInst::op(Opcode::Inc, Operand::ZeroPage(0x94)),
            AsmInst::op(Opcode::Lda, Operand::ZeroPage(0x95)),
        ];
        let set = ClobberSet::written_by(&code);
        assert!(set.contains_reg(Reg::A));
        assert!(set.contains_reg(Reg::X));
        assert!(!set.contains_reg(Reg::Y));
        assert_eq!(set.zero_page.iter().copied().collect::<Vec<_>>(), vec![0x93, 0x94]);
    }

    #[test]
    fn test_union_reports_growth() {
        let mut a = ClobberSet::new();
        a.insert_reg(Reg::A);
        let mut b = ClobberSet::new();
        b.insert_zero_page(0x93);
        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.to_string(), "{A, $93}");
    }
}
