//! 6502 Assembly Instruction Definitions
//!
//! This module defines the register model and the instruction form shared by
//! the selector, the allocator and every emitter. Before allocation an
//! operand may still name a virtual byte register or a stack-frame byte;
//! both are gone by the time an instruction reaches an emitter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 6502 hardware registers available to values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Reg {
    A,
    X,
    Y,
}

impl Reg {
    pub const ALL: [Reg; 3] = [Reg::A, Reg::X, Reg::Y];
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::A => write!(f, "A"),
            Reg::X => write!(f, "X"),
            Reg::Y => write!(f, "Y"),
        }
    }
}

/// Processor status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flag {
    N,
    V,
    D,
    I,
    Z,
    C,
}

/// Virtual byte register, replaced by a location during allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Which byte of a 16-bit address an immediate takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteSel {
    Lo,
    Hi,
}

/// Immediate operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Imm {
    Byte(u8),
    /// `#<(name+addend)` or `#>(name+addend)`
    Symbol {
        name: String,
        addend: i32,
        part: ByteSel,
    },
}

/// A 16-bit address operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Abs(u16),
    /// Function, global or runtime routine
    Symbol { name: String, addend: i32 },
    /// Code label local to the current function
    Label(String),
    /// Offset into a paged bank's window
    BankRelative { bank: u8, offset: u16 },
}

impl Address {
    pub fn symbol(name: &str) -> Self {
        Address::Symbol {
            name: name.to_string(),
            addend: 0,
        }
    }

    /// Name of the symbol this address refers to, if any
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Address::Symbol { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Abs(addr) => write!(f, "${:04X}", addr),
            Address::Symbol { name, addend: 0 } => write!(f, "{}", name),
            Address::Symbol { name, addend } if *addend > 0 => write!(f, "{}+{}", name, addend),
            Address::Symbol { name, addend } => write!(f, "{}{}", name, addend),
            Address::Label(label) => write!(f, "{}", label),
            Address::BankRelative { bank, offset } => write!(f, "bank{}+${:04X}", bank, offset),
        }
    }
}

/// Instruction operand, one per 6502 addressing mode plus the two
/// pre-allocation forms
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Implied,
    Accumulator,
    Immediate(Imm),
    ZeroPage(u8),
    Absolute(Address),
    AbsoluteX(Address),
    AbsoluteY(Address),
    /// `(zp),Y`
    IndirectY(u8),
    /// `(abs)`, JMP only
    Indirect(Address),
    /// Branch target label
    Relative(String),
    /// Before allocation only
    Virtual(VReg),
    /// Stack-frame byte; before frame lowering only
    Frame(u8),
}

impl Operand {
    pub fn imm(value: u8) -> Self {
        Operand::Immediate(Imm::Byte(value))
    }

    pub fn abs(addr: u16) -> Self {
        Operand::Absolute(Address::Abs(addr))
    }

    pub fn symbol(name: &str) -> Self {
        Operand::Absolute(Address::symbol(name))
    }

    pub fn label(name: &str) -> Self {
        Operand::Absolute(Address::Label(name.to_string()))
    }

    /// `#<(name+addend)` / `#>(name+addend)`
    pub fn symbol_byte(name: &str, addend: i32, part: ByteSel) -> Self {
        Operand::Immediate(Imm::Symbol {
            name: name.to_string(),
            addend,
            part,
        })
    }

    pub fn as_vreg(&self) -> Option<VReg> {
        match self {
            Operand::Virtual(v) => Some(*v),
            _ => None,
        }
    }

    /// True for operands that still need allocation or frame lowering
    pub fn is_pre_allocation(&self) -> bool {
        matches!(self, Operand::Virtual(_) | Operand::Frame(_))
    }

    /// True if the operand names a memory location (as opposed to a
    /// register, an immediate or a label)
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            Operand::ZeroPage(_)
                | Operand::Absolute(_)
                | Operand::AbsoluteX(_)
                | Operand::AbsoluteY(_)
                | Operand::IndirectY(_)
                | Operand::Virtual(_)
                | Operand::Frame(_)
        )
    }

    /// Symbol referenced by this operand, if any
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Operand::Absolute(a) | Operand::AbsoluteX(a) | Operand::AbsoluteY(a) | Operand::Indirect(a) => {
                a.symbol_name()
            }
            Operand::Immediate(Imm::Symbol { name, .. }) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Implied => Ok(()),
            Operand::Accumulator => write!(f, "A"),
            Operand::Immediate(Imm::Byte(b)) => write!(f, "#${:02X}", b),
            Operand::Immediate(Imm::Symbol { name, addend, part }) => {
                let sel = match part {
                    ByteSel::Lo => '<',
                    ByteSel::Hi => '>',
                };
                match addend {
                    0 => write!(f, "#{}{}", sel, name),
                    a if *a > 0 => write!(f, "#{}({}+{})", sel, name, a),
                    a => write!(f, "#{}({}{})", sel, name, a),
                }
            }
            Operand::ZeroPage(zp) => write!(f, "${:02X}", zp),
            Operand::Absolute(a) => write!(f, "{}", a),
            Operand::AbsoluteX(a) => write!(f, "{},X", a),
            Operand::AbsoluteY(a) => write!(f, "{},Y", a),
            Operand::IndirectY(zp) => write!(f, "(${:02X}),Y", zp),
            Operand::Indirect(a) => write!(f, "({})", a),
            Operand::Relative(label) => write!(f, "{}", label),
            Operand::Virtual(v) => write!(f, "{}", v),
            Operand::Frame(o) => write!(f, "frame+{}", o),
        }
    }
}

/// 6502 mnemonics (the documented instruction set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

impl Opcode {
    pub const ALL: [Opcode; 56] = [
        Opcode::Adc, Opcode::And, Opcode::Asl, Opcode::Bcc, Opcode::Bcs, Opcode::Beq, Opcode::Bit,
        Opcode::Bmi, Opcode::Bne, Opcode::Bpl, Opcode::Brk, Opcode::Bvc, Opcode::Bvs, Opcode::Clc,
        Opcode::Cld, Opcode::Cli, Opcode::Clv, Opcode::Cmp, Opcode::Cpx, Opcode::Cpy, Opcode::Dec,
        Opcode::Dex, Opcode::Dey, Opcode::Eor, Opcode::Inc, Opcode::Inx, Opcode::Iny, Opcode::Jmp,
        Opcode::Jsr, Opcode::Lda, Opcode::Ldx, Opcode::Ldy, Opcode::Lsr, Opcode::Nop, Opcode::Ora,
        Opcode::Pha, Opcode::Php, Opcode::Pla, Opcode::Plp, Opcode::Rol, Opcode::Ror, Opcode::Rti,
        Opcode::Rts, Opcode::Sbc, Opcode::Sec, Opcode::Sed, Opcode::Sei, Opcode::Sta, Opcode::Stx,
        Opcode::Sty, Opcode::Tax, Opcode::Tay, Opcode::Tsx, Opcode::Txa, Opcode::Txs, Opcode::Tya,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Adc => "ADC",
            Opcode::And => "AND",
            Opcode::Asl => "ASL",
            Opcode::Bcc => "BCC",
            Opcode::Bcs => "BCS",
            Opcode::Beq => "BEQ",
            Opcode::Bit => "BIT",
            Opcode::Bmi => "BMI",
            Opcode::Bne => "BNE",
            Opcode::Bpl => "BPL",
            Opcode::Brk => "BRK",
            Opcode::Bvc => "BVC",
            Opcode::Bvs => "BVS",
            Opcode::Clc => "CLC",
            Opcode::Cld => "CLD",
            Opcode::Cli => "CLI",
            Opcode::Clv => "CLV",
            Opcode::Cmp => "CMP",
            Opcode::Cpx => "CPX",
            Opcode::Cpy => "CPY",
            Opcode::Dec => "DEC",
            Opcode::Dex => "DEX",
            Opcode::Dey => "DEY",
            Opcode::Eor => "EOR",
            Opcode::Inc => "INC",
            Opcode::Inx => "INX",
            Opcode::Iny => "INY",
            Opcode::Jmp => "JMP",
            Opcode::Jsr => "JSR",
            Opcode::Lda => "LDA",
            Opcode::Ldx => "LDX",
            Opcode::Ldy => "LDY",
            Opcode::Lsr => "LSR",
            Opcode::Nop => "NOP",
            Opcode::Ora => "ORA",
            Opcode::Pha => "PHA",
            Opcode::Php => "PHP",
            Opcode::Pla => "PLA",
            Opcode::Plp => "PLP",
            Opcode::Rol => "ROL",
            Opcode::Ror => "ROR",
            Opcode::Rti => "RTI",
            Opcode::Rts => "RTS",
            Opcode::Sbc => "SBC",
            Opcode::Sec => "SEC",
            Opcode::Sed => "SED",
            Opcode::Sei => "SEI",
            Opcode::Sta => "STA",
            Opcode::Stx => "STX",
            Opcode::Sty => "STY",
            Opcode::Tax => "TAX",
            Opcode::Tay => "TAY",
            Opcode::Tsx => "TSX",
            Opcode::Txa => "TXA",
            Opcode::Txs => "TXS",
            Opcode::Tya => "TYA",
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Opcode::Bcc
                | Opcode::Bcs
                | Opcode::Beq
                | Opcode::Bmi
                | Opcode::Bne
                | Opcode::Bpl
                | Opcode::Bvc
                | Opcode::Bvs
        )
    }

    /// The branch taken on the opposite condition
    pub fn inverted_branch(&self) -> Option<Opcode> {
        Some(match self {
            Opcode::Bcc => Opcode::Bcs,
            Opcode::Bcs => Opcode::Bcc,
            Opcode::Beq => Opcode::Bne,
            Opcode::Bne => Opcode::Beq,
            Opcode::Bmi => Opcode::Bpl,
            Opcode::Bpl => Opcode::Bmi,
            Opcode::Bvc => Opcode::Bvs,
            Opcode::Bvs => Opcode::Bvc,
            _ => return None,
        })
    }

    /// Control never falls through to the next instruction
    pub fn ends_block(&self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Rts | Opcode::Rti | Opcode::Brk)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// 6502 Assembly Instructions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsmInst {
    Op(Opcode, Operand),
    /// Label for jumps/branches
    Label(String),
    /// Assembly comment
    Comment(String),
}

impl AsmInst {
    /// Instruction without operand
    pub fn implied(op: Opcode) -> Self {
        match op {
            Opcode::Asl | Opcode::Lsr | Opcode::Rol | Opcode::Ror => {
                AsmInst::Op(op, Operand::Accumulator)
            }
            _ => AsmInst::Op(op, Operand::Implied),
        }
    }

    pub fn op(op: Opcode, operand: Operand) -> Self {
        AsmInst::Op(op, operand)
    }

    pub fn branch(op: Opcode, label: &str) -> Self {
        AsmInst::Op(op, Operand::Relative(label.to_string()))
    }

    pub fn jmp(label: &str) -> Self {
        AsmInst::Op(Opcode::Jmp, Operand::label(label))
    }

    pub fn jsr(name: &str) -> Self {
        AsmInst::Op(Opcode::Jsr, Operand::symbol(name))
    }

    pub fn label(name: &str) -> Self {
        AsmInst::Label(name.to_string())
    }

    pub fn comment(text: impl Into<String>) -> Self {
        AsmInst::Comment(text.into())
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            AsmInst::Op(op, _) => Some(*op),
            _ => None,
        }
    }

    pub fn operand(&self) -> Option<&Operand> {
        match self {
            AsmInst::Op(_, operand) => Some(operand),
            _ => None,
        }
    }

    /// Label targeted by a branch or local jump
    pub fn target_label(&self) -> Option<&str> {
        match self {
            AsmInst::Op(_, Operand::Relative(label)) => Some(label),
            AsmInst::Op(Opcode::Jmp, Operand::Absolute(Address::Label(label))) => Some(label),
            _ => None,
        }
    }

    /// True for labels and comments, which produce no code
    pub fn is_pseudo(&self) -> bool {
        !matches!(self, AsmInst::Op(..))
    }
}

impl fmt::Display for AsmInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmInst::Op(op, Operand::Implied) => write!(f, "    {}", op),
            AsmInst::Op(op, operand) => write!(f, "    {} {}", op, operand),
            AsmInst::Label(name) => write!(f, "{}:", name),
            AsmInst::Comment(text) => write!(f, "    ; {}", text),
        }
    }
}
