//! Instruction set tables
//!
//! Encoding, size, base cycle count and register/flag effects for every
//! instruction the code generator emits. The cost model, the allocator's
//! interference checks and the hardware encoder all read from here.

use serde::{Deserialize, Serialize};

use crate::asm::{AsmInst, Opcode, Operand, Reg};

/// Addressing mode of an encoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddrMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectY,
    Indirect,
    Relative,
}

impl AddrMode {
    pub const ALL: [AddrMode; 10] = [
        AddrMode::Implied,
        AddrMode::Accumulator,
        AddrMode::Immediate,
        AddrMode::ZeroPage,
        AddrMode::Absolute,
        AddrMode::AbsoluteX,
        AddrMode::AbsoluteY,
        AddrMode::IndirectY,
        AddrMode::Indirect,
        AddrMode::Relative,
    ];

    /// Mode an operand will be encoded with
    ///
    /// Virtual registers are costed as zero-page and frame bytes as `abs,X`,
    /// which is what they become after allocation.
    pub fn of(operand: &Operand) -> AddrMode {
        match operand {
            Operand::Implied => AddrMode::Implied,
            Operand::Accumulator => AddrMode::Accumulator,
            Operand::Immediate(_) => AddrMode::Immediate,
            Operand::ZeroPage(_) | Operand::Virtual(_) => AddrMode::ZeroPage,
            Operand::Absolute(_) => AddrMode::Absolute,
            Operand::AbsoluteX(_) | Operand::Frame(_) => AddrMode::AbsoluteX,
            Operand::AbsoluteY(_) => AddrMode::AbsoluteY,
            Operand::IndirectY(_) => AddrMode::IndirectY,
            Operand::Indirect(_) => AddrMode::Indirect,
            Operand::Relative(_) => AddrMode::Relative,
        }
    }

    /// Encoded length including the opcode byte
    pub fn length(&self) -> u16 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 1,
            AddrMode::Immediate | AddrMode::ZeroPage | AddrMode::IndirectY | AddrMode::Relative => 2,
            AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::Indirect => 3,
        }
    }
}

/// Opcode byte for a mnemonic in an addressing mode
pub fn encode(op: Opcode, mode: AddrMode) -> Option<u8> {
    use AddrMode::*;
    use Opcode::*;

    // (imm, zp, abs, abs,X, abs,Y, (zp),Y) for the ALU group
    let alu = |row: [u8; 6]| -> Option<u8> {
        match mode {
            Immediate => Some(row[0]),
            ZeroPage => Some(row[1]),
            Absolute => Some(row[2]),
            AbsoluteX => Some(row[3]),
            AbsoluteY => Some(row[4]),
            IndirectY => Some(row[5]),
            _ => None,
        }
    };
    // (acc, zp, abs, abs,X) for shifts and rotates
    let shift = |row: [u8; 4]| -> Option<u8> {
        match mode {
            Accumulator => Some(row[0]),
            ZeroPage => Some(row[1]),
            Absolute => Some(row[2]),
            AbsoluteX => Some(row[3]),
            _ => None,
        }
    };
    let implied = |byte: u8| -> Option<u8> {
        match mode {
            Implied => Some(byte),
            _ => None,
        }
    };
    let relative = |byte: u8| -> Option<u8> {
        match mode {
            Relative => Some(byte),
            _ => None,
        }
    };

    match op {
        Adc => alu([0x69, 0x65, 0x6D, 0x7D, 0x79, 0x71]),
        And => alu([0x29, 0x25, 0x2D, 0x3D, 0x39, 0x31]),
        Cmp => alu([0xC9, 0xC5, 0xCD, 0xDD, 0xD9, 0xD1]),
        Eor => alu([0x49, 0x45, 0x4D, 0x5D, 0x59, 0x51]),
        Lda => alu([0xA9, 0xA5, 0xAD, 0xBD, 0xB9, 0xB1]),
        Ora => alu([0x09, 0x05, 0x0D, 0x1D, 0x19, 0x11]),
        Sbc => alu([0xE9, 0xE5, 0xED, 0xFD, 0xF9, 0xF1]),
        Sta => match mode {
            ZeroPage => Some(0x85),
            Absolute => Some(0x8D),
            AbsoluteX => Some(0x9D),
            AbsoluteY => Some(0x99),
            IndirectY => Some(0x91),
            _ => None,
        },
        Asl => shift([0x0A, 0x06, 0x0E, 0x1E]),
        Lsr => shift([0x4A, 0x46, 0x4E, 0x5E]),
        Rol => shift([0x2A, 0x26, 0x2E, 0x3E]),
        Ror => shift([0x6A, 0x66, 0x6E, 0x7E]),
        Inc => match mode {
            ZeroPage => Some(0xE6),
            Absolute => Some(0xEE),
            AbsoluteX => Some(0xFE),
            _ => None,
        },
        Dec => match mode {
            ZeroPage => Some(0xC6),
            Absolute => Some(0xCE),
            AbsoluteX => Some(0xDE),
            _ => None,
        },
        Bit => match mode {
            ZeroPage => Some(0x24),
            Absolute => Some(0x2C),
            _ => None,
        },
        Cpx => match mode {
            Immediate => Some(0xE0),
            ZeroPage => Some(0xE4),
            Absolute => Some(0xEC),
            _ => None,
        },
        Cpy => match mode {
            Immediate => Some(0xC0),
            ZeroPage => Some(0xC4),
            Absolute => Some(0xCC),
            _ => None,
        },
        Ldx => match mode {
            Immediate => Some(0xA2),
            ZeroPage => Some(0xA6),
            Absolute => Some(0xAE),
            AbsoluteY => Some(0xBE),
            _ => None,
        },
        Ldy => match mode {
            Immediate => Some(0xA0),
            ZeroPage => Some(0xA4),
            Absolute => Some(0xAC),
            AbsoluteX => Some(0xBC),
            _ => None,
        },
        Stx => match mode {
            ZeroPage => Some(0x86),
            Absolute => Some(0x8E),
            _ => None,
        },
        Sty => match mode {
            ZeroPage => Some(0x84),
            Absolute => Some(0x8C),
            _ => None,
        },
        Jmp => match mode {
            Absolute => Some(0x4C),
            Indirect => Some(0x6C),
            _ => None,
        },
        Jsr => match mode {
            Absolute => Some(0x20),
            _ => None,
        },
        Bcc => relative(0x90),
        Bcs => relative(0xB0),
        Beq => relative(0xF0),
        Bmi => relative(0x30),
        Bne => relative(0xD0),
        Bpl => relative(0x10),
        Bvc => relative(0x50),
        Bvs => relative(0x70),
        Brk => implied(0x00),
        Clc => implied(0x18),
        Cld => implied(0xD8),
        Cli => implied(0x58),
        Clv => implied(0xB8),
        Dex => implied(0xCA),
        Dey => implied(0x88),
        Inx => implied(0xE8),
        Iny => implied(0xC8),
        Nop => implied(0xEA),
        Pha => implied(0x48),
        Php => implied(0x08),
        Pla => implied(0x68),
        Plp => implied(0x28),
        Rti => implied(0x40),
        Rts => implied(0x60),
        Sec => implied(0x38),
        Sed => implied(0xF8),
        Sei => implied(0x78),
        Tax => implied(0xAA),
        Tay => implied(0xA8),
        Tsx => implied(0xBA),
        Txa => implied(0x8A),
        Txs => implied(0x9A),
        Tya => implied(0x98),
    }
}

/// Read-modify-write instructions operating on memory or A
pub fn is_read_modify_write(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Asl | Opcode::Lsr | Opcode::Rol | Opcode::Ror | Opcode::Inc | Opcode::Dec
    )
}

/// Instructions that read their memory operand
pub fn reads_memory_operand(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Adc
            | Opcode::And
            | Opcode::Bit
            | Opcode::Cmp
            | Opcode::Cpx
            | Opcode::Cpy
            | Opcode::Eor
            | Opcode::Lda
            | Opcode::Ldx
            | Opcode::Ldy
            | Opcode::Ora
            | Opcode::Sbc
    ) || is_read_modify_write(op)
}

/// Instructions that write their memory operand
pub fn writes_memory_operand(op: Opcode) -> bool {
    matches!(op, Opcode::Sta | Opcode::Stx | Opcode::Sty) || is_read_modify_write(op)
}

/// Base cycle count, without page-crossing or taken-branch penalties
pub fn cycles(op: Opcode, mode: AddrMode) -> u32 {
    use AddrMode::*;
    match op {
        Opcode::Jsr | Opcode::Rts | Opcode::Rti => 6,
        Opcode::Brk => 7,
        Opcode::Pha | Opcode::Php => 3,
        Opcode::Pla | Opcode::Plp => 4,
        Opcode::Jmp => match mode {
            Indirect => 5,
            _ => 3,
        },
        _ if is_read_modify_write(op) => match mode {
            Accumulator => 2,
            ZeroPage => 5,
            Absolute => 6,
            _ => 7,
        },
        Opcode::Sta => match mode {
            ZeroPage => 3,
            Absolute => 4,
            AbsoluteX | AbsoluteY => 5,
            IndirectY => 6,
            _ => 4,
        },
        _ => match mode {
            Implied | Accumulator | Immediate | Relative => 2,
            ZeroPage => 3,
            Absolute | AbsoluteX | AbsoluteY => 4,
            IndirectY => 5,
            Indirect => 5,
        },
    }
}

/// Register and flag effects of an instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub reads: [bool; 3],
    pub writes: [bool; 3],
    /// Reads N or Z
    pub reads_nz: bool,
    /// Writes N and Z
    pub writes_nz: bool,
    pub reads_carry: bool,
    pub writes_carry: bool,
    /// Changes the stack pointer
    pub moves_sp: bool,
}

impl Effects {
    pub fn reads(&self, reg: Reg) -> bool {
        self.reads[reg as usize]
    }

    pub fn writes(&self, reg: Reg) -> bool {
        self.writes[reg as usize]
    }
}

fn regs(list: &[Reg]) -> [bool; 3] {
    let mut set = [false; 3];
    for r in list {
        set[*r as usize] = true;
    }
    set
}

/// Effects of an instruction, including those of its indexed operand
///
/// `JSR` is treated as reading and writing every register: arguments may be
/// passed in A/X and nothing survives a call.
pub fn effects(inst: &AsmInst) -> Effects {
    let (op, operand) = match inst {
        AsmInst::Op(op, operand) => (*op, operand),
        _ => return Effects::default(),
    };
    use Reg::*;

    let mut e = Effects::default();
    match op {
        Opcode::Adc | Opcode::Sbc => {
            e.reads = regs(&[A]);
            e.writes = regs(&[A]);
            e.writes_nz = true;
            e.reads_carry = true;
            e.writes_carry = true;
        }
        Opcode::And | Opcode::Ora | Opcode::Eor => {
            e.reads = regs(&[A]);
            e.writes = regs(&[A]);
            e.writes_nz = true;
        }
        Opcode::Cmp => {
            e.reads = regs(&[A]);
            e.writes_nz = true;
            e.writes_carry = true;
        }
        Opcode::Cpx => {
            e.reads = regs(&[X]);
            e.writes_nz = true;
            e.writes_carry = true;
        }
        Opcode::Cpy => {
            e.reads = regs(&[Y]);
            e.writes_nz = true;
            e.writes_carry = true;
        }
        Opcode::Bit => {
            e.reads = regs(&[A]);
            e.writes_nz = true;
        }
        Opcode::Asl | Opcode::Lsr | Opcode::Rol | Opcode::Ror => {
            if matches!(operand, Operand::Accumulator) {
                e.reads = regs(&[A]);
                e.writes = regs(&[A]);
            }
            e.writes_nz = true;
            e.writes_carry = true;
            e.reads_carry = matches!(op, Opcode::Rol | Opcode::Ror);
        }
        Opcode::Inc | Opcode::Dec => e.writes_nz = true,
        Opcode::Inx | Opcode::Dex => {
            e.reads = regs(&[X]);
            e.writes = regs(&[X]);
            e.writes_nz = true;
        }
        Opcode::Iny | Opcode::Dey => {
            e.reads = regs(&[Y]);
            e.writes = regs(&[Y]);
            e.writes_nz = true;
        }
        Opcode::Lda => {
            e.writes = regs(&[A]);
            e.writes_nz = true;
        }
        Opcode::Ldx => {
            e.writes = regs(&[X]);
            e.writes_nz = true;
        }
        Opcode::Ldy => {
            e.writes = regs(&[Y]);
            e.writes_nz = true;
        }
        Opcode::Sta => e.reads = regs(&[A]),
        Opcode::Stx => e.reads = regs(&[X]),
        Opcode::Sty => e.reads = regs(&[Y]),
        Opcode::Tax => {
            e.reads = regs(&[A]);
            e.writes = regs(&[X]);
            e.writes_nz = true;
        }
        Opcode::Tay => {
            e.reads = regs(&[A]);
            e.writes = regs(&[Y]);
            e.writes_nz = true;
        }
        Opcode::Txa => {
            e.reads = regs(&[X]);
            e.writes = regs(&[A]);
            e.writes_nz = true;
        }
        Opcode::Tya => {
            e.reads = regs(&[Y]);
            e.writes = regs(&[A]);
            e.writes_nz = true;
        }
        Opcode::Tsx => {
            e.writes = regs(&[X]);
            e.writes_nz = true;
        }
        Opcode::Txs => {
            e.reads = regs(&[X]);
            e.moves_sp = true;
        }
        Opcode::Pha => {
            e.reads = regs(&[A]);
            e.moves_sp = true;
        }
        Opcode::Php => {
            e.reads_nz = true;
            e.reads_carry = true;
            e.moves_sp = true;
        }
        Opcode::Pla => {
            e.writes = regs(&[A]);
            e.writes_nz = true;
            e.moves_sp = true;
        }
        Opcode::Plp => {
            e.writes_nz = true;
            e.writes_carry = true;
            e.moves_sp = true;
        }
        Opcode::Beq | Opcode::Bne | Opcode::Bmi | Opcode::Bpl => e.reads_nz = true,
        Opcode::Bcc | Opcode::Bcs => e.reads_carry = true,
        Opcode::Clc | Opcode::Sec => e.writes_carry = true,
        Opcode::Jsr | Opcode::Brk => {
            e.reads = regs(&[A, X, Y]);
            e.writes = regs(&[A, X, Y]);
            e.writes_nz = true;
            e.writes_carry = true;
            e.moves_sp = true;
        }
        Opcode::Rts | Opcode::Rti => {
            e.reads = regs(&[A, X, Y]);
            e.reads_nz = true;
            e.reads_carry = true;
            e.moves_sp = true;
        }
        Opcode::Bvc | Opcode::Bvs | Opcode::Cld | Opcode::Cli | Opcode::Clv | Opcode::Jmp
        | Opcode::Nop | Opcode::Sed | Opcode::Sei => {}
    }

    // Index registers used by the operand. A frame byte only reads X once
    // it has been lowered to `abs,X`.
    match operand {
        Operand::AbsoluteX(_) => e.reads[X as usize] = true,
        Operand::AbsoluteY(_) | Operand::IndirectY(_) => e.reads[Y as usize] = true,
        _ => {}
    }
    e
}

/// Encoded size in bytes; labels and comments take none
pub fn size(inst: &AsmInst) -> u16 {
    match inst {
        AsmInst::Op(_, operand) => AddrMode::of(operand).length(),
        _ => 0,
    }
}

/// Base cycle estimate; labels and comments take none
pub fn cycle_estimate(inst: &AsmInst) -> u32 {
    match inst {
        AsmInst::Op(op, operand) => cycles(*op, AddrMode::of(operand)),
        _ => 0,
    }
}
