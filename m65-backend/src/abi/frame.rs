//! Stack frame entry and exit sequences
//!
//! A frame is `n` bytes reserved below the return address by moving SP.
//! Frame byte `o` is then `$0101 + SP + o`; the allocator addresses it with
//! `TSX` + `abs,X`.

use m65_codegen::{Address, AsmInst, Opcode, Operand, ReturnKind};

/// A generated entry or exit sequence and its net effect on the stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryShape {
    pub code: Vec<AsmInst>,
    /// Bytes pushed (positive) or released (negative)
    pub stack_effect: i32,
}

impl EntryShape {
    /// Shape holding only a function label
    pub fn label(name: &str) -> Self {
        Self {
            code: vec![AsmInst::label(name)],
            stack_effect: 0,
        }
    }

    pub fn push(&mut self, inst: AsmInst) {
        self.stack_effect += match inst.opcode() {
            Some(Opcode::Pha) | Some(Opcode::Php) => 1,
            Some(Opcode::Pla) | Some(Opcode::Plp) => -1,
            _ => 0,
        };
        self.code.push(inst);
    }

    pub fn append(&mut self, other: EntryShape) {
        self.code.extend(other.code);
        self.stack_effect += other.stack_effect;
    }
}

fn imm(op: Opcode, value: u8) -> AsmInst {
    AsmInst::op(op, Operand::imm(value))
}

/// `SP -= n`
pub(crate) fn allocate(n: u8) -> EntryShape {
    if n == 0 {
        return EntryShape::default();
    }
    EntryShape {
        code: vec![
            AsmInst::implied(Opcode::Tsx),
            AsmInst::implied(Opcode::Txa),
            AsmInst::implied(Opcode::Sec),
            imm(Opcode::Sbc, n),
            AsmInst::implied(Opcode::Tax),
            AsmInst::implied(Opcode::Txs),
        ],
        stack_effect: n as i32,
    }
}

/// `SP += n`, clobbering A and X
pub(crate) fn release(n: u8) -> EntryShape {
    if n == 0 {
        return EntryShape::default();
    }
    EntryShape {
        code: vec![
            AsmInst::implied(Opcode::Tsx),
            AsmInst::implied(Opcode::Txa),
            AsmInst::implied(Opcode::Clc),
            imm(Opcode::Adc, n),
            AsmInst::implied(Opcode::Tax),
            AsmInst::implied(Opcode::Txs),
        ],
        stack_effect: -(n as i32),
    }
}

/// Release the frame and return, keeping the result in A (and X)
pub(crate) fn release_and_return(n: u8, ret: ReturnKind) -> EntryShape {
    let rts = AsmInst::implied(Opcode::Rts);
    if n == 0 {
        return EntryShape {
            code: vec![rts],
            stack_effect: 0,
        };
    }
    let mut shape = EntryShape::default();
    match ret {
        ReturnKind::Void | ReturnKind::Struct { .. } => {
            shape.append(release(n));
        }
        ReturnKind::Byte => {
            shape.push(AsmInst::implied(Opcode::Tay));
            shape.append(release(n));
            shape.push(AsmInst::implied(Opcode::Tya));
        }
        ReturnKind::Word => {
            // Park the high byte in the top frame byte, release all but that
            // byte, then pull it back into X.
            shape.push(AsmInst::implied(Opcode::Tay));
            shape.push(AsmInst::implied(Opcode::Txa));
            shape.push(AsmInst::implied(Opcode::Tsx));
            shape.push(AsmInst::op(
                Opcode::Sta,
                Operand::AbsoluteX(Address::Abs(0x0100 + n as u16)),
            ));
            if n > 1 {
                shape.append(release(n - 1));
            }
            shape.push(AsmInst::implied(Opcode::Pla));
            shape.push(AsmInst::implied(Opcode::Tax));
            shape.push(AsmInst::implied(Opcode::Tya));
        }
    }
    shape.push(rts);
    shape
}
