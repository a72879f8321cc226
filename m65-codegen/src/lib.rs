//! M65 6502 Compiler - Native Instruction Model
//!
//! This crate holds everything about the target machine that does not depend
//! on the IR:
//!
//! - Assembly instruction and operand forms (`asm`)
//! - Encoding, size, cycle and effect tables (`isa`)
//! - ABI data: zero-page conventions, `jmp_buf` layout, clobber sets (`abi`)

pub mod abi;
pub mod asm;
pub mod isa;

pub use abi::{ClobberSet, JumpBuffer, ReturnKind, ZeroPageLayout};
pub use asm::{Address, AsmInst, ByteSel, Flag, Imm, Opcode, Operand, Reg, VReg};
pub use isa::{AddrMode, Effects};

/// Format a list of instructions as an assembly listing
pub fn format_listing(code: &[AsmInst]) -> String {
    let mut out = String::new();
    for inst in code {
        out.push_str(&inst.to_string());
        out.push('\n');
    }
    out
}
