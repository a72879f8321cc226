//! Portable position-independent bytecode (`M65B`)
//!
//! ```text
//! "M65B" version:u8
//! symbols: count:u16 { len:u8 bytes }
//! records until END:
//!   FUNCTION sym:u16 bank:u8     (bank $FF = common)
//!   LABEL    sym:u16
//!   OP       opcode:u8 mode:u8 payload
//!   DATA     sym:u16 bank:u8 len:u16 bytes
//!   EXTERN   sym:u16 address:u16
//! ```
//!
//! Addresses inside code are never absolute: every operand that names code
//! or data carries a symbol index, so the stream can be placed anywhere.
//! Multi-byte fields are little-endian.

use m65_codegen::{Address, AddrMode, AsmInst, ByteSel, Imm, Operand};
use m65_common::{BankId, CompilerError, Result};
use std::collections::BTreeMap;

use super::unit::CodeUnit;
use super::{Artifact, CompiledOutput};

pub const MAGIC: &[u8; 4] = b"M65B";
pub const VERSION: u8 = 1;

pub const END: u8 = 0x00;
pub const FUNCTION: u8 = 0x01;
pub const LABEL: u8 = 0x02;
pub const OP: u8 = 0x03;
pub const DATA: u8 = 0x04;
pub const EXTERN: u8 = 0x05;

const COMMON_BANK: u8 = 0xFF;

// Address payload tags
const ADDR_ABS: u8 = 0;
const ADDR_SYMBOL: u8 = 1;
const ADDR_BANKED: u8 = 2;

// Immediate payload tags
const IMM_BYTE: u8 = 0;
const IMM_LO: u8 = 1;
const IMM_HI: u8 = 2;

#[derive(Debug, Default)]
pub struct BytecodeEmitter {
    pub(super) unit: CodeUnit,
}

/// Interned symbol names in first-use order
#[derive(Default)]
struct Names {
    index: BTreeMap<String, u16>,
    order: Vec<String>,
}

impl Names {
    fn intern(&mut self, name: &str) -> Result<u16> {
        if let Some(i) = self.index.get(name) {
            return Ok(*i);
        }
        let i = u16::try_from(self.order.len())
            .map_err(|_| CompilerError::internal("more than 65535 symbols in one unit"))?;
        self.index.insert(name.to_string(), i);
        self.order.push(name.to_string());
        Ok(i)
    }
}

fn bank_byte(bank: BankId) -> u8 {
    match bank {
        BankId::Common => COMMON_BANK,
        BankId::Bank(n) => n,
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_i16(out: &mut Vec<u8>, value: i32) -> Result<()> {
    let value = i16::try_from(value)
        .map_err(|_| CompilerError::internal(format!("symbol addend {} out of range", value)))?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

impl BytecodeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn finalize(self) -> Result<CompiledOutput> {
        self.unit.close()?;
        let table = self.unit.flat_symbols()?;
        table.check_resolved()?;

        let mut names = Names::default();
        let mut records = Vec::new();
        for function in self.unit.functions() {
            records.push(FUNCTION);
            put_u16(&mut records, names.intern(&function.info.name)?);
            records.push(bank_byte(function.info.declared_bank));
            for inst in &function.code {
                encode(&mut records, &mut names, inst)?;
            }
        }
        for object in self.unit.data() {
            let len = u16::try_from(object.size())
                .map_err(|_| CompilerError::invalid_ir(&object.name, "data object larger than 64K"))?;
            records.push(DATA);
            put_u16(&mut records, names.intern(&object.name)?);
            records.push(bank_byte(object.bank));
            put_u16(&mut records, len);
            records.extend_from_slice(&object.bytes);
        }
        for (name, address) in self.unit.externals() {
            records.push(EXTERN);
            put_u16(&mut records, names.intern(name)?);
            put_u16(&mut records, *address);
        }
        records.push(END);

        let mut bytes = Vec::with_capacity(records.len() + 64);
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        put_u16(&mut bytes, names.order.len() as u16);
        for name in &names.order {
            let len = u8::try_from(name.len())
                .map_err(|_| CompilerError::invalid_ir(name, "symbol name longer than 255 bytes"))?;
            bytes.push(len);
            bytes.extend_from_slice(name.as_bytes());
        }
        bytes.extend_from_slice(&records);

        Ok(CompiledOutput {
            target: "bytecode".to_string(),
            artifact: Artifact::Bytecode(bytes),
            relocations: table.relocations(),
            statistics: self.unit.statistics(),
        })
    }
}

fn encode(out: &mut Vec<u8>, names: &mut Names, inst: &AsmInst) -> Result<()> {
    let (op, operand) = match inst {
        AsmInst::Label(name) => {
            out.push(LABEL);
            put_u16(out, names.intern(name)?);
            return Ok(());
        }
        AsmInst::Comment(_) => return Ok(()),
        AsmInst::Op(op, operand) => (*op, operand),
    };
    out.push(OP);
    out.push(op as u8);
    out.push(AddrMode::of(operand) as u8);
    match operand {
        Operand::Implied | Operand::Accumulator => {}
        Operand::Immediate(Imm::Byte(b)) => {
            out.push(IMM_BYTE);
            out.push(*b);
        }
        Operand::Immediate(Imm::Symbol { name, addend, part }) => {
            out.push(match part {
                ByteSel::Lo => IMM_LO,
                ByteSel::Hi => IMM_HI,
            });
            put_u16(out, names.intern(name)?);
            put_i16(out, *addend)?;
        }
        Operand::ZeroPage(zp) | Operand::IndirectY(zp) => out.push(*zp),
        Operand::Absolute(a) | Operand::AbsoluteX(a) | Operand::AbsoluteY(a) | Operand::Indirect(a) => {
            match a {
                Address::Abs(addr) => {
                    out.push(ADDR_ABS);
                    put_u16(out, *addr);
                }
                Address::Symbol { name, addend } => {
                    out.push(ADDR_SYMBOL);
                    put_u16(out, names.intern(name)?);
                    put_i16(out, *addend)?;
                }
                Address::Label(label) => {
                    out.push(ADDR_SYMBOL);
                    put_u16(out, names.intern(label)?);
                    put_i16(out, 0)?;
                }
                Address::BankRelative { bank, offset } => {
                    out.push(ADDR_BANKED);
                    out.push(*bank);
                    put_u16(out, *offset);
                }
            }
        }
        Operand::Relative(label) => put_u16(out, names.intern(label)?),
        Operand::Virtual(_) | Operand::Frame(_) => {
            return Err(CompilerError::internal(format!("unallocated operand in '{}'", inst)))
        }
    }
    Ok(())
}
