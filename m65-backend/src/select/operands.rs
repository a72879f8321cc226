//! Byte-level access to IR values

use log::warn;
use m65_codegen::{Address, ByteSel, Opcode, Operand};
use m65_common::{BankId, CompilerError, Result};
use m65_ir::{IrNode, IrType, MemRef, Value};

use super::{Loc, Lowering, Seq};

/// Two's complement range of a type, independent of the configured limits
pub(super) fn type_bounds(ty: IrType) -> (i64, i64) {
    let bits = ty.size_in_bytes() as u32 * 8;
    if ty.is_signed() {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    }
}

/// Reduce a value to the representable range of its type
pub(super) fn wrap(value: i64, ty: IrType) -> i64 {
    let bits = ty.size_in_bytes() as u32 * 8;
    let mask = (1i64 << bits) - 1;
    let v = value & mask;
    if ty.is_signed() && v >= 1i64 << (bits - 1) {
        v - (1i64 << bits)
    } else {
        v
    }
}

/// Byte `k` of a constant, little-endian
pub(super) fn const_byte(value: i64, k: usize) -> u8 {
    ((value >> (8 * k)) & 0xFF) as u8
}

impl Lowering<'_, '_> {
    pub(super) fn check_scalar(&self, ty: IrType, node: &IrNode) -> Result<()> {
        if ty.is_supported_scalar() {
            Ok(())
        } else {
            Err(self.unsupported(node))
        }
    }

    /// Reject a literal outside its type's configured range
    pub(super) fn check_constant(&self, value: i64, ty: IrType) -> Result<()> {
        let limits = self.selector.limits;
        if limits.fits(value, ty.size_in_bytes() as u32, ty.is_signed()) {
            Ok(())
        } else {
            Err(CompilerError::ConstantOutOfRange {
                function: self.name().to_string(),
                value,
                ty: ty.to_string(),
            })
        }
    }

    /// Warn when a folded signed result does not fit and wrap it
    pub(super) fn wrap_folded(&self, exact: i64, ty: IrType) -> i64 {
        let (lo, hi) = type_bounds(ty);
        if ty.is_signed() && (exact < lo || exact > hi) {
            warn!(
                "{}: signed overflow folding to {} ({}), result wraps",
                self.name(),
                exact,
                ty
            );
        }
        wrap(exact, ty)
    }

    /// Location of one byte of memory
    pub(super) fn mem_loc(&self, mem: &MemRef) -> Result<Loc> {
        Ok(match mem {
            MemRef::Absolute(addr) if *addr < 0x100 => Loc::Direct(Operand::ZeroPage(*addr as u8)),
            MemRef::Absolute(addr) => Loc::Direct(Operand::abs(*addr)),
            MemRef::Global { name, offset } => Loc::Direct(Operand::Absolute(Address::Symbol {
                name: name.clone(),
                addend: *offset as i32,
            })),
            MemRef::Local { offset } => Loc::Direct(Operand::Frame(*offset)),
            MemRef::Indirect { base, offset } => {
                let info = self.temp(*base)?;
                if info.vregs.len() != 2 {
                    return Err(self.invalid(format!("%{} used as a pointer but is {}", base, info.ty)));
                }
                Loc::Indirect {
                    ptr: [info.vregs[0], info.vregs[1]],
                    offset: *offset,
                }
            }
            MemRef::Banked { bank: BankId::Bank(n), offset } => Loc::Direct(Operand::Absolute(
                Address::BankRelative { bank: *n, offset: *offset },
            )),
            MemRef::Banked { bank: BankId::Common, .. } => {
                return Err(self.invalid("banked reference into the common area"))
            }
            MemRef::Iocb { channel, field } => {
                let addr = field
                    .address(*channel)
                    .ok_or_else(|| self.invalid(format!("no IOCB field {} on channel {}", field, channel)))?;
                Loc::Direct(Operand::abs(addr))
            }
            MemRef::ReturnSlot { offset } => {
                let ptr = self
                    .hidden
                    .sret
                    .ok_or_else(|| CompilerError::internal("return slot pointer was not copied in"))?;
                Loc::Indirect { ptr, offset: *offset }
            }
        })
    }

    /// The bytes of a value viewed as `ty`
    ///
    /// Temporaries narrower than `ty` are widened here, before any carry
    /// chain starts: zero for unsigned sources, a sign byte for signed ones.
    pub(super) fn value_bytes(&self, s: &mut Seq, value: &Value, ty: IrType) -> Result<Vec<Loc>> {
        let size = ty.size_in_bytes() as usize;
        match value {
            Value::Constant(c) => {
                self.check_constant(*c, ty)?;
                Ok((0..size).map(|k| Loc::imm(const_byte(*c, k))).collect())
            }
            Value::Temp(t) => {
                let info = self.temp(*t)?.clone();
                let mut bytes: Vec<Loc> = info.vregs.iter().take(size).map(|v| Loc::vreg(*v)).collect();
                if bytes.len() < size {
                    let fill = if info.ty.is_signed() {
                        let top = Loc::vreg(info.vregs[info.vregs.len() - 1]);
                        sign_byte(s, &top)?
                    } else {
                        Loc::imm(0)
                    };
                    bytes.resize(size, fill);
                }
                Ok(bytes)
            }
            Value::Memory(m) => (0..size).map(|k| self.mem_loc(&m.displaced(k as u16))).collect(),
        }
    }

    /// Value bytes with pointer-relative ones copied out, so each can be
    /// used as an ALU operand
    pub(super) fn operand_bytes(&self, s: &mut Seq, value: &Value, ty: IrType) -> Result<Vec<Loc>> {
        let bytes = self.value_bytes(s, value, ty)?;
        bytes.iter().map(|b| s.materialize(b)).collect()
    }

    /// Bytes of the address of a memory reference
    pub(super) fn address_bytes(&self, s: &mut Seq, mem: &MemRef, node: &IrNode) -> Result<[Loc; 2]> {
        let pointer_plus = |s: &mut Seq, ptr: [m65_codegen::VReg; 2], offset: u8| -> Result<[Loc; 2]> {
            if offset == 0 {
                return Ok([Loc::vreg(ptr[0]), Loc::vreg(ptr[1])]);
            }
            let out = [s.new_vreg(), s.new_vreg()];
            s.load_a(&Loc::vreg(ptr[0]));
            s.implied(Opcode::Clc);
            s.op(Opcode::Adc, Operand::imm(offset));
            s.store_a(&Loc::vreg(out[0]))?;
            s.load_a(&Loc::vreg(ptr[1]));
            s.op(Opcode::Adc, Operand::imm(0));
            s.store_a(&Loc::vreg(out[1]))?;
            Ok([Loc::vreg(out[0]), Loc::vreg(out[1])])
        };
        match mem {
            MemRef::Absolute(addr) => Ok([Loc::imm(*addr as u8), Loc::imm((*addr >> 8) as u8)]),
            MemRef::Iocb { .. } => match self.mem_loc(mem)? {
                Loc::Direct(Operand::Absolute(Address::Abs(addr))) => {
                    Ok([Loc::imm(addr as u8), Loc::imm((addr >> 8) as u8)])
                }
                _ => Err(CompilerError::internal("IOCB field did not resolve to an address")),
            },
            MemRef::Global { name, offset } => Ok([
                Loc::Direct(Operand::symbol_byte(name, *offset as i32, ByteSel::Lo)),
                Loc::Direct(Operand::symbol_byte(name, *offset as i32, ByteSel::Hi)),
            ]),
            MemRef::Indirect { base, offset } => {
                let info = self.temp(*base)?;
                if info.vregs.len() != 2 {
                    return Err(self.invalid(format!("%{} used as a pointer but is {}", base, info.ty)));
                }
                let ptr = [info.vregs[0], info.vregs[1]];
                pointer_plus(s, ptr, *offset)
            }
            MemRef::ReturnSlot { offset } => {
                let ptr = self
                    .hidden
                    .sret
                    .ok_or_else(|| CompilerError::internal("return slot pointer was not copied in"))?;
                pointer_plus(s, ptr, *offset)
            }
            MemRef::Local { .. } | MemRef::Banked { .. } => Err(self.unsupported(node)),
        }
    }
}

/// $FF if the byte is negative, else $00
fn sign_byte(s: &mut Seq, top: &Loc) -> Result<Loc> {
    let v = s.new_vreg();
    s.load_a(top);
    s.implied(Opcode::Asl);
    s.op(Opcode::Lda, Operand::imm(0));
    s.op(Opcode::Adc, Operand::imm(0xFF));
    s.op(Opcode::Eor, Operand::imm(0xFF));
    s.store_a(&Loc::vreg(v))?;
    Ok(Loc::vreg(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_bounds() {
        assert_eq!(type_bounds(IrType::I8), (-128, 127));
        assert_eq!(type_bounds(IrType::U16), (0, 65535));
        assert_eq!(wrap(200, IrType::I8), -56);
        assert_eq!(wrap(-1, IrType::U8), 255);
        assert_eq!(wrap(70000, IrType::U16), 4464);
    }

    #[test]
    fn test_const_bytes_little_endian() {
        assert_eq!(const_byte(0x1234, 0), 0x34);
        assert_eq!(const_byte(0x1234, 1), 0x12);
        assert_eq!(const_byte(-2, 1), 0xFF);
    }
}
