//! Data movement, arithmetic, shifts and bit-fields

use m65_codegen::{Opcode, Operand};
use m65_common::platform::BitField;
use m65_common::{CompilerError, Result, TempId};
use m65_ir::{IrBinaryOp, IrNode, IrType, MemRef, Value};

use super::operands::{const_byte, wrap};
use super::{Loc, Lowering, Seq};

impl Lowering<'_, '_> {
    /// Byte-wise copy through A
    pub(super) fn copy_bytes(&self, s: &mut Seq, src: &[Loc], dst: &[Loc]) -> Result<()> {
        for (from, to) in src.iter().zip(dst) {
            if from == to {
                continue;
            }
            s.load_a(from);
            s.store_a(to)?;
        }
        Ok(())
    }

    /// Bytes of a memory reference
    pub(super) fn mem_bytes(&self, mem: &MemRef, ty: IrType) -> Result<Vec<Loc>> {
        (0..ty.size_in_bytes())
            .map(|k| self.mem_loc(&mem.displaced(k)))
            .collect()
    }

    pub(super) fn lower_copy(&mut self, node: &IrNode, result: TempId, value: &Value, ty: IrType) -> Result<()> {
        self.check_scalar(ty, node)?;
        if *value == Value::Temp(result) {
            return Ok(());
        }
        let mut s = self.out.fork();
        let src = self.value_bytes(&mut s, value, ty)?;
        let dst = self.dst(result)?;
        self.copy_bytes(&mut s, &src, &dst)?;
        self.out.commit(s);
        Ok(())
    }

    pub(super) fn lower_store(&mut self, node: &IrNode, value: &Value, dest: &MemRef, ty: IrType) -> Result<()> {
        let mut s = self.out.fork();
        self.store_into(&mut s, node, value, dest, ty)?;
        self.out.commit(s);
        Ok(())
    }

    fn store_into(&self, s: &mut Seq, node: &IrNode, value: &Value, dest: &MemRef, ty: IrType) -> Result<()> {
        self.check_scalar(ty, node)?;
        let src = self.value_bytes(s, value, ty)?;
        let dst = self.mem_bytes(dest, ty)?;
        self.copy_bytes(s, &src, &dst)
    }

    /// Fold a binary operation on two constants
    pub(super) fn fold(&self, op: IrBinaryOp, l: i64, r: i64, ty: IrType) -> Result<i64> {
        let bits = ty.size_in_bytes() as i64 * 8;
        let count = r;
        if matches!(op, IrBinaryOp::Shl | IrBinaryOp::Shr) && count < 0 {
            return Err(self.invalid(format!("negative shift count {}", count)));
        }
        let (l, r) = (wrap(l, ty), wrap(r, ty));
        let exact = match op {
            IrBinaryOp::Add => l + r,
            IrBinaryOp::Sub => l - r,
            IrBinaryOp::Mul => l * r,
            IrBinaryOp::Div | IrBinaryOp::Mod if r == 0 => {
                return Err(self.invalid("division by zero in a constant expression"))
            }
            IrBinaryOp::Div => l / r,
            IrBinaryOp::Mod => l % r,
            IrBinaryOp::And => l & r,
            IrBinaryOp::Or => l | r,
            IrBinaryOp::Xor => l ^ r,
            IrBinaryOp::Shl if count >= bits => 0,
            IrBinaryOp::Shl => l << count,
            IrBinaryOp::Shr if count >= bits && !ty.is_signed() => 0,
            IrBinaryOp::Shr => l >> count.min(bits - 1),
        };
        Ok(self.wrap_folded(exact, ty))
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn lower_binary(
        &mut self,
        node: &IrNode,
        result: TempId,
        op: IrBinaryOp,
        lhs: &Value,
        rhs: &Value,
        ty: IrType,
        next: Option<&IrNode>,
    ) -> Result<usize> {
        self.check_scalar(ty, node)?;

        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            self.check_constant(l, ty)?;
            self.check_constant(r, ty)?;
            let folded = self.fold(op, l, r, ty)?;
            let dst = self.dst(result)?;
            let src: Vec<Loc> = (0..dst.len()).map(|k| Loc::imm(const_byte(folded, k))).collect();
            let mut s = self.out.fork();
            self.copy_bytes(&mut s, &src, &dst)?;
            self.out.commit(s);
            return Ok(1);
        }

        match op {
            IrBinaryOp::Mul | IrBinaryOp::Div | IrBinaryOp::Mod => Err(self.unsupported(node)),
            IrBinaryOp::Shl | IrBinaryOp::Shr => {
                self.lower_shift(node, result, op, lhs, rhs, ty)?;
                Ok(1)
            }
            _ => {
                let mut generic = self.out.fork();
                self.alu(&mut generic, op, lhs, rhs, ty, result)?;

                // `%r = add [m], 1; store %r -> [m]` with no other use of %r
                if let Some(store @ IrNode::Store { value: Value::Temp(stored), dest, ty: store_ty }) = next {
                    if let Some(step) = self.fused_step(result, op, lhs, rhs, ty, *stored, dest, *store_ty)? {
                        self.store_into(&mut generic, store, &Value::Temp(result), dest, ty)?;
                        self.commit_cheapest(vec![generic, step])?;
                        return Ok(2);
                    }
                }

                let mut candidates = vec![generic];
                if op.is_commutative() {
                    let mut swapped = self.out.fork();
                    self.alu(&mut swapped, op, rhs, lhs, ty, result)?;
                    candidates.push(swapped);
                }
                if let Some(step) = self.step_in_place(result, op, lhs, rhs, ty)? {
                    candidates.push(step);
                }
                self.commit_cheapest(candidates)?;
                Ok(1)
            }
        }
    }

    /// `dst = lhs op rhs` byte by byte, carry rippling upwards
    fn alu(&self, s: &mut Seq, op: IrBinaryOp, lhs: &Value, rhs: &Value, ty: IrType, result: TempId) -> Result<()> {
        let dst = self.dst(result)?;
        let mut lb = self.value_bytes(s, lhs, ty)?;
        let rb = self.operand_bytes(s, rhs, ty)?;

        // Writing the result must not move the pointer the left side is
        // still being read through
        let clobbers_pointer = lb.iter().any(|b| match b {
            Loc::Indirect { ptr, .. } => dst.iter().any(|d| ptr.iter().any(|p| *d == Loc::vreg(*p))),
            _ => false,
        });
        if clobbers_pointer {
            lb = lb.iter().map(|b| s.materialize(b)).collect::<Result<_>>()?;
        }

        let opcode = match op {
            IrBinaryOp::Add => {
                s.implied(Opcode::Clc);
                Opcode::Adc
            }
            IrBinaryOp::Sub => {
                s.implied(Opcode::Sec);
                Opcode::Sbc
            }
            IrBinaryOp::And => Opcode::And,
            IrBinaryOp::Or => Opcode::Ora,
            IrBinaryOp::Xor => Opcode::Eor,
            _ => return Err(self.invalid(format!("{:?} is not a byte-wise operation", op))),
        };
        for k in 0..dst.len() {
            s.load_a(&lb[k]);
            s.alu(opcode, &rb[k])?;
            s.store_a(&dst[k])?;
        }
        Ok(())
    }

    /// Increment/decrement directly in the operand's memory
    fn step(&mut self, s: &mut Seq, op: IrBinaryOp, bytes: &[Loc]) -> Result<()> {
        let operands: Vec<Operand> = bytes
            .iter()
            .map(|b| match b {
                Loc::Direct(operand) => Ok(operand.clone()),
                Loc::Indirect { .. } => Err(CompilerError::internal("step through a pointer")),
            })
            .collect::<Result<_>>()?;
        let up = op == IrBinaryOp::Add;
        match operands.as_slice() {
            [byte] => s.op(if up { Opcode::Inc } else { Opcode::Dec }, byte.clone()),
            [lo, hi] => {
                let skip = self.names.local_label();
                if up {
                    s.op(Opcode::Inc, lo.clone());
                    s.branch(Opcode::Bne, &skip);
                    s.op(Opcode::Inc, hi.clone());
                    s.label(&skip);
                } else {
                    s.op(Opcode::Lda, lo.clone());
                    s.branch(Opcode::Bne, &skip);
                    s.op(Opcode::Dec, hi.clone());
                    s.label(&skip);
                    s.op(Opcode::Dec, lo.clone());
                }
            }
            _ => return Err(CompilerError::internal("step of unexpected width")),
        }
        Ok(())
    }

    /// Step applies when the operation is `x ± 1` written back to `x`
    fn is_unit_step(op: IrBinaryOp, lhs: &Value, rhs: &Value, target: &Value) -> bool {
        match op {
            IrBinaryOp::Add => {
                (lhs == target && rhs.as_constant() == Some(1)) || (rhs == target && lhs.as_constant() == Some(1))
            }
            IrBinaryOp::Sub => lhs == target && rhs.as_constant() == Some(1),
            _ => false,
        }
    }

    fn step_in_place(
        &mut self,
        result: TempId,
        op: IrBinaryOp,
        lhs: &Value,
        rhs: &Value,
        ty: IrType,
    ) -> Result<Option<Seq>> {
        if !Self::is_unit_step(op, lhs, rhs, &Value::Temp(result)) {
            return Ok(None);
        }
        if self.temp(result)?.ty.size_in_bytes() != ty.size_in_bytes() {
            return Ok(None);
        }
        let mut s = self.out.fork();
        let dst = self.dst(result)?;
        self.step(&mut s, op, &dst)?;
        Ok(Some(s))
    }

    #[allow(clippy::too_many_arguments)]
    fn fused_step(
        &mut self,
        result: TempId,
        op: IrBinaryOp,
        lhs: &Value,
        rhs: &Value,
        ty: IrType,
        stored: TempId,
        dest: &MemRef,
        store_ty: IrType,
    ) -> Result<Option<Seq>> {
        let target = Value::Memory(dest.clone());
        if stored != result || store_ty != ty || self.uses(result) != 1 {
            return Ok(None);
        }
        if !Self::is_unit_step(op, lhs, rhs, &target) {
            return Ok(None);
        }
        let bytes = self.mem_bytes(dest, ty)?;
        if bytes.iter().any(Loc::is_indirect) {
            return Ok(None);
        }
        let mut s = self.out.fork();
        self.step(&mut s, op, &bytes)?;
        Ok(Some(s))
    }

    fn lower_shift(
        &mut self,
        node: &IrNode,
        result: TempId,
        op: IrBinaryOp,
        lhs: &Value,
        rhs: &Value,
        ty: IrType,
    ) -> Result<()> {
        let count = rhs.as_constant().ok_or_else(|| self.unsupported(node))?;
        if count < 0 {
            return Err(self.invalid(format!("negative shift count {}", count)));
        }
        let bits = ty.size_in_bytes() as i64 * 8;
        let arithmetic = op == IrBinaryOp::Shr && ty.is_signed();
        let count = if arithmetic { count.min(bits - 1) } else { count };
        let dst = self.dst(result)?;

        if count >= bits {
            let zeros: Vec<Loc> = dst.iter().map(|_| Loc::imm(0)).collect();
            let mut s = self.out.fork();
            self.copy_bytes(&mut s, &zeros, &dst)?;
            self.out.commit(s);
            return Ok(());
        }
        let k = count as usize;
        let left = op == IrBinaryOp::Shl;
        let mut candidates = Vec::new();

        if dst.len() == 1 {
            let mut s = self.out.fork();
            let src = self.value_bytes(&mut s, lhs, ty)?;
            s.load_a(&src[0]);
            for _ in 0..k {
                if arithmetic {
                    s.op(Opcode::Cmp, Operand::imm(0x80));
                    s.implied(Opcode::Ror);
                } else {
                    s.implied(if left { Opcode::Asl } else { Opcode::Lsr });
                }
            }
            s.store_a(&dst[0])?;
            candidates.push(s);

            if *lhs == Value::Temp(result) && !arithmetic {
                let mut s = self.out.fork();
                if let Loc::Direct(byte) = &dst[0] {
                    for _ in 0..k {
                        s.op(if left { Opcode::Asl } else { Opcode::Lsr }, byte.clone());
                    }
                }
                candidates.push(s);
            }
        } else {
            let mut s = self.out.fork();
            let src = self.value_bytes(&mut s, lhs, ty)?;
            if k >= 8 && !arithmetic {
                // Whole-byte move, then the remaining bits in A
                let (from, to, clear) = if left { (0, 1, 0) } else { (1, 0, 1) };
                s.load_a(&src[from]);
                for _ in 8..k {
                    s.implied(if left { Opcode::Asl } else { Opcode::Lsr });
                }
                s.store_a(&dst[to])?;
                s.load_a(&Loc::imm(0));
                s.store_a(&dst[clear])?;
            } else {
                self.copy_bytes(&mut s, &src, &dst)?;
                let (lo, hi) = match (&dst[0], &dst[1]) {
                    (Loc::Direct(lo), Loc::Direct(hi)) => (lo.clone(), hi.clone()),
                    _ => return Err(CompilerError::internal("shift destination is not direct")),
                };
                for _ in 0..k {
                    if left {
                        s.op(Opcode::Asl, lo.clone());
                        s.op(Opcode::Rol, hi.clone());
                    } else if arithmetic {
                        s.op(Opcode::Lda, hi.clone());
                        s.op(Opcode::Cmp, Operand::imm(0x80));
                        s.implied(Opcode::Ror);
                        s.op(Opcode::Sta, hi.clone());
                        s.op(Opcode::Ror, lo.clone());
                    } else {
                        s.op(Opcode::Lsr, hi.clone());
                        s.op(Opcode::Ror, lo.clone());
                    }
                }
            }
            candidates.push(s);
        }
        self.commit_cheapest(candidates)
    }

    pub(super) fn lower_load_field(&mut self, node: &IrNode, result: TempId, src: &MemRef, field: &BitField) -> Result<()> {
        self.check_field(node, field)?;
        let mut s = self.out.fork();
        let byte = self.mem_loc(&src.displaced(field.byte_offset))?;
        let dst = self.dst(result)?;
        s.load_a(&byte);
        for _ in 0..field.bit_offset {
            s.implied(Opcode::Lsr);
        }
        if field.bit_offset + field.width < 8 {
            s.op(Opcode::And, Operand::imm(field.mask()));
        }
        s.store_a(&dst[0])?;
        self.out.commit(s);
        Ok(())
    }

    pub(super) fn lower_store_field(&mut self, node: &IrNode, value: &Value, dest: &MemRef, field: &BitField) -> Result<()> {
        self.check_field(node, field)?;
        let mut s = self.out.fork();
        let byte = self.mem_loc(&dest.displaced(field.byte_offset))?;
        let keep = !field.mask_in_place();

        match value.as_constant() {
            Some(c) => {
                self.check_constant(c, IrType::U8)?;
                let bits = ((c as u8) & field.mask()) << field.bit_offset;
                s.load_a(&byte);
                s.op(Opcode::And, Operand::imm(keep));
                if bits != 0 {
                    s.op(Opcode::Ora, Operand::imm(bits));
                }
                s.store_a(&byte)?;
            }
            None => {
                let v = self.operand_bytes(&mut s, value, IrType::U8)?;
                let shifted = s.new_vreg();
                s.load_a(&v[0]);
                for _ in 0..field.bit_offset {
                    s.implied(Opcode::Asl);
                }
                s.op(Opcode::And, Operand::imm(field.mask_in_place()));
                s.store_a(&Loc::vreg(shifted))?;
                s.load_a(&byte);
                s.op(Opcode::And, Operand::imm(keep));
                s.op(Opcode::Ora, Operand::Virtual(shifted));
                s.store_a(&byte)?;
            }
        }
        self.out.commit(s);
        Ok(())
    }

    fn check_field(&self, node: &IrNode, field: &BitField) -> Result<()> {
        if field.width == 0 || field.bit_offset as u16 + field.width as u16 > 8 {
            return Err(self.invalid(format!("bit-field {:?} does not fit in one byte ({})", field, node)));
        }
        Ok(())
    }
}
