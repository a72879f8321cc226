//! Conditional branches

use m65_codegen::{Opcode, Operand};
use m65_common::{LabelId, Result};
use m65_ir::{IrCompareOp, IrNode, IrType, Value};

use super::operands::{type_bounds, wrap};
use super::{Lowering, Seq};

/// The comparison that holds exactly when `op` does not
fn negate(op: IrCompareOp) -> IrCompareOp {
    match op {
        IrCompareOp::Eq => IrCompareOp::Ne,
        IrCompareOp::Ne => IrCompareOp::Eq,
        IrCompareOp::Lt => IrCompareOp::Ge,
        IrCompareOp::Ge => IrCompareOp::Lt,
        IrCompareOp::Gt => IrCompareOp::Le,
        IrCompareOp::Le => IrCompareOp::Gt,
    }
}

fn holds(op: IrCompareOp, l: i64, r: i64) -> bool {
    match op {
        IrCompareOp::Eq => l == r,
        IrCompareOp::Ne => l != r,
        IrCompareOp::Lt => l < r,
        IrCompareOp::Le => l <= r,
        IrCompareOp::Gt => l > r,
        IrCompareOp::Ge => l >= r,
    }
}

impl Lowering<'_, '_> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn lower_branch(
        &mut self,
        node: &IrNode,
        op: IrCompareOp,
        lhs: &Value,
        rhs: &Value,
        ty: IrType,
        true_label: LabelId,
        false_label: LabelId,
        next: Option<&IrNode>,
    ) -> Result<()> {
        self.check_scalar(ty, node)?;

        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            self.check_constant(l, ty)?;
            self.check_constant(r, ty)?;
            let taken = if holds(op, wrap(l, ty), wrap(r, ty)) { true_label } else { false_label };
            if next != Some(&IrNode::Label(taken)) {
                let name = self.names.ir_label(taken);
                self.out.jmp(&name);
            }
            return Ok(());
        }

        let (op, target, otherwise) = if next == Some(&IrNode::Label(false_label)) {
            (op, true_label, None)
        } else if next == Some(&IrNode::Label(true_label)) {
            (negate(op), false_label, None)
        } else {
            (op, true_label, Some(false_label))
        };
        let target = self.names.ir_label(target);
        let otherwise = otherwise.map(|l| self.names.ir_label(l));

        let mut candidates = self.branch_candidates(op, lhs, rhs, ty, &target)?;
        if let Some(label) = otherwise {
            for c in candidates.iter_mut() {
                c.jmp(&label);
            }
        }
        self.commit_cheapest(candidates)
    }

    /// Every sequence that jumps to `label` when `lhs op rhs` and falls
    /// through otherwise
    fn branch_candidates(
        &mut self,
        op: IrCompareOp,
        lhs: &Value,
        rhs: &Value,
        ty: IrType,
        label: &str,
    ) -> Result<Vec<Seq>> {
        let (op, lhs, rhs) = if lhs.as_constant().is_some() {
            (op.swapped(), rhs, lhs)
        } else {
            (op, lhs, rhs)
        };

        let mut out = Vec::new();
        if let Some(c) = rhs.as_constant() {
            self.check_constant(c, ty)?;
            let c = wrap(c, ty);
            let (min, max) = type_bounds(ty);
            let never = matches!((op, c), (IrCompareOp::Gt, c) if c == max)
                || matches!((op, c), (IrCompareOp::Lt, c) if c == min);
            let always = matches!((op, c), (IrCompareOp::Le, c) if c == max)
                || matches!((op, c), (IrCompareOp::Ge, c) if c == min);
            if never {
                return Ok(vec![self.out.fork()]);
            }
            if always {
                let mut s = self.out.fork();
                s.jmp(label);
                return Ok(vec![s]);
            }
            if c == 0 {
                return self.zero_candidates(op, lhs, ty, label);
            }
            let next = Value::Constant(c + 1);
            match op {
                IrCompareOp::Gt => out.push(self.ordering(IrCompareOp::Ge, lhs, &next, ty, label)?),
                IrCompareOp::Le => out.push(self.ordering(IrCompareOp::Lt, lhs, &next, ty, label)?),
                _ => {}
            }
        }

        match op {
            IrCompareOp::Eq | IrCompareOp::Ne => {
                out.push(self.equality(op, lhs, rhs, ty, label)?);
                if rhs.as_constant().is_none() {
                    out.push(self.equality(op, rhs, lhs, ty, label)?);
                }
            }
            IrCompareOp::Lt | IrCompareOp::Ge => out.push(self.ordering(op, lhs, rhs, ty, label)?),
            IrCompareOp::Gt => out.push(self.ordering(IrCompareOp::Lt, rhs, lhs, ty, label)?),
            IrCompareOp::Le => out.push(self.ordering(IrCompareOp::Ge, rhs, lhs, ty, label)?),
        }
        Ok(out)
    }

    fn equality(&mut self, op: IrCompareOp, lhs: &Value, rhs: &Value, ty: IrType, label: &str) -> Result<Seq> {
        let mut s = self.out.fork();
        let lb = self.value_bytes(&mut s, lhs, ty)?;
        let rb = self.operand_bytes(&mut s, rhs, ty)?;
        let eq = op == IrCompareOp::Eq;

        if lb.len() == 1 {
            s.load_a(&lb[0]);
            s.alu(Opcode::Cmp, &rb[0])?;
            s.branch(if eq { Opcode::Beq } else { Opcode::Bne }, label);
        } else if eq {
            let skip = self.names.local_label();
            s.load_a(&lb[0]);
            s.alu(Opcode::Cmp, &rb[0])?;
            s.branch(Opcode::Bne, &skip);
            s.load_a(&lb[1]);
            s.alu(Opcode::Cmp, &rb[1])?;
            s.branch(Opcode::Beq, label);
            s.label(&skip);
        } else {
            s.load_a(&lb[0]);
            s.alu(Opcode::Cmp, &rb[0])?;
            s.branch(Opcode::Bne, label);
            s.load_a(&lb[1]);
            s.alu(Opcode::Cmp, &rb[1])?;
            s.branch(Opcode::Bne, label);
        }
        Ok(s)
    }

    /// `Lt` or `Ge` by subtraction; signed results are corrected for overflow
    fn ordering(&mut self, op: IrCompareOp, lhs: &Value, rhs: &Value, ty: IrType, label: &str) -> Result<Seq> {
        let mut s = self.out.fork();
        let lb = self.value_bytes(&mut s, lhs, ty)?;
        let rb = self.operand_bytes(&mut s, rhs, ty)?;
        let less = op == IrCompareOp::Lt;

        if ty.is_signed() {
            s.load_a(&lb[0]);
            if lb.len() == 1 {
                s.implied(Opcode::Sec);
                s.alu(Opcode::Sbc, &rb[0])?;
            } else {
                s.alu(Opcode::Cmp, &rb[0])?;
                s.load_a(&lb[1]);
                s.alu(Opcode::Sbc, &rb[1])?;
            }
            let ok = self.names.local_label();
            s.branch(Opcode::Bvc, &ok);
            s.op(Opcode::Eor, Operand::imm(0x80));
            s.label(&ok);
            s.branch(if less { Opcode::Bmi } else { Opcode::Bpl }, label);
        } else {
            s.load_a(&lb[0]);
            s.alu(Opcode::Cmp, &rb[0])?;
            if lb.len() == 2 {
                s.load_a(&lb[1]);
                s.alu(Opcode::Sbc, &rb[1])?;
            }
            s.branch(if less { Opcode::Bcc } else { Opcode::Bcs }, label);
        }
        Ok(s)
    }

    /// Comparisons against zero read the flags directly
    fn zero_candidates(&mut self, op: IrCompareOp, lhs: &Value, ty: IrType, label: &str) -> Result<Vec<Seq>> {
        if !ty.is_signed() {
            // Lt/Ge against zero were settled as never/always
            let op = match op {
                IrCompareOp::Gt => IrCompareOp::Ne,
                IrCompareOp::Le => IrCompareOp::Eq,
                other => other,
            };
            return self.zero_test(op == IrCompareOp::Eq, lhs, ty, label);
        }

        match op {
            IrCompareOp::Eq | IrCompareOp::Ne => self.zero_test(op == IrCompareOp::Eq, lhs, ty, label),
            IrCompareOp::Lt | IrCompareOp::Ge => {
                let mut s = self.out.fork();
                let bytes = self.value_bytes(&mut s, lhs, ty)?;
                s.test_nz(&bytes[bytes.len() - 1]);
                s.branch(if op == IrCompareOp::Lt { Opcode::Bmi } else { Opcode::Bpl }, label);
                Ok(vec![s])
            }
            IrCompareOp::Gt | IrCompareOp::Le => {
                let mut s = self.out.fork();
                let bytes = self.value_bytes(&mut s, lhs, ty)?;
                let top = &bytes[bytes.len() - 1];
                s.test_nz(top);
                let greater = op == IrCompareOp::Gt;
                let skip = self.names.local_label();
                if greater {
                    s.branch(Opcode::Bmi, &skip);
                } else {
                    s.branch(Opcode::Bmi, label);
                }
                if bytes.len() == 2 {
                    s.load_a(&bytes[0]);
                    s.alu(Opcode::Ora, &bytes[1])?;
                }
                s.branch(if greater { Opcode::Bne } else { Opcode::Beq }, label);
                if greater {
                    s.label(&skip);
                }
                Ok(vec![s])
            }
        }
    }

    /// Branch on the value being zero (`eq`) or not
    fn zero_test(&mut self, eq: bool, lhs: &Value, ty: IrType, label: &str) -> Result<Vec<Seq>> {
        let branch = if eq { Opcode::Beq } else { Opcode::Bne };
        let mut s = self.out.fork();
        let bytes = self.value_bytes(&mut s, lhs, ty)?;
        if bytes.len() == 1 {
            s.test_nz(&bytes[0]);
            s.branch(branch, label);
            return Ok(vec![s]);
        }
        let mut candidates = Vec::new();
        for (first, second) in [(0, 1), (1, 0)] {
            let mut c = s.fork();
            c.load_a(&bytes[first]);
            c.alu(Opcode::Ora, &bytes[second])?;
            c.branch(branch, label);
            let mut whole = s.clone();
            whole.commit(c);
            candidates.push(whole);
        }
        Ok(candidates)
    }
}
