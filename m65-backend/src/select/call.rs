//! Calls, returns, non-local jumps and variadic access

use m65_codegen::{ByteSel, Opcode, Operand, ReturnKind};
use m65_common::{CompilerError, Result, TempId};
use m65_ir::{DeclaredClobbers, IrNode, IrType, MemRef, TypedValue, Value};

use super::{CallTarget, Loc, Lowering, Seq};
use crate::abi::{clobbers_of, CallKind, FunctionAbi};
use crate::runtime::Routine;

impl Lowering<'_, '_> {
    fn arg_loc(&self, slot: u8) -> Loc {
        Loc::Direct(Operand::ZeroPage(self.selector.engine.layout().arg(slot)))
    }

    /// Store a 16-bit value returned in A (low) and X (high)
    ///
    /// X is moved out before anything is stored: a store to a frame byte
    /// goes through X.
    fn store_ax(&self, s: &mut Seq, dst: &[Loc]) -> Result<()> {
        s.implied(Opcode::Tay);
        s.implied(Opcode::Txa);
        s.store_a(&dst[1])?;
        s.implied(Opcode::Tya);
        s.store_a(&dst[0])
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn lower_call(
        &mut self,
        node: &IrNode,
        result: Option<TempId>,
        callee: &str,
        args: &[TypedValue],
        ty: IrType,
        sret: Option<&MemRef>,
    ) -> Result<()> {
        let implied: FunctionAbi;
        let callee_abi = match self.selector.abis.get(callee) {
            Some(abi) => abi,
            None => {
                implied = self.selector.engine.bind_implied(callee, args, ty)?;
                &implied
            }
        };
        let site = self.selector.engine.call_site(self.abi, callee_abi)?;

        let fixed = callee_abi.params().len();
        if args.len() < fixed || (!callee_abi.is_variadic() && args.len() != fixed) {
            return Err(self.invalid(format!(
                "call to '{}' passes {} arguments, expected {}{}",
                callee,
                args.len(),
                fixed,
                if callee_abi.is_variadic() { " or more" } else { "" }
            )));
        }
        for (arg, param) in args.iter().zip(callee_abi.params()) {
            if arg.ty.size_in_bytes() != param.size as u16 {
                return Err(self.invalid(format!(
                    "argument of type {} passed to '{}' for a {} parameter",
                    arg.ty, callee, param.ty
                )));
            }
        }
        match (callee_abi.sret_slot(), sret) {
            (Some(_), None) => {
                return Err(self.invalid(format!("call to '{}' needs a buffer for its structure result", callee)))
            }
            (None, Some(_)) => {
                return Err(self.invalid(format!("call to '{}' passes a result buffer it does not use", callee)))
            }
            _ => {}
        }

        let mut s = self.out.fork();

        // Variadic block on the stack page, first argument lowest
        let mut block: u16 = 0;
        if callee_abi.is_variadic() {
            for extra in args[fixed..].iter().rev() {
                self.check_scalar(extra.ty, node)?;
                let bytes = self.value_bytes(&mut s, &extra.value, extra.ty)?;
                for byte in bytes.iter().rev() {
                    s.load_a(byte);
                    s.implied(Opcode::Pha);
                }
                block += extra.ty.size_in_bytes();
            }
            if block > 0xFF {
                return Err(self.invalid(format!("{} bytes of variadic arguments to '{}'", block, callee)));
            }
            let (count, ptr) = match (callee_abi.va_count_slot(), callee_abi.va_ptr_slot()) {
                (Some(c), Some(p)) => (c, p),
                _ => return Err(CompilerError::internal("variadic callee without variadic slots")),
            };
            let layout = self.selector.engine.layout();
            s.implied(Opcode::Tsx);
            s.implied(Opcode::Inx);
            s.op(Opcode::Stx, Operand::ZeroPage(layout.arg(ptr)));
            s.load_a(&Loc::imm(0x01));
            s.store_a(&self.arg_loc(ptr + 1))?;
            s.load_a(&Loc::imm(block as u8));
            s.store_a(&self.arg_loc(count))?;
        }

        if let (Some(slot), Some(dest)) = (callee_abi.sret_slot(), sret) {
            let [lo, hi] = self.address_bytes(&mut s, dest, node)?;
            s.load_a(&lo);
            s.store_a(&self.arg_loc(slot))?;
            s.load_a(&hi);
            s.store_a(&self.arg_loc(slot + 1))?;
        }

        for (arg, param) in args.iter().zip(callee_abi.params()) {
            let bytes = self.value_bytes(&mut s, &arg.value, param.ty)?;
            for (k, byte) in bytes.iter().enumerate() {
                s.load_a(byte);
                s.store_a(&self.arg_loc(param.slot + k as u8))?;
            }
        }

        match site.kind {
            CallKind::Direct => s.call(callee, CallTarget::Function(callee.to_string())),
            CallKind::Trampoline { bank } => {
                s.op(Opcode::Lda, Operand::symbol_byte(callee, -1, ByteSel::Lo));
                s.op(Opcode::Ldx, Operand::symbol_byte(callee, -1, ByteSel::Hi));
                let routine = Routine::Trampoline(bank);
                s.runtime.insert(routine);
                s.call(
                    &routine.name(),
                    CallTarget::Trampoline {
                        bank,
                        callee: callee.to_string(),
                    },
                );
            }
        }

        if let Some(r) = result {
            let dst = self.dst(r)?;
            match (callee_abi.return_kind(), dst.len()) {
                (ReturnKind::Byte, 1) => s.store_a(&dst[0])?,
                (ReturnKind::Word, 2) => self.store_ax(&mut s, &dst)?,
                (kind, _) => {
                    return Err(self.invalid(format!(
                        "result %{} of {} bytes taken from '{}', which returns {}",
                        r,
                        dst.len(),
                        callee,
                        kind
                    )))
                }
            }
        }

        for _ in 0..block {
            s.implied(Opcode::Pla);
        }
        self.out.commit(s);
        Ok(())
    }

    /// `JSR` to a ROM routine with register arguments
    pub(super) fn lower_asm_call(
        &mut self,
        address: u16,
        regs: [Option<&Value>; 3],
        clobbers: &DeclaredClobbers,
        result: Option<TempId>,
    ) -> Result<()> {
        let mut s = self.out.fork();

        // Everything is in plain memory before any register is loaded
        let mut bytes: [Option<Loc>; 3] = [None, None, None];
        for (slot, value) in bytes.iter_mut().zip(regs) {
            if let Some(value) = value {
                let loc = self.value_bytes(&mut s, value, IrType::U8)?;
                *slot = Some(s.materialize(&loc[0])?);
            }
        }
        let [a, x, y] = bytes;

        if let Some(y) = &y {
            match y.as_imm() {
                Some(c) => s.op(Opcode::Ldy, Operand::imm(c)),
                None => {
                    s.load_a(y);
                    s.implied(Opcode::Tay);
                }
            }
        }
        match (&a, &x) {
            (a, Some(x)) if x.as_imm().is_some() => {
                if let Some(a) = a {
                    s.load_a(a);
                }
                s.op(Opcode::Ldx, Operand::imm(x.as_imm().unwrap_or(0)));
            }
            (Some(a), Some(x)) => {
                s.load_a(a);
                s.implied(Opcode::Pha);
                s.load_a(x);
                s.implied(Opcode::Tax);
                s.implied(Opcode::Pla);
            }
            (None, Some(x)) => {
                s.load_a(x);
                s.implied(Opcode::Tax);
            }
            (Some(a), None) => s.load_a(a),
            (None, None) => {}
        }

        s.call_address(
            address,
            CallTarget::Fixed {
                address,
                clobbers: clobbers_of(clobbers),
            },
        );
        if let Some(r) = result {
            let dst = self.dst(r)?;
            s.store_a(&dst[0])?;
        }
        self.out.commit(s);
        Ok(())
    }

    pub(super) fn lower_return(&mut self, value: Option<&Value>, is_last: bool) -> Result<()> {
        let mut candidates = Vec::new();
        let ty = self.abi.return_type();
        match (self.abi.return_kind(), value) {
            (ReturnKind::Void, None) | (ReturnKind::Struct { .. }, None) => candidates.push(self.out.fork()),
            (ReturnKind::Void, Some(_)) => return Err(self.invalid("value returned from a void function")),
            (ReturnKind::Struct { .. }, Some(_)) => {
                return Err(self.invalid("a structure result is written through the return slot, not returned"))
            }
            (ReturnKind::Byte | ReturnKind::Word, None) => {
                return Err(self.invalid(format!("missing return value of type {}", ty)))
            }
            (ReturnKind::Byte, Some(v)) => {
                let mut s = self.out.fork();
                let bytes = self.value_bytes(&mut s, v, ty)?;
                s.load_a(&bytes[0]);
                candidates.push(s);
            }
            (ReturnKind::Word, Some(v)) => {
                let mut s = self.out.fork();
                let bytes = self.value_bytes(&mut s, v, ty)?;
                let (lo, hi) = (&bytes[0], &bytes[1]);

                if let Some(h) = hi.as_imm() {
                    let mut c = s.clone();
                    c.load_a(lo);
                    c.op(Opcode::Ldx, Operand::imm(h));
                    candidates.push(c);
                }
                if let Some(l) = lo.as_imm() {
                    let mut c = s.clone();
                    c.load_a(hi);
                    c.implied(Opcode::Tax);
                    c.op(Opcode::Lda, Operand::imm(l));
                    candidates.push(c);
                }
                s.load_a(lo);
                s.implied(Opcode::Pha);
                s.load_a(hi);
                s.implied(Opcode::Tax);
                s.implied(Opcode::Pla);
                candidates.push(s);
            }
        }

        if !is_last {
            let exit = self.names.exit_label();
            for c in candidates.iter_mut() {
                c.jmp(&exit);
            }
        }
        self.commit_cheapest(candidates)
    }

    pub(super) fn lower_setjmp(&mut self, node: &IrNode, result: TempId, buffer: &MemRef) -> Result<()> {
        let mut s = self.out.fork();
        let [lo, hi] = self.address_bytes(&mut s, buffer, node)?;
        s.load_a(&lo);
        s.store_a(&self.arg_loc(0))?;
        s.load_a(&hi);
        s.store_a(&self.arg_loc(1))?;
        s.runtime.insert(Routine::SetJmp);
        s.call(&Routine::SetJmp.name(), CallTarget::Runtime(Routine::SetJmp));
        let dst = self.dst(result)?;
        self.store_ax(&mut s, &dst)?;
        self.out.commit(s);
        Ok(())
    }

    /// Never returns; the value's low byte is handed to the resumed `setjmp`
    pub(super) fn lower_longjmp(&mut self, node: &IrNode, buffer: &MemRef, value: &Value) -> Result<()> {
        let mut s = self.out.fork();
        let [lo, hi] = self.address_bytes(&mut s, buffer, node)?;
        let v = self.value_bytes(&mut s, value, IrType::U8)?;
        let v = s.materialize(&v[0])?;
        s.load_a(&lo);
        s.store_a(&self.arg_loc(0))?;
        s.load_a(&hi);
        s.store_a(&self.arg_loc(1))?;
        s.load_a(&v);
        s.store_a(&self.arg_loc(2))?;
        s.runtime.insert(Routine::LongJmp);
        s.op(Opcode::Jmp, Operand::symbol(&Routine::LongJmp.name()));
        self.out.commit(s);
        Ok(())
    }

    pub(super) fn lower_va_start(&mut self, cursor: TempId) -> Result<()> {
        let ptr = self
            .hidden
            .va_ptr
            .ok_or_else(|| self.invalid("va_start in a function that is not variadic"))?;
        let src = [Loc::vreg(ptr[0]), Loc::vreg(ptr[1])];
        let dst = self.dst(cursor)?;
        let mut s = self.out.fork();
        self.copy_bytes(&mut s, &src, &dst)?;
        self.out.commit(s);
        Ok(())
    }

    pub(super) fn lower_va_arg(&mut self, node: &IrNode, result: TempId, cursor: TempId, ty: IrType) -> Result<()> {
        self.check_scalar(ty, node)?;
        let info = self.temp(cursor)?;
        if info.vregs.len() != 2 {
            return Err(self.invalid(format!("va_arg cursor %{} is {}, not a pointer", cursor, info.ty)));
        }
        let ptr = [info.vregs[0], info.vregs[1]];
        let dst = self.dst(result)?;
        let size = ty.size_in_bytes();

        let mut s = self.out.fork();
        for (k, d) in dst.iter().enumerate() {
            s.load_a(&Loc::Indirect { ptr, offset: k as u8 });
            s.store_a(d)?;
        }
        s.load_a(&Loc::vreg(ptr[0]));
        s.implied(Opcode::Clc);
        s.op(Opcode::Adc, Operand::imm(size as u8));
        s.store_a(&Loc::vreg(ptr[0]))?;
        s.load_a(&Loc::vreg(ptr[1]));
        s.op(Opcode::Adc, Operand::imm(0));
        s.store_a(&Loc::vreg(ptr[1]))?;
        self.out.commit(s);
        Ok(())
    }

    pub(super) fn lower_va_count(&mut self, result: TempId) -> Result<()> {
        let count = self
            .hidden
            .va_count
            .ok_or_else(|| self.invalid("va_count in a function that is not variadic"))?;
        let dst = self.dst(result)?;
        let mut s = self.out.fork();
        self.copy_bytes(&mut s, &[Loc::vreg(count)], &dst)?;
        self.out.commit(s);
        Ok(())
    }
}
