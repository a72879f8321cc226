//! Operand rewriting and frame lowering
//!
//! Replaces every `Virtual` operand by its assigned location and every
//! `Frame` operand by an `abs,X` access off the hardware stack. The frame
//! byte `o` lives at `$0101 + SP + o` where SP is the value right after the
//! prologue; pushes inside the body move SP, so a `TSX` taken at push depth
//! `d` reaches it at `$0101 + o + d,X`.

use log::trace;
use m65_codegen::{isa, Address, AsmInst, Opcode, Operand, Reg, VReg};
use m65_common::{CompilerError, Result};
use std::collections::BTreeMap;

use super::liveness::{Item, Liveness};
use super::Location;
use crate::select::CallTarget;

const STACK_BASE: u16 = 0x0101;

pub(super) struct Rewriter<'a> {
    pub function: &'a str,
    pub live: &'a Liveness,
    pub locations: &'a BTreeMap<VReg, Location>,
}

impl Rewriter<'_> {
    /// Rewrite `code`, carrying the call map over to the new indices
    pub fn run(
        &self,
        code: &[AsmInst],
        calls: &BTreeMap<usize, CallTarget>,
    ) -> Result<(Vec<AsmInst>, BTreeMap<usize, CallTarget>)> {
        let mut out = Vec::with_capacity(code.len());
        let mut moved_calls = BTreeMap::new();
        let mut depth: i32 = 0;
        // Push depth at the last TSX while X still holds it
        let mut tsx: Option<i32> = None;

        for (i, inst) in code.iter().enumerate() {
            let inst = match self.place(inst)? {
                Some(inst) => inst,
                None => continue,
            };

            if let AsmInst::Op(op, Operand::Frame(offset)) = &inst {
                let base = match tsx {
                    Some(d) => d,
                    None => {
                        if self.live.live_in(i).contains(&Item::Reg(Reg::X)) {
                            return Err(CompilerError::internal(format!(
                                "'{}': X is live across a frame access at instruction {}",
                                self.function, i
                            )));
                        }
                        // TSX destroys N/Z; a store must not
                        let keep_flags = !writes_nz(*op) && self.live.is_live_out(i, Item::Nz);
                        if keep_flags {
                            out.push(AsmInst::implied(Opcode::Php));
                            depth += 1;
                        }
                        out.push(AsmInst::implied(Opcode::Tsx));
                        let d = depth;
                        out.push(frame_access(*op, *offset, d)?);
                        if keep_flags {
                            out.push(AsmInst::implied(Opcode::Plp));
                            depth -= 1;
                        }
                        tsx = Some(d);
                        continue;
                    }
                };
                out.push(frame_access(*op, *offset, base)?);
                continue;
            }

            match &inst {
                AsmInst::Label(_) => tsx = None,
                AsmInst::Op(op, _) => {
                    match op {
                        Opcode::Pha | Opcode::Php => depth += 1,
                        Opcode::Pla | Opcode::Plp => depth -= 1,
                        _ => {}
                    }
                    if *op == Opcode::Tsx {
                        tsx = Some(depth);
                    } else if isa::effects(&inst).writes(Reg::X) {
                        tsx = None;
                    }
                }
                AsmInst::Comment(_) => {}
            }
            out.push(inst);
            if let Some(target) = calls.get(&i) {
                moved_calls.insert(out.len() - 1, target.clone());
            }
        }
        trace!("{}: {} -> {} instructions after rewrite", self.function, code.len(), out.len());
        Ok((out, moved_calls))
    }

    /// The instruction with its vreg placed; `None` when it disappears
    fn place(&self, inst: &AsmInst) -> Result<Option<AsmInst>> {
        let (op, vreg) = match inst {
            AsmInst::Op(op, Operand::Virtual(v)) => (*op, *v),
            other => return Ok(Some(other.clone())),
        };
        let location = self.locations.get(&vreg).ok_or_else(|| {
            CompilerError::internal(format!("'{}': {} was never allocated", self.function, vreg))
        })?;
        let placed = match (location, op) {
            (Location::Reg(Reg::A), Opcode::Lda | Opcode::Sta) => None,
            (Location::Reg(Reg::X), Opcode::Sta) => Some(AsmInst::implied(Opcode::Tax)),
            (Location::Reg(Reg::X), Opcode::Lda) => Some(AsmInst::implied(Opcode::Txa)),
            (Location::Reg(Reg::Y), Opcode::Sta) => Some(AsmInst::implied(Opcode::Tay)),
            (Location::Reg(Reg::Y), Opcode::Lda) => Some(AsmInst::implied(Opcode::Tya)),
            (Location::Reg(reg), _) => {
                return Err(CompilerError::internal(format!(
                    "'{}': {} in {} used by {}",
                    self.function, vreg, reg, op
                )))
            }
            (Location::ZeroPage(cell), _) => Some(AsmInst::op(op, Operand::ZeroPage(*cell))),
            (Location::Stack(offset), _) => Some(AsmInst::op(op, Operand::Frame(*offset))),
        };
        Ok(placed)
    }
}

fn writes_nz(op: Opcode) -> bool {
    isa::effects(&AsmInst::op(op, Operand::Frame(0))).writes_nz
}

fn frame_access(op: Opcode, offset: u8, depth: i32) -> Result<AsmInst> {
    let address = STACK_BASE as i32 + offset as i32 + depth;
    if !(0x0100..=0x01FF).contains(&address) {
        return Err(CompilerError::internal(format!(
            "frame byte {} at push depth {} falls outside the stack page",
            offset, depth
        )));
    }
    Ok(AsmInst::op(op, Operand::AbsoluteX(Address::Abs(address as u16))))
}
