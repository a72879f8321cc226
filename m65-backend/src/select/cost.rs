//! Cost model for candidate patterns

use m65_codegen::{isa, AsmInst, Operand};

/// Cost of a candidate, compared field by field in declaration order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cost {
    pub instructions: u32,
    pub cycles: u32,
    /// Touches of zero-page cells and virtual registers
    pub zero_page_accesses: u32,
}

impl Cost {
    pub fn of(code: &[AsmInst]) -> Self {
        let mut cost = Cost::default();
        for inst in code {
            if let AsmInst::Op(_, operand) = inst {
                cost.instructions += 1;
                cost.cycles += isa::cycle_estimate(inst);
                if matches!(
                    operand,
                    Operand::Virtual(_) | Operand::ZeroPage(_) | Operand::IndirectY(_)
                ) {
                    cost.zero_page_accesses += 1;
                }
            }
        }
        cost
    }
}

/// Index of the cheapest candidate; the first one wins a tie
pub fn cheapest(costs: &[Cost]) -> Option<usize> {
    let mut best: Option<(usize, Cost)> = None;
    for (i, cost) in costs.iter().enumerate() {
        match best {
            Some((_, b)) if *cost >= b => {}
            _ => best = Some((i, *cost)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use m65_codegen::{Opcode, VReg};

    #[test]
    fn test_instruction_count_dominates() {
        let short = Cost { instructions: 2, cycles: 12, zero_page_accesses: 2 };
        let long = Cost { instructions: 3, cycles: 6, zero_page_accesses: 0 };
        assert!(short < long);
    }

    #[test]
    fn test_tie_keeps_first() {
        let a = Cost { instructions: 2, cycles: 5, zero_page_accesses: 1 };
        assert_eq!(cheapest(&[a, a]), Some(0));
        let b = Cost { instructions: 2, cycles: 5, zero_page_accesses: 0 };
        assert_eq!(cheapest(&[a, b]), Some(1));
        assert_eq!(cheapest(&[]), None);
    }

    #[test]
    fn test_cost_of_sequence() {
        let code = vec![
            AsmInst::label("x"),
            AsmInst::op(Opcode::Lda, Operand::Virtual(VReg(0))),
            AsmInst::op(Opcode::Adc, Operand::imm(1)),
        ];
        let cost = Cost::of(&code);
        assert_eq!(cost, Cost { instructions: 2, cycles: 5, zero_page_accesses: 1 });
    }
}
