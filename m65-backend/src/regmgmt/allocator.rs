//! Linear-scan assignment of vregs to locations
//!
//! Intervals are visited in start order. Each vreg tries, in order, a
//! hardware register (only when every occurrence is a plain load or store
//! and nothing disturbs the register while the value is live), a free cell
//! of the zero-page pool, and finally a frame spill slot.

use log::{debug, trace};
use m65_codegen::{AsmInst, ClobberSet, Opcode, Operand, Reg, VReg, ZeroPageLayout};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::liveness::{Interval, Item, Liveness};
use super::{AllocationStats, Location};

/// Recoverable allocation failures
///
/// These never leave the allocator; pressure is answered by spilling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(super) enum RegAllocError {
    #[error("register pressure exceeded for {vreg}: no register or zero-page cell is free")]
    RegisterPressureExceeded { vreg: VReg },
}

pub(super) struct LinearScan<'a> {
    pub code: &'a [AsmInst],
    pub live: &'a Liveness,
    pub layout: &'a ZeroPageLayout,
    pub call_clobbers: &'a BTreeMap<usize, ClobberSet>,
    /// Cells an interrupt handler may not take
    pub reserved: BTreeSet<u8>,
    /// Frame bytes already taken by locals
    pub locals: u8,
    /// X is off limits once the frame is addressed through it
    pub use_x: bool,
    pub trace: bool,
}

struct Active {
    interval: Interval,
    location: Location,
}

impl<'a> LinearScan<'a> {
    pub fn run(&self) -> (BTreeMap<VReg, Location>, AllocationStats) {
        let mut order: Vec<(VReg, Interval)> = self.live.intervals().into_iter().collect();
        order.sort_by_key(|(v, iv)| (iv.start, *v));

        let mut locations = BTreeMap::new();
        let mut stats = AllocationStats::default();
        let mut active: Vec<Active> = Vec::new();
        // End of the last interval in each spill slot
        let mut slots: Vec<usize> = Vec::new();

        for (vreg, interval) in order {
            active.retain(|a| a.interval.end >= interval.start);

            let location = match self.try_register(vreg, &interval, &active) {
                Some(reg) => {
                    stats.in_registers += 1;
                    Location::Reg(reg)
                }
                None => match self.assign_zero_page(vreg, &active) {
                    Ok(cell) => {
                        stats.in_zero_page += 1;
                        Location::ZeroPage(cell)
                    }
                    Err(e) => {
                        debug!("{}; spilling", e);
                        stats.spilled += 1;
                        let slot = match slots.iter().position(|end| *end < interval.start) {
                            Some(k) => {
                                slots[k] = interval.end;
                                k
                            }
                            None => {
                                slots.push(interval.end);
                                slots.len() - 1
                            }
                        };
                        Location::Stack(self.locals.saturating_add(slot as u8))
                    }
                },
            };

            if self.trace {
                debug!("{} [{}..{}] -> {}", vreg, interval.start, interval.end, location);
            } else {
                trace!("{} [{}..{}] -> {}", vreg, interval.start, interval.end, location);
            }
            locations.insert(vreg, location);
            active.push(Active { interval, location });
        }

        stats.spill_slots = slots.len();
        (locations, stats)
    }

    fn occurrences(&self, vreg: VReg) -> Vec<usize> {
        self.code
            .iter()
            .enumerate()
            .filter(|(_, inst)| matches!(inst.operand(), Some(Operand::Virtual(v)) if *v == vreg))
            .map(|(i, _)| i)
            .collect()
    }

    fn try_register(&self, vreg: VReg, interval: &Interval, active: &[Active]) -> Option<Reg> {
        let occurrences = self.occurrences(vreg);
        let plain = occurrences
            .iter()
            .all(|&i| matches!(self.code[i].opcode(), Some(Opcode::Lda | Opcode::Sta)));
        if occurrences.is_empty() || !plain {
            return None;
        }

        Reg::ALL.into_iter().find(|&reg| {
            if reg == Reg::X && !self.use_x {
                return false;
            }
            let taken = active
                .iter()
                .any(|a| a.location == Location::Reg(reg) && a.interval.overlaps(interval));
            !taken && self.register_holds(vreg, reg, &occurrences)
        })
    }

    /// Whether `reg` can carry `vreg` for its whole life
    ///
    /// For A the loads and stores disappear; for X and Y they become
    /// transfers, which set N/Z on a store where the original did not.
    fn register_holds(&self, vreg: VReg, reg: Reg, occurrences: &[usize]) -> bool {
        let value = Item::V(vreg);
        let physical = Item::Reg(reg);

        for i in 0..self.code.len() {
            if !self.live.is_live_out(i, value) {
                continue;
            }
            let own = occurrences.contains(&i);
            if !own && self.live.writes(i, physical) {
                return false;
            }
            if reg != Reg::A && self.live.is_live_out(i, physical) {
                return false;
            }
        }

        occurrences.iter().all(|&i| {
            let flags_live = self.live.is_live_out(i, Item::Nz);
            match (reg, self.code[i].opcode()) {
                // A deleted load no longer sets N/Z
                (Reg::A, Some(Opcode::Lda)) => !flags_live,
                (Reg::A, _) => true,
                (_, Some(Opcode::Sta)) => !flags_live && !self.live.is_live_out(i, physical),
                _ => true,
            }
        })
    }

    fn assign_zero_page(&self, vreg: VReg, active: &[Active]) -> Result<u8, RegAllocError> {
        let mut banned = self.reserved.clone();
        for a in active {
            if let Location::ZeroPage(cell) = a.location {
                banned.insert(cell);
            }
        }
        // Cells a callee writes cannot hold a value live across the call
        for (&at, clobbers) in self.call_clobbers {
            if self.live.is_live_out(at, Item::V(vreg)) {
                banned.extend(clobbers.zero_page.iter().copied());
            }
        }
        self.layout
            .pool()
            .into_iter()
            .find(|cell| !banned.contains(cell))
            .ok_or(RegAllocError::RegisterPressureExceeded { vreg })
    }
}
