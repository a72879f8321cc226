//! Register Management
//!
//! Maps the virtual byte registers of selected code onto A/X/Y, the
//! zero-page pseudo-register pool and frame spill slots, then lowers frame
//! accesses to `abs,X` off the hardware stack.
//!
//! ## Architecture
//!
//! - `RegisterAllocator` - public entry point, one call per function
//! - `Liveness` - instruction-level dataflow over vregs, registers and flags
//! - `LinearScan` - location assignment (internal)
//! - `Rewriter` - operand rewriting and frame lowering (internal)
//!
//! ## Invariants
//!
//! - No value stays in a hardware register across a `JSR`
//! - A value live across a call never sits in a cell the callee writes
//! - Interrupt handlers never receive argument slots or PTR
//! - Register pressure is never an error; it ends in a spill slot

mod allocator;
mod liveness;
mod rewrite;

#[cfg(test)]
mod tests;

pub use self::liveness::{Interval, Item, Liveness};

use log::debug;
use m65_codegen::{AsmInst, ClobberSet, Reg, ReturnKind, VReg, ZeroPageLayout};
use m65_common::{CompilerError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use self::allocator::LinearScan;
use self::rewrite::Rewriter;
use crate::abi::FunctionAbi;
use crate::select::{CallTarget, SelectedFunction};

/// Where a virtual register ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Reg(Reg),
    ZeroPage(u8),
    /// Frame byte offset
    Stack(u8),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg(reg) => write!(f, "{}", reg),
            Location::ZeroPage(cell) => write!(f, "${:02X}", cell),
            Location::Stack(offset) => write!(f, "frame+{}", offset),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub in_registers: usize,
    pub in_zero_page: usize,
    pub spilled: usize,
    pub spill_slots: usize,
    /// Passes repeated after X had to be given up for frame addressing
    pub reruns: usize,
}

/// A function with every vreg and frame operand resolved
#[derive(Debug, Clone)]
pub struct AllocatedFunction {
    pub name: String,
    pub code: Vec<AsmInst>,
    pub calls: BTreeMap<usize, CallTarget>,
    /// Locals plus spill slots
    pub frame_bytes: u8,
    pub locations: BTreeMap<VReg, Location>,
    pub stats: AllocationStats,
}

impl AllocatedFunction {
    /// Registers and cells the body itself writes
    pub fn local_clobbers(&self) -> ClobberSet {
        ClobberSet::written_by(&self.code)
    }

    /// Zero-page pool cells holding values
    pub fn pool_cells(&self) -> BTreeSet<u8> {
        self.locations
            .values()
            .filter_map(|l| match l {
                Location::ZeroPage(cell) => Some(*cell),
                _ => None,
            })
            .collect()
    }
}

pub struct RegisterAllocator<'a> {
    layout: &'a ZeroPageLayout,
    trace: bool,
}

impl<'a> RegisterAllocator<'a> {
    pub fn new(layout: &'a ZeroPageLayout, trace: bool) -> Self {
        Self { layout, trace }
    }

    /// Allocate one function
    ///
    /// `call_clobbers` gives, per call instruction, everything the callee
    /// may overwrite including what it calls in turn.
    pub fn allocate(
        &self,
        selected: &SelectedFunction,
        abi: &FunctionAbi,
        call_clobbers: &BTreeMap<usize, ClobberSet>,
    ) -> Result<AllocatedFunction> {
        let exit: &[Reg] = match abi.return_kind() {
            ReturnKind::Byte => &[Reg::A],
            ReturnKind::Word => &[Reg::A, Reg::X],
            ReturnKind::Void | ReturnKind::Struct { .. } => &[],
        };
        let live = Liveness::compute(&selected.code, &selected.calls, exit)?;

        let mut scan = LinearScan {
            code: &selected.code,
            live: &live,
            layout: self.layout,
            call_clobbers,
            reserved: if abi.is_interrupt() {
                self.layout.interrupt_reserved()
            } else {
                BTreeSet::new()
            },
            locals: selected.locals,
            use_x: selected.locals == 0,
            trace: self.trace,
        };
        let (mut locations, mut stats) = scan.run();
        let uses_x = locations.values().any(|l| *l == Location::Reg(Reg::X));
        if stats.spill_slots > 0 && uses_x {
            debug!("{}: spilled with a value in X; reallocating without X", selected.name);
            scan.use_x = false;
            let (again, mut again_stats) = scan.run();
            again_stats.reruns = stats.reruns + 1;
            locations = again;
            stats = again_stats;
        }

        let frame = selected.locals as usize + stats.spill_slots;
        let frame_bytes = u8::try_from(frame).map_err(|_| {
            CompilerError::invalid_ir(
                &selected.name,
                format!("stack frame of {} bytes exceeds 255", frame),
            )
        })?;

        let rewriter = Rewriter {
            function: &selected.name,
            live: &live,
            locations: &locations,
        };
        let (code, calls) = rewriter.run(&selected.code, &selected.calls)?;

        debug!(
            "allocated {}: {} in registers, {} in zero page, {} spilled, frame {} bytes",
            selected.name, stats.in_registers, stats.in_zero_page, stats.spilled, frame_bytes
        );
        Ok(AllocatedFunction {
            name: selected.name.clone(),
            code,
            calls,
            frame_bytes,
            locations,
            stats,
        })
    }
}
