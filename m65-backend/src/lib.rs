//! M65 6502 Compiler - Backend
//!
//! This crate lowers IR to 6502 code and hands it to one of the backend
//! interfaces:
//!
//! - `select` - instruction selection with a per-node cost model
//! - `regmgmt` - register / zero-page / stack allocation
//! - `abi` - binding, call shapes, frames, interrupts, clobber analysis
//! - `runtime` - bank trampolines and setjmp/longjmp routines
//! - `function` - the per-function emission state machine
//! - `interface` - symbolic, bytecode, null and hardware emitters
//! - `context` - the compilation context tying the passes together

pub mod abi;
pub mod context;
pub mod function;
pub mod globals;
pub mod interface;
pub mod naming;
pub mod regmgmt;
pub mod runtime;
pub mod select;

use m65_codegen::ZeroPageLayout;
use m65_common::{CompilerError, Result, TargetLimits};
use serde::{Deserialize, Serialize};

pub use abi::{AbiEngine, CallKind, CallSite, FunctionAbi};
pub use context::CompilationContext;
pub use interface::{
    select_interface, Artifact, CompiledOutput, Image, Interface, Relocation, Segment,
    Statistics, TARGETS,
};
pub use m65_ir::Module;

/// Code generation options
///
/// `Default` matches the Atari cartridge layout: an 8K banked window at
/// $8000, the fixed common area at $A000 and the bank select register at
/// $D500.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    pub zero_page: ZeroPageLayout,
    /// Address the selected bank appears at
    pub bank_window: u16,
    pub bank_capacity: u16,
    /// Hardware register selecting the bank
    pub bank_select: u16,
    /// Origin of the always-mapped common code area
    pub code_origin: u16,
    pub code_capacity: u16,
    /// Origin of RAM data (globals, interrupt save areas)
    pub data_origin: u16,
    pub data_capacity: u16,
    pub limits: TargetLimits,
    /// Log every allocation decision at info level
    pub trace_allocation: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            zero_page: ZeroPageLayout::default(),
            bank_window: 0x8000,
            bank_capacity: 0x2000,
            bank_select: 0xD500,
            code_origin: 0xA000,
            code_capacity: 0x2000,
            data_origin: 0x2000,
            data_capacity: 0x1000,
            limits: TargetLimits::default(),
            trace_allocation: false,
        }
    }
}

impl CodegenOptions {
    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let options: CodegenOptions =
            serde_json::from_str(text).map_err(|e| CompilerError::Config {
                message: e.to_string(),
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Check the memory map for overlaps
    pub fn validate(&self) -> Result<()> {
        self.zero_page
            .validate()
            .map_err(|message| CompilerError::Config { message })?;

        let region = |origin: u16, capacity: u16| (origin as u32, origin as u32 + capacity as u32);
        let regions = [
            ("bank window", region(self.bank_window, self.bank_capacity)),
            ("code area", region(self.code_origin, self.code_capacity)),
            ("data area", region(self.data_origin, self.data_capacity)),
        ];
        for (name, (start, end)) in regions {
            if end > 0x1_0000 {
                return Err(CompilerError::Config {
                    message: format!("{} extends past $FFFF", name),
                });
            }
            if start < 0x0200 {
                return Err(CompilerError::Config {
                    message: format!("{} overlaps zero page or the stack", name),
                });
            }
        }
        for (i, (a, (a_start, a_end))) in regions.iter().enumerate() {
            for (b, (b_start, b_end)) in regions.iter().skip(i + 1) {
                if a_start < b_end && b_start < a_end {
                    return Err(CompilerError::Config {
                        message: format!("{} overlaps {}", a, b),
                    });
                }
            }
        }
        let select = self.bank_select as u32;
        for (name, (start, end)) in regions {
            if select >= start && select < end {
                return Err(CompilerError::Config {
                    message: format!("bank select register lies inside the {}", name),
                });
            }
        }
        Ok(())
    }
}

/// Compile a module for the named target
///
/// The target is resolved before any IR is looked at, so an unknown name
/// fails fast with the list of valid targets.
pub fn compile_module(module: &Module, target: &str, options: CodegenOptions) -> Result<CompiledOutput> {
    let context = CompilationContext::new(target, options)?;
    context.compile(module)
}
